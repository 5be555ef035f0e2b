//! The connection endpoint.
//!
//! A [`Connection`] implements the state machine of RFC 793 with the reliability engine around
//! it: retransmission timeouts estimated as in RFC 6298, fast retransmit and NewReno recovery
//! (RFC 5681, RFC 6582), delayed acknowledgments, Nagle's algorithm, silly window avoidance, the
//! persist timer, and the window scale and timestamp options of RFC 7323.
//!
//! The connection never owns the things it talks to. Each event (a segment arrival, a timer fire
//! or an application request) is passed in together with an [`Io`] bundle that borrows the host
//! collaborators for the duration of the call:
//!
//! * a [`Scheduler`] for the five timers of a connection,
//! * a [`SegmentSink`] where outgoing segments go,
//! * the [`TxBuffer`] and [`RxBuffer`] holding the byte streams,
//! * the [`Notify`] interface of the application.
//!
//! Provided implementations ([`TimerQueue`], [`SendQueue`], [`ReorderBuffer`], [`Recorder`],
//! [`EventLog`]) are enough to run a connection in memory, which is what the tests and the
//! simulator do.
//!
//! Every call returns [`Signals`] for the host. `accept` asks a listening connection's owner to
//! `fork` the connection for a new request while `delete` tells it that the connection closed
//! and can be dropped.
//!
//! [`Connection`]: struct.Connection.html
//! [`Io`]: struct.Io.html
//! [`Scheduler`]: trait.Scheduler.html
//! [`SegmentSink`]: trait.SegmentSink.html
//! [`TxBuffer`]: trait.TxBuffer.html
//! [`RxBuffer`]: trait.RxBuffer.html
//! [`Notify`]: trait.Notify.html
//! [`TimerQueue`]: struct.TimerQueue.html
//! [`SendQueue`]: struct.SendQueue.html
//! [`ReorderBuffer`]: struct.ReorderBuffer.html
//! [`Recorder`]: struct.Recorder.html
//! [`EventLog`]: struct.EventLog.html
//! [`Signals`]: struct.Signals.html
use core::fmt;

mod config;
mod congestion;
mod connection;
mod io;
mod isn;
mod observer;
pub mod options;
mod recv;
mod role;
pub mod rtt;
mod send;
pub mod timer;
pub mod window;

#[cfg(test)]
mod tests;

pub use self::config::Config;
pub use self::congestion::{CongestionControl, NewReno};
pub use self::connection::{
    AckState,
    Connection,
    Open,
    Ports,
    Signals,
    State,
};
pub use self::io::{
    Event,
    EventLog,
    Insert,
    Io,
    Notify,
    Recorder,
    ReorderBuffer,
    RxBuffer,
    SegmentSink,
    SendQueue,
    TxBuffer,
};
pub use self::isn::{IsnGenerator, KeyService};
pub use self::observer::Observer;
pub use self::options::Options;
pub use self::role::{Plain, Role, Subflow};
pub use self::rtt::{RttEstimator, RttHistory};
pub use self::timer::{Scheduler, TimerHandle, TimerKind, TimerQueue, Timers};
pub use self::window::Window;

/// The errors reported by a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The peer reset an opening connection.
    ConnectionRefused,

    /// The peer reset a synchronized connection.
    ConnectionReset,

    /// Retransmissions were exhausted.
    ConnectionTimedOut,

    /// A segment was not acceptable and was dropped.
    InvalidSegment,

    /// The peer broke a rule of the protocol, the connection continues.
    ProtocolViolation,

    /// The request is not permitted in the current state.
    Illegal,

    /// A buffer or configured size is exhausted.
    Exhausted,
}

/// The result type of connection operations.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Return whether the error ends the connection.
    pub fn is_fatal(self) -> bool {
        matches!(self,
            Error::ConnectionRefused | Error::ConnectionReset | Error::ConnectionTimedOut)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ConnectionRefused => write!(f, "connection refused"),
            Error::ConnectionReset => write!(f, "connection reset"),
            Error::ConnectionTimedOut => write!(f, "connection timed out"),
            Error::InvalidSegment => write!(f, "invalid segment"),
            Error::ProtocolViolation => write!(f, "protocol violation"),
            Error::Illegal => write!(f, "illegal request"),
            Error::Exhausted => write!(f, "resources exhausted"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error { }
