//! Segment header representation.
//!
//! The connection operates on a high-level [`Repr`] of the header: every field the state machine
//! inspects, with the options it understands already decoded. The byte layout is only needed at
//! the boundary to the network layer, where [`Packet`] provides checked field access to a raw
//! buffer and `Repr::parse`/`Repr::emit` convert between the two.
//!
//! Sequence numbers live in [`SeqNumber`], which implements the wraparound-safe comparison all of
//! the window logic depends on. `a < b` holds when `b` is less than 2<sup>31</sup> bytes ahead of
//! `a`, regardless of where the 32-bit counter currently is.
//!
//! The checksum field is left zero by `emit` and never inspected by `parse`. It covers a network
//! layer pseudo header and is therefore filled and verified below this crate.
//!
//! [`Repr`]: struct.Repr.html
//! [`Packet`]: struct.Packet.html
//! [`SeqNumber`]: struct.SeqNumber.html
mod error;
mod tcp;

pub use self::error::{Error, Result};
pub use self::tcp::{
    Flags,
    Packet,
    Repr,
    SeqNumber,
    TcpOption,
    TcpTimestamp,
};
