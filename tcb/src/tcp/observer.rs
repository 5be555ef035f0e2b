//! Tracing of the quantities a host usually wants to watch.
//!
//! Every change of an observed quantity is pushed to each attached `Observer` right where it
//! happens, with the old and the new value. All methods do nothing by default so an observer only
//! implements what it is interested in.
use crate::time::Duration;
use crate::wire::Repr;

use super::Error;
use super::connection::{AckState, State};

/// Receives changes of a connection.
pub trait Observer {
    /// The connection state changed.
    fn state_changed(&mut self, old: State, new: State) { let _ = (old, new); }

    /// The congestion state changed.
    fn ack_state_changed(&mut self, old: AckState, new: AckState) { let _ = (old, new); }

    /// The congestion window changed.
    fn congestion_window_changed(&mut self, old: u32, new: u32) { let _ = (old, new); }

    /// The slow start threshold changed.
    fn slow_start_threshold_changed(&mut self, old: u32, new: u32) { let _ = (old, new); }

    /// The retransmission timeout changed.
    fn rto_changed(&mut self, old: Duration, new: Duration) { let _ = (old, new); }

    /// A round trip time was measured.
    fn rtt_sampled(&mut self, rtt: Duration) { let _ = rtt; }

    /// A segment was handed to the network layer.
    fn segment_sent(&mut self, repr: &Repr) { let _ = repr; }

    /// A segment arrived for the connection.
    fn segment_received(&mut self, repr: &Repr) { let _ = repr; }

    /// The peer broke a rule but the connection continues.
    fn protocol_violation(&mut self, kind: Error) { let _ = kind; }
}
