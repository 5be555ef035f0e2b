use crate::time::Duration;

use super::{Error, Result};

/// Tunables of a connection.
///
/// Fixed for the life time of a connection. The defaults follow the classic BSD socket values
/// with timers in whole seconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// The SMSS, lowered to the peer's MSS option during the handshake.
    ///
    /// The size does not include the TCP/IP headers and options.
    pub segment_size: usize,

    /// Capacity of the send buffer.
    pub send_buffer: usize,

    /// Capacity of the receive buffer, also sizes the offered window scale.
    pub recv_buffer: usize,

    /// Initial congestion window, in segments.
    pub initial_cwnd: u32,

    /// Initial slow start threshold in bytes.
    ///
    /// Left at `65535` it is scaled by the peer's window shift once negotiated.
    pub initial_ssthresh: u32,

    /// First retransmission interval of a SYN or SYN+ACK, doubled per retry.
    pub connect_timeout: Duration,

    /// Retransmissions of a SYN or SYN+ACK before giving up.
    pub connect_retries: u32,

    /// Retransmission timeouts without progress before giving up.
    pub data_retries: u32,

    /// Longest time an acknowledgment may be held back.
    pub delayed_ack_timeout: Duration,

    /// Number of in-order segments acknowledged together.
    pub delayed_ack_max: u32,

    /// Disable Nagle's algorithm.
    pub no_delay: bool,

    /// First persist interval.
    pub persist_timeout: Duration,

    /// Upper bound of the persist interval.
    pub persist_max: Duration,

    /// Maximum segment lifetime. `TIME_WAIT` lasts twice as long.
    pub msl: Duration,

    /// Largest window advertised, before scaling.
    pub max_window: u32,

    /// Offer window scaling.
    pub window_scaling: bool,

    /// Offer timestamps.
    pub timestamps: bool,

    /// Lower bound of the retransmission timeout.
    pub min_rto: Duration,

    /// Upper bound of the retransmission timeout.
    pub max_rto: Duration,

    /// Retransmission timeout before any round trip time was measured.
    pub initial_rto: Duration,

    /// Granularity of the host clock.
    pub clock_granularity: Duration,

    /// Duplicate acknowledgments that trigger a fast retransmit.
    pub retx_threshold: u32,

    /// Send new data on the first duplicate acknowledgments (RFC 3042).
    pub limited_transmit: bool,

    /// Start every sequence space at zero. Only useful for tests.
    pub null_isn: bool,
}

impl Config {
    /// The slow start threshold that is scaled with the peer's window shift.
    pub const UNSCALED_SSTHRESH: u32 = 0xffff;

    /// Check that the configuration describes a usable connection.
    pub fn check(&self) -> Result<()> {
        if self.segment_size == 0 || self.send_buffer == 0 || self.recv_buffer == 0 {
            return Err(Error::Exhausted);
        }
        if self.initial_cwnd == 0 || self.delayed_ack_max == 0 || self.retx_threshold == 0 {
            return Err(Error::Exhausted);
        }
        if self.segment_size > usize::from(u16::max_value()) {
            return Err(Error::Illegal);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            segment_size: 536,
            send_buffer: 131072,
            recv_buffer: 131072,
            initial_cwnd: 1,
            initial_ssthresh: Config::UNSCALED_SSTHRESH,
            connect_timeout: Duration::from_secs(3),
            connect_retries: 6,
            data_retries: 6,
            delayed_ack_timeout: Duration::from_millis(200),
            delayed_ack_max: 2,
            no_delay: true,
            persist_timeout: Duration::from_secs(6),
            persist_max: Duration::from_secs(60),
            msl: Duration::from_secs(120),
            max_window: 0xffff,
            window_scaling: true,
            timestamps: true,
            min_rto: Duration::from_secs(1),
            max_rto: Duration::from_secs(60),
            initial_rto: Duration::from_secs(1),
            clock_granularity: Duration::from_millis(1),
            retx_threshold: 3,
            limited_transmit: true,
            null_isn: false,
        }
    }
}
