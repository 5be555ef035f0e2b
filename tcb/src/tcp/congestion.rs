//! The congestion control interface and a NewReno implementation.
//!
//! The connection owns the loss recovery bookkeeping, fast retransmit and recovery, window
//! inflation and deflation. An algorithm only decides how the congestion window grows on new
//! acknowledgments and where the slow start threshold goes on loss.
use alloc::boxed::Box;

/// A pluggable congestion control algorithm.
pub trait CongestionControl {
    /// Name of the algorithm, for logging.
    fn name(&self) -> &'static str;

    /// Start from the initial windows once the segment size is known.
    fn init(&mut self, segment_size: u32, congestion_window: u32, slow_start_threshold: u32);

    /// The congestion window in bytes.
    fn congestion_window(&self) -> u32;

    /// The slow start threshold in bytes.
    fn slow_start_threshold(&self) -> u32;

    /// Override the congestion window, as the recovery procedures do.
    fn set_congestion_window(&mut self, bytes: u32);

    /// Override the slow start threshold.
    fn set_slow_start_threshold(&mut self, bytes: u32);

    /// The segment size the windows are measured against.
    fn segment_size(&self) -> u32;

    /// New data was acknowledged outside of recovery.
    fn on_ack_received(&mut self, bytes_acked: u32);

    /// A loss was detected with `bytes_in_flight` outstanding.
    fn on_loss_detected(&mut self, bytes_in_flight: u32);

    /// A fresh instance with the same parameters, for a connection forked from a listener.
    fn fork(&self) -> Box<dyn CongestionControl>;
}

/// Models TCP NewReno congestion avoidance (RFC 5681, RFC 6582).
#[derive(Clone, Copy, Debug, Hash)]
pub struct NewReno {
    /// Decider between slow-start and congestion avoidance.
    ///
    /// Set high initially, then updated on occurance of congestion.
    pub ssthresh: u32,

    /// The window dictated by congestion.
    pub congestion_window: u32,

    /// The sender maximum segment size.
    pub segment_size: u32,
}

impl NewReno {
    /// An instance before `init` was called.
    pub fn new() -> Self {
        NewReno::default()
    }

    /// Return whether the window is in slow start.
    pub fn in_slow_start(&self) -> bool {
        self.congestion_window < self.ssthresh
    }
}

impl Default for NewReno {
    fn default() -> Self {
        NewReno {
            ssthresh: 0xffff,
            congestion_window: 536,
            segment_size: 536,
        }
    }
}

impl CongestionControl for NewReno {
    fn name(&self) -> &'static str {
        "NewReno"
    }

    fn init(&mut self, segment_size: u32, congestion_window: u32, slow_start_threshold: u32) {
        self.segment_size = segment_size.max(1);
        self.congestion_window = congestion_window.max(self.segment_size);
        self.ssthresh = slow_start_threshold.max(2*self.segment_size);
    }

    fn congestion_window(&self) -> u32 {
        self.congestion_window
    }

    fn slow_start_threshold(&self) -> u32 {
        self.ssthresh
    }

    fn set_congestion_window(&mut self, bytes: u32) {
        self.congestion_window = bytes;
    }

    fn set_slow_start_threshold(&mut self, bytes: u32) {
        self.ssthresh = bytes;
    }

    fn segment_size(&self) -> u32 {
        self.segment_size
    }

    fn on_ack_received(&mut self, bytes_acked: u32) {
        let mss = self.segment_size;
        let increase = if self.in_slow_start() {
            // At most one segment per ack, even for stretch acks (RFC 5681, 3.1).
            bytes_acked.min(mss)
        } else {
            // Roughly one segment per round trip.
            (mss.saturating_mul(mss) / self.congestion_window.max(1)).max(1)
        };
        self.congestion_window = self.congestion_window.saturating_add(increase);
    }

    fn on_loss_detected(&mut self, bytes_in_flight: u32) {
        self.ssthresh = (bytes_in_flight / 2).max(2*self.segment_size);
    }

    fn fork(&self) -> Box<dyn CongestionControl> {
        Box::new(*self)
    }
}
