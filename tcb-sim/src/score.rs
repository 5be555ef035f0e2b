use core::fmt;

use tcb::tcp::State;
use tcb::time::Duration;

/// The result of a simulated transfer.
pub struct Score {
    /// Bytes that arrived in order at the server.
    pub(crate) data_len: u64,
    /// Simulated time from the first SYN until the server saw the end of the stream.
    pub(crate) time: Duration,
    /// Segments put on the link.
    pub(crate) sent: u32,
    /// Segments the link lost.
    pub(crate) dropped: u32,
    /// Segments that repeated sequence space.
    pub(crate) retransmitted: u32,
    pub(crate) client: State,
    pub(crate) server: State,
}

impl Score {
    /// Bytes that arrived in order at the server.
    pub fn delivered(&self) -> u64 {
        self.data_len
    }

    /// Whether both ends completed their close.
    pub fn clean(&self) -> bool {
        self.client == State::Closed && self.server == State::Closed
    }

    fn total_kb(&self) -> u64 {
        self.data_len / 1024
    }

    fn effective_rate(&self) -> f32 {
        (self.data_len as f32) / self.elapsed_secs()
    }

    fn elapsed_secs(&self) -> f32 {
        self.time.as_millis() as f32 / 1000.0
    }

    fn loss_rate(&self) -> f32 {
        (self.dropped as f32) / (self.sent.max(1) as f32)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // In the iperf style:
        //
        // ```text
        // [  3]  0.0- 1.0 sec   131 KBytes  1.05 Mbits/sec   0.000 ms    0/   91 (0%)
        // ```
        write!(
            f,
            "[{ts}] {begin}-{end} sec\t{total} KBytes\t{rate} Byte/sec\t\
            {dropped}/\t{sent} ({loss_percent}%)\t{retransmitted} retransmitted\t\
            client {client}, server {server}",
            ts = 3,
            begin = 0.0,
            end = self.time.as_secs_f32(),
            total = self.total_kb(),
            rate = self.effective_rate(),
            dropped = self.dropped,
            sent = self.sent,
            loss_percent = self.loss_rate() * 100.0,
            retransmitted = self.retransmitted,
            client = self.client,
            server = self.server,
        )
    }
}
