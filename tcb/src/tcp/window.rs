//! Sequence marks and window bookkeeping.
//!
//! The send side is described by three marks, `first_unacked <= next_to_send <= highest_sent`.
//! `next_to_send` falls back to `first_unacked` after a retransmission timeout and then walks
//! forward again while `highest_sent` remembers how far data had already gone. On the receiving
//! side the highest sequence number and the highest acknowledgment number seen from the peer
//! decide whether a window update from the peer is believed.
//!
//! The window we advertise is never allowed to retract its right edge. When free space shrinks
//! faster than the peer consumes the window, the previously promised edge is kept.
use crate::wire::SeqNumber;

/// Largest value of the 16-bit window field.
pub const MAX_FIELD: u32 = 0xffff;

/// Sequence marks and windows of one connection.
#[derive(Clone, Debug)]
pub struct Window {
    /// Oldest byte sent but not yet acknowledged (`SND.UNA`).
    pub first_unacked: SeqNumber,
    /// Next sequence number to send (`SND.NXT`).
    pub next_to_send: SeqNumber,
    /// One past the highest sequence number ever sent.
    pub highest_sent: SeqNumber,
    /// The highest sequence number received from the peer.
    pub highest_received: SeqNumber,
    /// The highest acknowledgment number received from the peer.
    pub highest_ack_received: SeqNumber,
    /// A window probe beyond the peer's window is outstanding.
    pub probe_outstanding: bool,
    peer_window: u32,
    max_peer_window: u32,
    max_advertisable: u32,
    right_edge: Option<SeqNumber>,
}

impl Window {
    /// Window state before any sequence number was chosen.
    pub fn new(max_advertisable: u32) -> Self {
        Window {
            first_unacked: SeqNumber(0),
            next_to_send: SeqNumber(0),
            highest_sent: SeqNumber(0),
            highest_received: SeqNumber(0),
            highest_ack_received: SeqNumber(0),
            probe_outstanding: false,
            peer_window: 0,
            max_peer_window: 0,
            max_advertisable: max_advertisable.min(MAX_FIELD),
            right_edge: None,
        }
    }

    /// Start the send sequence space at `isn`.
    pub fn init_send(&mut self, isn: SeqNumber) {
        self.first_unacked = isn;
        self.next_to_send = isn;
        self.highest_sent = isn;
        self.highest_ack_received = isn;
    }

    /// Start the receive sequence space after the peer's `irs`.
    pub fn init_recv(&mut self, irs: SeqNumber) {
        self.highest_received = irs + 1;
        self.right_edge = None;
    }

    /// Sequence space sent and not yet acknowledged.
    pub fn bytes_in_flight(&self) -> usize {
        self.highest_sent.saturating_sub(self.first_unacked)
    }

    /// Return whether anything is unacknowledged.
    pub fn outstanding(&self) -> bool {
        self.first_unacked < self.highest_sent
    }

    /// The peer's receive window, already scaled.
    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    /// Set the peer window unconditionally, as from the handshake.
    pub fn set_peer_window(&mut self, window: u32) {
        self.peer_window = window;
        self.max_peer_window = self.max_peer_window.max(window);
    }

    /// The largest window the peer ever offered.
    pub fn max_peer_window(&self) -> u32 {
        self.max_peer_window
    }

    /// Return whether a segment of `len` bytes is worth sending into a small window.
    ///
    /// True for at least half of the largest window the peer offered (RFC 1122, 4.2.3.4).
    pub fn half_of_max(&self, len: usize) -> bool {
        len > 0 && 2 * len >= self.max_peer_window as usize
    }

    /// Bytes that may be sent now given the congestion window and data in the pipe.
    pub fn available(&self, congestion_window: u32, pipe: usize) -> usize {
        let limit = congestion_window.min(self.peer_window) as usize;
        limit.saturating_sub(pipe)
    }

    /// The highest acknowledgment number that is believable.
    ///
    /// A probe sends one byte beyond the window without moving `highest_sent`, its
    /// acknowledgment must still be accepted.
    pub fn ack_limit(&self) -> SeqNumber {
        if self.probe_outstanding {
            self.highest_sent + 1
        } else {
            self.highest_sent
        }
    }

    /// Consider a window update carried by a segment.
    ///
    /// Before the connection is synchronized the window is always taken. Afterwards only a
    /// segment that is not older than what was seen may change it: one that acknowledges new
    /// data, one that carries a higher sequence number, or one that only widens the window at the
    /// current acknowledgment. Returns whether the peer window changed.
    pub fn update_peer_window(
        &mut self,
        seq: SeqNumber,
        ack: SeqNumber,
        window: u32,
        synchronized: bool,
    ) -> bool {
        if !synchronized {
            let changed = self.peer_window != window;
            self.set_peer_window(window);
            return changed;
        }

        let mut update = ack == self.highest_ack_received && window > self.peer_window;
        if self.highest_ack_received < ack {
            self.highest_ack_received = ack;
            update = true;
        }
        if self.highest_received < seq {
            self.highest_received = seq;
            update = true;
        }

        if update && self.peer_window != window {
            self.set_peer_window(window);
            true
        } else {
            false
        }
    }

    /// Return whether `[head, tail)` lies entirely outside the acceptable receive range.
    ///
    /// The range is `[highest_received - size, highest_received + size)`. An empty segment is
    /// checked as a single point.
    pub fn out_of_range(&self, head: SeqNumber, tail: SeqNumber, size: usize) -> bool {
        let low = self.highest_received - size;
        let high = self.highest_received + size;
        if head == tail {
            !(low <= head && head < high)
        } else {
            !(head < high && low < tail)
        }
    }

    /// The window field to put on a synchronizing segment.
    ///
    /// Windows of SYN segments are never scaled.
    pub fn syn_window(&self, free: usize) -> u16 {
        free.min(MAX_FIELD as usize) as u16
    }

    /// The window field to advertise with receive next `next`.
    ///
    /// Computed from the free space, limited by the largest advertisable window and the 16-bit
    /// field. The result is raised when it would pull the right edge back from what was already
    /// advertised.
    pub fn advertise(&mut self, free: usize, scale: u8, next: SeqNumber) -> u16 {
        let ceiling = (self.max_advertisable as usize) << scale;
        let mut field = (free.min(ceiling) >> scale).min(MAX_FIELD as usize);

        if let Some(edge) = self.right_edge {
            if let Some(promised) = edge.checked_sub(next) {
                let unit = 1usize << scale;
                let required = (promised + unit - 1) >> scale;
                field = field.max(required.min(MAX_FIELD as usize));
            }
        }

        let edge = next + (field << scale);
        self.right_edge = Some(match self.right_edge {
            Some(previous) => previous.max(edge),
            None => edge,
        });
        field as u16
    }

    /// The largest right edge advertised so far.
    pub fn right_edge(&self) -> Option<SeqNumber> {
        self.right_edge
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn available_respects_both_windows() {
        let mut window = Window::new(65535);
        window.init_send(SeqNumber(1000));
        window.set_peer_window(4000);
        window.highest_sent = SeqNumber(2000);
        assert_eq!(window.bytes_in_flight(), 1000);
        assert_eq!(window.available(10_000, window.bytes_in_flight()), 3000);
        assert_eq!(window.available(1500, window.bytes_in_flight()), 500);
        assert_eq!(window.available(800, window.bytes_in_flight()), 0);
    }

    #[test]
    fn old_segment_does_not_update() {
        let mut window = Window::new(65535);
        window.init_send(SeqNumber(0));
        window.init_recv(SeqNumber(99));
        assert!(window.update_peer_window(SeqNumber(100), SeqNumber(10), 5000, true));
        assert_eq!(window.peer_window(), 5000);
        // Older seq and older ack: reordered, ignore.
        assert!(!window.update_peer_window(SeqNumber(90), SeqNumber(5), 100, true));
        assert_eq!(window.peer_window(), 5000);
        // Same ack, wider window: accepted.
        assert!(window.update_peer_window(SeqNumber(100), SeqNumber(10), 6000, true));
        // Same ack, narrower window: ignored.
        assert!(!window.update_peer_window(SeqNumber(100), SeqNumber(10), 0, true));
        assert_eq!(window.peer_window(), 6000);
    }

    #[test]
    fn largest_peer_window_is_kept() {
        let mut window = Window::new(65535);
        window.init_send(SeqNumber(0));
        window.init_recv(SeqNumber(99));
        window.set_peer_window(50);
        assert!(window.half_of_max(25));
        assert!(!window.half_of_max(24));

        assert!(window.update_peer_window(SeqNumber(100), SeqNumber(10), 1000, true));
        assert!(window.update_peer_window(SeqNumber(100), SeqNumber(20), 300, true));
        assert_eq!(window.peer_window(), 300);
        assert_eq!(window.max_peer_window(), 1000);
        assert!(window.half_of_max(500));
        assert!(!window.half_of_max(300));
        assert!(!window.half_of_max(0));
    }

    #[test]
    fn range_check() {
        let mut window = Window::new(65535);
        window.init_recv(SeqNumber(999));
        assert!(!window.out_of_range(SeqNumber(1000), SeqNumber(1100), 500));
        assert!(!window.out_of_range(SeqNumber(400), SeqNumber(600), 500));
        assert!(window.out_of_range(SeqNumber(1500), SeqNumber(1600), 500));
        assert!(window.out_of_range(SeqNumber(0), SeqNumber(500), 500));
        assert!(!window.out_of_range(SeqNumber(1499), SeqNumber(1499), 500));
        assert!(window.out_of_range(SeqNumber(1500), SeqNumber(1500), 500));
    }

    #[test]
    fn range_check_wraps() {
        let mut window = Window::new(65535);
        window.init_recv(SeqNumber(i32::max_value() - 10));
        let head = SeqNumber(i32::max_value() - 5);
        assert!(!window.out_of_range(head, head + 100, 1000));
    }

    #[test]
    fn advertise_scaled() {
        let mut window = Window::new(65535);
        let next = SeqNumber(0);
        assert_eq!(window.advertise(1 << 20, 7, next), 8192);
        assert_eq!(window.right_edge(), Some(next + (1 << 20)));
        // Limited by the largest advertisable window.
        let mut window = Window::new(1000);
        assert_eq!(window.advertise(1 << 20, 0, next), 1000);
    }

    #[test]
    fn right_edge_never_retracts() {
        let mut window = Window::new(65535);
        let next = SeqNumber(500);
        assert_eq!(window.advertise(4000, 0, next), 4000);
        // Nothing consumed by the application but 1000 bytes arrived.
        assert_eq!(window.advertise(3000, 0, next + 1000), 3000);
        // Free space dropped without any data arriving: keep the edge.
        assert_eq!(window.advertise(1000, 0, next + 1000), 3000);
        assert_eq!(window.right_edge(), Some(next + 4000));
        // More space than before moves the edge.
        assert_eq!(window.advertise(8000, 0, next + 1000), 8000);
        assert_eq!(window.right_edge(), Some(next + 9000));
    }

    #[test]
    fn probe_extends_ack_limit() {
        let mut window = Window::new(65535);
        window.init_send(SeqNumber(7));
        assert_eq!(window.ack_limit(), SeqNumber(7));
        window.probe_outstanding = true;
        assert_eq!(window.ack_limit(), SeqNumber(8));
    }
}
