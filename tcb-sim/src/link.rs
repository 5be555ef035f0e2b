//! A one-way-delay link with deterministic loss.
//!
//! Whether a packet is dropped depends only on the seed and the index of the packet on the link,
//! so a run can be repeated exactly.
use std::collections::VecDeque;

use tcb::tcp::IsnGenerator;
use tcb::time::{Duration, Expiration, Instant};

/// One direction of the link.
pub struct Link {
    queue: VecDeque<(Instant, Vec<u8>)>,
    delay: Duration,
    /// Drop threshold in `[0, 2^53]`.
    threshold: u64,
    hash: IsnGenerator,
    index: u64,
    pub(crate) sent: u32,
    pub(crate) dropped: u32,
}

const SCALE: u64 = 1 << 53;

impl Link {
    pub fn new(delay: Duration, loss: f64, seed: u64, direction: u64) -> Self {
        let loss = if loss.is_nan() { 0.0 } else { loss.max(0.0).min(1.0) };
        Link {
            queue: VecDeque::new(),
            delay,
            threshold: (loss * SCALE as f64) as u64,
            hash: IsnGenerator::new(seed, direction),
            index: 0,
            sent: 0,
            dropped: 0,
        }
    }

    /// Put a packet on the link. Returns `false` if it got lost.
    pub fn send(&mut self, now: Instant, packet: Vec<u8>) -> bool {
        let index = self.index;
        self.index += 1;
        self.sent += 1;

        if self.hash.hash(index) >> 11 < self.threshold {
            self.dropped += 1;
            return false;
        }

        self.queue.push_back((now + self.delay, packet));
        true
    }

    /// Take the next packet that arrived by `now`.
    pub fn recv(&mut self, now: Instant) -> Option<Vec<u8>> {
        match self.queue.front() {
            Some((at, _)) if *at <= now => self.queue.pop_front().map(|(_, packet)| packet),
            _ => None,
        }
    }

    pub fn next_arrival(&self) -> Expiration {
        self.queue.front().map(|(at, _)| *at).into()
    }
}
