//! Round trip time estimation per RFC 6298.
//!
//! Two parts: the [`RttHistory`] remembers when each new range of sequence space was first sent
//! and the [`RttEstimator`] folds measured samples into the smoothed round trip time and its
//! variation, from which the retransmission timeout is derived.
//!
//! Ranges that were sent more than once are flagged and never produce a sample. The
//! acknowledgement of such a range could answer any of the copies (Karn's algorithm).
//!
//! [`RttHistory`]: struct.RttHistory.html
//! [`RttEstimator`]: struct.RttEstimator.html
use alloc::collections::VecDeque;

use crate::time::{Duration, Instant};
use crate::wire::SeqNumber;

/// One transmission of a new range of sequence space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RttSample {
    /// First sequence number of the range.
    pub start: SeqNumber,
    /// Length of the range in sequence space.
    pub len: usize,
    /// When the range was first sent.
    pub sent: Instant,
    /// If any part of the range has been sent again.
    pub retransmitted: bool,
}

impl RttSample {
    fn end(&self) -> SeqNumber {
        self.start + self.len
    }

    fn overlaps(&self, start: SeqNumber, end: SeqNumber) -> bool {
        start < self.end() && self.start < end
    }
}

/// Send times of outstanding ranges, oldest first.
#[derive(Clone, Debug, Default)]
pub struct RttHistory {
    samples: VecDeque<RttSample>,
}

impl RttHistory {
    /// Record the transmission of `[seq, seq + len)`.
    ///
    /// `highest_sent` is the highest sequence number sent before this transmission. Any part
    /// below it is a retransmission and taints the ranges it overlaps; any part above it is new
    /// and gets its own entry, itself tainted when the segment also carried old data.
    pub fn sent(&mut self, seq: SeqNumber, len: usize, now: Instant, highest_sent: SeqNumber) {
        if len == 0 {
            return;
        }

        let end = seq + len;
        let mut retransmitted = false;
        if seq < highest_sent {
            retransmitted = true;
            let old_end = end.min(highest_sent);
            self.samples.iter_mut()
                .filter(|sample| sample.overlaps(seq, old_end))
                .for_each(|sample| sample.retransmitted = true);
        }

        if highest_sent < end {
            let start = seq.max(highest_sent);
            self.samples.push_back(RttSample {
                start,
                len: end - start,
                sent: now,
                retransmitted,
            });
        }
    }

    /// Taint every outstanding range, as after a retransmission timeout.
    pub fn mark_all_retransmitted(&mut self) {
        self.samples.iter_mut().for_each(|sample| sample.retransmitted = true);
    }

    /// Consume the ranges fully covered by `ack`.
    ///
    /// Returns the time since the last of them was sent, unless that range was retransmitted.
    pub fn acknowledged(&mut self, ack: SeqNumber, now: Instant) -> Option<Duration> {
        let mut last = None;
        while let Some(front) = self.samples.front() {
            if ack < front.end() {
                break;
            }
            last = self.samples.pop_front();
        }

        match last {
            Some(sample) if !sample.retransmitted => Some(now.duration_since(sample.sent)),
            _ => None,
        }
    }

    /// Forget all ranges.
    pub fn clear(&mut self) {
        self.samples.clear()
    }

    /// The number of outstanding ranges.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Return whether no range is outstanding.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Iterate over the outstanding ranges.
    pub fn iter(&self) -> impl Iterator<Item=&RttSample> + '_ {
        self.samples.iter()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Estimate {
    NoSample,
    Measured {
        /// The smoothed round-trip time.
        srtt: Duration,
        /// The round-trip time variation.
        rtt_var: Duration,
    },
}

/// Smoothed round trip time and the retransmission timeout derived from it.
#[derive(Clone, Copy, Debug)]
pub struct RttEstimator {
    estimate: Estimate,
    rto: Duration,
    initial_rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    granularity: Duration,
}

impl RttEstimator {
    const K: u32 = 4;

    /// An estimator without samples.
    ///
    /// Every computed timeout is clamped to `[min_rto, max_rto]`, and `granularity` is the clock
    /// granularity `G` in `RTO = SRTT + max(G, K*RTTVAR)`.
    pub fn new(initial_rto: Duration, min_rto: Duration, max_rto: Duration, granularity: Duration)
        -> Self
    {
        let max_rto = max_rto.max(min_rto);
        RttEstimator {
            estimate: Estimate::NoSample,
            rto: initial_rto.max(min_rto).min(max_rto),
            initial_rto,
            min_rto,
            max_rto,
            granularity,
        }
    }

    /// Update the estimate with a new sample, returning the new timeout.
    pub fn sample(&mut self, rtt: Duration) -> Duration {
        match &mut self.estimate {
            Estimate::NoSample => {
                //   SRTT <- R
                //   RTTVAR <- R/2
                self.estimate = Estimate::Measured { srtt: rtt, rtt_var: rtt / 2 };
            }
            Estimate::Measured { srtt, rtt_var } => {
                //   RTTVAR <- (1 - beta) * RTTVAR + beta * |SRTT - R'|
                //   SRTT <- (1 - alpha) * SRTT + alpha * R'
                // with alpha=1/8 and beta=1/4, in this order.
                let diff = srtt.checked_sub(rtt).unwrap_or_else(|| rtt - *srtt);
                *rtt_var = (*rtt_var * 3 + diff) / 4;
                *srtt = (*srtt * 7 + rtt) / 8;
            }
        }
        self.rto = self.computed();
        self.rto
    }

    /// Double the current timeout, saturating at the maximum.
    pub fn backoff(&mut self) -> Duration {
        self.rto = self.rto.saturating_mul(2).min(self.max_rto);
        self.rto
    }

    /// Drop any backoff and return to the computed timeout.
    pub fn reset_backoff(&mut self) -> Duration {
        self.rto = self.computed();
        self.rto
    }

    /// The current retransmission timeout, including backoff.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// The smoothed round trip time, if any sample was taken.
    pub fn srtt(&self) -> Option<Duration> {
        match self.estimate {
            Estimate::NoSample => None,
            Estimate::Measured { srtt, .. } => Some(srtt),
        }
    }

    /// The round trip time variation, if any sample was taken.
    pub fn rtt_var(&self) -> Option<Duration> {
        match self.estimate {
            Estimate::NoSample => None,
            Estimate::Measured { rtt_var, .. } => Some(rtt_var),
        }
    }

    fn computed(&self) -> Duration {
        let raw = match self.estimate {
            Estimate::NoSample => self.initial_rto,
            Estimate::Measured { srtt, rtt_var } => {
                srtt + self.granularity.max(rtt_var * Self::K)
            }
        };
        raw.max(self.min_rto).min(self.max_rto)
    }
}
