//! Timers of a connection.
//!
//! The clock and the queue of pending deadlines belong to the host. A connection only asks a
//! [`Scheduler`] to call it back at some instant and remembers the returned handle per
//! [`TimerKind`]. Each kind has at most one pending instance: arming a kind first cancels what
//! was pending for it, in the same step. A fire is delivered back with its handle, and a handle
//! that the connection no longer holds is stale and ignored, so a late delivery of a cancelled
//! timer can never act on newer state.
//!
//! [`Scheduler`]: trait.Scheduler.html
//! [`TimerKind`]: enum.TimerKind.html
use alloc::collections::BTreeMap;

use crate::time::{Expiration, Instant};

/// The independent timers of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// Retransmission of unacknowledged data, SYN or FIN.
    Retransmit,
    /// Acknowledgement of in-order data that was held back.
    DelayedAck,
    /// Window probes while the peer advertises a zero window.
    Persist,
    /// The quiet time after the connection closed, `2*MSL`.
    TimeWait,
    /// Bound on the wait for the final acknowledgement in `LAST_ACK`.
    LastAck,
}

impl TimerKind {
    /// All kinds, in slot order.
    pub const ALL: [TimerKind; 5] = [
        TimerKind::Retransmit,
        TimerKind::DelayedAck,
        TimerKind::Persist,
        TimerKind::TimeWait,
        TimerKind::LastAck,
    ];

    fn slot(self) -> usize {
        match self {
            TimerKind::Retransmit => 0,
            TimerKind::DelayedAck => 1,
            TimerKind::Persist => 2,
            TimerKind::TimeWait => 3,
            TimerKind::LastAck => 4,
        }
    }
}

/// Identifies one scheduled callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(pub u64);

/// The host side of timers.
pub trait Scheduler {
    /// Deliver a fire for `kind` at `deadline`.
    fn schedule_at(&mut self, deadline: Instant, kind: TimerKind) -> TimerHandle;

    /// Withdraw a previously scheduled callback. Unknown handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Armed {
    handle: TimerHandle,
    deadline: Instant,
}

/// The armed timers of one connection.
#[derive(Clone, Debug, Default)]
pub struct Timers {
    slots: [Option<Armed>; 5],
}

impl Timers {
    /// Arm `kind` at `deadline`, replacing any pending instance.
    pub fn arm(&mut self, kind: TimerKind, deadline: Instant, scheduler: &mut dyn Scheduler) {
        self.cancel(kind, scheduler);
        let handle = scheduler.schedule_at(deadline, kind);
        self.slots[kind.slot()] = Some(Armed { handle, deadline });
    }

    /// Arm `kind` unless it is already pending.
    pub fn arm_if_idle(&mut self, kind: TimerKind, deadline: Instant, scheduler: &mut dyn Scheduler) {
        if !self.is_armed(kind) {
            self.arm(kind, deadline, scheduler)
        }
    }

    /// Cancel the pending instance of `kind`, if any.
    pub fn cancel(&mut self, kind: TimerKind, scheduler: &mut dyn Scheduler) {
        if let Some(armed) = self.slots[kind.slot()].take() {
            scheduler.cancel(armed.handle);
        }
    }

    /// Cancel everything.
    pub fn cancel_all(&mut self, scheduler: &mut dyn Scheduler) {
        for kind in TimerKind::ALL.iter() {
            self.cancel(*kind, scheduler);
        }
    }

    /// Return whether `kind` is pending.
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.slot()].is_some()
    }

    /// The deadline of `kind`.
    pub fn deadline(&self, kind: TimerKind) -> Expiration {
        self.slots[kind.slot()].map(|armed| armed.deadline).into()
    }

    /// Resolve a delivered fire.
    ///
    /// Returns the kind it belonged to and disarms it, or `None` for a stale handle.
    pub fn fired(&mut self, handle: TimerHandle) -> Option<TimerKind> {
        let kind = *TimerKind::ALL.iter()
            .find(|kind| self.slots[kind.slot()].map(|armed| armed.handle) == Some(handle))?;
        self.slots[kind.slot()] = None;
        Some(kind)
    }
}

/// An ordered queue of deadlines, usable as the [`Scheduler`] of a host loop.
///
/// [`Scheduler`]: trait.Scheduler.html
#[derive(Clone, Debug, Default)]
pub struct TimerQueue {
    next: u64,
    pending: BTreeMap<(Instant, u64), TimerKind>,
    index: BTreeMap<u64, Instant>,
}

impl TimerQueue {
    /// An empty queue.
    pub fn new() -> Self {
        TimerQueue::default()
    }

    /// The earliest pending deadline.
    pub fn next_deadline(&self) -> Expiration {
        self.pending.keys().next().map(|&(deadline, _)| deadline).into()
    }

    /// Remove and return the earliest fire due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerHandle, TimerKind)> {
        let (&(deadline, id), _) = self.pending.iter().next()?;
        if now < deadline {
            return None;
        }
        let kind = self.pending.remove(&(deadline, id))?;
        self.index.remove(&id);
        Some((TimerHandle(id), kind))
    }

    /// The number of pending fires.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Return whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Iterate over the pending fires in deadline order.
    pub fn iter(&self) -> impl Iterator<Item=(Instant, TimerKind)> + '_ {
        self.pending.iter().map(|(&(deadline, _), &kind)| (deadline, kind))
    }
}

impl Scheduler for TimerQueue {
    fn schedule_at(&mut self, deadline: Instant, kind: TimerKind) -> TimerHandle {
        let id = self.next;
        self.next += 1;
        self.pending.insert((deadline, id), kind);
        self.index.insert(id, deadline);
        TimerHandle(id)
    }

    fn cancel(&mut self, TimerHandle(id): TimerHandle) {
        if let Some(deadline) = self.index.remove(&id) {
            self.pending.remove(&(deadline, id));
        }
    }
}
