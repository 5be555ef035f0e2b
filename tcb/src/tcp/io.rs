//! The collaborators of a connection and provided implementations for them.
//!
//! A connection does not own its byte buffers, the path to the network or the upward interface.
//! All of them are handed in together with the current time as an [`Io`] bundle for the duration
//! of a single event.
//!
//! This is not quite a compatibility layer with socket APIs but parts of it may be reasonably
//! close to enabling it.
//!
//! [`Io`]: struct.Io.html
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::convert::TryFrom;

use crate::storage::Assembler;
use crate::time::Instant;
use crate::wire::{Repr, SeqNumber};

use super::Error;
use super::timer::Scheduler;

/// Everything a connection talks to while processing one event.
pub struct Io<'a> {
    /// The current time of the host clock.
    pub now: Instant,
    /// Where timers are scheduled.
    pub timers: &'a mut dyn Scheduler,
    /// Where outgoing segments go.
    pub wire: &'a mut dyn SegmentSink,
    /// Data submitted by the application.
    pub tx: &'a mut dyn TxBuffer,
    /// Data received for the application.
    pub rx: &'a mut dyn RxBuffer,
    /// The application.
    pub app: &'a mut dyn Notify,
}

/// The buffer of outgoing bytes.
///
/// Sequence numbers address bytes in the buffer. The buffer holds everything from the oldest
/// unacknowledged byte, its head, to the last byte submitted.
pub trait TxBuffer {
    /// Sequence number of the first byte held.
    fn head(&self) -> SeqNumber;

    /// Assign the sequence number of the first byte, once the initial sequence number is known.
    fn set_head(&mut self, seq: SeqNumber);

    /// The number of bytes held, sent or not.
    fn len(&self) -> usize;

    /// Bytes held at or after `seq`.
    fn available_from(&self, seq: SeqNumber) -> usize;

    /// Copy bytes starting at `seq`, returning how many were copied.
    fn read(&self, seq: SeqNumber, buf: &mut [u8]) -> usize;

    /// Discard everything before `seq`, it was acknowledged.
    fn advance(&mut self, seq: SeqNumber);
}

/// The outcome of putting a segment into an `RxBuffer`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Insert {
    /// Bytes that became readable in order.
    pub ready: usize,
    /// All of the data had been received before.
    pub duplicate: bool,
    /// Data is held beyond a missing range.
    pub gap: bool,
}

/// The buffer of incoming bytes.
pub trait RxBuffer {
    /// Assign the sequence number of the next expected byte.
    fn set_next(&mut self, seq: SeqNumber);

    /// The next expected sequence number (`RCV.NXT` without FIN).
    fn next(&self) -> SeqNumber;

    /// Store segment data starting at `seq`.
    fn insert(&mut self, seq: SeqNumber, data: &[u8]) -> Insert;

    /// Space left for new data.
    fn free_space(&self) -> usize;

    /// The total capacity.
    fn capacity(&self) -> usize;
}

/// Hand-off of outgoing segments to the network layer.
pub trait SegmentSink {
    /// Transmit a segment. Returns `false` if it was rejected.
    fn send(&mut self, repr: &Repr, payload: &[u8]) -> bool;
}

/// Notifications towards the application.
pub trait Notify {
    /// The handshake completed.
    fn connected(&mut self) { }

    /// `n` bytes became readable.
    fn data_available(&mut self, n: usize) { let _ = n; }

    /// `n` new bytes were sent for the first time.
    fn data_sent(&mut self, n: usize) { let _ = n; }

    /// The peer will not send any more data.
    fn peer_closed(&mut self) { }

    /// The connection failed.
    fn error(&mut self, kind: Error) { let _ = kind; }

    /// The connection closed normally.
    fn closed(&mut self) { }
}

impl Notify for () { }

/// A notification, as recorded by `EventLog`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// See `Notify::connected`.
    Connected,
    /// See `Notify::data_available`.
    DataAvailable(usize),
    /// See `Notify::data_sent`.
    DataSent(usize),
    /// See `Notify::peer_closed`.
    PeerClosed,
    /// See `Notify::error`.
    Error(Error),
    /// See `Notify::closed`.
    Closed,
}

/// Records all notifications in order.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    /// The notifications so far.
    pub events: Vec<Event>,
}

impl EventLog {
    /// An empty log.
    pub fn new() -> Self {
        EventLog::default()
    }

    /// Count the recorded events matching a predicate.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|event| pred(event)).count()
    }
}

impl Notify for EventLog {
    fn connected(&mut self) {
        self.events.push(Event::Connected)
    }

    fn data_available(&mut self, n: usize) {
        self.events.push(Event::DataAvailable(n))
    }

    fn data_sent(&mut self, n: usize) {
        self.events.push(Event::DataSent(n))
    }

    fn peer_closed(&mut self) {
        self.events.push(Event::PeerClosed)
    }

    fn error(&mut self, kind: Error) {
        self.events.push(Event::Error(kind))
    }

    fn closed(&mut self) {
        self.events.push(Event::Closed)
    }
}

/// A bounded sender buffer.
#[derive(Clone, Debug)]
pub struct SendQueue {
    /// Bytes from the oldest unacknowledged one onwards.
    data: VecDeque<u8>,
    /// Sequence number of the front byte.
    head: SeqNumber,
    capacity: usize,
}

impl SendQueue {
    /// A buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        SendQueue {
            data: VecDeque::new(),
            head: SeqNumber::default(),
            capacity,
        }
    }

    /// Append application data, returning how much fit.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(self.free_space());
        self.data.extend(&bytes[..count]);
        count
    }

    /// Space left for new data.
    pub fn free_space(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Return whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sequence number after the last byte held.
    pub fn tail(&self) -> SeqNumber {
        self.head + self.data.len()
    }
}

impl TxBuffer for SendQueue {
    fn head(&self) -> SeqNumber {
        self.head
    }

    fn set_head(&mut self, seq: SeqNumber) {
        self.head = seq;
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn available_from(&self, seq: SeqNumber) -> usize {
        match seq.checked_sub(self.head) {
            Some(offset) => self.data.len().saturating_sub(offset),
            None => self.data.len(),
        }
    }

    fn read(&self, seq: SeqNumber, buf: &mut [u8]) -> usize {
        let offset = match seq.checked_sub(self.head) {
            Some(offset) if offset < self.data.len() => offset,
            _ => return 0,
        };
        let count = buf.len().min(self.data.len() - offset);
        self.data.range(offset..offset + count)
            .zip(buf.iter_mut())
            .for_each(|(byte, out)| *out = *byte);
        count
    }

    fn advance(&mut self, seq: SeqNumber) {
        let count = seq.saturating_sub(self.head).min(self.data.len());
        self.data.drain(..count);
        self.head += count;
    }
}

/// A bounded receive buffer with out-of-order reassembly.
#[derive(Clone, Debug)]
pub struct ReorderBuffer {
    /// In-order bytes not yet read by the application.
    ready: VecDeque<u8>,
    /// Out-of-order bytes, indexed relative to `next`.
    staged: Vec<u8>,
    asm: Assembler,
    next: SeqNumber,
    capacity: usize,
}

impl ReorderBuffer {
    /// Most separate out-of-order ranges that are held.
    pub const MAX_HOLES: usize = 8;

    /// A buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        ReorderBuffer {
            ready: VecDeque::new(),
            staged: alloc::vec![0; capacity],
            asm: Assembler::new(Self::MAX_HOLES),
            next: SeqNumber::default(),
            capacity,
        }
    }

    /// Read in-order data.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let count = buf.len().min(self.ready.len());
        self.ready.drain(..count)
            .zip(buf.iter_mut())
            .for_each(|(byte, out)| *out = byte);
        count
    }

    /// Readable bytes.
    pub fn readable(&self) -> usize {
        self.ready.len()
    }

    /// Return whether data beyond a missing range is held.
    pub fn has_gap(&self) -> bool {
        !self.asm.is_empty()
    }
}

impl RxBuffer for ReorderBuffer {
    fn set_next(&mut self, seq: SeqNumber) {
        self.next = seq;
    }

    fn next(&self) -> SeqNumber {
        self.next
    }

    fn insert(&mut self, seq: SeqNumber, mut data: &[u8]) -> Insert {
        let mut result = Insert::default();
        let start = match seq.checked_sub(self.next) {
            Some(start) => start,
            None => {
                let pre = self.next - seq;
                if pre >= data.len() {
                    result.duplicate = true;
                    result.gap = self.has_gap();
                    return result;
                }
                data = &data[pre..];
                0
            },
        };

        let limit = self.free_space();
        if start >= limit {
            result.gap = true;
            return result;
        }
        let len = data.len().min(limit - start);
        let (start32, len32) = match (u32::try_from(start), u32::try_from(len)) {
            (Ok(start), Ok(len)) => (start, len),
            _ => return result,
        };

        result.duplicate = self.asm.contains(start32, len32);
        self.staged[start..start + len].copy_from_slice(&data[..len]);
        let ready = match self.asm.add(start32, len32) {
            Ok(ready) => ready as usize,
            Err(_) => {
                net_trace!("reassembly full, dropping {} bytes at {}", len, seq);
                result.gap = true;
                return result;
            },
        };

        if ready > 0 {
            self.ready.extend(&self.staged[..ready]);
            self.staged.drain(..ready);
            self.staged.resize(self.capacity, 0);
            self.next += ready;
        }

        result.ready = ready;
        result.gap = self.has_gap();
        result
    }

    fn free_space(&self) -> usize {
        self.capacity - self.ready.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A segment sink that keeps everything it is handed.
#[derive(Clone, Debug)]
pub struct Recorder {
    /// The segments, oldest first.
    pub segments: Vec<(Repr, Vec<u8>)>,
    /// Whether further segments are accepted.
    pub accept: bool,
}

impl Recorder {
    /// An empty recorder that accepts all segments.
    pub fn new() -> Self {
        Recorder {
            segments: Vec::new(),
            accept: true,
        }
    }

    /// Remove and return all recorded segments.
    pub fn take(&mut self) -> Vec<(Repr, Vec<u8>)> {
        core::mem::replace(&mut self.segments, Vec::new())
    }

    /// The most recent segment header.
    pub fn last(&self) -> Option<&Repr> {
        self.segments.last().map(|(repr, _)| repr)
    }

    /// The number of recorded segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Return whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Recorder::new()
    }
}

impl SegmentSink for Recorder {
    fn send(&mut self, repr: &Repr, payload: &[u8]) -> bool {
        if self.accept {
            self.segments.push((*repr, payload.to_vec()));
        }
        self.accept
    }
}
