//! A connection together with the buffers, timers and sinks a host keeps for it.
use std::cell::Cell;
use std::rc::Rc;

use tcb::tcp::{self, Connection, EventLog, Io, Observer, Recorder, ReorderBuffer, SendQueue};
use tcb::tcp::{Signals, TimerQueue};
use tcb::time::{Expiration, Instant};
use tcb::wire::{self, Packet, Repr, SeqNumber};

pub struct Endpoint {
    pub(crate) conn: Connection,
    pub(crate) timers: TimerQueue,
    pub(crate) wire: Recorder,
    pub(crate) tx: SendQueue,
    pub(crate) rx: ReorderBuffer,
    pub(crate) app: EventLog,
}

impl Endpoint {
    pub fn new(conn: Connection) -> Self {
        let config = conn.config();
        let tx = SendQueue::new(config.send_buffer);
        let rx = ReorderBuffer::new(config.recv_buffer);
        Endpoint {
            conn,
            timers: TimerQueue::new(),
            wire: Recorder::new(),
            tx,
            rx,
            app: EventLog::new(),
        }
    }

    /// Create the endpoint for a SYN that arrived at a listening connection.
    pub fn accept(listener: &Connection, now: Instant, syn: &Repr) -> tcp::Result<Self> {
        let config = listener.config();
        let mut timers = TimerQueue::new();
        let mut wire = Recorder::new();
        let mut tx = SendQueue::new(config.send_buffer);
        let mut rx = ReorderBuffer::new(config.recv_buffer);
        let mut app = EventLog::new();

        let conn = listener.fork(&mut Io {
            now,
            timers: &mut timers,
            wire: &mut wire,
            tx: &mut tx,
            rx: &mut rx,
            app: &mut app,
        }, syn)?;

        Ok(Endpoint { conn, timers, wire, tx, rx, app })
    }

    /// Run one event of the connection.
    pub fn event<T>(&mut self, now: Instant, f: impl FnOnce(&mut Connection, &mut Io<'_>) -> T)
        -> T
    {
        let Endpoint { conn, timers, wire, tx, rx, app } = self;
        let mut io = Io { now, timers, wire, tx, rx, app };
        f(conn, &mut io)
    }

    pub fn arrives(&mut self, now: Instant, repr: &Repr, payload: &[u8]) -> Signals {
        self.event(now, |conn, io| conn.arrives(io, repr, payload))
    }

    /// Fire all timers that are due.
    pub fn expire(&mut self, now: Instant) -> Signals {
        let mut signals = Signals::default();
        while let Some((handle, _)) = self.timers.pop_due(now) {
            let fired = self.event(now, |conn, io| conn.timer_fired(io, handle));
            signals.accept |= fired.accept;
            signals.delete |= fired.delete;
        }
        signals
    }

    pub fn next_deadline(&self) -> Expiration {
        self.timers.next_deadline()
    }

    /// Take the segments sent so far, in their wire encoding.
    pub fn outgoing(&mut self) -> Vec<Vec<u8>> {
        self.wire.take()
            .into_iter()
            .map(|(repr, payload)| encode(&repr, &payload))
            .collect()
    }
}

pub fn encode(repr: &Repr, payload: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0; repr.buffer_len()];
    let mut packet = Packet::new_unchecked(&mut buffer[..]);
    repr.emit(&mut packet);
    packet.payload_mut()[..payload.len()].copy_from_slice(payload);
    buffer
}

pub fn decode(bytes: &[u8]) -> wire::Result<(Repr, &[u8])> {
    let packet = Packet::new_checked(bytes)?;
    let repr = Repr::parse(&packet)?;
    let header = usize::from(packet.header_len());
    Ok((repr, &bytes[header..]))
}

/// Counts segments that carry sequence space that was sent before.
pub struct Retransmissions {
    highest: Option<SeqNumber>,
    count: Rc<Cell<u32>>,
}

impl Retransmissions {
    pub fn new(count: Rc<Cell<u32>>) -> Self {
        Retransmissions { highest: None, count }
    }
}

impl Observer for Retransmissions {
    fn segment_sent(&mut self, repr: &Repr) {
        let len = repr.sequence_len();
        if len == 0 || repr.flags.rst() {
            return;
        }

        let end = repr.seq_number + len;
        match self.highest {
            Some(highest) if repr.seq_number < highest => {
                self.count.set(self.count.get() + 1);
                self.highest = Some(highest.max(end));
            },
            _ => self.highest = Some(end),
        }
    }
}
