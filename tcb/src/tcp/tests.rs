//! Scenarios of whole connections against a scripted peer.
use std::cell::Cell;
use std::rc::Rc;
use std::vec::Vec;

use crate::time::{Duration, Expiration, Instant};
use crate::wire::{Flags, Repr, SeqNumber};

use super::*;

const LOCAL: u16 = 80;
const REMOTE: u16 = 4000;
/// The peer's initial sequence number.
const PEER_ISN: u32 = 1000;

struct Env {
    now: Instant,
    timers: TimerQueue,
    wire: Recorder,
    tx: SendQueue,
    rx: ReorderBuffer,
    app: EventLog,
}

struct Host {
    conn: Connection,
    env: Env,
}

/// Counts round trip time samples.
struct Samples(Rc<Cell<usize>>);

impl Observer for Samples {
    fn rtt_sampled(&mut self, _: Duration) {
        self.0.set(self.0.get() + 1);
    }
}

fn config() -> Config {
    Config {
        segment_size: 100,
        window_scaling: false,
        timestamps: false,
        limited_transmit: false,
        null_isn: true,
        ..Config::default()
    }
}

fn segment(flags: Flags, seq: u32, ack: Option<u32>, window: u16) -> Repr {
    let mut repr = Repr::new(flags, SeqNumber::from_wire(seq));
    repr.src_port = REMOTE;
    repr.dst_port = LOCAL;
    repr.ack_number = ack.map(SeqNumber::from_wire);
    repr.window_len = window;
    repr
}

impl Env {
    fn new() -> Self {
        Env {
            now: Instant::ZERO,
            timers: TimerQueue::new(),
            wire: Recorder::new(),
            tx: SendQueue::new(1 << 16),
            rx: ReorderBuffer::new(4096),
            app: EventLog::new(),
        }
    }

    fn io(&mut self) -> Io<'_> {
        Io {
            now: self.now,
            timers: &mut self.timers,
            wire: &mut self.wire,
            tx: &mut self.tx,
            rx: &mut self.rx,
            app: &mut self.app,
        }
    }
}

impl Host {
    fn new(config: Config) -> Self {
        let keys = Rc::new(IsnGenerator::new(1, 2));
        let ports = Ports { local: LOCAL, remote: REMOTE };
        let conn = Connection::new(config, ports, keys).unwrap();
        Host { conn, env: Env::new() }
    }

    /// A connection that completed an active open against a peer window of `window`.
    fn established(config: Config, window: u16) -> Self {
        let mut host = Host::new(config);
        host.open(Open::Active).unwrap();
        host.arrive(segment(Flags::SYN_ACK, PEER_ISN, Some(1), window), &[]);
        assert_eq!(host.conn.state(), State::Established);
        host.env.wire.take();
        host
    }

    fn open(&mut self, mode: Open) -> Result<Signals> {
        let mut io = self.env.io();
        self.conn.open(&mut io, mode)
    }

    fn arrive(&mut self, mut repr: Repr, payload: &[u8]) -> Signals {
        repr.payload_len = payload.len() as u16;
        let mut io = self.env.io();
        let signals = self.conn.arrives(&mut io, &repr, payload);
        self.check();
        signals
    }

    /// A pure acknowledgment from the peer.
    fn ack(&mut self, ack: u32, window: u16) -> Signals {
        self.arrive(segment(Flags::ACK, PEER_ISN + 1, Some(ack), window), &[])
    }

    fn write(&mut self, data: &[u8]) {
        assert_eq!(self.env.tx.write(data), data.len());
        let mut io = self.env.io();
        self.conn.submit(&mut io).unwrap();
        self.check();
    }

    fn close(&mut self) -> Signals {
        let mut io = self.env.io();
        let signals = self.conn.close(&mut io).unwrap();
        self.check();
        signals
    }

    /// Advance the clock to the next deadline and fire it.
    fn fire(&mut self) -> Option<(TimerKind, Signals)> {
        match self.env.timers.next_deadline() {
            Expiration::When(deadline) => self.env.now = deadline,
            Expiration::Never => return None,
        }
        let (handle, kind) = self.env.timers.pop_due(self.env.now)?;
        let mut io = self.env.io();
        let signals = self.conn.timer_fired(&mut io, handle);
        self.check();
        Some((kind, signals))
    }

    fn sent(&mut self) -> Vec<(Repr, Vec<u8>)> {
        self.env.wire.take()
    }

    fn deadline(&self, kind: TimerKind) -> Expiration {
        self.conn.timers().deadline(kind)
    }

    /// Invariants that hold after every event.
    fn check(&self) {
        let window = self.conn.window();
        assert!(window.first_unacked <= window.next_to_send);
        assert!(window.next_to_send <= window.highest_sent);
        if matches!(self.conn.state(), State::Closed | State::Listen | State::TimeWait) {
            return;
        }
        assert_eq!(
            self.conn.timers().is_armed(TimerKind::Retransmit),
            window.outstanding(),
            "retransmission timer out of sync in {}", self.conn.state());
    }
}

#[test]
fn active_open() {
    let mut host = Host::new(config());
    host.open(Open::Active).unwrap();
    assert_eq!(host.conn.state(), State::SynSent);

    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    let syn = sent[0].0;
    assert!(syn.flags.syn());
    assert_eq!(syn.seq_number, SeqNumber(0));
    assert_eq!(syn.ack_number, None);
    assert_eq!(syn.max_seg_size, Some(100));
    assert_eq!(host.deadline(TimerKind::Retransmit), Expiration::When(Instant::from_secs(3)));

    host.env.now = Instant::from_millis(40);
    host.arrive(segment(Flags::SYN_ACK, PEER_ISN, Some(1), 5000), &[]);
    assert_eq!(host.conn.state(), State::Established);
    assert_eq!(host.env.app.events, [Event::Connected]);
    assert!(!host.conn.timers().is_armed(TimerKind::Retransmit));
    assert_eq!(host.conn.window().peer_window(), 5000);
    assert_eq!(host.conn.rtt().srtt(), Some(Duration::from_millis(40)));

    let ack = host.env.wire.last().unwrap();
    assert!(!ack.flags.syn());
    assert_eq!(ack.seq_number, SeqNumber(1));
    assert_eq!(ack.ack_number, Some(SeqNumber::from_wire(PEER_ISN + 1)));
}

#[test]
fn passive_open_forks() {
    let mut listener = Host::new(config());
    listener.open(Open::Passive).unwrap();
    assert_eq!(listener.conn.state(), State::Listen);

    let mut syn = segment(Flags::SYN, PEER_ISN, None, 8000);
    syn.max_seg_size = Some(80);
    let signals = listener.arrive(syn, &[]);
    assert!(signals.accept);
    assert!(listener.sent().is_empty());

    let mut env = Env::new();
    let child = {
        let mut io = env.io();
        listener.conn.fork(&mut io, &syn).unwrap()
    };
    let mut child = Host { conn: child, env };
    assert_eq!(listener.conn.state(), State::Listen);
    assert_eq!(child.conn.state(), State::SynReceived);
    assert_eq!(child.conn.segment_size(), 80);

    let sent = child.sent();
    assert_eq!(sent.len(), 1);
    let syn_ack = sent[0].0;
    assert_eq!(syn_ack.flags, Flags::SYN_ACK);
    assert_eq!(syn_ack.ack_number, Some(SeqNumber::from_wire(PEER_ISN + 1)));

    child.ack(1, 8000);
    assert_eq!(child.conn.state(), State::Established);
    assert_eq!(child.env.app.events, [Event::Connected]);
    assert!(child.sent().is_empty());
}

#[test]
fn simultaneous_open() {
    let mut host = Host::new(config());
    host.open(Open::Active).unwrap();
    host.sent();

    // The peer's SYN crosses ours.
    host.arrive(segment(Flags::SYN, PEER_ISN, None, 8000), &[]);
    assert_eq!(host.conn.state(), State::SynReceived);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.flags, Flags::SYN_ACK);
    assert_eq!(sent[0].0.seq_number, SeqNumber(0));
    assert_eq!(sent[0].0.ack_number, Some(SeqNumber::from_wire(PEER_ISN + 1)));

    // Its answer to our SYN completes the handshake.
    host.arrive(segment(Flags::SYN_ACK, PEER_ISN, Some(1), 6000), &[]);
    assert_eq!(host.conn.state(), State::Established);
    assert_eq!(host.env.app.events, [Event::Connected]);
    assert_eq!(host.conn.window().peer_window(), 6000);
    assert!(!host.conn.timers().is_armed(TimerKind::Retransmit));
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    let ack = sent[0].0;
    assert_eq!(ack.flags, Flags::ACK);
    assert_eq!(ack.seq_number, SeqNumber(1));
    assert_eq!(ack.ack_number, Some(SeqNumber::from_wire(PEER_ISN + 1)));

    // The peer's acknowledgment of our SYN+ACK changes nothing.
    host.ack(1, 6000);
    assert_eq!(host.conn.state(), State::Established);
    assert!(host.sent().is_empty());

    host.write(b"hi");
    assert_eq!(host.sent()[0].1, b"hi");
}

#[test]
fn syn_ack_with_wrong_ack_in_syn_received() {
    let mut host = Host::new(config());
    host.open(Open::Active).unwrap();
    host.arrive(segment(Flags::SYN, PEER_ISN, None, 8000), &[]);
    host.sent();

    host.arrive(segment(Flags::SYN_ACK, PEER_ISN, Some(77), 8000), &[]);
    assert_eq!(host.conn.state(), State::SynReceived);
    let reset = *host.env.wire.last().unwrap();
    assert_eq!(reset.flags, Flags::RST);
    assert_eq!(reset.seq_number, SeqNumber(77));
}

#[test]
fn fork_requires_listen() {
    let mut host = Host::established(config(), 8000);
    let syn = segment(Flags::SYN, PEER_ISN, None, 8000);
    let mut io = host.env.io();
    assert_eq!(host.conn.fork(&mut io, &syn).err(), Some(Error::Illegal));
}

#[test]
fn delayed_ack_every_second_segment() {
    let mut host = Host::established(config(), 8000);
    let data = [0xab; 50];

    host.arrive(segment(Flags::ACK, PEER_ISN + 1, Some(1), 8000), &data);
    assert!(host.sent().is_empty());
    assert!(host.conn.timers().is_armed(TimerKind::DelayedAck));

    host.arrive(segment(Flags::ACK, PEER_ISN + 51, Some(1), 8000), &data);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.ack_number, Some(SeqNumber::from_wire(PEER_ISN + 101)));
    assert!(!host.conn.timers().is_armed(TimerKind::DelayedAck));

    assert_eq!(host.env.app.count(|e| matches!(e, Event::DataAvailable(50))), 2);
    let mut buf = [0; 200];
    assert_eq!(host.env.rx.read(&mut buf), 100);
}

#[test]
fn delayed_ack_timer() {
    let mut host = Host::established(config(), 8000);
    host.arrive(segment(Flags::ACK, PEER_ISN + 1, Some(1), 8000), b"ping");
    assert!(host.sent().is_empty());

    let (kind, _) = host.fire().unwrap();
    assert_eq!(kind, TimerKind::DelayedAck);
    assert_eq!(host.env.now, Instant::from_millis(200));
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.ack_number, Some(SeqNumber::from_wire(PEER_ISN + 5)));
}

#[test]
fn out_of_order_acked_immediately() {
    let mut host = Host::established(config(), 8000);
    host.arrive(segment(Flags::ACK, PEER_ISN + 11, Some(1), 8000), &[1; 10]);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.ack_number, Some(SeqNumber::from_wire(PEER_ISN + 1)));
    assert_eq!(host.env.app.count(|e| matches!(e, Event::DataAvailable(_))), 0);

    // The gap is filled, both parts become readable at once.
    host.arrive(segment(Flags::ACK, PEER_ISN + 1, Some(1), 8000), &[0; 10]);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.ack_number, Some(SeqNumber::from_wire(PEER_ISN + 21)));
    assert_eq!(host.env.app.events.last(), Some(&Event::DataAvailable(20)));
}

#[test]
fn sends_within_congestion_window() {
    let mut host = Host::established(config(), 8000);
    assert_eq!(host.conn.congestion_window(), 100);

    host.write(&[7; 250]);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.len(), 100);
    assert_eq!(host.env.app.events.last(), Some(&Event::DataSent(100)));

    // Slow start doubles the window.
    host.ack(101, 8000);
    assert_eq!(host.conn.congestion_window(), 200);
    let sent = host.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0.seq_number, SeqNumber(101));
    assert_eq!(sent[1].1.len(), 50);
    assert!(sent[1].0.flags.psh());
    assert_eq!(host.env.tx.len(), 150);
}

#[test]
fn nagle_holds_small_segments() {
    let config = Config { no_delay: false, initial_cwnd: 4, ..config() };
    let mut host = Host::established(config, 8000);
    host.write(&[1; 10]);
    assert_eq!(host.sent().len(), 1);

    host.write(&[2; 10]);
    assert!(host.sent().is_empty());

    host.ack(11, 8000);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, [2; 10]);
}

#[test]
fn fast_retransmit_on_third_duplicate() {
    let config = Config { initial_cwnd: 10, ..config() };
    let mut host = Host::established(config, 0xffff);
    host.write(&[3; 500]);
    assert_eq!(host.sent().len(), 5);
    let rto = host.deadline(TimerKind::Retransmit);

    host.env.now = Instant::from_millis(100);
    host.ack(1, 0xffff);
    assert_eq!(host.conn.ack_state(), AckState::Disorder);
    host.ack(1, 0xffff);
    assert!(host.sent().is_empty());
    assert_eq!(host.conn.dup_acks(), 2);

    host.ack(1, 0xffff);
    assert_eq!(host.conn.ack_state(), AckState::Recovery);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, SeqNumber(1));
    assert_eq!(sent[0].1.len(), 100);
    // ssthresh = flight / 2, inflated by the three duplicates.
    assert_eq!(host.conn.slow_start_threshold(), 250);
    assert_eq!(host.conn.congestion_window(), 550);
    assert_eq!(host.deadline(TimerKind::Retransmit), rto);

    host.env.now = Instant::from_millis(200);
    host.ack(501, 0xffff);
    assert_eq!(host.conn.ack_state(), AckState::Open);
    assert_eq!(host.conn.bytes_in_flight(), 0);
    assert!(!host.conn.timers().is_armed(TimerKind::Retransmit));
}

#[test]
fn window_update_is_not_duplicate() {
    let config = Config { initial_cwnd: 10, ..config() };
    let mut host = Host::established(config, 1000);
    host.write(&[3; 300]);
    host.sent();

    for window in &[1100, 1200, 1300] {
        host.ack(1, *window);
    }
    assert_eq!(host.conn.dup_acks(), 0);
    assert_eq!(host.conn.ack_state(), AckState::Open);
}

#[test]
fn refused_segment_reduces_window() {
    let config = Config { initial_cwnd: 4, ..config() };
    let mut host = Host::established(config, 0xffff);
    host.write(&[1; 200]);
    assert_eq!(host.sent().len(), 2);

    host.env.wire.accept = false;
    host.write(&[2; 200]);
    host.env.wire.accept = true;
    assert_eq!(host.conn.ack_state(), AckState::Cwr);
    assert_eq!(host.conn.slow_start_threshold(), 200);
    assert_eq!(host.conn.congestion_window(), 200);
    assert_eq!(host.conn.window().highest_sent, SeqNumber(301));

    // No growth before everything sent at the reduction is acknowledged.
    host.ack(101, 0xffff);
    assert_eq!(host.conn.ack_state(), AckState::Cwr);
    assert_eq!(host.conn.congestion_window(), 200);
    assert!(host.sent().is_empty());

    host.ack(301, 0xffff);
    assert_eq!(host.conn.ack_state(), AckState::Open);
    assert_eq!(host.conn.congestion_window(), 200);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, SeqNumber(301));
}

#[test]
fn limited_transmit_sends_new_data() {
    let config = Config { initial_cwnd: 2, limited_transmit: true, ..config() };
    let mut host = Host::established(config, 0xffff);
    host.write(&[4; 400]);
    assert_eq!(host.sent().len(), 2);

    host.ack(1, 0xffff);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, SeqNumber(201));
}

#[test]
fn retransmission_timeout_backs_off() {
    let mut host = Host::established(config(), 8000);
    host.write(&[5; 100]);
    host.sent();

    let (kind, _) = host.fire().unwrap();
    assert_eq!(kind, TimerKind::Retransmit);
    assert_eq!(host.env.now, Instant::from_secs(1));
    assert_eq!(host.conn.ack_state(), AckState::Loss);
    assert_eq!(host.conn.rtt().rto(), Duration::from_secs(2));
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, SeqNumber(1));
    assert_eq!(host.deadline(TimerKind::Retransmit), Expiration::When(Instant::from_secs(3)));

    host.ack(101, 8000);
    assert_eq!(host.conn.ack_state(), AckState::Open);
    assert_eq!(host.conn.rtt().rto(), Duration::from_secs(1));
}

#[test]
fn data_retries_exhausted() {
    let config = Config { data_retries: 2, ..config() };
    let mut host = Host::established(config, 8000);
    host.write(&[5; 100]);

    host.fire().unwrap();
    host.fire().unwrap();
    assert_eq!(host.conn.state(), State::Established);
    let (_, signals) = host.fire().unwrap();
    assert!(signals.delete);
    assert_eq!(host.conn.state(), State::Closed);
    assert_eq!(host.env.app.events.last(), Some(&Event::Error(Error::ConnectionTimedOut)));
    assert!(host.env.timers.is_empty());
}

#[test]
fn karn_skips_retransmitted_samples() {
    let mut host = Host::established(config(), 8000);
    let samples = Rc::new(Cell::new(0));
    host.conn.add_observer(Box::new(Samples(samples.clone())));

    host.write(&[6; 100]);
    host.fire().unwrap();
    host.env.now = Instant::from_millis(1500);
    host.ack(101, 8000);
    assert_eq!(samples.get(), 0);

    host.env.now = Instant::from_secs(2);
    host.write(&[6; 100]);
    host.env.now = Instant::from_millis(2300);
    host.ack(201, 8000);
    assert_eq!(samples.get(), 1);
}

#[test]
fn active_close() {
    let mut host = Host::established(config(), 8000);
    host.close();
    assert_eq!(host.conn.state(), State::FinWait1);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.flags.fin());
    assert_eq!(sent[0].0.seq_number, SeqNumber(1));

    host.ack(2, 8000);
    assert_eq!(host.conn.state(), State::FinWait2);
    assert!(!host.conn.timers().is_armed(TimerKind::Retransmit));

    host.env.now = Instant::from_secs(1);
    host.arrive(segment(Flags::FIN_ACK, PEER_ISN + 1, Some(2), 8000), &[]);
    assert_eq!(host.conn.state(), State::TimeWait);
    assert_eq!(host.env.wire.last().unwrap().ack_number, Some(SeqNumber::from_wire(PEER_ISN + 2)));
    assert_eq!(host.env.timers.next_deadline(), Expiration::When(Instant::from_secs(241)));
    assert_eq!(host.env.app.count(|e| *e == Event::PeerClosed), 1);

    // A retransmitted FIN is acknowledged again and restarts the wait.
    host.sent();
    host.env.now = Instant::from_secs(11);
    host.arrive(segment(Flags::FIN_ACK, PEER_ISN + 1, Some(2), 8000), &[]);
    assert_eq!(host.sent().len(), 1);
    assert_eq!(host.env.timers.next_deadline(), Expiration::When(Instant::from_secs(251)));

    let (kind, signals) = host.fire().unwrap();
    assert_eq!(kind, TimerKind::TimeWait);
    assert!(signals.delete);
    assert_eq!(host.conn.state(), State::Closed);
    assert_eq!(host.env.app.count(|e| *e == Event::Closed), 1);
    assert!(host.env.timers.is_empty());
}

#[test]
fn simultaneous_close() {
    let mut host = Host::established(config(), 8000);
    host.close();
    host.arrive(segment(Flags::FIN_ACK, PEER_ISN + 1, Some(1), 8000), &[]);
    assert_eq!(host.conn.state(), State::Closing);
    host.ack(2, 8000);
    assert_eq!(host.conn.state(), State::TimeWait);
}

#[test]
fn passive_close() {
    let mut host = Host::established(config(), 8000);
    host.arrive(segment(Flags::FIN_ACK, PEER_ISN + 1, Some(1), 8000), &[]);
    assert_eq!(host.conn.state(), State::CloseWait);
    assert_eq!(host.env.app.events.last(), Some(&Event::PeerClosed));
    assert_eq!(host.sent().len(), 1);

    // Data still goes out after the peer closed.
    host.write(b"bye");
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, b"bye");
    assert!(!sent[0].0.flags.fin());

    host.close();
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.flags.fin());
    assert_eq!(sent[0].0.seq_number, SeqNumber(4));
    assert_eq!(host.conn.state(), State::LastAck);
    assert!(host.conn.timers().is_armed(TimerKind::LastAck));

    let signals = host.ack(5, 8000);
    assert!(signals.delete);
    assert_eq!(host.conn.state(), State::Closed);
    assert_eq!(host.env.app.count(|e| *e == Event::Closed), 1);
}

#[test]
fn close_waits_for_data() {
    let mut host = Host::established(config(), 150);
    host.write(&[8; 200]);
    assert_eq!(host.sent().len(), 1);
    host.close();
    assert_eq!(host.conn.state(), State::Established);
    assert!(host.sent().is_empty());

    host.ack(101, 150);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.len(), 100);
    assert!(sent[0].0.flags.fin());
    assert_eq!(host.conn.state(), State::FinWait1);
}

#[test]
fn window_scale_needs_both_sides() {
    let config = Config { window_scaling: true, recv_buffer: 8_000_000, ..config() };
    let mut host = Host::new(config.clone());
    host.open(Open::Active).unwrap();
    assert_eq!(host.sent()[0].0.window_scale, Some(7));

    host.arrive(segment(Flags::SYN_ACK, PEER_ISN, Some(1), 1000), &[]);
    assert!(!host.conn.options().window_scaling());
    assert_eq!(host.conn.options().send_scale(), 0);
    assert_eq!(host.conn.options().recv_scale(), 0);
    assert_eq!(host.env.wire.last().unwrap().window_len, 4096);

    host.ack(1, 3000);
    assert_eq!(host.conn.window().peer_window(), 3000);

    // Now with the peer agreeing.
    let mut host = Host::new(config);
    host.open(Open::Active).unwrap();
    let mut syn_ack = segment(Flags::SYN_ACK, PEER_ISN, Some(1), 1000);
    syn_ack.window_scale = Some(2);
    host.arrive(syn_ack, &[]);
    assert_eq!(host.conn.options().send_scale(), 2);
    assert_eq!(host.conn.options().recv_scale(), 7);
    assert_eq!(host.conn.window().peer_window(), 1000);
    assert_eq!(host.env.wire.last().unwrap().window_len, 4096 >> 7);

    host.ack(1, 1000);
    assert_eq!(host.conn.window().peer_window(), 4000);
}

#[test]
fn timestamps_measure_rtt() {
    let config = Config { timestamps: true, ..config() };
    let mut host = Host::new(config);
    host.open(Open::Active).unwrap();
    let syn = host.sent()[0].0;
    let offered = syn.timestamp.unwrap();

    let mut syn_ack = segment(Flags::SYN_ACK, PEER_ISN, Some(1), 8000);
    syn_ack.timestamp = Some(crate::wire::TcpTimestamp { value: 77, echo: offered.value });
    host.arrive(syn_ack, &[]);
    assert!(host.conn.options().timestamps());
    assert_eq!(host.env.wire.last().unwrap().timestamp.unwrap().echo, 77);

    host.write(&[1; 10]);
    let data = host.sent()[0].0;
    host.env.now = Instant::from_millis(250);
    let mut ack = segment(Flags::ACK, PEER_ISN + 1, Some(11), 8000);
    ack.timestamp = Some(crate::wire::TcpTimestamp {
        value: 78,
        echo: data.timestamp.unwrap().value,
    });
    host.arrive(ack, &[]);
    assert_eq!(host.conn.options().timestamp_to_echo(), 78);
    assert!(host.conn.rtt().srtt().unwrap() > Duration::from_millis(0));
}

#[test]
fn persist_probes_back_off() {
    let mut host = Host::established(config(), 0);
    host.write(b"0123456789");
    assert!(host.sent().is_empty());
    assert_eq!(host.deadline(TimerKind::Persist), Expiration::When(Instant::from_secs(6)));

    let mut expected = Instant::from_secs(6);
    for interval in &[12, 24, 48, 60, 60] {
        let (kind, _) = host.fire().unwrap();
        assert_eq!(kind, TimerKind::Persist);
        assert_eq!(host.env.now, expected);
        let sent = host.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.seq_number, SeqNumber(1));
        assert_eq!(sent[0].1, b"0");

        expected = expected + Duration::from_secs(*interval);
        assert_eq!(host.deadline(TimerKind::Persist), Expiration::When(expected));
    }

    host.ack(1, 1000);
    assert!(!host.conn.timers().is_armed(TimerKind::Persist));
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, b"0123456789");
}

#[test]
fn peer_window_below_segment_size() {
    let mut host = Host::established(config(), 50);
    host.write(&[9; 500]);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, SeqNumber(1));
    assert_eq!(sent[0].1.len(), 50);

    host.ack(51, 50);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, SeqNumber(51));
    assert_eq!(sent[0].1.len(), 50);
}

#[test]
fn shrunken_window_filled_by_persist_timer() {
    let mut host = Host::established(config(), 300);
    host.write(&[1; 300]);
    host.ack(101, 200);
    assert_eq!(host.sent().len(), 3);
    host.ack(301, 40);
    assert_eq!(host.conn.window().max_peer_window(), 300);

    // 40 bytes are less than a segment and less than half the largest window.
    host.write(&[2; 100]);
    assert!(host.sent().is_empty());
    assert_eq!(host.deadline(TimerKind::Persist), Expiration::When(Instant::from_secs(6)));

    let (kind, _) = host.fire().unwrap();
    assert_eq!(kind, TimerKind::Persist);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, SeqNumber(301));
    assert_eq!(sent[0].1.len(), 40);
    assert!(host.conn.timers().is_armed(TimerKind::Retransmit));
    assert!(!host.conn.timers().is_armed(TimerKind::Persist));

    host.ack(341, 100);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.seq_number, SeqNumber(341));
    assert_eq!(sent[0].1.len(), 60);
    assert_eq!(host.env.tx.len(), 60);
}

#[test]
fn accepted_probe_advances() {
    let mut host = Host::established(config(), 0);
    host.write(b"ab");
    host.fire().unwrap();
    host.sent();

    host.ack(2, 0);
    assert_eq!(host.conn.window().first_unacked, SeqNumber(2));
    assert_eq!(host.env.tx.len(), 1);
    assert!(!host.conn.window().probe_outstanding);
}

#[test]
fn duplicate_segment_is_idempotent() {
    let mut host = Host::established(config(), 8000);
    let data = segment(Flags::ACK, PEER_ISN + 1, Some(1), 8000);
    host.arrive(data, b"hello");
    host.sent();

    host.arrive(data, b"hello");
    let first = host.sent();
    host.arrive(data, b"hello");
    let second = host.sent();

    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
    assert_eq!(first[0].0.ack_number, Some(SeqNumber::from_wire(PEER_ISN + 6)));
    assert_eq!(host.conn.window().first_unacked, SeqNumber(1));
    assert_eq!(host.env.app.count(|e| matches!(e, Event::DataAvailable(_))), 1);
}

#[test]
fn unacceptable_segments() {
    let mut host = Host::established(config(), 8000);

    // Far outside the receive window.
    host.arrive(segment(Flags::ACK, PEER_ISN + 100_000, Some(1), 8000), b"x");
    assert_eq!(host.sent().len(), 1);

    // Acknowledges data never sent.
    host.ack(50, 8000);
    assert_eq!(host.sent().len(), 1);
    assert_eq!(host.conn.window().first_unacked, SeqNumber(1));

    // No acknowledgment at all.
    host.arrive(segment(Flags::default(), PEER_ISN + 1, None, 8000), b"x");
    assert!(host.sent().is_empty());
    assert_eq!(host.conn.state(), State::Established);
}

#[test]
fn reset_reported_once() {
    let mut host = Host::established(config(), 8000);

    // Inside the window but not exact, challenged.
    host.arrive(segment(Flags::RST, PEER_ISN + 500, None, 0), &[]);
    assert_eq!(host.conn.state(), State::Established);
    assert_eq!(host.sent().len(), 1);

    let signals = host.arrive(segment(Flags::RST, PEER_ISN + 1, None, 0), &[]);
    assert!(signals.delete);
    assert_eq!(host.conn.state(), State::Closed);

    host.arrive(segment(Flags::RST, PEER_ISN + 1, None, 0), &[]);
    let mut io = host.env.io();
    assert_eq!(host.conn.abort(&mut io), Signals::default());
    assert_eq!(host.env.app.events, [
        Event::Connected,
        Event::Error(Error::ConnectionReset),
    ]);
    assert!(host.env.timers.is_empty());
}

#[test]
fn syn_in_window_is_challenged() {
    let mut host = Host::established(config(), 8000);
    host.arrive(segment(Flags::SYN, PEER_ISN + 1, None, 8000), &[]);
    assert_eq!(host.conn.state(), State::Established);
    let sent = host.sent();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].0.flags.rst());
}

#[test]
fn refused_connection() {
    let mut host = Host::new(config());
    host.open(Open::Active).unwrap();
    host.sent();
    let signals = host.arrive(segment(Flags::RST_ACK, 0, Some(1), 0), &[]);
    assert!(signals.delete);
    assert_eq!(host.env.app.events, [Event::Error(Error::ConnectionRefused)]);
}

#[test]
fn syn_retries_time_out() {
    let config = Config { connect_retries: 2, ..config() };
    let mut host = Host::new(config);
    host.open(Open::Active).unwrap();
    host.sent();

    host.fire().unwrap();
    assert_eq!(host.env.now, Instant::from_secs(3));
    assert!(host.sent()[0].0.flags.syn());
    host.fire().unwrap();
    assert_eq!(host.env.now, Instant::from_secs(9));
    assert!(host.sent()[0].0.flags.syn());

    let (_, signals) = host.fire().unwrap();
    assert_eq!(host.env.now, Instant::from_secs(21));
    assert!(signals.delete);
    assert!(host.sent().is_empty());
    assert_eq!(host.env.app.events, [Event::Error(Error::ConnectionTimedOut)]);
}

#[test]
fn closed_answers_with_reset() {
    let mut host = Host::new(config());
    let mut stray = segment(Flags::ACK, 500, Some(77), 1000);
    stray.src_port = 5555;
    host.arrive(stray, &[]);
    let reset = *host.env.wire.last().unwrap();
    assert_eq!(reset.flags, Flags::RST);
    assert_eq!(reset.seq_number, SeqNumber(77));
    assert_eq!(reset.dst_port, 5555);

    host.arrive(segment(Flags::SYN, 10, None, 1000), &[]);
    let reset = *host.env.wire.last().unwrap();
    assert!(reset.flags.rst());
    assert_eq!(reset.ack_number, Some(SeqNumber(11)));

    // Never answer a reset.
    host.sent();
    host.arrive(segment(Flags::RST, 10, None, 0), &[]);
    assert!(host.sent().is_empty());
}

#[test]
fn illegal_requests() {
    let mut host = Host::new(config());
    {
        let mut io = host.env.io();
        assert_eq!(host.conn.submit(&mut io), Err(Error::Illegal));
        assert_eq!(host.conn.close(&mut io), Err(Error::Illegal));
    }

    let mut host = Host::established(config(), 8000);
    assert_eq!(host.open(Open::Active), Err(Error::Illegal));
    host.write(b"data");
    assert_eq!(
        host.conn.set_congestion_control(Box::new(NewReno::new())),
        Err(Error::Illegal));
}

#[test]
fn subflow_gets_token() {
    let keys = Rc::new(IsnGenerator::new(5, 6));
    let ports = Ports { local: LOCAL, remote: REMOTE };
    let mut conn = Connection::new(config(), ports, keys.clone()).unwrap().into_subflow();
    let mut env = Env::new();

    conn.open(&mut env.io(), Open::Active).unwrap();
    assert!(!conn.role().is_established());
    conn.role_mut().set_meta_window(Some(500));

    let syn_ack = segment(Flags::SYN_ACK, PEER_ISN, Some(1), 8000);
    conn.arrives(&mut env.io(), &syn_ack, &[]);
    assert!(conn.role().is_established());
    assert_eq!(conn.window().peer_window(), 500);
    let key = conn.role().local_key().unwrap();
    assert_eq!(conn.role().token(), Some(keys.token(key)));

    let ack = segment(Flags::ACK, PEER_ISN + 1, Some(1), 8000);
    conn.arrives(&mut env.io(), &ack, &[]);
    assert_eq!(conn.window().peer_window(), 500);
}

#[test]
fn observers_see_state_changes() {
    struct States(Rc<core::cell::RefCell<Vec<State>>>);

    impl Observer for States {
        fn state_changed(&mut self, _: State, new: State) {
            self.0.borrow_mut().push(new);
        }
    }

    let states = Rc::new(core::cell::RefCell::new(Vec::new()));
    let mut host = Host::new(config());
    host.conn.add_observer(Box::new(States(states.clone())));
    host.open(Open::Active).unwrap();
    host.arrive(segment(Flags::SYN_ACK, PEER_ISN, Some(1), 8000), &[]);
    host.close();
    assert_eq!(*states.borrow(), [State::SynSent, State::Established, State::FinWait1]);
}
