use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use crate::time::Duration;
use crate::wire::{Repr, SeqNumber};

use super::{Error, Result};
use super::config::Config;
use super::congestion::{CongestionControl, NewReno};
use super::io::Io;
use super::isn::KeyService;
use super::observer::Observer;
use super::options::Options;
use super::role::{Plain, Role, Subflow};
use super::rtt::{RttEstimator, RttHistory};
use super::timer::{TimerHandle, TimerKind, Timers};
use super::window::Window;

/// State enum of the statemachine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// No connection, either not yet opened or finished.
    Closed,

    /// A listening connection.
    ///
    /// Akin to an open server socket. Each SYN is answered by forking a new connection.
    Listen,

    /// An open connection request.
    SynSent,

    /// Connection request we intend to answer, waiting on ack.
    SynReceived,

    /// An open connection.
    Established,

    /// Closed our side of the connection.
    FinWait1,

    /// Closing connection nicely, initiated by us and acknowledged.
    FinWait2,

    /// Closed both sides but we don't know the other knows.
    Closing,

    /// Both sides recognized connection as closed.
    TimeWait,

    /// Other side closed its connection.
    CloseWait,

    /// Connection closed after other side closed its already.
    LastAck,
}

/// The congestion state, independent of the connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AckState {
    /// Normal operation.
    Open,
    /// Duplicate acknowledgments were seen.
    Disorder,
    /// The window was reduced without a loss, after the segment sink refused a segment.
    Cwr,
    /// Fast recovery after a fast retransmit.
    Recovery,
    /// Recovery after a retransmission timeout.
    Loss,
}

/// How to open a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Open {
    /// Send a SYN.
    Active,
    /// Wait for a SYN.
    Passive,
}

/// The port pair of a connection.
///
/// Addresses and demultiplexing belong to the host, ports are only needed to fill in headers and
/// as input to the initial sequence number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Ports {
    /// Our port.
    pub local: u16,
    /// The peer's port.
    pub remote: u16,
}

/// Output signals towards the host.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Signals {
    /// A listening connection got a SYN and the host should `fork` it.
    pub accept: bool,

    /// The connection closed during this event and its state can be deleted.
    pub delete: bool,
}

/// A single endpoint of a reliable byte stream.
///
/// Processes one event at a time to completion: a segment arrival, a timer fire or a request of
/// the application. All collaborators are passed in for each event through an [`Io`].
///
/// The role parameter selects hooks for the layer above. Only [`Plain`] connections can listen
/// and fork, a [`Subflow`] is created from an established or opening plain connection with
/// `into_subflow`.
///
/// [`Io`]: struct.Io.html
/// [`Plain`]: struct.Plain.html
/// [`Subflow`]: struct.Subflow.html
pub struct Connection<R: Role = Plain> {
    pub(super) state: State,
    pub(super) ack_state: AckState,
    pub(super) config: Config,
    pub(super) ports: Ports,
    pub(super) window: Window,
    pub(super) options: Options,
    pub(super) rtt: RttEstimator,
    pub(super) history: RttHistory,
    pub(super) timers: Timers,
    pub(super) cc: Box<dyn CongestionControl>,
    pub(super) keys: Rc<dyn KeyService>,
    pub(super) observers: Vec<Box<dyn Observer>>,
    pub(super) role: R,

    /// The effective sender segment size.
    pub(super) segment_size: usize,
    /// Our initial sequence number.
    pub(super) isn: SeqNumber,
    pub(super) dup_acks: u32,
    pub(super) delayed_acks: u32,
    /// `highest_sent` when the current recovery began.
    pub(super) recover: SeqNumber,
    /// Estimate of bytes lost from the flight.
    pub(super) lost_out: usize,
    /// Bytes retransmitted and not yet acknowledged.
    pub(super) retrans_out: usize,
    /// SYN or SYN+ACK retransmissions left.
    pub(super) syn_retries_left: u32,
    pub(super) connect_interval: Duration,
    /// Retransmission timeouts since the last progress.
    pub(super) data_retries: u32,
    pub(super) persist_interval: Duration,
    /// Send a FIN once all data was sent.
    pub(super) close_on_empty: bool,
    pub(super) shutdown_send: bool,
    pub(super) shutdown_recv: bool,
    /// The peer's FIN was received in order.
    pub(super) fin_received: bool,
    /// Sequence number of the peer's FIN, once seen.
    pub(super) peer_fin: Option<SeqNumber>,
    /// Sequence number of our FIN, once sent.
    pub(super) fin_seq: Option<SeqNumber>,
    pub(super) data_started: bool,
    /// Closed or failed was already reported.
    pub(super) finished: bool,
}

impl Connection<Plain> {
    /// A closed connection with NewReno congestion control.
    pub fn new(config: Config, ports: Ports, keys: Rc<dyn KeyService>) -> Result<Self> {
        config.check()?;
        Ok(Connection::build(config, ports, keys, Box::new(NewReno::new()), Plain))
    }

    /// Create the connection for a SYN that arrived on this listening connection.
    ///
    /// The new connection answers with a SYN+ACK and starts in `SYN_RCVD`. It gets a fork of
    /// the congestion control and shares the key service; observers are not inherited.
    pub fn fork(&self, io: &mut Io<'_>, syn: &Repr) -> Result<Connection<Plain>> {
        if self.state != State::Listen || !syn.flags.syn() || syn.ack_number.is_some() {
            return Err(Error::Illegal);
        }

        let ports = Ports { local: self.ports.local, remote: syn.src_port };
        let mut child = Connection::build(
            self.config.clone(),
            ports,
            self.keys.clone(),
            self.cc.fork(),
            Plain);
        child.accept_syn(io, syn);
        Ok(child)
    }

    /// Continue as a subflow of a multi-path connection.
    ///
    /// All state moves into the new connection, including armed timers.
    pub fn into_subflow(self) -> Connection<Subflow> {
        self.with_role(Subflow::new())
    }
}

impl<R: Role> Connection<R> {
    fn build(
        config: Config,
        ports: Ports,
        keys: Rc<dyn KeyService>,
        cc: Box<dyn CongestionControl>,
        role: R,
    ) -> Self {
        let rtt = RttEstimator::new(
            config.initial_rto,
            config.min_rto,
            config.max_rto,
            config.clock_granularity);
        let options = Options::new(
            config.window_scaling,
            config.timestamps,
            config.recv_buffer,
            config.max_window);

        Connection {
            state: State::Closed,
            ack_state: AckState::Open,
            ports,
            window: Window::new(config.max_window),
            options,
            rtt,
            history: RttHistory::default(),
            timers: Timers::default(),
            cc,
            keys,
            observers: Vec::new(),
            role,
            segment_size: config.segment_size,
            isn: SeqNumber::default(),
            dup_acks: 0,
            delayed_acks: 0,
            recover: SeqNumber::default(),
            lost_out: 0,
            retrans_out: 0,
            syn_retries_left: config.connect_retries,
            connect_interval: config.connect_timeout,
            data_retries: 0,
            persist_interval: config.persist_timeout,
            close_on_empty: false,
            shutdown_send: false,
            shutdown_recv: false,
            fin_received: false,
            peer_fin: None,
            fin_seq: None,
            data_started: false,
            finished: false,
            config,
        }
    }

    fn with_role<S: Role>(self, role: S) -> Connection<S> {
        Connection {
            state: self.state,
            ack_state: self.ack_state,
            config: self.config,
            ports: self.ports,
            window: self.window,
            options: self.options,
            rtt: self.rtt,
            history: self.history,
            timers: self.timers,
            cc: self.cc,
            keys: self.keys,
            observers: self.observers,
            role,
            segment_size: self.segment_size,
            isn: self.isn,
            dup_acks: self.dup_acks,
            delayed_acks: self.delayed_acks,
            recover: self.recover,
            lost_out: self.lost_out,
            retrans_out: self.retrans_out,
            syn_retries_left: self.syn_retries_left,
            connect_interval: self.connect_interval,
            data_retries: self.data_retries,
            persist_interval: self.persist_interval,
            close_on_empty: self.close_on_empty,
            shutdown_send: self.shutdown_send,
            shutdown_recv: self.shutdown_recv,
            fin_received: self.fin_received,
            peer_fin: self.peer_fin,
            fin_seq: self.fin_seq,
            data_started: self.data_started,
            finished: self.finished,
        }
    }

    /// Replace the congestion control algorithm.
    ///
    /// Only permitted until data has been transferred.
    pub fn set_congestion_control(&mut self, cc: Box<dyn CongestionControl>) -> Result<()> {
        if self.data_started {
            return Err(Error::Illegal);
        }
        net_debug!("congestion control {} replaced by {}", self.cc.name(), cc.name());
        self.cc = cc;
        Ok(())
    }

    /// Attach an observer of state changes.
    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer)
    }

    /// Open the connection, actively with a SYN or passively by listening.
    pub fn open(&mut self, io: &mut Io<'_>, mode: Open) -> Result<Signals> {
        if self.state != State::Closed || self.finished {
            return Err(Error::Illegal);
        }

        match mode {
            Open::Passive => self.set_state(State::Listen),
            Open::Active => {
                let isn = self.choose_isn(io);
                self.start_send_space(io, isn);
                self.set_state(State::SynSent);
                self.send_syn(io, false);
            },
        }
        Ok(Signals::default())
    }

    /// The application added data to the send buffer.
    pub fn submit(&mut self, io: &mut Io<'_>) -> Result<Signals> {
        if self.shutdown_send || self.close_on_empty || self.fin_seq.is_some() {
            return Err(Error::Illegal);
        }
        match self.state {
            // Sent once the handshake completes.
            State::SynSent | State::SynReceived => (),
            State::Established | State::CloseWait => {
                self.send_pending(io);
            },
            _ => return Err(Error::Illegal),
        }
        Ok(Signals::default())
    }

    /// Close the connection after all submitted data was sent.
    pub fn close(&mut self, io: &mut Io<'_>) -> Result<Signals> {
        let before = self.state;
        if self.state == State::Closed {
            return Err(Error::Illegal);
        }

        let unsent = io.tx.available_from(self.window.next_to_send) > 0;
        match self.state {
            State::SynSent if unsent => self.close_on_empty = true,
            State::SynReceived => self.close_on_empty = true,
            State::Established | State::CloseWait if unsent => self.close_on_empty = true,
            State::Established | State::CloseWait => self.send_fin(io),
            State::SynSent | State::Closing => {
                self.send_reset(io);
                self.close_and_notify(io);
            },
            State::Listen | State::LastAck => self.close_and_notify(io),
            _ => (),
        }
        Ok(self.signals_since(before))
    }

    /// Stop sending, our FIN follows the submitted data.
    pub fn shutdown_send(&mut self, io: &mut Io<'_>) -> Result<Signals> {
        if self.state == State::Closed {
            return Err(Error::Illegal);
        }
        self.shutdown_send = true;
        match self.state {
            State::Established | State::CloseWait if self.fin_seq.is_none() => {
                if io.tx.available_from(self.window.next_to_send) > 0 {
                    self.close_on_empty = true;
                } else {
                    self.send_fin(io);
                }
            },
            State::SynSent | State::SynReceived => self.close_on_empty = true,
            _ => (),
        }
        Ok(Signals::default())
    }

    /// Stop delivering received data to the application.
    ///
    /// Data is still acknowledged so the peer is not stalled.
    pub fn shutdown_recv(&mut self) {
        self.shutdown_recv = true;
    }

    /// Drop the connection immediately, resetting the peer.
    pub fn abort(&mut self, io: &mut Io<'_>) -> Signals {
        let before = self.state;
        match self.state {
            State::Closed => return Signals::default(),
            State::SynReceived | State::Established | State::FinWait1 | State::FinWait2
                | State::CloseWait | State::Closing | State::LastAck => self.send_reset(io),
            State::Listen | State::SynSent | State::TimeWait => (),
        }
        self.close_and_notify(io);
        self.signals_since(before)
    }

    /// Handle the fire of a timer scheduled by this connection.
    ///
    /// Fires of handles that were cancelled or replaced in the meantime are ignored.
    pub fn timer_fired(&mut self, io: &mut Io<'_>, handle: TimerHandle) -> Signals {
        let before = self.state;
        let kind = match self.timers.fired(handle) {
            Some(kind) => kind,
            None => {
                net_trace!("stale timer {:?} ignored", handle);
                return Signals::default();
            },
        };

        net_trace!("{:?} timer fired in {}", kind, self.state);
        match kind {
            TimerKind::Retransmit => self.retransmit_timeout(io),
            TimerKind::DelayedAck => self.send_ack(io),
            TimerKind::Persist => self.persist_timeout(io),
            TimerKind::TimeWait | TimerKind::LastAck => self.close_and_notify(io),
        }
        self.signals_since(before)
    }

    /// The current state of the state machine.
    pub fn state(&self) -> State {
        self.state
    }

    /// The current congestion state.
    pub fn ack_state(&self) -> AckState {
        self.ack_state
    }

    /// Bytes that could be sent right now.
    pub fn available_window(&self) -> usize {
        self.window.available(self.cc.congestion_window(), self.pipe())
    }

    /// Sequence space sent and not yet acknowledged.
    pub fn bytes_in_flight(&self) -> usize {
        self.window.bytes_in_flight()
    }

    /// The sequence marks and windows.
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// The negotiated options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The round trip time estimate.
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// The armed timers.
    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    /// The congestion window in bytes.
    pub fn congestion_window(&self) -> u32 {
        self.cc.congestion_window()
    }

    /// The slow start threshold in bytes.
    pub fn slow_start_threshold(&self) -> u32 {
        self.cc.slow_start_threshold()
    }

    /// The effective segment size.
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Duplicate acknowledgments counted since the last new acknowledgment.
    pub fn dup_acks(&self) -> u32 {
        self.dup_acks
    }

    /// Our initial sequence number.
    pub fn initial_seq(&self) -> SeqNumber {
        self.isn
    }

    /// The port pair.
    pub fn ports(&self) -> Ports {
        self.ports
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The role hooks.
    pub fn role(&self) -> &R {
        &self.role
    }

    /// The role hooks, mutably.
    pub fn role_mut(&mut self) -> &mut R {
        &mut self.role
    }

    /// Bytes in the network by the loss estimate: `flight - lost + retransmitted`.
    pub(super) fn pipe(&self) -> usize {
        (self.window.bytes_in_flight() + self.retrans_out).saturating_sub(self.lost_out)
    }

    pub(super) fn signals_since(&self, before: State) -> Signals {
        Signals {
            accept: false,
            delete: before != State::Closed && self.state == State::Closed,
        }
    }

    pub(super) fn choose_isn(&self, io: &Io<'_>) -> SeqNumber {
        if self.config.null_isn {
            SeqNumber(0)
        } else {
            self.keys.initial_seq(self.ports, io.now)
        }
    }

    pub(super) fn start_send_space(&mut self, io: &mut Io<'_>, isn: SeqNumber) {
        self.isn = isn;
        self.recover = isn;
        self.window.init_send(isn);
        io.tx.set_head(isn + 1);
    }

    pub(super) fn set_state(&mut self, state: State) {
        let old = self.state;
        if old == state {
            return;
        }
        net_debug!("{}:{}: {} -> {}", self.ports.local, self.ports.remote, old, state);
        self.state = state;
        self.observers.iter_mut().for_each(|o| o.state_changed(old, state));
    }

    pub(super) fn set_ack_state(&mut self, state: AckState) {
        let old = self.ack_state;
        if old == state {
            return;
        }
        self.ack_state = state;
        self.observers.iter_mut().for_each(|o| o.ack_state_changed(old, state));
    }

    /// Set the congestion window, never below one segment.
    pub(super) fn set_congestion_window(&mut self, bytes: u32) {
        let old = self.cc.congestion_window();
        let new = bytes.max(self.segment_size as u32);
        self.cc.set_congestion_window(new);
        if old != new {
            self.observers.iter_mut().for_each(|o| o.congestion_window_changed(old, new));
        }
    }

    pub(super) fn report_windows(&mut self, cwnd: u32, ssthresh: u32) {
        let new_cwnd = self.cc.congestion_window();
        if new_cwnd < self.segment_size as u32 {
            self.cc.set_congestion_window(self.segment_size as u32);
        }
        let new_cwnd = self.cc.congestion_window();
        let new_ssthresh = self.cc.slow_start_threshold();
        if cwnd != new_cwnd {
            self.observers.iter_mut().for_each(|o| o.congestion_window_changed(cwnd, new_cwnd));
        }
        if ssthresh != new_ssthresh {
            self.observers.iter_mut()
                .for_each(|o| o.slow_start_threshold_changed(ssthresh, new_ssthresh));
        }
    }

    pub(super) fn report_rto(&mut self, old: Duration) {
        let new = self.rtt.rto();
        if old != new {
            self.observers.iter_mut().for_each(|o| o.rto_changed(old, new));
        }
    }

    pub(super) fn violation(&mut self, kind: Error) {
        self.observers.iter_mut().for_each(|o| o.protocol_violation(kind));
    }

    /// Enter `TIME_WAIT`, or restart its timer.
    pub(super) fn time_wait(&mut self, io: &mut Io<'_>) {
        self.timers.cancel_all(io.timers);
        self.set_state(State::TimeWait);
        let deadline = io.now + self.config.msl * 2;
        self.timers.arm(TimerKind::TimeWait, deadline, io.timers);
    }

    /// Normal end of the connection.
    pub(super) fn close_and_notify(&mut self, io: &mut Io<'_>) {
        self.timers.cancel_all(io.timers);
        self.set_state(State::Closed);
        if !self.finished {
            self.finished = true;
            io.app.closed();
        }
    }

    /// Fatal end of the connection.
    pub(super) fn fail(&mut self, io: &mut Io<'_>, kind: Error) {
        net_debug!("{}:{}: {}", self.ports.local, self.ports.remote, kind);
        self.timers.cancel_all(io.timers);
        self.set_state(State::Closed);
        if !self.finished {
            self.finished = true;
            io.app.error(kind);
        }
    }
}

impl State {
    /// Return whether both sequence spaces are known.
    pub fn is_synchronized(self) -> bool {
        !matches!(self, State::Closed | State::Listen | State::SynSent)
    }
}

impl Default for State {
    fn default() -> Self {
        State::Closed
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN-SENT",
            State::SynReceived => "SYN-RECEIVED",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN-WAIT-1",
            State::FinWait2 => "FIN-WAIT-2",
            State::Closing => "CLOSING",
            State::TimeWait => "TIME-WAIT",
            State::CloseWait => "CLOSE-WAIT",
            State::LastAck => "LAST-ACK",
        };
        f.write_str(name)
    }
}
