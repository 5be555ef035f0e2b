//! Processing of arriving segments.
use crate::time::Duration;
use crate::wire::{Repr, SeqNumber};

use super::{Config, Error};
use super::connection::{AckState, Connection, Signals, State};
use super::io::Io;
use super::role::Role;
use super::timer::TimerKind;

impl<R: Role> Connection<R> {
    /// Process an arriving segment.
    ///
    /// The host has already demultiplexed the segment to this connection and verified its
    /// checksum. `payload` holds the segment data.
    pub fn arrives(&mut self, io: &mut Io<'_>, segment: &Repr, payload: &[u8]) -> Signals {
        let before = self.state;
        net_trace!("{}:{}: recv {} in {}", self.ports.local, self.ports.remote, segment, before);
        self.observers.iter_mut().for_each(|o| o.segment_received(segment));

        let mut signals = Signals::default();
        match self.state {
            State::Closed => self.arrives_closed(io, segment, payload.len()),
            State::Listen => signals.accept = self.arrives_listen(io, segment, payload.len()),
            State::SynSent => self.arrives_syn_sent(io, segment),
            State::SynReceived => self.arrives_syn_received(io, segment, payload),
            _ => self.arrives_synchronized(io, segment, payload),
        }

        signals.delete = self.signals_since(before).delete;
        signals
    }

    fn arrives_closed(&mut self, io: &mut Io<'_>, segment: &Repr, len: usize) {
        if !segment.flags.rst() {
            self.send_reset_for(io, segment, len);
        }
    }

    fn arrives_listen(&mut self, io: &mut Io<'_>, segment: &Repr, len: usize) -> bool {
        if segment.flags.rst() {
            return false;
        }
        if segment.ack_number.is_some() {
            self.send_reset_for(io, segment, len);
            return false;
        }
        if !segment.flags.syn() {
            return false;
        }
        net_debug!("{}: connection request from port {}", self.ports.local, segment.src_port);
        true
    }

    /// Initialize a forked connection from the SYN that created it.
    pub(super) fn accept_syn(&mut self, io: &mut Io<'_>, syn: &Repr) {
        self.synchronize(io, syn);
        let isn = self.choose_isn(io);
        self.start_send_space(io, isn);
        self.set_state(State::SynReceived);
        self.send_syn(io, true);
    }

    /// Take the peer's sequence space and options from its synchronizing segment.
    fn synchronize(&mut self, io: &mut Io<'_>, syn: &Repr) {
        self.window.init_recv(syn.seq_number);
        io.rx.set_next(syn.seq_number + 1);
        if let Some(kind) = self.options.process_syn(syn) {
            self.violation(kind);
        }
        // Windows of synchronizing segments are never scaled.
        let window = self.role.peer_window(syn.window_len, 0);
        self.window.set_peer_window(window);
        if let Some(mss) = self.options.peer_mss() {
            self.segment_size = self.config.segment_size.min(usize::from(mss));
        }
    }

    fn arrives_syn_sent(&mut self, io: &mut Io<'_>, segment: &Repr) {
        if let Some(ack) = segment.ack_number {
            if ack != self.isn + 1 {
                net_debug!("unacceptable ack {} in {}", ack, self.state);
                if !segment.flags.rst() {
                    self.send_reset_for(io, segment, 0);
                }
                return;
            }
        }

        if segment.flags.rst() {
            if segment.ack_number.is_some() {
                self.fail(io, Error::ConnectionRefused);
            }
            return;
        }

        if !segment.flags.syn() {
            return;
        }

        self.synchronize(io, segment);
        match segment.ack_number {
            Some(ack) => {
                // Data in a SYN+ACK is ignored, the peer will resend it.
                self.establish(io, ack);
                self.send_ack(io);
                self.send_pending(io);
            },
            None => {
                // Simultaneous open, answer with our SYN again.
                self.set_state(State::SynReceived);
                self.send_syn(io, true);
            },
        }
    }

    fn arrives_syn_received(&mut self, io: &mut Io<'_>, segment: &Repr, payload: &[u8]) {
        if segment.flags.rst() {
            let seq = segment.seq_number;
            if !self.window.out_of_range(seq, seq, io.rx.capacity()) {
                self.fail(io, Error::ConnectionRefused);
            }
            return;
        }

        if segment.flags.syn() {
            if segment.seq_number + 1 != io.rx.next() {
                net_trace!("SYN at {} in {} dropped", segment.seq_number, self.state);
                return;
            }
            match segment.ack_number {
                // Our SYN+ACK got lost.
                None => self.send_syn(io, true),
                // Simultaneous open, the peer's SYN+ACK acknowledges our SYN.
                Some(ack) if ack == self.isn + 1 => {
                    self.options.on_segment(segment);
                    let window = self.role.peer_window(segment.window_len, 0);
                    self.window.set_peer_window(window);
                    self.establish(io, ack);
                    self.send_ack(io);
                    self.send_pending(io);
                },
                Some(ack) => {
                    net_debug!("unacceptable ack {} in {}", ack, self.state);
                    self.send_reset_for(io, segment, payload.len());
                },
            }
            return;
        }

        let ack = match segment.ack_number {
            Some(ack) => ack,
            None => return,
        };

        if ack != self.isn + 1 {
            net_debug!("unacceptable ack {} in {}", ack, self.state);
            self.send_reset_for(io, segment, payload.len());
            return;
        }

        self.options.on_segment(segment);
        let window = self.role.peer_window(segment.window_len, self.options.send_scale());
        self.window.set_peer_window(window);
        self.window.highest_ack_received = ack;
        self.establish(io, ack);

        if !payload.is_empty() || segment.flags.fin() {
            self.received_data(io, segment, payload);
        }
        self.send_pending(io);
    }

    /// The handshake completed with the peer acknowledging our SYN.
    fn establish(&mut self, io: &mut Io<'_>, ack: SeqNumber) {
        self.timers.cancel(TimerKind::Retransmit, io.timers);
        self.window.first_unacked = ack;
        self.window.next_to_send = self.window.next_to_send.max(ack);
        self.window.highest_sent = self.window.highest_sent.max(ack);
        self.window.highest_ack_received = ack;
        self.recover = ack;
        self.syn_retries_left = self.config.connect_retries;
        self.connect_interval = self.config.connect_timeout;

        if let Some(rtt) = self.history.acknowledged(ack, io.now) {
            self.rtt_measured(rtt);
        }
        self.history.clear();

        let mss = self.segment_size as u32;
        let ssthresh = if self.config.initial_ssthresh == Config::UNSCALED_SSTHRESH
            && self.options.window_scaling()
        {
            self.config.initial_ssthresh << self.options.send_scale()
        } else {
            self.config.initial_ssthresh
        };
        let (cwnd, old_ssthresh) = (self.cc.congestion_window(), self.cc.slow_start_threshold());
        self.cc.init(mss, self.config.initial_cwnd.saturating_mul(mss), ssthresh);
        self.report_windows(cwnd, old_ssthresh);

        self.set_state(State::Established);
        self.role.handshake_completed(&self.window, &*self.keys);
        io.app.connected();
    }

    fn arrives_synchronized(&mut self, io: &mut Io<'_>, segment: &Repr, payload: &[u8]) {
        let head = segment.seq_number;
        let tail = head + payload.len();

        if segment.flags.rst() {
            return self.reset_received(io, segment);
        }

        if segment.flags.syn() {
            net_debug!("SYN in {}, sending challenge ack", self.state);
            self.violation(Error::ProtocolViolation);
            return self.send_ack(io);
        }

        if self.window.out_of_range(head, tail, io.rx.capacity()) {
            net_trace!("segment {}..{} out of range, dropped", head, tail);
            return self.send_ack(io);
        }

        let ack = match segment.ack_number {
            Some(ack) => ack,
            None => {
                net_trace!("segment without ack dropped");
                return;
            },
        };

        if self.window.ack_limit() < ack {
            net_trace!("ack {} for unsent data", ack);
            return self.send_ack(io);
        }

        let echo = self.options.on_segment(segment);
        let old_window = self.window.peer_window();
        let window = self.role.peer_window(segment.window_len, self.options.send_scale());
        let window_changed = self.window.update_peer_window(head, ack, window, true);
        if window_changed && self.window.peer_window() > old_window {
            self.window_opened(io);
        }

        self.received_ack(io, segment, ack, payload.len(), echo, window_changed);

        if self.fin_acked() {
            match self.state {
                State::FinWait1 => self.set_state(State::FinWait2),
                State::Closing => self.time_wait(io),
                State::LastAck => return self.close_and_notify(io),
                _ => (),
            }
        }

        if !payload.is_empty() || segment.flags.fin() {
            self.received_data(io, segment, payload);
        }
    }

    /// Validate a reset as in RFC 5961.
    fn reset_received(&mut self, io: &mut Io<'_>, segment: &Repr) {
        if self.state == State::TimeWait {
            return;
        }

        let seq = segment.seq_number;
        if seq == self.ack_number(io) || seq == io.rx.next() {
            self.fail(io, Error::ConnectionReset);
        } else if !self.window.out_of_range(seq, seq, io.rx.capacity()) {
            net_debug!("reset at {} not exact, sending challenge ack", seq);
            self.send_ack(io);
        }
    }

    /// Stop probing, the peer widened its window.
    fn window_opened(&mut self, io: &mut Io<'_>) {
        if self.timers.is_armed(TimerKind::Persist) {
            net_trace!("peer window opened to {}", self.window.peer_window());
            self.timers.cancel(TimerKind::Persist, io.timers);
        }
        self.persist_interval = self.config.persist_timeout;
    }

    /// Process an acceptable acknowledgment field.
    fn received_ack(
        &mut self,
        io: &mut Io<'_>,
        segment: &Repr,
        ack: SeqNumber,
        len: usize,
        echo: Option<u32>,
        window_changed: bool,
    ) {
        let first = self.window.first_unacked;
        if ack < first {
            // Old, the data may still be new.
            return;
        }

        if ack == first {
            let duplicate = len == 0
                && !segment.flags.fin()
                && !window_changed
                && self.window.outstanding();
            if duplicate {
                self.dup_ack(io);
            } else if window_changed {
                self.send_pending(io);
            }
            return;
        }

        self.new_ack(io, ack, echo);
    }

    fn dup_ack(&mut self, io: &mut Io<'_>) {
        self.dup_acks += 1;
        net_trace!("duplicate ack {} for {}", self.dup_acks, self.window.first_unacked);

        if self.ack_state == AckState::Open {
            self.set_ack_state(AckState::Disorder);
        }

        match self.ack_state {
            AckState::Recovery => {
                // Every duplicate signals a segment that left the network.
                let cwnd = self.cc.congestion_window().saturating_add(self.segment_size as u32);
                self.set_congestion_window(cwnd);
                self.send_pending(io);
            },
            AckState::Disorder | AckState::Cwr => {
                if self.dup_acks == self.config.retx_threshold {
                    if self.recover <= self.window.highest_ack_received {
                        self.enter_recovery(io);
                    }
                } else if self.dup_acks < self.config.retx_threshold && self.config.limited_transmit {
                    self.limited_transmit(io);
                }
            },
            AckState::Open | AckState::Loss => (),
        }
    }

    fn enter_recovery(&mut self, io: &mut Io<'_>) {
        let flight = self.window.bytes_in_flight();
        let mss = self.segment_size as u32;
        self.loss_detected(flight);
        self.recover = self.window.highest_sent;
        let inflate = self.dup_acks.saturating_mul(mss);
        let cwnd = self.cc.slow_start_threshold().saturating_add(inflate);
        self.set_congestion_window(cwnd);
        self.set_ack_state(AckState::Recovery);
        self.lost_out = flight.min(self.segment_size);
        net_debug!("fast retransmit at {}, recover {}", self.window.first_unacked, self.recover);
        // The retransmission timer keeps running.
        self.retransmit_head(io);
    }

    /// Send one new segment for an early duplicate acknowledgment (RFC 3042).
    fn limited_transmit(&mut self, io: &mut Io<'_>) {
        let next = self.window.next_to_send;
        if io.tx.available_from(next) == 0 {
            return;
        }
        let flight = self.window.bytes_in_flight();
        if flight + self.segment_size > self.window.peer_window() as usize {
            return;
        }
        let sent = self.send_data_segment(io, next, self.segment_size);
        self.window.next_to_send = next + sent;
    }

    fn new_ack(&mut self, io: &mut Io<'_>, ack: SeqNumber, echo: Option<u32>) {
        let acked = ack - self.window.first_unacked;
        net_trace!("new ack {}, {} bytes acknowledged", ack, acked);
        self.data_retries = 0;

        let sample = self.history.acknowledged(ack, io.now);
        let sample = if self.options.timestamps() {
            echo.and_then(|echo| self.options.rtt_from_echo(echo, io.now))
        } else {
            sample
        };
        let old_rto = self.rtt.rto();
        if let Some(rtt) = sample {
            self.rtt_measured(rtt);
        }
        self.rtt.reset_backoff();
        self.report_rto(old_rto);

        self.lost_out = self.lost_out.saturating_sub(acked);
        self.retrans_out = self.retrans_out.saturating_sub(acked);

        match self.ack_state {
            AckState::Recovery if ack < self.recover => {
                // Partial acknowledgment: deflate by the amount acknowledged, allow one more
                // segment and repair the next hole.
                let mss = self.segment_size as u32;
                let cwnd = self.cc.congestion_window().saturating_sub(acked as u32) + mss;
                self.set_congestion_window(cwnd);
                self.advance(io, ack);
                self.lost_out = self.segment_size.min(self.window.bytes_in_flight());
                self.retransmit_head(io);
            },
            AckState::Recovery => {
                self.advance(io, ack);
                self.lost_out = 0;
                self.retrans_out = 0;
                let pipe = self.pipe() as u32;
                let cwnd = self.cc.slow_start_threshold()
                    .min(pipe.saturating_add(self.segment_size as u32));
                self.set_congestion_window(cwnd);
                self.set_ack_state(AckState::Open);
                net_debug!("recovery complete at {}", ack);
            },
            AckState::Loss => {
                self.advance(io, ack);
                self.congestion_ack(acked);
                if self.recover <= ack {
                    self.lost_out = 0;
                    self.retrans_out = 0;
                    self.set_ack_state(AckState::Open);
                }
            },
            AckState::Cwr => {
                // The window stays reduced until the data sent at the reduction is through.
                self.advance(io, ack);
                if self.recover <= ack {
                    self.set_ack_state(AckState::Open);
                }
            },
            AckState::Open | AckState::Disorder => {
                self.advance(io, ack);
                self.set_ack_state(AckState::Open);
                self.congestion_ack(acked);
            },
        }
        self.dup_acks = 0;

        if self.window.outstanding() {
            let deadline = io.now + self.rtt.rto();
            self.timers.arm(TimerKind::Retransmit, deadline, io.timers);
        } else {
            self.timers.cancel(TimerKind::Retransmit, io.timers);
        }

        self.send_pending(io);
    }

    /// Move the send marks and the buffer to a new acknowledgment.
    fn advance(&mut self, io: &mut Io<'_>, ack: SeqNumber) {
        let data_end = self.data_end(io);
        self.window.first_unacked = ack;
        self.window.next_to_send = self.window.next_to_send.max(ack);
        if self.window.highest_sent < ack {
            // Only a window probe gets acknowledged beyond what was sent.
            self.window.highest_sent = ack;
            self.window.probe_outstanding = false;
        }
        io.tx.advance(ack.min(data_end));
    }

    fn congestion_ack(&mut self, acked: usize) {
        let (cwnd, ssthresh) = (self.cc.congestion_window(), self.cc.slow_start_threshold());
        self.cc.on_ack_received(acked as u32);
        self.report_windows(cwnd, ssthresh);
    }

    pub(super) fn loss_detected(&mut self, flight: usize) {
        let (cwnd, ssthresh) = (self.cc.congestion_window(), self.cc.slow_start_threshold());
        self.cc.on_loss_detected(flight as u32);
        self.report_windows(cwnd, ssthresh);
    }

    fn rtt_measured(&mut self, rtt: Duration) {
        let old = self.rtt.rto();
        self.rtt.sample(rtt);
        net_trace!("rtt sample {:?}, rto {:?}", rtt, self.rtt.rto());
        self.observers.iter_mut().for_each(|o| o.rtt_sampled(rtt));
        self.report_rto(old);
    }

    /// Process data and FIN of an acceptable segment.
    pub(super) fn received_data(&mut self, io: &mut Io<'_>, segment: &Repr, payload: &[u8]) {
        let seq = segment.seq_number;

        if payload.is_empty() {
            if segment.flags.fin() {
                if seq == io.rx.next() {
                    self.peer_close(io);
                } else {
                    net_trace!("FIN at {} beyond a gap", seq);
                    self.peer_fin = Some(seq);
                    self.send_ack(io);
                }
            }
            return;
        }

        let receiving = matches!(self.state,
            State::Established | State::FinWait1 | State::FinWait2);
        if self.fin_received || !receiving {
            net_trace!("data after the peer's FIN ignored");
            return self.send_ack(io);
        }

        self.data_started = true;
        let insert = io.rx.insert(seq, payload);
        if insert.ready > 0 && !self.shutdown_recv {
            io.app.data_available(insert.ready);
        }

        if segment.flags.fin() {
            self.peer_fin = Some(seq + payload.len());
        }
        if self.peer_fin == Some(io.rx.next()) {
            return self.peer_close(io);
        }

        let filled_gap = insert.ready > payload.len();
        if insert.gap || insert.duplicate || filled_gap || io.rx.free_space() == 0 {
            self.send_ack(io);
        } else {
            self.delay_ack(io);
        }
    }

    fn delay_ack(&mut self, io: &mut Io<'_>) {
        self.delayed_acks += 1;
        if self.delayed_acks >= self.config.delayed_ack_max {
            self.send_ack(io);
        } else {
            let deadline = io.now + self.config.delayed_ack_timeout;
            self.timers.arm_if_idle(TimerKind::DelayedAck, deadline, io.timers);
        }
    }

    /// The peer's FIN arrived in order.
    fn peer_close(&mut self, io: &mut Io<'_>) {
        if self.fin_received {
            // A retransmission, our acknowledgment got lost.
            self.send_ack(io);
            if self.state == State::TimeWait {
                self.time_wait(io);
            }
            return;
        }

        self.fin_received = true;
        self.peer_fin = Some(io.rx.next());
        net_debug!("{}:{}: peer closed", self.ports.local, self.ports.remote);
        io.app.peer_closed();

        match self.state {
            State::Established | State::SynReceived => {
                self.set_state(State::CloseWait);
                self.send_ack(io);
                if self.shutdown_send && self.fin_seq.is_none() && !self.close_on_empty {
                    self.send_fin(io);
                }
            },
            State::FinWait1 if self.fin_acked() => {
                self.send_ack(io);
                self.time_wait(io);
            },
            State::FinWait1 => {
                self.set_state(State::Closing);
                self.send_ack(io);
            },
            State::FinWait2 => {
                self.send_ack(io);
                self.time_wait(io);
            },
            _ => self.send_ack(io),
        }
    }

    /// Return whether our FIN was acknowledged.
    pub(super) fn fin_acked(&self) -> bool {
        match self.fin_seq {
            Some(fin) => fin < self.window.first_unacked,
            None => false,
        }
    }
}
