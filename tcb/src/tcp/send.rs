//! Construction of outgoing segments and the sending side of the timers.
use crate::wire::{Flags, Repr, SeqNumber};

use super::Error;
use super::connection::{AckState, Connection, State};
use super::io::Io;
use super::role::Role;
use super::timer::TimerKind;

impl<R: Role> Connection<R> {
    /// The acknowledgment number we send, covering the peer's FIN once received.
    pub(super) fn ack_number(&self, io: &Io<'_>) -> SeqNumber {
        io.rx.next() + usize::from(self.fin_received)
    }

    /// One past the last byte submitted by the application.
    pub(super) fn data_end(&self, io: &Io<'_>) -> SeqNumber {
        io.tx.head() + io.tx.len()
    }

    /// Fill in the common header fields and hand the segment to the sink.
    fn transmit(&mut self, io: &mut Io<'_>, mut repr: Repr, payload: &[u8]) -> bool {
        repr.src_port = self.ports.local;
        repr.dst_port = self.ports.remote;
        repr.payload_len = payload.len() as u16;

        if repr.flags.syn() {
            repr.window_len = self.window.syn_window(io.rx.free_space());
        } else {
            let scale = self.options.recv_scale();
            repr.window_len = self.window.advertise(io.rx.free_space(), scale, io.rx.next());
            self.options.stamp(&mut repr, io.now);
        }

        if repr.ack_number.is_some() {
            // Whatever was pending is acknowledged now.
            self.delayed_acks = 0;
            self.timers.cancel(TimerKind::DelayedAck, io.timers);
        }

        net_trace!("{}:{}: send {}", self.ports.local, self.ports.remote, repr);
        self.observers.iter_mut().for_each(|o| o.segment_sent(&repr));
        io.wire.send(&repr, payload)
    }

    /// Send an empty acknowledgment.
    pub(super) fn send_ack(&mut self, io: &mut Io<'_>) {
        let mut repr = Repr::new(Flags::ACK, self.window.next_to_send);
        repr.ack_number = Some(self.ack_number(io));
        self.transmit(io, repr, &[]);
    }

    /// Send our SYN, or SYN+ACK when answering.
    ///
    /// Used for retransmissions as well, the marks are reset to right after the SYN.
    pub(super) fn send_syn(&mut self, io: &mut Io<'_>, answer: bool) {
        let isn = self.isn;
        let mut repr = Repr::new(Flags::SYN, isn);
        if answer {
            repr.flags = Flags::SYN_ACK;
            repr.ack_number = Some(io.rx.next());
        }
        self.options.syn_options(&mut repr, self.config.segment_size, io.now);
        self.transmit(io, repr, &[]);

        self.history.sent(isn, 1, io.now, self.window.highest_sent);
        self.window.next_to_send = isn + 1;
        self.window.highest_sent = self.window.highest_sent.max(isn + 1);
        let deadline = io.now + self.connect_interval;
        self.timers.arm(TimerKind::Retransmit, deadline, io.timers);
    }

    /// Reset the peer of this connection.
    pub(super) fn send_reset(&mut self, io: &mut Io<'_>) {
        let mut repr = Repr::new(Flags::RST_ACK, self.window.next_to_send);
        repr.ack_number = Some(self.ack_number(io));
        self.transmit(io, repr, &[]);
    }

    /// Answer a segment that belongs to no connection with a reset (RFC 793, page 36).
    pub(super) fn send_reset_for(&mut self, io: &mut Io<'_>, segment: &Repr, len: usize) {
        let mut repr = match segment.ack_number {
            Some(ack) => Repr::new(Flags::RST, ack),
            None => {
                let mut repr = Repr::new(Flags::RST_ACK, SeqNumber(0));
                let seq_len = len + segment.flags.sequence_len();
                repr.ack_number = Some(segment.seq_number + seq_len);
                repr
            },
        };
        repr.src_port = segment.dst_port;
        repr.dst_port = segment.src_port;

        net_trace!("{}: reset for {}", self.ports.local, segment);
        self.observers.iter_mut().for_each(|o| o.segment_sent(&repr));
        io.wire.send(&repr, &[]);
    }

    /// Whether our FIN follows the submitted data.
    fn fin_wanted(&self) -> bool {
        self.close_on_empty || self.fin_seq.is_some()
    }

    /// Send the segment at `seq` with up to `max_len` bytes, as new data or retransmission.
    ///
    /// The FIN is attached when the segment reaches the end of the data and we are closing.
    /// Does not move `next_to_send`. Returns the sequence space used.
    pub(super) fn send_data_segment(&mut self, io: &mut Io<'_>, seq: SeqNumber, max_len: usize)
        -> usize
    {
        let data_end = self.data_end(io);
        let len = io.tx.available_from(seq).min(max_len);
        let mut payload = alloc::vec![0; len];
        let len = io.tx.read(seq, &mut payload);
        payload.truncate(len);

        let fin = self.fin_wanted() && seq + len == data_end;
        let mut flags = Flags::ACK;
        flags.set_fin(fin);
        flags.set_psh(len > 0 && seq + len == data_end);

        let mut repr = Repr::new(flags, seq);
        repr.ack_number = Some(self.ack_number(io));

        let seq_len = len + usize::from(fin);
        let end = seq + seq_len;
        let highest = self.window.highest_sent;
        if seq < highest {
            let again = end.min(highest) - seq;
            self.retrans_out += again;
            net_trace!("retransmitting {} at {}", again, seq);
        }

        let accepted = self.transmit(io, repr, &payload);
        self.history.sent(seq, seq_len, io.now, highest);

        if fin && self.fin_seq.is_none() {
            self.fin_seq = Some(data_end);
            self.close_on_empty = false;
            match self.state {
                State::Established => self.set_state(State::FinWait1),
                State::CloseWait => {
                    self.set_state(State::LastAck);
                    let deadline = io.now + self.rtt.rto() * 2;
                    self.timers.arm(TimerKind::LastAck, deadline, io.timers);
                },
                _ => (),
            }
        }

        if highest < end {
            let fresh = (seq + len).saturating_sub(seq.max(highest));
            if fresh > 0 {
                self.data_started = true;
                io.app.data_sent(fresh);
            }
            self.window.highest_sent = end;
            self.window.probe_outstanding = false;
        }

        if !accepted {
            self.sink_congested();
        }

        let deadline = io.now + self.rtt.rto();
        self.timers.arm_if_idle(TimerKind::Retransmit, deadline, io.timers);
        seq_len
    }

    /// The sink refused a data segment.
    ///
    /// The segment counts as sent and is repaired like a loss. The window is reduced once, until
    /// everything sent so far is acknowledged.
    fn sink_congested(&mut self) {
        if !matches!(self.ack_state, AckState::Open | AckState::Disorder) {
            return;
        }
        let flight = self.window.bytes_in_flight();
        self.loss_detected(flight);
        let ssthresh = self.cc.slow_start_threshold();
        self.set_congestion_window(ssthresh);
        self.recover = self.window.highest_sent;
        self.set_ack_state(AckState::Cwr);
        net_debug!("segment refused, window reduced to {}", self.cc.congestion_window());
    }

    /// Send our FIN right after the data sent so far.
    pub(super) fn send_fin(&mut self, io: &mut Io<'_>) {
        self.close_on_empty = true;
        let seq = self.window.next_to_send;
        let sent = self.send_data_segment(io, seq, 0);
        self.window.next_to_send = seq + sent;
    }

    /// Send as much pending data as the windows and the sender algorithms permit.
    ///
    /// Returns the number of segments sent.
    pub(super) fn send_pending(&mut self, io: &mut Io<'_>) -> usize {
        if !matches!(self.state,
            State::Established | State::CloseWait | State::FinWait1 | State::Closing
                | State::LastAck)
        {
            return 0;
        }

        let mss = self.segment_size;
        let mut count = 0;
        loop {
            let next = self.window.next_to_send;
            let pending = io.tx.available_from(next);
            if pending == 0 || self.timers.is_armed(TimerKind::Persist) {
                break;
            }

            if self.window.peer_window() == 0 {
                if !self.window.outstanding() {
                    let deadline = io.now + self.persist_interval;
                    self.timers.arm_if_idle(TimerKind::Persist, deadline, io.timers);
                }
                break;
            }

            let window = self.available_window();
            // Silly window avoidance: no small segment while more data waits.
            if window < mss && pending > window && !self.window.half_of_max(window) {
                if !self.window.outstanding() {
                    // No acknowledgment will reopen the window, the persist timer sends.
                    let deadline = io.now + self.persist_interval;
                    self.timers.arm_if_idle(TimerKind::Persist, deadline, io.timers);
                }
                break;
            }
            // Nagle: no small segment while data is unacknowledged.
            if !self.config.no_delay && self.window.outstanding() && pending < mss {
                break;
            }

            let sent = self.send_data_segment(io, next, window.min(mss));
            self.window.next_to_send = next + sent;
            count += 1;
        }

        if self.close_on_empty
            && self.fin_seq.is_none()
            && matches!(self.state, State::Established | State::CloseWait)
            && self.window.next_to_send == self.data_end(io)
        {
            self.send_fin(io);
        }
        count
    }

    /// Retransmit the oldest unacknowledged segment.
    pub(super) fn retransmit_head(&mut self, io: &mut Io<'_>) -> usize {
        let seq = self.window.first_unacked;
        self.send_data_segment(io, seq, self.segment_size)
    }

    pub(super) fn retransmit_timeout(&mut self, io: &mut Io<'_>) {
        match self.state {
            State::SynSent | State::SynReceived => return self.retransmit_syn(io),
            State::Closed | State::Listen | State::TimeWait => return,
            _ => (),
        }

        if !self.window.outstanding() {
            return;
        }

        self.data_retries += 1;
        if self.data_retries > self.config.data_retries {
            return self.fail(io, Error::ConnectionTimedOut);
        }

        let old_rto = self.rtt.rto();
        self.rtt.backoff();
        self.report_rto(old_rto);

        let flight = self.window.bytes_in_flight();
        self.loss_detected(flight);
        let mss = self.segment_size as u32;
        self.set_congestion_window(mss);
        self.recover = self.window.highest_sent;
        self.dup_acks = 0;
        self.set_ack_state(AckState::Loss);
        self.lost_out = flight;
        self.retrans_out = 0;
        self.history.mark_all_retransmitted();
        net_debug!("retransmission timeout at {}, rto now {:?}",
            self.window.first_unacked, self.rtt.rto());

        // Go back to the oldest segment.
        self.window.next_to_send = self.window.first_unacked;
        let sent = self.retransmit_head(io);
        self.window.next_to_send = self.window.first_unacked + sent;

        let deadline = io.now + self.rtt.rto();
        self.timers.arm(TimerKind::Retransmit, deadline, io.timers);
    }

    fn retransmit_syn(&mut self, io: &mut Io<'_>) {
        if self.syn_retries_left == 0 {
            return self.fail(io, Error::ConnectionTimedOut);
        }
        self.syn_retries_left -= 1;
        self.connect_interval = self.connect_interval * 2;
        self.history.mark_all_retransmitted();
        net_debug!("retransmitting SYN, {} retries left", self.syn_retries_left);
        let answer = self.state == State::SynReceived;
        self.send_syn(io, answer);
    }

    /// Probe a zero window with a single byte.
    ///
    /// A window that is open but too small for the sender algorithms is filled instead.
    pub(super) fn persist_timeout(&mut self, io: &mut Io<'_>) {
        if !self.state.is_synchronized() {
            return;
        }

        let next = self.window.next_to_send;
        if self.window.peer_window() > 0 {
            self.persist_interval = self.config.persist_timeout;
            let window = self.available_window().min(self.segment_size);
            if window > 0 && io.tx.available_from(next) > 0 {
                net_debug!("sending {} into a small window at {}", window, next);
                let sent = self.send_data_segment(io, next, window);
                self.window.next_to_send = next + sent;
            }
            return;
        }

        let mut byte = [0u8; 1];
        if io.tx.read(next, &mut byte) == 1 {
            let mut repr = Repr::new(Flags::ACK, next);
            repr.ack_number = Some(self.ack_number(io));
            net_debug!("window probe at {}, next in {:?}", next, self.persist_interval * 2);
            self.transmit(io, repr, &byte);
            self.window.probe_outstanding = true;
        }

        self.persist_interval = (self.persist_interval * 2).min(self.config.persist_max);
        let deadline = io.now + self.persist_interval;
        self.timers.arm(TimerKind::Persist, deadline, io.timers);
    }
}
