//! Negotiation of the window scale and timestamp options.
//!
//! Both options are offered on the SYN and are only in effect when the peer's synchronizing
//! segment carried them as well. A SYN+ACK only repeats an option the peer offered first. Without
//! the option from either side window scaling is disabled in both directions, no matter what we
//! asked for.
use crate::time::{Duration, Instant};
use crate::wire::{Repr, TcpTimestamp};

use super::Error;

/// The largest permitted shift (RFC 7323).
pub const MAX_WINDOW_SHIFT: u8 = 14;

/// Option state of one connection.
#[derive(Clone, Debug)]
pub struct Options {
    window_scaling: bool,
    timestamps: bool,
    /// The shift we offer and apply to advertised windows once negotiated.
    offered_shift: u8,
    send_scale: u8,
    recv_scale: u8,
    negotiated: bool,
    timestamp_to_echo: u32,
    peer_mss: Option<u16>,
}

impl Options {
    /// Options we are willing to negotiate.
    ///
    /// The offered shift is the smallest one that lets `max_window` describe all of
    /// `recv_buffer`.
    pub fn new(window_scaling: bool, timestamps: bool, recv_buffer: usize, max_window: u32)
        -> Self
    {
        Options {
            window_scaling,
            timestamps,
            offered_shift: window_shift(recv_buffer, max_window),
            send_scale: 0,
            recv_scale: 0,
            negotiated: false,
            timestamp_to_echo: 0,
            peer_mss: None,
        }
    }

    /// Add our options to an outgoing SYN or SYN+ACK.
    pub fn syn_options(&self, repr: &mut Repr, segment_size: usize, now: Instant) {
        repr.max_seg_size = Some(segment_size.min(u16::max_value().into()) as u16);
        if self.window_scaling {
            repr.window_scale = Some(self.offered_shift);
        }
        self.stamp(repr, now);
    }

    /// Apply the options of the peer's synchronizing segment.
    ///
    /// Returns the protocol violation found, if any. The connection proceeds either way: an
    /// out of range shift is clamped.
    pub fn process_syn(&mut self, syn: &Repr) -> Option<Error> {
        let mut violation = None;
        self.peer_mss = syn.max_seg_size.filter(|&mss| mss > 0);

        match syn.window_scale {
            Some(shift) if self.window_scaling => {
                let shift = if shift > MAX_WINDOW_SHIFT {
                    net_debug!("peer window scale {} out of range, clamped", shift);
                    violation = Some(Error::ProtocolViolation);
                    MAX_WINDOW_SHIFT
                } else {
                    shift
                };
                self.send_scale = shift;
                self.recv_scale = self.offered_shift;
            },
            _ => {
                self.window_scaling = false;
                self.send_scale = 0;
                self.recv_scale = 0;
            },
        }

        match syn.timestamp {
            Some(TcpTimestamp { value, .. }) if self.timestamps => {
                self.timestamp_to_echo = value;
            },
            _ => self.timestamps = false,
        }

        self.negotiated = true;
        violation
    }

    /// Record the timestamp of a synchronized segment.
    ///
    /// Returns the echoed value when the segment acknowledges something.
    pub fn on_segment(&mut self, repr: &Repr) -> Option<u32> {
        if !self.timestamps {
            return None;
        }
        let TcpTimestamp { value, echo } = repr.timestamp?;
        self.timestamp_to_echo = value;
        repr.ack_number.map(|_| echo)
    }

    /// Add the timestamp option to an outgoing segment, if negotiated.
    pub fn stamp(&self, repr: &mut Repr, now: Instant) {
        if self.timestamps {
            repr.timestamp = Some(TcpTimestamp {
                value: timestamp_value(now),
                echo: self.timestamp_to_echo,
            });
        }
    }

    /// Round trip time measured by an echoed timestamp.
    ///
    /// `None` if the echo lies in the future of our own clock.
    pub fn rtt_from_echo(&self, echo: u32, now: Instant) -> Option<Duration> {
        let elapsed = timestamp_value(now).wrapping_sub(echo) as i32;
        if elapsed < 0 {
            None
        } else {
            Some(Duration::from_millis(elapsed as u64))
        }
    }

    /// The shift applied to windows received from the peer.
    pub fn send_scale(&self) -> u8 {
        self.send_scale
    }

    /// The shift applied to windows we advertise.
    pub fn recv_scale(&self) -> u8 {
        self.recv_scale
    }

    /// The shift we offer on our SYN.
    pub fn offered_shift(&self) -> u8 {
        self.offered_shift
    }

    /// Window scaling is in effect, or still being offered before the handshake.
    pub fn window_scaling(&self) -> bool {
        self.window_scaling
    }

    /// Timestamps are in effect, or still being offered before the handshake.
    pub fn timestamps(&self) -> bool {
        self.timestamps
    }

    /// The peer's options have been processed.
    pub fn negotiated(&self) -> bool {
        self.negotiated
    }

    /// The value echoed in our next timestamp option.
    pub fn timestamp_to_echo(&self) -> u32 {
        self.timestamp_to_echo
    }

    /// The maximum segment size announced by the peer.
    pub fn peer_mss(&self) -> Option<u16> {
        self.peer_mss
    }
}

/// The smallest shift `s <= 14` with `buffer >> s <= max_window`.
pub fn window_shift(buffer: usize, max_window: u32) -> u8 {
    let max_window = max_window.max(1) as usize;
    (0..MAX_WINDOW_SHIFT)
        .find(|&shift| buffer >> shift <= max_window)
        .unwrap_or(MAX_WINDOW_SHIFT)
}

fn timestamp_value(now: Instant) -> u32 {
    now.total_millis() as u32
}
