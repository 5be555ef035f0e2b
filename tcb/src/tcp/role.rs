//! The role a connection plays for the layer above it.
//!
//! A plain connection stands on its own. A subflow is one path of a multi-path connection: it
//! needs a key and token once its handshake completes and it must not send beyond the window of
//! the connection-level stream it belongs to. Only these two steps differ, so a role is a small
//! set of hooks with default implementations.
use crate::wire::SeqNumber;

use super::isn::KeyService;
use super::window::Window;

/// Hooks that specialize a connection.
pub trait Role {
    /// The handshake completed.
    fn handshake_completed(&mut self, window: &Window, keys: &dyn KeyService) {
        let _ = (window, keys);
    }

    /// Interpret a window field received from the peer.
    fn peer_window(&self, raw: u16, shift: u8) -> u32 {
        u32::from(raw) << shift
    }
}

/// A standalone connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Plain;

impl Role for Plain { }

/// One subflow of a multi-path connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Subflow {
    local_key: Option<u64>,
    token: Option<u32>,
    meta_window: Option<u32>,
    start: Option<SeqNumber>,
}

impl Subflow {
    /// A subflow that has not completed its handshake.
    pub fn new() -> Self {
        Subflow::default()
    }

    /// Our key, chosen when the handshake completed.
    pub fn local_key(&self) -> Option<u64> {
        self.local_key
    }

    /// The token naming our key.
    pub fn token(&self) -> Option<u32> {
        self.token
    }

    /// First unacknowledged sequence number when the subflow became established.
    pub fn start(&self) -> Option<SeqNumber> {
        self.start
    }

    /// Return whether the handshake completed.
    pub fn is_established(&self) -> bool {
        self.start.is_some()
    }

    /// Limit the peer window by the window of the connection-level stream.
    pub fn set_meta_window(&mut self, window: Option<u32>) {
        self.meta_window = window;
    }

    /// The current connection-level limit.
    pub fn meta_window(&self) -> Option<u32> {
        self.meta_window
    }
}

impl Role for Subflow {
    fn handshake_completed(&mut self, window: &Window, keys: &dyn KeyService) {
        let key = *self.local_key.get_or_insert_with(|| keys.unique_key());
        self.token = Some(keys.token(key));
        self.start = Some(window.first_unacked);
        net_debug!("subflow established, token {:08x}", keys.token(key));
    }

    fn peer_window(&self, raw: u16, shift: u8) -> u32 {
        let window = u32::from(raw) << shift;
        match self.meta_window {
            Some(meta) => window.min(meta),
            None => window,
        }
    }
}
