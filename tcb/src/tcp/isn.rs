//! Initial sequence number and key generation, as recommended by rfc6528.
//!
//! Uses a keyed cryptographic hash function (SipHash-2-4) instead of appending the secret key to
//! the port pair for hashing. That should be better anyways. Hash function SipHash-2-4 from:
//!
//! > SipHash: a fast short-input PRF, Jean-Philippe Aumasson and Daniel J. Bernstein
//!
//! The same keyed hash also produces the unique connection keys and the tokens derived from them
//! that a multi-path layer uses to name its subflows.
use core::cell::Cell;

use crate::time::Instant;
use crate::wire::SeqNumber;

use super::connection::Ports;

/// The source of initial sequence numbers and connection keys.
///
/// Injected into each connection, usually shared by all connections of a host.
pub trait KeyService {
    /// The initial sequence number for a new connection.
    fn initial_seq(&self, ports: Ports, now: Instant) -> SeqNumber;

    /// A fresh key, never returned before by this service.
    fn unique_key(&self) -> u64;

    /// The short token that names a key.
    fn token(&self, key: u64) -> u32;
}

/// A `KeyService` keyed with a secret 128-bit key.
pub struct IsnGenerator {
    keys: (u64, u64),
    counter: Cell<u64>,
}

// Yes, that's the initial values.
const IV: [&[u8; 8]; 4] = [
    b"somepseu",
    b"dorandom",
    b"lygenera",
    b"tedbytes"];

struct State {
    v0: u64,
    v1: u64,
    v2: u64,
    v3: u64,
}

impl IsnGenerator {
    /// A generator with the given secret.
    pub fn new(k0: u64, k1: u64) -> Self {
        IsnGenerator {
            keys: (k0, k1),
            counter: Cell::new(0),
        }
    }

    /// Hash a single 64-bit word.
    pub fn hash(&self, m: u64) -> u64 {
        let mut state = State::init(self.keys.0, self.keys.1);
        state.absorb(m);
        // Message length = 8
        state.absorb(8_u64 << 56);
        state.finalize()
    }
}

impl KeyService for IsnGenerator {
    /// Get the initial sequence number for a connection.
    ///
    /// The value advances every 4µs of the host clock and varies with the secret key.
    fn initial_seq(&self, ports: Ports, now: Instant) -> SeqNumber {
        let mut state = State::init(self.keys.0, self.keys.1);
        let p = u64::from(ports.local)
            | u64::from(ports.remote) << 16
            // Message length = 4
            | 4_u64 << 56;
        state.absorb(p);
        let hash = state.finalize();

        let ticks = now.total_millis().wrapping_mul(250) as u32;
        SeqNumber::from_wire((hash as u32).wrapping_add(ticks))
    }

    fn unique_key(&self) -> u64 {
        let count = self.counter.get();
        self.counter.set(count.wrapping_add(1));
        self.hash(count)
    }

    fn token(&self, key: u64) -> u32 {
        (self.hash(key) >> 32) as u32
    }
}

impl State {
    const SIP_C: usize = 2;
    const SIP_D: usize = 4;

    fn init(k0: u64, k1: u64) -> Self {
        State {
            v0: u64::from_be_bytes(*IV[0]) ^ k0,
            v1: u64::from_be_bytes(*IV[1]) ^ k1,
            v2: u64::from_be_bytes(*IV[2]) ^ k0,
            v3: u64::from_be_bytes(*IV[3]) ^ k1,
        }
    }

    fn round(&mut self) {
        self.v0 = self.v0.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(13);
        self.v1 ^= self.v0;
        self.v0 = self.v0.rotate_left(32);
        self.v2 = self.v2.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(16);
        self.v3 ^= self.v2;
        self.v0 = self.v0.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(21);
        self.v3 ^= self.v0;
        self.v2 = self.v2.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(17);
        self.v1 ^= self.v2;
        self.v2 = self.v2.rotate_left(32);
    }

    /// Process a single portion of the message.
    fn absorb(&mut self, m: u64) {
        self.v3 ^= m;
        (0..Self::SIP_C).for_each(|_| self.round());
        self.v0 ^= m;
    }

    fn finalize(mut self) -> u64 {
        self.v2 ^= 0xff;
        (0..Self::SIP_D).for_each(|_| self.round());
        self.v0 ^ self.v1 ^ self.v2 ^ self.v3
    }
}
