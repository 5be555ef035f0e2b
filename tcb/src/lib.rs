//! The connection core of a reliable, ordered byte-stream transport.
//!
//! ## Table of contents
//!
//! 1. [Design](#design-and-relevant-core-concepts)
//! 2. [The wire module](wire/index.html)
//! 3. [The connection endpoint](tcp/index.html)
//!    1. [State machine](tcp/struct.Connection.html)
//!    1. [Window bookkeeping](tcp/window/index.html)
//!    1. [Round trip estimation](tcp/rtt/index.html)
//!    1. [Timers](tcp/timer/index.html)
//!    1. [Options](tcp/options/index.html)
//! 4. Internals
//!    1. [The storage module](storage/index.html)
//!
//! ## Design and relevant core concepts
//!
//! A [`Connection`] is a single transport endpoint. It does not own a socket, an address, a
//! network interface or a clock. Everything it talks to is handed in for the duration of one
//! event through an [`Io`] bundle: the host's current time, a timer scheduler, a segment sink, the
//! send and receive byte buffers and the upward notification interface. An event is processed to
//! completion before the call returns and nothing inside ever blocks, so a host can drive any
//! number of connections from a single loop.
//!
//! The congestion control algorithm is a strategy object behind the
//! [`CongestionControl`](tcp/trait.CongestionControl.html) trait and the generation of initial
//! sequence numbers is an injected [`KeyService`](tcp/trait.KeyService.html). Changes to the
//! quantities a host usually wants to trace (state, congestion window, acknowledgment state) are
//! pushed to an explicit list of [`Observer`](tcp/trait.Observer.html)s.
//!
//! [`Connection`]: tcp/struct.Connection.html
//! [`Io`]: tcp/struct.Io.html
#![warn(missing_docs)]
#![warn(unreachable_pub)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

extern crate alloc;

#[macro_use] mod macros;
pub mod storage;
pub mod tcp;
pub mod time;
pub mod wire;
