//! The logical clock of the host.
//!
//! Nothing in the crate reads a wall clock. The host passes the current [`Instant`] with every
//! event and every deadline is derived from it, so a simulation on a virtual clock behaves
//! exactly like a run on a real one. Relative time is core's [`Duration`], truncated to whole
//! milliseconds where it meets an `Instant`.
//!
//! [`Instant`]: struct.Instant.html
//! [`Duration`]: https://doc.rust-lang.org/core/time/struct.Duration.html
use core::{fmt, ops};
use core::convert::TryFrom;
pub use core::time::Duration;

/// A point on the host clock, in milliseconds since an arbitrary origin.
///
/// Negative values lie before the origin, which is fine as long as the clock is monotonic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant {
    /// Milliseconds since the origin.
    pub millis: i64,
}

/// A deadline that may be absent.
///
/// Ordered like the instants it carries, with `Never` after all of them, so the earliest of
/// several deadlines is simply their minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Expiration {
    /// Expires at the given instant.
    When(Instant),
    /// Never expires.
    Never,
}

impl Instant {
    /// The origin of the clock.
    pub const ZERO: Instant = Instant { millis: 0 };

    /// The instant `millis` milliseconds after the origin.
    pub fn from_millis<T: Into<i64>>(millis: T) -> Instant {
        Instant { millis: millis.into() }
    }

    /// The instant `secs` seconds after the origin.
    pub fn from_secs<T: Into<i64>>(secs: T) -> Instant {
        Instant { millis: secs.into() * 1000 }
    }

    /// Milliseconds since the origin.
    pub fn total_millis(&self) -> i64 {
        self.millis
    }

    /// The time elapsed from `earlier` to `self`, zero if `earlier` is in the future.
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        let elapsed = self.millis.saturating_sub(earlier.millis).max(0);
        Duration::from_millis(elapsed as u64)
    }

    fn offset(self, delta: Duration, sign: i64) -> Instant {
        let delta = i64::try_from(delta.as_millis()).unwrap_or(i64::max_value());
        Instant { millis: self.millis.saturating_add(sign.saturating_mul(delta)) }
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sign = if self.millis < 0 { "-" } else { "" };
        let abs = self.millis.unsigned_abs();
        write!(f, "{}{}.{:03}s", sign, abs / 1000, abs % 1000)
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        self.offset(rhs, 1)
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        self.offset(rhs, -1)
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        self.duration_since(rhs)
    }
}

impl Expiration {
    /// The deadline, if there is one.
    pub fn instant(self) -> Option<Instant> {
        self.into()
    }

    /// Return whether the deadline passed at `now`.
    pub fn is_due(self, now: Instant) -> bool {
        match self {
            Expiration::When(at) => at <= now,
            Expiration::Never => false,
        }
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Expiration::Never
    }
}

impl From<Option<Instant>> for Expiration {
    fn from(opt: Option<Instant>) -> Self {
        opt.map_or(Expiration::Never, Expiration::When)
    }
}

impl From<Expiration> for Option<Instant> {
    fn from(expiration: Expiration) -> Self {
        match expiration {
            Expiration::When(instant) => Some(instant),
            Expiration::Never => None,
        }
    }
}
