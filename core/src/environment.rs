//! Environment traits injected into the reservation core.
//!
//! Time is the only ambient dependency the engines read directly; everything else
//! arrives through the repository, lock store, and provider contracts.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use raffle_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let before = clock.now();
/// assert!(clock.now() >= before);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Convert a configuration duration into a chrono delta, saturating on overflow.
#[must_use]
pub fn to_delta(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
}

/// `at + duration`, saturating at the maximum representable instant.
#[must_use]
pub fn add_duration(at: DateTime<Utc>, duration: std::time::Duration) -> DateTime<Utc> {
    at.checked_add_signed(to_delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
