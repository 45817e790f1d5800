//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest whole-second span a `chrono::Duration` can hold.
const MAX_DURATION_SECS: i64 = i64::MAX / 1_000;

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Checks if this timestamp lies in the past relative to `Timestamp::now()`.
    pub fn has_passed(&self) -> bool {
        self.0 < Utc::now()
    }

    /// Returns the duration from another timestamp to this one.
    ///
    /// Returns negative duration if other is after self.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Returns how long until this timestamp, or zero if it already passed.
    pub fn remaining(&self) -> std::time::Duration {
        self.duration_since(&Timestamp::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }

    /// Creates a new timestamp by adding the specified number of seconds.
    ///
    /// Saturates at the representable range instead of overflowing.
    pub fn plus_secs(&self, secs: u64) -> Self {
        self.shifted(Duration::seconds(clamp_secs(secs)))
    }

    /// Creates a new timestamp by subtracting the specified number of seconds.
    pub fn minus_secs(&self, secs: u64) -> Self {
        self.shifted(-Duration::seconds(clamp_secs(secs)))
    }

    /// Creates a new timestamp by adding the specified number of milliseconds.
    pub fn plus_millis(&self, millis: i64) -> Self {
        self.shifted(Duration::milliseconds(millis.max(-i64::MAX)))
    }

    /// Creates a new timestamp by adding the specified number of hours.
    ///
    /// Negative values subtract hours.
    pub fn plus_hours(&self, hours: i64) -> Self {
        let secs = hours.saturating_mul(3_600).clamp(-MAX_DURATION_SECS, MAX_DURATION_SECS);
        self.shifted(Duration::seconds(secs))
    }

    fn shifted(&self, delta: Duration) -> Self {
        match self.0.checked_add_signed(delta) {
            Some(moved) => Self(moved),
            None if delta < Duration::zero() => Self(DateTime::<Utc>::MIN_UTC),
            None => Self(DateTime::<Utc>::MAX_UTC),
        }
    }
}

fn clamp_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).min(MAX_DURATION_SECS)
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
