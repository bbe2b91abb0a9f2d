//! Timestamp source
//!
//! Commit timestamps come from an injected clock rather than a static
//! `Utc::now()`, so tests can pin time and replay deterministically.

use chrono::{DateTime, SecondsFormat, Utc};

/// Source of commit timestamps.
pub trait Clock: Send + Sync {
    /// Current wall-clock time, UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current time rendered the way transactions store it (RFC 3339
    /// UTC, second precision).
    fn timestamp(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a fixed instant.
///
/// Used by tests that need reproducible timestamps and hashes.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(
    /// The pinned instant
    pub DateTime<Utc>,
);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
