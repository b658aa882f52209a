//! Clock abstraction for testable timestamps.
//!
//! Event timestamps are informational (sequence numbers order the log), but
//! tests still want deterministic time. Implementations: [`SystemClock`]
//! here, `FixedClock` in `ordercast-testing`.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
pub trait Clock: Send + Sync {
    /// Get the current time.
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
