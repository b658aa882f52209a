//! Dead-letter records for deliveries that exhausted their retries.
//!
//! A dead letter is created exactly once per (event, group) pair, after the
//! retry pipeline gives up. It references the original event by id (the
//! event itself stays durable in the log) and is held for manual operator
//! inspection. Operator resolution is an out-of-band workflow; the dispatcher
//! never reads dead letters back.

use crate::group::TargetGroup;
use crate::sequence::EventId;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from dead-letter store operations.
#[derive(Error, Debug)]
pub enum DeadLetterError {
    /// The store's backing database failed.
    #[error("Dead letter storage error: {0}")]
    Storage(String),

    /// A status string loaded from storage did not match a known status.
    #[error("Invalid dead letter status: {0}")]
    InvalidStatus(String),
}

/// Lifecycle status of a dead-letter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Awaiting operator inspection.
    Pending,
    /// An operator recovered the delivery (reprocessed or confirmed moot).
    Resolved,
    /// An operator discarded the delivery permanently.
    Discarded,
}

impl DeadLetterStatus {
    /// Convert status to its database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from its database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::InvalidStatus`] if the string doesn't match
    /// a known status.
    pub fn parse(s: &str) -> Result<Self, DeadLetterError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(DeadLetterError::InvalidStatus(s.to_string())),
        }
    }
}

/// A delivery that could not be completed after exhausting retries.
///
/// Created once, never mutated except by operator resolution.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Store-assigned identifier for this record.
    pub id: i64,

    /// The event whose delivery failed. The event itself is still in the log.
    pub event_id: EventId,

    /// The target group the push kept failing for.
    pub channel_group: TargetGroup,

    /// The last error observed before giving up.
    pub error_message: String,

    /// Number of delivery attempts made before giving up.
    pub retry_count: u32,

    /// Current status.
    pub status: DeadLetterStatus,

    /// When the delivery was abandoned.
    pub failed_at: DateTime<Utc>,
}

/// Persistent store for dead-lettered deliveries.
///
/// # Implementations
///
/// - `PostgresDeadLetterStore` (in `ordercast-postgres`): production
/// - `InMemoryDeadLetterStore` (in `ordercast-testing`): unit tests
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the retry worker can hold
/// an `Arc<dyn DeadLetterStore>`.
pub trait DeadLetterStore: Send + Sync {
    /// Record a delivery that exhausted its retries.
    ///
    /// Returns the store-assigned record id.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the insert fails.
    fn add(
        &self,
        event_id: EventId,
        channel_group: TargetGroup,
        error_message: String,
        retry_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<i64, DeadLetterError>> + Send + '_>>;

    /// List pending records, oldest first, capped at `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails.
    fn list_pending(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DeadLetter>, DeadLetterError>> + Send + '_>>;

    /// Count of pending records, for monitoring and health checks.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails.
    fn count_pending(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<u64, DeadLetterError>> + Send + '_>>;

    /// Mark a record resolved by an operator.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the update fails.
    fn mark_resolved(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>>;

    /// Mark a record permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the update fails.
    fn mark_discarded(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in &[
            DeadLetterStatus::Pending,
            DeadLetterStatus::Resolved,
            DeadLetterStatus::Discarded,
        ] {
            let s = status.as_str();
            let parsed = DeadLetterStatus::parse(s).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn status_invalid() {
        assert!(DeadLetterStatus::parse("processing").is_err());
        assert!(DeadLetterStatus::parse("").is_err());
    }
}
