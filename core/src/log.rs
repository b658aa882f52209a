//! Event log trait and read-path types.
//!
//! This module defines the core abstraction for the append-only event log,
//! the system's only component with real ordering and durability guarantees.
//!
//! # Design
//!
//! The `EventLog` trait is deliberately minimal:
//!
//! - Append one event, atomically assigning its sequence number
//! - Read forward from a cursor (replay), by aggregate, or by type
//!
//! The log exclusively owns event records and their sequence numbers; no
//! other component may assign or mutate a sequence number. Appends are
//! mutually exclusive at the assignment step, enforced by the storage layer
//! (a database sequence inside the insert transaction, or a single mutex for
//! the in-memory log) rather than external locking.
//!
//! # Implementations
//!
//! - `PostgresEventLog` (in `ordercast-postgres`): production implementation
//! - `InMemoryEventLog` (in `ordercast-testing`): fast, deterministic testing
//!
//! # Cursor resolution
//!
//! Read paths accept an optional cursor (the last event id the caller saw).
//! An unknown cursor (expired or never existed) does not fail the call: it
//! degrades to a bounded recent window (see [`CursorResolution`]) and the
//! caller detects the possible gap by comparing the first returned sequence
//! number against its own last-seen position.

use crate::event::{EventRecord, EventType, NewEvent};
use crate::sequence::EventId;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Default recent-window used when a replay cursor cannot be resolved.
///
/// The window is deliberately bounded (not silently infinite): a client whose
/// gap exceeds it must reconcile via a full state refresh.
pub const DEFAULT_FALLBACK_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors that can occur during event log operations.
#[derive(Error, Debug)]
pub enum EventLogError {
    /// Payload or metadata could not be serialized. The event was never
    /// appended; surfaced synchronously to the producer.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The append (or read) failed at the storage layer. Fatal for that
    /// call; the caller must not assume the event was persisted.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<crate::event::EventError> for EventLogError {
    fn from(err: crate::event::EventError) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A caller-requested read size, clamped to the hard maximum.
///
/// Read paths are bounded both by the caller's request and by
/// [`ReadLimit::HARD_MAX`] to protect memory.
///
/// # Examples
///
/// ```
/// use ordercast_core::log::ReadLimit;
///
/// assert_eq!(ReadLimit::new(50).value(), 50);
/// assert_eq!(ReadLimit::new(1_000_000).value(), ReadLimit::HARD_MAX);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadLimit(usize);

impl ReadLimit {
    /// Hard maximum number of events a single read may return.
    pub const HARD_MAX: usize = 1000;

    /// Default limit used when the caller does not specify one.
    pub const DEFAULT: Self = Self(100);

    /// Create a limit, clamping to `1..=HARD_MAX`.
    #[must_use]
    pub const fn new(requested: usize) -> Self {
        if requested == 0 {
            Self(1)
        } else if requested > Self::HARD_MAX {
            Self(Self::HARD_MAX)
        } else {
            Self(requested)
        }
    }

    /// The largest permitted limit.
    #[must_use]
    pub const fn max() -> Self {
        Self(Self::HARD_MAX)
    }

    /// Get the effective limit value.
    #[must_use]
    pub const fn value(self) -> usize {
        self.0
    }
}

impl Default for ReadLimit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// How a replay cursor was resolved by a read path.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CursorResolution {
    /// The cursor was found; the batch starts strictly after it.
    Exact,
    /// The cursor was absent and there was no position to resolve: the batch
    /// starts at the beginning of the log (bounded by the limit).
    FromStart,
    /// The cursor was unknown (expired or never existed); the batch is a
    /// bounded recent window and the client may have a gap to reconcile.
    FallbackWindow,
}

impl CursorResolution {
    /// Whether the client should check for a gap before trusting the batch.
    #[must_use]
    pub const fn is_fallback(self) -> bool {
        matches!(self, Self::FallbackWindow)
    }
}

/// The result of a cursor-based read: events in ascending sequence order
/// plus the resolution outcome the client needs for gap detection.
#[derive(Clone, Debug)]
pub struct ReplayBatch {
    /// Events in ascending sequence order, capped at the effective limit.
    pub events: Vec<EventRecord>,

    /// How the cursor was resolved.
    pub resolution: CursorResolution,
}

impl ReplayBatch {
    /// An empty batch with the given resolution.
    #[must_use]
    pub const fn empty(resolution: CursorResolution) -> Self {
        Self {
            events: Vec::new(),
            resolution,
        }
    }
}

/// Append-only, strictly-ordered storage of immutable event records.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the dispatcher and replay
/// coordinator share one log behind an `Arc<dyn EventLog>`.
///
/// # Ordering guarantees
///
/// - Sequence numbers are dense, strictly increasing, never reused
/// - Given A.sequence < B.sequence, A became durable strictly before B was
///   assigned its number; no event is observable out of its sequence
/// - Every read path returns ascending sequence order
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` to enable trait object usage (`Arc<dyn EventLog>`), which the
/// dispatcher and retry worker rely on.
pub trait EventLog: Send + Sync {
    /// Append an event, atomically assigning the next sequence number.
    ///
    /// The sequence assignment and the durability of the record are one
    /// atomic unit: no two concurrent appends receive the same number, and a
    /// crash between assignment and write must not leave a hole visible to
    /// readers. The record is immediately visible to all read paths in
    /// order.
    ///
    /// # Errors
    ///
    /// - [`EventLogError::Serialization`]: payload/metadata not storable;
    ///   nothing was appended
    /// - [`EventLogError::Storage`]: the append failed; the caller must
    ///   treat the event as not persisted
    fn append(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = Result<EventRecord, EventLogError>> + Send + '_>>;

    /// Load a single event by its external id.
    ///
    /// Used by the retry pipeline, which stores only the event id and
    /// reloads the record for each attempt.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] if the lookup fails. An unknown id
    /// is `Ok(None)`, not an error.
    fn get(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EventRecord>, EventLogError>> + Send + '_>>;

    /// Read events strictly after the cursor, in ascending sequence order.
    ///
    /// `None` reads from the start of the log. An unknown cursor degrades to
    /// the fallback window (see [`CursorResolution::FallbackWindow`]) rather
    /// than failing; replaying callers must tolerate a possible gap and
    /// reconcile via full-state refresh when they detect one.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] if the read fails.
    fn read_since(
        &self,
        cursor: Option<EventId>,
        limit: ReadLimit,
    ) -> Pin<Box<dyn Future<Output = Result<ReplayBatch, EventLogError>> + Send + '_>>;

    /// Read events for one aggregate, optionally after a cursor.
    ///
    /// Same ordering and cursor-resolution rules as [`EventLog::read_since`],
    /// scoped to `aggregate_type`/`aggregate_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] if the read fails.
    fn read_by_aggregate(
        &self,
        aggregate_type: String,
        aggregate_id: String,
        cursor: Option<EventId>,
        limit: ReadLimit,
    ) -> Pin<Box<dyn Future<Output = Result<ReplayBatch, EventLogError>> + Send + '_>>;

    /// Read events of one type, optionally after a cursor.
    ///
    /// Same ordering and cursor-resolution rules as [`EventLog::read_since`],
    /// scoped to `event_type`.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] if the read fails.
    fn read_by_type(
        &self,
        event_type: EventType,
        cursor: Option<EventId>,
        limit: ReadLimit,
    ) -> Pin<Box<dyn Future<Output = Result<ReplayBatch, EventLogError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_limit_clamps() {
        assert_eq!(ReadLimit::new(0).value(), 1);
        assert_eq!(ReadLimit::new(10).value(), 10);
        assert_eq!(ReadLimit::new(ReadLimit::HARD_MAX + 1).value(), ReadLimit::HARD_MAX);
        assert_eq!(ReadLimit::default().value(), 100);
    }

    #[test]
    fn fallback_is_detectable() {
        assert!(CursorResolution::FallbackWindow.is_fallback());
        assert!(!CursorResolution::Exact.is_fallback());
        assert!(!CursorResolution::FromStart.is_fallback());
    }

    #[test]
    fn storage_error_display() {
        let err = EventLogError::Storage("connection refused".to_string());
        assert!(format!("{err}").contains("connection refused"));
    }

    #[test]
    fn serialization_error_from_event_error() {
        let event_err = crate::event::EventError::Serialization("bad value".to_string());
        let log_err: EventLogError = event_err.into();
        assert!(matches!(log_err, EventLogError::Serialization(_)));
    }
}
