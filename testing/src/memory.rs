//! In-memory `EventLog` and `DeadLetterStore` implementations.
//!
//! The in-memory log keeps the same guarantees as the production store in
//! miniature: a single mutex is the append serialization point, so sequence
//! assignment and visibility are one atomic unit, and every read path
//! returns ascending sequence order.

use chrono::Duration as ChronoDuration;
use ordercast_core::clock::{Clock, SystemClock};
use ordercast_core::dead_letter::{DeadLetter, DeadLetterError, DeadLetterStatus, DeadLetterStore};
use ordercast_core::event::{EventRecord, EventType, NewEvent};
use ordercast_core::group::TargetGroup;
use ordercast_core::log::{
    CursorResolution, DEFAULT_FALLBACK_WINDOW, EventLog, EventLogError, ReadLimit, ReplayBatch,
};
use ordercast_core::sequence::{EventId, SequenceNumber};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::Mutex;

struct LogInner {
    events: Vec<EventRecord>,
    next_sequence: u64,
}

/// In-memory, mutex-serialized event log for tests.
///
/// Appends are mutually exclusive under one lock, so concurrently issued
/// appends always receive dense, strictly increasing sequence numbers, the
/// same invariant the Postgres implementation gets from its append lock.
///
/// Storage failures can be injected with [`InMemoryEventLog::set_fail_appends`]
/// to exercise the producer-facing error path.
pub struct InMemoryEventLog {
    inner: Mutex<LogInner>,
    clock: Arc<dyn Clock>,
    fallback_window: ChronoDuration,
    fail_appends: AtomicBool,
}

impl InMemoryEventLog {
    /// Create a log with the system clock and the default fallback window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a log with an injected clock (usually [`crate::FixedClock`]).
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                events: Vec::new(),
                next_sequence: 1,
            }),
            clock,
            fallback_window: ChronoDuration::from_std(DEFAULT_FALLBACK_WINDOW)
                .unwrap_or_else(|_| ChronoDuration::hours(24)),
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Override the recent-window used when a cursor cannot be resolved.
    #[must_use]
    pub fn with_fallback_window(mut self, window: std::time::Duration) -> Self {
        self.fallback_window =
            ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(24));
        self
    }

    /// Make every subsequent append fail with a storage error.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Number of events currently in the log.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.events.is_empty()
    }

    /// Resolve a cursor against the full log and collect matching events.
    ///
    /// `scope` filters the candidate events (aggregate or type scoping);
    /// cursor resolution always runs against the unscoped log, since the
    /// cursor names a position, not a filtered stream.
    fn collect<F>(
        inner: &LogInner,
        cursor: Option<EventId>,
        limit: ReadLimit,
        now: chrono::DateTime<chrono::Utc>,
        window: ChronoDuration,
        scope: F,
    ) -> ReplayBatch
    where
        F: Fn(&EventRecord) -> bool,
    {
        let (after, resolution) = match cursor {
            None => (None, CursorResolution::FromStart),
            Some(id) => match inner.events.iter().find(|e| e.event_id == id) {
                Some(found) => (Some(found.sequence), CursorResolution::Exact),
                None => (None, CursorResolution::FallbackWindow),
            },
        };

        let cutoff = now - window;
        let events: Vec<EventRecord> = inner
            .events
            .iter()
            .filter(|e| match resolution {
                CursorResolution::Exact => {
                    after.is_some_and(|seq| e.sequence > seq)
                }
                CursorResolution::FromStart => true,
                CursorResolution::FallbackWindow => e.timestamp >= cutoff,
            })
            .filter(|e| scope(e))
            .take(limit.value())
            .cloned()
            .collect();

        ReplayBatch { events, resolution }
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = Result<EventRecord, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(EventLogError::Storage(
                    "injected append failure".to_string(),
                ));
            }

            let mut inner = self.inner.lock().await;
            let sequence = SequenceNumber::new(inner.next_sequence);
            inner.next_sequence += 1;

            let record = EventRecord {
                event_id: EventId::generate(),
                sequence,
                event_type: event.event_type,
                version: event.version,
                aggregate_type: event.aggregate_type,
                aggregate_id: event.aggregate_id,
                payload: event.payload,
                metadata: event.metadata,
                timestamp: self.clock.now(),
            };
            inner.events.push(record.clone());
            Ok(record)
        })
    }

    fn get(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EventRecord>, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner
                .events
                .iter()
                .find(|e| e.event_id == event_id)
                .cloned())
        })
    }

    fn read_since(
        &self,
        cursor: Option<EventId>,
        limit: ReadLimit,
    ) -> Pin<Box<dyn Future<Output = Result<ReplayBatch, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(Self::collect(
                &inner,
                cursor,
                limit,
                self.clock.now(),
                self.fallback_window,
                |_| true,
            ))
        })
    }

    fn read_by_aggregate(
        &self,
        aggregate_type: String,
        aggregate_id: String,
        cursor: Option<EventId>,
        limit: ReadLimit,
    ) -> Pin<Box<dyn Future<Output = Result<ReplayBatch, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(Self::collect(
                &inner,
                cursor,
                limit,
                self.clock.now(),
                self.fallback_window,
                |e| e.aggregate_type == aggregate_type && e.aggregate_id == aggregate_id,
            ))
        })
    }

    fn read_by_type(
        &self,
        event_type: EventType,
        cursor: Option<EventId>,
        limit: ReadLimit,
    ) -> Pin<Box<dyn Future<Output = Result<ReplayBatch, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(Self::collect(
                &inner,
                cursor,
                limit,
                self.clock.now(),
                self.fallback_window,
                |e| e.event_type == event_type,
            ))
        })
    }
}

/// In-memory dead-letter store for tests.
///
/// Keeps every record so tests can assert on exactly what was dead-lettered.
pub struct InMemoryDeadLetterStore {
    records: Mutex<Vec<DeadLetter>>,
    next_id: AtomicI64,
}

impl InMemoryDeadLetterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Snapshot of all records, in insertion order.
    pub async fn all(&self) -> Vec<DeadLetter> {
        self.records.lock().await.clone()
    }

    /// How many records exist for one (event, group) pair.
    pub async fn count_for(&self, event_id: EventId, group: TargetGroup) -> usize {
        self.records
            .lock()
            .await
            .iter()
            .filter(|d| d.event_id == event_id && d.channel_group == group)
            .count()
    }
}

impl Default for InMemoryDeadLetterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadLetterStore for InMemoryDeadLetterStore {
    fn add(
        &self,
        event_id: EventId,
        channel_group: TargetGroup,
        error_message: String,
        retry_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<i64, DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut records = self.records.lock().await;
            records.push(DeadLetter {
                id,
                event_id,
                channel_group,
                error_message,
                retry_count,
                status: DeadLetterStatus::Pending,
                failed_at: chrono::Utc::now(),
            });
            Ok(id)
        })
    }

    fn list_pending(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DeadLetter>, DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            let records = self.records.lock().await;
            Ok(records
                .iter()
                .filter(|d| d.status == DeadLetterStatus::Pending)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn count_pending(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<u64, DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            let records = self.records.lock().await;
            Ok(records
                .iter()
                .filter(|d| d.status == DeadLetterStatus::Pending)
                .count() as u64)
        })
    }

    fn mark_resolved(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            match records.iter_mut().find(|d| d.id == id) {
                Some(record) => {
                    record.status = DeadLetterStatus::Resolved;
                    Ok(())
                }
                None => Err(DeadLetterError::Storage(format!(
                    "no dead letter with id {id}"
                ))),
            }
        })
    }

    fn mark_discarded(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            match records.iter_mut().find(|d| d.id == id) {
                Some(record) => {
                    record.status = DeadLetterStatus::Discarded;
                    Ok(())
                }
                None => Err(DeadLetterError::Storage(format!(
                    "no dead letter with id {id}"
                ))),
            }
        })
    }
}
