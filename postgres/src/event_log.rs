//! `PostgreSQL` implementation of the append-only event log.
//!
//! # Sequence assignment
//!
//! Appends run inside a transaction holding a transaction-scoped advisory
//! lock, and the new sequence number is computed as `MAX(sequence) + 1`
//! inside that transaction. The lock is the single serialization point:
//! concurrent appends queue behind it, so assigned numbers are dense and
//! strictly increasing even across process crashes (an aborted transaction
//! never consumes a number, unlike a `BIGSERIAL` column).
//!
//! # Cursor resolution
//!
//! A replay cursor is resolved to its sequence number first; reads then
//! filter on `sequence >` which uses the primary key index. An unknown
//! cursor degrades to a `created_at` window rather than failing the read.

use chrono::Utc;
use ordercast_core::event::{EventRecord, EventType, NewEvent};
use ordercast_core::log::{
    CursorResolution, DEFAULT_FALLBACK_WINDOW, EventLog, EventLogError, ReadLimit, ReplayBatch,
};
use ordercast_core::sequence::{EventId, SequenceNumber};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Advisory lock key serializing appends. Arbitrary but stable.
const APPEND_LOCK_KEY: i64 = 0x6f72_6463_6173_7431; // "ordcast1"

const SELECT_COLUMNS: &str = "sequence, event_id, event_type, event_version, \
     aggregate_type, aggregate_id, payload, metadata, created_at";

/// Production event log backed by `PostgreSQL`.
///
/// # Example
///
/// ```no_run
/// use ordercast_postgres::PostgresEventLog;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = PostgresEventLog::new("postgres://localhost/ordercast").await?;
/// # Ok(())
/// # }
/// ```
pub struct PostgresEventLog {
    pool: PgPool,
    fallback_window: Duration,
}

impl PostgresEventLog {
    /// Connect to the database and create an event log.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, EventLogError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| EventLogError::Storage(e.to_string()))?;
        Ok(Self::from_pool(pool))
    }

    /// Create an event log over an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            fallback_window: DEFAULT_FALLBACK_WINDOW,
        }
    }

    /// Override the recent-window used when a cursor cannot be resolved.
    #[must_use]
    pub const fn with_fallback_window(mut self, window: Duration) -> Self {
        self.fallback_window = window;
        self
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Resolve a cursor to the sequence number reads start after.
    ///
    /// Returns the exclusive lower bound (0 means from the start) or, for an
    /// unknown cursor, `None` with the fallback resolution so the caller
    /// switches to the window query.
    async fn resolve_cursor(
        &self,
        cursor: Option<EventId>,
    ) -> Result<(Option<i64>, CursorResolution), EventLogError> {
        let Some(cursor) = cursor else {
            return Ok((Some(0), CursorResolution::FromStart));
        };

        let row: Option<(i64,)> = sqlx::query_as("SELECT sequence FROM events WHERE event_id = $1")
            .bind(cursor.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EventLogError::Storage(e.to_string()))?;

        match row {
            Some((sequence,)) => Ok((Some(sequence), CursorResolution::Exact)),
            None => {
                tracing::debug!(cursor = %cursor, "Unknown replay cursor, using fallback window");
                metrics::counter!("ordercast_cursor_fallbacks_total").increment(1);
                Ok((None, CursorResolution::FallbackWindow))
            }
        }
    }

    /// Run one of the scoped read queries after cursor resolution.
    ///
    /// `scope_sql` is an extra `AND` predicate (may be empty); `binder`
    /// attaches its bind values after the positional cursor/limit binds.
    async fn read_scoped(
        &self,
        cursor: Option<EventId>,
        limit: ReadLimit,
        scope_sql: &str,
        scope_binds: &[&str],
    ) -> Result<ReplayBatch, EventLogError> {
        let (after, resolution) = self.resolve_cursor(cursor).await?;

        #[allow(clippy::cast_possible_wrap)] // Limit is clamped to 1000
        let limit = limit.value() as i64;

        let rows = match after {
            Some(after) => {
                let sql = format!(
                    "SELECT {SELECT_COLUMNS} FROM events \
                     WHERE sequence > $1{scope_sql} \
                     ORDER BY sequence ASC LIMIT $2"
                );
                let mut query = sqlx::query(&sql).bind(after).bind(limit);
                for bind in scope_binds {
                    query = query.bind(*bind);
                }
                query.fetch_all(&self.pool).await
            }
            None => {
                let window = chrono::Duration::from_std(self.fallback_window)
                    .unwrap_or_else(|_| chrono::Duration::hours(24));
                let cutoff = Utc::now() - window;
                let sql = format!(
                    "SELECT {SELECT_COLUMNS} FROM events \
                     WHERE created_at >= $1{scope_sql} \
                     ORDER BY sequence ASC LIMIT $2"
                );
                let mut query = sqlx::query(&sql).bind(cutoff).bind(limit);
                for bind in scope_binds {
                    query = query.bind(*bind);
                }
                query.fetch_all(&self.pool).await
            }
        }
        .map_err(|e| EventLogError::Storage(e.to_string()))?;

        let events = rows
            .iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ReplayBatch { events, resolution })
    }
}

fn row_to_record(row: &PgRow) -> Result<EventRecord, EventLogError> {
    let sequence: i64 = row.get("sequence");
    let event_id: uuid::Uuid = row.get("event_id");
    let event_type: String = row.get("event_type");

    #[allow(clippy::cast_sign_loss)] // Sequences start at 1
    Ok(EventRecord {
        event_id: EventId::from_uuid(event_id),
        sequence: SequenceNumber::new(sequence as u64),
        event_type: EventType::new(&event_type)
            .map_err(|e| EventLogError::Serialization(e.to_string()))?,
        version: row.get("event_version"),
        aggregate_type: row.get("aggregate_type"),
        aggregate_id: row.get("aggregate_id"),
        payload: row.get("payload"),
        metadata: row.get("metadata"),
        timestamp: row.get("created_at"),
    })
}

impl EventLog for PostgresEventLog {
    fn append(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = Result<EventRecord, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| EventLogError::Storage(e.to_string()))?;

            // Serialize sequence assignment. Released at commit/rollback.
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(APPEND_LOCK_KEY)
                .execute(&mut *tx)
                .await
                .map_err(|e| EventLogError::Storage(e.to_string()))?;

            let event_id = EventId::generate();
            let row = sqlx::query(
                r"
                INSERT INTO events (
                    sequence, event_id, event_type, event_version,
                    aggregate_type, aggregate_id, payload, metadata
                )
                SELECT COALESCE(MAX(sequence), 0) + 1, $1, $2, $3, $4, $5, $6, $7
                FROM events
                RETURNING sequence, created_at
                ",
            )
            .bind(event_id.as_uuid())
            .bind(event.event_type.as_str())
            .bind(&event.version)
            .bind(&event.aggregate_type)
            .bind(&event.aggregate_id)
            .bind(&event.payload)
            .bind(&event.metadata)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| EventLogError::Storage(e.to_string()))?;

            tx.commit()
                .await
                .map_err(|e| EventLogError::Storage(e.to_string()))?;

            let sequence: i64 = row.get("sequence");
            #[allow(clippy::cast_sign_loss)] // Sequences start at 1
            let record = EventRecord {
                event_id,
                sequence: SequenceNumber::new(sequence as u64),
                event_type: event.event_type,
                version: event.version,
                aggregate_type: event.aggregate_type,
                aggregate_id: event.aggregate_id,
                payload: event.payload,
                metadata: event.metadata,
                timestamp: row.get("created_at"),
            };

            tracing::debug!(
                event_id = %record.event_id,
                sequence = %record.sequence,
                event_type = %record.event_type,
                "Event persisted"
            );
            metrics::counter!("ordercast_events_persisted_total").increment(1);

            Ok(record)
        })
    }

    fn get(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EventRecord>, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM events WHERE event_id = $1"
            ))
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EventLogError::Storage(e.to_string()))?;

            row.as_ref().map(row_to_record).transpose()
        })
    }

    fn read_since(
        &self,
        cursor: Option<EventId>,
        limit: ReadLimit,
    ) -> Pin<Box<dyn Future<Output = Result<ReplayBatch, EventLogError>> + Send + '_>> {
        Box::pin(async move { self.read_scoped(cursor, limit, "", &[]).await })
    }

    fn read_by_aggregate(
        &self,
        aggregate_type: String,
        aggregate_id: String,
        cursor: Option<EventId>,
        limit: ReadLimit,
    ) -> Pin<Box<dyn Future<Output = Result<ReplayBatch, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            self.read_scoped(
                cursor,
                limit,
                " AND aggregate_type = $3 AND aggregate_id = $4",
                &[&aggregate_type, &aggregate_id],
            )
            .await
        })
    }

    fn read_by_type(
        &self,
        event_type: EventType,
        cursor: Option<EventId>,
        limit: ReadLimit,
    ) -> Pin<Box<dyn Future<Output = Result<ReplayBatch, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            self.read_scoped(cursor, limit, " AND event_type = $3", &[event_type.as_str()])
                .await
        })
    }
}
