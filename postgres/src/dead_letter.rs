//! `PostgreSQL` dead-letter store for deliveries that exhausted retries.
//!
//! Dead letters reference the failed event by id only; the event itself
//! stays in the `events` table. Records are written by the retry pipeline
//! and read back by operator tooling; the delivery path never consumes
//! them.

use ordercast_core::dead_letter::{DeadLetter, DeadLetterError, DeadLetterStatus, DeadLetterStore};
use ordercast_core::group::TargetGroup;
use ordercast_core::sequence::EventId;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::future::Future;
use std::pin::Pin;

/// Production dead-letter store backed by `PostgreSQL`.
///
/// # Example
///
/// ```no_run
/// use ordercast_postgres::PostgresDeadLetterStore;
/// use ordercast_core::dead_letter::DeadLetterStore;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresDeadLetterStore::new(pool);
/// let pending = store.list_pending(100).await?;
/// println!("Pending failures: {}", pending.len());
/// # Ok(())
/// # }
/// ```
pub struct PostgresDeadLetterStore {
    pool: PgPool,
}

impl PostgresDeadLetterStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_dead_letter(row: &PgRow) -> Result<DeadLetter, DeadLetterError> {
    let event_id: uuid::Uuid = row.get("event_id");
    let group: String = row.get("channel_group");
    let status: String = row.get("status");
    let retry_count: i32 = row.get("retry_count");

    #[allow(clippy::cast_sign_loss)] // Retry counts are non-negative
    Ok(DeadLetter {
        id: row.get("id"),
        event_id: EventId::from_uuid(event_id),
        channel_group: group
            .parse::<TargetGroup>()
            .map_err(|e| DeadLetterError::Storage(e.to_string()))?,
        error_message: row.get("error_message"),
        retry_count: retry_count as u32,
        status: DeadLetterStatus::parse(&status)?,
        failed_at: row.get("failed_at"),
    })
}

impl DeadLetterStore for PostgresDeadLetterStore {
    fn add(
        &self,
        event_id: EventId,
        channel_group: TargetGroup,
        error_message: String,
        retry_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<i64, DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            let (id,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO dead_letters (event_id, channel_group, error_message, retry_count)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                ",
            )
            .bind(event_id.as_uuid())
            .bind(channel_group.channel_name())
            .bind(&error_message)
            .bind(i32::try_from(retry_count).unwrap_or(i32::MAX))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

            tracing::warn!(
                dead_letter_id = id,
                event_id = %event_id,
                group = %channel_group,
                error = %error_message,
                retry_count,
                "Delivery dead-lettered"
            );
            metrics::counter!("ordercast_dlq_added_total").increment(1);

            Ok(id)
        })
    }

    fn list_pending(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DeadLetter>, DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Operator-supplied limit, i64 is safe
            let rows = sqlx::query(
                r"
                SELECT id, event_id, channel_group, error_message, retry_count, status, failed_at
                FROM dead_letters
                WHERE status = 'pending'
                ORDER BY failed_at ASC
                LIMIT $1
                ",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

            rows.iter().map(row_to_dead_letter).collect()
        })
    }

    fn count_pending(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<u64, DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM dead_letters WHERE status = 'pending'",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

            #[allow(clippy::cast_sign_loss)] // COUNT(*) is non-negative
            Ok(count as u64)
        })
    }

    fn mark_resolved(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query("UPDATE dead_letters SET status = 'resolved' WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

            tracing::info!(dead_letter_id = id, "Dead letter marked resolved");
            metrics::counter!("ordercast_dlq_resolved_total").increment(1);
            Ok(())
        })
    }

    fn mark_discarded(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query("UPDATE dead_letters SET status = 'discarded' WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

            tracing::warn!(dead_letter_id = id, "Dead letter discarded");
            metrics::counter!("ordercast_dlq_discarded_total").increment(1);
            Ok(())
        })
    }
}
