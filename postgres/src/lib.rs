//! `PostgreSQL` storage for the ordercast event subsystem.
//!
//! This crate provides the production implementations of the storage traits
//! in `ordercast-core`:
//!
//! - [`PostgresEventLog`]: append-only event log with advisory-lock
//!   serialized sequence assignment and cursor-based replay reads
//! - [`PostgresDeadLetterStore`]: persistent record of deliveries that
//!   exhausted their retries
//!
//! Schema lives in `migrations/`; [`run_migrations`] applies it to a pool
//! (tests and small deployments; larger ones run the same SQL through their
//! own migration tooling).
//!
//! # Example
//!
//! ```ignore
//! use ordercast_postgres::PostgresEventLog;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = PostgresEventLog::new("postgres://localhost/ordercast").await?;
//!     Ok(())
//! }
//! ```

pub mod dead_letter;
pub mod event_log;

pub use dead_letter::PostgresDeadLetterStore;
pub use event_log::PostgresEventLog;

use ordercast_core::log::EventLogError;

/// The schema files under `migrations/`, in application order.
const MIGRATIONS: [&str; 2] = [
    include_str!("../migrations/0001_create_events.sql"),
    include_str!("../migrations/0002_create_dead_letters.sql"),
];

/// Create the `events` and `dead_letters` tables if they do not exist.
///
/// Applies the SQL files from `migrations/` verbatim, so this path and
/// external migration tooling run the same schema.
///
/// # Errors
///
/// Returns [`EventLogError::Storage`] if any statement fails.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), EventLogError> {
    for migration in MIGRATIONS {
        sqlx::raw_sql(migration)
            .execute(pool)
            .await
            .map_err(|e| EventLogError::Storage(e.to_string()))?;
    }
    Ok(())
}
