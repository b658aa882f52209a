//! # Ordercast Testing
//!
//! Testing utilities and in-memory implementations for the ordercast event
//! subsystem.
//!
//! This crate provides:
//! - [`InMemoryEventLog`]: fast, deterministic `EventLog` for unit tests
//! - [`InMemoryDeadLetterStore`]: in-process dead-letter store
//! - [`FixedClock`] and [`AdjustableClock`]: deterministic time
//! - [`RecordingTransport`]: a `GroupTransport` double with scripted
//!   per-group failures, for exercising retry and dead-letter paths
//!
//! ## Example
//!
//! ```
//! use ordercast_testing::InMemoryEventLog;
//! use ordercast_core::event::NewEvent;
//! use ordercast_core::log::EventLog;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let log = InMemoryEventLog::new();
//! let event = NewEvent::new("order.created", "Order", "7").unwrap();
//! let record = log.append(event).await.unwrap();
//! assert_eq!(record.sequence.value(), 1);
//! # }
//! ```

pub mod memory;
pub mod mocks;

pub use memory::{InMemoryDeadLetterStore, InMemoryEventLog};
pub use mocks::{AdjustableClock, FixedClock, RecordingTransport, test_clock};
