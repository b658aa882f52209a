//! # Ordercast Core
//!
//! Core types and traits for the ordercast event subsystem: an append-only,
//! strictly-ordered log of domain events plus the contracts the real-time
//! broadcast layer is built on.
//!
//! ## Core Concepts
//!
//! - **`EventRecord`**: an immutable, sequence-numbered fact (`order.created`,
//!   `payment.captured`, ...) with an opaque JSON payload
//! - **`EventLog`**: the append/read contract; the log is the sole ordering
//!   authority via dense, strictly increasing sequence numbers
//! - **`TargetGroup`**: a logical delivery destination (`customer_42`,
//!   `restaurant_7`, `delivery_9`, `admin`) computed at dispatch time
//! - **`DeadLetterStore`**: where deliveries land after retry exhaustion
//! - **`PushMessage`**: the wire shape handed to live subscriber connections
//!
//! ## Architecture Principles
//!
//! - Log first: an event is durable before any delivery is attempted
//! - Delivery is at-least-once and best-effort; the log is the recovery path
//! - The core never interprets payload contents, only stores and forwards them
//! - Dependencies are injected via traits (`EventLog`, `DeadLetterStore`,
//!   `Clock`) so the runtime is testable without a database
//!
//! ## Example
//!
//! ```ignore
//! use ordercast_core::event::NewEvent;
//! use ordercast_core::log::EventLog;
//! use serde_json::json;
//!
//! async fn place_order(log: &dyn EventLog) -> Result<(), Box<dyn std::error::Error>> {
//!     let event = NewEvent::new("order.created", "Order", "7")?
//!         .payload(json!({ "total": 1999 }))?;
//!     let record = log.append(event).await?;
//!     println!("appended at sequence {}", record.sequence);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod dead_letter;
pub mod event;
pub mod group;
pub mod log;
pub mod push;
pub mod sequence;
pub mod transport;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use clock::{Clock, SystemClock};
pub use dead_letter::{DeadLetter, DeadLetterStatus, DeadLetterStore};
pub use event::{EventError, EventRecord, EventType, NewEvent};
pub use group::TargetGroup;
pub use log::{CursorResolution, EventLog, EventLogError, ReadLimit, ReplayBatch};
pub use push::{EventKind, HandlerTable, PushMessage};
pub use sequence::{EventId, SequenceNumber};
pub use transport::{DeliveryError, GroupTransport};
