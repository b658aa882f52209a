//! # Ordercast Runtime
//!
//! The live side of the ordercast event subsystem: subscription registry,
//! broadcast dispatcher, retry pipeline, and replay coordinator.
//!
//! ## Core Components
//!
//! - **[`SubscriptionRegistry`]**: maps target groups to live connections;
//!   membership changes only through connection lifecycle transitions
//! - **[`BroadcastDispatcher`]**: appends an event to the log, then fans it
//!   out to target groups with per-group failure isolation
//! - **[`RetryQueue`]**: bounded worker that retries failed group pushes with
//!   exponential backoff and dead-letters exhausted deliveries
//! - **[`ReplayCoordinator`]**: streams missed events to a reconnecting
//!   subscriber before switching it to live delivery, without duplicating or
//!   dropping events in the handover window
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────┐  append   ┌───────────┐
//! │ Producer ├──────────>│ Event Log │◄── Source of truth
//! └────┬─────┘           └───────────┘
//!      │ broadcast
//!      ▼
//! ┌────────────┐  push per group  ┌──────────────────────┐
//! │ Dispatcher ├─────────────────>│ SubscriptionRegistry │
//! └────┬───────┘                  └──────────────────────┘
//!      │ on failure                          ▲
//!      ▼                                     │ resend
//! ┌────────────┐  exhausted  ┌─────────────┐│
//! │ RetryQueue ├────────────>│ DeadLetters │┘
//! └────────────┘             └─────────────┘
//! ```
//!
//! Append failures propagate to the producer; delivery failures never do,
//! since the event is already durable and replay recovers it.

pub mod dispatcher;
pub mod registry;
pub mod replay;
pub mod retry;

pub use dispatcher::{BroadcastDispatcher, DispatcherConfig};
pub use registry::{ConnectionId, ConnectionState, RegistryError, SubscriptionRegistry};
pub use replay::{ReplayConfig, ReplayCoordinator, ReplayError, ReplayOutcome, ReplayScope};
pub use retry::{RetryPolicy, RetryQueue, RetryTask};
