//! Live push messages and handler routing.
//!
//! This module defines the wire shape pushed to live subscriber connections
//! and the routing table that turns an event into that shape.
//!
//! # Routing
//!
//! Event types route to handlers by a normalized key: dots in the dotted
//! event name become underscores (`order.created` → `order_created`). The
//! normalization is deterministic, so a retried delivery always routes the
//! same way as the original push.
//!
//! Known platform event kinds are enumerated in [`EventKind`] and wired into
//! a [`HandlerTable`] that is built and validated at startup: a missing or
//! doubly-registered handler fails construction rather than surfacing as a
//! silent routing miss at dispatch time.

use crate::event::{EventRecord, EventType};
use crate::sequence::{EventId, SequenceNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from handler table construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerTableError {
    /// Two handlers were registered for the same routing key.
    #[error("Duplicate handler registered for key '{0}'")]
    DuplicateKey(String),

    /// A known event kind has no registered handler.
    #[error("No handler registered for event kind '{0}'")]
    MissingHandler(&'static str),
}

/// The event portion of a live push, mirroring the stored record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushData {
    /// The event's external identifier.
    pub event_id: EventId,

    /// Log position, included so reconnecting clients can compare the first
    /// replayed sequence against their own last-seen position.
    pub sequence: SequenceNumber,

    /// Dotted event name.
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Payload schema version tag.
    pub version: String,

    /// Wall-clock creation time of the event.
    pub timestamp: DateTime<Utc>,

    /// Aggregate kind.
    pub aggregate_type: String,

    /// Aggregate instance id.
    pub aggregate_id: String,

    /// Opaque JSON payload, forwarded verbatim.
    pub payload: serde_json::Value,
}

/// The message shape sent to live subscribers.
///
/// ```json
/// {
///   "type": "order_created",
///   "data": { "event_id": "...", "type": "order.created", ... },
///   "event_id": "..."
/// }
/// ```
///
/// The top-level `type` is the normalized handler key; `event_id` is repeated
/// at the top level so clients can track their replay cursor without digging
/// into `data`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Normalized handler key (`order_created`).
    #[serde(rename = "type")]
    pub message_type: String,

    /// The event itself.
    pub data: PushData,

    /// The event's external identifier, the client's next replay cursor.
    pub event_id: EventId,
}

impl PushMessage {
    /// Render a stored event into the default push shape.
    #[must_use]
    pub fn from_record(record: &EventRecord) -> Self {
        Self {
            message_type: record.event_type.handler_key(),
            data: PushData {
                event_id: record.event_id,
                sequence: record.sequence,
                event_type: record.event_type.clone(),
                version: record.version.clone(),
                timestamp: record.timestamp,
                aggregate_type: record.aggregate_type.clone(),
                aggregate_id: record.aggregate_id.clone(),
                payload: record.payload.clone(),
            },
            event_id: record.event_id,
        }
    }
}

/// The event kinds the platform broadcasts.
///
/// Producers may append arbitrary dotted types, but these are the kinds with
/// live-delivery handlers; the [`HandlerTable`] is validated against this
/// list at startup.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A customer placed an order.
    OrderCreated,
    /// A restaurant accepted an order.
    OrderAccepted,
    /// An order moved through its lifecycle (preparing, ready, ...).
    OrderStatusUpdated,
    /// An order was cancelled by either side.
    OrderCancelled,
    /// A payment was captured for an order.
    PaymentCaptured,
    /// A payment attempt failed.
    PaymentFailed,
    /// A menu item ran out of stock.
    InventoryDepleted,
    /// A rider was assigned to a delivery.
    DeliveryAssigned,
    /// A delivery was completed.
    DeliveryCompleted,
    /// A restaurant or rider payout completed.
    PayoutCompleted,
}

impl EventKind {
    /// Every kind, for startup validation of the handler table.
    pub const ALL: [Self; 10] = [
        Self::OrderCreated,
        Self::OrderAccepted,
        Self::OrderStatusUpdated,
        Self::OrderCancelled,
        Self::PaymentCaptured,
        Self::PaymentFailed,
        Self::InventoryDepleted,
        Self::DeliveryAssigned,
        Self::DeliveryCompleted,
        Self::PayoutCompleted,
    ];

    /// The dotted event name this kind corresponds to.
    #[must_use]
    pub const fn event_type_name(self) -> &'static str {
        match self {
            Self::OrderCreated => "order.created",
            Self::OrderAccepted => "order.accepted",
            Self::OrderStatusUpdated => "order.status_updated",
            Self::OrderCancelled => "order.cancelled",
            Self::PaymentCaptured => "payment.captured",
            Self::PaymentFailed => "payment.failed",
            Self::InventoryDepleted => "inventory.depleted",
            Self::DeliveryAssigned => "delivery.assigned",
            Self::DeliveryCompleted => "delivery.completed",
            Self::PayoutCompleted => "payout.completed",
        }
    }

    /// The normalized routing key for this kind.
    #[must_use]
    pub fn handler_key(self) -> String {
        self.event_type_name().replace('.', "_")
    }
}

/// A handler renders one event into the message pushed to subscribers.
pub type PushHandler = fn(&EventRecord) -> PushMessage;

/// Explicit routing table from normalized handler keys to push handlers.
///
/// Replaces naming-convention dispatch: the table is built once at startup,
/// rejects duplicate registrations, and verifies every [`EventKind`] is
/// covered. Event types without a registered handler fall back to the
/// default rendering ([`PushMessage::from_record`]) so arbitrary producer
/// types are still deliverable.
///
/// # Examples
///
/// ```
/// use ordercast_core::push::HandlerTable;
///
/// let table = HandlerTable::with_default_handlers().unwrap();
/// assert!(table.has_handler_for_key("order_created"));
/// ```
pub struct HandlerTable {
    handlers: HashMap<String, PushHandler>,
}

impl HandlerTable {
    /// Build a table routing every known [`EventKind`] to the default
    /// rendering.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerTableError`] if validation fails (cannot happen for
    /// the built-in registrations, but the signature keeps custom and
    /// default construction uniform).
    pub fn with_default_handlers() -> Result<Self, HandlerTableError> {
        let mut builder = Self::builder();
        for kind in EventKind::ALL {
            builder = builder.register(kind, PushMessage::from_record)?;
        }
        builder.build()
    }

    /// Start building a custom table.
    #[must_use]
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder {
            handlers: HashMap::new(),
        }
    }

    /// Resolve the handler for an event type, if one is registered.
    #[must_use]
    pub fn resolve(&self, event_type: &EventType) -> Option<PushHandler> {
        self.handlers.get(&event_type.handler_key()).copied()
    }

    /// Whether a handler is registered under the given normalized key.
    #[must_use]
    pub fn has_handler_for_key(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Render an event into its push message.
    ///
    /// Uses the registered handler when one exists, otherwise the default
    /// rendering. Deterministic: a retried delivery renders identically to
    /// the original push.
    #[must_use]
    pub fn render(&self, record: &EventRecord) -> PushMessage {
        match self.resolve(&record.event_type) {
            Some(handler) => handler(record),
            None => PushMessage::from_record(record),
        }
    }
}

/// Builder for [`HandlerTable`], validating registrations as they are added.
pub struct HandlerTableBuilder {
    handlers: HashMap<String, PushHandler>,
}

impl HandlerTableBuilder {
    /// Register a handler for an event kind.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerTableError::DuplicateKey`] if the kind's routing key
    /// is already registered.
    pub fn register(
        mut self,
        kind: EventKind,
        handler: PushHandler,
    ) -> Result<Self, HandlerTableError> {
        let key = kind.handler_key();
        if self.handlers.contains_key(&key) {
            return Err(HandlerTableError::DuplicateKey(key));
        }
        self.handlers.insert(key, handler);
        Ok(self)
    }

    /// Finish building, verifying every known kind is covered.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerTableError::MissingHandler`] naming the first
    /// uncovered kind.
    pub fn build(self) -> Result<HandlerTable, HandlerTableError> {
        for kind in EventKind::ALL {
            if !self.handlers.contains_key(&kind.handler_key()) {
                return Err(HandlerTableError::MissingHandler(kind.event_type_name()));
            }
        }
        Ok(HandlerTable {
            handlers: self.handlers,
        })
    }
}
