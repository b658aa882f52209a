//! Event record and append-input types.
//!
//! Events represent facts about things that have happened (an order was
//! placed, a payment was captured) and are immutable once written. The core
//! treats payload and metadata as inert JSON: it stores and forwards them but
//! never interprets their contents.
//!
//! # Payload contract
//!
//! Payloads must be fully JSON-serializable at write time. [`NewEvent`]
//! normalizes payload and metadata through a serialize round trip and rejects
//! values that cannot be represented (or that exceed the size bound) with
//! [`EventError::Serialization`] before anything reaches the log.

use crate::sequence::{EventId, SequenceNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum serialized size of an event payload, in bytes.
///
/// Protects the log and the live push path from unbounded records. Oversized
/// payloads are rejected at append time with [`EventError::Serialization`].
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Error types for event construction and validation.
#[derive(Error, Debug)]
pub enum EventError {
    /// Payload or metadata could not be represented as bounded JSON.
    #[error("Failed to serialize event payload: {0}")]
    Serialization(String),

    /// A required field (type, aggregate type, aggregate id) was empty.
    #[error("Invalid event field '{field}': {reason}")]
    InvalidField {
        /// The field that failed validation.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Error type for `EventType` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid event type: {0}")]
pub struct ParseEventTypeError(String);

/// Dotted event name used for handler routing and type-filtered queries.
///
/// Examples: `order.created`, `payment.captured`, `inventory.depleted`.
///
/// # Handler keys
///
/// Live-delivery handlers are keyed by a normalized form of the type where
/// dots become underscores (`order.created` → `order_created`). The
/// normalization is deterministic so a retried delivery always routes the
/// same way as the original push.
///
/// # Examples
///
/// ```
/// use ordercast_core::event::EventType;
///
/// let ty = EventType::new("order.created").unwrap();
/// assert_eq!(ty.as_str(), "order.created");
/// assert_eq!(ty.handler_key(), "order_created");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    /// Create an event type from a dotted name.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidField`] if the name is empty or contains
    /// whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self, EventError> {
        let name = name.into();
        if name.is_empty() {
            return Err(EventError::InvalidField {
                field: "type",
                reason: "event type cannot be empty".to_string(),
            });
        }
        if name.chars().any(char::is_whitespace) {
            return Err(EventError::InvalidField {
                field: "type",
                reason: format!("event type cannot contain whitespace: {name:?}"),
            });
        }
        Ok(Self(name))
    }

    /// Get the dotted name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The normalized handler routing key (dots replaced with underscores).
    #[must_use]
    pub fn handler_key(&self) -> String {
        self.0.replace('.', "_")
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventType {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).map_err(|e| ParseEventTypeError(e.to_string()))
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An immutable, fully populated event as stored in the log.
///
/// Records are created exclusively by [`EventLog::append`]
/// (`crate::log::EventLog::append`), which assigns both identifiers. Nothing
/// mutates a record after that.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Globally unique identifier; the external replay cursor token.
    pub event_id: EventId,

    /// Log position; the sole ordering authority.
    pub sequence: SequenceNumber,

    /// Dotted event name (e.g. `order.created`).
    pub event_type: EventType,

    /// Schema version tag for the payload shape. Carried, never interpreted.
    pub version: String,

    /// The domain entity kind this event concerns (e.g. `Order`).
    pub aggregate_type: String,

    /// The domain entity instance this event concerns (e.g. `123`).
    pub aggregate_id: String,

    /// Opaque JSON payload. Inert data to the core.
    pub payload: serde_json::Value,

    /// Opaque auxiliary data (actor, IP, trace id). Same inertness as payload.
    pub metadata: serde_json::Value,

    /// Wall-clock creation time. Informational only; never used for ordering.
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventRecord {{ seq: {}, type: {}, aggregate: {}/{} }}",
            self.sequence, self.event_type, self.aggregate_type, self.aggregate_id
        )
    }
}

/// A validated event awaiting append.
///
/// Construction performs all payload normalization up front so that the log
/// only ever sees well-formed records: callers get a `SerializationError`
/// synchronously and the event is never appended.
///
/// # Examples
///
/// ```
/// use ordercast_core::event::NewEvent;
/// use serde_json::json;
///
/// let event = NewEvent::new("order.created", "Order", "123")
///     .unwrap()
///     .payload(json!({ "customer_id": 42, "total": 1850 }))
///     .unwrap()
///     .version("2");
/// assert_eq!(event.event_type.as_str(), "order.created");
/// ```
#[derive(Clone, Debug)]
pub struct NewEvent {
    /// Dotted event name.
    pub event_type: EventType,

    /// Aggregate kind, non-empty.
    pub aggregate_type: String,

    /// Aggregate instance id, non-empty.
    pub aggregate_id: String,

    /// Normalized JSON payload.
    pub payload: serde_json::Value,

    /// Normalized JSON metadata.
    pub metadata: serde_json::Value,

    /// Payload schema version tag. Defaults to `"1"`.
    pub version: String,
}

impl NewEvent {
    /// Create a new event with an empty payload and metadata.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidField`] if the type or either aggregate
    /// field is empty.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
    ) -> Result<Self, EventError> {
        let event_type = EventType::new(event_type)?;
        let aggregate_type = non_empty("aggregate_type", aggregate_type.into())?;
        let aggregate_id = non_empty("aggregate_id", aggregate_id.into())?;

        Ok(Self {
            event_type,
            aggregate_type,
            aggregate_id,
            payload: serde_json::Value::Object(serde_json::Map::new()),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            version: "1".to_string(),
        })
    }

    /// Attach a payload, normalizing it through a serialize round trip.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the value is not
    /// representable as JSON or exceeds [`MAX_PAYLOAD_BYTES`].
    pub fn payload(mut self, payload: serde_json::Value) -> Result<Self, EventError> {
        self.payload = normalize("payload", payload)?;
        Ok(self)
    }

    /// Attach a serializable payload value.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if serialization fails or the
    /// result exceeds [`MAX_PAYLOAD_BYTES`].
    pub fn payload_from<T: Serialize>(self, payload: &T) -> Result<Self, EventError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| EventError::Serialization(e.to_string()))?;
        self.payload(value)
    }

    /// Attach metadata (actor, IP, trace id), normalized like the payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the value is not
    /// representable as JSON or exceeds [`MAX_PAYLOAD_BYTES`].
    pub fn metadata(mut self, metadata: serde_json::Value) -> Result<Self, EventError> {
        self.metadata = normalize("metadata", metadata)?;
        Ok(self)
    }

    /// Set the payload schema version tag.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

fn non_empty(field: &'static str, value: String) -> Result<String, EventError> {
    if value.trim().is_empty() {
        return Err(EventError::InvalidField {
            field,
            reason: "cannot be empty".to_string(),
        });
    }
    Ok(value)
}

/// Normalize an opaque value via a deterministic serialize/deserialize round
/// trip and enforce the size bound.
fn normalize(field: &'static str, value: serde_json::Value) -> Result<serde_json::Value, EventError> {
    let bytes = serde_json::to_vec(&value)
        .map_err(|e| EventError::Serialization(format!("{field}: {e}")))?;
    if bytes.len() > MAX_PAYLOAD_BYTES {
        return Err(EventError::Serialization(format!(
            "{field} exceeds {MAX_PAYLOAD_BYTES} bytes ({} bytes)",
            bytes.len()
        )));
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| EventError::Serialization(format!("{field}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_rejects_empty() {
        assert!(EventType::new("").is_err());
    }

    #[test]
    fn event_type_rejects_whitespace() {
        assert!(EventType::new("order created").is_err());
    }

    #[test]
    fn handler_key_normalizes_dots() {
        let ty = EventType::new("order.status.updated").unwrap();
        assert_eq!(ty.handler_key(), "order_status_updated");
    }

    #[test]
    fn handler_key_is_deterministic() {
        let a = EventType::new("payment.captured").unwrap();
        let b = EventType::new("payment.captured").unwrap();
        assert_eq!(a.handler_key(), b.handler_key());
    }

    #[test]
    fn new_event_rejects_empty_aggregate() {
        assert!(NewEvent::new("order.created", "", "123").is_err());
        assert!(NewEvent::new("order.created", "Order", "  ").is_err());
    }

    #[test]
    fn new_event_defaults() {
        let event = NewEvent::new("order.created", "Order", "123").unwrap();
        assert_eq!(event.version, "1");
        assert_eq!(event.payload, json!({}));
        assert_eq!(event.metadata, json!({}));
    }

    #[test]
    fn payload_roundtrip_preserves_value() {
        let event = NewEvent::new("order.created", "Order", "123")
            .unwrap()
            .payload(json!({ "items": [1, 2, 3], "note": null }))
            .unwrap();
        assert_eq!(event.payload, json!({ "items": [1, 2, 3], "note": null }));
    }

    #[test]
    fn payload_from_serializable_struct() {
        #[derive(Serialize)]
        struct OrderPlaced {
            customer_id: u64,
            total_cents: u64,
        }

        let event = NewEvent::new("order.created", "Order", "123")
            .unwrap()
            .payload_from(&OrderPlaced {
                customer_id: 42,
                total_cents: 1850,
            })
            .unwrap();

        assert_eq!(event.payload["customer_id"], 42);
        assert_eq!(event.payload["total_cents"], 1850);
    }

    #[test]
    fn oversized_payload_rejected() {
        let big = "x".repeat(MAX_PAYLOAD_BYTES + 1);
        let result = NewEvent::new("order.created", "Order", "123")
            .unwrap()
            .payload(json!({ "blob": big }));
        assert!(matches!(result, Err(EventError::Serialization(_))));
    }

    #[test]
    fn event_record_display() {
        let record = EventRecord {
            event_id: EventId::generate(),
            sequence: SequenceNumber::new(9),
            event_type: EventType::new("order.created").unwrap(),
            version: "1".to_string(),
            aggregate_type: "Order".to_string(),
            aggregate_id: "7".to_string(),
            payload: json!({}),
            metadata: json!({}),
            timestamp: Utc::now(),
        };
        let display = format!("{record}");
        assert!(display.contains("seq: 9"));
        assert!(display.contains("Order/7"));
    }
}
