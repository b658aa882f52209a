//! Event identity and log-ordering types.
//!
//! This module defines the two identifiers every event carries: the external
//! `EventId` (opaque, used as a replay cursor token) and the `SequenceNumber`
//! (the log's sole ordering authority).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error type for `EventId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid event ID: {0}")]
pub struct ParseEventIdError(String);

/// Globally unique identifier for an event, assigned at creation.
///
/// Clients use event IDs as replay cursors: "give me everything after the
/// last event I saw". The ID carries no ordering information itself; only
/// the [`SequenceNumber`] orders events.
///
/// # Examples
///
/// ```
/// use ordercast_core::sequence::EventId;
///
/// let id = EventId::generate();
/// let parsed: EventId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a fresh random event ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID (for rows loaded from storage).
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseEventIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ParseEventIdError(e.to_string()))
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// Strictly increasing position of an event in the log.
///
/// Sequence numbers are dense (no gaps visible to readers), strictly
/// increasing, and never reused. They are assigned by the log atomically with
/// the durable write; no other component may assign one. Timestamps are
/// informational; two events may share a wall-clock timestamp but never a
/// sequence number.
///
/// # Examples
///
/// ```
/// use ordercast_core::sequence::SequenceNumber;
///
/// let first = SequenceNumber::new(1);
/// let second = first.next();
/// assert!(first < second);
/// assert_eq!(second.value(), 2);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// Create a sequence number with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw sequence value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The successor position (current + 1).
    ///
    /// # Overflow Behavior
    ///
    /// Uses plain addition. Reaching `u64::MAX` events is not a realistic
    /// concern for any log.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SequenceNumber> for u64 {
    fn from(seq: SequenceNumber) -> Self {
        seq.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod event_id_tests {
        use super::*;

        #[test]
        fn generate_is_unique() {
            let a = EventId::generate();
            let b = EventId::generate();
            assert_ne!(a, b);
        }

        #[test]
        #[allow(clippy::expect_used)] // Panics: Test will fail if parse fails
        fn roundtrip_through_string() {
            let id = EventId::generate();
            let parsed: EventId = id.to_string().parse().expect("parse should succeed");
            assert_eq!(id, parsed);
        }

        #[test]
        fn parse_garbage_fails() {
            let result = "not-a-uuid".parse::<EventId>();
            assert!(result.is_err());
        }

        #[test]
        fn uuid_conversions() {
            let uuid = Uuid::new_v4();
            let id = EventId::from_uuid(uuid);
            assert_eq!(id.as_uuid(), uuid);
            assert_eq!(Uuid::from(id), uuid);
        }
    }

    mod sequence_tests {
        use super::*;

        #[test]
        fn next_increments() {
            let s1 = SequenceNumber::new(1);
            assert_eq!(s1.next(), SequenceNumber::new(2));
        }

        #[test]
        fn ordering() {
            let s1 = SequenceNumber::new(1);
            let s2 = SequenceNumber::new(2);
            let s9 = SequenceNumber::new(9);
            assert!(s1 < s2);
            assert!(s9 > s2);
        }

        #[test]
        fn from_u64() {
            let seq = SequenceNumber::from(42_u64);
            assert_eq!(seq.value(), 42);
            let raw: u64 = seq.into();
            assert_eq!(raw, 42);
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", SequenceNumber::new(7)), "7");
        }
    }
}
