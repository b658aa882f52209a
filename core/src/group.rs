//! Delivery target groups.
//!
//! A target group is a logical channel identifier computed at dispatch time
//! from event context: who is the customer, restaurant, or rider on the
//! aggregate, and whether admins should see the event. Groups are not stored
//! entities; the subscription registry maps them to live connections.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `TargetGroup` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid target group: {0}")]
pub struct ParseTargetGroupError(String);

/// A logical delivery destination for live pushes.
///
/// Channel-name forms follow the platform convention: `customer_42`,
/// `restaurant_7`, `delivery_9` (rider connections), and the shared `admin`
/// channel.
///
/// # Examples
///
/// ```
/// use ordercast_core::group::TargetGroup;
///
/// let group = TargetGroup::Rider(9);
/// assert_eq!(group.to_string(), "delivery_9");
///
/// let parsed: TargetGroup = "customer_42".parse().unwrap();
/// assert_eq!(parsed, TargetGroup::Customer(42));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetGroup {
    /// A specific customer's live connections.
    Customer(u64),
    /// A specific restaurant's live connections.
    Restaurant(u64),
    /// A specific rider's live connections (channel prefix `delivery_`).
    Rider(u64),
    /// All connected admin consoles.
    Admin,
}

impl TargetGroup {
    /// The stable channel name used in dead-letter records and logs.
    #[must_use]
    pub fn channel_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TargetGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer(id) => write!(f, "customer_{id}"),
            Self::Restaurant(id) => write!(f, "restaurant_{id}"),
            Self::Rider(id) => write!(f, "delivery_{id}"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for TargetGroup {
    type Err = ParseTargetGroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "admin" {
            return Ok(Self::Admin);
        }
        let parse_id = |rest: &str| {
            rest.parse::<u64>()
                .map_err(|_| ParseTargetGroupError(s.to_string()))
        };
        if let Some(rest) = s.strip_prefix("customer_") {
            return Ok(Self::Customer(parse_id(rest)?));
        }
        if let Some(rest) = s.strip_prefix("restaurant_") {
            return Ok(Self::Restaurant(parse_id(rest)?));
        }
        if let Some(rest) = s.strip_prefix("delivery_") {
            return Ok(Self::Rider(parse_id(rest)?));
        }
        Err(ParseTargetGroupError(s.to_string()))
    }
}
