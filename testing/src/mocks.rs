//! Mock implementations for deterministic tests.

use chrono::{DateTime, Utc};
use ordercast_core::clock::Clock;
use ordercast_core::group::TargetGroup;
use ordercast_core::push::PushMessage;
use ordercast_core::transport::{DeliveryError, GroupTransport};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::Mutex;

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making tests reproducible.
///
/// # Example
///
/// ```
/// use ordercast_testing::mocks::FixedClock;
/// use ordercast_core::clock::Clock;
/// use chrono::Utc;
///
/// let clock = FixedClock::new(Utc::now());
/// assert_eq!(clock.now(), clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// This function will panic if the hardcoded timestamp fails to parse,
/// which should never happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

/// Clock that tests can move forward, for crossing time-window boundaries.
///
/// # Example
///
/// ```
/// use ordercast_testing::mocks::{AdjustableClock, test_clock};
/// use ordercast_core::clock::Clock;
///
/// let clock = AdjustableClock::new(test_clock().now());
/// let before = clock.now();
/// clock.advance(chrono::Duration::hours(2));
/// assert_eq!(clock.now() - before, chrono::Duration::hours(2));
/// ```
pub struct AdjustableClock {
    time: std::sync::Mutex<DateTime<Utc>>,
}

impl AdjustableClock {
    /// Create a clock starting at the given time.
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            time: std::sync::Mutex::new(start),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut time = self
            .time
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *time += delta;
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, time: DateTime<Utc>) {
        *self
            .time
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = time;
    }
}

impl Clock for AdjustableClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .time
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// One observed push attempt, successful or not.
#[derive(Clone, Debug)]
pub struct PushAttempt {
    /// The group the dispatcher pushed to.
    pub group: TargetGroup,
    /// The rendered message.
    pub message: PushMessage,
    /// Whether the attempt was allowed to succeed.
    pub succeeded: bool,
}

struct TransportState {
    attempts: Vec<PushAttempt>,
    /// Remaining scripted failures per group; `None` value means fail forever.
    failures: HashMap<TargetGroup, Option<usize>>,
}

/// A `GroupTransport` double that records every push and fails on script.
///
/// Retry and dead-letter behavior depends only on the transport failing the
/// right number of times; this double makes that deterministic.
///
/// # Example
///
/// ```
/// use ordercast_testing::RecordingTransport;
/// use ordercast_core::group::TargetGroup;
///
/// let transport = RecordingTransport::new();
/// // First two pushes to the admin group fail, then succeed.
/// transport.fail_times(TargetGroup::Admin, 2);
/// ```
pub struct RecordingTransport {
    state: Mutex<TransportState>,
}

impl RecordingTransport {
    /// Create a transport that lets every push succeed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TransportState {
                attempts: Vec::new(),
                failures: HashMap::new(),
            }),
        }
    }

    /// Fail the next `count` pushes to `group`, then let pushes succeed.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async runtime; use
    /// [`RecordingTransport::fail_times_async`] there.
    pub fn fail_times(&self, group: TargetGroup, count: usize) {
        self.state
            .blocking_lock()
            .failures
            .insert(group, Some(count));
    }

    /// Fail every push to `group`, forever.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async runtime; use
    /// [`RecordingTransport::fail_always_async`] there.
    pub fn fail_always(&self, group: TargetGroup) {
        self.state.blocking_lock().failures.insert(group, None);
    }

    /// Async variant of [`RecordingTransport::fail_times`] for use inside a
    /// running runtime.
    pub async fn fail_times_async(&self, group: TargetGroup, count: usize) {
        self.state.lock().await.failures.insert(group, Some(count));
    }

    /// Async variant of [`RecordingTransport::fail_always`].
    pub async fn fail_always_async(&self, group: TargetGroup) {
        self.state.lock().await.failures.insert(group, None);
    }

    /// Every push attempt observed so far, in order.
    pub async fn attempts(&self) -> Vec<PushAttempt> {
        self.state.lock().await.attempts.clone()
    }

    /// Only the successful deliveries, in order.
    pub async fn delivered(&self) -> Vec<(TargetGroup, PushMessage)> {
        self.state
            .lock()
            .await
            .attempts
            .iter()
            .filter(|a| a.succeeded)
            .map(|a| (a.group, a.message.clone()))
            .collect()
    }

    /// Successful deliveries to one group, in order.
    pub async fn delivered_to(&self, group: TargetGroup) -> Vec<PushMessage> {
        self.state
            .lock()
            .await
            .attempts
            .iter()
            .filter(|a| a.succeeded && a.group == group)
            .map(|a| a.message.clone())
            .collect()
    }

    /// Total attempts (successful or not) against one group.
    pub async fn attempt_count(&self, group: TargetGroup) -> usize {
        self.state
            .lock()
            .await
            .attempts
            .iter()
            .filter(|a| a.group == group)
            .count()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupTransport for RecordingTransport {
    fn push(
        &self,
        group: TargetGroup,
        message: PushMessage,
    ) -> Pin<Box<dyn Future<Output = Result<usize, DeliveryError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;

            let fail = match state.failures.get_mut(&group) {
                Some(Some(0)) | None => false,
                Some(Some(remaining)) => {
                    *remaining -= 1;
                    true
                }
                Some(None) => true,
            };

            state.attempts.push(PushAttempt {
                group,
                message,
                succeeded: !fail,
            });

            if fail {
                Err(DeliveryError::SendFailed {
                    group: group.channel_name(),
                    reason: "scripted failure".to_string(),
                })
            } else {
                Ok(1)
            }
        })
    }
}
