//! The delivery seam between the dispatcher and live connections.
//!
//! The dispatcher never talks to sockets. It pushes rendered messages
//! through [`GroupTransport`], which the subscription registry implements in
//! production and test doubles implement in unit tests, so retry and
//! dead-letter behavior is testable without any transport layer.

use crate::group::TargetGroup;
use crate::push::PushMessage;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur while pushing to one target group.
///
/// Delivery errors are always recoverable: they enter the retry pipeline and
/// never propagate to the producer, whose event is already durable.
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    /// A subscriber's channel was closed mid-push.
    #[error("Push to group '{group}' failed: {reason}")]
    SendFailed {
        /// The channel name of the group that failed.
        group: String,
        /// Why the push failed.
        reason: String,
    },

    /// The push did not complete within its deadline.
    #[error("Push to group '{group}' timed out after {elapsed_ms}ms")]
    Timeout {
        /// The channel name of the group that timed out.
        group: String,
        /// How long the attempt ran.
        elapsed_ms: u64,
    },
}

/// Pushes one message to every live subscriber of one group.
///
/// # Contract
///
/// - Returns the number of subscribers the message was handed to
/// - A group with zero current members is `Ok(0)`, a no-op rather than an error
///   (offline subscribers rely on replay instead of live push)
/// - An error covers the whole group attempt; per-group isolation is the
///   dispatcher's job, not the transport's
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the dispatcher and retry
/// worker can share an `Arc<dyn GroupTransport>`.
pub trait GroupTransport: Send + Sync {
    /// Push `message` to all current members of `group`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if the group push fails as a whole; the
    /// dispatcher schedules a retry for exactly that group.
    fn push(
        &self,
        group: TargetGroup,
        message: PushMessage,
    ) -> Pin<Box<dyn Future<Output = Result<usize, DeliveryError>> + Send + '_>>;
}
