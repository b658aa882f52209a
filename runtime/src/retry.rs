//! Retry pipeline for failed group deliveries.
//!
//! A failed push never blocks the dispatcher and never fails the producer;
//! the event is already durable in the log. Instead the dispatcher schedules
//! a [`RetryTask`] on the [`RetryQueue`], whose worker re-attempts the
//! delivery with exponential backoff and, after exhausting its attempts,
//! writes exactly one dead-letter record for the (event, group) pair.
//!
//! The task carries only the event id, not the rendered message: each attempt
//! reloads the record from the log and re-renders it through the same routing
//! table, so a retried delivery is byte-identical to what the original push
//! would have sent.

use ordercast_core::dead_letter::DeadLetterStore;
use ordercast_core::group::TargetGroup;
use ordercast_core::log::EventLog;
use ordercast_core::push::HandlerTable;
use ordercast_core::sequence::EventId;
use ordercast_core::transport::{DeliveryError, GroupTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::sleep;

/// Depth of the retry queue. A full queue dead-letters immediately instead of
/// blocking the dispatcher.
pub const RETRY_QUEUE_DEPTH: usize = 1024;

/// Cap on concurrently running retry tasks. When every slot is busy the
/// worker stops pulling from the queue, so `RETRY_QUEUE_DEPTH` bounds the
/// total work in the pipeline instead of letting tasks pile up unbounded.
pub const MAX_IN_FLIGHT_RETRIES: usize = 64;

/// Deadline for a single retry push. A transport that hangs counts as a
/// failed attempt rather than stalling the task forever.
pub const ATTEMPT_DEADLINE: Duration = Duration::from_secs(5);

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts before dead-lettering.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Calculate the delay before a given retry attempt (zero-based).
    ///
    /// Uses exponential backoff: `initial_delay * multiplier ^ attempt`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(3),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(100)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(30)),
            multiplier: self.multiplier.unwrap_or(2.0),
        }
    }
}

/// One failed (event, group) delivery awaiting retry.
#[derive(Debug, Clone)]
pub struct RetryTask {
    /// The durable event whose push failed.
    pub event_id: EventId,
    /// The group the push failed for. Other groups of the same broadcast are
    /// unaffected.
    pub group: TargetGroup,
    /// The error from the initial push attempt.
    pub last_error: String,
}

struct RetryContext {
    log: Arc<dyn EventLog>,
    transport: Arc<dyn GroupTransport>,
    handlers: Arc<HandlerTable>,
    dead_letters: Arc<dyn DeadLetterStore>,
    policy: RetryPolicy,
}

/// Bounded queue of failed deliveries with a background retry worker.
///
/// The worker spawns one task per scheduled retry, so a group stuck in
/// backoff never delays retries for other groups, but holds at most
/// [`MAX_IN_FLIGHT_RETRIES`] of them at a time. Exhausted deliveries are
/// dead-lettered; so are deliveries that cannot even be queued because the
/// queue is full.
pub struct RetryQueue {
    tx: mpsc::Sender<RetryTask>,
    ctx: Arc<RetryContext>,
}

impl RetryQueue {
    /// Start the retry worker and return a handle for scheduling tasks.
    ///
    /// The worker runs until every `RetryQueue` clone referencing it is
    /// dropped.
    #[must_use]
    pub fn spawn(
        log: Arc<dyn EventLog>,
        transport: Arc<dyn GroupTransport>,
        handlers: Arc<HandlerTable>,
        dead_letters: Arc<dyn DeadLetterStore>,
        policy: RetryPolicy,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<RetryTask>(RETRY_QUEUE_DEPTH);
        let ctx = Arc::new(RetryContext {
            log,
            transport,
            handlers,
            dead_letters,
            policy,
        });

        let worker_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let in_flight = Arc::new(Semaphore::new(MAX_IN_FLIGHT_RETRIES));
            while let Some(task) = rx.recv().await {
                // The semaphore is never closed; acquisition only fails on
                // shutdown of the runtime.
                let Ok(permit) = Arc::clone(&in_flight).acquire_owned().await else {
                    break;
                };
                let ctx = Arc::clone(&worker_ctx);
                tokio::spawn(async move {
                    run_task(&ctx, task).await;
                    drop(permit);
                });
            }
            tracing::debug!("Retry worker stopped");
        });

        Self { tx, ctx }
    }

    /// Schedule a failed delivery for retry.
    ///
    /// Never blocks: if the queue is full, the delivery is dead-lettered
    /// immediately with zero retries made.
    pub async fn schedule(&self, task: RetryTask) {
        metrics::counter!("ordercast_retries_scheduled_total").increment(1);
        if let Err(mpsc::error::TrySendError::Full(task) | mpsc::error::TrySendError::Closed(task)) =
            self.tx.try_send(task)
        {
            tracing::error!(
                event_id = %task.event_id,
                group = %task.group,
                "Retry queue full, dead-lettering without retry"
            );
            metrics::counter!("ordercast_retry_queue_overflow_total").increment(1);
            dead_letter(&self.ctx, &task, 0, "retry queue full").await;
        }
    }
}

impl Clone for RetryQueue {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            ctx: Arc::clone(&self.ctx),
        }
    }
}

/// Run all retry attempts for one task, dead-lettering on exhaustion.
async fn run_task(ctx: &RetryContext, task: RetryTask) {
    let mut last_error = task.last_error.clone();

    for attempt in 0..ctx.policy.max_retries {
        sleep(ctx.policy.delay_for_attempt(attempt)).await;

        // Reload the record each attempt: the task carries only the id, and
        // rendering goes through the same table as the original push.
        let record = match ctx.log.get(task.event_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::error!(
                    event_id = %task.event_id,
                    group = %task.group,
                    "Event vanished from log, dead-lettering"
                );
                dead_letter(ctx, &task, attempt as u32, "event not found in log").await;
                return;
            }
            Err(err) => {
                last_error = err.to_string();
                tracing::warn!(
                    event_id = %task.event_id,
                    group = %task.group,
                    attempt,
                    error = %err,
                    "Could not reload event for retry"
                );
                continue;
            }
        };

        let message = ctx.handlers.render(&record);
        metrics::counter!("ordercast_retry_attempts_total").increment(1);

        let pushed = tokio::time::timeout(ATTEMPT_DEADLINE, ctx.transport.push(task.group, message))
            .await
            .unwrap_or_else(|_| {
                Err(DeliveryError::Timeout {
                    group: task.group.channel_name(),
                    elapsed_ms: ATTEMPT_DEADLINE.as_millis() as u64,
                })
            });

        match pushed {
            Ok(delivered) => {
                tracing::info!(
                    event_id = %task.event_id,
                    group = %task.group,
                    attempt,
                    delivered,
                    "Delivery succeeded after retry"
                );
                metrics::counter!("ordercast_retry_successes_total").increment(1);
                return;
            }
            Err(err) => {
                last_error = err.to_string();
                tracing::warn!(
                    event_id = %task.event_id,
                    group = %task.group,
                    attempt,
                    error = %err,
                    "Retry attempt failed"
                );
            }
        }
    }

    tracing::error!(
        event_id = %task.event_id,
        group = %task.group,
        max_retries = ctx.policy.max_retries,
        error = %last_error,
        "Delivery failed after max retries, dead-lettering"
    );
    dead_letter(ctx, &task, ctx.policy.max_retries as u32, &last_error).await;
}

async fn dead_letter(ctx: &RetryContext, task: &RetryTask, retry_count: u32, error: &str) {
    metrics::counter!("ordercast_dead_letters_total").increment(1);
    if let Err(err) = ctx
        .dead_letters
        .add(task.event_id, task.group, error.to_string(), retry_count)
        .await
    {
        // Nothing left to fall back to; the event is still in the log.
        tracing::error!(
            event_id = %task.event_id,
            group = %task.group,
            error = %err,
            "Failed to write dead letter"
        );
    }
}
