//! Broadcast dispatcher: append, then fan out.
//!
//! The dispatcher is the single entrypoint producers use to emit an event.
//! It appends to the log first; an append failure propagates to the caller
//! and nothing is pushed. Once the event is durable, delivery to each target
//! group runs in its own task: a slow or failing group never delays the
//! others, and a failed push goes to the retry pipeline instead of back to
//! the producer.

use crate::retry::{RetryPolicy, RetryQueue, RetryTask};
use ordercast_core::dead_letter::DeadLetterStore;
use ordercast_core::event::{EventRecord, NewEvent};
use ordercast_core::group::TargetGroup;
use ordercast_core::log::{EventLog, EventLogError};
use ordercast_core::push::HandlerTable;
use ordercast_core::transport::GroupTransport;
use std::sync::Arc;

/// Configuration for a [`BroadcastDispatcher`].
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Backoff policy for the retry pipeline behind the dispatcher.
    pub retry: RetryPolicy,
}

/// Appends events to the log and fans them out to target groups.
///
/// # Failure semantics
///
/// - Append failure: returned to the producer; no delivery is attempted
/// - Delivery failure: isolated per group, retried with backoff, and
///   dead-lettered on exhaustion; never surfaced to the producer
/// - Empty group: successful no-op at the transport layer
///
/// Cloning is cheap; clones share the log, transport, and retry pipeline.
#[derive(Clone)]
pub struct BroadcastDispatcher {
    log: Arc<dyn EventLog>,
    transport: Arc<dyn GroupTransport>,
    handlers: Arc<HandlerTable>,
    retries: RetryQueue,
}

impl BroadcastDispatcher {
    /// Create a dispatcher and start its retry pipeline.
    ///
    /// Must be called from within a tokio runtime (the retry worker is
    /// spawned here).
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        transport: Arc<dyn GroupTransport>,
        handlers: Arc<HandlerTable>,
        dead_letters: Arc<dyn DeadLetterStore>,
        config: DispatcherConfig,
    ) -> Self {
        let retries = RetryQueue::spawn(
            Arc::clone(&log),
            Arc::clone(&transport),
            Arc::clone(&handlers),
            dead_letters,
            config.retry,
        );
        Self {
            log,
            transport,
            handlers,
            retries,
        }
    }

    /// Append an event and push it to every listed group.
    ///
    /// Returns the stored record (with its assigned sequence number) as soon
    /// as the append is durable; deliveries proceed in the background.
    /// Duplicate groups in the list are pushed once.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError`] if the append fails; nothing was pushed.
    pub async fn broadcast(
        &self,
        event: NewEvent,
        groups: Vec<TargetGroup>,
    ) -> Result<EventRecord, EventLogError> {
        let record = self.log.append(event).await?;
        tracing::debug!(
            event_id = %record.event_id,
            sequence = %record.sequence,
            event_type = %record.event_type,
            "Event appended"
        );
        metrics::counter!("ordercast_events_appended_total").increment(1);

        let mut targets: Vec<TargetGroup> = Vec::with_capacity(groups.len());
        for group in groups {
            if !targets.contains(&group) {
                targets.push(group);
            }
        }

        for group in targets {
            let message = self.handlers.render(&record);
            let transport = Arc::clone(&self.transport);
            let retries = self.retries.clone();
            let event_id = record.event_id;

            // One task per group: a failing group must not delay the others.
            tokio::spawn(async move {
                match transport.push(group, message).await {
                    Ok(delivered) => {
                        tracing::debug!(
                            event_id = %event_id,
                            group = %group,
                            delivered,
                            "Event pushed"
                        );
                        metrics::counter!("ordercast_pushes_total").increment(1);
                    }
                    Err(err) => {
                        tracing::warn!(
                            event_id = %event_id,
                            group = %group,
                            error = %err,
                            "Push failed, scheduling retry"
                        );
                        metrics::counter!("ordercast_push_failures_total").increment(1);
                        retries
                            .schedule(RetryTask {
                                event_id,
                                group,
                                last_error: err.to_string(),
                            })
                            .await;
                    }
                }
            });
        }

        Ok(record)
    }

    /// Broadcast to one customer's group.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError`] if the append fails.
    pub async fn broadcast_to_customer(
        &self,
        event: NewEvent,
        customer_id: u64,
    ) -> Result<EventRecord, EventLogError> {
        self.broadcast(event, vec![TargetGroup::Customer(customer_id)])
            .await
    }

    /// Broadcast to one restaurant's group.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError`] if the append fails.
    pub async fn broadcast_to_restaurant(
        &self,
        event: NewEvent,
        restaurant_id: u64,
    ) -> Result<EventRecord, EventLogError> {
        self.broadcast(event, vec![TargetGroup::Restaurant(restaurant_id)])
            .await
    }

    /// Broadcast to one rider's group.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError`] if the append fails.
    pub async fn broadcast_to_rider(
        &self,
        event: NewEvent,
        rider_id: u64,
    ) -> Result<EventRecord, EventLogError> {
        self.broadcast(event, vec![TargetGroup::Rider(rider_id)])
            .await
    }

    /// Broadcast to the admin monitoring group only.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError`] if the append fails.
    pub async fn broadcast_to_admin(&self, event: NewEvent) -> Result<EventRecord, EventLogError> {
        self.broadcast(event, vec![TargetGroup::Admin]).await
    }

    /// Broadcast to any combination of the interested parties of one order.
    ///
    /// Typical order lifecycle events go to the customer, the restaurant,
    /// the assigned rider, and the admin group in one call.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError`] if the append fails.
    pub async fn broadcast_to_multiple(
        &self,
        event: NewEvent,
        customer_id: Option<u64>,
        restaurant_id: Option<u64>,
        rider_id: Option<u64>,
        include_admin: bool,
    ) -> Result<EventRecord, EventLogError> {
        let mut groups = Vec::new();
        if let Some(id) = customer_id {
            groups.push(TargetGroup::Customer(id));
        }
        if let Some(id) = restaurant_id {
            groups.push(TargetGroup::Restaurant(id));
        }
        if let Some(id) = rider_id {
            groups.push(TargetGroup::Rider(id));
        }
        if include_admin {
            groups.push(TargetGroup::Admin);
        }
        self.broadcast(event, groups).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use ordercast_testing::{InMemoryDeadLetterStore, InMemoryEventLog, RecordingTransport};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::sleep;

    struct Fixture {
        log: Arc<InMemoryEventLog>,
        transport: Arc<RecordingTransport>,
        dead_letters: Arc<InMemoryDeadLetterStore>,
        dispatcher: BroadcastDispatcher,
    }

    fn fixture() -> Fixture {
        let log = Arc::new(InMemoryEventLog::new());
        let transport = Arc::new(RecordingTransport::new());
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let config = DispatcherConfig {
            retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(5))
                .build(),
        };
        let dispatcher = BroadcastDispatcher::new(
            Arc::clone(&log) as Arc<dyn EventLog>,
            Arc::clone(&transport) as Arc<dyn GroupTransport>,
            Arc::new(HandlerTable::with_default_handlers().unwrap()),
            Arc::clone(&dead_letters) as Arc<dyn DeadLetterStore>,
            config,
        );
        Fixture {
            log,
            transport,
            dead_letters,
            dispatcher,
        }
    }

    fn order_created() -> NewEvent {
        NewEvent::new("order.created", "Order", "7")
            .unwrap()
            .payload(json!({ "total": 1850 }))
            .unwrap()
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..500 {
            if condition().await {
                return;
            }
            sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[tokio::test]
    async fn broadcast_appends_then_delivers_to_each_group() {
        let f = fixture();
        let groups = vec![TargetGroup::Customer(42), TargetGroup::Admin];

        let record = f
            .dispatcher
            .broadcast(order_created(), groups.clone())
            .await
            .unwrap();
        assert_eq!(record.sequence.value(), 1);

        wait_until(|| async { f.transport.delivered().await.len() == 2 }).await;

        for group in groups {
            let delivered = f.transport.delivered_to(group).await;
            assert_eq!(delivered.len(), 1);
            assert_eq!(delivered[0].event_id, record.event_id);
            assert_eq!(delivered[0].message_type, "order_created");
        }
    }

    #[tokio::test]
    async fn append_failure_propagates_and_nothing_is_pushed() {
        let f = fixture();
        f.log.set_fail_appends(true);

        let result = f
            .dispatcher
            .broadcast(order_created(), vec![TargetGroup::Admin])
            .await;
        assert!(matches!(result, Err(EventLogError::Storage(_))));

        sleep(Duration::from_millis(10)).await;
        assert!(f.transport.attempts().await.is_empty());
        assert!(f.log.is_empty().await);
    }

    #[tokio::test]
    async fn failing_group_does_not_affect_others() {
        let f = fixture();
        f.transport
            .fail_always_async(TargetGroup::Restaurant(9))
            .await;

        let record = f
            .dispatcher
            .broadcast(
                order_created(),
                vec![TargetGroup::Restaurant(9), TargetGroup::Customer(42)],
            )
            .await
            .unwrap();

        // Healthy group delivered despite the failing one.
        wait_until(|| async {
            !f.transport
                .delivered_to(TargetGroup::Customer(42))
                .await
                .is_empty()
        })
        .await;

        // Failing group ends in exactly one dead letter.
        wait_until(|| async { f.dead_letters.count_pending().await.unwrap() > 0 }).await;
        assert_eq!(
            f.dead_letters
                .count_for(record.event_id, TargetGroup::Restaurant(9))
                .await,
            1
        );
        assert_eq!(
            f.dead_letters
                .count_for(record.event_id, TargetGroup::Customer(42))
                .await,
            0
        );
    }

    #[tokio::test]
    async fn transient_failure_recovers_via_retry_without_dead_letter() {
        let f = fixture();
        f.transport
            .fail_times_async(TargetGroup::Customer(42), 1)
            .await;

        f.dispatcher
            .broadcast(order_created(), vec![TargetGroup::Customer(42)])
            .await
            .unwrap();

        wait_until(|| async {
            !f.transport
                .delivered_to(TargetGroup::Customer(42))
                .await
                .is_empty()
        })
        .await;

        assert_eq!(f.dead_letters.count_pending().await.unwrap(), 0);
        // Initial push plus one retry.
        assert_eq!(f.transport.attempt_count(TargetGroup::Customer(42)).await, 2);
    }

    #[tokio::test]
    async fn duplicate_groups_are_pushed_once() {
        let f = fixture();
        f.dispatcher
            .broadcast(
                order_created(),
                vec![TargetGroup::Admin, TargetGroup::Admin],
            )
            .await
            .unwrap();

        wait_until(|| async { !f.transport.delivered_to(TargetGroup::Admin).await.is_empty() })
            .await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(f.transport.attempt_count(TargetGroup::Admin).await, 1);
    }

    #[tokio::test]
    async fn convenience_variants_target_the_right_groups() {
        let f = fixture();

        f.dispatcher
            .broadcast_to_customer(order_created(), 1)
            .await
            .unwrap();
        f.dispatcher
            .broadcast_to_restaurant(order_created(), 2)
            .await
            .unwrap();
        f.dispatcher
            .broadcast_to_rider(order_created(), 3)
            .await
            .unwrap();
        f.dispatcher.broadcast_to_admin(order_created()).await.unwrap();
        f.dispatcher
            .broadcast_to_multiple(order_created(), Some(1), Some(2), None, true)
            .await
            .unwrap();

        wait_until(|| async { f.transport.delivered().await.len() == 7 }).await;

        assert_eq!(f.transport.delivered_to(TargetGroup::Customer(1)).await.len(), 2);
        assert_eq!(f.transport.delivered_to(TargetGroup::Restaurant(2)).await.len(), 2);
        assert_eq!(f.transport.delivered_to(TargetGroup::Rider(3)).await.len(), 1);
        assert_eq!(f.transport.delivered_to(TargetGroup::Admin).await.len(), 2);
    }

    #[tokio::test]
    async fn sequences_are_dense_across_broadcasts() {
        let f = fixture();
        for i in 1..=4 {
            let record = f
                .dispatcher
                .broadcast(order_created(), vec![TargetGroup::Admin])
                .await
                .unwrap();
            assert_eq!(record.sequence.value(), i);
        }
    }
}
