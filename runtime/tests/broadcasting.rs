//! End-to-end broadcasting tests: dispatcher, registry, retry pipeline, and
//! replay working against one shared log.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use ordercast_core::dead_letter::DeadLetterStore;
use ordercast_core::event::NewEvent;
use ordercast_core::group::TargetGroup;
use ordercast_core::log::{EventLog, ReadLimit};
use ordercast_core::push::{HandlerTable, PushMessage};
use ordercast_core::transport::GroupTransport;
use ordercast_runtime::{
    BroadcastDispatcher, ConnectionId, DispatcherConfig, ReplayConfig, ReplayCoordinator,
    ReplayScope, RetryPolicy, SubscriptionRegistry,
};
use ordercast_testing::{InMemoryDeadLetterStore, InMemoryEventLog};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;

struct Stack {
    log: Arc<InMemoryEventLog>,
    registry: Arc<SubscriptionRegistry>,
    dead_letters: Arc<InMemoryDeadLetterStore>,
    dispatcher: BroadcastDispatcher,
    coordinator: ReplayCoordinator,
}

fn stack() -> Stack {
    let log = Arc::new(InMemoryEventLog::new());
    let registry = Arc::new(SubscriptionRegistry::new());
    let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
    let handlers = Arc::new(HandlerTable::with_default_handlers().unwrap());

    let dispatcher = BroadcastDispatcher::new(
        Arc::clone(&log) as Arc<dyn EventLog>,
        Arc::clone(&registry) as Arc<dyn GroupTransport>,
        Arc::clone(&handlers),
        Arc::clone(&dead_letters) as Arc<dyn DeadLetterStore>,
        DispatcherConfig {
            retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(5))
                .build(),
        },
    );
    let coordinator = ReplayCoordinator::new(
        Arc::clone(&registry),
        Arc::clone(&log) as Arc<dyn EventLog>,
        handlers,
        ReplayConfig::default(),
    );

    Stack {
        log,
        registry,
        dead_letters,
        dispatcher,
        coordinator,
    }
}

fn order_event(event_type: &str, order_id: &str) -> NewEvent {
    NewEvent::new(event_type, "Order", order_id)
        .unwrap()
        .payload(json!({ "order_id": order_id }))
        .unwrap()
}

async fn subscriber(
    registry: &SubscriptionRegistry,
    groups: Vec<TargetGroup>,
) -> (ConnectionId, UnboundedReceiver<PushMessage>) {
    let (id, rx) = registry.connect().await;
    registry.begin_authentication(id).await.unwrap();
    registry.activate(id, groups).await.unwrap();
    (id, rx)
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

fn drain(rx: &mut UnboundedReceiver<PushMessage>) -> Vec<PushMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

#[tokio::test]
async fn concurrent_broadcasts_get_dense_unique_sequences() {
    let s = stack();

    let mut handles = Vec::new();
    for i in 0..20 {
        let dispatcher = s.dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher
                .broadcast(
                    order_event("order.created", &i.to_string()),
                    vec![TargetGroup::Admin],
                )
                .await
                .unwrap()
                .sequence
                .value()
        }));
    }

    let mut sequences = Vec::new();
    for handle in handles {
        sequences.push(handle.await.unwrap());
    }
    sequences.sort_unstable();

    // Dense, unique, starting at 1 regardless of interleaving.
    assert_eq!(sequences, (1..=20).collect::<Vec<u64>>());

    // The log agrees, in ascending order.
    let batch = s.log.read_since(None, ReadLimit::max()).await.unwrap();
    let stored: Vec<u64> = batch.events.iter().map(|e| e.sequence.value()).collect();
    assert_eq!(stored, (1..=20).collect::<Vec<u64>>());
}

#[tokio::test]
async fn subscribers_receive_only_their_groups() {
    let s = stack();
    let (_c, mut customer_rx) =
        subscriber(&s.registry, vec![TargetGroup::Customer(42)]).await;
    let (_r, mut restaurant_rx) =
        subscriber(&s.registry, vec![TargetGroup::Restaurant(9)]).await;
    let (_a, mut admin_rx) = subscriber(&s.registry, vec![TargetGroup::Admin]).await;

    s.dispatcher
        .broadcast_to_multiple(order_event("order.created", "7"), Some(42), Some(9), None, true)
        .await
        .unwrap();

    wait_until(|| async { !admin_rx.is_empty() }).await;
    wait_until(|| async { !customer_rx.is_empty() }).await;
    wait_until(|| async { !restaurant_rx.is_empty() }).await;

    assert_eq!(drain(&mut admin_rx).len(), 1);
    assert_eq!(drain(&mut customer_rx).len(), 1);
    assert_eq!(drain(&mut restaurant_rx).len(), 1);
}

#[tokio::test]
async fn broadcast_with_no_subscribers_is_a_successful_noop() {
    let s = stack();
    // Admin is live; restaurant_5 has no connections at all.
    let (_a, mut admin_rx) = subscriber(&s.registry, vec![TargetGroup::Admin]).await;

    let record = s
        .dispatcher
        .broadcast(
            order_event("order.created", "7"),
            vec![TargetGroup::Restaurant(5), TargetGroup::Admin],
        )
        .await
        .unwrap();

    wait_until(|| async { !admin_rx.is_empty() }).await;
    let admin_messages = drain(&mut admin_rx);
    assert_eq!(admin_messages.len(), 1);
    assert_eq!(admin_messages[0].event_id, record.event_id);

    // The empty group produced neither a retry nor a dead letter.
    sleep(Duration::from_millis(20)).await;
    assert_eq!(s.dead_letters.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn unreachable_subscriber_is_retried_then_dead_lettered() {
    let s = stack();
    let (_id, rx) = subscriber(&s.registry, vec![TargetGroup::Rider(3)]).await;
    drop(rx); // Receiver gone: every push to the group fails.

    let record = s
        .dispatcher
        .broadcast(order_event("delivery.assigned", "7"), vec![TargetGroup::Rider(3)])
        .await
        .unwrap();

    wait_until(|| async { s.dead_letters.count_pending().await.unwrap() > 0 }).await;

    // Exactly one dead letter for the (event, group) pair, after max retries.
    assert_eq!(
        s.dead_letters
            .count_for(record.event_id, TargetGroup::Rider(3))
            .await,
        1
    );
    let pending = s.dead_letters.list_pending(10).await.unwrap();
    assert_eq!(pending[0].retry_count, 2);

    // The event itself is still durable.
    assert!(s.log.get(record.event_id).await.unwrap().is_some());
}

#[tokio::test]
async fn per_aggregate_order_is_preserved_for_live_subscribers() {
    let s = stack();
    let (_id, mut rx) = subscriber(&s.registry, vec![TargetGroup::Customer(42)]).await;

    for event_type in ["order.created", "order.accepted", "order.status_updated"] {
        s.dispatcher
            .broadcast_to_customer(order_event(event_type, "7"), 42)
            .await
            .unwrap();
        // One broadcast settles before the next begins; within one group the
        // channel preserves push order.
        wait_until(|| async { !rx.is_empty() }).await;
        let _ = rx.recv().await;
    }

    let batch = s.log.read_since(None, ReadLimit::max()).await.unwrap();
    let types: Vec<&str> = batch
        .events
        .iter()
        .map(|e| e.event_type.as_str())
        .collect();
    assert_eq!(
        types,
        vec!["order.created", "order.accepted", "order.status_updated"]
    );
}

#[tokio::test]
async fn reconnect_replays_missed_events_then_goes_live() {
    let s = stack();

    // A customer sees the first event, then disconnects.
    let (id, mut rx) = subscriber(&s.registry, vec![TargetGroup::Customer(42)]).await;
    let e1 = s
        .dispatcher
        .broadcast_to_customer(order_event("order.created", "7"), 42)
        .await
        .unwrap();
    wait_until(|| async { !rx.is_empty() }).await;
    drain(&mut rx);
    s.registry.close(id).await.unwrap();

    // Two events land while the customer is away.
    s.dispatcher
        .broadcast_to_customer(order_event("order.accepted", "7"), 42)
        .await
        .unwrap();
    s.dispatcher
        .broadcast_to_customer(order_event("order.status_updated", "7"), 42)
        .await
        .unwrap();
    wait_until(|| async { s.log.len().await == 3 }).await;

    // Reconnect with the last-seen cursor.
    let (id2, mut rx2) = s.registry.connect().await;
    s.registry.begin_authentication(id2).await.unwrap();
    let outcome = s
        .coordinator
        .activate_with_replay(
            id2,
            vec![TargetGroup::Customer(42)],
            Some(e1.event_id),
            ReplayScope::All,
        )
        .await
        .unwrap();
    assert_eq!(outcome.replayed, 2);
    assert!(!outcome.gap_possible());

    // Replayed events arrive in sequence order, then live delivery resumes.
    let replayed = drain(&mut rx2);
    assert_eq!(
        replayed
            .iter()
            .map(|m| m.data.sequence.value())
            .collect::<Vec<_>>(),
        vec![2, 3]
    );

    s.dispatcher
        .broadcast_to_customer(order_event("order.cancelled", "7"), 42)
        .await
        .unwrap();
    wait_until(|| async { !rx2.is_empty() }).await;
    let live = drain(&mut rx2);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].data.sequence.value(), 4);
}

#[tokio::test]
async fn push_shape_matches_the_wire_contract() {
    let s = stack();
    let (_id, mut rx) = subscriber(&s.registry, vec![TargetGroup::Customer(42)]).await;

    s.dispatcher
        .broadcast_to_customer(order_event("order.created", "7"), 42)
        .await
        .unwrap();
    wait_until(|| async { !rx.is_empty() }).await;

    let message = rx.recv().await.unwrap();
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["type"], "order_created");
    assert_eq!(value["data"]["type"], "order.created");
    assert_eq!(value["data"]["aggregate_id"], "7");
    assert_eq!(value["event_id"], value["data"]["event_id"]);
    assert!(value["data"].get("metadata").is_none());
}
