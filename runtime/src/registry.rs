//! Subscription registry: group membership and connection lifecycle.
//!
//! The registry owns the mapping from a logical target (customer N,
//! restaurant N, rider N, admin) to the set of currently-connected live
//! subscribers. Membership is added on activation and removed on close; no
//! other path mutates it, and in particular event delivery never does.
//!
//! # Connection lifecycle
//!
//! ```text
//! Connecting ──> Authenticating ──> Active ──> Closed
//!                      │                         ▲
//!                      └──────> Rejected ────────┘
//! ```
//!
//! Only `Active` connections are addressable by the dispatcher. Closing a
//! connection removes it from every group it joined, and removes its entry,
//! synchronously before `close` returns: there is no window with dangling
//! membership and no accumulation of departed connections.
//!
//! # Concurrency
//!
//! All state lives behind one `tokio::sync::RwLock` with short, await-free
//! critical sections; per-connection channels are unbounded `mpsc`, so no
//! lock is ever held across an await. Dispatch reads run concurrently with
//! membership churn.

use ordercast_core::group::TargetGroup;
use ordercast_core::push::PushMessage;
use ordercast_core::sequence::EventId;
use ordercast_core::transport::{DeliveryError, GroupTransport};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};

/// Maximum messages buffered per connection during a replay handover.
///
/// A reconnecting client that cannot drain its replay before this many new
/// live events arrive is treated as a failed delivery (and recovers via a
/// fresh replay).
pub const MAX_HANDOVER_BUFFER: usize = 1024;

/// Errors from registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection id does not exist (never connected, or entry pruned).
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The requested lifecycle transition is not legal from the current
    /// state.
    #[error("Invalid transition for {connection}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// The connection attempting the transition.
        connection: ConnectionId,
        /// Its current state.
        from: ConnectionState,
        /// The requested state.
        to: ConnectionState,
    },

    /// The connection's channel is gone (peer dropped the receiver).
    #[error("Connection {0} is no longer receiving")]
    ChannelClosed(ConnectionId),

    /// The handover buffer overflowed during replay.
    #[error("Handover buffer overflow for connection {0}")]
    BufferOverflow(ConnectionId),
}

/// Process-unique identifier for a live connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport established, handshake not yet started.
    Connecting,
    /// Credential presented, verification in flight.
    Authenticating,
    /// Authenticated and addressable by the dispatcher.
    Active,
    /// Authentication failed; never joined any group. The entry lingers
    /// until the transport closes it.
    Rejected,
    /// Terminated by either end. Closed connections are pruned from the
    /// registry, so [`SubscriptionRegistry::state`] reads them as `None`.
    Closed,
}

/// How pushes reach an active connection.
enum DeliveryMode {
    /// Replay in progress: live pushes are parked in order until the replay
    /// stream has been written, then drained with duplicates skipped.
    Buffering(Vec<PushMessage>),
    /// Normal live delivery straight into the connection channel.
    Direct,
}

struct ConnectionEntry {
    state: ConnectionState,
    groups: HashSet<TargetGroup>,
    sender: Option<mpsc::UnboundedSender<PushMessage>>,
    mode: DeliveryMode,
}

struct RegistryInner {
    groups: HashMap<TargetGroup, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

/// Maps logical target groups to live subscriber connections.
///
/// Constructed once per process and injected where needed (dispatcher,
/// replay coordinator, transport layer), never ambient global state; tests
/// construct their own.
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                groups: HashMap::new(),
                connections: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection in the `Connecting` state.
    ///
    /// Returns the connection id and the receiving half of its push channel;
    /// the transport layer drains the receiver into the socket.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<PushMessage>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.inner.write().await;
        inner.connections.insert(
            id,
            ConnectionEntry {
                state: ConnectionState::Connecting,
                groups: HashSet::new(),
                sender: Some(tx),
                mode: DeliveryMode::Direct,
            },
        );
        drop(inner);

        tracing::debug!(connection = %id, "Connection registered");
        (id, rx)
    }

    /// Move a connection from `Connecting` to `Authenticating`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] or
    /// [`RegistryError::InvalidTransition`].
    pub async fn begin_authentication(&self, id: ConnectionId) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        if entry.state != ConnectionState::Connecting {
            return Err(RegistryError::InvalidTransition {
                connection: id,
                from: entry.state,
                to: ConnectionState::Authenticating,
            });
        }
        entry.state = ConnectionState::Authenticating;
        Ok(())
    }

    /// Reject an authenticating connection (invalid, expired, or missing
    /// credential). The connection never joins a group and its channel is
    /// dropped immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] or
    /// [`RegistryError::InvalidTransition`].
    pub async fn reject(&self, id: ConnectionId) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        if entry.state != ConnectionState::Authenticating {
            return Err(RegistryError::InvalidTransition {
                connection: id,
                from: entry.state,
                to: ConnectionState::Rejected,
            });
        }
        entry.state = ConnectionState::Rejected;
        entry.sender = None;
        drop(inner);

        tracing::info!(connection = %id, "Connection rejected");
        Ok(())
    }

    /// Activate an authenticated connection and join its groups, with live
    /// delivery enabled immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] or
    /// [`RegistryError::InvalidTransition`].
    pub async fn activate(
        &self,
        id: ConnectionId,
        groups: Vec<TargetGroup>,
    ) -> Result<(), RegistryError> {
        self.activate_inner(id, groups, DeliveryMode::Direct).await
    }

    /// Activate a connection with live pushes parked in the handover buffer.
    ///
    /// Used by the replay coordinator: the connection joins its groups (so
    /// no concurrent event is dropped) but nothing reaches its channel until
    /// [`SubscriptionRegistry::release_buffer`] drains the parked messages.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] or
    /// [`RegistryError::InvalidTransition`].
    pub async fn activate_buffered(
        &self,
        id: ConnectionId,
        groups: Vec<TargetGroup>,
    ) -> Result<(), RegistryError> {
        self.activate_inner(id, groups, DeliveryMode::Buffering(Vec::new()))
            .await
    }

    async fn activate_inner(
        &self,
        id: ConnectionId,
        groups: Vec<TargetGroup>,
        mode: DeliveryMode,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        if entry.state != ConnectionState::Authenticating {
            return Err(RegistryError::InvalidTransition {
                connection: id,
                from: entry.state,
                to: ConnectionState::Active,
            });
        }
        entry.state = ConnectionState::Active;
        entry.mode = mode;
        entry.groups = groups.iter().copied().collect();

        for group in &groups {
            inner.groups.entry(*group).or_default().insert(id);
        }
        drop(inner);

        tracing::info!(connection = %id, groups = ?groups, "Connection active");
        Ok(())
    }

    /// Write one message straight into a connection's channel, bypassing
    /// group routing. Used by the replay coordinator to stream backfill.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if the connection does
    /// not exist, or [`RegistryError::ChannelClosed`] if its receiver is
    /// gone.
    pub async fn send_direct(
        &self,
        id: ConnectionId,
        message: PushMessage,
    ) -> Result<(), RegistryError> {
        let inner = self.inner.read().await;
        let entry = inner
            .connections
            .get(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        let sender = entry
            .sender
            .as_ref()
            .ok_or(RegistryError::ChannelClosed(id))?;
        sender
            .send(message)
            .map_err(|_| RegistryError::ChannelClosed(id))
    }

    /// Drain a connection's handover buffer and switch it to direct
    /// delivery.
    ///
    /// Buffered messages whose event id is in `replayed` were already
    /// streamed by the replay and are skipped; everything else is written in
    /// arrival order. The skip is by event id, not by log position, because
    /// a scoped replay covers only part of the stream: a buffered event
    /// outside the replay scope was never replayed and must still be
    /// delivered. Returns the number of drained messages delivered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] or
    /// [`RegistryError::ChannelClosed`].
    pub async fn release_buffer(
        &self,
        id: ConnectionId,
        replayed: &HashSet<EventId>,
    ) -> Result<usize, RegistryError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        let buffered = match std::mem::replace(&mut entry.mode, DeliveryMode::Direct) {
            DeliveryMode::Buffering(buffered) => buffered,
            DeliveryMode::Direct => Vec::new(),
        };

        let sender = entry
            .sender
            .as_ref()
            .ok_or(RegistryError::ChannelClosed(id))?;

        let mut delivered = 0;
        for message in buffered {
            if replayed.contains(&message.event_id) {
                continue;
            }
            sender
                .send(message)
                .map_err(|_| RegistryError::ChannelClosed(id))?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Close a connection: synchronously remove it from every group and
    /// prune its entry.
    ///
    /// Legal from any state and triggered by either end (peer hangup, auth
    /// expiry, server shutdown). The entry is removed outright so the
    /// registry never accumulates departed connections; afterwards
    /// [`SubscriptionRegistry::state`] reads the id as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownConnection`] if the id never existed
    /// or was already closed.
    pub async fn close(&self, id: ConnectionId) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .connections
            .remove(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        for group in &entry.groups {
            if let Some(members) = inner.groups.get_mut(group) {
                members.remove(&id);
                if members.is_empty() {
                    inner.groups.remove(group);
                }
            }
        }
        drop(inner);

        tracing::debug!(connection = %id, "Connection closed");
        Ok(())
    }

    /// Current state of a connection, or `None` if it never existed or was
    /// closed and pruned.
    pub async fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.inner.read().await.connections.get(&id).map(|e| e.state)
    }

    /// Number of active members in a group.
    pub async fn member_count(&self, group: TargetGroup) -> usize {
        self.inner
            .read()
            .await
            .groups
            .get(&group)
            .map_or(0, HashSet::len)
    }

    /// The groups a connection has joined.
    pub async fn groups_of(&self, id: ConnectionId) -> HashSet<TargetGroup> {
        self.inner
            .read()
            .await
            .connections
            .get(&id)
            .map(|e| e.groups.clone())
            .unwrap_or_default()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupTransport for SubscriptionRegistry {
    /// Push to every current member of a group.
    ///
    /// A group with zero members is a successful no-op. Buffered (replaying)
    /// members park the message; direct members receive it immediately. If
    /// any member fails (channel gone, or handover buffer full) the whole
    /// group attempt errors so the retry pipeline re-covers it; members that
    /// already received the message tolerate the duplicate (at-least-once).
    fn push(
        &self,
        group: TargetGroup,
        message: PushMessage,
    ) -> Pin<Box<dyn Future<Output = Result<usize, DeliveryError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;

            let members: Vec<ConnectionId> = inner
                .groups
                .get(&group)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();

            if members.is_empty() {
                return Ok(0);
            }

            let mut delivered = 0;
            let mut failures = 0;
            for id in members {
                let Some(entry) = inner.connections.get_mut(&id) else {
                    failures += 1;
                    continue;
                };
                if entry.state != ConnectionState::Active {
                    failures += 1;
                    continue;
                }
                match &mut entry.mode {
                    DeliveryMode::Buffering(buffered) => {
                        if buffered.len() >= MAX_HANDOVER_BUFFER {
                            failures += 1;
                        } else {
                            buffered.push(message.clone());
                            delivered += 1;
                        }
                    }
                    DeliveryMode::Direct => match &entry.sender {
                        Some(sender) if sender.send(message.clone()).is_ok() => delivered += 1,
                        _ => failures += 1,
                    },
                }
            }
            drop(inner);

            if failures > 0 {
                Err(DeliveryError::SendFailed {
                    group: group.channel_name(),
                    reason: format!("{failures} member(s) unreachable"),
                })
            } else {
                Ok(delivered)
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Utc;
    use ordercast_core::event::{EventRecord, EventType};
    use ordercast_core::sequence::SequenceNumber;
    use serde_json::json;

    fn message(sequence: u64) -> PushMessage {
        PushMessage::from_record(&EventRecord {
            event_id: EventId::generate(),
            sequence: SequenceNumber::new(sequence),
            event_type: EventType::new("order.created").unwrap(),
            version: "1".to_string(),
            aggregate_type: "Order".to_string(),
            aggregate_id: "7".to_string(),
            payload: json!({}),
            metadata: json!({}),
            timestamp: Utc::now(),
        })
    }

    async fn active_connection(
        registry: &SubscriptionRegistry,
        groups: Vec<TargetGroup>,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<PushMessage>) {
        let (id, rx) = registry.connect().await;
        registry.begin_authentication(id).await.unwrap();
        registry.activate(id, groups).await.unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn lifecycle_happy_path() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = registry.connect().await;
        assert_eq!(registry.state(id).await, Some(ConnectionState::Connecting));

        registry.begin_authentication(id).await.unwrap();
        assert_eq!(
            registry.state(id).await,
            Some(ConnectionState::Authenticating)
        );

        registry
            .activate(id, vec![TargetGroup::Customer(42)])
            .await
            .unwrap();
        assert_eq!(registry.state(id).await, Some(ConnectionState::Active));
        assert_eq!(registry.member_count(TargetGroup::Customer(42)).await, 1);

        registry.close(id).await.unwrap();
        assert_eq!(registry.state(id).await, None);
        assert_eq!(registry.member_count(TargetGroup::Customer(42)).await, 0);
    }

    #[tokio::test]
    async fn close_prunes_the_connection_entry() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = active_connection(&registry, vec![TargetGroup::Admin]).await;

        registry.close(id).await.unwrap();
        assert_eq!(registry.state(id).await, None);
        assert!(registry.groups_of(id).await.is_empty());

        // The entry is gone, not tombstoned; a second close errors.
        assert!(matches!(
            registry.close(id).await,
            Err(RegistryError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn rejected_connection_joins_no_group() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = registry.connect().await;
        registry.begin_authentication(id).await.unwrap();
        registry.reject(id).await.unwrap();

        assert_eq!(registry.state(id).await, Some(ConnectionState::Rejected));
        assert!(registry.groups_of(id).await.is_empty());

        // A rejected connection cannot be activated.
        let result = registry.activate(id, vec![TargetGroup::Admin]).await;
        assert!(matches!(
            result,
            Err(RegistryError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn activate_requires_authentication_first() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = registry.connect().await;
        let result = registry.activate(id, vec![TargetGroup::Admin]).await;
        assert!(matches!(
            result,
            Err(RegistryError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn push_reaches_all_group_members() {
        let registry = SubscriptionRegistry::new();
        let (_id1, mut rx1) = active_connection(&registry, vec![TargetGroup::Admin]).await;
        let (_id2, mut rx2) = active_connection(&registry, vec![TargetGroup::Admin]).await;

        let delivered = registry
            .push(TargetGroup::Admin, message(1))
            .await
            .unwrap();
        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn push_to_empty_group_is_noop() {
        let registry = SubscriptionRegistry::new();
        let delivered = registry
            .push(TargetGroup::Restaurant(5), message(1))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn push_does_not_cross_groups() {
        let registry = SubscriptionRegistry::new();
        let (_ca, mut rx_customer) =
            active_connection(&registry, vec![TargetGroup::Customer(1)]).await;
        let (_ra, mut rx_rider) = active_connection(&registry, vec![TargetGroup::Rider(9)]).await;

        registry
            .push(TargetGroup::Customer(1), message(1))
            .await
            .unwrap();

        assert!(rx_customer.try_recv().is_ok());
        assert!(rx_rider.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_connection_receives_nothing() {
        let registry = SubscriptionRegistry::new();
        let (id, mut rx) = active_connection(&registry, vec![TargetGroup::Admin]).await;
        registry.close(id).await.unwrap();

        let delivered = registry
            .push(TargetGroup::Admin, message(1))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_fails_the_group_push() {
        let registry = SubscriptionRegistry::new();
        let (_id, rx) = active_connection(&registry, vec![TargetGroup::Admin]).await;
        drop(rx);

        let result = registry.push(TargetGroup::Admin, message(1)).await;
        assert!(matches!(result, Err(DeliveryError::SendFailed { .. })));
    }

    #[tokio::test]
    async fn buffered_connection_parks_pushes_until_release() {
        let registry = SubscriptionRegistry::new();
        let (id, mut rx) = registry.connect().await;
        registry.begin_authentication(id).await.unwrap();
        registry
            .activate_buffered(id, vec![TargetGroup::Admin])
            .await
            .unwrap();

        let replayed = message(4);
        let missed = message(5);
        let replayed_ids: HashSet<EventId> = [replayed.event_id].into();

        registry
            .push(TargetGroup::Admin, replayed)
            .await
            .unwrap();
        registry
            .push(TargetGroup::Admin, missed)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err(), "nothing delivered while buffering");

        // The first event was covered by replay; only the second drains.
        let drained = registry.release_buffer(id, &replayed_ids).await.unwrap();
        assert_eq!(drained, 1);
        assert_eq!(rx.try_recv().unwrap().data.sequence.value(), 5);
        assert!(rx.try_recv().is_err());

        // Subsequent pushes flow directly.
        registry
            .push(TargetGroup::Admin, message(6))
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap().data.sequence.value(), 6);
    }

    #[tokio::test]
    async fn multi_group_membership_removed_on_close() {
        let registry = SubscriptionRegistry::new();
        let (id, _rx) = active_connection(
            &registry,
            vec![TargetGroup::Customer(1), TargetGroup::Admin],
        )
        .await;

        assert_eq!(registry.groups_of(id).await.len(), 2);
        registry.close(id).await.unwrap();
        assert_eq!(registry.member_count(TargetGroup::Customer(1)).await, 0);
        assert_eq!(registry.member_count(TargetGroup::Admin).await, 0);
        assert!(registry.groups_of(id).await.is_empty());
    }
}
