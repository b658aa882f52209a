//! Replay protocol for reconnecting subscribers.
//!
//! A reconnecting client presents the last event id it processed. The
//! coordinator activates the connection with its live pushes parked in the
//! handover buffer, streams everything after the cursor straight into the
//! connection in batches, then drains the buffer (skipping what the replay
//! already covered) and switches the connection to live delivery.
//!
//! Joining the groups *before* reading means an event appended during the
//! replay is either inside a replay batch or parked in the buffer, so it
//! cannot be dropped; the set of replayed event ids is skipped at release
//! time, which keeps it from being delivered twice while leaving buffered
//! events the replay scope never covered untouched.
//!
//! An unknown cursor does not fail the reconnect: the read degrades to a
//! bounded recent window, and the outcome carries the resolution so callers
//! can tell the client a gap may exist.

use crate::registry::{ConnectionId, RegistryError, SubscriptionRegistry};
use ordercast_core::event::EventType;
use ordercast_core::group::TargetGroup;
use ordercast_core::log::{CursorResolution, EventLog, EventLogError, ReadLimit};
use ordercast_core::push::HandlerTable;
use ordercast_core::sequence::{EventId, SequenceNumber};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Errors from a replay activation.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// The connection could not be activated or written to. The coordinator
    /// closes the connection before returning this; the client reconnects.
    #[error("Registry error during replay: {0}")]
    Registry(#[from] RegistryError),

    /// A replay read failed at the log.
    #[error("Event log error during replay: {0}")]
    Log(#[from] EventLogError),
}

/// What subset of the log a replay covers.
#[derive(Clone, Debug)]
pub enum ReplayScope {
    /// Everything after the cursor.
    All,
    /// Only events of one aggregate.
    Aggregate {
        /// Aggregate kind, e.g. `Order`.
        aggregate_type: String,
        /// Aggregate instance id.
        aggregate_id: String,
    },
    /// Only events of one type.
    EventType(EventType),
}

/// Configuration for a [`ReplayCoordinator`].
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Events fetched per replay read. Clamped by the log's hard maximum.
    pub batch_size: ReadLimit,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            batch_size: ReadLimit::DEFAULT,
        }
    }
}

/// What a replay activation did.
#[derive(Debug, Clone, Copy)]
pub struct ReplayOutcome {
    /// Number of events streamed to the connection before going live.
    pub replayed: usize,

    /// How the cursor was resolved, or `None` when no cursor was presented
    /// (first connection, no replay).
    pub resolution: Option<CursorResolution>,

    /// Sequence of the last replayed event, if any were replayed.
    pub last_sequence: Option<SequenceNumber>,
}

impl ReplayOutcome {
    /// Whether the client should reconcile a possible gap (stale cursor fell
    /// back to the recent window).
    #[must_use]
    pub fn gap_possible(&self) -> bool {
        self.resolution.is_some_and(CursorResolution::is_fallback)
    }
}

/// Activates connections with catch-up replay and a lossless handover to
/// live delivery.
pub struct ReplayCoordinator {
    registry: Arc<SubscriptionRegistry>,
    log: Arc<dyn EventLog>,
    handlers: Arc<HandlerTable>,
    config: ReplayConfig,
}

impl ReplayCoordinator {
    /// Create a coordinator over a registry and log.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        log: Arc<dyn EventLog>,
        handlers: Arc<HandlerTable>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            registry,
            log,
            handlers,
            config,
        }
    }

    /// Activate an authenticated connection, replaying missed events first.
    ///
    /// With no cursor this is a plain activation: the client is new (or
    /// chose a fresh start) and goes straight to live delivery. With a
    /// cursor, the connection joins its groups buffered, the replay streams
    /// in sequence order, and the handover buffer is drained before live
    /// delivery begins; no event is duplicated or dropped in the window.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError`] if activation, a replay read, or a replay
    /// write fails. On a mid-replay failure the connection is closed (best
    /// effort) so it cannot linger half-activated; the client reconnects and
    /// replays from its unchanged cursor.
    pub async fn activate_with_replay(
        &self,
        id: ConnectionId,
        groups: Vec<TargetGroup>,
        cursor: Option<EventId>,
        scope: ReplayScope,
    ) -> Result<ReplayOutcome, ReplayError> {
        let Some(cursor) = cursor else {
            self.registry.activate(id, groups).await?;
            return Ok(ReplayOutcome {
                replayed: 0,
                resolution: None,
                last_sequence: None,
            });
        };

        self.registry.activate_buffered(id, groups).await?;
        match self.run_replay(id, cursor, scope).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // Do not leave the connection parked in buffering mode.
                if let Err(close_err) = self.registry.close(id).await {
                    tracing::warn!(
                        connection = %id,
                        error = %close_err,
                        "Failed to close connection after replay error"
                    );
                }
                Err(err)
            }
        }
    }

    async fn run_replay(
        &self,
        id: ConnectionId,
        cursor: EventId,
        scope: ReplayScope,
    ) -> Result<ReplayOutcome, ReplayError> {
        let mut position = Some(cursor);
        let mut first_resolution = None;
        let mut replayed_ids = HashSet::new();
        let mut last_sequence = None;

        loop {
            let batch = self.read_batch(position, &scope).await?;
            if first_resolution.is_none() {
                first_resolution = Some(batch.resolution);
            }

            let fetched = batch.events.len();
            for record in &batch.events {
                let message = self.handlers.render(record);
                self.registry.send_direct(id, message).await?;
                last_sequence = Some(record.sequence);
                position = Some(record.event_id);
                replayed_ids.insert(record.event_id);
            }

            if fetched < self.config.batch_size.value() {
                break;
            }
        }

        // Drop only the buffered copies of what the replay already streamed.
        // A scoped replay leaves out-of-scope buffered events in place.
        let replayed = replayed_ids.len();
        let drained = self.registry.release_buffer(id, &replayed_ids).await?;
        tracing::info!(
            connection = %id,
            replayed,
            drained,
            resolution = ?first_resolution,
            "Replay complete, connection live"
        );
        metrics::counter!("ordercast_replays_total").increment(1);

        Ok(ReplayOutcome {
            replayed,
            resolution: first_resolution,
            last_sequence,
        })
    }

    async fn read_batch(
        &self,
        cursor: Option<EventId>,
        scope: &ReplayScope,
    ) -> Result<ordercast_core::log::ReplayBatch, EventLogError> {
        match scope {
            ReplayScope::All => self.log.read_since(cursor, self.config.batch_size).await,
            ReplayScope::Aggregate {
                aggregate_type,
                aggregate_id,
            } => {
                self.log
                    .read_by_aggregate(
                        aggregate_type.clone(),
                        aggregate_id.clone(),
                        cursor,
                        self.config.batch_size,
                    )
                    .await
            }
            ReplayScope::EventType(event_type) => {
                self.log
                    .read_by_type(event_type.clone(), cursor, self.config.batch_size)
                    .await
            }
        }
    }
}
