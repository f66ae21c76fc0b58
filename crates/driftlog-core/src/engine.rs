//! The engine façade: wiring identity, transport, stores, and
//! projections behind a narrow API.
//!
//! `DriftEngine` holds no domain logic. It owns the storage root, the
//! gossip node, and the projection engine, and exposes exactly the
//! surface an application needs: start/stop, `create_event`, the engine
//! event stream, and projection snapshot management. Ownership is a DAG:
//! the engine owns its parts, the node holds the transport by interface,
//! and nothing holds a reference back up.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{DriftError, DriftResult};
use crate::projection::{Projection, ProjectionEngine, ProjectionStatus};
use crate::storage::{EventStore, ProjectionStore, Storage, VectorClockStore};
use crate::sync::{EngineEvent, GossipNode, PeerSnapshot};
use crate::transport::TransportAdapter;
use crate::types::{Event, NodeId, Payload, VectorClock};

/// Database file name inside the engine's data directory.
const DB_FILE: &str = "driftlog.redb";

/// Aggregate runtime counters for one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Events in the local log
    pub event_count: u64,
    /// Distinct origins with a nonzero watermark
    pub known_origins: usize,
    /// Peers currently in the active set
    pub active_peers: usize,
    /// Registered projections
    pub projections: usize,
}

/// One replication engine instance: an identity, a log, a gossip node,
/// and a set of projections.
pub struct DriftEngine {
    node_id: NodeId,
    events: Arc<EventStore>,
    clocks: Arc<VectorClockStore>,
    snapshots: Arc<ProjectionStore>,
    node: Arc<GossipNode>,
    transport: Arc<dyn TransportAdapter>,
    projections: Arc<tokio::sync::Mutex<ProjectionEngine>>,
    projection_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl DriftEngine {
    /// Build an engine for `node_id` with its data under `data_dir`.
    ///
    /// The identity comes from the caller (the credential store is
    /// outside this crate); the transport comes in by interface. Nothing
    /// runs until [`DriftEngine::start`].
    pub fn new(
        node_id: NodeId,
        data_dir: impl AsRef<Path>,
        config: EngineConfig,
        transport: Arc<dyn TransportAdapter>,
    ) -> DriftResult<Self> {
        config.validate()?;

        let storage = Storage::open(data_dir.as_ref().join(DB_FILE))?;
        let events = Arc::new(storage.events());
        let clocks = Arc::new(storage.clocks());
        let snapshots = Arc::new(storage.projections());

        let node = GossipNode::new(
            node_id.clone(),
            config.clone(),
            events.clone(),
            clocks.clone(),
            transport.clone(),
        );
        let projections = Arc::new(tokio::sync::Mutex::new(ProjectionEngine::new(
            snapshots.clone(),
            config.auto_save_event_count,
        )));

        Ok(Self {
            node_id,
            events,
            clocks,
            snapshots,
            node,
            transport,
            projections,
            projection_task: parking_lot::Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// This engine's identity.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Whether the engine is running.
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Register a projection. Projections registered before `start` are
    /// restored from snapshots (or replayed) during startup; projections
    /// registered later see only new events until the next rebuild.
    pub async fn register_projection(&self, projection: Box<dyn Projection>) {
        self.projections.lock().await.register(projection);
    }

    /// Bring the engine up: transport, projection restore/replay, gossip
    /// node, projection mailbox. Idempotent.
    pub async fn start(&self) -> DriftResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(node = %self.node_id, "Engine already started");
            return Ok(());
        }
        info!(node = %self.node_id, "Starting engine");

        self.transport.start().await?;

        // Restore read models before any new event can arrive.
        let all_events = self.events.get_all_events()?;
        self.projections
            .lock()
            .await
            .restore_or_replay(&all_events);

        // Projection mailbox: one consumer task, applies in arrival
        // order, so projections never observe partial application.
        // Subscribed before the node runs so nothing slips past it.
        let mut stream = self.node.subscribe();
        self.node.start()?;
        let projections = self.projections.clone();
        let task = tokio::spawn(async move {
            loop {
                match stream.recv().await {
                    Ok(EngineEvent::EventCreated(event))
                    | Ok(EngineEvent::EventReceived(event)) => {
                        projections.lock().await.process_event(&event);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Projection mailbox lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.projection_task.lock() = Some(task);

        Ok(())
    }

    /// Bring the engine down: gossip node, projection snapshot save,
    /// transport. Idempotent.
    pub async fn stop(&self) -> DriftResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!(node = %self.node_id, "Stopping engine");

        self.node.stop().await?;

        let task = self.projection_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.projections.lock().await.save_all();

        self.transport.stop().await?;
        Ok(())
    }

    /// Create a local event with the given payload.
    pub fn create_event(&self, payload: Payload) -> DriftResult<Event> {
        if !self.is_running() {
            return Err(DriftError::Shutdown);
        }
        self.node.create_event(payload)
    }

    /// Subscribe to the engine event stream (`EventCreated`,
    /// `EventReceived`, `PeerUp`, `PeerDown`).
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.node.subscribe()
    }

    /// Persist every projection's snapshot now.
    pub async fn save_projection_states(&self) {
        self.projections.lock().await.save_all();
    }

    /// Drop every persisted projection snapshot and reset in-memory
    /// projection state.
    pub async fn clear_projection_states(&self) -> DriftResult<()> {
        self.projections.lock().await.clear_saved_states()
    }

    /// Rebuild every projection from the current log contents. Use after
    /// administrative pruning or after registering a late projection.
    pub async fn rebuild_projections(&self) -> DriftResult<()> {
        let all_events = self.events.get_all_events()?;
        self.projections.lock().await.rebuild(&all_events);
        Ok(())
    }

    /// Current serialized state of one projection.
    pub async fn projection_snapshot(&self, name: &str) -> DriftResult<Option<serde_json::Value>> {
        self.projections.lock().await.snapshot_of(name)
    }

    /// Bookkeeping for one projection.
    pub async fn projection_status(&self, name: &str) -> Option<ProjectionStatus> {
        self.projections.lock().await.status(name).cloned()
    }

    /// The local log's watermark map.
    pub fn watermarks(&self) -> DriftResult<VectorClock> {
        self.events.get_latest_timestamps_for_all_nodes()
    }

    /// Observability rows for the active peer set.
    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.node.peer_snapshot()
    }

    /// Aggregate runtime counters.
    pub async fn stats(&self) -> DriftResult<EngineStats> {
        Ok(EngineStats {
            event_count: self.events.get_event_count()?,
            known_origins: self.events.get_latest_timestamps_for_all_nodes()?.len(),
            active_peers: self.node.peer_snapshot().len(),
            projections: self.projections.lock().await.projection_names().len(),
        })
    }

    /// Direct handle to the event log (reads, administrative prune).
    pub fn event_store(&self) -> Arc<EventStore> {
        self.events.clone()
    }

    /// Direct handle to the vector clock store.
    pub fn clock_store(&self) -> Arc<VectorClockStore> {
        self.clocks.clone()
    }

    /// Direct handle to the projection snapshot store.
    pub fn projection_store(&self) -> Arc<ProjectionStore> {
        self.snapshots.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::EventCountProjection;
    use crate::transport::MemoryNetwork;
    use tempfile::TempDir;

    async fn make_engine(net: &MemoryNetwork, name: &str) -> (DriftEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(net.join(NodeId::from(name)));
        let engine = DriftEngine::new(
            NodeId::from(name),
            temp_dir.path(),
            EngineConfig::default(),
            transport,
        )
        .unwrap();
        engine
            .register_projection(Box::new(EventCountProjection::new()))
            .await;
        (engine, temp_dir)
    }

    #[tokio::test]
    async fn test_engine_lifecycle() {
        let net = MemoryNetwork::new();
        let (engine, _tmp) = make_engine(&net, "a").await;

        assert!(!engine.is_running());
        engine.start().await.unwrap();
        assert!(engine.is_running());
        engine.start().await.unwrap();

        engine.stop().await.unwrap();
        assert!(!engine.is_running());
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_event_requires_running() {
        let net = MemoryNetwork::new();
        let (engine, _tmp) = make_engine(&net, "a").await;

        assert!(matches!(
            engine.create_event(Payload::new()),
            Err(DriftError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_create_event_with_empty_payload() {
        let net = MemoryNetwork::new();
        let (engine, _tmp) = make_engine(&net, "a").await;
        engine.start().await.unwrap();

        let event = engine.create_event(Payload::new()).unwrap();
        assert_eq!(event.timestamp, 1);
        assert!(event.payload.is_empty());

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_events_reach_projections() {
        let net = MemoryNetwork::new();
        let (engine, _tmp) = make_engine(&net, "a").await;
        engine.start().await.unwrap();

        for _ in 0..3 {
            engine.create_event(Payload::new()).unwrap();
        }

        // The projection mailbox is asynchronous; give it a beat.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let status = engine.projection_status("event_counts").await.unwrap();
        assert_eq!(status.event_count, 3);

        let state = engine
            .projection_snapshot("event_counts")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.get("total"), Some(&serde_json::json!(3)));

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stats() {
        let net = MemoryNetwork::new();
        let (engine, _tmp) = make_engine(&net, "a").await;
        engine.start().await.unwrap();

        engine.create_event(Payload::new()).unwrap();
        engine.create_event(Payload::new()).unwrap();

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.event_count, 2);
        assert_eq!(stats.known_origins, 1);
        assert_eq!(stats.projections, 1);

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let net = MemoryNetwork::new();
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(net.join(NodeId::from("a")));
        let config = EngineConfig {
            fanout: 0,
            ..Default::default()
        };

        let result = DriftEngine::new(NodeId::from("a"), temp_dir.path(), config, transport);
        assert!(matches!(result, Err(DriftError::ConfigInvalid(_))));
    }
}
