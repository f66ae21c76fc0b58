//! The gossip node: owner of the local vector clock and driver of the
//! three-phase anti-entropy exchange.
//!
//! ## Task layout (all spawned on `start`, all cancelled on `stop`)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  GossipNode                                                     │
//! │  ├── inbound loop      - decodes frames, routes responses by    │
//! │  │                       rid, answers digests, ingests events   │
//! │  ├── peer-events loop  - transport up/down into the active set  │
//! │  ├── discovery tick    - reconciles transport peer snapshot     │
//! │  ├── gossip tick       - up to `fanout` random rounds           │
//! │  └── anti-entropy tick - one round at the stalest peer          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Clock discipline
//!
//! The in-memory vector clock is only touched inside a no-await critical
//! section; the durable event write and the durable clock write happen
//! inside that same section, so a crash can never leave the persisted
//! clock claiming events the log does not hold. On start the clock is
//! rebuilt from the event store's contiguous watermark map, which is
//! authoritative over any persisted image.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{DriftError, DriftResult};
use crate::storage::{EventStore, VectorClockStore};
use crate::sync::events::EngineEvent;
use crate::sync::peers::{PeerManager, PeerSnapshot};
use crate::sync::protocol::{make_rid, Frame, GossipEventMessage};
use crate::transport::{InboundFrame, PeerEvent, TransportAdapter};
use crate::types::{Event, NodeId, Payload, VectorClock};

/// Capacity of the engine event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Replication driver for one local node.
pub struct GossipNode {
    node_id: NodeId,
    config: EngineConfig,
    events: Arc<EventStore>,
    clocks: Arc<VectorClockStore>,
    transport: Arc<dyn TransportAdapter>,
    /// In-memory vector clock; every access is a no-await critical section.
    clock: Mutex<VectorClock>,
    peers: Arc<PeerManager>,
    /// Out-of-order arrivals waiting for their gap to close, per origin.
    reorder: Mutex<HashMap<NodeId, BTreeMap<u64, Event>>>,
    event_tx: broadcast::Sender<EngineEvent>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GossipNode {
    /// Wire a node over its stores and transport. The node starts in the
    /// Stopped state; nothing runs until [`GossipNode::start`].
    pub fn new(
        node_id: NodeId,
        config: EngineConfig,
        events: Arc<EventStore>,
        clocks: Arc<VectorClockStore>,
        transport: Arc<dyn TransportAdapter>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let peers = Arc::new(PeerManager::new(
            config.max_concurrent_peers,
            config.max_connection_attempts,
        ));

        Arc::new(Self {
            node_id,
            config,
            events,
            clocks,
            transport,
            clock: Mutex::new(VectorClock::new()),
            peers,
            reorder: Mutex::new(HashMap::new()),
            event_tx,
            running: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// This node's identity.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Whether the node is Running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the in-memory vector clock.
    pub fn clock_snapshot(&self) -> VectorClock {
        self.clock.lock().clone()
    }

    /// Observability rows for the active peer set.
    pub fn peer_snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers.snapshot()
    }

    /// Subscribe to the engine event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Stopped -> Running: recover the clock, subscribe to the transport
    /// streams, and schedule the periodic timers. Idempotent.
    pub fn start(self: &Arc<Self>) -> DriftResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(node = %self.node_id, "Already running");
            return Ok(());
        }

        // The event store's watermark map is the authoritative clock
        // image; the persisted copy only tells us whether a crash left
        // them divergent.
        let authoritative = self.events.get_latest_timestamps_for_all_nodes()?;
        let persisted = self.clocks.load(&self.node_id)?;
        if persisted != authoritative {
            warn!(
                node = %self.node_id,
                "Persisted clock diverged from event log; recovered from log"
            );
        }
        *self.clock.lock() = authoritative;

        self.shutdown_tx.send_replace(false);

        // Subscribe here, not inside the tasks: frames that arrive
        // between start() returning and the tasks getting scheduled must
        // not be lost.
        let incoming = self.transport.incoming();
        let peer_events = self.transport.peer_events();

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(self.clone().inbound_loop(incoming)));
        tasks.push(tokio::spawn(self.clone().peer_events_loop(peer_events)));
        tasks.push(tokio::spawn(self.clone().discovery_loop()));
        tasks.push(tokio::spawn(self.clone().gossip_loop()));
        if self.config.enable_anti_entropy {
            tasks.push(tokio::spawn(self.clone().anti_entropy_loop()));
        }

        info!(node = %self.node_id, "Gossip node running");
        Ok(())
    }

    /// Running -> Stopped: cancel timers, fail every in-flight request
    /// with Shutdown, persist the clock. Idempotent.
    pub async fn stop(&self) -> DriftResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!(node = %self.node_id, "Stopping gossip node");

        self.shutdown_tx.send_replace(true);
        self.peers.shutdown();

        let clock = self.clock.lock().clone();
        self.clocks.save(&self.node_id, &clock)?;

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
        Ok(())
    }

    /// Create a local event.
    ///
    /// The clock read-and-increment, the durable event append, and the
    /// durable clock write all happen under one critical section; the
    /// event is announced on `EventCreated` afterwards. There is no
    /// eager broadcast: gossip rounds carry it.
    pub fn create_event(&self, payload: Payload) -> DriftResult<Event> {
        if !self.is_running() {
            return Err(DriftError::Shutdown);
        }

        let event = {
            let mut clock = self.clock.lock();
            let timestamp = clock.get(&self.node_id) + 1;
            let event = Event::new(self.node_id.clone(), timestamp, payload);
            self.events.save_event(&event)?;
            clock.advance(&self.node_id, timestamp);
            self.clocks.save(&self.node_id, &clock)?;
            event
        };

        debug!(node = %self.node_id, id = %event.id, ts = event.timestamp, "Event created");
        let _ = self.event_tx.send(EngineEvent::EventCreated(event.clone()));
        Ok(event)
    }

    // ────────────────────────────────────────────────────────────────
    // Inbound
    // ────────────────────────────────────────────────────────────────

    async fn inbound_loop(self: Arc<Self>, mut incoming: broadcast::Receiver<InboundFrame>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                frame = incoming.recv() => match frame {
                    Ok(frame) => self.handle_frame(frame).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Inbound stream lagged; gossip will re-sync");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    async fn handle_frame(&self, inbound: InboundFrame) {
        let InboundFrame { from, bytes } = inbound;
        let frame = match Frame::decode(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                // Drop the frame, keep the peer.
                warn!(%from, error = %e, "Dropping malformed frame");
                return;
            }
        };

        match frame {
            Frame::DigestResponse { .. } | Frame::EventsAck { .. } => {
                let rid = frame.rid().to_string();
                if !self.peers.complete_request(&rid, frame) {
                    debug!(%from, %rid, "Unsolicited response dropped");
                }
            }
            Frame::Digest { rid, clock } => self.handle_digest(&from, rid, clock).await,
            Frame::Events { rid, message } => self.handle_events(&from, rid, message).await,
        }
    }

    /// Responder phase 2: answer a digest with our own watermark map.
    async fn handle_digest(&self, from: &NodeId, rid: String, _initiator_clock: VectorClock) {
        let ours = match self.events.get_latest_timestamps_for_all_nodes() {
            Ok(clock) => clock,
            Err(e) => {
                warn!(%from, error = %e, "Digest aborted: watermark read failed");
                return;
            }
        };
        debug!(%from, %rid, "Answering digest");
        let response = Frame::DigestResponse {
            rid,
            clock: ours,
            needed_ids: None,
        };
        self.send_frame(from, &response).await;
    }

    /// Responder phases 3-4: ingest the shipped events, persist the
    /// clock, acknowledge.
    async fn handle_events(&self, from: &NodeId, rid: String, message: GossipEventMessage) {
        let accepted = match self.ingest(message.events) {
            Ok(accepted) => accepted,
            Err(e) => {
                // Storage failure aborts only this round; no ack, the
                // initiator times out and retries later.
                warn!(%from, %rid, error = %e, "Events ingest aborted");
                return;
            }
        };

        if !accepted.is_empty() {
            debug!(%from, %rid, count = accepted.len(), "Events accepted");
        }
        for event in accepted {
            let _ = self.event_tx.send(EngineEvent::EventReceived(event));
        }

        let ack = Frame::EventsAck {
            rid,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.send_frame(from, &ack).await;

        // A completed inbound round proves the peer alive; clear any
        // stale attempt tally so outbound rounds resume.
        self.peers.record_success(from);
    }

    /// Apply a batch of remote events to the log and the clock.
    ///
    /// Per origin, in timestamp order: the next expected timestamp is
    /// stored and advances the watermark; anything beyond it is buffered
    /// until the gap closes; anything at or below the watermark is a
    /// duplicate unless the log somehow lacks it (crash recovery), in
    /// which case it is stored without moving the watermark. Returns the
    /// newly accepted events in the order projections must see them.
    fn ingest(&self, events: Vec<Event>) -> DriftResult<Vec<Event>> {
        let mut groups: BTreeMap<NodeId, Vec<Event>> = BTreeMap::new();
        for event in events {
            groups.entry(event.node_id.clone()).or_default().push(event);
        }

        let mut accepted = Vec::new();
        let mut clock = self.clock.lock();
        let mut reorder = self.reorder.lock();

        for (origin, mut group) in groups {
            group.sort_by_key(|e| e.timestamp);
            for event in group {
                let watermark = clock.get(&origin);
                if event.timestamp <= watermark {
                    if !self.events.has_event(&event.id)? {
                        // Origin protocol violation or our own crash
                        // recovery: keep the event, never lower the mark.
                        warn!(
                            origin = %origin,
                            ts = event.timestamp,
                            watermark,
                            "Stale timestamp for unknown event; storing without watermark move"
                        );
                        self.events.save_event(&event)?;
                    }
                } else if event.timestamp == watermark + 1 {
                    let fresh = self.events.save_event(&event)?;
                    clock.advance(&origin, event.timestamp);
                    if fresh {
                        accepted.push(event);
                    }
                    Self::flush_reorder(
                        &self.events,
                        &mut clock,
                        &mut reorder,
                        &origin,
                        &mut accepted,
                    )?;
                } else {
                    debug!(
                        origin = %origin,
                        ts = event.timestamp,
                        watermark,
                        "Buffering out-of-order event"
                    );
                    reorder
                        .entry(origin.clone())
                        .or_default()
                        .insert(event.timestamp, event);
                }
            }
        }

        // Same critical section as the clock moves above.
        self.clocks.save(&self.node_id, &clock)?;
        Ok(accepted)
    }

    /// Drain the reorder buffer for `origin` across whatever contiguous
    /// run is now available.
    fn flush_reorder(
        events: &EventStore,
        clock: &mut VectorClock,
        reorder: &mut HashMap<NodeId, BTreeMap<u64, Event>>,
        origin: &NodeId,
        accepted: &mut Vec<Event>,
    ) -> DriftResult<()> {
        let Some(buffer) = reorder.get_mut(origin) else {
            return Ok(());
        };
        loop {
            let next = clock.get(origin) + 1;
            match buffer.remove(&next) {
                Some(buffered) => {
                    let fresh = events.save_event(&buffered)?;
                    clock.advance(origin, next);
                    if fresh {
                        accepted.push(buffered);
                    }
                }
                None => break,
            }
        }
        if buffer.is_empty() {
            reorder.remove(origin);
        }
        Ok(())
    }

    /// Fire-and-forget a frame; failures are logged, the round they
    /// belong to recovers via timeout.
    async fn send_frame(&self, peer: &NodeId, frame: &Frame) {
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%peer, error = %e, "Frame encode failed");
                return;
            }
        };
        if let Err(e) = self
            .transport
            .send(peer, bytes, self.config.gossip_timeout)
            .await
        {
            debug!(%peer, error = %e, "Frame send failed");
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Initiator
    // ────────────────────────────────────────────────────────────────

    /// Run one full round against a peer and record the outcome in the
    /// peer tables.
    pub async fn run_round(&self, peer: NodeId) {
        match self.round_inner(&peer).await {
            Ok(sent) => {
                debug!(%peer, sent, "Round complete");
                self.peers.record_success(&peer);
            }
            Err(DriftError::Shutdown) => {}
            Err(e) => {
                debug!(%peer, error = %e, "Round failed");
                self.peers.record_failure(&peer, e.is_io_class());
            }
        }
    }

    async fn round_inner(&self, peer: &NodeId) -> DriftResult<usize> {
        let rid = make_rid(&self.node_id);

        let ours = self.events.get_latest_timestamps_for_all_nodes()?;
        let digest = Frame::Digest {
            rid: rid.clone(),
            clock: ours,
        };
        let response = self.request(peer, &rid, digest).await?;
        let (their_clock, needed_ids) = match response {
            Frame::DigestResponse {
                clock, needed_ids, ..
            } => (clock, needed_ids),
            _ => {
                return Err(DriftError::ProtocolViolation(
                    "expected digest_response".to_string(),
                ))
            }
        };

        let outgoing = self.collect_outgoing(&their_clock, needed_ids)?;
        let count = outgoing.len();
        let from_clock = self.events.get_latest_timestamps_for_all_nodes()?;
        let events_frame = Frame::Events {
            rid: rid.clone(),
            message: GossipEventMessage {
                events: outgoing,
                from_clock,
            },
        };
        match self.request(peer, &rid, events_frame).await? {
            Frame::EventsAck { .. } => Ok(count),
            _ => Err(DriftError::ProtocolViolation(
                "expected events_ack".to_string(),
            )),
        }
    }

    /// Everything the peer is missing, bounded by
    /// `max_events_per_message`: explicitly requested ids first, then
    /// per-origin suffixes past the peer's watermarks.
    fn collect_outgoing(
        &self,
        their_clock: &VectorClock,
        needed_ids: Option<Vec<crate::types::EventId>>,
    ) -> DriftResult<Vec<Event>> {
        let cap = self.config.max_events_per_message;
        let mut outgoing: Vec<Event> = Vec::new();
        let mut seen: HashSet<crate::types::EventId> = HashSet::new();

        if let Some(needed) = needed_ids {
            for id in needed {
                if outgoing.len() >= cap {
                    return Ok(outgoing);
                }
                if let Some(event) = self.events.get_event(&id)? {
                    if seen.insert(event.id.clone()) {
                        outgoing.push(event);
                    }
                }
            }
        }

        let ours = self.events.get_latest_timestamps_for_all_nodes()?;
        for (origin, our_mark) in ours.iter() {
            if outgoing.len() >= cap {
                break;
            }
            let their_mark = their_clock.get(origin);
            if our_mark <= their_mark {
                continue;
            }
            let budget = cap - outgoing.len();
            let batch = self
                .events
                .get_events_since(origin, their_mark, Some(budget))?;
            for event in batch {
                if seen.insert(event.id.clone()) {
                    outgoing.push(event);
                }
            }
        }
        Ok(outgoing)
    }

    /// Send a request frame and await its correlated response within the
    /// gossip deadline.
    async fn request(&self, peer: &NodeId, rid: &str, frame: Frame) -> DriftResult<Frame> {
        let bytes = frame.encode()?;
        let rx = self.peers.register_request(rid, peer);

        if let Err(e) = self
            .transport
            .send(peer, bytes, self.config.gossip_timeout)
            .await
        {
            self.peers.forget_request(rid);
            return Err(e);
        }

        match tokio::time::timeout(self.config.gossip_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // The manager dropped the sender without completing: tables
            // were already torn down.
            Ok(Err(_)) => Err(DriftError::Shutdown),
            Err(_) => {
                self.peers.forget_request(rid);
                Err(DriftError::Timeout(self.config.gossip_timeout))
            }
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Timers
    // ────────────────────────────────────────────────────────────────

    async fn gossip_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            let period = EngineConfig::jittered(self.config.gossip_interval);
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(period) => {
                    let mut eligible = self.peers.eligible_peers();
                    eligible.shuffle(&mut rand::rng());
                    for peer in eligible.into_iter().take(self.config.fanout) {
                        let node = self.clone();
                        tokio::spawn(async move { node.run_round(peer).await });
                    }
                }
            }
        }
    }

    async fn anti_entropy_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            let period = EngineConfig::jittered(self.config.anti_entropy_interval);
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(period) => {
                    if let Some(peer) = self.peers.stalest_peer() {
                        debug!(%peer, "Anti-entropy sweep");
                        let node = self.clone();
                        tokio::spawn(async move { node.run_round(peer).await });
                    }
                }
            }
        }
    }

    async fn discovery_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            let period = EngineConfig::jittered(self.config.peer_discovery_interval);
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(period) => self.reconcile_peers(),
            }
        }
    }

    async fn peer_events_loop(self: Arc<Self>, mut peer_events: broadcast::Receiver<PeerEvent>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = peer_events.recv() => match event {
                    Ok(PeerEvent::Up(peer)) => self.peer_up(peer),
                    Ok(PeerEvent::Down(peer)) => self.peer_down(peer),
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Discovery reconciliation repairs whatever we missed.
                        self.reconcile_peers();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    /// Pull the transport's peer snapshot and converge the active set
    /// onto it.
    fn reconcile_peers(&self) {
        let connected: HashSet<NodeId> = self.transport.connected_peers().into_iter().collect();
        let active: HashSet<NodeId> = self.peers.active_peers().into_iter().collect();

        for peer in connected.difference(&active) {
            self.peer_up(peer.clone());
        }
        for peer in active.difference(&connected) {
            self.peer_down(peer.clone());
        }
    }

    fn peer_up(&self, peer: NodeId) {
        match self.peers.admit(&peer) {
            Ok(true) => {
                info!(%peer, "Peer up");
                let _ = self.event_tx.send(EngineEvent::PeerUp(peer));
            }
            Ok(false) => {}
            Err(e) => {
                debug!(%peer, error = %e, "Admission refused");
            }
        }
    }

    fn peer_down(&self, peer: NodeId) {
        if self.peers.remove(&peer) {
            info!(%peer, "Peer down");
            let _ = self.event_tx.send(EngineEvent::PeerDown(peer));
        }
    }
}
