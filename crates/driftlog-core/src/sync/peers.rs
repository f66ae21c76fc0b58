//! Peer bookkeeping for a gossip node.
//!
//! Single-writer tables tracking, per peer: admission into the active
//! set (bounded), consecutive failed attempts with exponential backoff,
//! last successful contact (anti-entropy picks the stalest), and the
//! correlation table pairing outbound request rids with their pending
//! completions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  PeerManager                                                    │
//! │  ├── active: HashMap<NodeId, PeerState>                         │
//! │  │   └── last_contact, attempts, backoff_until                  │
//! │  └── pending: HashMap<rid, PendingRequest>                      │
//! │      └── oneshot completed by response / timeout / peer-down    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{DriftError, DriftResult};
use crate::sync::protocol::Frame;
use crate::types::NodeId;

/// Base delay for ordinary retry backoff.
const BASE_BACKOFF: Duration = Duration::from_secs(2);
/// Floor factor for io-error-class failures.
const IO_BACKOFF: Duration = Duration::from_secs(3);
/// Cap on the backoff exponent so delays stay bounded.
const MAX_BACKOFF_EXP: u32 = 6;
/// Rest period after a peer exhausts its attempt budget; it then gets a
/// fresh budget rather than permanent exile.
const QUARANTINE: Duration = Duration::from_secs(8);

/// Mutable per-peer state.
#[derive(Debug, Clone, Default)]
struct PeerState {
    last_contact: Option<Instant>,
    attempts: u32,
    backoff_until: Option<Instant>,
}

struct PendingRequest {
    peer: NodeId,
    tx: oneshot::Sender<DriftResult<Frame>>,
}

/// Observability row for one peer (engine surface).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    /// The peer
    pub node_id: NodeId,
    /// Consecutive failed attempts
    pub attempts: u32,
    /// Whether the peer is currently backing off
    pub in_backoff: bool,
    /// Milliseconds since the last completed round, if any
    pub last_contact_age_ms: Option<u64>,
}

struct Inner {
    active: HashMap<NodeId, PeerState>,
    pending: HashMap<String, PendingRequest>,
}

/// Connection admission, retry/backoff bookkeeping, and request
/// correlation for one node.
pub struct PeerManager {
    max_peers: usize,
    max_attempts: u32,
    inner: RwLock<Inner>,
}

impl PeerManager {
    /// Build a manager with the given admission and retry caps.
    pub fn new(max_peers: usize, max_attempts: u32) -> Self {
        Self {
            max_peers,
            max_attempts,
            inner: RwLock::new(Inner {
                active: HashMap::new(),
                pending: HashMap::new(),
            }),
        }
    }

    /// Admit a discovered peer into the active set.
    ///
    /// Returns `Ok(true)` for a newly admitted peer, `Ok(false)` for one
    /// already active, and `CapacityExceeded` when the set is full.
    pub fn admit(&self, peer: &NodeId) -> DriftResult<bool> {
        let mut inner = self.inner.write();
        if inner.active.contains_key(peer) {
            return Ok(false);
        }
        if inner.active.len() >= self.max_peers {
            return Err(DriftError::CapacityExceeded(peer.to_string()));
        }
        inner.active.insert(peer.clone(), PeerState::default());
        debug!(%peer, "Peer admitted");
        Ok(true)
    }

    /// Drop a peer and fail all of its in-flight requests with PeerDown.
    /// Returns whether the peer was active.
    pub fn remove(&self, peer: &NodeId) -> bool {
        let mut inner = self.inner.write();
        let was_active = inner.active.remove(peer).is_some();

        let doomed: Vec<String> = inner
            .pending
            .iter()
            .filter(|(_, req)| &req.peer == peer)
            .map(|(rid, _)| rid.clone())
            .collect();
        for rid in doomed {
            if let Some(req) = inner.pending.remove(&rid) {
                let _ = req.tx.send(Err(DriftError::PeerDown(peer.to_string())));
            }
        }
        if was_active {
            debug!(%peer, "Peer removed");
        }
        was_active
    }

    /// Whether a peer is currently in the active set.
    pub fn is_active(&self, peer: &NodeId) -> bool {
        self.inner.read().active.contains_key(peer)
    }

    /// All active peers, in no particular order.
    pub fn active_peers(&self) -> Vec<NodeId> {
        self.inner.read().active.keys().cloned().collect()
    }

    /// Active peers currently worth contacting: not backing off and not
    /// over the attempts cap.
    pub fn eligible_peers(&self) -> Vec<NodeId> {
        let now = Instant::now();
        self.inner
            .read()
            .active
            .iter()
            .filter(|(_, state)| {
                state.attempts < self.max_attempts
                    && state.backoff_until.map_or(true, |until| until <= now)
            })
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    /// The eligible peer with the oldest (or no) successful contact;
    /// anti-entropy's target.
    pub fn stalest_peer(&self) -> Option<NodeId> {
        let now = Instant::now();
        self.inner
            .read()
            .active
            .iter()
            .filter(|(_, state)| {
                state.attempts < self.max_attempts
                    && state.backoff_until.map_or(true, |until| until <= now)
            })
            .min_by_key(|(_, state)| state.last_contact)
            .map(|(peer, _)| peer.clone())
    }

    /// Record a completed round: refresh contact time, clear attempts.
    pub fn record_success(&self, peer: &NodeId) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.active.get_mut(peer) {
            state.last_contact = Some(Instant::now());
            state.attempts = 0;
            state.backoff_until = None;
        }
    }

    /// Record a failed round and schedule backoff.
    ///
    /// Ordinary failures back off `2s * 2^attempt`; io-error-class
    /// failures are forced onto the longer `>= 3s * attempt` schedule.
    /// Both are jittered by ±20%. A peer that exhausts its attempt
    /// budget rests for a quarantine period and then starts a fresh
    /// budget.
    pub fn record_failure(&self, peer: &NodeId, io_class: bool) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.active.get_mut(peer) {
            state.attempts += 1;
            let delay = if state.attempts >= self.max_attempts {
                state.attempts = 0;
                QUARANTINE
            } else if io_class {
                IO_BACKOFF * state.attempts.min(1 << MAX_BACKOFF_EXP)
            } else {
                let exp = (state.attempts - 1).min(MAX_BACKOFF_EXP);
                BASE_BACKOFF * (1u32 << exp)
            };
            let jitter = rand::rng().random_range(0.8..1.2);
            let delay = Duration::from_millis((delay.as_millis() as f64 * jitter) as u64);
            state.backoff_until = Some(Instant::now() + delay);
            debug!(%peer, attempts = state.attempts, ?delay, "Peer backing off");
        }
    }

    /// Register an outbound request and get its completion handle.
    pub fn register_request(
        &self,
        rid: &str,
        peer: &NodeId,
    ) -> oneshot::Receiver<DriftResult<Frame>> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.write();
        if inner
            .pending
            .insert(
                rid.to_string(),
                PendingRequest {
                    peer: peer.clone(),
                    tx,
                },
            )
            .is_some()
        {
            warn!(rid, "Correlation id reused; previous request dropped");
        }
        rx
    }

    /// Complete a pending request with a response frame. Returns `false`
    /// when no request with this rid is pending (late or unsolicited).
    pub fn complete_request(&self, rid: &str, frame: Frame) -> bool {
        let req = self.inner.write().pending.remove(rid);
        match req {
            Some(req) => {
                let _ = req.tx.send(Ok(frame));
                true
            }
            None => false,
        }
    }

    /// Forget a request that the caller gave up on (timeout path).
    pub fn forget_request(&self, rid: &str) {
        self.inner.write().pending.remove(rid);
    }

    /// Fail every pending request with Shutdown and clear the tables.
    pub fn shutdown(&self) {
        let mut inner = self.inner.write();
        for (_, req) in inner.pending.drain() {
            let _ = req.tx.send(Err(DriftError::Shutdown));
        }
        inner.active.clear();
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.inner.read().pending.len()
    }

    /// Observability rows for every active peer.
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        let now = Instant::now();
        self.inner
            .read()
            .active
            .iter()
            .map(|(peer, state)| PeerSnapshot {
                node_id: peer.clone(),
                attempts: state.attempts,
                in_backoff: state.backoff_until.is_some_and(|until| until > now),
                last_contact_age_ms: state
                    .last_contact
                    .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            })
            .collect()
    }
}
