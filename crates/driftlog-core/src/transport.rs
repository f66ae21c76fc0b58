//! Transport seam: the engine's only view of the network.
//!
//! The link layer (Bluetooth, Wi-Fi Direct, anything message-framed) is
//! out of scope; the engine consumes this narrow contract instead:
//! a stream of peer up/down changes, a stream of inbound frames, and a
//! best-effort `send`. Framing and integrity are the adapter's concern;
//! the engine exchanges logical messages (see [`crate::sync::protocol`]).
//!
//! Per-peer ordering is not required for correctness (gossip
//! re-synchronizes), but adapters that preserve it converge faster.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::DriftResult;
use crate::types::NodeId;

pub mod memory;

pub use memory::{MemoryNetwork, MemoryTransport};

/// A peer appearing on or vanishing from the local radio horizon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Peer became reachable
    Up(NodeId),
    /// Peer became unreachable
    Down(NodeId),
}

impl PeerEvent {
    /// The peer this event concerns.
    pub fn peer(&self) -> &NodeId {
        match self {
            PeerEvent::Up(peer) | PeerEvent::Down(peer) => peer,
        }
    }
}

/// One frame delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Sending peer
    pub from: NodeId,
    /// Raw frame bytes (one logical message)
    pub bytes: Vec<u8>,
}

/// Message-framed, bidirectional, possibly-lossy pipe with peer ids.
///
/// Implementations own discovery and framing. The engine holds an
/// adapter by this interface only; adapters never hold back-references
/// into the engine.
#[async_trait]
pub trait TransportAdapter: Send + Sync + 'static {
    /// Bring the transport up. Idempotent.
    async fn start(&self) -> DriftResult<()>;

    /// Tear the transport down. Idempotent.
    async fn stop(&self) -> DriftResult<()>;

    /// This endpoint's own identity on the transport.
    fn local_node(&self) -> NodeId;

    /// Snapshot of currently reachable peer ids.
    fn connected_peers(&self) -> Vec<NodeId>;

    /// Subscribe to peer up/down changes.
    fn peer_events(&self) -> broadcast::Receiver<PeerEvent>;

    /// Subscribe to inbound frames.
    fn incoming(&self) -> broadcast::Receiver<InboundFrame>;

    /// Deliver one frame to a peer, best effort.
    ///
    /// Fails with `Unreachable` when the peer is not currently connected
    /// and `Timeout` when delivery is not confirmed within `timeout`.
    async fn send(&self, peer: &NodeId, frame: Vec<u8>, timeout: Duration) -> DriftResult<()>;
}
