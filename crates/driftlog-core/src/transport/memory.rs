//! In-process transport for tests, simulations, and examples.
//!
//! A [`MemoryNetwork`] is a hub of endpoints; each [`MemoryTransport`]
//! is one node's view of it. The hub supports the failure modes the
//! engine has to survive in the field:
//! - partitions (nodes split into non-communicating groups)
//! - churn (nodes dropping offline and returning)
//! - probabilistic frame loss
//!
//! Delivery is instant and per-sender ordered, which is strictly kinder
//! than a real radio link; the loss knob and partitions are how tests
//! make it hostile.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{DriftError, DriftResult};
use crate::transport::{InboundFrame, PeerEvent, TransportAdapter};
use crate::types::NodeId;

const CHANNEL_CAPACITY: usize = 1024;

struct Endpoint {
    frames_tx: broadcast::Sender<InboundFrame>,
    peers_tx: broadcast::Sender<PeerEvent>,
    online: bool,
    group: u32,
}

struct NetInner {
    nodes: HashMap<NodeId, Endpoint>,
    loss_rate: f64,
    next_group: u32,
}

/// Hub connecting a set of in-process transports.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<RwLock<NetInner>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Create an empty network with no frame loss.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(NetInner {
                nodes: HashMap::new(),
                loss_rate: 0.0,
                next_group: 1,
            })),
        }
    }

    /// Join the network as `node`, returning that node's transport.
    ///
    /// The new endpoint starts online in the default partition group and
    /// becomes immediately visible to every reachable peer.
    pub fn join(&self, node: NodeId) -> MemoryTransport {
        let (frames_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (peers_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        self.mutate(|inner| {
            inner.nodes.insert(
                node.clone(),
                Endpoint {
                    frames_tx,
                    peers_tx,
                    online: true,
                    group: 0,
                },
            );
        });

        MemoryTransport {
            node,
            net: self.clone(),
        }
    }

    /// Fraction of frames silently dropped in flight, `0.0..=1.0`.
    pub fn set_loss_rate(&self, rate: f64) {
        self.inner.write().loss_rate = rate.clamp(0.0, 1.0);
    }

    /// Take a node offline or bring it back.
    pub fn set_online(&self, node: &NodeId, online: bool) {
        self.mutate(|inner| {
            if let Some(endpoint) = inner.nodes.get_mut(node) {
                endpoint.online = online;
            }
        });
    }

    /// Split the network into the given groups. Nodes not named in any
    /// group are isolated on their own.
    pub fn partition(&self, groups: &[Vec<NodeId>]) {
        self.mutate(|inner| {
            let mut assigned: HashMap<&NodeId, u32> = HashMap::new();
            for (i, group) in groups.iter().enumerate() {
                for node in group {
                    assigned.insert(node, i as u32);
                }
            }
            let mut next_isolated = inner.next_group + groups.len() as u32;
            let nodes: Vec<NodeId> = inner.nodes.keys().cloned().collect();
            for node in nodes {
                let group = match assigned.get(&node) {
                    Some(&g) => inner.next_group + g,
                    None => {
                        next_isolated += 1;
                        next_isolated
                    }
                };
                if let Some(endpoint) = inner.nodes.get_mut(&node) {
                    endpoint.group = group;
                }
            }
            inner.next_group = next_isolated + 1;
        });
    }

    /// Merge every node back into one group.
    pub fn heal(&self) {
        self.mutate(|inner| {
            for endpoint in inner.nodes.values_mut() {
                endpoint.group = 0;
            }
        });
    }

    /// Peers currently reachable from `node`.
    pub fn reachable_from(&self, node: &NodeId) -> Vec<NodeId> {
        let inner = self.inner.read();
        let Some(me) = inner.nodes.get(node) else {
            return Vec::new();
        };
        if !me.online {
            return Vec::new();
        }
        inner
            .nodes
            .iter()
            .filter(|(other, ep)| *other != node && ep.online && ep.group == me.group)
            .map(|(other, _)| other.clone())
            .collect()
    }

    /// Inject a raw frame as if `from` had sent it to `to`, bypassing
    /// reachability and loss. Test hook for crafted or reordered frames.
    pub fn deliver_raw(&self, to: &NodeId, from: &NodeId, bytes: Vec<u8>) {
        let inner = self.inner.read();
        if let Some(endpoint) = inner.nodes.get(to) {
            let _ = endpoint.frames_tx.send(InboundFrame {
                from: from.clone(),
                bytes,
            });
        }
    }

    fn send_frame(&self, from: &NodeId, to: &NodeId, bytes: Vec<u8>) -> DriftResult<()> {
        let inner = self.inner.read();

        let sender = inner
            .nodes
            .get(from)
            .ok_or_else(|| DriftError::Unreachable(format!("unknown sender {}", from)))?;
        let target = inner
            .nodes
            .get(to)
            .ok_or_else(|| DriftError::Unreachable(format!("unknown peer {}", to)))?;

        if !sender.online || !target.online || sender.group != target.group {
            return Err(DriftError::Unreachable(to.to_string()));
        }

        if inner.loss_rate > 0.0 && rand::random::<f64>() < inner.loss_rate {
            debug!(%from, %to, "Frame lost in flight");
            return Ok(());
        }

        // A send with no live receiver is delivered-and-dropped, which is
        // exactly what a radio does for a node that stopped listening.
        let _ = target.frames_tx.send(InboundFrame {
            from: from.clone(),
            bytes,
        });
        Ok(())
    }

    /// Apply a topology mutation, then emit Up/Down diffs to every
    /// endpoint whose reachable set changed.
    fn mutate(&self, f: impl FnOnce(&mut NetInner)) {
        let mut inner = self.inner.write();

        let before = adjacency(&inner);
        f(&mut inner);
        let after = adjacency(&inner);

        for (node, endpoint) in &inner.nodes {
            let empty = Vec::new();
            let old = before.get(node).unwrap_or(&empty);
            let new = after.get(node).unwrap_or(&empty);

            for peer in new {
                if !old.contains(peer) {
                    let _ = endpoint.peers_tx.send(PeerEvent::Up(peer.clone()));
                }
            }
            for peer in old {
                if !new.contains(peer) {
                    let _ = endpoint.peers_tx.send(PeerEvent::Down(peer.clone()));
                }
            }
        }
    }
}

fn adjacency(inner: &NetInner) -> HashMap<NodeId, Vec<NodeId>> {
    let mut map = HashMap::new();
    for (node, endpoint) in &inner.nodes {
        if !endpoint.online {
            map.insert(node.clone(), Vec::new());
            continue;
        }
        let peers = inner
            .nodes
            .iter()
            .filter(|(other, ep)| *other != node && ep.online && ep.group == endpoint.group)
            .map(|(other, _)| other.clone())
            .collect();
        map.insert(node.clone(), peers);
    }
    map
}

/// One node's endpoint on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    node: NodeId,
    net: MemoryNetwork,
}

impl MemoryTransport {
    /// The hub this transport belongs to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.net
    }
}

#[async_trait]
impl TransportAdapter for MemoryTransport {
    async fn start(&self) -> DriftResult<()> {
        self.net.set_online(&self.node, true);
        Ok(())
    }

    async fn stop(&self) -> DriftResult<()> {
        self.net.set_online(&self.node, false);
        Ok(())
    }

    fn local_node(&self) -> NodeId {
        self.node.clone()
    }

    fn connected_peers(&self) -> Vec<NodeId> {
        self.net.reachable_from(&self.node)
    }

    fn peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        let inner = self.net.inner.read();
        inner
            .nodes
            .get(&self.node)
            .map(|ep| ep.peers_tx.subscribe())
            .unwrap_or_else(|| broadcast::channel(1).1)
    }

    fn incoming(&self) -> broadcast::Receiver<InboundFrame> {
        let inner = self.net.inner.read();
        inner
            .nodes
            .get(&self.node)
            .map(|ep| ep.frames_tx.subscribe())
            .unwrap_or_else(|| broadcast::channel(1).1)
    }

    async fn send(&self, peer: &NodeId, frame: Vec<u8>, _timeout: Duration) -> DriftResult<()> {
        self.net.send_frame(&self.node, peer, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeId {
        NodeId::from(name)
    }

    #[tokio::test]
    async fn test_join_and_see_peers() {
        let net = MemoryNetwork::new();
        let a = net.join(node("a"));
        let b = net.join(node("b"));

        assert_eq!(a.connected_peers(), vec![node("b")]);
        assert_eq!(b.connected_peers(), vec![node("a")]);
    }

    #[tokio::test]
    async fn test_send_delivers_frame() {
        let net = MemoryNetwork::new();
        let a = net.join(node("a"));
        let b = net.join(node("b"));

        let mut incoming = b.incoming();
        a.send(&node("b"), b"hello".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();

        let frame = incoming.recv().await.unwrap();
        assert_eq!(frame.from, node("a"));
        assert_eq!(frame.bytes, b"hello");
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_is_unreachable() {
        let net = MemoryNetwork::new();
        let a = net.join(node("a"));

        let result = a
            .send(&node("ghost"), vec![1], Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(DriftError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_offline_peer_is_unreachable() {
        let net = MemoryNetwork::new();
        let a = net.join(node("a"));
        let _b = net.join(node("b"));

        net.set_online(&node("b"), false);
        assert!(a.connected_peers().is_empty());

        let result = a.send(&node("b"), vec![1], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(DriftError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_partition_and_heal() {
        let net = MemoryNetwork::new();
        let a = net.join(node("a"));
        let b = net.join(node("b"));
        let _c = net.join(node("c"));

        net.partition(&[vec![node("a")], vec![node("b"), node("c")]]);

        assert!(a.connected_peers().is_empty());
        let mut b_peers = b.connected_peers();
        b_peers.sort();
        assert_eq!(b_peers, vec![node("c")]);

        assert!(matches!(
            a.send(&node("b"), vec![1], Duration::from_secs(1)).await,
            Err(DriftError::Unreachable(_))
        ));

        net.heal();
        let mut a_peers = a.connected_peers();
        a_peers.sort();
        assert_eq!(a_peers, vec![node("b"), node("c")]);
    }

    #[tokio::test]
    async fn test_peer_events_on_topology_change() {
        let net = MemoryNetwork::new();
        let a = net.join(node("a"));
        let mut events = a.peer_events();

        let _b = net.join(node("b"));
        assert_eq!(events.recv().await.unwrap(), PeerEvent::Up(node("b")));

        net.set_online(&node("b"), false);
        assert_eq!(events.recv().await.unwrap(), PeerEvent::Down(node("b")));
    }

    #[tokio::test]
    async fn test_stop_takes_node_offline() {
        let net = MemoryNetwork::new();
        let a = net.join(node("a"));
        let b = net.join(node("b"));

        b.stop().await.unwrap();
        assert!(a.connected_peers().is_empty());

        b.start().await.unwrap();
        assert_eq!(a.connected_peers(), vec![node("b")]);
    }

    #[tokio::test]
    async fn test_full_loss_drops_everything() {
        let net = MemoryNetwork::new();
        let a = net.join(node("a"));
        let b = net.join(node("b"));
        net.set_loss_rate(1.0);

        let mut incoming = b.incoming();
        // Send succeeds (best effort) but nothing arrives.
        a.send(&node("b"), vec![1], Duration::from_secs(1))
            .await
            .unwrap();
        assert!(incoming.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_raw_bypasses_partitions() {
        let net = MemoryNetwork::new();
        let a = net.join(node("a"));
        let _b = net.join(node("b"));
        net.partition(&[vec![node("a")], vec![node("b")]]);

        let mut incoming = a.incoming();
        net.deliver_raw(&node("a"), &node("b"), vec![7]);
        let frame = incoming.recv().await.unwrap();
        assert_eq!(frame.bytes, vec![7]);
    }
}
