//! Core types for driftlog: node identity, events, and vector clocks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque payload attached to an event.
///
/// The engine never interprets payload contents; projections decide what
/// the keys mean, and unknown shapes must be tolerated.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Stable identifier for a node, UUID-shaped, persistent across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Generate a fresh random node identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique event identifier.
///
/// By convention `{node_id}_{timestamp}_{nonce}`, but treated as opaque
/// everywhere: `(node_id, timestamp)` is the semantic key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable record in the replicated log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Globally unique identifier
    pub id: EventId,
    /// Origin node
    pub node_id: NodeId,
    /// Per-origin logical timestamp, dense `1..k` at the origin
    pub timestamp: u64,
    /// Wall-clock milliseconds at origin; advisory, used only for
    /// projection-side total ordering tiebreaks
    pub creation_timestamp: i64,
    /// Opaque key/value payload
    pub payload: Payload,
}

impl Event {
    /// Build an event stamped by the given origin at the given logical time.
    pub fn new(node_id: NodeId, timestamp: u64, payload: Payload) -> Self {
        let creation_timestamp = chrono::Utc::now().timestamp_millis();
        let nonce: u32 = rand::random();
        let id = EventId(format!("{}_{}_{:08x}", node_id, timestamp, nonce));
        Self {
            id,
            node_id,
            timestamp,
            creation_timestamp,
            payload,
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// The deterministic projection ordering key:
    /// `(creation_timestamp asc, node_id asc, timestamp asc)`.
    pub fn ordering_key(&self) -> (i64, &NodeId, u64) {
        (self.creation_timestamp, &self.node_id, self.timestamp)
    }
}

/// Per-origin contiguous watermark map.
///
/// For each known node, the highest timestamp `w` such that every event
/// `1..=w` from that node is present locally. This is NOT a max of
/// arbitrary received timestamps; it advances only across contiguous
/// prefixes so that "send me everything after `w`" is sound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(pub BTreeMap<NodeId, u64>);

impl VectorClock {
    /// An empty clock: nothing known about anyone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watermark for a node; 0 when the node is unknown.
    pub fn get(&self, node: &NodeId) -> u64 {
        self.0.get(node).copied().unwrap_or(0)
    }

    /// Advance a node's watermark. Regression panics: a watermark moving
    /// backwards means the contiguity invariant was already violated.
    pub fn advance(&mut self, node: &NodeId, timestamp: u64) {
        let current = self.get(node);
        assert!(
            timestamp >= current,
            "watermark regression for {}: {} -> {}",
            node,
            current,
            timestamp
        );
        self.0.insert(node.clone(), timestamp);
    }

    /// Pointwise maximum with another clock.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &ts) in &other.0 {
            let entry = self.0.entry(node.clone()).or_insert(0);
            if ts > *entry {
                *entry = ts;
            }
        }
    }

    /// True when every entry of `other` is <= the corresponding entry here.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        other.0.iter().all(|(node, &ts)| self.get(node) >= ts)
    }

    /// Nodes this clock knows about.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.0.keys()
    }

    /// Iterate over `(node, watermark)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, u64)> {
        self.0.iter().map(|(n, &t)| (n, t))
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is known about anyone.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(NodeId, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (NodeId, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
