//! Gossip / anti-entropy synchronization.
//!
//! The [`GossipNode`] owns the local vector clock and runs the
//! three-phase exchange (digest, digest response, events, ack) against
//! peers surfaced by the transport. [`PeerManager`] handles admission,
//! backoff, and request correlation; [`protocol`] defines the frames.

pub mod events;
pub mod node;
pub mod peers;
pub mod protocol;

pub use events::EngineEvent;
pub use node::GossipNode;
pub use peers::{PeerManager, PeerSnapshot};
pub use protocol::{make_rid, Frame, GossipEventMessage};
