//! Engine event stream.
//!
//! Everything interesting a node does is announced on one broadcast
//! channel: local event creations, remote event arrivals, and peer
//! lifecycle changes. The projection mailbox and any number of observers
//! subscribe to the same stream; there is no observer graph and no
//! global registry.

use crate::types::{Event, NodeId};

/// Notifications emitted by a running [`crate::sync::GossipNode`].
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An event was created locally and durably appended
    EventCreated(Event),
    /// A remote event was accepted into the local log
    EventReceived(Event),
    /// A peer entered the active set
    PeerUp(NodeId),
    /// A peer left the active set
    PeerDown(NodeId),
}

impl EngineEvent {
    /// The event carried, when this notification carries one.
    pub fn event(&self) -> Option<&Event> {
        match self {
            EngineEvent::EventCreated(event) | EngineEvent::EventReceived(event) => Some(event),
            _ => None,
        }
    }

    /// The peer concerned, when this is a lifecycle notification.
    pub fn peer(&self) -> Option<&NodeId> {
        match self {
            EngineEvent::PeerUp(peer) | EngineEvent::PeerDown(peer) => Some(peer),
            _ => None,
        }
    }
}
