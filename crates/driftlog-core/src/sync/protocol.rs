//! Wire protocol for the gossip exchange.
//!
//! Frames are JSON objects with a `type` discriminator; the transport
//! delivers one frame per send with integrity, nothing more.
//!
//! ## Message Flow
//!
//! ```text
//! Initiator                        Responder
//!   |                                 |
//!   |--- Digest {rid, clock} -------->|
//!   |<-- DigestResponse {rid, clock} -|
//!   |                                 |
//!   |    (fetch what they miss)       |
//!   |                                 |
//!   |--- Events {rid, message} ------>|
//!   |<-- EventsAck {rid, ts} ---------|
//! ```
//!
//! `clock` values are per-origin contiguous watermarks, so "everything
//! after `clock[n]`" is a sound request. Responders MUST echo the
//! initiator's `rid` on DigestResponse and EventsAck.

use serde::{Deserialize, Serialize};

use crate::error::{DriftError, DriftResult};
use crate::types::{Event, EventId, NodeId, VectorClock};

/// Events payload of the third phase: the missing events plus the
/// sender's watermark map at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipEventMessage {
    /// Events the recipient was missing, per the digest exchange
    pub events: Vec<Event>,
    /// Sender's watermark map when the frame was built
    pub from_clock: VectorClock,
}

/// One frame of the three-phase gossip exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Phase 1: initiator advertises its watermark map
    Digest {
        /// Correlation id, echoed on every frame of the round
        rid: String,
        /// Initiator's watermark map
        clock: VectorClock,
    },
    /// Phase 2: responder answers with its own watermark map
    DigestResponse {
        /// Echoed correlation id
        rid: String,
        /// Responder's watermark map
        clock: VectorClock,
        /// Reserved: specific event ids the responder wants first.
        /// Never populated by this implementation; honored if present.
        #[serde(skip_serializing_if = "Option::is_none")]
        needed_ids: Option<Vec<EventId>>,
    },
    /// Phase 3: initiator ships the events the responder is missing
    Events {
        /// Echoed correlation id
        rid: String,
        /// The missing events and the sender's clock
        message: GossipEventMessage,
    },
    /// Phase 4: responder confirms ingestion
    EventsAck {
        /// Echoed correlation id
        rid: String,
        /// Responder's wall clock at ack time, milliseconds
        timestamp: i64,
    },
}

impl Frame {
    /// Encode to JSON bytes.
    pub fn encode(&self) -> DriftResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DriftError::Serialization(e.to_string()))
    }

    /// Decode from JSON bytes. Anything malformed is a protocol
    /// violation: the frame is dropped, the peer is not.
    pub fn decode(bytes: &[u8]) -> DriftResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| DriftError::ProtocolViolation(e.to_string()))
    }

    /// The correlation id carried by this frame.
    pub fn rid(&self) -> &str {
        match self {
            Frame::Digest { rid, .. }
            | Frame::DigestResponse { rid, .. }
            | Frame::Events { rid, .. }
            | Frame::EventsAck { rid, .. } => rid,
        }
    }

    /// Whether this frame answers a pending request (as opposed to
    /// opening one).
    pub fn is_response(&self) -> bool {
        matches!(self, Frame::DigestResponse { .. } | Frame::EventsAck { .. })
    }
}

/// Mint a correlation id: `{node_id}_{ms}_{nonce}`.
pub fn make_rid(node: &NodeId) -> String {
    let ms = chrono::Utc::now().timestamp_millis();
    let nonce: u32 = rand::random();
    format!("{}_{}_{:08x}", node, ms, nonce)
}
