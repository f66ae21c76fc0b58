//! driftlog Core Library
//!
//! Decentralized, offline-capable replication of append-only event logs
//! over short-range transports, with CQRS projections on top.
//!
//! ## Overview
//!
//! Every node appends immutable events to its own log with dense logical
//! timestamps. A three-phase gossip exchange (digest, digest response,
//! events, ack) spreads each log to every reachable peer; per-origin
//! contiguous watermarks make "send me everything after N" sound, so the
//! cluster converges to identical logs without a server. Projections
//! fold the replicated log into deterministic read models, with
//! snapshotting to skip full replay at startup.
//!
//! ## Core Principles
//!
//! - **Local-first**: events are created and stored offline; gossip
//!   catches peers up whenever they meet
//! - **Exactly once per log**: saves are idempotent by event id, and the
//!   projection engine applies each event at most once
//! - **Deterministic reads**: rebuilds sort by `(creation time, origin,
//!   timestamp)`, so equal logs produce byte-identical projection states
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use driftlog_core::{DriftEngine, EngineConfig, MemoryNetwork, NodeId};
//! use driftlog_core::projection::EventCountProjection;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let net = MemoryNetwork::new();
//!     let id = NodeId::generate();
//!     let transport = Arc::new(net.join(id.clone()));
//!
//!     let engine = DriftEngine::new(id, "~/.driftlog", EngineConfig::default(), transport)?;
//!     engine.register_projection(Box::new(EventCountProjection::new())).await;
//!     engine.start().await?;
//!
//!     let mut payload = driftlog_core::Payload::new();
//!     payload.insert("t".into(), serde_json::json!("note"));
//!     engine.create_event(payload)?;
//!
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod projection;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod types;

// Re-exports
pub use config::EngineConfig;
pub use engine::{DriftEngine, EngineStats};
pub use error::{DriftError, DriftResult};
pub use projection::{Projection, ProjectionEngine};
pub use storage::{EventStore, ProjectionStore, Storage, VectorClockStore};
pub use sync::{EngineEvent, Frame, GossipNode, PeerManager, PeerSnapshot};
pub use transport::{InboundFrame, MemoryNetwork, MemoryTransport, PeerEvent, TransportAdapter};
pub use types::{Event, EventId, NodeId, Payload, VectorClock};
