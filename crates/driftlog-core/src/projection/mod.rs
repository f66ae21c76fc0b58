//! Deterministic read models folded from the replicated log.
//!
//! A [`Projection`] is a pure reducer: events go in, queryable state
//! comes out. Idempotence by event id is the engine's job (see
//! [`engine::ProjectionEngine`]), ordering is the engine's job, and
//! snapshot persistence is [`crate::storage::ProjectionStore`]'s job; a
//! projection only has to fold, reset, and (de)serialize its state.
//!
//! Projections must tolerate payload shapes they do not understand:
//! log and skip, never fail the fold.

pub mod engine;

pub use engine::{ProjectionEngine, ProjectionStatus};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DriftError, DriftResult};
use crate::types::Event;

/// A deterministic fold of events into a read model.
pub trait Projection: Send + Sync {
    /// Stable type key; also the snapshot key in the projection store.
    fn name(&self) -> &str;

    /// Opaque version of the state shape. Bump it whenever `apply` or the
    /// state layout changes; stored snapshots with another version are
    /// discarded in favor of full replay.
    fn state_version(&self) -> &str;

    /// Fold one event into the state. Called at most once per event id
    /// per engine lifetime (modulo explicit rebuild). Unknown payload
    /// types must be tolerated, not errored.
    fn apply(&mut self, event: &Event) -> DriftResult<()>;

    /// Return to the initial state.
    fn reset(&mut self);

    /// Serialize the current state. Two projections of the same name and
    /// version that folded the same events in the same order must return
    /// byte-identical values.
    fn snapshot_state(&self) -> DriftResult<serde_json::Value>;

    /// Replace the state from a snapshot. Returns `false` when the
    /// snapshot cannot be understood; the engine then resets and replays.
    fn restore_state(&mut self, state: &serde_json::Value) -> bool;
}

/// Counts events, total and per origin.
///
/// The simplest useful read model; also the one the test suites lean on.
#[derive(Debug, Default)]
pub struct EventCountProjection {
    state: EventCountState,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct EventCountState {
    total: u64,
    per_node: BTreeMap<String, u64>,
}

impl EventCountProjection {
    /// Fresh projection with zero counts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total events folded in.
    pub fn total(&self) -> u64 {
        self.state.total
    }

    /// Events folded in for one origin.
    pub fn count_for(&self, node: &str) -> u64 {
        self.state.per_node.get(node).copied().unwrap_or(0)
    }
}

impl Projection for EventCountProjection {
    fn name(&self) -> &str {
        "event_counts"
    }

    fn state_version(&self) -> &str {
        "1"
    }

    fn apply(&mut self, event: &Event) -> DriftResult<()> {
        self.state.total += 1;
        *self
            .state
            .per_node
            .entry(event.node_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = EventCountState::default();
    }

    fn snapshot_state(&self) -> DriftResult<serde_json::Value> {
        serde_json::to_value(&self.state).map_err(|e| DriftError::Serialization(e.to_string()))
    }

    fn restore_state(&mut self, state: &serde_json::Value) -> bool {
        match serde_json::from_value(state.clone()) {
            Ok(restored) => {
                self.state = restored;
                true
            }
            Err(e) => {
                debug!(projection = self.name(), error = %e, "Snapshot rejected");
                false
            }
        }
    }
}

/// Last-writer-wins key/value view.
///
/// Folds payloads shaped `{"key": <string>, "value": <any>}`; any other
/// shape is skipped. "Last" means last in the engine's deterministic
/// order, so rebuilds land on identical states everywhere.
#[derive(Debug, Default)]
pub struct KeyValueProjection {
    state: BTreeMap<String, serde_json::Value>,
}

impl KeyValueProjection {
    /// Fresh, empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for a key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.state.get(key)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// True when no key has been set.
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

impl Projection for KeyValueProjection {
    fn name(&self) -> &str {
        "key_values"
    }

    fn state_version(&self) -> &str {
        "1"
    }

    fn apply(&mut self, event: &Event) -> DriftResult<()> {
        match (
            event.payload.get("key").and_then(|k| k.as_str()),
            event.payload.get("value"),
        ) {
            (Some(key), Some(value)) => {
                self.state.insert(key.to_string(), value.clone());
            }
            _ => {
                debug!(id = %event.id, "Payload shape unknown to key/value view, skipping");
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state.clear();
    }

    fn snapshot_state(&self) -> DriftResult<serde_json::Value> {
        serde_json::to_value(&self.state).map_err(|e| DriftError::Serialization(e.to_string()))
    }

    fn restore_state(&mut self, state: &serde_json::Value) -> bool {
        match serde_json::from_value(state.clone()) {
            Ok(restored) => {
                self.state = restored;
                true
            }
            Err(e) => {
                debug!(projection = self.name(), error = %e, "Snapshot rejected");
                false
            }
        }
    }
}
