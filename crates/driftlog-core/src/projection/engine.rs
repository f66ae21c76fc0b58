//! The projection engine: one logical actor folding the event stream
//! into every registered read model.
//!
//! ## Responsibilities
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ProjectionEngine                                               │
//! │  ├── projections: Vec<Box<dyn Projection>>                      │
//! │  │   └── Registered read models, applied in registration order  │
//! │  ├── applied: HashSet<EventId>                                  │
//! │  │   └── Dedup cache: at-most-once apply per event id           │
//! │  ├── status: per-projection cursor, count, error tally          │
//! │  └── store: ProjectionStore                                     │
//! │      └── Auto-saved snapshots every N processed events          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Determinism rule: the sort `(creation_timestamp asc, node_id asc,
//! timestamp asc)` is the ONLY source of ordering for batch processing
//! and rebuilds. Given the same event set and code version, two engines
//! produce byte-identical snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::DriftResult;
use crate::projection::Projection;
use crate::storage::ProjectionStore;
use crate::types::{Event, EventId};

/// Per-projection bookkeeping the engine maintains across applies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionStatus {
    /// Id of the last event applied to this projection
    pub last_processed_event_id: Option<EventId>,
    /// Events applied since the last reset/restore baseline
    pub event_count: u64,
    /// Number of apply errors recorded (the fold keeps going)
    pub error_count: u64,
    /// Most recent apply error, if any
    pub last_error: Option<String>,
}

/// Deterministic fold of the log into registered projections.
pub struct ProjectionEngine {
    projections: Vec<Box<dyn Projection>>,
    status: HashMap<String, ProjectionStatus>,
    applied: HashSet<EventId>,
    store: Arc<ProjectionStore>,
    auto_save_every: u64,
    since_save: u64,
}

impl ProjectionEngine {
    /// Build an engine over a snapshot store with the given auto-save
    /// cadence (events between saves).
    pub fn new(store: Arc<ProjectionStore>, auto_save_every: u64) -> Self {
        Self {
            projections: Vec::new(),
            status: HashMap::new(),
            applied: HashSet::new(),
            store,
            auto_save_every,
            since_save: 0,
        }
    }

    /// Register a projection. Registration order is apply order.
    pub fn register(&mut self, projection: Box<dyn Projection>) {
        let name = projection.name().to_string();
        debug!(projection = %name, "Projection registered");
        self.status.entry(name).or_default();
        self.projections.push(projection);
    }

    /// Names of registered projections, in apply order.
    pub fn projection_names(&self) -> Vec<String> {
        self.projections.iter().map(|p| p.name().to_string()).collect()
    }

    /// Bookkeeping for one projection.
    pub fn status(&self, name: &str) -> Option<&ProjectionStatus> {
        self.status.get(name)
    }

    /// Current serialized state of one projection.
    pub fn snapshot_of(&self, name: &str) -> DriftResult<Option<serde_json::Value>> {
        for projection in &self.projections {
            if projection.name() == name {
                return projection.snapshot_state().map(Some);
            }
        }
        Ok(None)
    }

    /// Number of distinct event ids folded so far.
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Fold one event into every projection.
    ///
    /// A duplicate id is a no-op. A projection whose `apply` fails gets
    /// its error recorded and the fold continues with the others; the
    /// event still counts as applied for everyone (re-delivery would not
    /// make the failing apply succeed, and must not double-apply the
    /// projections that did succeed).
    pub fn process_event(&mut self, event: &Event) {
        if self.applied.contains(&event.id) {
            debug!(id = %event.id, "Event already applied, skipping");
            return;
        }

        for projection in &mut self.projections {
            let name = projection.name().to_string();
            let status = self.status.entry(name.clone()).or_default();
            match projection.apply(event) {
                Ok(()) => {
                    status.last_processed_event_id = Some(event.id.clone());
                    status.event_count += 1;
                }
                Err(e) => {
                    warn!(projection = %name, id = %event.id, error = %e, "Projection apply failed");
                    status.error_count += 1;
                    status.last_error = Some(e.to_string());
                }
            }
        }
        self.applied.insert(event.id.clone());

        self.since_save += 1;
        if self.since_save >= self.auto_save_every {
            self.save_all();
            self.since_save = 0;
        }
    }

    /// Fold a batch, re-sorted into the deterministic order first.
    pub fn process_events(&mut self, events: &[Event]) {
        let mut ordered: Vec<&Event> = events.iter().collect();
        ordered.sort_by(|a, b| a.ordering_key().cmp(&b.ordering_key()));
        for event in ordered {
            self.process_event(event);
        }
    }

    /// Drop all state and fold the given events from scratch.
    ///
    /// `all_events` is re-sorted deterministically, so any permutation of
    /// the same multiset rebuilds to the same states.
    pub fn rebuild(&mut self, all_events: &[Event]) {
        info!(events = all_events.len(), "Rebuilding projections from log");
        self.applied.clear();
        for projection in &mut self.projections {
            projection.reset();
        }
        for status in self.status.values_mut() {
            *status = ProjectionStatus::default();
        }
        self.since_save = 0;
        self.process_events(all_events);
    }

    /// Startup path: restore each projection from its snapshot and fold
    /// only the log suffix after its cursor; fall back to full replay
    /// when no usable snapshot exists.
    ///
    /// `all_events` must already be in the deterministic order (the event
    /// store's `get_all_events` order).
    pub fn restore_or_replay(&mut self, all_events: &[Event]) {
        for projection in &mut self.projections {
            let name = projection.name().to_string();

            let snapshot = match self.store.load_state(&name, projection.state_version()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(projection = %name, error = %e, "Snapshot load failed, replaying");
                    None
                }
            };

            let resume_from = snapshot.and_then(|snap| {
                if !projection.restore_state(&snap.state) {
                    warn!(projection = %name, "Snapshot restore rejected, replaying");
                    return None;
                }
                match &snap.last_processed_event_id {
                    // Snapshot of the initial state: fold everything on top.
                    None => Some((0, snap.event_count)),
                    Some(last) => match all_events.iter().position(|e| &e.id == last) {
                        Some(idx) => Some((idx + 1, snap.event_count)),
                        None => {
                            // Cursor points at an event the log no longer
                            // holds (pruned, or foreign snapshot).
                            warn!(projection = %name, cursor = %last, "Snapshot cursor not in log, replaying");
                            None
                        }
                    },
                }
            });

            let status = self.status.entry(name.clone()).or_default();
            let (start, mut count) = match resume_from {
                Some(resume) => {
                    info!(
                        projection = %name,
                        resumed_at = resume.0,
                        "Projection restored from snapshot"
                    );
                    resume
                }
                None => {
                    projection.reset();
                    *status = ProjectionStatus::default();
                    (0, 0)
                }
            };

            status.event_count = count;
            if start > 0 {
                status.last_processed_event_id = Some(all_events[start - 1].id.clone());
            }
            for event in &all_events[start..] {
                match projection.apply(event) {
                    Ok(()) => {
                        count += 1;
                        status.event_count = count;
                        status.last_processed_event_id = Some(event.id.clone());
                    }
                    Err(e) => {
                        warn!(projection = %name, id = %event.id, error = %e, "Projection apply failed");
                        status.error_count += 1;
                        status.last_error = Some(e.to_string());
                    }
                }
            }
        }

        // Everything in the log is now folded into every projection.
        self.applied = all_events.iter().map(|e| e.id.clone()).collect();
        self.since_save = 0;
    }

    /// Persist every projection's snapshot. Save failures are logged and
    /// swallowed: snapshots are an optimization, the log is the truth.
    pub fn save_all(&mut self) {
        for projection in &self.projections {
            let name = projection.name();
            let status = self.status.get(name).cloned().unwrap_or_default();
            let state = match projection.snapshot_state() {
                Ok(state) => state,
                Err(e) => {
                    warn!(projection = %name, error = %e, "Snapshot serialization failed");
                    continue;
                }
            };
            if let Err(e) = self.store.save_state(
                name,
                state,
                status.last_processed_event_id.clone(),
                status.event_count,
                projection.state_version(),
            ) {
                warn!(projection = %name, error = %e, "Snapshot save failed");
            }
        }
    }

    /// Drop every persisted snapshot and reset in-memory state.
    pub fn clear_saved_states(&mut self) -> DriftResult<()> {
        self.store.clear_all()?;
        for projection in &mut self.projections {
            projection.reset();
        }
        for status in self.status.values_mut() {
            *status = ProjectionStatus::default();
        }
        self.applied.clear();
        self.since_save = 0;
        Ok(())
    }
}
