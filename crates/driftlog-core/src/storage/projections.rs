//! Durable projection snapshots.
//!
//! Snapshots are a startup-time optimization, never required for
//! correctness: a projection that cannot be restored is rebuilt by full
//! replay. Every snapshot carries the `state_version` of the projection
//! code that wrote it; `load_state` refuses a snapshot whose version does
//! not match the caller's current version, so shape changes fall back to
//! replay instead of restoring garbage.
//!
//! A metadata mirror row (everything but `state`) is maintained on every
//! save for cheap listing.

use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{DriftError, DriftResult};
use crate::types::EventId;

pub(super) const PROJECTION_STATES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("projection_states");
pub(super) const PROJECTION_META_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("projection_metadata");

/// A persisted projection state with its replay cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    /// Projection type key
    pub projection: String,
    /// Opaque serialized state
    pub state: serde_json::Value,
    /// Id of the last event folded into `state`, in the deterministic
    /// replay order; `None` for a snapshot of the initial state
    pub last_processed_event_id: Option<EventId>,
    /// Number of events folded into `state`
    pub event_count: u64,
    /// Wall-clock milliseconds when the snapshot was written
    pub saved_at: i64,
    /// `state_version` of the projection code that wrote this snapshot
    pub version: String,
}

/// Listing row: a snapshot minus its state blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Projection type key
    pub projection: String,
    /// Replay cursor
    pub last_processed_event_id: Option<EventId>,
    /// Number of events folded in
    pub event_count: u64,
    /// Wall-clock milliseconds when written
    pub saved_at: i64,
    /// Writing code's state version
    pub version: String,
}

impl From<&StoredSnapshot> for SnapshotMetadata {
    fn from(s: &StoredSnapshot) -> Self {
        Self {
            projection: s.projection.clone(),
            last_processed_event_id: s.last_processed_event_id.clone(),
            event_count: s.event_count,
            saved_at: s.saved_at,
            version: s.version.clone(),
        }
    }
}

/// Aggregate statistics over the snapshot keyspace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionStoreStats {
    /// Number of stored snapshots
    pub snapshots: usize,
    /// Sum of `event_count` across snapshots
    pub total_events_processed: u64,
}

/// Durable store of projection snapshots keyed by projection type.
#[derive(Clone)]
pub struct ProjectionStore {
    db: Arc<RwLock<Database>>,
}

impl ProjectionStore {
    /// Build the store over a shared database handle.
    pub fn new(db: Arc<RwLock<Database>>) -> Self {
        Self { db }
    }

    /// Persist a projection's state and cursor, replacing any previous
    /// snapshot, and refresh the metadata mirror in the same transaction.
    pub fn save_state(
        &self,
        projection: &str,
        state: serde_json::Value,
        last_processed_event_id: Option<EventId>,
        event_count: u64,
        version: &str,
    ) -> DriftResult<()> {
        let snapshot = StoredSnapshot {
            projection: projection.to_string(),
            state,
            last_processed_event_id,
            event_count,
            saved_at: chrono::Utc::now().timestamp_millis(),
            version: version.to_string(),
        };
        let meta = SnapshotMetadata::from(&snapshot);

        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut states = write_txn.open_table(PROJECTION_STATES_TABLE)?;
            let mut metas = write_txn.open_table(PROJECTION_META_TABLE)?;

            let state_bytes = serde_json::to_vec(&snapshot)
                .map_err(|e| DriftError::Serialization(e.to_string()))?;
            let meta_bytes = serde_json::to_vec(&meta)
                .map_err(|e| DriftError::Serialization(e.to_string()))?;
            states.insert(projection, state_bytes.as_slice())?;
            metas.insert(projection, meta_bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a projection's snapshot.
    ///
    /// Returns `None` when nothing is stored or when the stored snapshot
    /// was written by a different `state_version` than `current_version`
    /// (the caller then falls back to full replay).
    pub fn load_state(
        &self,
        projection: &str,
        current_version: &str,
    ) -> DriftResult<Option<StoredSnapshot>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(PROJECTION_STATES_TABLE)?;

        match table.get(projection)? {
            Some(v) => {
                let snapshot: StoredSnapshot = serde_json::from_slice(v.value())
                    .map_err(|e| DriftError::Serialization(e.to_string()))?;
                if snapshot.version != current_version {
                    return Ok(None);
                }
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Whether any snapshot (of any version) is stored for this type.
    pub fn has_state(&self, projection: &str) -> DriftResult<bool> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(PROJECTION_STATES_TABLE)?;
        Ok(table.get(projection)?.is_some())
    }

    /// Remove one projection's snapshot and metadata.
    pub fn clear_state(&self, projection: &str) -> DriftResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut states = write_txn.open_table(PROJECTION_STATES_TABLE)?;
            let mut metas = write_txn.open_table(PROJECTION_META_TABLE)?;
            states.remove(projection)?;
            metas.remove(projection)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove every snapshot and all metadata.
    pub fn clear_all(&self) -> DriftResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut states = write_txn.open_table(PROJECTION_STATES_TABLE)?;
            let mut metas = write_txn.open_table(PROJECTION_META_TABLE)?;

            let keys: Vec<String> = states
                .iter()?
                .map(|e| e.map(|(k, _)| k.value().to_string()))
                .collect::<Result<_, _>>()?;
            for key in keys {
                states.remove(key.as_str())?;
                metas.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// List metadata for every stored snapshot.
    pub fn list_metadata(&self) -> DriftResult<Vec<SnapshotMetadata>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(PROJECTION_META_TABLE)?;

        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let meta: SnapshotMetadata = serde_json::from_slice(value.value())
                .map_err(|e| DriftError::Serialization(e.to_string()))?;
            out.push(meta);
        }
        Ok(out)
    }

    /// Aggregate statistics over stored snapshots.
    pub fn get_stats(&self) -> DriftResult<ProjectionStoreStats> {
        let metas = self.list_metadata()?;
        Ok(ProjectionStoreStats {
            snapshots: metas.len(),
            total_events_processed: metas.iter().map(|m| m.event_count).sum(),
        })
    }

    /// Release this handle. The database closes when the last handle
    /// over it is dropped.
    pub fn close(self) {}
}
