//! Durable vector clock images, keyed by owning node.
//!
//! A node's own clock is persisted on every local event creation and on
//! every completed gossip round. Loading a missing key returns an empty
//! clock; a corrupt row is reported as a serialization error, never
//! silently zeroed.

use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{DriftError, DriftResult};
use crate::types::{NodeId, VectorClock};

pub(super) const CLOCKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("clocks");

/// Durable map `node_id -> vector clock`.
#[derive(Clone)]
pub struct VectorClockStore {
    db: Arc<RwLock<Database>>,
}

impl VectorClockStore {
    /// Build the store over a shared database handle.
    pub fn new(db: Arc<RwLock<Database>>) -> Self {
        Self { db }
    }

    /// Persist a node's clock, replacing any previous image.
    pub fn save(&self, node: &NodeId, clock: &VectorClock) -> DriftResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(CLOCKS_TABLE)?;
            let data = serde_json::to_vec(clock)
                .map_err(|e| DriftError::Serialization(e.to_string()))?;
            table.insert(node.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a node's clock. A node never seen before has an empty clock.
    pub fn load(&self, node: &NodeId) -> DriftResult<VectorClock> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(CLOCKS_TABLE)?;

        match table.get(node.as_str())? {
            Some(v) => serde_json::from_slice(v.value())
                .map_err(|e| DriftError::Serialization(e.to_string())),
            None => Ok(VectorClock::new()),
        }
    }

    /// Whether a clock image exists for this node.
    pub fn has(&self, node: &NodeId) -> DriftResult<bool> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(CLOCKS_TABLE)?;
        Ok(table.get(node.as_str())?.is_some())
    }

    /// Delete a node's clock image.
    pub fn delete(&self, node: &NodeId) -> DriftResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(CLOCKS_TABLE)?;
            table.remove(node.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Delete every stored clock image.
    pub fn clear(&self) -> DriftResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(CLOCKS_TABLE)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|e| e.map(|(k, _)| k.value().to_string()))
                .collect::<Result<_, _>>()?;
            for key in keys {
                table.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Release this handle. The database closes when the last handle
    /// over it is dropped.
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (VectorClockStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let storage = crate::storage::Storage::open(&db_path).unwrap();
        (storage.clocks(), temp_dir)
    }

    #[test]
    fn test_load_missing_returns_empty_clock() {
        let (store, _temp) = create_test_store();
        let clock = store.load(&NodeId::from("nobody")).unwrap();
        assert!(clock.is_empty());
        assert!(!store.has(&NodeId::from("nobody")).unwrap());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (store, _temp) = create_test_store();
        let owner = NodeId::from("me");

        let clock: VectorClock = [(NodeId::from("a"), 3), (NodeId::from("b"), 7)]
            .into_iter()
            .collect();
        store.save(&owner, &clock).unwrap();

        assert!(store.has(&owner).unwrap());
        let loaded = store.load(&owner).unwrap();
        assert_eq!(loaded, clock);
    }

    #[test]
    fn test_save_replaces_previous_image() {
        let (store, _temp) = create_test_store();
        let owner = NodeId::from("me");

        let first: VectorClock = [(NodeId::from("a"), 1)].into_iter().collect();
        let second: VectorClock = [(NodeId::from("a"), 2)].into_iter().collect();
        store.save(&owner, &first).unwrap();
        store.save(&owner, &second).unwrap();

        assert_eq!(store.load(&owner).unwrap(), second);
    }

    #[test]
    fn test_delete() {
        let (store, _temp) = create_test_store();
        let owner = NodeId::from("me");

        store.save(&owner, &VectorClock::new()).unwrap();
        assert!(store.has(&owner).unwrap());

        store.delete(&owner).unwrap();
        assert!(!store.has(&owner).unwrap());
        assert!(store.load(&owner).unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_all() {
        let (store, _temp) = create_test_store();
        store.save(&NodeId::from("a"), &VectorClock::new()).unwrap();
        store.save(&NodeId::from("b"), &VectorClock::new()).unwrap();

        store.clear().unwrap();
        assert!(!store.has(&NodeId::from("a")).unwrap());
        assert!(!store.has(&NodeId::from("b")).unwrap());
    }

    #[test]
    fn test_clock_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let owner = NodeId::from("me");
        let clock: VectorClock = [(NodeId::from("a"), 5)].into_iter().collect();

        {
            let storage = crate::storage::Storage::open(&db_path).unwrap();
            storage.clocks().save(&owner, &clock).unwrap();
        }
        {
            let storage = crate::storage::Storage::open(&db_path).unwrap();
            assert_eq!(storage.clocks().load(&owner).unwrap(), clock);
        }
    }
}
