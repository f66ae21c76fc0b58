//! Persistent storage using redb.
//!
//! One database file holds every durable keyspace of the engine:
//! - Events (append log + per-origin timestamp index + watermark map)
//! - Vector clocks (per owning node)
//! - Projection snapshots and their metadata mirror
//!
//! The `Storage` value opens the database and declares all tables up
//! front; the concrete stores share the same database handle instead of
//! opening multiple instances of the same file.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::Database;

use crate::error::DriftResult;

// Submodules
mod clocks;
mod events;
mod projections;

pub use clocks::VectorClockStore;
pub use events::EventStore;
pub use projections::{ProjectionStore, ProjectionStoreStats, SnapshotMetadata, StoredSnapshot};

use clocks::CLOCKS_TABLE;
use events::{EVENTS_TABLE, EVENT_INDEX_TABLE, WATERMARKS_TABLE};
use projections::{PROJECTION_META_TABLE, PROJECTION_STATES_TABLE};

/// Storage layer root: owns the redb database.
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Open (or create) the database at the given path.
    ///
    /// Creates the parent directory if needed and initializes every table
    /// in one write transaction. Idempotent: re-opening an existing
    /// database is fine.
    pub fn open(path: impl AsRef<Path>) -> DriftResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(EVENTS_TABLE)?;
            let _ = write_txn.open_table(EVENT_INDEX_TABLE)?;
            let _ = write_txn.open_table(WATERMARKS_TABLE)?;
            let _ = write_txn.open_table(CLOCKS_TABLE)?;
            let _ = write_txn.open_table(PROJECTION_STATES_TABLE)?;
            let _ = write_txn.open_table(PROJECTION_META_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Get a reference to the shared database handle.
    ///
    /// The concrete stores are constructed over this handle so they all
    /// use the same underlying database connection.
    pub fn db_handle(&self) -> Arc<RwLock<Database>> {
        self.db.clone()
    }

    /// Build the event store over this database.
    pub fn events(&self) -> EventStore {
        EventStore::new(self.db_handle())
    }

    /// Build the vector clock store over this database.
    pub fn clocks(&self) -> VectorClockStore {
        VectorClockStore::new(self.db_handle())
    }

    /// Build the projection snapshot store over this database.
    pub fn projections(&self) -> ProjectionStore {
        ProjectionStore::new(self.db_handle())
    }
}
