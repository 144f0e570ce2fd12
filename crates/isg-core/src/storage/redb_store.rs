//! # redb Snapshot Store
//!
//! Keeps the latest snapshot in a redb database.
//!
//! Tables:
//! - `snapshot`: `"current"` -> encoded snapshot bytes
//! - `metadata`: `"schema_version"`, `"snapshot_version"` -> u64
//!
//! Bytes and metadata are written in one transaction, so a crash leaves
//! either the previous snapshot or the new one.

use super::{SnapshotStore, StoredSnapshot};
use crate::formats::peek_schema_version;
use crate::types::IsgError;
use redb::{Database, ReadableDatabase, TableDefinition};
use std::path::Path;

const SNAPSHOT: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshot");

const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const CURRENT: &str = "current";
const SCHEMA_VERSION_KEY: &str = "schema_version";
const SNAPSHOT_VERSION_KEY: &str = "snapshot_version";

pub struct RedbSnapshotStore {
    db: Database,
}

impl std::fmt::Debug for RedbSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbSnapshotStore").finish_non_exhaustive()
    }
}

fn storage_err(e: impl std::fmt::Display) -> IsgError {
    IsgError::StorageError(e.to_string())
}

impl RedbSnapshotStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IsgError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;
        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            let _ = write_txn.open_table(SNAPSHOT).map_err(storage_err)?;
            let _ = write_txn.open_table(METADATA).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(Self { db })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<bool, IsgError> {
        self.db.compact().map_err(storage_err)
    }
}

impl SnapshotStore for RedbSnapshotStore {
    fn save(&self, bytes: &[u8], snapshot_version: u64) -> Result<(), IsgError> {
        let schema_version = peek_schema_version(bytes)?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut snapshot = write_txn.open_table(SNAPSHOT).map_err(storage_err)?;
            snapshot.insert(CURRENT, bytes).map_err(storage_err)?;
            let mut metadata = write_txn.open_table(METADATA).map_err(storage_err)?;
            metadata
                .insert(SCHEMA_VERSION_KEY, u64::from(schema_version))
                .map_err(storage_err)?;
            metadata
                .insert(SNAPSHOT_VERSION_KEY, snapshot_version)
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        tracing::debug!(bytes = bytes.len(), snapshot_version, "snapshot saved to redb");
        Ok(())
    }

    fn load(&self) -> Result<Option<StoredSnapshot>, IsgError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let snapshot = read_txn.open_table(SNAPSHOT).map_err(storage_err)?;
        let Some(bytes) = snapshot
            .get(CURRENT)
            .map_err(storage_err)?
            .map(|v| v.value().to_vec())
        else {
            return Ok(None);
        };
        let metadata = read_txn.open_table(METADATA).map_err(storage_err)?;
        let read_meta = |key: &str| -> Result<u64, IsgError> {
            Ok(metadata
                .get(key)
                .map_err(storage_err)?
                .map(|v| v.value())
                .unwrap_or(0))
        };
        let schema_version = u16::try_from(read_meta(SCHEMA_VERSION_KEY)?).unwrap_or(u16::MAX);
        let snapshot_version = read_meta(SNAPSHOT_VERSION_KEY)?;
        Ok(Some(StoredSnapshot {
            bytes,
            schema_version,
            snapshot_version,
        }))
    }

    fn clear(&self) -> Result<(), IsgError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut snapshot = write_txn.open_table(SNAPSHOT).map_err(storage_err)?;
            snapshot.remove(CURRENT).map_err(storage_err)?;
            let mut metadata = write_txn.open_table(METADATA).map_err(storage_err)?;
            metadata.remove(SCHEMA_VERSION_KEY).map_err(storage_err)?;
            metadata.remove(SNAPSHOT_VERSION_KEY).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
