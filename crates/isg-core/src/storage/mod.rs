//! # Snapshot Storage
//!
//! Backends that persist encoded snapshots (see [`crate::formats`]).
//!
//! - [`RedbSnapshotStore`]: ACID, keeps version metadata in its own table
//! - [`FileSnapshotStore`]: a single file replaced atomically via rename

pub mod file_store;
pub mod redb_store;

pub use file_store::FileSnapshotStore;
pub use redb_store::RedbSnapshotStore;

use crate::types::IsgError;

/// Encoded snapshot as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub bytes: Vec<u8>,
    pub schema_version: u16,
    /// Engine version counter at save time.
    pub snapshot_version: u64,
}

/// Persistence contract for encoded snapshots.
pub trait SnapshotStore {
    /// Replace the stored snapshot.
    fn save(&self, bytes: &[u8], snapshot_version: u64) -> Result<(), IsgError>;

    /// The stored snapshot, or `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<StoredSnapshot>, IsgError>;

    /// Drop the stored snapshot.
    fn clear(&self) -> Result<(), IsgError>;
}
