//! # Concurrency Manager
//!
//! Single writer, many readers over a versioned snapshot pointer.
//!
//! Readers clone the current `Arc<Snapshot>` under a short read lock and
//! query it with no lock held. The writer serializes on its own mutex,
//! mutates a private clone of the current snapshot, bumps the version and
//! publishes the clone by swapping the pointer. A reader therefore sees
//! either the old or the new version, never a half-applied write.
//!
//! Each write pays one deep clone of the snapshot, linear in graph size;
//! `benches/graph_bench.rs` (`large_graph_update`) tracks that cost for a
//! single-file update.
//!
//! Lock poisoning is recovered: the published snapshot is replaced only by
//! a whole new value, so a panic elsewhere cannot leave it half-written.

use crate::snapshot::Snapshot;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct ConcurrencyManager {
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl ConcurrencyManager {
    #[must_use]
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    /// The current snapshot. Later writes do not affect it.
    #[must_use]
    pub fn read(&self) -> Arc<Snapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.read().version()
    }

    /// Run `mutate` on a copy of the current snapshot and publish it as the
    /// next version. Returns whatever `mutate` returns.
    pub fn write<R>(&self, mutate: impl FnOnce(&mut Snapshot) -> R) -> R {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.read();
        let mut next = Snapshot::clone(&base);
        let result = mutate(&mut next);
        next.set_version(base.version().saturating_add(1));
        self.publish(next);
        result
    }

    /// Like [`write`](Self::write), but discards the copy when `mutate`
    /// fails, leaving the current version in place.
    pub fn try_write<R, E>(
        &self,
        mutate: impl FnOnce(&mut Snapshot) -> Result<R, E>,
    ) -> Result<R, E> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.read();
        let mut next = Snapshot::clone(&base);
        let result = mutate(&mut next)?;
        next.set_version(base.version().saturating_add(1));
        self.publish(next);
        Ok(result)
    }

    /// Publish a snapshot built elsewhere (e.g. restored from storage),
    /// keeping its version.
    pub fn replace(&self, snapshot: Snapshot) {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.publish(snapshot);
    }

    fn publish(&self, snapshot: Snapshot) {
        let version = snapshot.version();
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(snapshot);
        tracing::debug!(version, "snapshot published");
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::signature::{FileBatch, FileUpdate, RawEntity};
    use crate::types::{Checksum, IsgError};
    use crate::updater::Updater;
    use std::thread;

    fn batch(path: &str, name: &str) -> Vec<FileUpdate> {
        vec![FileBatch::new(path, Checksum(1)).entity(RawEntity::new(name, "fn", 1)).into()]
    }

    #[test]
    fn readers_keep_their_version() {
        let manager = ConcurrencyManager::default();
        let config = IngestConfig::default();
        let before = manager.read();
        manager.write(|s| Updater::new(&config).ingest(s, &batch("a.rs", "a")));
        let after = manager.read();
        assert_eq!(before.version(), 0);
        assert_eq!(before.graph().entity_count(), 0);
        assert_eq!(after.version(), 1);
        assert_eq!(after.graph().entity_count(), 1);
    }

    #[test]
    fn failed_write_publishes_nothing() {
        let manager = ConcurrencyManager::default();
        let result: Result<(), IsgError> = manager.try_write(|s| {
            s.remove_file_contribution(crate::signature::file_id("x.rs"));
            Err(IsgError::StorageError("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(manager.version(), 0);
    }

    #[test]
    fn concurrent_readers_see_whole_versions() {
        let manager = Arc::new(ConcurrencyManager::default());
        let config = IngestConfig::default();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot = manager.read();
                        // Each write adds exactly one file with one entity.
                        assert_eq!(snapshot.graph().entity_count() as u64, snapshot.version());
                        snapshot.graph().check_consistency().expect("consistent");
                    }
                })
            })
            .collect();
        for i in 0..50 {
            let path = format!("f{}.rs", i);
            let name = format!("f{}", i);
            manager.write(|s| Updater::new(&config).ingest(s, &batch(&path, &name)));
        }
        for reader in readers {
            reader.join().expect("reader thread");
        }
        assert_eq!(manager.version(), 50);
    }
}
