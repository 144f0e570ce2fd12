//! # Engine
//!
//! The facade a host process embeds: configuration, the concurrency manager
//! and the operations that combine them.
//!
//! All methods take `&self`; the engine can be shared across threads behind
//! an `Arc`. Writes are serialized by the [`ConcurrencyManager`], reads run
//! on whatever snapshot was current when they started.

use crate::changes::{ChangeDetector, ChangeSet, FileEvent};
use crate::concurrency::ConcurrencyManager;
use crate::config::{EngineConfig, QueryConfig};
use crate::formats::{export_snapshot, import_snapshot};
use crate::primitives::SCHEMA_VERSION;
use crate::query::{Query, QueryOutput};
use crate::signature::FileUpdate;
use crate::snapshot::Snapshot;
use crate::stats::GraphStats;
use crate::storage::SnapshotStore;
use crate::types::{Checksum, IsgError};
use crate::updater::{UpdateReport, Updater};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What [`Engine::restore`] found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The stored snapshot was loaded.
    Restored { version: u64 },
    /// Nothing was stored yet.
    Empty,
    /// The stored snapshot is stale or unreadable; the engine starts empty
    /// and the host must re-ingest everything.
    RebuildRequired { reason: String },
}

#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
    manager: ConcurrencyManager,
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            manager: ConcurrencyManager::default(),
        }
    }

    #[must_use]
    pub fn with_snapshot(config: EngineConfig, snapshot: Snapshot) -> Self {
        Self {
            config,
            manager: ConcurrencyManager::new(snapshot),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn query_config(&self) -> &QueryConfig {
        &self.config.query
    }

    /// The current snapshot; query it with [`Snapshot::query`].
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.manager.read()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.manager.version()
    }

    #[must_use]
    pub fn stats(&self) -> GraphStats {
        self.snapshot().stats(self.config.query.threshold())
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    #[tracing::instrument(skip_all, fields(files = updates.len()))]
    pub fn ingest(&self, updates: &[FileUpdate]) -> UpdateReport {
        let updater = Updater::new(&self.config.ingest);
        self.manager.write(|s| updater.ingest(s, updates))
    }

    #[tracing::instrument(skip_all, fields(files = current.len()))]
    pub fn detect_changes(&self, current: &BTreeMap<String, Checksum>) -> ChangeSet {
        ChangeDetector::detect(self.snapshot().graph(), current)
    }

    #[tracing::instrument(skip_all, fields(events = events.len()))]
    pub fn detect_events(&self, events: &[FileEvent]) -> ChangeSet {
        ChangeDetector::detect_events(self.snapshot().graph(), events)
    }

    #[tracing::instrument(skip_all)]
    pub fn apply_changes(&self, changes: &ChangeSet, updates: &[FileUpdate]) -> UpdateReport {
        let updater = Updater::new(&self.config.ingest);
        self.manager
            .write(|s| updater.apply_changes(s, changes, updates))
    }

    /// Detect and apply file-watcher events in one write, so detection and
    /// application see the same base version.
    #[tracing::instrument(skip_all, fields(events = events.len()))]
    pub fn update(&self, events: &[FileEvent], updates: &[FileUpdate]) -> (ChangeSet, UpdateReport) {
        let updater = Updater::new(&self.config.ingest);
        self.manager.write(|s| {
            let changes = ChangeDetector::detect_events(s.graph(), events);
            let report = updater.apply_changes(s, &changes, updates);
            (changes, report)
        })
    }

    #[tracing::instrument(skip_all, fields(files = paths.len()))]
    pub fn remove_files(&self, paths: &[String]) -> UpdateReport {
        let updater = Updater::new(&self.config.ingest);
        self.manager.write(|s| updater.remove_files(s, paths))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Run a structured query on the current snapshot.
    #[tracing::instrument(skip(self), fields(version = tracing::field::Empty))]
    pub fn execute(&self, query: &Query) -> Result<QueryOutput, IsgError> {
        let snapshot = self.snapshot();
        tracing::Span::current().record("version", snapshot.version());
        snapshot.query(&self.config.query).execute(query)
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Encode the current snapshot.
    pub fn export(&self) -> Result<Vec<u8>, IsgError> {
        export_snapshot(self.snapshot().graph())
    }

    /// Build an engine from encoded bytes.
    #[tracing::instrument(skip_all, fields(bytes = bytes.len()))]
    pub fn import(bytes: &[u8], config: EngineConfig) -> Result<Self, IsgError> {
        let graph = import_snapshot(bytes, config.ingest.max_snapshot_bytes)?;
        Ok(Self::with_snapshot(config, Snapshot::from_graph(graph, 0)))
    }

    /// Replace the current snapshot with decoded bytes as the next version.
    #[tracing::instrument(skip_all, fields(bytes = bytes.len()))]
    pub fn load(&self, bytes: &[u8]) -> Result<(), IsgError> {
        let graph = import_snapshot(bytes, self.config.ingest.max_snapshot_bytes)?;
        let next = self.version().saturating_add(1);
        self.manager.replace(Snapshot::from_graph(graph, next));
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn save(&self, store: &dyn SnapshotStore) -> Result<(), IsgError> {
        let snapshot = self.snapshot();
        let bytes = export_snapshot(snapshot.graph())?;
        store.save(&bytes, snapshot.version())?;
        tracing::info!(version = snapshot.version(), bytes = bytes.len(), "snapshot saved");
        Ok(())
    }

    /// Load the stored snapshot, or start empty when it cannot be used.
    ///
    /// Storage failures are errors; stale or corrupt content is reported as
    /// [`RestoreOutcome::RebuildRequired`].
    #[tracing::instrument(skip_all)]
    pub fn restore(
        store: &dyn SnapshotStore,
        config: EngineConfig,
    ) -> Result<(Self, RestoreOutcome), IsgError> {
        let stored = match store.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok((Self::new(config), RestoreOutcome::Empty)),
            Err(e @ IsgError::SerializationError(_)) => return Ok(Self::rebuild(config, &e)),
            Err(e) => return Err(e),
        };
        if stored.schema_version != SCHEMA_VERSION {
            let e = IsgError::SchemaMismatch {
                found: stored.schema_version,
                expected: SCHEMA_VERSION,
            };
            return Ok(Self::rebuild(config, &e));
        }
        match import_snapshot(&stored.bytes, config.ingest.max_snapshot_bytes) {
            Ok(graph) => {
                let version = stored.snapshot_version;
                tracing::info!(version, entities = graph.entity_count(), "snapshot restored");
                let engine = Self::with_snapshot(config, Snapshot::from_graph(graph, version));
                Ok((engine, RestoreOutcome::Restored { version }))
            }
            Err(e @ (IsgError::SchemaMismatch { .. } | IsgError::SerializationError(_))) => {
                Ok(Self::rebuild(config, &e))
            }
            Err(e) => Err(e),
        }
    }

    fn rebuild(config: EngineConfig, cause: &IsgError) -> (Self, RestoreOutcome) {
        tracing::warn!(%cause, "stored snapshot discarded; full re-ingestion required");
        (
            Self::new(config),
            RestoreOutcome::RebuildRequired {
                reason: cause.to_string(),
            },
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::SNAPSHOT_PREFIX_LEN;
    use crate::signature::{FileBatch, RawEntity, RawRelationship};
    use crate::storage::{FileSnapshotStore, RedbSnapshotStore};
    use tempfile::TempDir;

    fn updates() -> Vec<FileUpdate> {
        vec![
            FileBatch::new("src/lib.rs", Checksum(1))
                .entity(RawEntity::new("init", "fn", 1).qualified("lib::init"))
                .relationship(RawRelationship::new("init", "calls", "setup"))
                .into(),
            FileBatch::new("src/setup.rs", Checksum(2))
                .entity(RawEntity::new("setup", "fn", 1).qualified("setup::setup"))
                .into(),
        ]
    }

    #[test]
    fn ingest_query_and_versions() {
        let engine = Engine::default();
        let report = engine.ingest(&updates());
        assert_eq!(report.files_ingested, 2);
        assert_eq!(engine.version(), 1);

        let out = engine.execute(&Query::callers("setup")).expect("callers");
        let init = engine.snapshot().by_qualified_name("lib::init");
        assert_eq!(out, QueryOutput::Entities(init));

        let (changes, report) = engine.update(&[FileEvent::removed("src/setup.rs")], &[]);
        assert_eq!(changes.deleted.len(), 1);
        assert_eq!(report.files_removed, 1);
        assert_eq!(engine.version(), 2);
        assert!(engine.execute(&Query::callers("setup::setup")).is_err());
    }

    #[test]
    fn save_and_restore_through_redb() {
        let dir = TempDir::new().expect("tempdir");
        let store = RedbSnapshotStore::open(dir.path().join("isg.redb")).expect("open");
        let engine = Engine::default();
        engine.ingest(&updates());
        engine.save(&store).expect("save");

        let (restored, outcome) =
            Engine::restore(&store, EngineConfig::default()).expect("restore");
        assert_eq!(outcome, RestoreOutcome::Restored { version: 1 });
        assert_eq!(restored.export().expect("export"), engine.export().expect("export"));
        assert_eq!(restored.stats().entities, engine.stats().entities);
    }

    #[test]
    fn stale_schema_requires_rebuild() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileSnapshotStore::new(dir.path().join("graph.isgs"));
        let engine = Engine::default();
        engine.ingest(&updates());
        let mut bytes = engine.export().expect("export");
        bytes[SNAPSHOT_PREFIX_LEN - 2..SNAPSHOT_PREFIX_LEN]
            .copy_from_slice(&(SCHEMA_VERSION + 1).to_le_bytes());
        store.save(&bytes, 3).expect("save");

        let (restored, outcome) =
            Engine::restore(&store, EngineConfig::default()).expect("restore");
        assert!(matches!(outcome, RestoreOutcome::RebuildRequired { .. }));
        assert_eq!(restored.stats().entities, 0);
    }

    #[test]
    fn empty_store_and_import() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileSnapshotStore::new(dir.path().join("graph.isgs"));
        let (_, outcome) = Engine::restore(&store, EngineConfig::default()).expect("restore");
        assert_eq!(outcome, RestoreOutcome::Empty);

        let engine = Engine::default();
        engine.ingest(&updates());
        let bytes = engine.export().expect("export");
        let imported = Engine::import(&bytes, EngineConfig::default()).expect("import");
        assert_eq!(imported.export().expect("export"), bytes);

        let other = Engine::default();
        other.load(&bytes).expect("load");
        assert_eq!(other.version(), 1);
        assert_eq!(other.stats().entities, engine.stats().entities);
    }
}
