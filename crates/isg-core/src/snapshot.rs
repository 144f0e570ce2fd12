//! # Snapshot
//!
//! A consistent, versioned view of the Graph Store and the Discovery Index.
//!
//! Every mutation goes through a snapshot so the index is replayed from the
//! same [`GraphDelta`] the graph produced. Published snapshots are never
//! mutated again; writers work on a clone (see [`crate::concurrency`]).

use crate::config::QueryConfig;
use crate::graph::{Graph, GraphDelta, InsertOutcome};
use crate::index::DiscoveryIndex;
use crate::query::QueryEngine;
use crate::signature::{EdgeRecord, EntityRecord, FileContribution};
use crate::stats::GraphStats;
use crate::types::{Checksum, Confidence, Entity, EntityId, EntityKind, FileId, IsgError, Suggestion};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    version: u64,
    graph: Graph,
    index: DiscoveryIndex,
}

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing graph, indexing it from scratch.
    #[must_use]
    pub fn from_graph(graph: Graph, version: u64) -> Self {
        let index = DiscoveryIndex::build(&graph);
        Self {
            version,
            graph,
            index,
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    #[must_use]
    pub fn index(&self) -> &DiscoveryIndex {
        &self.index
    }

    // -------------------------------------------------------------------------
    // Mutation (index kept in step)
    // -------------------------------------------------------------------------

    pub fn apply_batch(
        &mut self,
        removals: &BTreeSet<FileId>,
        additions: &[FileContribution],
    ) -> InsertOutcome {
        let outcome = self.graph.apply_batch(removals, additions);
        self.index.apply(&self.graph, &outcome.delta);
        outcome
    }

    pub fn remove_file_contribution(&mut self, file: FileId) -> GraphDelta {
        let delta = self.graph.remove_file_contribution(file);
        self.index.apply(&self.graph, &delta);
        delta
    }

    pub fn insert_entities(
        &mut self,
        path: &str,
        checksum: Checksum,
        records: &[EntityRecord],
    ) -> Result<InsertOutcome, IsgError> {
        let outcome = self.graph.insert_entities(path, checksum, records)?;
        self.index.apply(&self.graph, &outcome.delta);
        Ok(outcome)
    }

    pub fn insert_edges(&mut self, records: &[EdgeRecord]) -> InsertOutcome {
        let outcome = self.graph.insert_edges(records);
        self.index.apply(&self.graph, &outcome.delta);
        outcome
    }

    // -------------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.graph.entity(id)
    }

    /// Entity with its strings and file path resolved.
    #[must_use]
    pub fn describe(&self, id: EntityId) -> Option<Suggestion> {
        self.graph.suggestion(id)
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Vec<EntityId> {
        self.index.by_name(self.graph.pool(), name)
    }

    #[must_use]
    pub fn by_qualified_name(&self, qualified_name: &str) -> Vec<EntityId> {
        self.index.by_qualified_name(self.graph.pool(), qualified_name)
    }

    /// Every entity whose simple or qualified name is exactly `name`, with
    /// file context for disambiguation, ascending by id.
    #[must_use]
    pub fn lookup_name(&self, name: &str) -> Vec<Suggestion> {
        let ids: BTreeSet<EntityId> = self
            .by_name(name)
            .into_iter()
            .chain(self.by_qualified_name(name))
            .collect();
        ids.into_iter().filter_map(|id| self.describe(id)).collect()
    }

    #[must_use]
    pub fn by_file(&self, file: FileId) -> Vec<EntityId> {
        self.index.by_file(file)
    }

    /// Entities of a file given by (non-canonical) path.
    #[must_use]
    pub fn by_file_path(&self, path: &str) -> Vec<EntityId> {
        self.graph
            .file_by_path(path)
            .map(|f| self.by_file(f.file_id))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn by_kind(&self, kind: &EntityKind) -> Vec<EntityId> {
        self.index.by_kind(kind)
    }

    #[must_use]
    pub fn fuzzy(&self, fragment: &str, limit: usize) -> Vec<EntityId> {
        self.index.fuzzy(fragment, limit)
    }

    /// Counters; edges at or below `threshold` count as low confidence.
    #[must_use]
    pub fn stats(&self, threshold: Confidence) -> GraphStats {
        GraphStats::collect(self.version, &self.graph, &self.index, threshold)
    }

    /// Query engine over this snapshot.
    #[must_use]
    pub fn query<'a>(&'a self, config: &QueryConfig) -> QueryEngine<'a> {
        QueryEngine::new(self, config)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::signature::{FileBatch, RawEntity, RawRelationship, SignatureModel, file_id};

    fn contribution(batch: &FileBatch) -> FileContribution {
        SignatureModel::normalize(batch, &IngestConfig::default())
            .expect("normalize")
            .contribution
    }

    #[test]
    fn mutations_keep_index_in_step() {
        let mut snapshot = Snapshot::new();
        let a = FileBatch::new("src/a.rs", Checksum(1))
            .entity(RawEntity::new("run", "fn", 1).qualified("a::run"))
            .relationship(RawRelationship::new("run", "calls", "helper"));
        let b = FileBatch::new("src/b.rs", Checksum(2))
            .entity(RawEntity::new("run", "fn", 4).qualified("b::run"))
            .entity(RawEntity::new("helper", "fn", 9).qualified("b::helper"));
        snapshot.apply_batch(&BTreeSet::new(), &[contribution(&a), contribution(&b)]);

        assert_eq!(snapshot.by_name("run").len(), 2);
        let described = snapshot.lookup_name("run");
        assert_eq!(described.len(), 2);
        assert!(described.iter().any(|s| s.file == "src/a.rs"));
        assert!(described.iter().any(|s| s.file == "src/b.rs"));
        assert_eq!(snapshot.lookup_name("b::helper").len(), 1);
        assert_eq!(snapshot.by_file_path("./src/b.rs").len(), 2);

        snapshot.remove_file_contribution(file_id("src/b.rs"));
        assert_eq!(snapshot.by_name("run").len(), 1);
        assert!(snapshot.by_file_path("src/b.rs").is_empty());
        assert_eq!(snapshot.by_kind(&EntityKind::ExternalStub).len(), 1);
        assert_eq!(snapshot.index(), &DiscoveryIndex::build(snapshot.graph()));
    }

    #[test]
    fn stats_count_by_kind() {
        let mut snapshot = Snapshot::new();
        let batch = FileBatch::new("m.rs", Checksum(3))
            .entity(RawEntity::new("Shape", "trait", 1))
            .entity(RawEntity::new("Circle", "struct", 4))
            .relationship(RawRelationship::new("Circle", "implements", "Shape"))
            .relationship(RawRelationship::new("Circle", "uses", "Shape").confidence(0.0));
        snapshot.apply_batch(&BTreeSet::new(), &[contribution(&batch)]);
        let stats = snapshot.stats(Confidence::ZERO);
        assert_eq!(stats.files, 1);
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.edges, 2);
        assert_eq!(stats.low_confidence_edges, 1);
        assert_eq!(stats.edges_by_kind.get("implements"), Some(&1));
        assert_eq!(stats.entities_by_kind.get("trait"), Some(&1));
    }
}
