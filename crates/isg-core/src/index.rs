//! # Discovery Index
//!
//! Auxiliary lookups that answer "which entities match X" without touching
//! the adjacency of the graph:
//!
//! - `by_name` / `by_qualified_name`: exact, case-sensitive, via the string pool
//! - `by_file`, `by_kind`
//! - `fuzzy`: case-insensitive ranked search (see [`crate::search`])
//!
//! The index is maintained incrementally from [`GraphDelta`]s: every touched
//! entity is dropped and, if still alive, re-read from the graph. Each entry
//! keeps its own copies of the keys it was filed under, so removal works even
//! after the graph has released the entity's strings.

use crate::graph::{Graph, GraphDelta};
use crate::pool::StringPool;
use crate::search::SearchIndex;
use crate::types::{Entity, EntityId, EntityKind, FileId, StrId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexEntry {
    name: StrId,
    qualified_name: StrId,
    file_id: FileId,
    kind: EntityKind,
    search_keys: Vec<Arc<str>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryIndex {
    entries: BTreeMap<EntityId, IndexEntry>,
    by_name: BTreeMap<StrId, BTreeSet<EntityId>>,
    by_qualified_name: BTreeMap<StrId, BTreeSet<EntityId>>,
    by_file: BTreeMap<FileId, BTreeSet<EntityId>>,
    by_kind: BTreeMap<EntityKind, BTreeSet<EntityId>>,
    search: SearchIndex,
}

impl DiscoveryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every entity of `graph` from scratch.
    #[must_use]
    pub fn build(graph: &Graph) -> Self {
        let mut index = Self::new();
        for entity in graph.entities() {
            index.insert(graph.pool(), entity);
        }
        index
    }

    /// Bring the index in line with `graph` after a mutation.
    pub fn apply(&mut self, graph: &Graph, delta: &GraphDelta) {
        for id in delta.touched() {
            self.remove(id);
            if let Some(entity) = graph.entity(id) {
                self.insert(graph.pool(), entity);
            }
        }
    }

    fn insert(&mut self, pool: &StringPool, entity: &Entity) {
        let id = entity.id;
        let mut search_keys = vec![self.search.insert(pool.text(entity.name), id)];
        if entity.qualified_name != entity.name {
            search_keys.push(self.search.insert(pool.text(entity.qualified_name), id));
        }
        self.by_name.entry(entity.name).or_default().insert(id);
        self.by_qualified_name
            .entry(entity.qualified_name)
            .or_default()
            .insert(id);
        self.by_file.entry(entity.file_id).or_default().insert(id);
        self.by_kind
            .entry(entity.kind.clone())
            .or_default()
            .insert(id);
        self.entries.insert(
            id,
            IndexEntry {
                name: entity.name,
                qualified_name: entity.qualified_name,
                file_id: entity.file_id,
                kind: entity.kind.clone(),
                search_keys,
            },
        );
    }

    fn remove(&mut self, id: EntityId) {
        let Some(entry) = self.entries.remove(&id) else {
            return;
        };
        for key in &entry.search_keys {
            self.search.remove(key, id);
        }
        remove_from(&mut self.by_name, &entry.name, id);
        remove_from(&mut self.by_qualified_name, &entry.qualified_name, id);
        remove_from(&mut self.by_file, &entry.file_id, id);
        remove_from(&mut self.by_kind, &entry.kind, id);
    }

    /// Entities with exactly this simple name, ascending by id.
    #[must_use]
    pub fn by_name(&self, pool: &StringPool, name: &str) -> Vec<EntityId> {
        lookup(&self.by_name, pool.get(name.trim()))
    }

    /// Entities with exactly this qualified name, ascending by id.
    #[must_use]
    pub fn by_qualified_name(&self, pool: &StringPool, qualified_name: &str) -> Vec<EntityId> {
        lookup(&self.by_qualified_name, pool.get(qualified_name.trim()))
    }

    #[must_use]
    pub fn by_file(&self, file: FileId) -> Vec<EntityId> {
        lookup(&self.by_file, Some(file))
    }

    #[must_use]
    pub fn by_kind(&self, kind: &EntityKind) -> Vec<EntityId> {
        self.by_kind
            .get(kind)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ranked case-insensitive search; empty for an empty fragment.
    #[must_use]
    pub fn fuzzy(&self, fragment: &str, limit: usize) -> Vec<EntityId> {
        self.search.search(fragment, limit)
    }

    /// Number of indexed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Kinds present, with entity counts.
    pub fn kinds(&self) -> impl Iterator<Item = (&EntityKind, usize)> {
        self.by_kind.iter().map(|(kind, ids)| (kind, ids.len()))
    }
}

fn lookup<K: Ord>(map: &BTreeMap<K, BTreeSet<EntityId>>, key: Option<K>) -> Vec<EntityId> {
    key.and_then(|k| map.get(&k))
        .map(|ids| ids.iter().copied().collect())
        .unwrap_or_default()
}

fn remove_from<K: Ord + Clone>(map: &mut BTreeMap<K, BTreeSet<EntityId>>, key: &K, id: EntityId) {
    if let Some(ids) = map.get_mut(key) {
        ids.remove(&id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
