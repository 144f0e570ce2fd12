//! # Graph Store
//!
//! The authoritative collection of entities, file records and edges.
//!
//! ## Layout
//!
//! - `entities`: `EntityId -> Entity`, strings interned in the owned [`StringPool`]
//! - `files`: `FileId -> FileRecord`, each holding the exact inverse entity set
//! - `declared`: the edges each source entity declared, as ingested
//! - `forward` / `reverse`: resolved adjacency keyed by `(entity, kind)`
//!
//! Declared edges are the input; `forward`/`reverse` are derived from them by
//! binding symbol targets through the [`SymbolTable`]. Every mutating call
//! finishes with a relink that re-binds the touched symbols and rebuilds the
//! adjacency of affected sources, so the store never exposes a dangling
//! endpoint and the derived state depends only on the set of attached files.
//!
//! ## Determinism
//!
//! BTreeMap/BTreeSet everywhere; iteration order is by id.

use crate::pool::StringPool;
use crate::primitives::EXTERNAL_FILE_PATH;
use crate::signature::{
    EdgeRecord, EdgeTarget, EntityRecord, FileContribution, file_id, normalize_path, stub_id,
};
use crate::symbols::SymbolTable;
use crate::types::{
    Checksum, Confidence, Edge, EdgeKind, EdgeKindSet, Entity, EntityId, EntityKind, FileId,
    FileRecord, IsgError, StrId, Suggestion, Visibility,
};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// DECLARED EDGES
// =============================================================================

/// Target of an edge as declared by its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeclaredTarget {
    Local(EntityId),
    Symbol(StrId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredEdge {
    pub target: DeclaredTarget,
    pub kind: EdgeKind,
    pub confidence: Confidence,
}

// =============================================================================
// DELTAS
// =============================================================================

/// Entities touched by a mutation, with whether each existed beforehand.
///
/// The discovery index replays a delta by dropping and re-reading every
/// touched entity, which is correct no matter how many times an id was
/// removed and re-added inside one mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphDelta {
    touched: BTreeMap<EntityId, bool>,
}

/// Net effect of a delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaSummary {
    pub inserted: usize,
    pub removed: usize,
    pub replaced: usize,
}

impl GraphDelta {
    fn touch(&mut self, id: EntityId, existed: bool) {
        self.touched.entry(id).or_insert(existed);
    }

    pub fn merge(&mut self, other: Self) {
        for (id, existed) in other.touched {
            self.touch(id, existed);
        }
    }

    pub fn touched(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.touched.keys().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }

    /// Compare against the graph after the mutation.
    #[must_use]
    pub fn summarize(&self, graph: &Graph) -> DeltaSummary {
        let mut summary = DeltaSummary::default();
        for (id, existed) in &self.touched {
            match (*existed, graph.contains(*id)) {
                (false, true) => summary.inserted += 1,
                (true, false) => summary.removed += 1,
                (true, true) => summary.replaced += 1,
                (false, false) => {}
            }
        }
        summary
    }
}

/// Result of an insertion call: the delta plus per-record warnings.
#[derive(Debug, Clone, Default)]
pub struct InsertOutcome {
    pub delta: GraphDelta,
    pub warnings: Vec<IsgError>,
}

/// Work accumulated during a mutation and drained by `relink`.
#[derive(Default)]
struct Dirty {
    symbols: BTreeSet<StrId>,
    sources: BTreeSet<EntityId>,
    orphan_stubs: BTreeSet<EntityId>,
}

// =============================================================================
// GRAPH
// =============================================================================

type Adjacency = BTreeMap<(EntityId, EdgeKind), BTreeMap<EntityId, Confidence>>;

#[derive(Debug, Clone, Default)]
pub struct Graph {
    pool: StringPool,
    files: BTreeMap<FileId, FileRecord>,
    entities: BTreeMap<EntityId, Entity>,
    declared: BTreeMap<EntityId, Vec<DeclaredEdge>>,
    forward: Adjacency,
    reverse: Adjacency,
    symbols: SymbolTable,
    /// Engine-created stubs and the symbol each one stands in for.
    stubs: BTreeMap<EntityId, StrId>,
}

/// File id of the reserved record that owns external stubs.
#[must_use]
pub fn external_file_id() -> FileId {
    file_id(EXTERNAL_FILE_PATH)
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Mutation API
    // -------------------------------------------------------------------------

    /// Append entities to the record of `path`, creating it if needed.
    ///
    /// Records whose id already exists are skipped with a warning.
    pub fn insert_entities(
        &mut self,
        path: &str,
        checksum: Checksum,
        records: &[EntityRecord],
    ) -> Result<InsertOutcome, IsgError> {
        let canonical = normalize_path(path).ok_or_else(|| IsgError::MalformedRecord {
            file: path.to_string(),
            line: 0,
            reason: "invalid file path".to_string(),
        })?;
        let mut outcome = InsertOutcome::default();
        let mut dirty = Dirty::default();
        let file = self.open_file(&canonical, checksum);
        for record in records {
            if let Err(warning) = self.attach_entity(file, record, &mut outcome.delta, &mut dirty) {
                outcome.warnings.push(warning);
            }
        }
        self.relink(dirty, &mut outcome.delta);
        Ok(outcome)
    }

    /// Append declared edges. Sources must exist; local targets must live in
    /// the same file as their source.
    pub fn insert_edges(&mut self, records: &[EdgeRecord]) -> InsertOutcome {
        let mut outcome = InsertOutcome::default();
        let mut dirty = Dirty::default();
        for record in records {
            if let Err(warning) = self.attach_edge(record, &mut dirty) {
                outcome.warnings.push(warning);
            }
        }
        self.relink(dirty, &mut outcome.delta);
        outcome
    }

    /// Remove every entity owned by `file` and every edge touching them.
    ///
    /// Edges from other files that pointed at removed entities are re-bound
    /// (to another definition or to an external stub) in the same step.
    pub fn remove_file_contribution(&mut self, file: FileId) -> GraphDelta {
        let mut delta = GraphDelta::default();
        let mut dirty = Dirty::default();
        self.detach_file(file, &mut delta, &mut dirty);
        self.relink(dirty, &mut delta);
        delta
    }

    /// Replace a set of file contributions with a single relink.
    ///
    /// All removals are applied first, then all additions in the given
    /// order. A file in `additions` that is still attached is replaced.
    pub fn apply_batch(
        &mut self,
        removals: &BTreeSet<FileId>,
        additions: &[FileContribution],
    ) -> InsertOutcome {
        let mut outcome = InsertOutcome::default();
        let mut dirty = Dirty::default();
        for file in removals {
            self.detach_file(*file, &mut outcome.delta, &mut dirty);
        }
        for contribution in additions {
            if self.files.contains_key(&contribution.file_id) {
                self.detach_file(contribution.file_id, &mut outcome.delta, &mut dirty);
            }
            let file = self.open_file(&contribution.path, contribution.checksum);
            for record in &contribution.entities {
                if let Err(warning) =
                    self.attach_entity(file, record, &mut outcome.delta, &mut dirty)
                {
                    outcome.warnings.push(warning);
                }
            }
            for record in &contribution.edges {
                if let Err(warning) = self.attach_edge(record, &mut dirty) {
                    outcome.warnings.push(warning);
                }
            }
        }
        self.relink(dirty, &mut outcome.delta);
        outcome
    }

    // -------------------------------------------------------------------------
    // Read API
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn pool(&self) -> &StringPool {
        &self.pool
    }

    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// All entities in ascending id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Up to `limit` live ids numerically closest to `id`, nearest first.
    #[must_use]
    pub fn nearest_ids(&self, id: EntityId, limit: usize) -> Vec<EntityId> {
        let below = self.entities.range(..id).rev().take(limit);
        let above = self.entities.range(id..).take(limit);
        let mut ids: Vec<EntityId> = below.chain(above).map(|(k, _)| *k).collect();
        ids.sort_by_key(|k| (k.0.abs_diff(id.0), *k));
        ids.truncate(limit);
        ids
    }

    #[must_use]
    pub fn file(&self, id: FileId) -> Option<&FileRecord> {
        self.files.get(&id)
    }

    /// Look a file up by (non-canonical) path.
    #[must_use]
    pub fn file_by_path(&self, path: &str) -> Option<&FileRecord> {
        normalize_path(path).and_then(|p| self.files.get(&file_id(&p)))
    }

    /// All file records, the external stub owner included.
    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    /// Source files only (the external stub owner excluded).
    pub fn source_files(&self) -> impl Iterator<Item = &FileRecord> {
        let external = external_file_id();
        self.files.values().filter(move |f| f.file_id != external)
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.source_files().count()
    }

    /// Number of resolved `(source, kind, target)` edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(BTreeMap::len).sum()
    }

    /// Number of engine-created external stubs.
    #[must_use]
    pub fn stub_count(&self) -> usize {
        self.stubs.len()
    }

    #[must_use]
    pub fn text(&self, id: StrId) -> &str {
        self.pool.text(id)
    }

    #[must_use]
    pub fn name_of(&self, id: EntityId) -> Option<&str> {
        self.entity(id).map(|e| self.pool.text(e.name))
    }

    #[must_use]
    pub fn path_of(&self, file: FileId) -> Option<&str> {
        self.files.get(&file).map(|f| self.pool.text(f.path))
    }

    /// Entity presented with resolved strings.
    #[must_use]
    pub fn suggestion(&self, id: EntityId) -> Option<Suggestion> {
        let entity = self.entity(id)?;
        Some(Suggestion {
            id,
            name: self.pool.text(entity.name).to_string(),
            qualified_name: self.pool.text(entity.qualified_name).to_string(),
            kind: entity.kind.clone(),
            file: self.path_of(entity.file_id).unwrap_or_default().to_string(),
            line: entity.line_start,
        })
    }

    /// Edges the entity declared, in ingestion order.
    #[must_use]
    pub fn declared_edges(&self, id: EntityId) -> &[DeclaredEdge] {
        self.declared.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Resolved target of a declared edge.
    #[must_use]
    pub fn declared_target(&self, target: DeclaredTarget) -> Option<EntityId> {
        match target {
            DeclaredTarget::Local(id) => Some(id),
            DeclaredTarget::Symbol(symbol) => self.symbols.target(symbol),
        }
    }

    /// Outgoing neighbours of one kind, ascending by target id.
    pub fn successors(
        &self,
        id: EntityId,
        kind: EdgeKind,
    ) -> impl Iterator<Item = (EntityId, Confidence)> + '_ {
        self.forward
            .get(&(id, kind))
            .into_iter()
            .flat_map(|targets| targets.iter().map(|(t, c)| (*t, *c)))
    }

    /// Incoming neighbours of one kind, ascending by source id.
    pub fn predecessors(
        &self,
        id: EntityId,
        kind: EdgeKind,
    ) -> impl Iterator<Item = (EntityId, Confidence)> + '_ {
        self.reverse
            .get(&(id, kind))
            .into_iter()
            .flat_map(|sources| sources.iter().map(|(s, c)| (*s, *c)))
    }

    /// Outgoing edges of the given kinds, ordered by kind then target.
    #[must_use]
    pub fn forward_edges(&self, id: EntityId, kinds: EdgeKindSet) -> Vec<Edge> {
        kinds
            .iter()
            .flat_map(|kind| {
                self.successors(id, kind).map(move |(target, confidence)| Edge {
                    source: id,
                    target,
                    kind,
                    confidence,
                })
            })
            .collect()
    }

    /// Incoming edges of the given kinds, ordered by kind then source.
    #[must_use]
    pub fn reverse_edges(&self, id: EntityId, kinds: EdgeKindSet) -> Vec<Edge> {
        kinds
            .iter()
            .flat_map(|kind| {
                self.predecessors(id, kind).map(move |(source, confidence)| Edge {
                    source,
                    target: id,
                    kind,
                    confidence,
                })
            })
            .collect()
    }

    /// Every resolved edge, ordered by (source, kind, target).
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.forward.iter().flat_map(|((source, kind), targets)| {
            targets.iter().map(move |(target, confidence)| Edge {
                source: *source,
                target: *target,
                kind: *kind,
                confidence: *confidence,
            })
        })
    }

    /// Verify the structural invariants; returns the first violation.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (id, entity) in &self.entities {
            let Some(file) = self.files.get(&entity.file_id) else {
                return Err(format!("entity {} references missing file", id));
            };
            if !file.entity_ids.contains(id) {
                return Err(format!("file record does not list entity {}", id));
            }
            if self.pool.resolve(entity.name).is_none()
                || self.pool.resolve(entity.qualified_name).is_none()
            {
                return Err(format!("entity {} has a dead string", id));
            }
        }
        for (fid, file) in &self.files {
            for id in &file.entity_ids {
                match self.entities.get(id) {
                    Some(entity) if entity.file_id == *fid => {}
                    _ => return Err(format!("file lists foreign or missing entity {}", id)),
                }
            }
        }
        for ((source, kind), targets) in &self.forward {
            if !self.entities.contains_key(source) {
                return Err(format!("dangling edge source {}", source));
            }
            for (target, confidence) in targets {
                if !self.entities.contains_key(target) {
                    return Err(format!("dangling edge target {}", target));
                }
                let mirrored = self
                    .reverse
                    .get(&(*target, *kind))
                    .and_then(|s| s.get(source));
                if mirrored != Some(confidence) {
                    return Err(format!("reverse index missing {} -> {}", source, target));
                }
            }
        }
        for ((target, kind), sources) in &self.reverse {
            for source in sources.keys() {
                let present = self
                    .forward
                    .get(&(*source, *kind))
                    .is_some_and(|t| t.contains_key(target));
                if !present {
                    return Err(format!("stale reverse edge {} -> {}", source, target));
                }
            }
        }
        for (symbol, binding) in self.symbols.bindings() {
            match binding.target {
                Some(target) if self.entities.contains_key(&target) => {}
                _ => {
                    return Err(format!(
                        "symbol '{}' is not bound to a live entity",
                        self.pool.text(symbol)
                    ));
                }
            }
        }
        for (stub, symbol) in &self.stubs {
            if self.symbols.target(*symbol) != Some(*stub) {
                return Err(format!("stub {} is not referenced", stub));
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Attach / detach
    // -------------------------------------------------------------------------

    fn open_file(&mut self, canonical_path: &str, checksum: Checksum) -> FileId {
        let id = file_id(canonical_path);
        if let Some(record) = self.files.get_mut(&id) {
            record.checksum = checksum;
            return id;
        }
        let path = self.pool.intern(canonical_path);
        self.files.insert(
            id,
            FileRecord {
                file_id: id,
                path,
                checksum,
                entity_ids: BTreeSet::new(),
            },
        );
        id
    }

    fn close_file(&mut self, file: FileId) {
        if let Some(record) = self.files.remove(&file) {
            self.pool.release(record.path);
        }
    }

    fn attach_entity(
        &mut self,
        file: FileId,
        record: &EntityRecord,
        delta: &mut GraphDelta,
        dirty: &mut Dirty,
    ) -> Result<(), IsgError> {
        if self.entities.contains_key(&record.id) {
            return Err(IsgError::MalformedRecord {
                file: self.path_of(file).unwrap_or_default().to_string(),
                line: record.line_start,
                reason: format!("entity id {} already present", record.id),
            });
        }
        let entity = Entity {
            id: record.id,
            kind: record.kind.clone(),
            name: self.pool.intern(&record.name),
            qualified_name: self.pool.intern(&record.qualified_name),
            file_id: file,
            line_start: record.line_start,
            line_end: record.line_end,
            visibility: record.visibility,
            signature_hash: record.signature_hash,
        };
        if !entity.kind.is_external_stub() {
            self.symbols.define(&entity);
        }
        dirty.symbols.insert(entity.name);
        dirty.symbols.insert(entity.qualified_name);
        if let Some(owner) = self.files.get_mut(&file) {
            owner.entity_ids.insert(entity.id);
        }
        delta.touch(entity.id, false);
        self.entities.insert(entity.id, entity);
        Ok(())
    }

    fn attach_edge(&mut self, record: &EdgeRecord, dirty: &mut Dirty) -> Result<(), IsgError> {
        let Some(source) = self.entities.get(&record.source) else {
            return Err(IsgError::MalformedRecord {
                file: String::new(),
                line: 0,
                reason: format!("edge source {} does not exist", record.source),
            });
        };
        let source_file = source.file_id;
        let target = match &record.target {
            EdgeTarget::Local(id) => {
                let same_file = self
                    .entities
                    .get(id)
                    .is_some_and(|t| t.file_id == source_file);
                if !same_file {
                    return Err(IsgError::MalformedRecord {
                        file: self.path_of(source_file).unwrap_or_default().to_string(),
                        line: 0,
                        reason: format!("local edge target {} is not in the source file", id),
                    });
                }
                DeclaredTarget::Local(*id)
            }
            EdgeTarget::Symbol(text) => {
                let symbol = self.pool.intern(text);
                self.symbols.add_user(symbol, record.source);
                dirty.symbols.insert(symbol);
                DeclaredTarget::Symbol(symbol)
            }
        };
        self.declared
            .entry(record.source)
            .or_default()
            .push(DeclaredEdge {
                target,
                kind: record.kind,
                confidence: record.confidence,
            });
        dirty.sources.insert(record.source);
        Ok(())
    }

    fn detach_file(&mut self, file: FileId, delta: &mut GraphDelta, dirty: &mut Dirty) {
        if file == external_file_id() {
            return;
        }
        let Some(record) = self.files.get(&file) else {
            return;
        };
        let owned: Vec<EntityId> = record.entity_ids.iter().copied().collect();
        for id in owned {
            self.detach_entity(id, delta, dirty);
        }
        self.close_file(file);
    }

    fn detach_entity(&mut self, id: EntityId, delta: &mut GraphDelta, dirty: &mut Dirty) {
        let Some(entity) = self.entities.remove(&id) else {
            return;
        };
        delta.touch(id, true);
        if !entity.kind.is_external_stub() {
            self.symbols.undefine(&entity);
        }
        dirty.symbols.insert(entity.name);
        dirty.symbols.insert(entity.qualified_name);
        self.pool.release(entity.name);
        self.pool.release(entity.qualified_name);
        if let Some(owner) = self.files.get_mut(&entity.file_id) {
            owner.entity_ids.remove(&id);
        }
        for edge in self.declared.remove(&id).unwrap_or_default() {
            if let DeclaredTarget::Symbol(symbol) = edge.target {
                self.drop_user(symbol, id, dirty);
                self.pool.release(symbol);
            }
        }
        dirty.sources.insert(id);
    }

    fn drop_user(&mut self, symbol: StrId, user: EntityId, dirty: &mut Dirty) {
        if let Some(binding) = self.symbols.remove_user(symbol, user) {
            if let Some(target) = binding.target {
                if self.stubs.get(&target) == Some(&symbol) {
                    self.stubs.remove(&target);
                    dirty.orphan_stubs.insert(target);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Linking
    // -------------------------------------------------------------------------

    fn relink(&mut self, mut dirty: Dirty, delta: &mut GraphDelta) {
        let symbols = std::mem::take(&mut dirty.symbols);
        for symbol in symbols {
            let Some(binding) = self.symbols.binding(symbol) else {
                continue;
            };
            let current = binding.target;
            let resolved = self.symbols.resolve(symbol);
            let next = resolved.unwrap_or_else(|| stub_id(self.pool.text(symbol)));
            if current == Some(next) {
                continue;
            }
            if let Some(old) = current {
                if self.stubs.get(&old) == Some(&symbol) {
                    self.stubs.remove(&old);
                    dirty.orphan_stubs.insert(old);
                }
            }
            if resolved.is_none() {
                self.ensure_stub(symbol, next, delta);
            }
            self.symbols.set_target(symbol, next);
            if let Some(binding) = self.symbols.binding(symbol) {
                dirty.sources.extend(binding.users.iter().copied());
            }
        }

        for stub in std::mem::take(&mut dirty.orphan_stubs) {
            if !self.stubs.contains_key(&stub) {
                self.remove_stub(stub, delta);
            }
        }

        for source in std::mem::take(&mut dirty.sources) {
            self.materialize(source);
        }
    }

    fn ensure_stub(&mut self, symbol: StrId, id: EntityId, delta: &mut GraphDelta) {
        self.stubs.insert(id, symbol);
        if self.entities.contains_key(&id) {
            return;
        }
        let external = self.open_file(EXTERNAL_FILE_PATH, Checksum::default());
        let text = self.pool.text(symbol).to_string();
        let simple = text
            .rsplit(|c: char| c == ':' || c == '.' || c == '/')
            .find(|part| !part.is_empty())
            .unwrap_or(text.as_str())
            .to_string();
        let entity = Entity {
            id,
            kind: EntityKind::ExternalStub,
            name: self.pool.intern(&simple),
            qualified_name: self.pool.intern(&text),
            file_id: external,
            line_start: 0,
            line_end: 0,
            visibility: Visibility::Public,
            signature_hash: 0,
        };
        if let Some(owner) = self.files.get_mut(&external) {
            owner.entity_ids.insert(id);
        }
        delta.touch(id, false);
        self.entities.insert(id, entity);
    }

    fn remove_stub(&mut self, id: EntityId, delta: &mut GraphDelta) {
        let Some(entity) = self.entities.remove(&id) else {
            return;
        };
        delta.touch(id, true);
        self.pool.release(entity.name);
        self.pool.release(entity.qualified_name);
        let external = external_file_id();
        let now_empty = match self.files.get_mut(&external) {
            Some(owner) => {
                owner.entity_ids.remove(&id);
                owner.entity_ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.close_file(external);
        }
    }

    /// Rebuild the resolved adjacency of one source from its declared edges.
    fn materialize(&mut self, source: EntityId) {
        for kind in EdgeKind::ALL {
            if let Some(targets) = self.forward.remove(&(source, kind)) {
                for target in targets.keys() {
                    if let Some(sources) = self.reverse.get_mut(&(*target, kind)) {
                        sources.remove(&source);
                        if sources.is_empty() {
                            self.reverse.remove(&(*target, kind));
                        }
                    }
                }
            }
        }
        if !self.entities.contains_key(&source) {
            return;
        }
        let Some(declared) = self.declared.get(&source) else {
            return;
        };
        for edge in declared {
            let target = match edge.target {
                DeclaredTarget::Local(id) => Some(id),
                DeclaredTarget::Symbol(symbol) => self.symbols.target(symbol),
            };
            let Some(target) = target.filter(|t| self.entities.contains_key(t)) else {
                continue;
            };
            let confidence = *self
                .forward
                .entry((source, edge.kind))
                .or_default()
                .entry(target)
                .and_modify(|c| *c = (*c).max(edge.confidence))
                .or_insert(edge.confidence);
            self.reverse
                .entry((target, edge.kind))
                .or_default()
                .insert(source, confidence);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
