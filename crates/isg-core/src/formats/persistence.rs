//! # Snapshot Format
//!
//! Binary export/import of a graph, independent of any storage backend.
//!
//! Layout:
//! - 4 bytes: magic (`ISGS`)
//! - 2 bytes: schema version (u16 LE)
//! - 4 bytes: header length (u32 LE)
//! - postcard [`SnapshotHeader`]
//! - postcard [`CanonicalGraph`]
//!
//! The payload is the graph's canonical content with every string resolved
//! and every collection sorted, so the bytes depend only on what the graph
//! holds and not on interning order. The string pool, symbol bindings and
//! discovery index are rebuilt on import; the stored resolved edges are then
//! compared with the rebuilt ones.
//!
//! ## Validation order
//!
//! Size limit, magic, schema version, header, payload checksum, then
//! payload decoding. Nothing is deserialized before the checksum matches.

use crate::graph::{DeclaredTarget, Graph, external_file_id};
use crate::primitives::{SCHEMA_VERSION, SNAPSHOT_MAGIC, SNAPSHOT_PREFIX_LEN};
use crate::signature::{EdgeRecord, EdgeTarget, EntityRecord, FileContribution, file_id};
use crate::types::{
    Checksum, Confidence, Edge, EdgeKind, EntityId, EntityKind, IsgError, Visibility,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const HEADER_LEN_BYTES: usize = 4;

// =============================================================================
// CANONICAL CONTENT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalFile {
    pub path: String,
    pub checksum: Checksum,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub qualified_name: String,
    pub path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub visibility: Visibility,
    pub signature_hash: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanonicalTarget {
    Local(EntityId),
    Symbol(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalDeclared {
    pub source: EntityId,
    pub target: CanonicalTarget,
    pub kind: EdgeKind,
    pub confidence: Confidence,
}

/// Graph content with strings resolved; engine-created stubs are omitted
/// because they are derived from the declared edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalGraph {
    /// Ascending by path.
    pub files: Vec<CanonicalFile>,
    /// Ascending by id.
    pub entities: Vec<CanonicalEntity>,
    /// Ascending by source, each source's edges in declaration order.
    pub declared: Vec<CanonicalDeclared>,
    /// Resolved edges, ascending by (source, kind, target).
    pub edges: Vec<Edge>,
}

impl CanonicalGraph {
    #[must_use]
    pub fn from_graph(graph: &Graph) -> Self {
        let external = external_file_id();
        let mut files: Vec<CanonicalFile> = graph
            .source_files()
            .map(|f| CanonicalFile {
                path: graph.text(f.path).to_string(),
                checksum: f.checksum,
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut entities = Vec::new();
        let mut declared = Vec::new();
        for entity in graph.entities().filter(|e| e.file_id != external) {
            entities.push(CanonicalEntity {
                id: entity.id,
                kind: entity.kind.clone(),
                name: graph.text(entity.name).to_string(),
                qualified_name: graph.text(entity.qualified_name).to_string(),
                path: graph.path_of(entity.file_id).unwrap_or_default().to_string(),
                line_start: entity.line_start,
                line_end: entity.line_end,
                visibility: entity.visibility,
                signature_hash: entity.signature_hash,
            });
            for edge in graph.declared_edges(entity.id) {
                let target = match edge.target {
                    DeclaredTarget::Local(id) => CanonicalTarget::Local(id),
                    DeclaredTarget::Symbol(symbol) => {
                        CanonicalTarget::Symbol(graph.text(symbol).to_string())
                    }
                };
                declared.push(CanonicalDeclared {
                    source: entity.id,
                    target,
                    kind: edge.kind,
                    confidence: edge.confidence,
                });
            }
        }

        Self {
            files,
            entities,
            declared,
            edges: graph.edges().collect(),
        }
    }

    /// Rebuild a graph and check it reproduces the stored resolved edges.
    pub fn into_graph(self) -> Result<Graph, IsgError> {
        let mut by_path: BTreeMap<String, FileContribution> = BTreeMap::new();
        for file in &self.files {
            by_path.insert(
                file.path.clone(),
                FileContribution {
                    path: file.path.clone(),
                    file_id: file_id(&file.path),
                    checksum: file.checksum,
                    entities: Vec::new(),
                    edges: Vec::new(),
                },
            );
        }

        let mut owner: BTreeMap<EntityId, String> = BTreeMap::new();
        for entity in self.entities {
            let Some(contribution) = by_path.get_mut(&entity.path) else {
                return Err(corrupt(format!(
                    "entity {} references unknown file '{}'",
                    entity.id, entity.path
                )));
            };
            owner.insert(entity.id, entity.path.clone());
            contribution.entities.push(EntityRecord {
                id: entity.id,
                kind: entity.kind,
                name: entity.name,
                qualified_name: entity.qualified_name,
                line_start: entity.line_start,
                line_end: entity.line_end,
                visibility: entity.visibility,
                signature_hash: entity.signature_hash,
            });
        }

        for edge in self.declared {
            let Some(contribution) = owner.get(&edge.source).and_then(|p| by_path.get_mut(p))
            else {
                return Err(corrupt(format!("edge source {} is unknown", edge.source)));
            };
            contribution.edges.push(EdgeRecord {
                source: edge.source,
                target: match edge.target {
                    CanonicalTarget::Local(id) => EdgeTarget::Local(id),
                    CanonicalTarget::Symbol(text) => EdgeTarget::Symbol(text),
                },
                kind: edge.kind,
                confidence: edge.confidence,
            });
        }

        let contributions: Vec<FileContribution> = by_path.into_values().collect();
        let mut graph = Graph::new();
        let outcome = graph.apply_batch(&BTreeSet::new(), &contributions);
        if let Some(warning) = outcome.warnings.first() {
            return Err(corrupt(format!("snapshot content rejected: {}", warning)));
        }
        let rebuilt: Vec<Edge> = graph.edges().collect();
        if rebuilt != self.edges {
            return Err(corrupt(format!(
                "resolved edges differ after rebuild ({} stored, {} derived)",
                self.edges.len(),
                rebuilt.len()
            )));
        }
        Ok(graph)
    }
}

// =============================================================================
// HEADER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub files: u64,
    pub entities: u64,
    pub declared_edges: u64,
    pub edges: u64,
    /// BLAKE3 of the encoded `CanonicalGraph`.
    pub checksum: [u8; 32],
}

impl SnapshotHeader {
    fn describe(content: &CanonicalGraph, payload: &[u8]) -> Self {
        Self {
            files: content.files.len() as u64,
            entities: content.entities.len() as u64,
            declared_edges: content.declared.len() as u64,
            edges: content.edges.len() as u64,
            checksum: *blake3::hash(payload).as_bytes(),
        }
    }

    fn check_counts(&self, content: &CanonicalGraph) -> Result<(), IsgError> {
        let actual = SnapshotHeader {
            checksum: self.checksum,
            ..Self::describe(content, &[])
        };
        if &actual != self {
            return Err(corrupt(format!(
                "header counts {:?} do not match payload {:?}",
                (self.files, self.entities, self.declared_edges, self.edges),
                (actual.files, actual.entities, actual.declared_edges, actual.edges)
            )));
        }
        Ok(())
    }
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Serialize a graph. Pure function of the graph content.
pub fn export_snapshot(graph: &Graph) -> Result<Vec<u8>, IsgError> {
    let content = CanonicalGraph::from_graph(graph);
    let payload = postcard::to_stdvec(&content)
        .map_err(|e| IsgError::SerializationError(e.to_string()))?;
    let header = postcard::to_stdvec(&SnapshotHeader::describe(&content, &payload))
        .map_err(|e| IsgError::SerializationError(e.to_string()))?;
    let header_len = u32::try_from(header.len())
        .map_err(|_| IsgError::SerializationError("snapshot header too large".to_string()))?;

    let mut bytes =
        Vec::with_capacity(SNAPSHOT_PREFIX_LEN + HEADER_LEN_BYTES + header.len() + payload.len());
    bytes.extend_from_slice(SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    bytes.extend_from_slice(&header_len.to_le_bytes());
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Schema version of a snapshot, after checking the magic.
pub fn peek_schema_version(bytes: &[u8]) -> Result<u16, IsgError> {
    let (magic, rest) = bytes
        .split_first_chunk::<4>()
        .ok_or_else(|| corrupt("snapshot too short".to_string()))?;
    if magic != SNAPSHOT_MAGIC {
        return Err(corrupt("invalid magic bytes".to_string()));
    }
    let (version, _) = rest
        .split_first_chunk::<2>()
        .ok_or_else(|| corrupt("snapshot too short".to_string()))?;
    Ok(u16::from_le_bytes(*version))
}

/// Decode a snapshot into a graph.
///
/// `max_bytes` is checked before anything is parsed.
pub fn import_snapshot(bytes: &[u8], max_bytes: u64) -> Result<Graph, IsgError> {
    if bytes.len() as u64 > max_bytes {
        return Err(corrupt(format!(
            "snapshot of {} bytes exceeds limit of {} bytes",
            bytes.len(),
            max_bytes
        )));
    }
    let found = peek_schema_version(bytes)?;
    if found != SCHEMA_VERSION {
        return Err(IsgError::SchemaMismatch {
            found,
            expected: SCHEMA_VERSION,
        });
    }

    let rest = &bytes[SNAPSHOT_PREFIX_LEN..];
    let (len, rest) = rest
        .split_first_chunk::<HEADER_LEN_BYTES>()
        .ok_or_else(|| corrupt("missing header length".to_string()))?;
    let header_len = u32::from_le_bytes(*len) as usize;
    if header_len > rest.len() {
        return Err(corrupt("header length exceeds snapshot size".to_string()));
    }
    let (header_bytes, payload) = rest.split_at(header_len);
    let header: SnapshotHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| corrupt(format!("failed to decode header: {}", e)))?;
    if blake3::hash(payload).as_bytes() != &header.checksum {
        return Err(corrupt("payload checksum mismatch".to_string()));
    }

    let content: CanonicalGraph = postcard::from_bytes(payload)
        .map_err(|e| corrupt(format!("failed to decode graph: {}", e)))?;
    header.check_counts(&content)?;
    let graph = content.into_graph()?;
    tracing::debug!(
        files = header.files,
        entities = header.entities,
        edges = header.edges,
        "snapshot imported"
    );
    Ok(graph)
}

/// BLAKE3 of the canonical payload: equal for graphs with equal content.
pub fn canonical_checksum(graph: &Graph) -> Result<[u8; 32], IsgError> {
    let payload = postcard::to_stdvec(&CanonicalGraph::from_graph(graph))
        .map_err(|e| IsgError::SerializationError(e.to_string()))?;
    Ok(*blake3::hash(&payload).as_bytes())
}

fn corrupt(reason: String) -> IsgError {
    IsgError::SerializationError(reason)
}

// =============================================================================
// TESTS
// =============================================================================
