//! # Signature Model
//!
//! Normalizes raw extractor output for one file into canonical records with
//! stable ids.
//!
//! ## Identity
//!
//! - `signature_hash` = BLAKE3 of the whitespace-normalized signature text
//! - `EntityId` = BLAKE3 over (canonical path, qualified name, kind tag, signature hash)
//! - `FileId` = BLAKE3 of the canonical path
//!
//! All hashes are truncated to 64 bits. Ids therefore survive re-ingestion of
//! unchanged content and change whenever the defining file, qualified name,
//! kind or normalized signature changes.
//!
//! ## Partial Success
//!
//! A malformed descriptor is rejected on its own with a `MalformedRecord`
//! tagged with file and line; the remaining descriptors of the file are kept.
//! Relationship targets that do not name an entity of the same file are left
//! as symbols for the graph store to bind globally (or to an external stub).

use crate::config::IngestConfig;
use crate::primitives::{MAX_NAME_LENGTH, MAX_PATH_LENGTH, MAX_SIGNATURE_LENGTH};
use crate::types::{Checksum, Confidence, EdgeKind, EntityId, EntityKind, FileId, IsgError, Visibility};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// HASHING
// =============================================================================

const ENTITY_DOMAIN: &[u8] = b"isg.entity.v1";
const STUB_DOMAIN: &[u8] = b"isg.stub.v1";
const FILE_DOMAIN: &[u8] = b"isg.file.v1";
const SIGNATURE_DOMAIN: &[u8] = b"isg.signature.v1";

/// BLAKE3 over length-prefixed parts, truncated to 64 bits.
#[must_use]
pub fn hash64(parts: &[&[u8]]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// Collapse whitespace runs to a single space and trim the ends.
#[must_use]
pub fn normalize_signature(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hash of the normalized signature text.
#[must_use]
pub fn signature_hash(raw: &str) -> u64 {
    hash64(&[SIGNATURE_DOMAIN, normalize_signature(raw).as_bytes()])
}

#[must_use]
pub fn entity_id(path: &str, qualified_name: &str, kind: &EntityKind, sig_hash: u64) -> EntityId {
    EntityId(hash64(&[
        ENTITY_DOMAIN,
        path.as_bytes(),
        qualified_name.as_bytes(),
        kind.as_tag().as_bytes(),
        &sig_hash.to_le_bytes(),
    ]))
}

/// Id of the external stub standing in for an unresolved symbol.
#[must_use]
pub fn stub_id(symbol: &str) -> EntityId {
    EntityId(hash64(&[STUB_DOMAIN, symbol.as_bytes()]))
}

#[must_use]
pub fn file_id(canonical_path: &str) -> FileId {
    FileId(hash64(&[FILE_DOMAIN, canonical_path.as_bytes()]))
}

/// Canonicalize a relative source path.
///
/// Backslashes become `/`, empty and `.` segments are dropped and `..` pops
/// the previous segment. Returns `None` for paths that are empty afterwards,
/// too long, or that start with `<` (reserved for engine-owned records).
#[must_use]
pub fn normalize_path(raw: &str) -> Option<String> {
    let unified = raw.trim().replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if joined.is_empty() || joined.starts_with('<') || joined.len() > MAX_PATH_LENGTH {
        return None;
    }
    Some(joined)
}

// =============================================================================
// RAW EXTRACTOR INPUT
// =============================================================================

/// A raw entity descriptor as emitted by the extractor.
///
/// Every field is optional on the wire so that a missing field rejects only
/// this record rather than the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RawEntity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub qualified_name: Option<String>,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub line_start: u32,
    #[serde(default)]
    pub line_end: Option<u32>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl RawEntity {
    /// Convenience constructor for a descriptor with name, kind and line.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>, line: u32) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            line_start: line,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn qualified(mut self, qualified_name: impl Into<String>) -> Self {
        self.qualified_name = Some(qualified_name.into());
        self
    }

    #[must_use]
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    #[must_use]
    pub fn visibility(mut self, visibility: impl Into<String>) -> Self {
        self.visibility = Some(visibility.into());
        self
    }

    #[must_use]
    pub fn lines(mut self, start: u32, end: u32) -> Self {
        self.line_start = start;
        self.line_end = Some(end);
        self
    }
}

fn default_confidence() -> f64 {
    1.0
}

/// A raw relationship descriptor: names, not ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRelationship {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub line: u32,
}

impl RawRelationship {
    #[must_use]
    pub fn new(source: impl Into<String>, kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: kind.into(),
            confidence: 1.0,
            line: 0,
        }
    }

    #[must_use]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }
}

/// Everything the extractor produced for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBatch {
    pub path: String,
    #[serde(default)]
    pub checksum: Checksum,
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    #[serde(default)]
    pub relationships: Vec<RawRelationship>,
}

impl FileBatch {
    #[must_use]
    pub fn new(path: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            path: path.into(),
            checksum,
            entities: Vec::new(),
            relationships: Vec::new(),
        }
    }

    #[must_use]
    pub fn entity(mut self, entity: RawEntity) -> Self {
        self.entities.push(entity);
        self
    }

    #[must_use]
    pub fn relationship(mut self, relationship: RawRelationship) -> Self {
        self.relationships.push(relationship);
        self
    }
}

/// Extractor outcome for one file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileUpdate {
    Parsed(FileBatch),
    Failed { path: String, reason: String },
}

impl FileUpdate {
    /// Path as given by the extractor (not yet canonical).
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Parsed(batch) => &batch.path,
            Self::Failed { path, .. } => path,
        }
    }
}

impl From<FileBatch> for FileUpdate {
    fn from(batch: FileBatch) -> Self {
        Self::Parsed(batch)
    }
}

// =============================================================================
// CANONICAL RECORDS
// =============================================================================

/// A validated entity with its id computed; strings not yet interned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub qualified_name: String,
    pub line_start: u32,
    pub line_end: u32,
    pub visibility: Visibility,
    pub signature_hash: u64,
}

/// Target of a declared edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeTarget {
    /// An entity defined in the same file.
    Local(EntityId),
    /// A name bound globally by the graph store.
    Symbol(String),
}

/// A validated relationship whose source is an entity of the same file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
    pub source: EntityId,
    pub target: EdgeTarget,
    pub kind: EdgeKind,
    pub confidence: Confidence,
}

/// The canonical contribution of one file to the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContribution {
    pub path: String,
    pub file_id: FileId,
    pub checksum: Checksum,
    pub entities: Vec<EntityRecord>,
    pub edges: Vec<EdgeRecord>,
}

/// Output of [`SignatureModel::normalize`]: records plus per-record warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub contribution: FileContribution,
    pub warnings: Vec<IsgError>,
}

// =============================================================================
// SIGNATURE MODEL
// =============================================================================

/// Lookup of a file's own entities by qualified name and by simple name.
#[derive(Default)]
struct LocalNames {
    qualified: BTreeMap<String, BTreeSet<EntityId>>,
    simple: BTreeMap<String, BTreeSet<EntityId>>,
}

enum LocalMatch {
    One(EntityId),
    Ambiguous,
    Missing,
}

impl LocalNames {
    fn add(&mut self, record: &EntityRecord) {
        self.qualified
            .entry(record.qualified_name.clone())
            .or_default()
            .insert(record.id);
        self.simple
            .entry(record.name.clone())
            .or_default()
            .insert(record.id);
    }

    /// Qualified name first (lowest id wins), then a unique simple name.
    fn find(&self, text: &str) -> LocalMatch {
        if let Some(id) = self.qualified.get(text).and_then(|ids| ids.first()) {
            return LocalMatch::One(*id);
        }
        match self.simple.get(text) {
            Some(ids) if ids.len() == 1 => ids.first().map_or(LocalMatch::Missing, |id| LocalMatch::One(*id)),
            Some(ids) if ids.len() > 1 => LocalMatch::Ambiguous,
            _ => LocalMatch::Missing,
        }
    }
}

/// Stateless normalizer from raw extractor output to canonical records.
pub struct SignatureModel;

impl SignatureModel {
    /// Normalize one file batch.
    ///
    /// Returns `Err` only when the file as a whole is unusable (invalid path).
    pub fn normalize(batch: &FileBatch, limits: &IngestConfig) -> Result<Normalized, IsgError> {
        let path = normalize_path(&batch.path).ok_or_else(|| IsgError::MalformedRecord {
            file: batch.path.clone(),
            line: 0,
            reason: "invalid file path".to_string(),
        })?;
        let file = file_id(&path);
        let mut warnings = Vec::new();

        let mut entities: Vec<EntityRecord> = Vec::with_capacity(batch.entities.len());
        let mut seen: BTreeSet<EntityId> = BTreeSet::new();
        let mut names = LocalNames::default();

        for (index, raw) in batch.entities.iter().enumerate() {
            if index >= limits.max_entities_per_file {
                warnings.push(malformed(
                    &path,
                    raw.line_start,
                    format!(
                        "entity limit {} exceeded; {} descriptors skipped",
                        limits.max_entities_per_file,
                        batch.entities.len() - index
                    ),
                ));
                break;
            }
            match Self::entity_record(&path, raw) {
                Ok(record) => {
                    if !seen.insert(record.id) {
                        warnings.push(malformed(
                            &path,
                            raw.line_start,
                            format!("duplicate entity '{}'", record.qualified_name),
                        ));
                        continue;
                    }
                    names.add(&record);
                    entities.push(record);
                }
                Err(reason) => warnings.push(malformed(&path, raw.line_start, reason)),
            }
        }

        let mut edges = Vec::with_capacity(batch.relationships.len());
        for (index, raw) in batch.relationships.iter().enumerate() {
            if index >= limits.max_relationships_per_file {
                warnings.push(malformed(
                    &path,
                    raw.line,
                    format!(
                        "relationship limit {} exceeded; {} descriptors skipped",
                        limits.max_relationships_per_file,
                        batch.relationships.len() - index
                    ),
                ));
                break;
            }
            match Self::edge_record(&names, raw) {
                Ok(edge) => edges.push(edge),
                Err(reason) => warnings.push(malformed(&path, raw.line, reason)),
            }
        }

        for warning in &warnings {
            tracing::warn!(%warning, "record rejected");
        }

        Ok(Normalized {
            contribution: FileContribution {
                path,
                file_id: file,
                checksum: batch.checksum,
                entities,
                edges,
            },
            warnings,
        })
    }

    fn entity_record(path: &str, raw: &RawEntity) -> Result<EntityRecord, String> {
        let name = raw.name.trim();
        if name.is_empty() {
            return Err("missing entity name".to_string());
        }
        if raw.kind.trim().is_empty() {
            return Err(format!("missing kind for entity '{}'", name));
        }
        if raw.line_start == 0 {
            return Err(format!("missing line for entity '{}'", name));
        }
        let line_end = raw.line_end.unwrap_or(raw.line_start);
        if line_end < raw.line_start {
            return Err(format!(
                "entity '{}' ends at line {} before it starts",
                name, line_end
            ));
        }
        let qualified_name = raw
            .qualified_name
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(name);
        if name.len() > MAX_NAME_LENGTH || qualified_name.len() > MAX_NAME_LENGTH {
            return Err(format!("name exceeds {} bytes", MAX_NAME_LENGTH));
        }
        let signature = raw.signature.as_deref().unwrap_or("");
        if signature.len() > MAX_SIGNATURE_LENGTH {
            return Err(format!("signature exceeds {} bytes", MAX_SIGNATURE_LENGTH));
        }

        let kind = EntityKind::from_tag(&raw.kind);
        let sig_hash = signature_hash(signature);
        Ok(EntityRecord {
            id: entity_id(path, qualified_name, &kind, sig_hash),
            kind,
            name: name.to_string(),
            qualified_name: qualified_name.to_string(),
            line_start: raw.line_start,
            line_end,
            visibility: raw
                .visibility
                .as_deref()
                .map(Visibility::from_tag)
                .unwrap_or_default(),
            signature_hash: sig_hash,
        })
    }

    fn edge_record(names: &LocalNames, raw: &RawRelationship) -> Result<EdgeRecord, String> {
        let source = raw.source.trim();
        let target = raw.target.trim();
        if source.is_empty() {
            return Err("missing relationship source".to_string());
        }
        if target.is_empty() {
            return Err(format!("missing relationship target for '{}'", source));
        }
        if target.len() > MAX_NAME_LENGTH {
            return Err(format!("target exceeds {} bytes", MAX_NAME_LENGTH));
        }
        let kind = EdgeKind::from_tag(&raw.kind)
            .ok_or_else(|| format!("unknown relationship kind '{}'", raw.kind))?;
        let confidence = Confidence::from_f64(raw.confidence)
            .ok_or_else(|| format!("confidence {} outside 0.0..=1.0", raw.confidence))?;
        let source = match names.find(source) {
            LocalMatch::One(id) => id,
            LocalMatch::Ambiguous => {
                return Err(format!("ambiguous relationship source '{}'", source));
            }
            LocalMatch::Missing => {
                return Err(format!("relationship source '{}' is not defined in this file", source));
            }
        };
        let target = match names.find(target) {
            LocalMatch::One(id) => EdgeTarget::Local(id),
            LocalMatch::Ambiguous | LocalMatch::Missing => EdgeTarget::Symbol(target.to_string()),
        };
        Ok(EdgeRecord {
            source,
            target,
            kind,
            confidence,
        })
    }
}

fn malformed(file: &str, line: u32, reason: String) -> IsgError {
    IsgError::MalformedRecord {
        file: file.to_string(),
        line,
        reason,
    }
}

// =============================================================================
// TESTS
// =============================================================================
