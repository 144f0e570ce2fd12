//! # Core Type Definitions
//!
//! This module contains the data model of the Interface Signature Graph:
//! - Identifiers (`EntityId`, `FileId`, `StrId`, `Checksum`)
//! - Closed tag sets (`EntityKind`, `EdgeKind`, `Visibility`)
//! - Fixed-point edge confidence (`Confidence`)
//! - Stored records (`Entity`, `FileRecord`) and resolved edges (`Edge`)
//! - Error types (`IsgError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Keep graph state free of floating point (confidence is basis points)

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable identifier of an entity, derived from its content signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = IsgError;

    /// Parses the 16-digit hex form produced by `Display` (an `0x` prefix is accepted).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() || digits.len() > 16 {
            return Err(IsgError::SerializationError(format!(
                "invalid entity id '{}'",
                s
            )));
        }
        u64::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|e| IsgError::SerializationError(format!("invalid entity id '{}': {}", s, e)))
    }
}

/// Identifier of a source file, derived from its canonical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub u64);

/// Offset of an interned string in the [`StringPool`](crate::pool::StringPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StrId(pub u32);

/// Content checksum of a source file as reported by the extractor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Checksum(pub u64);

impl Checksum {
    /// Compute a checksum from raw bytes (BLAKE3, truncated to 64 bits).
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(crate::signature::hash64(&[bytes]))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// =============================================================================
// ENTITY KIND
// =============================================================================

/// Kind of a code entity.
///
/// Closed set of understood kinds plus an explicit fallback for tags the
/// extractor emits that the engine does not know.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Function,
    Type,
    Trait,
    Module,
    Constant,
    MacroStub,
    ExternalStub,
    Unknown(String),
}

impl EntityKind {
    /// Parse an extractor tag (case-insensitive).
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        let lowered = tag.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "function" | "fn" | "method" | "func" => Self::Function,
            "type" | "struct" | "enum" | "union" | "class" | "type_alias" | "typealias" => {
                Self::Type
            }
            "trait" | "interface" | "protocol" => Self::Trait,
            "module" | "mod" | "namespace" | "package" => Self::Module,
            "constant" | "const" | "static" => Self::Constant,
            "macro" | "macro_stub" | "macro-stub" | "macro-expansion-stub" => Self::MacroStub,
            "external" | "external_stub" | "external-stub" => Self::ExternalStub,
            _ => Self::Unknown(tag.trim().to_string()),
        }
    }

    /// Canonical tag, used in id derivation and output.
    #[must_use]
    pub fn as_tag(&self) -> &str {
        match self {
            Self::Function => "function",
            Self::Type => "type",
            Self::Trait => "trait",
            Self::Module => "module",
            Self::Constant => "constant",
            Self::MacroStub => "macro-stub",
            Self::ExternalStub => "external-stub",
            Self::Unknown(raw) => raw,
        }
    }

    #[must_use]
    pub fn is_external_stub(&self) -> bool {
        matches!(self, Self::ExternalStub)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(raw) => write!(f, "unknown({})", raw),
            other => f.write_str(other.as_tag()),
        }
    }
}

// =============================================================================
// EDGE KIND
// =============================================================================

/// Kind of a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Calls,
    Uses,
    Implements,
    Contains,
}

impl EdgeKind {
    /// All edge kinds in canonical order.
    pub const ALL: [Self; 4] = [Self::Calls, Self::Uses, Self::Implements, Self::Contains];

    /// Parse an extractor tag. Edge kinds are a closed set.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "calls" | "call" => Some(Self::Calls),
            "uses" | "use" | "references" => Some(Self::Uses),
            "implements" | "impl" => Some(Self::Implements),
            "contains" | "defines" => Some(Self::Contains),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::Uses => "uses",
            Self::Implements => "implements",
            Self::Contains => "contains",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Calls => 1,
            Self::Uses => 2,
            Self::Implements => 4,
            Self::Contains => 8,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of edge kinds used as a traversal filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeKindSet(u8);

impl EdgeKindSet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(0b1111);
    /// calls ∪ uses ∪ implements: the edges along which change propagates.
    pub const DEPENDENCY: Self = Self(0b0111);

    #[must_use]
    pub const fn only(kind: EdgeKind) -> Self {
        Self(kind.bit())
    }

    #[must_use]
    pub const fn with(self, kind: EdgeKind) -> Self {
        Self(self.0 | kind.bit())
    }

    #[must_use]
    pub const fn contains(self, kind: EdgeKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Kinds in the set, in canonical order.
    pub fn iter(self) -> impl Iterator<Item = EdgeKind> {
        EdgeKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl From<EdgeKind> for EdgeKindSet {
    fn from(kind: EdgeKind) -> Self {
        Self::only(kind)
    }
}

// =============================================================================
// VISIBILITY
// =============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Restricted,
    #[default]
    Private,
}

impl Visibility {
    /// Parse an extractor tag; anything unrecognized is treated as private.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "pub" | "public" | "export" | "exported" => Self::Public,
            "crate" | "pub(crate)" | "pub(super)" | "restricted" | "protected" | "internal"
            | "package" => Self::Restricted,
            _ => Self::Private,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Restricted => "restricted",
            Self::Private => "private",
        }
    }
}

// =============================================================================
// CONFIDENCE
// =============================================================================

/// Edge confidence in basis points (0 = no confidence, 10000 = certain).
///
/// Extractors report confidence as `0.0..=1.0`; it is converted once at the
/// boundary so that graph state and comparisons stay integer-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Confidence(u16);

impl Confidence {
    pub const SCALE: u16 = 10_000;
    pub const ZERO: Self = Self(0);
    pub const CERTAIN: Self = Self(Self::SCALE);

    /// Build from basis points, clamped to the scale.
    #[must_use]
    pub const fn from_basis_points(bp: u16) -> Self {
        if bp > Self::SCALE {
            Self(Self::SCALE)
        } else {
            Self(bp)
        }
    }

    /// Convert an extractor probability. `None` for NaN or out-of-range values.
    #[must_use]
    #[allow(clippy::float_arithmetic)]
    pub fn from_f64(value: f64) -> Option<Self> {
        if !(0.0..=1.0).contains(&value) {
            return None;
        }
        Some(Self((value * f64::from(Self::SCALE)).round() as u16))
    }

    #[must_use]
    #[allow(clippy::float_arithmetic)]
    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / f64::from(Self::SCALE)
    }

    #[must_use]
    pub const fn basis_points(self) -> u16 {
        self.0
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::CERTAIN
    }
}

// =============================================================================
// STORED RECORDS
// =============================================================================

/// A code entity as stored in the graph. All strings are interned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: StrId,
    pub qualified_name: StrId,
    pub file_id: FileId,
    pub line_start: u32,
    pub line_end: u32,
    pub visibility: Visibility,
    pub signature_hash: u64,
}

/// Provenance record for one analyzed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: FileId,
    pub path: StrId,
    pub checksum: Checksum,
    /// Exact inverse of `Entity::file_id` for this file.
    pub entity_ids: BTreeSet<EntityId>,
}

/// A resolved, aggregated edge between two live entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: EntityId,
    pub target: EntityId,
    pub kind: EdgeKind,
    pub confidence: Confidence,
}

/// An entity presented with its strings resolved, used for suggestions and
/// disambiguation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: EntityId,
    pub name: String,
    pub qualified_name: String,
    pub kind: EntityKind,
    pub file: String,
    pub line: u32,
}

impl fmt::Display for Suggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) at {}:{} [{}]",
            self.qualified_name, self.kind, self.file, self.line, self.id
        )
    }
}

fn join_suggestions(items: &[Suggestion]) -> String {
    if items.is_empty() {
        return "none".to_string();
    }
    items
        .iter()
        .map(|s| s.qualified_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors and warnings produced by the engine.
///
/// Per-record and per-file problems (`MalformedRecord`, `ReparseFailed`,
/// `DuplicateFile`) are collected as warnings in update reports; the rest
/// are returned as `Err` from the operation that hit them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IsgError {
    /// A descriptor from the extractor is missing a field or is invalid.
    #[error("Malformed record at {file}:{line}: {reason}")]
    MalformedRecord {
        file: String,
        line: u32,
        reason: String,
    },

    /// A query referenced an entity that does not exist.
    #[error("Entity not found: {query} (did you mean: {})", join_suggestions(.suggestions))]
    EntityNotFound {
        query: String,
        suggestions: Vec<Suggestion>,
    },

    /// A name matched several entities; the caller must pick one.
    #[error("Ambiguous name '{name}' matches: {}", join_suggestions(.candidates))]
    AmbiguousName {
        name: String,
        candidates: Vec<Suggestion>,
    },

    /// Re-parsing a file failed; its previous contribution was kept.
    #[error("Re-parse failed for {file}: {reason} (previous contribution kept)")]
    ReparseFailed { file: String, reason: String },

    /// The same file appeared more than once in a single update batch.
    #[error("Duplicate file in batch: {0}")]
    DuplicateFile(String),

    /// A stored snapshot was written with a different schema version.
    #[error("Snapshot schema mismatch: found {found}, expected {expected}")]
    SchemaMismatch { found: u16, expected: u16 },

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The snapshot store failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Configuration could not be parsed or is out of range.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl IsgError {
    /// Whether this error is a non-fatal warning attached to partial success.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::MalformedRecord { .. } | Self::ReparseFailed { .. } | Self::DuplicateFile(_)
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_display_parses_back() {
        let id = EntityId(0x00ab_cdef_0123_4567);
        let text = id.to_string();
        assert_eq!(text, "00abcdef01234567");
        assert_eq!(text.parse::<EntityId>().expect("parse"), id);
        assert_eq!("0xff".parse::<EntityId>().expect("parse"), EntityId(255));
        assert!("".parse::<EntityId>().is_err());
        assert!("not-hex".parse::<EntityId>().is_err());
    }

    #[test]
    fn kind_tags_are_case_insensitive_with_fallback() {
        assert_eq!(EntityKind::from_tag("FN"), EntityKind::Function);
        assert_eq!(EntityKind::from_tag("struct"), EntityKind::Type);
        assert_eq!(EntityKind::from_tag("Interface"), EntityKind::Trait);
        assert_eq!(
            EntityKind::from_tag("macro-expansion-stub"),
            EntityKind::MacroStub
        );
        assert_eq!(
            EntityKind::from_tag("lifetime"),
            EntityKind::Unknown("lifetime".to_string())
        );
        assert_eq!(EntityKind::Unknown("x".into()).to_string(), "unknown(x)");
    }

    #[test]
    fn edge_kind_set_membership() {
        let deps = EdgeKindSet::DEPENDENCY;
        assert!(deps.contains(EdgeKind::Calls));
        assert!(deps.contains(EdgeKind::Uses));
        assert!(deps.contains(EdgeKind::Implements));
        assert!(!deps.contains(EdgeKind::Contains));
        assert_eq!(EdgeKindSet::ALL.iter().count(), 4);
        assert_eq!(
            EdgeKindSet::EMPTY.with(EdgeKind::Contains).iter().collect::<Vec<_>>(),
            vec![EdgeKind::Contains]
        );
        assert_eq!(EdgeKind::from_tag("IMPL"), Some(EdgeKind::Implements));
        assert_eq!(EdgeKind::from_tag("inherits"), None);
    }

    #[test]
    fn confidence_boundaries() {
        assert_eq!(Confidence::from_f64(0.0), Some(Confidence::ZERO));
        assert_eq!(Confidence::from_f64(1.0), Some(Confidence::CERTAIN));
        assert_eq!(
            Confidence::from_f64(0.5).map(Confidence::basis_points),
            Some(5000)
        );
        assert_eq!(Confidence::from_f64(1.5), None);
        assert_eq!(Confidence::from_f64(-0.1), None);
        assert_eq!(Confidence::from_f64(f64::NAN), None);
        assert_eq!(Confidence::from_basis_points(20_000), Confidence::CERTAIN);
    }

    #[test]
    fn visibility_defaults_to_private() {
        assert_eq!(Visibility::from_tag("pub"), Visibility::Public);
        assert_eq!(Visibility::from_tag("pub(crate)"), Visibility::Restricted);
        assert_eq!(Visibility::from_tag("whatever"), Visibility::Private);
        assert_eq!(Visibility::default(), Visibility::Private);
    }

    #[test]
    fn warnings_are_classified() {
        let warn = IsgError::ReparseFailed {
            file: "a.rs".into(),
            reason: "syntax".into(),
        };
        assert!(warn.is_warning());
        let fatal = IsgError::SchemaMismatch {
            found: 1,
            expected: 2,
        };
        assert!(!fatal.is_warning());
    }

    #[test]
    fn not_found_message_lists_suggestions() {
        let err = IsgError::EntityNotFound {
            query: "fooo".into(),
            suggestions: vec![Suggestion {
                id: EntityId(1),
                name: "foo".into(),
                qualified_name: "crate::foo".into(),
                kind: EntityKind::Function,
                file: "a.rs".into(),
                line: 1,
            }],
        };
        let text = err.to_string();
        assert!(text.contains("fooo"));
        assert!(text.contains("crate::foo"));
    }
}
