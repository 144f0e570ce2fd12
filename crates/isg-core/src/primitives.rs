//! # Engine Primitives
//!
//! Compile-time constants for the ISG engine: snapshot format markers,
//! input validation limits and query defaults.

// =============================================================================
// SNAPSHOT FORMAT
// =============================================================================

/// Magic bytes at the start of every snapshot.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"ISGS";

/// Current snapshot schema version.
///
/// Increment this when the canonical layout changes; snapshots written with
/// another version are discarded and the graph is rebuilt from source.
pub const SCHEMA_VERSION: u16 = 1;

/// Size of the fixed header: magic + schema version (u16 LE).
pub const SNAPSHOT_PREFIX_LEN: usize = 6;

/// Default upper bound on snapshot size accepted by import (512 MB).
pub const DEFAULT_MAX_SNAPSHOT_BYTES: u64 = 512 * 1024 * 1024;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of an entity name or qualified name.
pub const MAX_NAME_LENGTH: usize = 4096;

/// Maximum length of raw signature text (64KB).
pub const MAX_SIGNATURE_LENGTH: usize = 65536;

/// Maximum length of a canonical file path.
pub const MAX_PATH_LENGTH: usize = 4096;

/// Default maximum number of entity descriptors accepted per file.
pub const DEFAULT_MAX_ENTITIES_PER_FILE: usize = 100_000;

/// Default maximum number of relationship descriptors accepted per file.
pub const DEFAULT_MAX_RELATIONSHIPS_PER_FILE: usize = 500_000;

// =============================================================================
// IDENTITY
// =============================================================================

/// Reserved path of the file record that owns external stubs.
///
/// Angle brackets never survive path canonicalization of real files.
pub const EXTERNAL_FILE_PATH: &str = "<external>";

// =============================================================================
// QUERY DEFAULTS
// =============================================================================

/// Default number of fuzzy results.
pub const DEFAULT_FUZZY_LIMIT: usize = 20;

/// Default number of suggestions attached to `EntityNotFound`.
pub const DEFAULT_SUGGESTION_LIMIT: usize = 5;

/// Upper bound on the edit distance tolerated by fuzzy search.
pub const MAX_FUZZY_DISTANCE: usize = 3;

/// Length of the n-grams used by the substring index.
pub const NGRAM_LEN: usize = 3;

/// Maximum `limit` honored by fuzzy search.
pub const MAX_FUZZY_LIMIT: usize = 1000;
