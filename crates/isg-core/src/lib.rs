//! # isg-core
//!
//! The in-memory Interface Signature Graph engine.
//!
//! Code entities (functions, types, traits, modules, constants) are nodes;
//! typed relationships (calls, uses, implements, contains) are edges. The
//! engine ingests extractor output per file, keeps forward and reverse
//! adjacency plus discovery indices, and answers architectural questions
//! such as "who calls this", "what implements this trait" and "what is the
//! blast radius of changing this".
//!
//! ## Layers
//!
//! - `signature`: raw extractor records to canonical records with stable ids
//! - `graph`: the authoritative store, with symbol binding and external stubs
//! - `index`: name/file/kind/fuzzy discovery, maintained from graph deltas
//! - `query`, `impact`, `cycles`: read-only algorithms over a snapshot
//! - `changes`, `updater`: incremental updates per file
//! - `concurrency`, `engine`: single writer, many readers over versioned snapshots
//! - `formats`, `storage`: canonical snapshot bytes and where they are kept
//!
//! ## Architectural Constraints
//!
//! - Synchronous: no async runtime, no network, no parsing of source code
//! - Deterministic: BTreeMap/BTreeSet only, fixed-point confidence, ids
//!   derived from content
//! - A published snapshot is never mutated

// =============================================================================
// MODULES
// =============================================================================

pub mod changes;
pub mod concurrency;
pub mod config;
pub mod cycles;
pub mod engine;
pub mod formats;
pub mod graph;
pub mod impact;
pub mod index;
pub mod pool;
pub mod primitives;
pub mod query;
pub mod search;
pub mod signature;
pub mod snapshot;
pub mod stats;
pub mod storage;
pub mod symbols;
pub mod types;
pub mod updater;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    Checksum, Confidence, Edge, EdgeKind, EdgeKindSet, Entity, EntityId, EntityKind, FileId,
    FileRecord, IsgError, StrId, Suggestion, Visibility,
};

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use changes::{ChangeDetector, ChangeSet, FileEvent};
pub use concurrency::ConcurrencyManager;
pub use config::{EngineConfig, IngestConfig, QueryConfig};
pub use engine::{Engine, RestoreOutcome};
pub use graph::{Graph, GraphDelta};
pub use impact::{BlastRadius, ImpactDirection, ImpactOptions, ImpactSeverity};
pub use index::DiscoveryIndex;
pub use pool::StringPool;
pub use query::{EntityRef, Query, QueryEngine, QueryOutput, QueryType};
pub use signature::{FileBatch, FileUpdate, RawEntity, RawRelationship, SignatureModel};
pub use snapshot::Snapshot;
pub use stats::GraphStats;
pub use updater::{UpdateReport, UpdateStatus, Updater};

// =============================================================================
// RE-EXPORTS: Formats and Storage
// =============================================================================

pub use formats::{CanonicalGraph, SnapshotHeader, canonical_checksum, export_snapshot, import_snapshot};
pub use storage::{FileSnapshotStore, RedbSnapshotStore, SnapshotStore, StoredSnapshot};
