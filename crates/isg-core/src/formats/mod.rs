//! # Formats
//!
//! Serialization formats for the graph. Pure byte transformations; storage
//! backends live in [`crate::storage`].

pub mod persistence;

pub use persistence::{
    CanonicalGraph, SnapshotHeader, canonical_checksum, export_snapshot, import_snapshot,
    peek_schema_version,
};
