//! # Change Detector
//!
//! Partitions a set of files into new, modified, deleted and unchanged by
//! comparing checksums against the last ingested ones.
//!
//! Paths are canonicalized first, so `./src/a.rs` and `src/a.rs` name the
//! same file. Paths that cannot be canonicalized are reported in `invalid`.

use crate::graph::Graph;
use crate::signature::normalize_path;
use crate::types::Checksum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// File-watcher notification: a fresh checksum, or `None` when the file is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub path: String,
    pub checksum: Option<Checksum>,
}

impl FileEvent {
    #[must_use]
    pub fn changed(path: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            path: path.into(),
            checksum: Some(checksum),
        }
    }

    #[must_use]
    pub fn removed(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            checksum: None,
        }
    }
}

/// Four-way partition of canonical paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub new: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    pub unchanged: BTreeSet<String>,
    /// Inputs rejected as paths.
    pub invalid: BTreeSet<String>,
}

impl ChangeSet {
    /// Whether anything needs to be applied.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !(self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty())
    }

    /// New and modified paths, ascending.
    pub fn to_reparse(&self) -> impl Iterator<Item = &String> {
        let mut paths: Vec<&String> = self.new.iter().chain(self.modified.iter()).collect();
        paths.sort();
        paths.into_iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len() + self.unchanged.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ChangeDetector;

impl ChangeDetector {
    /// Compare a complete file listing with the graph. Source files absent
    /// from `current` are deleted.
    #[must_use]
    pub fn detect(graph: &Graph, current: &BTreeMap<String, Checksum>) -> ChangeSet {
        let mut changes = ChangeSet::default();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for (raw, checksum) in current {
            let Some(path) = normalize_path(raw) else {
                changes.invalid.insert(raw.clone());
                continue;
            };
            Self::classify(graph, path.clone(), Some(*checksum), &mut changes);
            seen.insert(path);
        }
        for file in graph.source_files() {
            let path = graph.text(file.path);
            if !seen.contains(path) {
                changes.deleted.insert(path.to_string());
            }
        }
        Self::finish(changes)
    }

    /// Classify only the files mentioned by `events`; the last event for a
    /// path wins.
    #[must_use]
    pub fn detect_events(graph: &Graph, events: &[FileEvent]) -> ChangeSet {
        let mut latest: BTreeMap<String, Option<Checksum>> = BTreeMap::new();
        let mut changes = ChangeSet::default();
        for event in events {
            match normalize_path(&event.path) {
                Some(path) => {
                    latest.insert(path, event.checksum);
                }
                None => {
                    changes.invalid.insert(event.path.clone());
                }
            }
        }
        for (path, checksum) in latest {
            Self::classify(graph, path, checksum, &mut changes);
        }
        Self::finish(changes)
    }

    fn classify(graph: &Graph, path: String, checksum: Option<Checksum>, out: &mut ChangeSet) {
        let stored = graph.file_by_path(&path).map(|f| f.checksum);
        match (stored, checksum) {
            (None, Some(_)) => {
                out.new.insert(path);
            }
            (None, None) => {}
            (Some(_), None) => {
                out.deleted.insert(path);
            }
            (Some(old), Some(new)) if old == new => {
                out.unchanged.insert(path);
            }
            (Some(_), Some(_)) => {
                out.modified.insert(path);
            }
        }
    }

    fn finish(changes: ChangeSet) -> ChangeSet {
        tracing::debug!(
            new = changes.new.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            unchanged = changes.unchanged.len(),
            "changes detected"
        );
        changes
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::signature::{FileBatch, RawEntity, RawRelationship, SignatureModel};

    fn graph() -> Graph {
        let mut graph = Graph::new();
        let batches = [
            FileBatch::new("a.rs", Checksum(1))
                .entity(RawEntity::new("a", "fn", 1))
                .relationship(RawRelationship::new("a", "calls", "outside")),
            FileBatch::new("b.rs", Checksum(2)).entity(RawEntity::new("b", "fn", 1)),
            FileBatch::new("c.rs", Checksum(3)).entity(RawEntity::new("c", "fn", 1)),
        ];
        let contributions: Vec<_> = batches
            .iter()
            .map(|b| {
                SignatureModel::normalize(b, &IngestConfig::default())
                    .expect("normalize")
                    .contribution
            })
            .collect();
        graph.apply_batch(&BTreeSet::new(), &contributions);
        graph
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| (*p).to_string()).collect()
    }

    #[test]
    fn full_listing_partitions_four_ways() {
        let graph = graph();
        let mut current = BTreeMap::new();
        current.insert("./a.rs".to_string(), Checksum(1));
        current.insert("b.rs".to_string(), Checksum(20));
        current.insert("d.rs".to_string(), Checksum(4));
        current.insert(String::new(), Checksum(5));
        let changes = ChangeDetector::detect(&graph, &current);
        assert_eq!(changes.unchanged, set(&["a.rs"]));
        assert_eq!(changes.modified, set(&["b.rs"]));
        assert_eq!(changes.new, set(&["d.rs"]));
        assert_eq!(changes.deleted, set(&["c.rs"]), "external owner never listed");
        assert_eq!(changes.invalid, set(&[""]));
        assert!(changes.has_changes());
        assert_eq!(
            changes.to_reparse().cloned().collect::<Vec<_>>(),
            vec!["b.rs".to_string(), "d.rs".to_string()]
        );
    }

    #[test]
    fn events_only_touch_mentioned_files() {
        let graph = graph();
        let events = [
            FileEvent::changed("b.rs", Checksum(2)),
            FileEvent::removed("c.rs"),
            FileEvent::removed("never-seen.rs"),
            FileEvent::changed("a.rs", Checksum(9)),
            FileEvent::changed("a.rs", Checksum(1)),
        ];
        let changes = ChangeDetector::detect_events(&graph, &events);
        assert_eq!(changes.unchanged, set(&["a.rs", "b.rs"]));
        assert_eq!(changes.deleted, set(&["c.rs"]));
        assert!(changes.new.is_empty());
        assert!(changes.modified.is_empty());
    }

    #[test]
    fn nothing_to_do() {
        let graph = graph();
        let changes = ChangeDetector::detect_events(&graph, &[]);
        assert!(!changes.has_changes());
        assert!(changes.is_empty());
    }
}
