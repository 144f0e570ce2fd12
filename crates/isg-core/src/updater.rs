//! # Incremental Updater
//!
//! Applies extractor output to a snapshot, one batch per write.
//!
//! ## Rules
//!
//! - Files are handled in ascending canonical-path order.
//! - A parsed file whose checksum matches the stored one is skipped.
//! - A failed re-parse keeps the previous contribution (fail-safe) and is
//!   reported as `ReparseFailed`.
//! - A path given twice in one batch is reported as `DuplicateFile` and left
//!   untouched.
//! - All removals and replacements of one call are applied by a single
//!   [`Snapshot::apply_batch`], so the result does not depend on the order
//!   files arrived in.

use crate::changes::ChangeSet;
use crate::config::IngestConfig;
use crate::signature::{FileContribution, FileUpdate, SignatureModel, file_id, normalize_path};
use crate::snapshot::Snapshot;
use crate::types::{FileId, IsgError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome class of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Success,
    /// Applied, with warnings.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub files_ingested: usize,
    pub files_removed: usize,
    pub files_unchanged: usize,
    pub files_failed: usize,
    pub entities_inserted: usize,
    pub entities_removed: usize,
    pub entities_replaced: usize,
    #[serde(serialize_with = "serialize_warnings")]
    pub warnings: Vec<IsgError>,
    pub status: UpdateStatus,
}

fn serialize_warnings<S: serde::Serializer>(
    warnings: &[IsgError],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(warnings.iter().map(ToString::to_string))
}

impl Default for UpdateReport {
    fn default() -> Self {
        Self {
            files_ingested: 0,
            files_removed: 0,
            files_unchanged: 0,
            files_failed: 0,
            entities_inserted: 0,
            entities_removed: 0,
            entities_replaced: 0,
            warnings: Vec::new(),
            status: UpdateStatus::Success,
        }
    }
}

impl UpdateReport {
    /// Whether the graph changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.files_ingested + self.files_removed > 0
    }

    fn warn(&mut self, warning: IsgError) {
        tracing::warn!(%warning, "update warning");
        self.warnings.push(warning);
    }

    fn finish(mut self) -> Self {
        if !self.warnings.is_empty() {
            self.status = UpdateStatus::Partial;
        }
        tracing::info!(
            ingested = self.files_ingested,
            removed = self.files_removed,
            unchanged = self.files_unchanged,
            failed = self.files_failed,
            inserted = self.entities_inserted,
            replaced = self.entities_replaced,
            warnings = self.warnings.len(),
            "update applied"
        );
        self
    }
}

pub struct Updater<'c> {
    config: &'c IngestConfig,
}

impl<'c> Updater<'c> {
    #[must_use]
    pub fn new(config: &'c IngestConfig) -> Self {
        Self { config }
    }

    /// Ingest extractor output. Files not mentioned are left alone.
    pub fn ingest(&self, snapshot: &mut Snapshot, updates: &[FileUpdate]) -> UpdateReport {
        let mut report = UpdateReport::default();
        let by_path = group_by_path(updates, &mut report);
        let mut additions = Vec::new();
        for (path, update) in by_path {
            if let FileUpdate::Parsed(batch) = update {
                let stored = snapshot.graph().file(file_id(&path)).map(|f| f.checksum);
                if stored == Some(batch.checksum) {
                    report.files_unchanged += 1;
                    continue;
                }
            }
            if let Some(contribution) = self.prepare(&path, Some(update), &mut report) {
                additions.push(contribution);
            }
        }
        self.commit(snapshot, &BTreeSet::new(), additions, report)
    }

    /// Apply a detected change set: delete `deleted`, re-ingest `new` and
    /// `modified` from `updates`. A changed file without a usable update
    /// keeps its stale contribution. Failed updates are reported even when
    /// their file is outside the change set; other extra updates are ignored.
    pub fn apply_changes(
        &self,
        snapshot: &mut Snapshot,
        changes: &ChangeSet,
        updates: &[FileUpdate],
    ) -> UpdateReport {
        let mut report = UpdateReport {
            files_unchanged: changes.unchanged.len(),
            ..UpdateReport::default()
        };
        let mut by_path = group_by_path(updates, &mut report);

        let removals: BTreeSet<FileId> = changes
            .deleted
            .iter()
            .map(|p| file_id(p))
            .filter(|id| snapshot.graph().file(*id).is_some())
            .collect();
        report.files_removed = removals.len();

        let mut additions = Vec::new();
        for path in changes.to_reparse() {
            let update = by_path.remove(path);
            if let Some(contribution) = self.prepare(path, update, &mut report) {
                additions.push(contribution);
            }
        }
        for (path, update) in by_path {
            if let FileUpdate::Failed { .. } = update {
                self.prepare(&path, Some(update), &mut report);
            } else {
                tracing::debug!(path = %path, "update ignored: file not in change set");
            }
        }
        self.commit(snapshot, &removals, additions, report)
    }

    /// Remove whole files. Unknown paths are ignored.
    pub fn remove_files(&self, snapshot: &mut Snapshot, paths: &[String]) -> UpdateReport {
        let mut report = UpdateReport::default();
        let mut removals = BTreeSet::new();
        for raw in paths {
            match normalize_path(raw).map(|p| file_id(&p)) {
                Some(id) if snapshot.graph().file(id).is_some() => {
                    removals.insert(id);
                }
                Some(_) => tracing::debug!(path = %raw, "remove ignored: unknown file"),
                None => report.warn(IsgError::MalformedRecord {
                    file: raw.clone(),
                    line: 0,
                    reason: "invalid file path".to_string(),
                }),
            }
        }
        report.files_removed = removals.len();
        self.commit(snapshot, &removals, Vec::new(), report)
    }

    /// Normalize one update; `None` keeps whatever the graph holds for `path`.
    fn prepare(
        &self,
        path: &str,
        update: Option<&FileUpdate>,
        report: &mut UpdateReport,
    ) -> Option<FileContribution> {
        let failure = match update {
            Some(FileUpdate::Parsed(batch)) => {
                match SignatureModel::normalize(batch, self.config) {
                    Ok(normalized) => {
                        report.warnings.extend(normalized.warnings);
                        return Some(normalized.contribution);
                    }
                    Err(e) => e.to_string(),
                }
            }
            Some(FileUpdate::Failed { reason, .. }) => reason.clone(),
            None => "no parse result supplied for changed file".to_string(),
        };
        report.files_failed += 1;
        report.warn(IsgError::ReparseFailed {
            file: path.to_string(),
            reason: failure,
        });
        None
    }

    fn commit(
        &self,
        snapshot: &mut Snapshot,
        removals: &BTreeSet<FileId>,
        additions: Vec<FileContribution>,
        mut report: UpdateReport,
    ) -> UpdateReport {
        if removals.is_empty() && additions.is_empty() {
            return report.finish();
        }
        report.files_ingested = additions.len();
        let outcome = snapshot.apply_batch(removals, &additions);
        let summary = outcome.delta.summarize(snapshot.graph());
        report.entities_inserted = summary.inserted;
        report.entities_removed = summary.removed;
        report.entities_replaced = summary.replaced;
        for warning in outcome.warnings {
            report.warn(warning);
        }
        report.finish()
    }
}

/// Canonicalize and deduplicate update paths. Paths given more than once
/// are dropped entirely.
fn group_by_path<'u>(
    updates: &'u [FileUpdate],
    report: &mut UpdateReport,
) -> BTreeMap<String, &'u FileUpdate> {
    let mut by_path: BTreeMap<String, &FileUpdate> = BTreeMap::new();
    let mut duplicates: BTreeSet<String> = BTreeSet::new();
    for update in updates {
        let Some(path) = normalize_path(update.path()) else {
            report.files_failed += 1;
            report.warn(IsgError::MalformedRecord {
                file: update.path().to_string(),
                line: 0,
                reason: "invalid file path".to_string(),
            });
            continue;
        };
        if duplicates.contains(&path) {
            continue;
        }
        if by_path.remove(&path).is_some() {
            report.warn(IsgError::DuplicateFile(path.clone()));
            duplicates.insert(path);
            continue;
        }
        by_path.insert(path, update);
    }
    by_path
}

// =============================================================================
// TESTS
// =============================================================================
