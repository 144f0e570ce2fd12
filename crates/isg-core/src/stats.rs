//! # Graph Statistics
//!
//! Cheap counters over a snapshot, reported by `status` and the CLI.

use crate::graph::Graph;
use crate::index::DiscoveryIndex;
use crate::types::Confidence;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub version: u64,
    pub files: usize,
    pub entities: usize,
    pub external_stubs: usize,
    pub edges: usize,
    /// Edges at or below the low-confidence threshold.
    pub low_confidence_edges: usize,
    pub interned_strings: usize,
    pub entities_by_kind: BTreeMap<String, usize>,
    pub edges_by_kind: BTreeMap<String, usize>,
}

impl GraphStats {
    #[must_use]
    pub fn collect(
        version: u64,
        graph: &Graph,
        index: &DiscoveryIndex,
        threshold: Confidence,
    ) -> Self {
        let mut edges_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut low_confidence_edges = 0;
        for edge in graph.edges() {
            *edges_by_kind.entry(edge.kind.as_str().to_string()).or_default() += 1;
            if edge.confidence <= threshold {
                low_confidence_edges += 1;
            }
        }
        let entities_by_kind = index
            .kinds()
            .map(|(kind, count)| (kind.to_string(), count))
            .collect();
        Self {
            version,
            files: graph.file_count(),
            entities: graph.entity_count(),
            external_stubs: graph.stub_count(),
            edges: graph.edge_count(),
            low_confidence_edges,
            interned_strings: graph.pool().len(),
            entities_by_kind,
            edges_by_kind,
        }
    }
}
