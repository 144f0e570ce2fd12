//! # Blast Radius
//!
//! Breadth-first impact analysis: "what is affected if this entity changes?"
//!
//! Upstream impact walks reverse dependency edges (calls ∪ uses ∪ implements)
//! from the origin; downstream impact walks the same kinds forward. Each
//! entity is recorded at the depth where it is first reached, which is its
//! minimal distance because the walk proceeds level by level. A visited map
//! keeps cycles from being re-expanded.

use crate::graph::Graph;
use crate::types::{Confidence, EdgeKindSet, EntityId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Severity of impact derived from hop distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactSeverity {
    /// 1 hop
    Direct,
    /// 2-3 hops
    Transitive,
    /// 4+ hops
    Distant,
}

impl ImpactSeverity {
    #[must_use]
    pub fn from_hops(hops: usize) -> Self {
        match hops {
            0 | 1 => Self::Direct,
            2 | 3 => Self::Transitive,
            _ => Self::Distant,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Transitive => "transitive",
            Self::Distant => "distant",
        }
    }
}

impl fmt::Display for ImpactSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way dependency edges are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImpactDirection {
    /// Entities that depend on the origin (reverse edges).
    #[default]
    Upstream,
    /// Entities the origin depends on (forward edges).
    Downstream,
}

impl fmt::Display for ImpactDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream => f.write_str("upstream"),
            Self::Downstream => f.write_str("downstream"),
        }
    }
}

/// Bounds for a blast radius walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImpactOptions {
    /// `None` walks the whole reachable set; `Some(0)` returns the origin only.
    pub max_depth: Option<usize>,
    /// Wall-clock budget; the result is marked truncated when exceeded.
    pub timeout: Option<Duration>,
    pub direction: ImpactDirection,
    /// Follow low-confidence edges too.
    pub include_low_confidence: bool,
}

impl ImpactOptions {
    #[must_use]
    pub fn depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn downstream(mut self) -> Self {
        self.direction = ImpactDirection::Downstream;
        self
    }

    #[must_use]
    pub fn low_confidence(mut self) -> Self {
        self.include_low_confidence = true;
        self
    }
}

/// Every affected entity with its minimal depth from the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastRadius {
    pub origin: EntityId,
    pub direction: ImpactDirection,
    /// Origin included at depth 0.
    pub depths: BTreeMap<EntityId, usize>,
    pub max_depth: Option<usize>,
    /// Set when the timeout stopped the walk early.
    pub truncated: bool,
}

impl BlastRadius {
    /// Entities in ascending id order, origin included.
    #[must_use]
    pub fn entities(&self) -> Vec<EntityId> {
        self.depths.keys().copied().collect()
    }

    #[must_use]
    pub fn depth_of(&self, id: EntityId) -> Option<usize> {
        self.depths.get(&id).copied()
    }

    #[must_use]
    pub fn at_depth(&self, depth: usize) -> Vec<EntityId> {
        self.depths
            .iter()
            .filter(|(_, d)| **d == depth)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Severity of an affected entity; `None` for the origin and outsiders.
    #[must_use]
    pub fn severity(&self, id: EntityId) -> Option<ImpactSeverity> {
        match self.depth_of(id) {
            Some(0) | None => None,
            Some(depth) => Some(ImpactSeverity::from_hops(depth)),
        }
    }

    /// Number of affected entities, origin excluded.
    #[must_use]
    pub fn affected(&self) -> usize {
        self.depths.len().saturating_sub(1)
    }

    /// Deepest level reached.
    #[must_use]
    pub fn reached_depth(&self) -> usize {
        self.depths.values().copied().max().unwrap_or(0)
    }
}

pub(crate) fn blast_radius(
    graph: &Graph,
    origin: EntityId,
    options: &ImpactOptions,
    admits: impl Fn(Confidence) -> bool,
) -> BlastRadius {
    let deadline = options.timeout.and_then(|t| Instant::now().checked_add(t));
    let mut depths: BTreeMap<EntityId, usize> = BTreeMap::new();
    depths.insert(origin, 0);
    let mut frontier = vec![origin];
    let mut depth = 0usize;
    let mut truncated = false;

    'levels: while !frontier.is_empty() {
        if options.max_depth.is_some_and(|max| depth >= max) {
            break;
        }
        let mut next = Vec::new();
        for node in frontier {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                truncated = true;
                break 'levels;
            }
            for kind in EdgeKindSet::DEPENDENCY.iter() {
                match options.direction {
                    ImpactDirection::Upstream => expand(
                        graph.predecessors(node, kind),
                        depth + 1,
                        &admits,
                        &mut depths,
                        &mut next,
                    ),
                    ImpactDirection::Downstream => expand(
                        graph.successors(node, kind),
                        depth + 1,
                        &admits,
                        &mut depths,
                        &mut next,
                    ),
                }
            }
        }
        frontier = next;
        depth += 1;
    }

    if truncated {
        tracing::debug!(origin = %origin, reached = depths.len(), "blast radius truncated by timeout");
    }

    BlastRadius {
        origin,
        direction: options.direction,
        depths,
        max_depth: options.max_depth,
        truncated,
    }
}

fn expand(
    neighbours: impl Iterator<Item = (EntityId, Confidence)>,
    depth: usize,
    admits: &impl Fn(Confidence) -> bool,
    depths: &mut BTreeMap<EntityId, usize>,
    next: &mut Vec<EntityId>,
) {
    for (neighbour, confidence) in neighbours {
        if !admits(confidence) || depths.contains_key(&neighbour) {
            continue;
        }
        depths.insert(neighbour, depth);
        next.push(neighbour);
    }
}

// =============================================================================
// TESTS
// =============================================================================
