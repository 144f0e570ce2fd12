//! # Cycle Detection
//!
//! Strongly connected components over dependency edges (Tarjan, iterative).
//!
//! Only components with more than one member are reported: a self-call is
//! not a dependency cycle. Members of each component are sorted ascending and
//! components are ordered by their smallest member.

use crate::graph::Graph;
use crate::types::{Confidence, EdgeKindSet, EntityId};
use std::collections::{BTreeMap, BTreeSet};

struct Frame {
    node: EntityId,
    successors: Vec<EntityId>,
    next: usize,
}

struct Tarjan<'g, F> {
    graph: &'g Graph,
    kinds: EdgeKindSet,
    admits: F,
    counter: usize,
    indices: BTreeMap<EntityId, usize>,
    lowlink: BTreeMap<EntityId, usize>,
    stack: Vec<EntityId>,
    on_stack: BTreeSet<EntityId>,
    components: Vec<Vec<EntityId>>,
}

impl<'g, F: Fn(Confidence) -> bool> Tarjan<'g, F> {
    fn new(graph: &'g Graph, kinds: EdgeKindSet, admits: F) -> Self {
        Self {
            graph,
            kinds,
            admits,
            counter: 0,
            indices: BTreeMap::new(),
            lowlink: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        }
    }

    fn successors(&self, node: EntityId) -> Vec<EntityId> {
        let mut out = BTreeSet::new();
        for kind in self.kinds.iter() {
            for (target, confidence) in self.graph.successors(node, kind) {
                if (self.admits)(confidence) {
                    out.insert(target);
                }
            }
        }
        out.into_iter().collect()
    }

    fn enter(&mut self, node: EntityId, frames: &mut Vec<Frame>) {
        self.indices.insert(node, self.counter);
        self.lowlink.insert(node, self.counter);
        self.counter += 1;
        self.stack.push(node);
        self.on_stack.insert(node);
        frames.push(Frame {
            node,
            successors: self.successors(node),
            next: 0,
        });
    }

    fn lower(&mut self, node: EntityId, value: usize) {
        if let Some(low) = self.lowlink.get_mut(&node) {
            *low = (*low).min(value);
        }
    }

    fn run(&mut self, root: EntityId) {
        if self.indices.contains_key(&root) {
            return;
        }
        let mut frames: Vec<Frame> = Vec::new();
        self.enter(root, &mut frames);

        while let Some(frame) = frames.last_mut() {
            let node = frame.node;
            if let Some(next) = frame.successors.get(frame.next).copied() {
                frame.next += 1;
                if !self.indices.contains_key(&next) {
                    self.enter(next, &mut frames);
                } else if self.on_stack.contains(&next) {
                    let index = self.indices.get(&next).copied().unwrap_or(usize::MAX);
                    self.lower(node, index);
                }
                continue;
            }

            frames.pop();
            let low = self.lowlink.get(&node).copied().unwrap_or(usize::MAX);
            if let Some(parent) = frames.last() {
                let parent = parent.node;
                self.lower(parent, low);
            }
            if Some(low) == self.indices.get(&node).copied() {
                let mut component = Vec::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack.remove(&member);
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                if component.len() > 1 {
                    component.sort();
                    self.components.push(component);
                }
            }
        }
    }

    fn finish(mut self) -> Vec<Vec<EntityId>> {
        self.components.sort();
        self.components
    }
}

/// Cycles reachable from `scope`.
pub(crate) fn cycles_from(
    graph: &Graph,
    scope: EntityId,
    kinds: EdgeKindSet,
    admits: impl Fn(Confidence) -> bool,
) -> Vec<Vec<EntityId>> {
    let mut tarjan = Tarjan::new(graph, kinds, admits);
    tarjan.run(scope);
    tarjan.finish()
}

/// Every cycle in the graph.
pub(crate) fn all_cycles(
    graph: &Graph,
    kinds: EdgeKindSet,
    admits: impl Fn(Confidence) -> bool,
) -> Vec<Vec<EntityId>> {
    let mut tarjan = Tarjan::new(graph, kinds, admits);
    for entity in graph.entities() {
        tarjan.run(entity.id);
    }
    tarjan.finish()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::signature::{FileBatch, RawEntity, RawRelationship, SignatureModel};
    use crate::types::Checksum;

    fn graph_of(batch: &FileBatch) -> Graph {
        let mut graph = Graph::new();
        let c = SignatureModel::normalize(batch, &IngestConfig::default())
            .expect("normalize")
            .contribution;
        graph.apply_batch(&BTreeSet::new(), &[c]);
        graph
    }

    fn id(graph: &Graph, name: &str) -> EntityId {
        graph
            .entities()
            .find(|e| graph.text(e.name) == name)
            .map(|e| e.id)
            .expect("entity")
    }

    fn ring() -> FileBatch {
        FileBatch::new("ring.rs", Checksum(1))
            .entity(RawEntity::new("a", "fn", 1))
            .entity(RawEntity::new("b", "fn", 2))
            .entity(RawEntity::new("c", "fn", 3))
            .entity(RawEntity::new("d", "fn", 4))
            .entity(RawEntity::new("e", "fn", 5))
            .relationship(RawRelationship::new("a", "calls", "b"))
            .relationship(RawRelationship::new("b", "calls", "c"))
            .relationship(RawRelationship::new("c", "calls", "a"))
            .relationship(RawRelationship::new("c", "calls", "d"))
            .relationship(RawRelationship::new("e", "calls", "e"))
    }

    #[test]
    fn three_cycle_found_from_any_member() {
        let graph = graph_of(&ring());
        let mut expected = vec![id(&graph, "a"), id(&graph, "b"), id(&graph, "c")];
        expected.sort();
        for name in ["a", "b", "c"] {
            let cycles = cycles_from(&graph, id(&graph, name), EdgeKindSet::DEPENDENCY, |_| true);
            assert_eq!(cycles, vec![expected.clone()]);
        }
    }

    #[test]
    fn acyclic_scope_and_self_loop_report_nothing() {
        let graph = graph_of(&ring());
        assert!(cycles_from(&graph, id(&graph, "d"), EdgeKindSet::DEPENDENCY, |_| true).is_empty());
        assert!(cycles_from(&graph, id(&graph, "e"), EdgeKindSet::DEPENDENCY, |_| true).is_empty());
    }

    #[test]
    fn all_cycles_lists_each_component_once() {
        let graph = graph_of(&ring());
        let cycles = all_cycles(&graph, EdgeKindSet::DEPENDENCY, |_| true);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 3);
    }

    #[test]
    fn filtered_edges_break_cycles() {
        let batch = FileBatch::new("w.rs", Checksum(1))
            .entity(RawEntity::new("x", "fn", 1))
            .entity(RawEntity::new("y", "fn", 2))
            .relationship(RawRelationship::new("x", "calls", "y"))
            .relationship(RawRelationship::new("y", "calls", "x").confidence(0.0));
        let graph = graph_of(&batch);
        let strict = |c: Confidence| c > Confidence::ZERO;
        assert!(all_cycles(&graph, EdgeKindSet::DEPENDENCY, strict).is_empty());
        assert_eq!(all_cycles(&graph, EdgeKindSet::DEPENDENCY, |_| true).len(), 1);
    }
}
