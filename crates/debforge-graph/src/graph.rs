//! The resolved dependency graph and its batch plan

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use debforge_core::{NodeStatus, PackageId, PackageNode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GraphError, Result};

/// Why a node was removed from the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionKind {
    Retired,
    Policy,
}

/// A node removed by retirement or policy filtering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedNode {
    pub id: PackageId,
    pub kind: ExclusionKind,
    pub reason: String,
}

/// One topological generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub index: usize,
    /// Members in discovery order
    pub members: Vec<PackageId>,
}

/// Build-dependency graph of one run
///
/// Read-only once constructed. Edges point from a package to the in-graph
/// packages it needs built first.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    roots: Vec<PackageId>,
    nodes: Vec<PackageNode>,
    positions: HashMap<PackageId, usize>,
    edges: HashMap<PackageId, Vec<PackageId>>,
    external: BTreeMap<PackageId, String>,
    excluded: Vec<ExcludedNode>,
}

impl DependencyGraph {
    /// Assemble a graph, checking that every declared dependency is a node,
    /// externally satisfied, or excluded
    pub fn from_parts(
        roots: Vec<PackageId>,
        nodes: Vec<PackageNode>,
        external: BTreeMap<PackageId, String>,
        excluded: Vec<ExcludedNode>,
    ) -> Result<Self> {
        let positions: HashMap<PackageId, usize> =
            nodes.iter().enumerate().map(|(i, n)| (n.id.clone(), i)).collect();
        let excluded_ids: HashSet<&PackageId> = excluded.iter().map(|e| &e.id).collect();

        let mut edges = HashMap::with_capacity(nodes.len());
        for node in &nodes {
            let mut deps = Vec::new();
            for dep in &node.build_deps {
                if dep == &node.id {
                    continue;
                }
                if positions.contains_key(dep) {
                    if !deps.contains(dep) {
                        deps.push(dep.clone());
                    }
                } else if !external.contains_key(dep) && !excluded_ids.contains(dep) {
                    return Err(GraphError::DanglingEdge {
                        package: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            edges.insert(node.id.clone(), deps);
        }

        Ok(Self { roots, nodes, positions, edges, external, excluded })
    }

    /// Requested roots, deduplicated, in request order
    pub fn roots(&self) -> &[PackageId] {
        &self.roots
    }

    /// Nodes in discovery order
    pub fn nodes(&self) -> &[PackageNode] {
        &self.nodes
    }

    pub fn node(&self, id: &PackageId) -> Option<&PackageNode> {
        self.positions.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Identifiers in discovery order
    pub fn discovery_order(&self) -> Vec<PackageId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// In-graph dependencies of `id`
    pub fn dependencies(&self, id: &PackageId) -> &[PackageId] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct in-graph dependents of `id`, in discovery order
    pub fn dependents(&self, id: &PackageId) -> Vec<PackageId> {
        self.nodes
            .iter()
            .filter(|n| self.dependencies(&n.id).contains(id))
            .map(|n| n.id.clone())
            .collect()
    }

    /// All edges as (package, dependency) pairs in discovery order
    pub fn edges(&self) -> Vec<(PackageId, PackageId)> {
        self.nodes
            .iter()
            .flat_map(|n| self.dependencies(&n.id).iter().map(move |d| (n.id.clone(), d.clone())))
            .collect()
    }

    /// Externally-satisfied dependencies with their available version
    pub fn external(&self) -> &BTreeMap<PackageId, String> {
        &self.external
    }

    pub fn is_externally_satisfied(&self, id: &PackageId) -> bool {
        self.external.contains_key(id)
    }

    /// Nodes removed by retirement or policy filtering
    pub fn excluded(&self) -> &[ExcludedNode] {
        &self.excluded
    }

    /// Nodes whose status is skipped-blocked
    pub fn blocked(&self) -> Vec<&PackageNode> {
        self.nodes.iter().filter(|n| n.status == NodeStatus::SkippedBlocked).collect()
    }

    /// Partition the graph into topological batches
    ///
    /// Each round removes every node whose in-graph dependencies were all
    /// removed in earlier rounds. Anything left over is an inconsistency.
    pub fn batches(&self) -> Result<Vec<Batch>> {
        let mut pending: HashMap<&PackageId, usize> =
            self.nodes.iter().map(|n| (&n.id, self.dependencies(&n.id).len())).collect();
        let mut dependents: HashMap<&PackageId, Vec<&PackageId>> = HashMap::new();
        for node in &self.nodes {
            for dep in self.dependencies(&node.id) {
                dependents.entry(dep).or_default().push(&node.id);
            }
        }

        let mut batches = Vec::new();
        let mut ready: Vec<&PackageId> =
            self.nodes.iter().map(|n| &n.id).filter(|id| pending[id] == 0).collect();
        let mut scheduled = 0;

        while !ready.is_empty() {
            ready.sort_by_key(|id| self.positions[*id]);
            let mut next = Vec::new();
            for id in &ready {
                for dependent in dependents.get(*id).map(Vec::as_slice).unwrap_or(&[]) {
                    if let Some(count) = pending.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            scheduled += ready.len();
            batches.push(Batch {
                index: batches.len(),
                members: ready.iter().map(|id| (*id).clone()).collect(),
            });
            ready = next;
        }

        if scheduled != self.nodes.len() {
            let remaining: Vec<PackageId> = self
                .nodes
                .iter()
                .filter(|n| pending[&n.id] > 0)
                .map(|n| n.id.clone())
                .collect();
            return Err(GraphError::Inconsistent { remaining });
        }

        debug!("Planned {} nodes into {} batches", scheduled, batches.len());
        Ok(batches)
    }

    /// Transitive dependents of `id`, breadth first
    pub fn transitive_dependents(&self, id: &PackageId) -> Vec<PackageId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.clone()]);
        let mut out = Vec::new();
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(&current) {
                if seen.insert(dependent.clone()) {
                    out.push(dependent.clone());
                    queue.push_back(dependent);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use debforge_core::BuildMode;

    use super::*;

    fn id(s: &str) -> PackageId {
        PackageId::new(s).unwrap()
    }

    fn node(name: &str, deps: &[&str]) -> PackageNode {
        PackageNode::new(id(name), BuildMode::Release, deps.iter().map(|d| id(d)).collect())
    }

    #[test]
    fn test_dangling_edge_is_rejected() {
        let result = DependencyGraph::from_parts(
            vec![id("a")],
            vec![node("a", &["ghost"])],
            BTreeMap::new(),
            Vec::new(),
        );
        assert!(matches!(result, Err(GraphError::DanglingEdge { .. })));
    }

    #[test]
    fn test_batches_follow_discovery_order() {
        let graph = DependencyGraph::from_parts(
            vec![id("app")],
            vec![node("app", &["lib2", "lib1"]), node("lib2", &[]), node("lib1", &[])],
            BTreeMap::new(),
            Vec::new(),
        )
        .unwrap();
        let batches = graph.batches().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].members, vec![id("lib2"), id("lib1")]);
        assert_eq!(batches[1].members, vec![id("app")]);
    }

    #[test]
    fn test_hand_built_cycle_is_inconsistent() {
        let graph = DependencyGraph::from_parts(
            vec![id("a")],
            vec![node("a", &["b"]), node("b", &["a"]), node("c", &[])],
            BTreeMap::new(),
            Vec::new(),
        )
        .unwrap();
        match graph.batches() {
            Err(GraphError::Inconsistent { remaining }) => {
                assert_eq!(remaining, vec![id("a"), id("b")]);
            }
            other => panic!("expected inconsistency, got {other:?}"),
        }
    }

    #[test]
    fn test_dependents() {
        let graph = DependencyGraph::from_parts(
            vec![id("a")],
            vec![node("a", &["b"]), node("b", &["c"]), node("c", &[])],
            BTreeMap::new(),
            Vec::new(),
        )
        .unwrap();
        assert_eq!(graph.dependents(&id("c")), vec![id("b")]);
        assert_eq!(graph.transitive_dependents(&id("c")), vec![id("b"), id("a")]);
        assert_eq!(graph.edges().len(), 2);
    }
}
