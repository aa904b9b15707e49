//! Closure expansion from requested roots

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use debforge_core::{
    BuildMode, DependencySource, NodeStatus, PackageId, PackageIndex, PackageNode, PolicyGate,
};
use tracing::{debug, info, warn};

use crate::error::{GraphError, MissingPackage, Result};
use crate::graph::{DependencyGraph, ExcludedNode, ExclusionKind};

/// Builds a [`DependencyGraph`] from requested roots
pub struct GraphBuilder<'a> {
    index: &'a dyn PackageIndex,
    source: &'a dyn DependencySource,
    gate: Option<&'a dyn PolicyGate>,
    force_rebuild: HashSet<PackageId>,
    include_retired: bool,
    default_mode: BuildMode,
}

/// Mutable state of one closure expansion
#[derive(Default)]
struct Expansion {
    nodes: Vec<PackageNode>,
    seen: HashSet<PackageId>,
    external: BTreeMap<PackageId, String>,
    missing: Vec<(PackageId, Vec<PackageId>)>,
    stack: Vec<PackageId>,
}

impl Expansion {
    fn record_missing(&mut self, dep: &PackageId, required_by: Option<&PackageId>) {
        let pos = match self.missing.iter().position(|(id, _)| id == dep) {
            Some(pos) => pos,
            None => {
                self.missing.push((dep.clone(), Vec::new()));
                self.missing.len() - 1
            }
        };
        let entry = &mut self.missing[pos].1;
        if let Some(parent) = required_by {
            if !entry.contains(parent) {
                entry.push(parent.clone());
            }
        }
    }
}

impl<'a> GraphBuilder<'a> {
    pub fn new(index: &'a dyn PackageIndex, source: &'a dyn DependencySource) -> Self {
        Self {
            index,
            source,
            gate: None,
            force_rebuild: HashSet::new(),
            include_retired: false,
            default_mode: BuildMode::Release,
        }
    }

    /// Filter the closure through a retirement and policy gate
    pub fn with_policy(mut self, gate: &'a dyn PolicyGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Expand these identifiers even when the index already provides them
    pub fn force_rebuild(mut self, ids: impl IntoIterator<Item = PackageId>) -> Self {
        self.force_rebuild.extend(ids);
        self
    }

    pub fn include_retired(mut self, include: bool) -> Self {
        self.include_retired = include;
        self
    }

    pub fn default_mode(mut self, mode: BuildMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Expand `roots` into the full build-dependency graph
    pub fn build(&self, roots: &[PackageId]) -> Result<DependencyGraph> {
        let mut unique_roots = Vec::new();
        for root in roots {
            if !unique_roots.contains(root) {
                unique_roots.push(root.clone());
            }
        }
        if unique_roots.is_empty() {
            return Err(GraphError::EmptyRoots);
        }

        let mut state = Expansion::default();
        for root in &unique_roots {
            if state.seen.contains(root) {
                continue;
            }
            match self.source.declared_build_deps(root) {
                Some(deps) => self.visit(&mut state, root, deps)?,
                None => state.record_missing(root, None),
            }
        }

        if !state.missing.is_empty() {
            let missing: Vec<MissingPackage> = state
                .missing
                .into_iter()
                .map(|(id, required_by)| MissingPackage::new(id, required_by))
                .collect();
            warn!("{} missing packages in dependency closure", missing.len());
            return Err(GraphError::MissingPackages { missing });
        }

        info!(
            "Resolved {} packages to build, {} externally satisfied",
            state.nodes.len(),
            state.external.len()
        );

        let (nodes, excluded) = self.apply_policy(state.nodes);
        let graph = DependencyGraph::from_parts(unique_roots, nodes, state.external, excluded)?;

        // Surface undetected cycles as an inconsistency now rather than at scheduling time
        graph.batches()?;
        Ok(graph)
    }

    fn visit(&self, state: &mut Expansion, id: &PackageId, deps: Vec<PackageId>) -> Result<()> {
        debug!("Expanding {} ({} declared build deps)", id, deps.len());
        state.stack.push(id.clone());
        state.seen.insert(id.clone());
        let mode = self.source.mode(id).unwrap_or(self.default_mode);
        state.nodes.push(PackageNode::new(id.clone(), mode, deps.clone()));

        for dep in &deps {
            if dep == id {
                debug!("Ignoring self-dependency of {}", id);
                continue;
            }
            if let Some(pos) = state.stack.iter().position(|s| s == dep) {
                let participants = state.stack[pos..].to_vec();
                warn!("Dependency cycle through {}", dep);
                return Err(GraphError::Cycle { participants });
            }
            if state.seen.contains(dep) || state.external.contains_key(dep) {
                continue;
            }
            if state.missing.iter().any(|(m, _)| m == dep) {
                state.record_missing(dep, Some(id));
                continue;
            }

            let available = self.index.lookup(dep);
            let forced = self.force_rebuild.contains(dep);
            if let (Some(found), false) = (&available, forced) {
                debug!("{} satisfied externally at {}", dep, found.version);
                state.external.insert(dep.clone(), found.version.clone());
                continue;
            }

            match self.source.declared_build_deps(dep) {
                Some(dep_deps) => self.visit(state, dep, dep_deps)?,
                None => match available {
                    Some(found) => {
                        warn!("{} is forced but not buildable here, using {}", dep, found.version);
                        state.external.insert(dep.clone(), found.version);
                    }
                    None => state.record_missing(dep, Some(id)),
                },
            }
        }

        state.stack.pop();
        Ok(())
    }

    /// Remove excluded nodes and mark their transitive dependents blocked
    fn apply_policy(&self, mut nodes: Vec<PackageNode>) -> (Vec<PackageNode>, Vec<ExcludedNode>) {
        let Some(gate) = self.gate else {
            return (nodes, Vec::new());
        };

        let mut excluded = Vec::new();
        for node in &mut nodes {
            node.retirement = gate.retirement(&node.id);
            node.policy = gate.eligibility(&node.id, node.mode);

            if let (Some(reason), false) = (node.retirement.reason(), self.include_retired) {
                excluded.push(ExcludedNode {
                    id: node.id.clone(),
                    kind: ExclusionKind::Retired,
                    reason: reason.to_string(),
                });
            } else if let Some(reason) = node.policy.reason() {
                excluded.push(ExcludedNode {
                    id: node.id.clone(),
                    kind: ExclusionKind::Policy,
                    reason: reason.to_string(),
                });
            }
        }

        if excluded.is_empty() {
            return (nodes, excluded);
        }

        let mut dependents: HashMap<&PackageId, Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            for dep in &node.build_deps {
                dependents.entry(dep).or_default().push(i);
            }
        }

        let excluded_ids: HashSet<&PackageId> = excluded.iter().map(|e| &e.id).collect();
        let mut blocked: BTreeMap<usize, String> = BTreeMap::new();
        for exclusion in &excluded {
            info!("Excluding {}: {}", exclusion.id, exclusion.reason);
            let mut queue = VecDeque::from([&exclusion.id]);
            while let Some(current) = queue.pop_front() {
                for &i in dependents.get(current).map(Vec::as_slice).unwrap_or(&[]) {
                    let dependent = &nodes[i].id;
                    if excluded_ids.contains(dependent) || blocked.contains_key(&i) {
                        continue;
                    }
                    blocked.insert(
                        i,
                        format!("depends on excluded package {} ({})", exclusion.id, exclusion.reason),
                    );
                    queue.push_back(dependent);
                }
            }
        }

        let mut kept = Vec::with_capacity(nodes.len());
        for (i, mut node) in nodes.into_iter().enumerate() {
            if excluded_ids.contains(&node.id) {
                continue;
            }
            if let Some(reason) = blocked.remove(&i) {
                debug!("{} blocked: {}", node.id, reason);
                node.status = NodeStatus::SkippedBlocked;
                node.reason = Some(reason);
            }
            kept.push(node);
        }

        (kept, excluded)
    }
}
