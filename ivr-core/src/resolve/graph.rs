// ivr-core/src/resolve/graph.rs
use std::collections::{BTreeMap, BTreeSet};

use ivr_common::dependency::ExclusionSet;
use ivr_common::model::{ArtifactSpec, ModuleId, ModuleRevision, Status};
use ivr_common::VersionConstraint;
use serde::Serialize;

/// A resolved module: the winning revision and how it was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedNode {
    pub module: ModuleRevision,
    pub status: Status,
    /// Revisions that declared a dependency on this module.
    pub callers: BTreeSet<ModuleRevision>,
    /// Configurations of this module that were requested.
    pub confs: BTreeSet<String>,
    /// Exclusions inherited from every path that reaches the node.
    #[serde(skip)]
    pub excludes: ExclusionSet,
    pub depth: usize,
    /// Artifacts to deliver, in declaration order. Empty for the root.
    pub artifacts: Vec<ArtifactSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub caller: ModuleRevision,
    pub callee: ModuleRevision,
    pub constraint: VersionConstraint,
    pub confs: BTreeSet<String>,
    pub forced: bool,
}

/// A revision that lost conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eviction {
    pub module: ModuleRevision,
    pub evicted_by: ModuleRevision,
    pub requested_by: BTreeSet<ModuleRevision>,
}

/// Outcome of a resolution: exactly one revision per module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedGraph {
    pub root: ModuleRevision,
    pub conf: String,
    pub nodes: BTreeMap<ModuleId, ResolvedNode>,
    /// Module ids in breadth-first discovery order, root first.
    pub order: Vec<ModuleId>,
    pub edges: Vec<Edge>,
    pub evicted: Vec<Eviction>,
}

impl ResolvedGraph {
    pub fn node(&self, id: &ModuleId) -> Option<&ResolvedNode> {
        self.nodes.get(id)
    }

    pub fn revision_of(&self, id: &ModuleId) -> Option<&ModuleRevision> {
        self.nodes.get(id).map(|n| &n.module)
    }

    /// Nodes in discovery order.
    pub fn ordered_nodes(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Every node except the root, in discovery order.
    pub fn dependencies(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.ordered_nodes().filter(|n| n.module != self.root)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// First cycle reachable from `start` over `edges`, as a closed path of
/// module ids (`a -> b -> a`). Iterative DFS with an explicit active-path
/// stack so deep graphs cannot overflow.
pub fn find_cycle<'a, I>(start: &ModuleId, edges: I) -> Option<Vec<ModuleId>>
where
    I: IntoIterator<Item = (&'a ModuleId, &'a ModuleId)>,
{
    let mut adjacency: BTreeMap<&ModuleId, BTreeSet<&ModuleId>> = BTreeMap::new();
    for (from, to) in edges {
        adjacency.entry(from).or_default().insert(to);
    }

    let mut done: BTreeSet<&ModuleId> = BTreeSet::new();
    let mut path: Vec<&ModuleId> = Vec::new();
    let mut on_path: BTreeSet<&ModuleId> = BTreeSet::new();
    // (node, index of the next child to visit)
    let mut stack: Vec<(&ModuleId, usize)> = Vec::new();

    let (&root, _) = adjacency.get_key_value(start)?;
    stack.push((root, 0));
    path.push(root);
    on_path.insert(root);

    while let Some((node, next)) = stack.last_mut() {
        let children = adjacency.get(*node);
        let child = children.and_then(|c| c.iter().nth(*next)).copied();
        *next += 1;
        match child {
            Some(child) if on_path.contains(child) => {
                let from = path.iter().position(|p| *p == child).unwrap_or(0);
                let mut cycle: Vec<ModuleId> = path[from..].iter().map(|m| (*m).clone()).collect();
                cycle.push(child.clone());
                return Some(cycle);
            }
            Some(child) if !done.contains(child) => {
                stack.push((child, 0));
                path.push(child);
                on_path.insert(child);
            }
            Some(_) => {}
            None => {
                let (finished, _) = stack.pop()?;
                path.pop();
                on_path.remove(finished);
                done.insert(finished);
            }
        }
    }
    None
}
