//! The resolved resource dependency graph.
//!
//! Nodes are added in declaration order, so a node's petgraph index equals
//! the resource's declaration index. Edges point from a dependency to its
//! dependent: `dependency -> dependent` means the dependency must reach its
//! desired state first.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{BTreeSet, HashMap};

use super::resource::{Resource, ResourceId};

/// A DAG of declared resources.
#[derive(Debug, Default)]
pub struct ResourceGraph {
    /// The underlying directed graph.
    graph: DiGraph<ResourceId, ()>,
    /// Map from identity to node index.
    node_map: HashMap<ResourceId, NodeIndex>,
    /// Resources by declaration index.
    resources: Vec<Resource>,
    /// Declaration indices in topological order.
    order: Vec<usize>,
}

impl ResourceGraph {
    /// Assembles a graph from parts already checked by the builder.
    pub(super) fn from_parts(
        graph: DiGraph<ResourceId, ()>,
        resources: Vec<Resource>,
        order: Vec<usize>,
    ) -> Self {
        let node_map = graph
            .node_indices()
            .filter_map(|idx| graph.node_weight(idx).map(|id| (id.clone(), idx)))
            .collect();

        Self {
            graph,
            node_map,
            resources,
            order,
        }
    }

    /// Returns all resources in declaration order.
    #[must_use]
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Gets a resource by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.node_map.get(id).map(|idx| &self.resources[idx.index()])
    }

    /// Returns true if the graph declares `id`.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.node_map.contains_key(id)
    }

    /// Returns resources in dependency order, ties broken by declaration order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&Resource> {
        self.order.iter().map(|&i| &self.resources[i]).collect()
    }

    /// Returns the direct dependencies of a resource.
    #[must_use]
    pub fn dependencies_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Returns the resources that directly depend on `id`.
    #[must_use]
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Returns every resource that depends on `id`, directly or not.
    #[must_use]
    pub fn transitive_dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        let Some(&start) = self.node_map.get(id) else {
            return BTreeSet::new();
        };

        let mut found = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                found.insert(self.graph[idx].clone());
            }
        }
        found
    }

    /// Returns the names of all variables referenced by any resource.
    #[must_use]
    pub fn variables_used(&self) -> BTreeSet<&str> {
        self.resources
            .iter()
            .flat_map(|r| r.attributes.values())
            .flat_map(|v| v.variables())
            .collect()
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn neighbors(&self, id: &ResourceId, direction: Direction) -> Vec<&ResourceId> {
        let Some(&idx) = self.node_map.get(id) else {
            return Vec::new();
        };

        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort_unstable();
        found.dedup();
        found.into_iter().map(|n| &self.graph[n]).collect()
    }
}
