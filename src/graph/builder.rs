//! Builds the resource graph from stack declarations.
//!
//! Construction fails before any provider call when identities collide,
//! a reference cannot be resolved, or the dependencies form a cycle.

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

use crate::config::{AttrValue, Reference, StackConfig};
use crate::error::{GraphError, Result};

use super::dag::ResourceGraph;
use super::resource::{Resource, ResourceId, ResourceKind};

/// Builds a [`ResourceGraph`] from a [`StackConfig`].
#[derive(Debug, Default)]
pub struct GraphBuilder;

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parses declarations, resolves references and orders the graph.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateResource`, `UnresolvedReference`,
    /// `CyclicDependency`, or `InvalidInterpolation` for a malformed value.
    pub fn build(&self, config: &StackConfig) -> Result<ResourceGraph> {
        let ids = Self::collect_ids(config)?;

        let mut resources = Vec::with_capacity(config.resources.len());
        for (index, decl) in config.resources.iter().enumerate() {
            let id = ResourceId::new(decl.kind, decl.name.clone());
            let address = id.to_string();

            let mut attributes = BTreeMap::new();
            for (key, raw) in &decl.attributes {
                attributes.insert(key.clone(), AttrValue::parse_attribute(&address, key, raw)?);
            }

            let mut depends_on: Vec<ResourceId> = Vec::new();

            for dep in &decl.depends_on {
                let target = dep
                    .parse::<ResourceId>()
                    .ok()
                    .filter(|t| ids.contains_key(t))
                    .ok_or_else(|| GraphError::UnresolvedReference {
                        resource: address.clone(),
                        reference: dep.clone(),
                    })?;
                push_unique(&mut depends_on, target);
            }

            for value in attributes.values() {
                for reference in value.references() {
                    let target = Self::resolve_reference(config, &ids, &address, reference)?;
                    push_unique(&mut depends_on, target);
                }
                for name in value.variables() {
                    if !config.variables.contains_key(name) {
                        return Err(GraphError::UnresolvedReference {
                            resource: address,
                            reference: format!("${{var.{name}}}"),
                        }
                        .into());
                    }
                }
            }

            resources.push(Resource {
                id,
                attributes,
                depends_on,
                index,
            });
        }

        let mut graph = DiGraph::<ResourceId, ()>::with_capacity(resources.len(), 0);
        for resource in &resources {
            graph.add_node(resource.id.clone());
        }
        for resource in &resources {
            let dependent = NodeIndex::new(resource.index);
            for dep in &resource.depends_on {
                let dependency = NodeIndex::new(ids[dep]);
                graph.update_edge(dependency, dependent, ());
            }
        }

        Self::check_acyclic(&graph)?;
        let order = Self::kahn_order(&graph);

        info!(
            "Built resource graph with {} resources and {} edges",
            graph.node_count(),
            graph.edge_count()
        );

        Ok(ResourceGraph::from_parts(graph, resources, order))
    }

    /// Maps every identity to its declaration index, rejecting duplicates.
    fn collect_ids(config: &StackConfig) -> Result<HashMap<ResourceId, usize>> {
        let mut ids = HashMap::with_capacity(config.resources.len());

        for (index, decl) in config.resources.iter().enumerate() {
            let id = ResourceId::new(decl.kind, decl.name.clone());
            if ids.insert(id.clone(), index).is_some() {
                return Err(GraphError::DuplicateResource {
                    resource: id.to_string(),
                }
                .into());
            }
        }

        Ok(ids)
    }

    /// Checks that a reference names an existing resource and attribute.
    fn resolve_reference(
        config: &StackConfig,
        ids: &HashMap<ResourceId, usize>,
        address: &str,
        reference: &Reference,
    ) -> Result<ResourceId> {
        let unresolved = || GraphError::UnresolvedReference {
            resource: address.to_string(),
            reference: reference.to_string(),
        };

        let kind: ResourceKind = reference.kind.parse().map_err(|_| unresolved())?;
        let target = ResourceId::new(kind, reference.name.clone());
        let &index = ids.get(&target).ok_or_else(unresolved)?;

        let known = kind.schema().has_output(&reference.attribute)
            || config.resources[index]
                .attributes
                .contains_key(&reference.attribute);
        if !known {
            return Err(unresolved().into());
        }

        debug!("{address} depends on {target} via {reference}");
        Ok(target)
    }

    /// Fails with the members of the first cycle, in declaration order.
    fn check_acyclic(graph: &DiGraph<ResourceId, ()>) -> Result<()> {
        let mut cycles: Vec<Vec<NodeIndex>> = tarjan_scc(graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.find_edge(scc[0], scc[0]).is_some())
            .collect();

        for scc in &mut cycles {
            scc.sort_unstable();
        }
        cycles.sort_unstable_by_key(|scc| scc[0]);

        match cycles.first() {
            None => Ok(()),
            Some(members) => Err(GraphError::CyclicDependency {
                cycle: members.iter().map(|&n| graph[n].to_string()).collect(),
            }
            .into()),
        }
    }

    /// Kahn's algorithm, always taking the ready node declared first.
    fn kahn_order(graph: &DiGraph<ResourceId, ()>) -> Vec<usize> {
        let mut in_degree: Vec<usize> = graph
            .node_indices()
            .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for dependent in graph.neighbors_directed(NodeIndex::new(next), Direction::Outgoing) {
                let d = &mut in_degree[dependent.index()];
                *d -= 1;
                if *d == 0 {
                    ready.insert(dependent.index());
                }
            }
        }

        order
    }
}

fn push_unique(deps: &mut Vec<ResourceId>, id: ResourceId) {
    if !deps.contains(&id) {
        deps.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::DeckhandError;

    fn build(resources: &str) -> Result<ResourceGraph> {
        let yaml = format!(
            r"
project:
  name: stock-dashboard
provider:
  endpoint: https://control.example.com
variables:
  dash_password:
    sensitive: true
resources:
{resources}"
        );
        let config = ConfigParser::new().parse_yaml(&yaml, None)?;
        GraphBuilder::new().build(&config)
    }

    fn names(graph: &ResourceGraph) -> Vec<String> {
        graph
            .topological_order()
            .iter()
            .map(|r| r.id.to_string())
            .collect()
    }

    const STACK: &str = r#"
  - kind: compute_service
    name: web
    attributes:
      service_name: dashboard
      image: "${container_registry.app.repository_url}:v1"
      port: 8050
      role_arn: "${iam_role.runtime.arn}"
      environment:
        DASH_PASSWORD: "${var.dash_password}"
  - kind: iam_role
    name: runtime
    attributes:
      name: dashboard-runtime
      assume_role_service: tasks.example.com
  - kind: container_registry
    name: app
    attributes:
      repository_name: dashboard
  - kind: object_bucket
    name: assets
    attributes:
      bucket: dashboard-assets
"#;

    #[test]
    fn test_dependencies_land_first() {
        let graph = build(STACK).unwrap();

        assert_eq!(
            names(&graph),
            vec![
                "iam_role.runtime",
                "container_registry.app",
                "compute_service.web",
                "object_bucket.assets",
            ]
        );
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let graph = build(
            r"
  - kind: object_bucket
    name: b
    attributes: {bucket: b}
  - kind: object_bucket
    name: a
    attributes: {bucket: a}
  - kind: container_registry
    name: c
    attributes: {repository_name: c}
",
        )
        .unwrap();

        assert_eq!(
            names(&graph),
            vec!["object_bucket.b", "object_bucket.a", "container_registry.c"]
        );
    }

    #[test]
    fn test_neighbors_and_variables() {
        let graph = build(STACK).unwrap();
        let web: ResourceId = "compute_service.web".parse().unwrap();
        let role: ResourceId = "iam_role.runtime".parse().unwrap();

        assert_eq!(graph.dependencies_of(&web).len(), 2);
        assert_eq!(graph.dependents_of(&role), vec![&web]);
        assert!(graph.transitive_dependents(&role).contains(&web));
        assert_eq!(graph.variables_used().into_iter().collect::<Vec<_>>(), vec!["dash_password"]);
    }

    #[test]
    fn test_cycle_lists_members() {
        let err = build(
            r"
  - kind: iam_role
    name: a
    depends_on: [iam_policy.b]
    attributes: {name: a, assume_role_service: x}
  - kind: iam_policy
    name: b
    attributes:
      name: b
      document: '${iam_role.a.arn}'
",
        )
        .unwrap_err();

        match err {
            DeckhandError::Graph(GraphError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["iam_role.a", "iam_policy.b"]);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let err = build(
            r"
  - kind: object_bucket
    name: a
    attributes:
      bucket: a
      tag: '${object_bucket.a.bucket}'
",
        )
        .unwrap_err();

        assert!(matches!(
            err,
            DeckhandError::Graph(GraphError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_unresolved_target() {
        let err = build(
            r"
  - kind: iam_role_policy_attachment
    name: attach
    attributes:
      role: '${iam_role.missing.name}'
      policy_arn: arn:policy
",
        )
        .unwrap_err();

        match err {
            DeckhandError::Graph(GraphError::UnresolvedReference { resource, reference }) => {
                assert_eq!(resource, "iam_role_policy_attachment.attach");
                assert_eq!(reference, "${iam_role.missing.name}");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_unknown_output_is_unresolved() {
        let err = build(
            r"
  - kind: container_registry
    name: app
    attributes: {repository_name: app}
  - kind: object_bucket
    name: logs
    attributes:
      bucket: '${container_registry.app.service_url}'
",
        )
        .unwrap_err();

        assert!(matches!(
            err,
            DeckhandError::Graph(GraphError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_undeclared_variable_is_unresolved() {
        let err = build(
            r"
  - kind: object_bucket
    name: a
    attributes:
      bucket: '${var.nope}'
",
        )
        .unwrap_err();

        assert!(err.to_string().contains("${var.nope}"));
    }

    #[test]
    fn test_duplicate_identity() {
        let err = build(
            r"
  - kind: object_bucket
    name: a
    attributes: {bucket: a}
  - kind: object_bucket
    name: a
    attributes: {bucket: b}
",
        )
        .unwrap_err();

        assert!(matches!(
            err,
            DeckhandError::Graph(GraphError::DuplicateResource { .. })
        ));
    }
}
