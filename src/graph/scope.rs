//! Resolution of references against the graph and the snapshot.

use std::collections::BTreeSet;

use crate::config::{Reference, Resolved, ValueSource, VariableValue, Variables};
use crate::state::Snapshot;

use super::dag::ResourceGraph;
use super::resource::{ResourceId, ResourceKind};

/// Resolves `${...}` interpolations for one run.
///
/// Computed outputs come from the snapshot, declared attributes from the
/// graph. Outputs of resources in the pending set are known only after apply.
#[derive(Debug)]
pub struct Scope<'a> {
    graph: &'a ResourceGraph,
    snapshot: &'a Snapshot,
    variables: &'a Variables,
    pending: BTreeSet<ResourceId>,
}

impl<'a> Scope<'a> {
    /// Creates a scope with nothing pending.
    #[must_use]
    pub const fn new(
        graph: &'a ResourceGraph,
        snapshot: &'a Snapshot,
        variables: &'a Variables,
    ) -> Self {
        Self {
            graph,
            snapshot,
            variables,
            pending: BTreeSet::new(),
        }
    }

    /// Marks a resource whose outputs will change during apply.
    pub fn mark_pending(&mut self, id: ResourceId) {
        self.pending.insert(id);
    }
}

impl ValueSource for Scope<'_> {
    fn lookup(&self, reference: &Reference) -> Resolved {
        let Ok(kind) = reference.kind.parse::<ResourceKind>() else {
            return Resolved::Unknown;
        };
        let target = ResourceId::new(kind, reference.name.clone());

        if kind.schema().has_output(&reference.attribute) {
            if self.pending.contains(&target) {
                return Resolved::Unknown;
            }
            let Some(state) = self.snapshot.get(&target) else {
                return Resolved::Unknown;
            };
            if reference.attribute == "id" {
                return Resolved::known(serde_json::Value::String(state.remote_id.clone()));
            }
            return state
                .outputs
                .get(&reference.attribute)
                .map_or(Resolved::Unknown, |v| Resolved::known(v.clone()));
        }

        self.graph
            .get(&target)
            .and_then(|r| r.attributes.get(&reference.attribute))
            .map_or(Resolved::Unknown, |value| value.resolve(self))
    }

    fn variable(&self, name: &str) -> Option<&VariableValue> {
        self.variables.get(name)
    }

    fn salt(&self) -> &str {
        &self.snapshot.lineage
    }
}
