//! Diff engine for comparing the declared graph with the snapshot.
//!
//! This module computes, per resource, whether it must be created, updated
//! in place, replaced, deleted, or left alone, together with the attribute
//! changes driving that decision.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::config::{ConfigHasher, Resolved, Variables};
use crate::error::Result;
use crate::graph::{Resource, ResourceGraph, ResourceId, Scope};
use crate::state::{ResourceState, Snapshot};

/// Engine for computing diffs between the graph and the snapshot.
#[derive(Debug, Default)]
pub struct DiffEngine;

/// Kind of operation planned for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Resource does not exist yet.
    Create,
    /// Resource changes in place.
    Update,
    /// Resource is deleted and created again.
    Replace,
    /// Resource is no longer declared.
    Delete,
}

/// A value as shown in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum ChangeValue {
    /// No value.
    Absent,
    /// A plain value.
    Known(Value),
    /// A value derived from a secret.
    Sensitive,
    /// Known only after apply.
    Unknown,
}

/// Change of a single attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrChange {
    /// Attribute name.
    pub path: String,
    /// Recorded value.
    pub before: ChangeValue,
    /// Declared value.
    pub after: ChangeValue,
    /// Whether this change alone forces a replacement.
    pub forces_replacement: bool,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource identity.
    pub id: ResourceId,
    /// Planned operation, `None` when unchanged.
    pub action: Option<Action>,
    /// Attribute changes.
    pub changes: Vec<AttrChange>,
    /// Remote id from the snapshot, if tracked.
    pub remote_id: Option<String>,
}

/// Complete diff result, in execution order.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// All resource diffs: deletes first, then graph order.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the diff between the graph and the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `MissingVariable` if a variable used by the graph has no value.
    pub fn compute_diff(
        &self,
        graph: &ResourceGraph,
        snapshot: &Snapshot,
        variables: &Variables,
    ) -> Result<DiffResult> {
        variables.require(graph.variables_used())?;

        let mut diffs = Self::orphans(graph, snapshot);
        let mut scope = Scope::new(graph, snapshot, variables);

        for resource in graph.topological_order() {
            let diff = match snapshot.get(&resource.id) {
                None => {
                    debug!("{} needs to be created", resource.id);
                    scope.mark_pending(resource.id.clone());
                    ResourceDiff {
                        id: resource.id.clone(),
                        action: Some(Action::Create),
                        changes: Self::initial_changes(resource, &scope),
                        remote_id: None,
                    }
                }
                Some(state) => {
                    let changes = Self::compare(resource, state, &scope);
                    let action = if changes.is_empty() {
                        None
                    } else if changes.iter().any(|c| c.forces_replacement) {
                        scope.mark_pending(resource.id.clone());
                        Some(Action::Replace)
                    } else {
                        Some(Action::Update)
                    };
                    debug!("{} -> {action:?}", resource.id);
                    ResourceDiff {
                        id: resource.id.clone(),
                        action,
                        changes,
                        remote_id: Some(state.remote_id.clone()),
                    }
                }
            };
            diffs.push(diff);
        }

        Ok(DiffResult::from_diffs(diffs))
    }

    /// Computes the diff that deletes every tracked resource.
    #[must_use]
    pub fn destroy_diff(&self, snapshot: &Snapshot) -> DiffResult {
        DiffResult::from_diffs(Self::orphans(&ResourceGraph::default(), snapshot))
    }

    /// Deletes for tracked resources missing from the graph, dependents first.
    fn orphans(graph: &ResourceGraph, snapshot: &Snapshot) -> Vec<ResourceDiff> {
        let mut remaining: BTreeSet<&ResourceId> = snapshot
            .resources
            .keys()
            .filter(|id| !graph.contains(id))
            .collect();

        let mut ordered = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let ready = remaining
                .iter()
                .filter(|id| {
                    !remaining.iter().any(|other| {
                        snapshot
                            .get(other)
                            .is_some_and(|s| s.dependencies.contains(id))
                    })
                })
                .max_by_key(|id| (snapshot.get(id).map_or(0, |s| s.index), **id))
                .copied();

            // A recorded cycle cannot be ordered; fall back to declaration order.
            let next = ready.or_else(|| {
                remaining
                    .iter()
                    .max_by_key(|id| (snapshot.get(id).map_or(0, |s| s.index), **id))
                    .copied()
            });
            let Some(next) = next else { break };
            remaining.remove(next);
            ordered.push(next);
        }

        ordered
            .into_iter()
            .filter_map(|id| snapshot.get(id))
            .map(|state| {
                debug!("{} is no longer declared", state.id);
                ResourceDiff {
                    id: state.id.clone(),
                    action: Some(Action::Delete),
                    changes: state
                        .attributes
                        .iter()
                        .map(|(path, before)| AttrChange {
                            path: path.clone(),
                            before: ChangeValue::recorded(before),
                            after: ChangeValue::Absent,
                            forces_replacement: false,
                        })
                        .collect(),
                    remote_id: Some(state.remote_id.clone()),
                }
            })
            .collect()
    }

    fn initial_changes(resource: &Resource, scope: &Scope<'_>) -> Vec<AttrChange> {
        resource
            .attributes
            .iter()
            .map(|(path, value)| AttrChange {
                path: path.clone(),
                before: ChangeValue::Absent,
                after: ChangeValue::resolved(&value.resolve(scope)),
                forces_replacement: false,
            })
            .collect()
    }

    fn compare(resource: &Resource, state: &ResourceState, scope: &Scope<'_>) -> Vec<AttrChange> {
        let schema = resource.id.kind.schema();
        let keys: BTreeSet<&String> = resource
            .attributes
            .keys()
            .chain(state.attributes.keys())
            .collect();

        let mut changes = Vec::new();
        for key in keys {
            let declared = resource.attributes.get(key).map(|v| v.resolve(scope));
            let recorded = state.attributes.get(key);

            let changed = match (&declared, recorded) {
                (Some(Resolved::Known(r)), Some(before)) => r.recorded != *before,
                (Some(Resolved::Unknown), _) | (Some(_), None) | (None, Some(_)) => true,
                (None, None) => false,
            };
            if !changed {
                continue;
            }

            changes.push(AttrChange {
                path: key.clone(),
                before: recorded.map_or(ChangeValue::Absent, ChangeValue::recorded),
                after: declared
                    .as_ref()
                    .map_or(ChangeValue::Absent, ChangeValue::resolved),
                forces_replacement: schema.is_immutable(key),
            });
        }
        changes
    }
}

impl DiffResult {
    fn from_diffs(diffs: Vec<ResourceDiff>) -> Self {
        let count = |action: Action| diffs.iter().filter(|d| d.action == Some(action)).count();

        Self {
            creates: count(Action::Create),
            updates: count(Action::Update),
            replaces: count(Action::Replace),
            deletes: count(Action::Delete),
            unchanged: diffs.iter().filter(|d| d.action.is_none()).count(),
            diffs,
        }
    }

    /// Returns true if any resource needs an operation.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates + self.updates + self.replaces + self.deletes > 0
    }

    /// Returns the diffs that carry an operation, in execution order.
    pub fn operations(&self) -> impl Iterator<Item = (&ResourceDiff, Action)> {
        self.diffs.iter().filter_map(|d| d.action.map(|a| (d, a)))
    }
}

impl ChangeValue {
    /// Display form of a value recorded in state.
    #[must_use]
    pub fn recorded(value: &Value) -> Self {
        if ConfigHasher::contains_fingerprint(value) {
            Self::Sensitive
        } else {
            Self::Known(value.clone())
        }
    }

    /// Display form of a freshly resolved value.
    #[must_use]
    pub fn resolved(value: &Resolved) -> Self {
        match value {
            Resolved::Known(r) => Self::recorded(&r.recorded),
            Resolved::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ChangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "(none)"),
            Self::Known(Value::String(s)) => write!(f, "\"{s}\""),
            Self::Known(v) => write!(f, "{v}"),
            Self::Sensitive => write!(f, "(sensitive)"),
            Self::Unknown => write!(f, "(known after apply)"),
        }
    }
}

/// Builds the recorded attributes of a resource as state would hold them.
///
/// Test helper shared by the planner suites.
#[cfg(test)]
pub(crate) fn applied_state(
    graph: &ResourceGraph,
    snapshot: &Snapshot,
    variables: &Variables,
    id: &ResourceId,
    remote_id: &str,
) -> ResourceState {
    let resource = graph.get(id).unwrap_or_else(|| panic!("{id} not in graph"));
    let scope = Scope::new(graph, snapshot, variables);
    let attributes: std::collections::BTreeMap<String, Value> = resource
        .attributes
        .iter()
        .map(|(k, v)| {
            let Resolved::Known(r) = v.resolve(&scope) else {
                panic!("{id}.{k} is not resolvable");
            };
            (k.clone(), r.recorded)
        })
        .collect();

    let mut state = ResourceState::new(id.clone(), remote_id);
    state.attributes = attributes;
    state.dependencies = resource.depends_on.clone();
    state.index = resource.index;
    state
}
