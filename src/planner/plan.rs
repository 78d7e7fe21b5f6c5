//! Plan types and construction.
//!
//! A plan is the ordered list of operations computed against one snapshot
//! baseline. Saved plans are JSON files; they only hold display values, so
//! secrets never reach them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::config::ConfigHasher;
use crate::error::{DeckhandError, PlanError, Result};
use crate::graph::ResourceId;
use crate::state::Snapshot;

use super::diff::{Action, AttrChange, DiffResult};

/// Current saved plan format version.
pub const PLAN_FORMAT_VERSION: &str = "1";

/// A complete plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Saved plan format version.
    pub format_version: String,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Lineage of the snapshot the plan was computed against.
    pub lineage: String,
    /// Serial of the snapshot the plan was computed against.
    pub serial: u64,
    /// Operations in execution order.
    pub operations: Vec<PlannedOperation>,
    /// Operation counts.
    pub summary: PlanSummary,
}

/// A single planned operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedOperation {
    /// Operation type.
    pub action: Action,
    /// Target resource.
    pub resource: ResourceId,
    /// Remote id from the snapshot, if tracked.
    #[serde(default)]
    pub remote_id: Option<String>,
    /// Why this operation is needed.
    pub reason: String,
    /// Attribute changes driving the operation.
    #[serde(default)]
    pub changes: Vec<AttrChange>,
}

/// Operation counts of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update in place.
    pub update: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Resources to delete.
    pub delete: usize,
    /// Resources left alone.
    pub unchanged: usize,
}

impl Plan {
    /// Creates a plan from a diff result.
    #[must_use]
    pub fn from_diff(diff: &DiffResult, snapshot: &Snapshot, config_hash: &str) -> Self {
        let operations: Vec<PlannedOperation> = diff
            .operations()
            .map(|(d, action)| PlannedOperation {
                action,
                resource: d.id.clone(),
                remote_id: d.remote_id.clone(),
                reason: reason(action, &d.changes),
                changes: d.changes.clone(),
            })
            .collect();

        debug!("Planned {} operations", operations.len());

        Self {
            format_version: PLAN_FORMAT_VERSION.to_string(),
            created_at: Utc::now(),
            project: snapshot.project.clone(),
            environment: snapshot.environment.clone(),
            config_hash: config_hash.to_string(),
            lineage: snapshot.lineage.clone(),
            serial: snapshot.serial,
            operations,
            summary: PlanSummary {
                create: diff.creates,
                update: diff.updates,
                replace: diff.replaces,
                delete: diff.deletes,
                unchanged: diff.unchanged,
            },
        }
    }

    /// Returns true if there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Checks that the plan still applies to `snapshot` and the configuration.
    ///
    /// Two never-written snapshots are interchangeable even though their
    /// lineages differ.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Conflict` if the baseline moved.
    pub fn verify_baseline(&self, snapshot: &Snapshot, config_hash: &str) -> Result<()> {
        let conflict = |resource: &str, message: String| -> Result<()> {
            Err(DeckhandError::Plan(PlanError::Conflict {
                resource: resource.to_string(),
                message,
            }))
        };

        if self.project != snapshot.project || self.environment != snapshot.environment {
            return conflict(
                "state",
                format!(
                    "plan targets {}/{}, state is {}/{}",
                    self.project, self.environment, snapshot.project, snapshot.environment
                ),
            );
        }

        if !ConfigHasher::hashes_match(&self.config_hash, config_hash) {
            return conflict(
                "configuration",
                String::from("configuration changed since the plan was created"),
            );
        }

        let both_fresh = self.serial == 0 && snapshot.serial == 0;
        if !both_fresh && self.lineage != snapshot.lineage {
            return conflict(
                "state",
                format!("lineage changed from {} to {}", self.lineage, snapshot.lineage),
            );
        }

        if self.serial != snapshot.serial {
            return conflict(
                "state",
                format!("serial moved from {} to {}", self.serial, snapshot.serial),
            );
        }

        Ok(())
    }

    /// Saves the plan as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| DeckhandError::internal(format!("Failed to serialize plan: {e}")))?;
        std::fs::write(path, content)?;
        info!("Plan saved to {}", path.display());
        Ok(())
    }

    /// Loads a saved plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or
    /// `UnknownPlanVersion` for another format version.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let raw: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            DeckhandError::internal(format!("Failed to parse plan {}: {e}", path.display()))
        })?;
        let version = raw
            .get("format_version")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if version != PLAN_FORMAT_VERSION {
            return Err(PlanError::UnknownPlanVersion {
                found: version.to_string(),
            }
            .into());
        }

        serde_json::from_value(raw).map_err(|e| {
            DeckhandError::internal(format!("Failed to parse plan {}: {e}", path.display()))
        })
    }
}

impl PlannedOperation {
    /// Returns a short description of the operation.
    #[must_use]
    pub fn description(&self) -> String {
        format!("{} {}", self.action, self.resource)
    }
}

impl PlanSummary {
    /// Total number of operations.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.unchanged
        )
    }
}

fn reason(action: Action, changes: &[AttrChange]) -> String {
    match action {
        Action::Create => String::from("not in state"),
        Action::Delete => String::from("no longer declared"),
        Action::Update => format!("{} attribute(s) changed", changes.len()),
        Action::Replace => {
            let forcing: Vec<&str> = changes
                .iter()
                .filter(|c| c.forces_replacement)
                .map(|c| c.path.as_str())
                .collect();
            format!("{} cannot change in place", forcing.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::diff::{ChangeValue, ResourceDiff};
    use crate::graph::ResourceKind;
    use crate::state::ResourceState;
    use tempfile::TempDir;

    fn diff() -> DiffResult {
        DiffResult {
            diffs: vec![
                ResourceDiff {
                    id: ResourceId::new(ResourceKind::ObjectBucket, "assets"),
                    action: Some(Action::Replace),
                    changes: vec![AttrChange {
                        path: String::from("bucket"),
                        before: ChangeValue::Known(serde_json::json!("a")),
                        after: ChangeValue::Known(serde_json::json!("b")),
                        forces_replacement: true,
                    }],
                    remote_id: Some(String::from("b-1")),
                },
                ResourceDiff {
                    id: ResourceId::new(ResourceKind::IamRole, "runtime"),
                    action: None,
                    changes: Vec::new(),
                    remote_id: Some(String::from("r-1")),
                },
            ],
            replaces: 1,
            unchanged: 1,
            ..DiffResult::default()
        }
    }

    #[test]
    fn test_from_diff_skips_unchanged() {
        let snapshot = Snapshot::new("stock-dashboard", "dev");
        let plan = Plan::from_diff(&diff(), &snapshot, "abc");

        assert_eq!(plan.operations.len(), 1);
        assert_eq!(plan.operations[0].description(), "replace object_bucket.assets");
        assert_eq!(plan.operations[0].reason, "bucket cannot change in place");
        assert_eq!(plan.summary.total(), 1);
        assert_eq!(plan.lineage, snapshot.lineage);
    }

    #[test]
    fn test_verify_baseline_detects_moved_serial() {
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        snapshot.commit(ResourceState::new(
            ResourceId::new(ResourceKind::IamRole, "runtime"),
            "r-1",
        ));
        let plan = Plan::from_diff(&diff(), &snapshot, "abc");
        assert!(plan.verify_baseline(&snapshot, "abc").is_ok());

        assert!(matches!(
            plan.verify_baseline(&snapshot, "def"),
            Err(DeckhandError::Plan(PlanError::Conflict { .. }))
        ));

        snapshot.forget(&ResourceId::new(ResourceKind::IamRole, "runtime"));
        assert!(matches!(
            plan.verify_baseline(&snapshot, "abc"),
            Err(DeckhandError::Plan(PlanError::Conflict { .. }))
        ));
    }

    #[test]
    fn test_fresh_snapshots_are_interchangeable() {
        let plan = Plan::from_diff(&diff(), &Snapshot::new("stock-dashboard", "dev"), "abc");
        let other = Snapshot::new("stock-dashboard", "dev");
        assert!(plan.verify_baseline(&other, "abc").is_ok());
        assert!(plan.verify_baseline(&Snapshot::new("stock-dashboard", "prod"), "abc").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plan.json");
        let plan = Plan::from_diff(&diff(), &Snapshot::new("p", "dev"), "abc");

        plan.save(&path).unwrap();
        let loaded = Plan::load(&path).unwrap();
        assert_eq!(loaded.operations[0].resource, plan.operations[0].resource);
        assert_eq!(loaded.summary, plan.summary);
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plan.json");
        std::fs::write(&path, r#"{"format_version":"9"}"#).unwrap();

        assert!(matches!(
            Plan::load(&path),
            Err(DeckhandError::Plan(PlanError::UnknownPlanVersion { .. }))
        ));
    }
}
