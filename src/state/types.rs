//! State types for the remote state snapshot.
//!
//! The snapshot is the last-confirmed observed state of every managed
//! resource. It is the diff baseline and is mutated only after the provider
//! confirms a resource-level operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{Result, StateError};
use crate::graph::ResourceId;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Maximum number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The complete remote state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// State format version.
    pub version: String,
    /// Identity of this snapshot, fixed for its whole life.
    pub lineage: String,
    /// Incremented on every committed resource-level change.
    pub serial: u64,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Managed resources.
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, ResourceState>,
    /// When the snapshot was last changed.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Recorded state of one managed resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    /// Resource identity.
    pub id: ResourceId,
    /// Identifier assigned by the provider.
    pub remote_id: String,
    /// Declared attributes as last applied. Secrets are fingerprinted.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Outputs returned by the provider.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Dependencies at the time of the last apply.
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// Declaration index at the time of the last apply.
    #[serde(default)]
    pub index: usize,
    /// Provider-side fingerprint of the remote object.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last changed.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunKind,
    /// Snapshot serial after the run.
    pub serial: u64,
    /// Resources affected.
    pub resources: Vec<String>,
    /// Whether the run completed without failures.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Kinds of run recorded in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Plan applied.
    Apply,
    /// Every resource deleted.
    Destroy,
    /// Observed state accepted.
    Refresh,
    /// Resource forgotten with `state rm`.
    Remove,
}

impl Snapshot {
    /// Creates a new empty snapshot with a fresh lineage.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            lineage: Uuid::new_v4().to_string(),
            serial: 0,
            project: project.to_string(),
            environment: environment.to_string(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    /// Returns true if the snapshot tracks `id`.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    /// Records a confirmed resource state and bumps the serial.
    pub fn commit(&mut self, state: ResourceState) {
        self.resources.insert(state.id.clone(), state);
        self.touch();
    }

    /// Drops a resource and bumps the serial.
    pub fn forget(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let removed = self.resources.remove(id);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns the tracked resources that recorded `id` as a dependency.
    #[must_use]
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.resources
            .values()
            .filter(|r| r.dependencies.contains(id))
            .map(|r| &r.id)
            .collect()
    }

    /// Number of tracked resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Checks the snapshot was written in a format this version reads.
    ///
    /// # Errors
    ///
    /// Returns `VersionMismatch` for any other format version.
    pub fn check_version(&self) -> Result<()> {
        if self.version == STATE_VERSION {
            Ok(())
        } else {
            Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            }
            .into())
        }
    }

    /// Checks the snapshot belongs to the given project and environment.
    ///
    /// # Errors
    ///
    /// Returns `ProjectMismatch` otherwise.
    pub fn ensure_matches(&self, project: &str, environment: &str) -> Result<()> {
        if self.project == project && self.environment == environment {
            Ok(())
        } else {
            Err(StateError::ProjectMismatch {
                expected: format!("{project}/{environment}"),
                found: format!("{}/{}", self.project, self.environment),
            }
            .into())
        }
    }
}

impl ResourceState {
    /// Creates a resource state with no attributes or outputs.
    #[must_use]
    pub fn new(id: ResourceId, remote_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            remote_id: remote_id.into(),
            attributes: BTreeMap::new(),
            outputs: BTreeMap::new(),
            dependencies: Vec::new(),
            index: 0,
            fingerprint: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl HistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: RunKind, serial: u64, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            serial,
            resources,
            success: true,
            error: None,
        }
    }

    /// Marks the entry as failed.
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Refresh => "refresh",
            Self::Remove => "remove",
        };
        write!(f, "{op}")
    }
}
