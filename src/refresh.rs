//! Drift detection and snapshot refresh.
//!
//! This module reads every tracked resource back from the provider and
//! compares what it finds with the snapshot. `drift` only reports; `refresh`
//! accepts the observed state into the snapshot.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{PlanError, Result};
use crate::graph::ResourceId;
use crate::provider::{Provider, RemoteObject, RetryPolicy};
use crate::state::{HistoryEntry, ResourceState, RunKind, Snapshot};

/// Reads tracked resources back from the provider.
pub struct Refresher<'a> {
    /// Provider API.
    provider: &'a dyn Provider,
    /// Retry policy for each read.
    retry: RetryPolicy,
}

/// How a resource differs from its snapshot entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriftKind {
    /// The remote object changed since it was recorded.
    Changed {
        /// Fingerprint in the snapshot.
        recorded: Option<String>,
        /// Fingerprint reported by the provider.
        observed: Option<String>,
    },
    /// The remote object no longer exists.
    Missing,
}

/// A drifted resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drift {
    /// Resource identity.
    pub resource: ResourceId,
    /// Remote id in the snapshot.
    pub remote_id: String,
    /// What changed.
    #[serde(flatten)]
    pub kind: DriftKind,
}

/// Result of comparing the snapshot with the provider.
#[derive(Debug, Default, Serialize)]
pub struct DriftReport {
    /// Number of resources read.
    pub checked: usize,
    /// Drifted resources, in snapshot order.
    pub drifted: Vec<Drift>,
    /// Objects as observed, `None` when missing.
    #[serde(skip)]
    observed: BTreeMap<ResourceId, Option<RemoteObject>>,
}

impl<'a> Refresher<'a> {
    /// Creates a refresher with the default retry policy.
    #[must_use]
    pub fn new(provider: &'a dyn Provider) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reads every tracked resource and reports differences.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails permanently or exhausts its retries.
    pub async fn detect(&self, snapshot: &Snapshot) -> Result<DriftReport> {
        info!(
            "Checking {} resources for drift using {}",
            snapshot.len(),
            self.provider.name()
        );

        let mut report = DriftReport::default();

        for state in snapshot.resources.values() {
            let label = state.id.to_string();
            let outcome = self
                .retry
                .run(&label, || self.provider.read(state.id.kind, &state.remote_id))
                .await;
            let observed = outcome.result?;
            report.checked += 1;

            if let Some(kind) = Self::compare(state, observed.as_ref()) {
                warn!("{label} drifted: {kind:?}");
                report.drifted.push(Drift {
                    resource: state.id.clone(),
                    remote_id: state.remote_id.clone(),
                    kind,
                });
            } else {
                debug!("{label} is in sync");
            }
            report.observed.insert(state.id.clone(), observed);
        }

        Ok(report)
    }

    /// Reads every tracked resource and accepts the observed state.
    ///
    /// Missing resources are dropped from the snapshot; changed ones get the
    /// observed outputs and fingerprint. Declared attributes are kept, so the
    /// next plan still compares against what was last applied.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails.
    pub async fn refresh(&self, snapshot: &mut Snapshot) -> Result<DriftReport> {
        let report = self.detect(snapshot).await?;

        for drift in &report.drifted {
            match report.observed.get(&drift.resource) {
                Some(Some(object)) => {
                    if let Some(current) = snapshot.get(&drift.resource) {
                        let mut updated = current.clone();
                        updated.outputs.clone_from(&object.outputs);
                        updated.fingerprint.clone_from(&object.fingerprint);
                        updated.updated_at = chrono::Utc::now();
                        snapshot.commit(updated);
                    }
                }
                _ => {
                    info!("Dropping {} from state", drift.resource);
                    snapshot.forget(&drift.resource);
                }
            }
        }

        if !report.drifted.is_empty() {
            let resources = report.drifted.iter().map(|d| d.resource.to_string()).collect();
            snapshot.add_history(HistoryEntry::new(RunKind::Refresh, snapshot.serial, resources));
        }

        Ok(report)
    }

    fn compare(state: &ResourceState, observed: Option<&RemoteObject>) -> Option<DriftKind> {
        let Some(object) = observed else {
            return Some(DriftKind::Missing);
        };

        let changed = match (&state.fingerprint, &object.fingerprint) {
            (None, None) => state.outputs != object.outputs,
            (recorded, observed) => recorded != observed,
        };

        changed.then(|| DriftKind::Changed {
            recorded: state.fingerprint.clone(),
            observed: object.fingerprint.clone(),
        })
    }
}

impl DriftReport {
    /// Returns true if nothing drifted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty()
    }

    /// Fails if the snapshot no longer describes the remote side.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Conflict` naming the first drifted resource.
    pub fn ensure_converged(&self) -> Result<()> {
        match self.drifted.first() {
            None => Ok(()),
            Some(drift) => Err(PlanError::Conflict {
                resource: drift.resource.to_string(),
                message: match &drift.kind {
                    DriftKind::Missing => format!("{} no longer exists remotely", drift.remote_id),
                    DriftKind::Changed { .. } => {
                        format!("{} changed outside deckhand", drift.remote_id)
                    }
                },
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeckhandError, ProviderError};
    use crate::graph::ResourceKind;
    use crate::provider::MockProvider;

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        for (name, fingerprint) in [("assets", "fp-1"), ("logs", "fp-2")] {
            let mut state =
                ResourceState::new(ResourceId::new(ResourceKind::ObjectBucket, name), name);
            state.fingerprint = Some(fingerprint.to_string());
            snapshot.commit(state);
        }
        snapshot
    }

    fn remote(id: &str, fingerprint: &str) -> RemoteObject {
        RemoteObject {
            id: id.to_string(),
            outputs: BTreeMap::new(),
            fingerprint: Some(fingerprint.to_string()),
        }
    }

    fn provider(assets: Option<RemoteObject>, logs: Option<RemoteObject>) -> MockProvider {
        let mut provider = MockProvider::new();
        provider
            .expect_read()
            .withf(|_, id| id == "assets")
            .returning(move |_, _| Ok(assets.clone()));
        provider
            .expect_read()
            .withf(|_, id| id == "logs")
            .returning(move |_, _| Ok(logs.clone()));
        provider.expect_name().return_const("mock");
        provider
    }

    #[tokio::test]
    async fn test_in_sync() {
        let provider = provider(Some(remote("assets", "fp-1")), Some(remote("logs", "fp-2")));
        let report = Refresher::new(&provider).detect(&snapshot()).await.unwrap();

        assert_eq!(report.checked, 2);
        assert!(report.is_clean());
        assert!(report.ensure_converged().is_ok());
    }

    #[tokio::test]
    async fn test_changed_fingerprint_is_conflict() {
        let provider = provider(Some(remote("assets", "fp-9")), Some(remote("logs", "fp-2")));
        let report = Refresher::new(&provider).detect(&snapshot()).await.unwrap();

        assert_eq!(report.drifted.len(), 1);
        match report.ensure_converged() {
            Err(DeckhandError::Plan(PlanError::Conflict { resource, .. })) => {
                assert_eq!(resource, "object_bucket.assets");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_accepts_observed_state() {
        let provider = provider(Some(remote("assets", "fp-9")), None);
        let mut snapshot = snapshot();
        let serial = snapshot.serial;

        let report = Refresher::new(&provider).refresh(&mut snapshot).await.unwrap();

        assert_eq!(report.drifted.len(), 2);
        assert_eq!(snapshot.len(), 1);
        let assets = snapshot
            .get(&ResourceId::new(ResourceKind::ObjectBucket, "assets"))
            .unwrap();
        assert_eq!(assets.fingerprint.as_deref(), Some("fp-9"));
        assert!(snapshot.serial > serial);
        assert_eq!(snapshot.history.last().unwrap().operation, RunKind::Refresh);
    }

    #[tokio::test]
    async fn test_read_failure_propagates() {
        let mut provider = MockProvider::new();
        provider
            .expect_read()
            .returning(|_, _| Err(ProviderError::AuthenticationFailed {
                message: String::from("bad token"),
            }
            .into()));
        provider.expect_name().return_const("mock");

        let result = Refresher::new(&provider).detect(&snapshot()).await;
        assert!(matches!(
            result,
            Err(DeckhandError::Provider(ProviderError::AuthenticationFailed { .. }))
        ));
    }
}
