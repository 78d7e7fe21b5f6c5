//! Plan executor for applying plans against the provider.
//!
//! Operations run one at a time in plan order. The snapshot entry of a
//! resource changes only after the provider confirms the operation. Error
//! messages are scrubbed of sensitive variable values before they are logged
//! or reported.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::config::{AttrValue, Redactor, Resolved, Variables};
use crate::error::{ApplyError, DeckhandError, ProviderError, Result};
use crate::graph::{Resource, ResourceGraph, ResourceId, Scope};
use crate::provider::{Provider, RemoteObject, ResourceRequest, RetryPolicy};
use crate::state::{HistoryEntry, ResourceState, RunKind, Snapshot, StateStore};

use super::diff::Action;
use super::plan::{Plan, PlannedOperation};

/// Executor for plans.
pub struct PlanExecutor<'a> {
    /// Provider API.
    provider: &'a dyn Provider,
    /// Graph the plan was computed from.
    graph: &'a ResourceGraph,
    /// Variable values.
    variables: &'a Variables,
    /// Retry policy for each provider call.
    retry: RetryPolicy,
    /// Whether independent operations proceed after a failure.
    continue_on_error: bool,
    /// Store receiving the snapshot after every committed step.
    checkpoint: Option<&'a dyn StateStore>,
    /// State lock renewed before every operation and checkpoint.
    lease: Option<&'a str>,
    /// Kind of run recorded in history.
    run_kind: RunKind,
}

/// Final status of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Confirmed by the provider.
    Applied,
    /// Attempted and failed.
    Failed,
    /// Never attempted.
    Skipped,
}

/// Result of one operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    /// Target resource.
    pub resource: ResourceId,
    /// Operation type.
    pub action: Action,
    /// Final status.
    pub status: OutcomeStatus,
    /// Provider calls made.
    pub attempts: u32,
    /// Remote id after the operation.
    pub remote_id: Option<String>,
    /// Error message, if failed or skipped.
    pub error: Option<String>,
}

/// Result of executing a whole plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    /// Per-operation outcomes, in plan order.
    pub outcomes: Vec<OperationOutcome>,
    /// Number of applied operations.
    pub succeeded: usize,
    /// Number of failed operations.
    pub failed: usize,
    /// Number of skipped operations.
    pub skipped: usize,
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub fn new(
        provider: &'a dyn Provider,
        graph: &'a ResourceGraph,
        variables: &'a Variables,
    ) -> Self {
        Self {
            provider,
            graph,
            variables,
            retry: RetryPolicy::default(),
            continue_on_error: false,
            checkpoint: None,
            lease: None,
            run_kind: RunKind::Apply,
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets whether to continue on errors.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Saves the snapshot to `store` after every committed step.
    #[must_use]
    pub const fn with_checkpoint(mut self, store: &'a dyn StateStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    /// Renews the lock `lock_id` in the checkpoint store as the run progresses.
    ///
    /// The run stops with `StateError::LockLost` once the lock has been
    /// taken over, before the next provider call or snapshot write.
    #[must_use]
    pub const fn with_lease(mut self, lock_id: &'a str) -> Self {
        self.lease = Some(lock_id);
        self
    }

    /// Sets the kind of run recorded in history.
    #[must_use]
    pub const fn with_run_kind(mut self, run_kind: RunKind) -> Self {
        self.run_kind = run_kind;
        self
    }

    /// Executes a plan, updating `snapshot` as operations succeed.
    ///
    /// Operation failures are reported in the [`ApplyReport`], not as errors.
    ///
    /// # Errors
    ///
    /// Returns `MissingVariable` before any provider call if a variable used
    /// by the graph has no value. Otherwise returns an error only if the
    /// state lock was lost or a checkpoint cannot be written.
    pub async fn execute(&self, plan: &Plan, snapshot: &mut Snapshot) -> Result<ApplyReport> {
        info!("Executing plan with {} operations", plan.operations.len());

        self.variables.require(self.graph.variables_used())?;

        if plan.is_empty() {
            return Ok(ApplyReport::default());
        }

        let redactor = self.variables.redactor();
        let mut report = ApplyReport::default();
        let mut blocked: BTreeSet<ResourceId> = BTreeSet::new();
        let mut aborted = false;

        for op in &plan.operations {
            if aborted || self.is_blocked(op, snapshot, &blocked) {
                warn!("Skipping {}", op.description());
                blocked.insert(op.resource.clone());
                report.push(OperationOutcome {
                    resource: op.resource.clone(),
                    action: op.action,
                    status: OutcomeStatus::Skipped,
                    attempts: 0,
                    remote_id: op.remote_id.clone(),
                    error: Some(String::from("skipped after an earlier failure")),
                });
                continue;
            }

            self.renew_lease().await?;
            info!("{}", op.description());
            let mut attempts = 0;
            let result = self.apply_operation(op, snapshot, &mut attempts).await;

            match result {
                Ok(remote_id) => {
                    info!("{} done", op.description());
                    report.push(OperationOutcome {
                        resource: op.resource.clone(),
                        action: op.action,
                        status: OutcomeStatus::Applied,
                        attempts,
                        remote_id,
                        error: None,
                    });
                }
                Err(e @ DeckhandError::State(_)) => return Err(e),
                Err(e) => {
                    let message = redactor.redact(&e.to_string());
                    error!("{} failed: {message}", op.description());
                    blocked.insert(op.resource.clone());
                    if !self.continue_on_error {
                        aborted = true;
                    }
                    report.push(OperationOutcome {
                        resource: op.resource.clone(),
                        action: op.action,
                        status: OutcomeStatus::Failed,
                        attempts,
                        remote_id: snapshot.get(&op.resource).map(|s| s.remote_id.clone()),
                        error: Some(message),
                    });
                }
            }
        }

        let applied = report
            .outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Applied)
            .map(|o| o.resource.to_string())
            .collect();
        let mut entry = HistoryEntry::new(self.run_kind, snapshot.serial, applied);
        if let Some(first) = report.outcomes.iter().find(|o| o.status == OutcomeStatus::Failed) {
            entry = entry.failed(format!(
                "{}: {}",
                first.resource,
                first.error.as_deref().unwrap_or("failed")
            ));
        }
        snapshot.add_history(entry);
        self.save_checkpoint(snapshot).await?;

        info!(
            "Apply finished: {} succeeded, {} failed, {} skipped",
            report.succeeded, report.failed, report.skipped
        );

        Ok(report)
    }

    /// Returns true if a dependency of `op` failed or was skipped.
    fn is_blocked(
        &self,
        op: &PlannedOperation,
        snapshot: &Snapshot,
        blocked: &BTreeSet<ResourceId>,
    ) -> bool {
        match op.action {
            Action::Delete => snapshot
                .dependents_of(&op.resource)
                .into_iter()
                .any(|d| blocked.contains(d)),
            Action::Create | Action::Update | Action::Replace => self
                .graph
                .dependencies_of(&op.resource)
                .into_iter()
                .any(|d| blocked.contains(d)),
        }
    }

    async fn apply_operation(
        &self,
        op: &PlannedOperation,
        snapshot: &mut Snapshot,
        attempts: &mut u32,
    ) -> Result<Option<String>> {
        match op.action {
            Action::Create => self.create(op, snapshot, attempts).await.map(Some),
            Action::Update => self.update(op, snapshot, attempts).await.map(Some),
            Action::Delete => {
                self.delete(op, snapshot, attempts).await?;
                Ok(None)
            }
            Action::Replace => {
                self.delete(op, snapshot, attempts).await?;
                self.create(op, snapshot, attempts).await.map(Some)
            }
        }
    }

    async fn create(
        &self,
        op: &PlannedOperation,
        snapshot: &mut Snapshot,
        attempts: &mut u32,
    ) -> Result<String> {
        let resource = self.resource(&op.resource)?;
        let (request, recorded) = self.resolve(resource, snapshot)?;

        let label = op.resource.to_string();
        let outcome = self
            .retry
            .run(&label, || self.provider.create(&request))
            .await;
        *attempts += outcome.attempts;
        let object = outcome.result?;
        debug!("{label} created as {}", object.id);

        let remote_id = object.id.clone();
        snapshot.commit(Self::state_for(resource, object, recorded));
        self.save_checkpoint(snapshot).await?;
        Ok(remote_id)
    }

    async fn update(
        &self,
        op: &PlannedOperation,
        snapshot: &mut Snapshot,
        attempts: &mut u32,
    ) -> Result<String> {
        let resource = self.resource(&op.resource)?;
        let (remote_id, created_at) = match snapshot.get(&op.resource) {
            Some(state) => (state.remote_id.clone(), Some(state.created_at)),
            None => (self.recorded_remote_id(op)?, None),
        };
        let (request, recorded) = self.resolve(resource, snapshot)?;

        let label = op.resource.to_string();
        let outcome = self
            .retry
            .run(&label, || self.provider.update(&remote_id, &request))
            .await;
        *attempts += outcome.attempts;
        let object = outcome.result?;

        let remote_id = object.id.clone();
        let mut state = Self::state_for(resource, object, recorded);
        if let Some(created_at) = created_at {
            state.created_at = created_at;
        }
        snapshot.commit(state);
        self.save_checkpoint(snapshot).await?;
        Ok(remote_id)
    }

    async fn delete(
        &self,
        op: &PlannedOperation,
        snapshot: &mut Snapshot,
        attempts: &mut u32,
    ) -> Result<()> {
        let remote_id = match snapshot.get(&op.resource) {
            Some(state) => state.remote_id.clone(),
            None => self.recorded_remote_id(op)?,
        };

        let label = op.resource.to_string();
        let kind = op.resource.kind;
        let outcome = self
            .retry
            .run(&label, || self.provider.delete(kind, &remote_id))
            .await;
        *attempts += outcome.attempts;

        match outcome.result {
            Ok(()) => debug!("{label} deleted"),
            Err(DeckhandError::Provider(ProviderError::NotFound { .. })) => {
                info!("{label} was already gone");
            }
            Err(e) => return Err(e),
        }

        snapshot.forget(&op.resource);
        self.save_checkpoint(snapshot).await
    }

    fn recorded_remote_id(&self, op: &PlannedOperation) -> Result<String> {
        op.remote_id.clone().ok_or_else(|| {
            DeckhandError::internal(format!("{} has no remote id in state", op.resource))
        })
    }

    fn resource(&self, id: &ResourceId) -> Result<&'a Resource> {
        self.graph
            .get(id)
            .ok_or_else(|| DeckhandError::internal(format!("{id} is not declared")))
    }

    /// Resolves every attribute against the current snapshot.
    fn resolve(
        &self,
        resource: &Resource,
        snapshot: &Snapshot,
    ) -> Result<(ResourceRequest, BTreeMap<String, Value>)> {
        let scope = Scope::new(self.graph, snapshot, self.variables);
        let mut wire = serde_json::Map::new();
        let mut recorded = BTreeMap::new();

        for (key, value) in &resource.attributes {
            let Resolved::Known(resolution) = value.resolve(&scope) else {
                return Err(ApplyError::Unresolvable {
                    resource: resource.id.to_string(),
                    reference: unresolved(key, value),
                }
                .into());
            };
            wire.insert(key.clone(), resolution.wire);
            recorded.insert(key.clone(), resolution.recorded);
        }

        let request = ResourceRequest {
            id: resource.id.clone(),
            project: snapshot.project.clone(),
            environment: snapshot.environment.clone(),
            attributes: wire,
        };
        Ok((request, recorded))
    }

    fn state_for(
        resource: &Resource,
        object: RemoteObject,
        recorded: BTreeMap<String, Value>,
    ) -> ResourceState {
        let mut state = ResourceState::new(resource.id.clone(), object.id);
        state.attributes = recorded;
        state.outputs = object.outputs;
        state.fingerprint = object.fingerprint;
        state.dependencies.clone_from(&resource.depends_on);
        state.index = resource.index;
        state
    }

    async fn renew_lease(&self) -> Result<()> {
        if let (Some(store), Some(lock_id)) = (self.checkpoint, self.lease) {
            store.renew_lock(lock_id).await?;
        }
        Ok(())
    }

    async fn save_checkpoint(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(store) = self.checkpoint {
            self.renew_lease().await?;
            store.save(snapshot).await?;
        }
        Ok(())
    }
}

/// Names what kept an attribute from resolving.
fn unresolved(key: &str, value: &AttrValue) -> String {
    value
        .references()
        .first()
        .map(ToString::to_string)
        .or_else(|| value.variables().first().map(|v| format!("${{var.{v}}}")))
        .unwrap_or_else(|| format!("attribute '{key}'"))
}

impl fmt::Debug for PlanExecutor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("provider", &self.provider.name())
            .field("resources", &self.graph.len())
            .field("retry", &self.retry)
            .field("continue_on_error", &self.continue_on_error)
            .field("leased", &self.lease.is_some())
            .field("run_kind", &self.run_kind)
            .finish_non_exhaustive()
    }
}

impl ApplyReport {
    fn push(&mut self, outcome: OperationOutcome) {
        match outcome.status {
            OutcomeStatus::Applied => self.succeeded += 1,
            OutcomeStatus::Failed => self.failed += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Returns true if every operation was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Converts a partial run into `ApplyError::Incomplete`.
    ///
    /// # Errors
    ///
    /// Returns an error if any operation failed or was skipped.
    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(ApplyError::Incomplete {
                succeeded: self.succeeded,
                failed: self.failed,
                skipped: self.skipped,
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, VariableValue};
    use crate::error::{ConfigError, StateError};
    use crate::graph::{GraphBuilder, ResourceKind};
    use crate::planner::diff::{DiffEngine, applied_state};
    use crate::provider::MockProvider;
    use crate::state::{LocalStateStore, STATE_DIR, StateLock};
    use serde_json::json;
    use tempfile::TempDir;

    const CHAIN: &str = r#"
project:
  name: stock-dashboard
provider:
  endpoint: https://control.example.com
resources:
  - kind: iam_role
    name: a
    attributes:
      name: a
      assume_role_service: tasks.example.com
  - kind: iam_policy
    name: b
    attributes:
      name: b
      document: "${iam_role.a.arn}"
  - kind: iam_role_policy_attachment
    name: c
    attributes:
      role: "${iam_role.a.name}"
      policy_arn: "${iam_policy.b.arn}"
  - kind: object_bucket
    name: d
    attributes:
      bucket: dashboard-assets
"#;

    fn graph(yaml: &str) -> ResourceGraph {
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        GraphBuilder::new().build(&config).unwrap()
    }

    fn plan_for(graph: &ResourceGraph, snapshot: &Snapshot) -> Plan {
        let diff = DiffEngine::new()
            .compute_diff(graph, snapshot, &Variables::new())
            .unwrap();
        Plan::from_diff(&diff, snapshot, "hash")
    }

    fn object(id: &str) -> RemoteObject {
        let mut outputs = BTreeMap::new();
        outputs.insert(String::from("arn"), json!(format!("arn:{id}")));
        RemoteObject {
            id: id.to_string(),
            outputs,
            fingerprint: Some(format!("fp-{id}")),
        }
    }

    fn named(name: &'static str) -> impl Fn(&ResourceRequest) -> bool {
        move |r: &ResourceRequest| r.id.name == name
    }

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_operations() {
        let graph = graph(CHAIN);
        let vars = Variables::new();
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        let plan = plan_for(&graph, &snapshot);

        let mut provider = MockProvider::new();
        provider
            .expect_create()
            .withf(named("a"))
            .times(1)
            .returning(|_| Ok(object("role-a")));
        provider
            .expect_create()
            .withf(named("b"))
            .times(1)
            .returning(|_| Err(ProviderError::rejected(400, "malformed document").into()));
        provider.expect_name().return_const("mock");

        let temp = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(temp.path().join(STATE_DIR));

        let report = PlanExecutor::new(&provider, &graph, &vars)
            .with_retry(RetryPolicy::immediate(4))
            .with_checkpoint(&store)
            .execute(&plan, &mut snapshot)
            .await
            .unwrap();

        assert_eq!((report.succeeded, report.failed, report.skipped), (1, 1, 2));
        assert_eq!(report.outcomes[2].status, OutcomeStatus::Skipped);
        assert!(report.ensure_complete().is_err());

        assert!(snapshot.contains(&id("iam_role.a")));
        assert!(!snapshot.contains(&id("iam_policy.b")));
        assert!(!snapshot.contains(&id("iam_role_policy_attachment.c")));
        assert!(!snapshot.history[0].success);

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved, snapshot);
    }

    #[tokio::test]
    async fn test_continue_on_error_skips_only_dependents() {
        let graph = graph(CHAIN);
        let vars = Variables::new();
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        let plan = plan_for(&graph, &snapshot);

        let mut provider = MockProvider::new();
        provider
            .expect_create()
            .withf(named("a"))
            .returning(|_| Ok(object("role-a")));
        provider
            .expect_create()
            .withf(named("b"))
            .returning(|_| Err(ProviderError::rejected(400, "malformed document").into()));
        provider
            .expect_create()
            .withf(named("d"))
            .times(1)
            .returning(|_| Ok(object("bucket-d")));
        provider.expect_name().return_const("mock");

        let report = PlanExecutor::new(&provider, &graph, &vars)
            .with_retry(RetryPolicy::immediate(4))
            .with_continue_on_error(true)
            .execute(&plan, &mut snapshot)
            .await
            .unwrap();

        assert_eq!((report.succeeded, report.failed, report.skipped), (2, 1, 1));
        let c = report
            .outcomes
            .iter()
            .find(|o| o.resource == id("iam_role_policy_attachment.c"))
            .unwrap();
        assert_eq!(c.status, OutcomeStatus::Skipped);
        assert!(snapshot.contains(&id("object_bucket.d")));
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let graph = graph(CHAIN);
        let vars = Variables::new();
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        let plan = plan_for(&graph, &snapshot);

        let mut provider = MockProvider::new();
        provider
            .expect_create()
            .withf(named("a"))
            .times(3)
            .returning({
                let mut calls = 0;
                move |_| {
                    calls += 1;
                    if calls < 3 {
                        Err(ProviderError::transient(503, "eventual consistency").into())
                    } else {
                        Ok(object("role-a"))
                    }
                }
            });
        provider
            .expect_create()
            .withf(|r: &ResourceRequest| r.id.name != "a")
            .returning(|r| Ok(object(&format!("{}-1", r.id.name))));
        provider.expect_name().return_const("mock");

        let report = PlanExecutor::new(&provider, &graph, &vars)
            .with_retry(RetryPolicy::immediate(4))
            .execute(&plan, &mut snapshot)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.outcomes[0].attempts, 3);
        assert_eq!(snapshot.get(&id("iam_role.a")).unwrap().remote_id, "role-a");

        // b was resolved against a's confirmed outputs
        let b = snapshot.get(&id("iam_policy.b")).unwrap();
        assert_eq!(b.attributes["document"], json!("arn:role-a"));
    }

    #[tokio::test]
    async fn test_replace_deletes_then_creates() {
        let v1 = graph(CHAIN);
        let vars = Variables::new();
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        for resource in v1.topological_order() {
            let mut state =
                applied_state(&v1, &snapshot, &vars, &resource.id, &format!("{}-old", resource.id.name));
            state.outputs.insert(String::from("arn"), json!(format!("arn:{}", resource.id.name)));
            snapshot.commit(state);
        }

        let v2 = graph(&CHAIN.replace("bucket: dashboard-assets", "bucket: dashboard-assets-2"));
        let plan = plan_for(&v2, &snapshot);
        assert_eq!(plan.operations.len(), 1);
        assert_eq!(plan.operations[0].action, Action::Replace);

        let mut provider = MockProvider::new();
        let mut seq = mockall::Sequence::new();
        provider
            .expect_delete()
            .withf(|kind, remote_id| *kind == ResourceKind::ObjectBucket && remote_id == "d-old")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|kind, remote_id| {
                Err(ProviderError::NotFound {
                    kind: kind.to_string(),
                    remote_id: remote_id.to_string(),
                }
                .into())
            });
        provider
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(object("d-new")));
        provider.expect_name().return_const("mock");

        let report = PlanExecutor::new(&provider, &v2, &vars)
            .with_retry(RetryPolicy::immediate(2))
            .execute(&plan, &mut snapshot)
            .await
            .unwrap();

        assert!(report.is_success());
        let d = snapshot.get(&id("object_bucket.d")).unwrap();
        assert_eq!(d.remote_id, "d-new");
        assert_eq!(d.attributes["bucket"], json!("dashboard-assets-2"));
    }

    #[tokio::test]
    async fn test_unresolvable_reference_fails_operation() {
        let graph = graph(CHAIN);
        let vars = Variables::new();
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        let plan = plan_for(&graph, &snapshot);

        // a is created but reports no arn, so b cannot be resolved
        let mut provider = MockProvider::new();
        provider.expect_create().withf(named("a")).returning(|_| {
            Ok(RemoteObject {
                id: String::from("role-a"),
                ..RemoteObject::default()
            })
        });
        provider.expect_name().return_const("mock");

        let report = PlanExecutor::new(&provider, &graph, &vars)
            .with_retry(RetryPolicy::immediate(4))
            .execute(&plan, &mut snapshot)
            .await
            .unwrap();

        let b = &report.outcomes[1];
        assert_eq!(b.status, OutcomeStatus::Failed);
        assert_eq!(b.attempts, 0);
        assert!(b.error.as_deref().unwrap().contains("${iam_role.a.arn}"));
    }

    const WITH_SECRET: &str = r#"
project:
  name: stock-dashboard
provider:
  endpoint: https://control.example.com
variables:
  dash_password:
    sensitive: true
    env: DASH_PASSWORD
resources:
  - kind: object_bucket
    name: d
    attributes:
      bucket: dashboard-assets
  - kind: compute_service
    name: web
    attributes:
      service_name: stock-dashboard
      image: "registry.example.com/stock-dashboard:v1"
      port: 8050
      environment:
        DASH_PASSWORD: "${var.dash_password}"
"#;

    fn tracked(graph: &ResourceGraph) -> Snapshot {
        let vars = Variables::new();
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        for resource in graph.topological_order() {
            let mut state =
                applied_state(graph, &snapshot, &vars, &resource.id, &format!("{}-1", resource.id.name));
            state.outputs.insert(String::from("arn"), json!(format!("arn:{}", resource.id.name)));
            snapshot.commit(state);
        }
        snapshot
    }

    #[tokio::test]
    async fn test_missing_variable_fails_before_any_call() {
        let graph = graph(WITH_SECRET);
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        let planned = Variables::new().with_value("dash_password", VariableValue::secret("hunter2"));
        let diff = DiffEngine::new()
            .compute_diff(&graph, &snapshot, &planned)
            .unwrap();
        let plan = Plan::from_diff(&diff, &snapshot, "hash");
        assert_eq!(plan.operations.len(), 2);

        // no expectations: any provider call panics
        let provider = MockProvider::new();
        let vars = Variables::new();

        let err = PlanExecutor::new(&provider, &graph, &vars)
            .execute(&plan, &mut snapshot)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeckhandError::Config(ConfigError::MissingVariable { ref name, .. }) if name == "dash_password"
        ));
        assert!(snapshot.is_empty());
        assert!(snapshot.history.is_empty());
    }

    #[tokio::test]
    async fn test_echoed_secret_redacted_from_outcome() {
        let graph = graph(WITH_SECRET);
        let vars = Variables::new().with_value("dash_password", VariableValue::secret("hunter2"));
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        let diff = DiffEngine::new()
            .compute_diff(&graph, &snapshot, &vars)
            .unwrap();
        let plan = Plan::from_diff(&diff, &snapshot, "hash");

        let mut provider = MockProvider::new();
        provider
            .expect_create()
            .withf(named("d"))
            .returning(|_| Ok(object("bucket-d")));
        provider.expect_create().withf(named("web")).returning(|r| {
            let echoed = r.attributes["environment"]["DASH_PASSWORD"].clone();
            Err(ProviderError::rejected(400, format!("bad env value {echoed}")).into())
        });
        provider.expect_name().return_const("mock");

        let report = PlanExecutor::new(&provider, &graph, &vars)
            .with_retry(RetryPolicy::immediate(1))
            .execute(&plan, &mut snapshot)
            .await
            .unwrap();

        let web = &report.outcomes[1];
        assert_eq!(web.status, OutcomeStatus::Failed);
        let message = web.error.as_deref().unwrap();
        assert!(!message.contains("hunter2"));
        assert!(message.contains("(sensitive)"));

        let history = snapshot.history[0].error.as_deref().unwrap();
        assert!(!history.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_lost_lock_stops_before_checkpoint() {
        let graph = graph(CHAIN);
        let vars = Variables::new();
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        let plan = plan_for(&graph, &snapshot);

        let temp = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(temp.path().join(STATE_DIR));

        let first = StateLock::acquire(&store, "apply").await.unwrap();
        store.force_unlock().await.unwrap();
        let _second = StateLock::acquire(&store, "apply").await.unwrap();

        // no expectations: any provider call panics
        let provider = MockProvider::new();

        let err = PlanExecutor::new(&provider, &graph, &vars)
            .with_checkpoint(&store)
            .with_lease(first.lock_id())
            .execute(&plan, &mut snapshot)
            .await
            .unwrap_err();

        assert!(matches!(err, DeckhandError::State(StateError::LockLost { .. })));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lease_renewed_during_run() {
        let graph = graph(CHAIN);
        let vars = Variables::new();
        let mut snapshot = Snapshot::new("stock-dashboard", "dev");
        let plan = plan_for(&graph, &snapshot);

        let temp = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(temp.path().join(STATE_DIR));
        let lock = StateLock::acquire(&store, "apply").await.unwrap();

        let mut provider = MockProvider::new();
        provider
            .expect_create()
            .returning(|r| Ok(object(&format!("{}-1", r.id.name))));
        provider.expect_name().return_const("mock");

        let report = PlanExecutor::new(&provider, &graph, &vars)
            .with_checkpoint(&store)
            .with_lease(lock.lock_id())
            .execute(&plan, &mut snapshot)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(store.load().await.unwrap().unwrap(), snapshot);
        lock.release(&store).await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_skips_deletes_of_failed_dependents() {
        let declared = graph(CHAIN);
        let mut snapshot = tracked(&declared);
        let plan = Plan::from_diff(&DiffEngine::new().destroy_diff(&snapshot), &snapshot, "hash");
        let order: Vec<String> = plan.operations.iter().map(|o| o.resource.to_string()).collect();
        assert_eq!(
            order,
            [
                "object_bucket.d",
                "iam_role_policy_attachment.c",
                "iam_policy.b",
                "iam_role.a"
            ]
        );

        let mut provider = MockProvider::new();
        provider
            .expect_delete()
            .withf(|_, remote_id| remote_id == "d-1")
            .times(1)
            .returning(|kind, remote_id| {
                Err(ProviderError::NotFound {
                    kind: kind.to_string(),
                    remote_id: remote_id.to_string(),
                }
                .into())
            });
        provider
            .expect_delete()
            .withf(|_, remote_id| remote_id == "c-1")
            .times(1)
            .returning(|_, _| Ok(()));
        provider
            .expect_delete()
            .withf(|_, remote_id| remote_id == "b-1")
            .times(1)
            .returning(|_, _| Err(ProviderError::rejected(409, "policy still attached").into()));
        provider.expect_name().return_const("mock");

        let temp = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(temp.path().join(STATE_DIR));
        let empty = ResourceGraph::default();
        let vars = Variables::new();

        let report = PlanExecutor::new(&provider, &empty, &vars)
            .with_retry(RetryPolicy::immediate(1))
            .with_continue_on_error(true)
            .with_checkpoint(&store)
            .with_run_kind(RunKind::Destroy)
            .execute(&plan, &mut snapshot)
            .await
            .unwrap();

        assert_eq!((report.succeeded, report.failed, report.skipped), (2, 1, 1));
        let a = &report.outcomes[3];
        assert_eq!(a.status, OutcomeStatus::Skipped);
        assert_eq!(a.attempts, 0);

        assert!(snapshot.contains(&id("iam_role.a")));
        assert!(snapshot.contains(&id("iam_policy.b")));
        assert!(!snapshot.contains(&id("iam_role_policy_attachment.c")));
        assert!(!snapshot.contains(&id("object_bucket.d")));

        let entry = &snapshot.history[0];
        assert_eq!(entry.operation, RunKind::Destroy);
        assert!(!entry.success);
        assert_eq!(store.load().await.unwrap().unwrap(), snapshot);
    }
}
