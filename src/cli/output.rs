//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats. Nothing rendered here
//! carries a secret: plans hold display values and state holds
//! fingerprints, which are shown as `(sensitive)`.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::graph::ResourceGraph;
use crate::planner::{Action, ApplyReport, ChangeValue, OutcomeStatus, Plan};
use crate::refresh::{DriftKind, DriftReport};
use crate::state::{LockInfo, Snapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Apply outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Remote ID")]
    remote_id: String,
}

/// Tracked resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Remote ID")]
    remote_id: String,
    #[tabled(rename = "Outputs")]
    outputs: usize,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Graph node row for table display.
#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when rendering JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes. Infrastructure matches the configuration.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let hasher = ConfigHasher::new();

        let _ = writeln!(output, "\nPlan for {}/{}", plan.project, plan.environment);
        let _ = writeln!(
            output,
            "   Config hash: {}  State serial: {}\n",
            hasher.short_hash(&plan.config_hash),
            plan.serial
        );

        let rows: Vec<PlanRow> = plan
            .operations
            .iter()
            .enumerate()
            .map(|(i, op)| PlanRow {
                index: i + 1,
                action: Self::format_action(op.action),
                resource: op.resource.to_string(),
                reason: Self::truncate(&op.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        for op in plan.operations.iter().filter(|op| !op.changes.is_empty()) {
            let _ = writeln!(output, "\n  {} {}", Self::format_action(op.action), op.resource);
            for change in &op.changes {
                let marker = if change.forces_replacement {
                    " (forces replacement)".red().to_string()
                } else {
                    String::new()
                };
                let _ = writeln!(
                    output,
                    "      {}: {} -> {}{marker}",
                    change.path,
                    Self::format_value(&change.before),
                    Self::format_value(&change.after),
                );
            }
        }

        let summary = &plan.summary;
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete.\n",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.replace.to_string().magenta(),
            summary.delete.to_string().red()
        );

        output
    }

    /// Formats an apply report.
    #[must_use]
    pub fn format_apply(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.outcomes.is_empty() {
                    return format!("{} Nothing to apply.\n", "✓".green());
                }

                let rows: Vec<OutcomeRow> = report
                    .outcomes
                    .iter()
                    .map(|o| OutcomeRow {
                        resource: o.resource.to_string(),
                        action: o.action.to_string(),
                        status: Self::format_status(o.status),
                        attempts: o.attempts,
                        remote_id: o.remote_id.clone().unwrap_or_default(),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');

                let failures: Vec<_> = report
                    .outcomes
                    .iter()
                    .filter(|o| o.status == OutcomeStatus::Failed)
                    .collect();
                if !failures.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "✗".red());
                    for outcome in failures {
                        let _ = writeln!(
                            output,
                            "   - {}: {}",
                            outcome.resource,
                            outcome.error.as_deref().unwrap_or("failed")
                        );
                    }
                }

                let status = if report.is_success() {
                    format!("{} Apply complete", "✓".green())
                } else {
                    format!("{} Apply incomplete", "✗".red())
                };
                let _ = write!(
                    output,
                    "\n{status}: {} succeeded, {} failed, {} skipped.\n",
                    report.succeeded, report.failed, report.skipped
                );
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.is_clean() {
                    return format!(
                        "{} No drift detected across {} resources.\n",
                        "✓".green(),
                        report.checked
                    );
                }

                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for drift in &report.drifted {
                    let what = match &drift.kind {
                        DriftKind::Missing => "missing remotely".red().to_string(),
                        DriftKind::Changed { .. } => "changed remotely".yellow().to_string(),
                    };
                    let _ = writeln!(output, "   - {} ({}): {what}", drift.resource, drift.remote_id);
                }
                let _ = write!(
                    output,
                    "\n{}/{} resources have drifted.\n",
                    report.drifted.len(),
                    report.checked
                );
                output
            }
        }
    }

    /// Formats the snapshot summary.
    #[must_use]
    pub fn format_snapshot(&self, snapshot: &Snapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = write!(
                    output,
                    "\nState: {}/{}\n\n",
                    snapshot.project, snapshot.environment
                );
                let _ = writeln!(output, "   Version: {}", snapshot.version);
                let _ = writeln!(output, "   Lineage: {}", snapshot.lineage);
                let _ = writeln!(output, "   Serial: {}", snapshot.serial);
                let _ = writeln!(output, "   Last updated: {}", snapshot.last_updated);
                let _ = writeln!(output, "   Resources: {}", snapshot.len());

                if !snapshot.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", snapshot.history.len());
                    for entry in snapshot.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} #{} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.serial,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats the tracked resources.
    #[must_use]
    pub fn format_resources(&self, snapshot: &Snapshot) -> String {
        match self.format {
            OutputFormat::Json => {
                let list: Vec<_> = snapshot
                    .resources
                    .values()
                    .map(|r| {
                        serde_json::json!({
                            "resource": r.id,
                            "remote_id": r.remote_id,
                            "outputs": r.outputs,
                            "updated_at": r.updated_at,
                        })
                    })
                    .collect();
                serde_json::to_string_pretty(&list).unwrap_or_default()
            }
            OutputFormat::Text => {
                if snapshot.is_empty() {
                    return String::from("No resources in state.\n");
                }
                let rows: Vec<ResourceRow> = snapshot
                    .resources
                    .values()
                    .map(|r| ResourceRow {
                        resource: r.id.to_string(),
                        remote_id: Self::truncate(&r.remote_id, 32),
                        outputs: r.outputs.len(),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats the graph in topological order.
    #[must_use]
    pub fn format_graph(&self, graph: &ResourceGraph) -> String {
        let order = graph.topological_order();
        match self.format {
            OutputFormat::Json => {
                let nodes: Vec<_> = order
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "resource": r.id,
                            "depends_on": graph.dependencies_of(&r.id),
                        })
                    })
                    .collect();
                serde_json::to_string_pretty(&nodes).unwrap_or_default()
            }
            OutputFormat::Text => {
                let rows: Vec<GraphRow> = order
                    .iter()
                    .enumerate()
                    .map(|(i, r)| GraphRow {
                        index: i + 1,
                        resource: r.id.to_string(),
                        depends_on: graph
                            .dependencies_of(&r.id)
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        result: &ValidationResult,
        graph: &ResourceGraph,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "resources": graph.len(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Configuration is valid ({} resources).\n",
                    "✓".green(),
                    graph.len()
                );
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(lock).unwrap_or_default(),
            OutputFormat::Text => format!(
                "{} State locked: {} (holder {}, expires in {}s)\n",
                "✓".green(),
                lock.lock_id,
                lock.holder,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, symbol: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{symbol} {message}"),
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        match action {
            Action::Create => "+ create".green().to_string(),
            Action::Update => "~ update".yellow().to_string(),
            Action::Replace => "-/+ replace".magenta().to_string(),
            Action::Delete => "- delete".red().to_string(),
        }
    }

    /// Formats an outcome status with color.
    fn format_status(status: OutcomeStatus) -> String {
        match status {
            OutcomeStatus::Applied => "applied".green().to_string(),
            OutcomeStatus::Failed => "failed".red().to_string(),
            OutcomeStatus::Skipped => "skipped".dimmed().to_string(),
        }
    }

    fn format_value(value: &ChangeValue) -> String {
        let rendered = Self::truncate(&value.to_string(), 60);
        match value {
            ChangeValue::Sensitive | ChangeValue::Unknown => rendered.dimmed().to_string(),
            ChangeValue::Absent | ChangeValue::Known(_) => rendered,
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
