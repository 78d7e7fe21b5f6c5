//! Planning module for deckhand.
//!
//! This module compares the resource graph with the remote state snapshot,
//! turns the difference into an ordered plan, and applies that plan.

mod diff;
mod plan;
mod executor;

pub use diff::{Action, AttrChange, ChangeValue, DiffEngine, DiffResult, ResourceDiff};
pub use plan::{PLAN_FORMAT_VERSION, Plan, PlanSummary, PlannedOperation};
pub use executor::{ApplyReport, OperationOutcome, OutcomeStatus, PlanExecutor};
