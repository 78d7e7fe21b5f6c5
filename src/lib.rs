// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items should be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Deckhand
//!
//! Declarative, dependency-aware provisioning for containerized web
//! application stacks.
//!
//! ## Overview
//!
//! A stack (container registry, IAM roles and policies, object storage,
//! and a managed compute service) is described in `deckhand.yaml`. Deckhand:
//!
//! - Builds a dependency graph from the declarations and their references
//! - Diffs the graph against the last-confirmed remote state snapshot
//! - Prints an ordered plan of create / update / replace / delete operations
//! - Applies the plan one operation at a time, retrying transient failures
//!
//! ## Architecture
//!
//! A run is strictly sequential:
//!
//! 1. **Graph Builder**: declarations to a DAG of resources ([`graph`])
//! 2. **Plan Engine**: graph + snapshot to an ordered plan ([`planner`])
//! 3. **Executor**: plan to provider calls, snapshot updates ([`planner`])
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation, hashing, variables
//! - [`graph`]: Resource identities, kind schemas, dependency graph
//! - [`state`]: Snapshot storage backends (local, S3) and locking
//! - [`provider`]: Provider API trait, HTTP provider, retry policy
//! - [`planner`]: Diff computation, plans and the apply executor
//! - [`refresh`]: Drift detection against the provider
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: stock-dashboard
//!   environment: prod
//!
//! provider:
//!   endpoint: https://control.example.com
//!
//! state:
//!   backend: local
//!
//! resources:
//!   - kind: container_registry
//!     name: app
//!     attributes:
//!       repository_name: stock-dashboard
//!   - kind: compute_service
//!     name: web
//!     attributes:
//!       service_name: stock-dashboard
//!       image: "${container_registry.app.repository_url}:latest"
//!       port: 8050
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod refresh;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackConfig, Variables};
pub use error::{DeckhandError, Result};
pub use graph::{GraphBuilder, Resource, ResourceGraph, ResourceId, ResourceKind};
pub use planner::{ApplyReport, DiffEngine, Plan, PlanExecutor};
pub use provider::{HttpProvider, Provider, RetryPolicy};
pub use refresh::{DriftReport, Refresher};
pub use state::{LocalStateStore, S3StateStore, Snapshot, StateStore};
