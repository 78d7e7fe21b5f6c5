//! Resource graph module for deckhand.
//!
//! This module turns stack declarations into a dependency graph:
//! - Resource identities, kinds and their schemas
//! - Reference resolution and cycle detection
//! - Deterministic topological ordering
//! - Resolution of attribute values for a run

mod builder;
mod dag;
mod resource;
mod scope;

pub use builder::GraphBuilder;
pub use dag::ResourceGraph;
pub use resource::{KindSchema, Resource, ResourceId, ResourceKind};
pub use scope::Scope;
