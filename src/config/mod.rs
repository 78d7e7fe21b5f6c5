//! Configuration module for deckhand.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `deckhand.yaml`
//! - Validation of configuration values
//! - Parsing attribute values and their interpolations
//! - Loading variable values, including sensitive ones
//! - Computing configuration hashes and fingerprints

mod spec;
mod parser;
mod validator;
mod hash;
mod value;
mod variables;

pub use spec::{
    ProjectConfig, ProviderConfig, ResourceConfig, StackConfig, StateBackend, StateConfig,
    VariableConfig,
};
pub use parser::{ConfigParser, find_config_file};
pub use validator::{ConfigValidator, ValidationResult};
pub use hash::{ConfigHasher, SENSITIVE_PREFIX};
pub use value::{AttrValue, Reference, Resolution, Resolved, Segment, ValueSource};
pub use variables::{REDACTED, Redactor, VariableValue, Variables};
