//! Configuration specification types for the stack file.
//!
//! This module defines all the structs that map to `deckhand.yaml`.
//! These types are declarative and fully describe the desired stack.

use ::validator::Validate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::graph::ResourceKind;

/// The root configuration structure for a deckhand stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct StackConfig {
    /// Project-level configuration.
    #[validate(nested)]
    pub project: ProjectConfig,
    /// Provider API configuration.
    #[validate(nested)]
    pub provider: ProviderConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Input variables, keyed by name.
    #[serde(default)]
    pub variables: BTreeMap<String, VariableConfig>,
    /// Resource declarations, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ProjectConfig {
    /// Unique name for the project.
    #[validate(length(min = 1, max = 40))]
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    #[validate(length(min = 1, max = 20))]
    pub environment: String,
}

/// Provider API configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ProviderConfig {
    /// Base URL of the provider control plane.
    #[validate(url)]
    pub endpoint: String,
    /// Region passed along with every request.
    #[serde(default)]
    pub region: Option<String>,
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
    /// Maximum attempts per provider call.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// An input variable declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VariableConfig {
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Sensitive values are never printed, logged or stored in clear.
    #[serde(default)]
    pub sensitive: bool,
    /// Environment variable to read the value from.
    #[serde(default)]
    pub env: Option<String>,
    /// Default value (not allowed for sensitive variables).
    #[serde(default)]
    pub default: Option<String>,
}

/// A single resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical name, unique per kind.
    pub name: String,
    /// Explicit dependencies as `kind.name`.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Declared attributes. Strings may contain `${...}` interpolations.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

// Default value functions

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_attempts() -> u32 {
    4
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_environment() -> String {
    String::from("dev")
}

impl StackConfig {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns the names of sensitive variables.
    #[must_use]
    pub fn sensitive_variables(&self) -> Vec<&str> {
        self.variables
            .iter()
            .filter(|(_, v)| v.sensitive)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Finds a resource declaration by kind and name.
    #[must_use]
    pub fn resource(&self, kind: ResourceKind, name: &str) -> Option<&ResourceConfig> {
        self.resources
            .iter()
            .find(|r| r.kind == kind && r.name == name)
    }
}

impl ResourceConfig {
    /// Returns the `kind.name` address of this declaration.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }
}

impl VariableConfig {
    /// Returns the environment variable consulted first for this variable.
    #[must_use]
    pub fn override_var(name: &str) -> String {
        format!("DECKHAND_VAR_{}", name.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        let yaml = r"
endpoint: https://control.example.com
";
        let provider: ProviderConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(provider.timeout_secs, 30);
        assert_eq!(provider.max_attempts, 4);
        assert_eq!(provider.base_delay_ms, 500);
        assert!(provider.validate().is_ok());
    }

    #[test]
    fn test_provider_endpoint_must_be_url() {
        let provider = ProviderConfig {
            endpoint: String::from("not a url"),
            region: None,
            timeout_secs: 30,
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        };
        assert!(provider.validate().is_err());
    }

    #[test]
    fn test_override_var_name() {
        assert_eq!(VariableConfig::override_var("gemini_api"), "DECKHAND_VAR_GEMINI_API");
    }
}
