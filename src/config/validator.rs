//! Configuration validation for stack files.
//!
//! Field-level checks come from the `validator` derive on the config types;
//! this module adds the semantic checks that span fields and resources.
//! Reference resolution and cycle detection belong to the graph builder.

use ::validator::Validate;
use crate::error::{ConfigError, DeckhandError, Result};
use std::collections::BTreeSet;
use tracing::debug;

use super::spec::{ProjectConfig, ResourceConfig, StackConfig, StateBackend, StateConfig};
use super::value::AttrValue;

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Treat warnings as errors.
    strict: bool,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self { strict: false }
    }

    /// Fails validation on warnings too.
    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Validates a stack configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() && !(self.strict && !result.warnings.is_empty()) {
            debug!(
                "Configuration validation passed with {} warnings",
                result.warnings.len()
            );
            return Ok(result);
        }

        let (field, message) = result.errors.first().map_or_else(
            || (None, format!("warning treated as error: {}", result.warnings[0])),
            |e| (Some(e.field.clone()), e.message.clone()),
        );
        Err(DeckhandError::Config(ConfigError::ValidationError { message, field }))
    }

    /// Runs every check and collects the findings without failing.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_fields(config, &mut result);
        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_variables(config, &mut result);
        Self::validate_resources(config, &mut result);

        result
    }

    /// Maps derive-level field errors into the result.
    fn validate_fields(config: &StackConfig, result: &mut ValidationResult) {
        let Err(errors) = config.validate() else {
            return;
        };

        for (section, kind) in errors.errors() {
            let ::validator::ValidationErrorsKind::Struct(inner) = kind else {
                continue;
            };
            for (field, field_errors) in inner.field_errors() {
                for error in field_errors {
                    result.errors.push(ValidationError {
                        field: format!("{section}.{field}"),
                        message: error.message.as_ref().map_or_else(
                            || format!("invalid value ({})", error.code),
                            ToString::to_string,
                        ),
                    });
                }
            }
        }
    }

    /// Validates project configuration.
    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if !is_valid_name(&project.name) {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            });
        }

        if !is_valid_name(&project.environment) {
            result.errors.push(ValidationError {
                field: String::from("project.environment"),
                message: format!("Environment '{}' is invalid", project.environment),
            });
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket is ignored by the local backend"));
                }
            }
        }
    }

    /// Validates variable declarations.
    fn validate_variables(config: &StackConfig, result: &mut ValidationResult) {
        let used: BTreeSet<String> = config
            .resources
            .iter()
            .flat_map(|r| r.attributes.values())
            .filter_map(|raw| AttrValue::parse(raw).ok())
            .flat_map(|v| v.variables().into_iter().map(str::to_string).collect::<Vec<_>>())
            .collect();

        for (name, decl) in &config.variables {
            let field = format!("variables.{name}");

            if !is_identifier(name) {
                result.errors.push(ValidationError {
                    field: field.clone(),
                    message: format!(
                        "Variable name '{name}' is invalid. Must be lowercase alphanumeric with underscores."
                    ),
                });
            }

            if decl.sensitive && decl.default.is_some() {
                result.errors.push(ValidationError {
                    field: format!("{field}.default"),
                    message: format!("Sensitive variable '{name}' cannot have a default value"),
                });
            }

            if !used.contains(name) {
                result
                    .warnings
                    .push(format!("{field}: declared but not referenced by any resource"));
            }
        }
    }

    /// Validates all resource declarations.
    fn validate_resources(config: &StackConfig, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in configuration"));
            return;
        }

        for (i, resource) in config.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !is_valid_logical_name(&resource.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                        resource.name
                    ),
                });
            }

            Self::validate_attributes(resource, &prefix, result);
        }
    }

    /// Validates the attributes of one resource against its kind schema.
    fn validate_attributes(resource: &ResourceConfig, prefix: &str, result: &mut ValidationResult) {
        let schema = resource.kind.schema();
        let address = resource.address();

        for required in schema.required {
            if !resource.attributes.contains_key(*required) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.attributes.{required}"),
                    message: format!("{address}: missing required attribute '{required}'"),
                });
            }
        }

        for (key, raw) in &resource.attributes {
            if let Err(e) = AttrValue::parse_attribute(&address, key, raw) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.attributes.{key}"),
                    message: e.to_string(),
                });
            }

            if key == "id" || schema.outputs.contains(&key.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.attributes.{key}"),
                    message: format!("{address}: '{key}' is computed by the provider"),
                });
            }
        }

        if let Some(port) = resource.attributes.get("port")
            && !port.is_string()
            && port.as_u64().is_none_or(|p| p == 0 || p > 65_535)
        {
            result.errors.push(ValidationError {
                field: format!("{prefix}.attributes.port"),
                message: format!("{address}: port must be between 1 and 65535"),
            });
        }

        if let Some(image) = resource.attributes.get("image").and_then(|v| v.as_str())
            && image.ends_with(":latest")
        {
            result.warnings.push(format!(
                "{prefix}.attributes.image: Using ':latest' tag hides image changes from the plan"
            ));
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Logical names additionally allow underscores. Dots would break references.
fn is_valid_logical_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn is_identifier(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> StackConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("stock-dashboard"));
        assert!(is_valid_name("prod"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Stock")); // uppercase
        assert!(!is_valid_name("1st")); // starts with number
        assert!(!is_valid_name("app-")); // ends with hyphen
        assert!(!is_valid_name("a--b")); // consecutive hyphens
    }

    #[test]
    fn test_logical_name_rejects_dots() {
        assert!(is_valid_logical_name("ecr_access"));
        assert!(!is_valid_logical_name("ecr.access"));
    }

    #[test]
    fn test_missing_required_attribute() {
        let config = parse(
            r"
project:
  name: stock-dashboard
provider:
  endpoint: https://control.example.com
resources:
  - kind: compute_service
    name: dashboard
    attributes:
      service_name: stock-dashboard
      image: registry.example.com/app:v1
",
        );
        let result = ConfigValidator::new().check(&config);

        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("'port'")));
    }

    #[test]
    fn test_sensitive_default_rejected() {
        let config = parse(
            r"
project:
  name: stock-dashboard
provider:
  endpoint: https://control.example.com
variables:
  dash_password:
    sensitive: true
    default: changeme
",
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("dash_password"));
        assert!(!err.to_string().contains("changeme"));
    }

    #[test]
    fn test_warnings_strict() {
        let config = parse(
            r"
project:
  name: stock-dashboard
provider:
  endpoint: https://control.example.com
",
        );

        let result = ConfigValidator::new().validate(&config).unwrap();
        assert_eq!(result.warning_count(), 1);
        assert!(ConfigValidator::new().strict(true).validate(&config).is_err());
    }

    #[test]
    fn test_bad_endpoint_reported_with_field() {
        let config = parse(
            r"
project:
  name: stock-dashboard
provider:
  endpoint: not-a-url
",
        );
        let result = ConfigValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.field == "provider.endpoint"));
    }
}
