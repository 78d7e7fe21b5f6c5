//! Input variable values.
//!
//! Sensitive values are wrapped in [`SecretString`] as soon as they are read
//! from the environment and only exposed when a provider request is built.

use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::error::{ConfigError, DeckhandError, Result};

use super::spec::{StackConfig, VariableConfig};

/// The value of one input variable.
#[derive(Clone)]
pub enum VariableValue {
    /// A non-sensitive value.
    Plain(String),
    /// A sensitive value.
    Secret(SecretString),
}

/// Text written in place of a sensitive value.
pub const REDACTED: &str = "(sensitive)";

/// Scrubs known secret values out of free-form text such as provider errors.
#[derive(Clone, Default)]
pub struct Redactor {
    /// Longest first, so a secret containing another is replaced whole.
    secrets: Vec<SecretString>,
}

/// All variable values available to a run.
#[derive(Debug, Default, Clone)]
pub struct Variables {
    values: BTreeMap<String, VariableValue>,
    /// Declared variables without a value, with the env var that would set them.
    missing: BTreeMap<String, String>,
}

impl VariableValue {
    /// Wraps a sensitive value.
    #[must_use]
    pub fn secret(value: impl Into<String>) -> Self {
        Self::Secret(SecretString::from(value.into()))
    }

    /// Returns true for sensitive values.
    #[must_use]
    pub const fn is_sensitive(&self) -> bool {
        matches!(self, Self::Secret(_))
    }
}

impl fmt::Debug for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(s) => f.debug_tuple("Plain").field(s).finish(),
            Self::Secret(_) => f.write_str("Secret(\"(sensitive)\")"),
        }
    }
}

impl Variables {
    /// Creates an empty variable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every declared variable from the process environment.
    ///
    /// Lookup order: `DECKHAND_VAR_<NAME>`, the declaration's `env`, then
    /// its `default` (non-sensitive variables only).
    #[must_use]
    pub fn from_env(config: &StackConfig) -> Self {
        Self::from_lookup(config, |name| std::env::var(name).ok())
    }

    /// Reads every declared variable through a lookup function.
    pub fn from_lookup(config: &StackConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut vars = Self::new();

        for (name, decl) in &config.variables {
            let override_var = VariableConfig::override_var(name);
            let raw = lookup(&override_var)
                .or_else(|| decl.env.as_deref().and_then(&lookup))
                .or_else(|| {
                    if decl.sensitive {
                        None
                    } else {
                        decl.default.clone()
                    }
                });

            match raw {
                Some(value) if decl.sensitive => {
                    debug!("Loaded sensitive variable: {name}");
                    vars.values.insert(name.clone(), VariableValue::secret(value));
                }
                Some(value) => {
                    debug!("Loaded variable: {name}");
                    vars.values.insert(name.clone(), VariableValue::Plain(value));
                }
                None => {
                    let env_var = decl.env.clone().unwrap_or(override_var);
                    vars.missing.insert(name.clone(), env_var);
                }
            }
        }

        vars
    }

    /// Sets a value directly.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: VariableValue) -> Self {
        let name = name.into();
        self.missing.remove(&name);
        self.values.insert(name, value);
        self
    }

    /// Gets a variable value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&VariableValue> {
        self.values.get(name)
    }

    /// Checks that every listed variable has a value.
    ///
    /// # Errors
    ///
    /// Returns `MissingVariable` for the first variable without a value.
    pub fn require<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in names {
            if !self.values.contains_key(name) {
                let env_var = self
                    .missing
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| VariableConfig::override_var(name));
                return Err(DeckhandError::Config(ConfigError::MissingVariable {
                    name: name.to_string(),
                    env_var,
                }));
            }
        }
        Ok(())
    }

    /// Builds a [`Redactor`] for every sensitive value in this set.
    #[must_use]
    pub fn redactor(&self) -> Redactor {
        self.values
            .values()
            .filter_map(|value| match value {
                VariableValue::Secret(secret) => Some(secret.clone()),
                VariableValue::Plain(_) => None,
            })
            .fold(Redactor::new(), Redactor::with_secret)
    }

    /// Number of variables with a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no variable has a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Redactor {
    /// Creates a redactor that leaves text unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret to scrub. Empty secrets are ignored.
    #[must_use]
    pub fn with_secret(mut self, secret: SecretString) -> Self {
        if secret.expose_secret().is_empty() {
            return self;
        }
        self.secrets.push(secret);
        self.secrets
            .sort_by_key(|s| std::cmp::Reverse(s.expose_secret().len()));
        self
    }

    /// Replaces every occurrence of a known secret in `text`.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| {
                acc.replace(secret.expose_secret(), REDACTED)
            })
    }
}

impl fmt::Debug for Redactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redactor")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use std::collections::HashMap;

    fn config() -> StackConfig {
        let yaml = r"
project:
  name: stock-dashboard
provider:
  endpoint: https://control.example.com
variables:
  jquants_api:
    sensitive: true
    env: JQUANTS_API
  dash_password:
    sensitive: true
    env: DASH_PASSWORD
    default: ignored-for-secrets
  log_level:
    default: info
";
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_lookup_order() {
        let env: HashMap<&str, &str> = [
            ("JQUANTS_API", "from-env"),
            ("DECKHAND_VAR_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let vars = Variables::from_lookup(&config(), |k| env.get(k).map(|v| (*v).to_string()));

        match vars.get("jquants_api") {
            Some(VariableValue::Secret(s)) => assert_eq!(s.expose_secret(), "from-env"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(vars.get("log_level"), Some(VariableValue::Plain(v)) if v == "debug"));
        assert!(vars.get("dash_password").is_none());
    }

    #[test]
    fn test_require_names_env_var() {
        let vars = Variables::from_lookup(&config(), |_| None);
        let err = vars.require(["dash_password"]).unwrap_err();
        assert!(err.to_string().contains("DASH_PASSWORD"));
        assert!(vars.require(["log_level"]).is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let value = VariableValue::secret("gemini-key-123");
        let rendered = format!("{value:?}");
        assert!(!rendered.contains("gemini-key-123"));
    }

    #[test]
    fn test_redactor_scrubs_sensitive_values_only() {
        let env: HashMap<&str, &str> = [
            ("JQUANTS_API", "jq-token"),
            ("DASH_PASSWORD", "jq-token-and-more"),
            ("DECKHAND_VAR_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        let vars = Variables::from_lookup(&config(), |k| env.get(k).map(|v| (*v).to_string()));

        let redactor = vars.redactor();
        let text = redactor.redact("password=jq-token-and-more key=jq-token level=debug");

        assert_eq!(text, "password=(sensitive) key=(sensitive) level=debug");
        assert!(!format!("{redactor:?}").contains("jq-token"));
    }

    #[test]
    fn test_empty_secret_ignored() {
        let redactor = Redactor::new().with_secret(SecretString::from(String::new()));
        assert_eq!(redactor.redact("unchanged"), "unchanged");
    }
}
