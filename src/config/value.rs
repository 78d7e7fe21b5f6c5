//! Attribute values and `${...}` interpolation.
//!
//! Declared attributes are plain YAML values. Strings may embed
//! interpolations:
//!
//! - `${kind.name.attribute}` refers to an output or attribute of another resource
//! - `${var.name}` refers to an input variable
//! - `$${` produces a literal `${`

use secrecy::ExposeSecret;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

use super::hash::ConfigHasher;
use super::variables::VariableValue;

/// A parsed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// A value with no interpolation.
    Literal(Value),
    /// A string that is exactly one resource reference.
    Reference(Reference),
    /// A string that is exactly one variable.
    Variable(String),
    /// A string mixing text and interpolations.
    Template(Vec<Segment>),
    /// A list containing at least one interpolation.
    List(Vec<AttrValue>),
    /// A map containing at least one interpolation.
    Map(BTreeMap<String, AttrValue>),
}

/// Piece of a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// Resource reference.
    Reference(Reference),
    /// Input variable.
    Variable(String),
}

/// A reference to another resource's attribute or output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Target kind as written.
    pub kind: String,
    /// Target logical name.
    pub name: String,
    /// Attribute or output name.
    pub attribute: String,
}

/// Both renderings of a resolved value.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Value sent to the provider. May contain secrets.
    pub wire: Value,
    /// Value recorded in state and shown in plans. Secrets are fingerprinted.
    pub recorded: Value,
}

/// Outcome of resolving a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Fully known.
    Known(Resolution),
    /// Depends on something that is only known after apply.
    Unknown,
}

/// Supplies reference targets and variables during resolution.
pub trait ValueSource {
    /// Resolves a reference to another resource.
    fn lookup(&self, reference: &Reference) -> Resolved;

    /// Gets a variable value.
    fn variable(&self, name: &str) -> Option<&VariableValue>;

    /// Salt mixed into secret fingerprints.
    fn salt(&self) -> &str;
}

impl AttrValue {
    /// Parses a raw declared value.
    ///
    /// # Errors
    ///
    /// Returns an error if an interpolation is unterminated or malformed.
    pub fn parse(raw: &Value) -> Result<Self, String> {
        match raw {
            Value::String(s) => Self::parse_str(s),
            Value::Array(items) => {
                let parsed = items
                    .iter()
                    .map(Self::parse)
                    .collect::<Result<Vec<_>, _>>()?;
                if parsed.iter().all(|v| matches!(v, Self::Literal(_))) {
                    Ok(Self::Literal(raw.clone()))
                } else {
                    Ok(Self::List(parsed))
                }
            }
            Value::Object(map) => {
                let mut parsed = BTreeMap::new();
                for (key, value) in map {
                    parsed.insert(key.clone(), Self::parse(value)?);
                }
                if parsed.values().all(|v| matches!(v, Self::Literal(_))) {
                    Ok(Self::Literal(raw.clone()))
                } else {
                    Ok(Self::Map(parsed))
                }
            }
            other => Ok(Self::Literal(other.clone())),
        }
    }

    /// Parses an attribute, attaching the resource and attribute to errors.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInterpolation` if the value is malformed.
    pub fn parse_attribute(
        resource: &str,
        attribute: &str,
        raw: &Value,
    ) -> Result<Self, ConfigError> {
        Self::parse(raw).map_err(|message| ConfigError::InvalidInterpolation {
            resource: resource.to_string(),
            attribute: attribute.to_string(),
            message,
        })
    }

    fn parse_str(s: &str) -> Result<Self, String> {
        let segments = parse_segments(s)?;

        match segments.as_slice() {
            [] => Ok(Self::Literal(Value::String(String::new()))),
            [Segment::Text(text)] => Ok(Self::Literal(Value::String(text.clone()))),
            [Segment::Reference(r)] => Ok(Self::Reference(r.clone())),
            [Segment::Variable(v)] => Ok(Self::Variable(v.clone())),
            _ => Ok(Self::Template(segments)),
        }
    }

    /// Returns every resource reference in this value.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect(&mut out, &mut Vec::new());
        out
    }

    /// Returns every variable name used by this value.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect(&mut Vec::new(), &mut out);
        out
    }

    fn collect<'a>(&'a self, refs: &mut Vec<&'a Reference>, vars: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference(r) => refs.push(r),
            Self::Variable(v) => vars.push(v),
            Self::Template(segments) => {
                for segment in segments {
                    match segment {
                        Segment::Text(_) => {}
                        Segment::Reference(r) => refs.push(r),
                        Segment::Variable(v) => vars.push(v),
                    }
                }
            }
            Self::List(items) => items.iter().for_each(|i| i.collect(refs, vars)),
            Self::Map(map) => map.values().for_each(|v| v.collect(refs, vars)),
        }
    }

    /// Resolves this value against a source.
    pub fn resolve(&self, source: &dyn ValueSource) -> Resolved {
        match self {
            Self::Literal(v) => Resolved::known(v.clone()),
            Self::Reference(r) => source.lookup(r),
            Self::Variable(name) => resolve_variable(name, source),
            Self::Template(segments) => resolve_template(segments, source),
            Self::List(items) => {
                let mut wire = Vec::with_capacity(items.len());
                let mut recorded = Vec::with_capacity(items.len());
                for item in items {
                    let Resolved::Known(r) = item.resolve(source) else {
                        return Resolved::Unknown;
                    };
                    wire.push(r.wire);
                    recorded.push(r.recorded);
                }
                Resolved::Known(Resolution {
                    wire: Value::Array(wire),
                    recorded: Value::Array(recorded),
                })
            }
            Self::Map(map) => {
                let mut wire = serde_json::Map::new();
                let mut recorded = serde_json::Map::new();
                for (key, item) in map {
                    let Resolved::Known(r) = item.resolve(source) else {
                        return Resolved::Unknown;
                    };
                    wire.insert(key.clone(), r.wire);
                    recorded.insert(key.clone(), r.recorded);
                }
                Resolved::Known(Resolution {
                    wire: Value::Object(wire),
                    recorded: Value::Object(recorded),
                })
            }
        }
    }
}

impl Resolved {
    /// A known, non-sensitive value.
    #[must_use]
    pub fn known(value: Value) -> Self {
        Self::Known(Resolution {
            wire: value.clone(),
            recorded: value,
        })
    }

    /// Returns the resolution if known.
    #[must_use]
    pub const fn as_known(&self) -> Option<&Resolution> {
        match self {
            Self::Known(r) => Some(r),
            Self::Unknown => None,
        }
    }
}

fn resolve_variable(name: &str, source: &dyn ValueSource) -> Resolved {
    match source.variable(name) {
        Some(VariableValue::Plain(s)) => Resolved::known(Value::String(s.clone())),
        Some(VariableValue::Secret(secret)) => {
            let wire = secret.expose_secret();
            Resolved::Known(Resolution {
                recorded: Value::String(ConfigHasher::fingerprint_secret(source.salt(), wire)),
                wire: Value::String(wire.to_string()),
            })
        }
        None => Resolved::Unknown,
    }
}

fn resolve_template(segments: &[Segment], source: &dyn ValueSource) -> Resolved {
    let mut rendered = String::new();
    let mut display = String::new();
    let mut sensitive = false;

    for segment in segments {
        let piece = match segment {
            Segment::Text(text) => Resolved::known(Value::String(text.clone())),
            Segment::Reference(r) => source.lookup(r),
            Segment::Variable(v) => resolve_variable(v, source),
        };
        let Resolved::Known(resolution) = piece else {
            return Resolved::Unknown;
        };
        if resolution.wire != resolution.recorded {
            sensitive = true;
        }
        rendered.push_str(&stringify(&resolution.wire));
        display.push_str(&stringify(&resolution.recorded));
    }

    let recorded = if sensitive {
        ConfigHasher::fingerprint_secret(source.salt(), &rendered)
    } else {
        display
    };

    Resolved::Known(Resolution {
        wire: Value::String(rendered),
        recorded: Value::String(recorded),
    })
}

/// Renders a JSON value the way it appears inside a template string.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_segments(s: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        text.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("$${") {
            text.push_str("${");
            rest = &tail[3..];
        } else if let Some(body) = tail.strip_prefix("${") {
            let end = body
                .find('}')
                .ok_or_else(|| format!("unterminated interpolation in '{s}'"))?;
            let expr = body[..end].trim();

            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            segments.push(parse_expression(expr)?);
            rest = &body[end + 1..];
        } else {
            text.push('$');
            rest = &tail[1..];
        }
    }

    text.push_str(rest);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }

    Ok(segments)
}

fn parse_expression(expr: &str) -> Result<Segment, String> {
    let parts: Vec<&str> = expr.split('.').collect();

    match parts.as_slice() {
        ["var", name] if is_identifier(name) => Ok(Segment::Variable((*name).to_string())),
        [kind, name, attribute]
            if is_identifier(kind) && !name.is_empty() && is_identifier(attribute) =>
        {
            Ok(Segment::Reference(Reference {
                kind: (*kind).to_string(),
                name: (*name).to_string(),
                attribute: (*attribute).to_string(),
            }))
        }
        _ => Err(format!(
            "invalid expression '${{{expr}}}', expected ${{kind.name.attribute}} or ${{var.name}}"
        )),
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl Reference {
    /// Returns the `kind.name` address of the target.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}.{}}}", self.kind, self.name, self.attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::variables::VariableValue;
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeSource {
        outputs: HashMap<String, Value>,
        vars: HashMap<String, VariableValue>,
    }

    impl ValueSource for FakeSource {
        fn lookup(&self, reference: &Reference) -> Resolved {
            let key = format!("{}.{}", reference.target(), reference.attribute);
            self.outputs
                .get(&key)
                .map_or(Resolved::Unknown, |v| Resolved::known(v.clone()))
        }

        fn variable(&self, name: &str) -> Option<&VariableValue> {
            self.vars.get(name)
        }

        fn salt(&self) -> &str {
            "lineage-1"
        }
    }

    fn source() -> FakeSource {
        let mut outputs = HashMap::new();
        outputs.insert(
            String::from("container_registry.app.repository_url"),
            json!("123.dkr.example.com/app"),
        );
        let mut vars = HashMap::new();
        vars.insert(String::from("region"), VariableValue::Plain(String::from("ap-northeast-1")));
        vars.insert(String::from("password"), VariableValue::secret("hunter2"));
        FakeSource { outputs, vars }
    }

    #[test]
    fn test_plain_string_is_literal() {
        let value = AttrValue::parse(&json!("stock-dashboard")).unwrap();
        assert_eq!(value, AttrValue::Literal(json!("stock-dashboard")));
    }

    #[test]
    fn test_whole_string_reference() {
        let value = AttrValue::parse(&json!("${iam_role.ecr_access.arn}")).unwrap();
        let AttrValue::Reference(r) = value else {
            panic!("expected reference");
        };
        assert_eq!(r.target(), "iam_role.ecr_access");
        assert_eq!(r.attribute, "arn");
    }

    #[test]
    fn test_template_resolution() {
        let value =
            AttrValue::parse(&json!("${container_registry.app.repository_url}:latest")).unwrap();
        assert_eq!(value.references().len(), 1);

        let Resolved::Known(r) = value.resolve(&source()) else {
            panic!("expected known value");
        };
        assert_eq!(r.wire, json!("123.dkr.example.com/app:latest"));
        assert_eq!(r.recorded, r.wire);
    }

    #[test]
    fn test_escaped_dollar_brace() {
        let value = AttrValue::parse(&json!("cost $${not_a_ref}")).unwrap();
        assert_eq!(value, AttrValue::Literal(json!("cost ${not_a_ref}")));
    }

    #[test]
    fn test_unterminated_interpolation() {
        assert!(AttrValue::parse(&json!("${var.password")).is_err());
        assert!(AttrValue::parse(&json!("${just_one}")).is_err());
    }

    #[test]
    fn test_secret_is_fingerprinted_when_recorded() {
        let value = AttrValue::parse(&json!({ "DASH_PASSWORD": "${var.password}" })).unwrap();
        assert_eq!(value.variables(), vec!["password"]);

        let Resolved::Known(r) = value.resolve(&source()) else {
            panic!("expected known value");
        };
        assert_eq!(r.wire["DASH_PASSWORD"], json!("hunter2"));
        let recorded = r.recorded["DASH_PASSWORD"].as_str().unwrap();
        assert!(recorded.starts_with(crate::config::SENSITIVE_PREFIX));
        assert!(!recorded.contains("hunter2"));
    }

    #[test]
    fn test_unknown_reference_propagates() {
        let value = AttrValue::parse(&json!(["${iam_role.missing.arn}", "x"])).unwrap();
        assert_eq!(value.resolve(&source()), Resolved::Unknown);
    }
}
