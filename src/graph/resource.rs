//! Resource identities, kinds and their static schemas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::AttrValue;

/// The kinds of resource deckhand can manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Container image repository.
    ContainerRegistry,
    /// IAM role assumed by a service.
    IamRole,
    /// IAM policy document.
    IamPolicy,
    /// Attachment of a policy to a role.
    IamRolePolicyAttachment,
    /// Object storage bucket.
    ObjectBucket,
    /// Managed compute service running a container image.
    ComputeService,
}

/// Static description of a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSchema {
    /// Attributes every declaration must set.
    pub required: &'static [&'static str],
    /// Attributes whose change forces a replacement.
    pub immutable: &'static [&'static str],
    /// Outputs computed by the provider, besides `id`.
    pub outputs: &'static [&'static str],
}

/// Identity of a resource: its kind and logical name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceId {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical name, unique per kind.
    pub name: String,
}

/// A declared resource after parsing, as held by the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Identity.
    pub id: ResourceId,
    /// Declared attributes.
    pub attributes: BTreeMap<String, AttrValue>,
    /// Direct dependencies, explicit and inferred, in first-seen order.
    pub depends_on: Vec<ResourceId>,
    /// Position in the configuration file.
    pub index: usize,
}

const REGISTRY: KindSchema = KindSchema {
    required: &["repository_name"],
    immutable: &["repository_name"],
    outputs: &["arn", "repository_url"],
};

const ROLE: KindSchema = KindSchema {
    required: &["name", "assume_role_service"],
    immutable: &["name"],
    outputs: &["arn"],
};

const POLICY: KindSchema = KindSchema {
    required: &["name", "document"],
    immutable: &["name"],
    outputs: &["arn"],
};

const ATTACHMENT: KindSchema = KindSchema {
    required: &["role", "policy_arn"],
    immutable: &["role", "policy_arn"],
    outputs: &[],
};

const BUCKET: KindSchema = KindSchema {
    required: &["bucket"],
    immutable: &["bucket"],
    outputs: &["arn", "bucket_domain_name"],
};

const SERVICE: KindSchema = KindSchema {
    required: &["service_name", "image", "port"],
    immutable: &["service_name"],
    outputs: &["arn", "service_url"],
};

impl ResourceKind {
    /// Every kind, in a stable order.
    pub const ALL: [Self; 6] = [
        Self::ContainerRegistry,
        Self::IamRole,
        Self::IamPolicy,
        Self::IamRolePolicyAttachment,
        Self::ObjectBucket,
        Self::ComputeService,
    ];

    /// Returns the kind as written in configuration files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ContainerRegistry => "container_registry",
            Self::IamRole => "iam_role",
            Self::IamPolicy => "iam_policy",
            Self::IamRolePolicyAttachment => "iam_role_policy_attachment",
            Self::ObjectBucket => "object_bucket",
            Self::ComputeService => "compute_service",
        }
    }

    /// Returns the static schema for this kind.
    #[must_use]
    pub const fn schema(self) -> &'static KindSchema {
        match self {
            Self::ContainerRegistry => &REGISTRY,
            Self::IamRole => &ROLE,
            Self::IamPolicy => &POLICY,
            Self::IamRolePolicyAttachment => &ATTACHMENT,
            Self::ObjectBucket => &BUCKET,
            Self::ComputeService => &SERVICE,
        }
    }
}

impl KindSchema {
    /// Returns true if changing `attribute` forces a replacement.
    #[must_use]
    pub fn is_immutable(&self, attribute: &str) -> bool {
        self.immutable.contains(&attribute)
    }

    /// Returns true if `name` is computed by the provider.
    #[must_use]
    pub fn has_output(&self, name: &str) -> bool {
        name == "id" || self.outputs.contains(&name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind '{s}'"))
    }
}

impl ResourceId {
    /// Creates a resource identity.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| format!("expected kind.name, got '{s}'"))?;
        if name.is_empty() || name.contains('.') {
            return Err(format!("expected kind.name, got '{s}'"));
        }
        Ok(Self::new(kind.parse()?, name))
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip_through_string() {
        let id: ResourceId = "iam_role.ecr_access".parse().unwrap();
        assert_eq!(id, ResourceId::new(ResourceKind::IamRole, "ecr_access"));
        assert_eq!(id.to_string(), "iam_role.ecr_access");
    }

    #[test]
    fn test_id_rejects_bad_input() {
        assert!("iam_role".parse::<ResourceId>().is_err());
        assert!("iam_role.".parse::<ResourceId>().is_err());
        assert!("vpc.main".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_id_as_json_map_key() {
        let mut map = BTreeMap::new();
        map.insert(ResourceId::new(ResourceKind::ObjectBucket, "assets"), 1);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"object_bucket.assets":1}"#);

        let back: BTreeMap<ResourceId, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_schema_lookup() {
        let schema = ResourceKind::ComputeService.schema();
        assert!(schema.is_immutable("service_name"));
        assert!(!schema.is_immutable("image"));
        assert!(schema.has_output("id"));
        assert!(schema.has_output("service_url"));
        assert!(!schema.has_output("port"));
    }
}
