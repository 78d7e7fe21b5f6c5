//! Provider API module for deckhand.
//!
//! The provider owns the real infrastructure. Deckhand talks to it through
//! the [`Provider`] trait so the executor can be driven by the HTTP
//! implementation in production and by mocks in tests.

mod http;
mod retry;

pub use http::HttpProvider;
pub use retry::{Attempted, RetryPolicy};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::graph::{ResourceId, ResourceKind};

/// Desired state of one resource, as sent to the provider.
///
/// Attribute values are fully resolved and may contain secrets, so the
/// `Debug` output lists attribute names only.
#[derive(Clone, PartialEq)]
pub struct ResourceRequest {
    /// Resource identity.
    pub id: ResourceId,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Resolved attribute values.
    pub attributes: serde_json::Map<String, Value>,
}

/// A remote object as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Provider-assigned identifier.
    pub id: String,
    /// Computed outputs.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Changes whenever the remote object changes.
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// Operations a provider must support.
///
/// Each method makes exactly one attempt; retries belong to [`RetryPolicy`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a remote object.
    async fn create(&self, request: &ResourceRequest) -> Result<RemoteObject>;

    /// Updates a remote object in place.
    async fn update(&self, remote_id: &str, request: &ResourceRequest) -> Result<RemoteObject>;

    /// Deletes a remote object.
    ///
    /// Returns `ProviderError::NotFound` when the object does not exist.
    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> Result<()>;

    /// Reads a remote object, or `None` if it does not exist.
    async fn read(&self, kind: ResourceKind, remote_id: &str) -> Result<Option<RemoteObject>>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

impl fmt::Debug for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRequest")
            .field("id", &self.id)
            .field("project", &self.project)
            .field("environment", &self.environment)
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_debug_hides_values() {
        let mut attributes = serde_json::Map::new();
        attributes.insert(String::from("DASH_PASSWORD"), Value::from("hunter2"));
        let request = ResourceRequest {
            id: ResourceId::new(ResourceKind::ComputeService, "web"),
            project: String::from("stock-dashboard"),
            environment: String::from("dev"),
            attributes,
        };

        let rendered = format!("{request:?}");
        assert!(rendered.contains("DASH_PASSWORD"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_remote_object_defaults() {
        let object: RemoteObject = serde_json::from_str(r#"{"id":"svc-1"}"#).unwrap();
        assert_eq!(object.id, "svc-1");
        assert!(object.outputs.is_empty());
        assert!(object.fingerprint.is_none());
    }
}
