//! HTTP provider implementation.
//!
//! Speaks JSON to the control plane:
//!
//! - `POST   {endpoint}/v1/resources/{kind}`       create
//! - `PUT    {endpoint}/v1/resources/{kind}/{id}`  update
//! - `DELETE {endpoint}/v1/resources/{kind}/{id}`  delete
//! - `GET    {endpoint}/v1/resources/{kind}/{id}`  read
//!
//! Request bodies carry resolved secrets and are never logged. Error bodies
//! are scrubbed of known secrets before they become a [`ProviderError`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url, header};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::{ProviderConfig, Redactor};
use crate::error::{ConfigError, DeckhandError, ProviderError, Result};
use crate::graph::ResourceKind;

use super::{Provider, RemoteObject, ResourceRequest};

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Provider backed by the control-plane HTTP API.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base URL.
    endpoint: Url,
    /// Region sent with every request.
    region: Option<String>,
    /// API token.
    token: SecretString,
    /// Scrubs secrets echoed back in error bodies.
    redactor: Redactor,
}

/// Wire body of create and update requests.
#[derive(Serialize)]
struct RequestBody<'a> {
    name: &'a str,
    project: &'a str,
    environment: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<&'a str>,
    attributes: &'a serde_json::Map<String, Value>,
}

impl HttpProvider {
    /// Creates a provider for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a base URL or the HTTP client
    /// cannot be created.
    pub fn new(config: &ProviderConfig, token: SecretString) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                ConfigError::validation(
                    format!("'{}' is not a valid base URL", config.endpoint),
                    "provider.endpoint",
                )
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("deckhand/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        let redactor = Redactor::new().with_secret(token.clone());

        Ok(Self {
            client,
            endpoint,
            region: config.region.clone(),
            token,
            redactor,
        })
    }

    /// Adds the secrets to scrub from error messages.
    ///
    /// The API token is always scrubbed.
    #[must_use]
    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor.with_secret(self.token.clone());
        self
    }

    /// Builds a resource URL, percent-encoding the remote id as one segment.
    fn url(&self, kind: ResourceKind, remote_id: Option<&str>) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ConfigError::validation(
                    format!("'{}' is not a valid base URL", self.endpoint),
                    "provider.endpoint",
                )
            })?
            .pop_if_empty()
            .extend(["v1", "resources", kind.as_str()])
            .extend(remote_id);
        Ok(url)
    }

    fn body<'a>(&'a self, request: &'a ResourceRequest) -> RequestBody<'a> {
        RequestBody {
            name: &request.id.name,
            project: &request.project,
            environment: &request.environment,
            region: self.region.as_deref(),
            attributes: &request.attributes,
        }
    }

    /// Sends a request once and maps failures onto [`ProviderError`].
    ///
    /// A 404 is returned to the caller as a response, not an error.
    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        trace!("Sending {what}");

        let response = builder
            .header(header::ACCEPT, "application/json")
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                let message = self.redactor.redact(&format!("{what}: {e}"));
                if e.is_timeout() {
                    ProviderError::Timeout { message }
                } else {
                    ProviderError::network(message)
                }
            })?;

        let status = response.status();
        debug!("{what} -> {status}");

        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let body = self.redactor.redact(&response.text().await.unwrap_or_default());

        Err(classify(status, retry_after, &body).into())
    }

    async fn parse_object(response: Response, what: &str) -> Result<RemoteObject> {
        response.json::<RemoteObject>().await.map_err(|e| {
            DeckhandError::Provider(ProviderError::InvalidResponse {
                message: format!("{what}: {e}"),
            })
        })
    }
}

/// Maps a failed HTTP status onto the provider error taxonomy.
fn classify(status: StatusCode, retry_after: Option<u64>, body: &str) -> ProviderError {
    let message = error_message(body);

    match status.as_u16() {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(0),
        },
        401 | 403 => ProviderError::AuthenticationFailed { message },
        409 => ProviderError::transient(409, message),
        code if status.is_server_error() => ProviderError::transient(code, message),
        code => ProviderError::rejected(code, message),
    }
}

/// Extracts a readable message from an error body.
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("message")
            .or_else(|| v.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    let mut message = from_json.unwrap_or_else(|| body.trim().to_string());
    if message.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|&i| message.is_char_boundary(i))
            .unwrap_or(0);
        message.truncate(cut);
        message.push_str("...");
    }
    message
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(&self, request: &ResourceRequest) -> Result<RemoteObject> {
        let what = format!("create {}", request.id);
        let builder = self
            .client
            .post(self.url(request.id.kind, None)?)
            .json(&self.body(request));

        let response = self.send(builder, &what).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::rejected(404, format!("{what}: endpoint not found")).into());
        }
        Self::parse_object(response, &what).await
    }

    async fn update(&self, remote_id: &str, request: &ResourceRequest) -> Result<RemoteObject> {
        let what = format!("update {}", request.id);
        let builder = self
            .client
            .put(self.url(request.id.kind, Some(remote_id))?)
            .json(&self.body(request));

        let response = self.send(builder, &what).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                kind: request.id.kind.to_string(),
                remote_id: remote_id.to_string(),
            }
            .into());
        }
        Self::parse_object(response, &what).await
    }

    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> Result<()> {
        let what = format!("delete {kind}/{remote_id}");
        let builder = self.client.delete(self.url(kind, Some(remote_id))?);

        let response = self.send(builder, &what).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                kind: kind.to_string(),
                remote_id: remote_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn read(&self, kind: ResourceKind, remote_id: &str) -> Result<Option<RemoteObject>> {
        let what = format!("read {kind}/{remote_id}");
        let builder = self.client.get(self.url(kind, Some(remote_id))?);

        let response = self.send(builder, &what).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_object(response, &what).await.map(Some)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{VariableValue, Variables};
    use crate::graph::ResourceId;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpProvider {
        let config = ProviderConfig {
            endpoint: format!("{}/", server.uri()),
            region: Some(String::from("ap-northeast-1")),
            timeout_secs: 5,
            max_attempts: 4,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        HttpProvider::new(&config, SecretString::from(String::from("test-token"))).unwrap()
    }

    fn request() -> ResourceRequest {
        let mut attributes = serde_json::Map::new();
        attributes.insert(String::from("repository_name"), json!("stock-dashboard"));
        ResourceRequest {
            id: ResourceId::new(ResourceKind::ContainerRegistry, "app"),
            project: String::from("stock-dashboard"),
            environment: String::from("dev"),
            attributes,
        }
    }

    #[tokio::test]
    async fn test_create_sends_body_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/resources/container_registry"))
            .and(header_eq("authorization", "Bearer test-token"))
            .and(body_partial_json(json!({
                "name": "app",
                "project": "stock-dashboard",
                "region": "ap-northeast-1",
                "attributes": { "repository_name": "stock-dashboard" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "repo-1",
                "outputs": { "repository_url": "123.dkr.example.com/stock-dashboard" },
                "fingerprint": "f1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let object = provider(&server).create(&request()).await.unwrap();
        assert_eq!(object.id, "repo-1");
        assert_eq!(object.fingerprint.as_deref(), Some("f1"));
        assert_eq!(
            object.outputs["repository_url"],
            json!("123.dkr.example.com/stock-dashboard")
        );
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = provider(&server).create(&request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/resources/container_registry/r-500"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/resources/container_registry/r-400"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "message": "bad name" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/resources/container_registry/r-403"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let provider = provider(&server);

        let err = provider.update("r-500", &request()).await.unwrap_err();
        assert!(err.is_retryable());

        let err = provider.update("r-400", &request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad name"));

        let err = provider.update("r-403", &request()).await.unwrap_err();
        assert!(matches!(
            err,
            DeckhandError::Provider(ProviderError::AuthenticationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_not_found_handling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = provider(&server);
        assert!(
            provider
                .read(ResourceKind::ObjectBucket, "b-1")
                .await
                .unwrap()
                .is_none()
        );
        assert!(matches!(
            provider.delete(ResourceKind::ObjectBucket, "b-1").await,
            Err(DeckhandError::Provider(ProviderError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_echoed_secret_scrubbed_from_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "invalid environment DASH_PASSWORD=hunter2 (token test-token)"
            })))
            .mount(&server)
            .await;

        let vars = Variables::new().with_value("dash_password", VariableValue::secret("hunter2"));
        let err = provider(&server)
            .with_redactor(vars.redactor())
            .create(&request())
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(!message.contains("hunter2"));
        assert!(!message.contains("test-token"));
        assert!(message.contains("DASH_PASSWORD=(sensitive)"));
    }

    #[tokio::test]
    async fn test_remote_id_is_one_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/resources/object_bucket/logs%2F2024%3Fv=1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "logs/2024?v=1" })))
            .expect(1)
            .mount(&server)
            .await;

        let object = provider(&server)
            .read(ResourceKind::ObjectBucket, "logs/2024?v=1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(object.id, "logs/2024?v=1");
    }

    #[test]
    fn test_endpoint_must_be_base_url() {
        let config = ProviderConfig {
            endpoint: String::from("mailto:ops@example.com"),
            region: None,
            timeout_secs: 5,
            max_attempts: 4,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        let err = HttpProvider::new(&config, SecretString::from(String::from("t"))).unwrap_err();
        assert!(matches!(
            err,
            DeckhandError::Config(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_error_message_truncated() {
        let long = "x".repeat(500);
        let message = error_message(&long);
        assert!(message.len() <= MAX_ERROR_BODY + 3);
        assert_eq!(error_message(r#"{"error":"conflict"}"#), "conflict");
    }
}
