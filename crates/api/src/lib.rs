//! Control-plane REST client.
//!
//! This crate provides a small client for the container-orchestration control
//! plane used by the task engine. It focuses on:
//!
//! - Constructing an HTTP client with a bearer token and timeout
//! - Scoping every call to a namespace
//! - Returning raw JSON bytes so callers can project them uniformly
//! - Mapping HTTP failures to [`ClusterError`]
//!
//! The primary entry point is [`KubeClient`]. Create an instance via
//! [`KubeClient::from_env`] or [`KubeClient::new`], then obtain a
//! [`NamespacedClient`] with [`KubeClient::namespaced`].
//!
//! # Example
//!
//! ```ignore
//! use castor_api::{KubeClient, resources};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let client = KubeClient::from_env()?;
//! let pods = client
//!     .namespaced("openebs")
//!     .list(&resources::CORE_V1_PODS, &Default::default(), &CancellationToken::new())
//!     .await?;
//! println!("{} bytes", pods.len());
//! # Ok(())
//! # }
//! ```

mod error;
pub mod resources;
mod settings;

use std::env;

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, header};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use error::ClusterError;
pub use resources::{ListOptions, ResourceRef};
pub use settings::{CLUSTER_API_ENV, CLUSTER_TIMEOUT_ENV, CLUSTER_TOKEN_ENV, ClusterSettings, DEFAULT_CLUSTER_API};

#[derive(Debug, Clone)]
/// Thin wrapper around a configured `reqwest::Client` for control-plane access.
///
/// Clones share the underlying connection pool.
pub struct KubeClient {
    pub base_url: String,
    pub http: Client,
    pub user_agent: String,
}

impl KubeClient {
    /// Construct a client from explicit settings.
    pub fn new(settings: &ClusterSettings) -> Result<Self> {
        settings.validate()?;

        let mut default_headers = header::HeaderMap::new();
        if let Some(token) = settings.token.as_deref() {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {}", token)).context("invalid bearer token")?;
            value.set_sensitive(true);
            default_headers.insert(header::AUTHORIZATION, value);
        }
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(settings.timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            http,
            user_agent: format!("castor/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Construct a client from `CASTOR_CLUSTER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(&ClusterSettings::from_env()?)
    }

    /// Build a request for a method and API-relative path.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "building request");

        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }

    /// A view of this client scoped to `namespace`.
    pub fn namespaced(&self, namespace: impl Into<String>) -> NamespacedClient {
        NamespacedClient {
            client: self.clone(),
            namespace: namespace.into(),
        }
    }
}

/// Namespace-scoped handle; every call takes the caller's cancellation token.
#[derive(Debug, Clone)]
pub struct NamespacedClient {
    client: KubeClient,
    namespace: String,
}

impl NamespacedClient {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create an object and return the server's representation.
    pub async fn create(&self, resource: &ResourceRef, body: &Value, cancel: &CancellationToken) -> Result<Vec<u8>, ClusterError> {
        let name = body.pointer("/metadata/name").and_then(Value::as_str).unwrap_or_default().to_string();
        let request = self
            .client
            .request(Method::POST, &resource.collection_path(&self.namespace))
            .json(body);
        self.send(request, resource, &name, cancel).await
    }

    /// Patch a named object with already-encoded patch bytes.
    ///
    /// # Arguments
    /// * `content_type` - one of the patch media types, e.g. `application/merge-patch+json`.
    pub async fn patch(
        &self,
        resource: &ResourceRef,
        name: &str,
        content_type: &str,
        patch: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ClusterError> {
        let request = self
            .client
            .request(Method::PATCH, &resource.item_path(&self.namespace, name))
            .header(header::CONTENT_TYPE, content_type)
            .body(patch);
        self.send(request, resource, name, cancel).await
    }

    /// Delete a named object with foreground propagation.
    pub async fn delete(&self, resource: &ResourceRef, name: &str, cancel: &CancellationToken) -> Result<(), ClusterError> {
        let request = self
            .client
            .request(Method::DELETE, &resource.item_path(&self.namespace, name))
            .json(&serde_json::json!({"propagationPolicy": "Foreground"}));
        self.send(request, resource, name, cancel).await.map(|_| ())
    }

    pub async fn get(&self, resource: &ResourceRef, name: &str, cancel: &CancellationToken) -> Result<Vec<u8>, ClusterError> {
        let request = self.client.request(Method::GET, &resource.item_path(&self.namespace, name));
        self.send(request, resource, name, cancel).await
    }

    pub async fn list(&self, resource: &ResourceRef, options: &ListOptions, cancel: &CancellationToken) -> Result<Vec<u8>, ClusterError> {
        let request = self
            .client
            .request(Method::GET, &resource.collection_path(&self.namespace))
            .query(&options.query_pairs());
        self.send(request, resource, "", cancel).await
    }

    async fn send(
        &self,
        request: RequestBuilder,
        resource: &ResourceRef,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ClusterError> {
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, ClusterError>((status, body))
        };

        let (status, body) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClusterError::Cancelled),
            outcome = exchange => outcome?,
        };

        debug!(kind = resource.kind, name, namespace = %self.namespace, status = status.as_u16(), "control plane responded");
        if status.is_success() {
            Ok(body.to_vec())
        } else {
            Err(ClusterError::from_status(status, resource.kind, name, &String::from_utf8_lossy(&body)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn new_trims_trailing_slash() {
        let client = KubeClient::new(&ClusterSettings::new("http://127.0.0.1:8001/")).expect("client");
        assert_eq!(client.base_url, "http://127.0.0.1:8001");
        assert!(client.user_agent.starts_with("castor/"));
    }

    #[test]
    fn new_rejects_invalid_base_url() {
        let error = KubeClient::new(&ClusterSettings::new("file:///tmp")).expect_err("file scheme");
        assert!(error.to_string().contains("http or https"), "unexpected error: {error}");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let mut settings = ClusterSettings::new("http://127.0.0.1:9");
        settings.timeout = Duration::from_secs(5);
        let client = KubeClient::new(&settings).expect("client").namespaced("default");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = client
            .get(&resources::CORE_V1_PODS, "p1", &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(error, ClusterError::Cancelled), "unexpected error: {error}");
    }
}
