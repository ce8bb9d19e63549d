//! Cluster-client seam used by the meta executor.
//!
//! The engine talks to the control plane only through [`ClusterClient`], a
//! namespace-scoped handle returning raw JSON bytes, and obtains handles from a
//! [`ClusterProvider`]. The `castor-api` REST client implements both.

use std::sync::Arc;

use async_trait::async_trait;
use castor_api::{ClusterError, KubeClient, ListOptions, NamespacedClient, ResourceRef};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::patch::TaskPatch;

/// Typed operations against one namespace.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    fn namespace(&self) -> &str;

    async fn create(&self, resource: &ResourceRef, body: &Value, cancel: &CancellationToken) -> Result<Vec<u8>, ClusterError>;

    async fn patch(
        &self,
        resource: &ResourceRef,
        name: &str,
        patch: &TaskPatch,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ClusterError>;

    async fn delete(&self, resource: &ResourceRef, name: &str, cancel: &CancellationToken) -> Result<(), ClusterError>;

    async fn get(&self, resource: &ResourceRef, name: &str, cancel: &CancellationToken) -> Result<Vec<u8>, ClusterError>;

    async fn list(&self, resource: &ResourceRef, options: &ListOptions, cancel: &CancellationToken) -> Result<Vec<u8>, ClusterError>;
}

/// Hands out namespace-scoped clients. Clients share transport, never state.
pub trait ClusterProvider: Send + Sync {
    fn scoped(&self, namespace: &str) -> Arc<dyn ClusterClient>;
}

#[async_trait]
impl ClusterClient for NamespacedClient {
    fn namespace(&self) -> &str {
        NamespacedClient::namespace(self)
    }

    async fn create(&self, resource: &ResourceRef, body: &Value, cancel: &CancellationToken) -> Result<Vec<u8>, ClusterError> {
        NamespacedClient::create(self, resource, body, cancel).await
    }

    async fn patch(
        &self,
        resource: &ResourceRef,
        name: &str,
        patch: &TaskPatch,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ClusterError> {
        NamespacedClient::patch(self, resource, name, patch.patch_type.media_type(), patch.body.clone(), cancel).await
    }

    async fn delete(&self, resource: &ResourceRef, name: &str, cancel: &CancellationToken) -> Result<(), ClusterError> {
        NamespacedClient::delete(self, resource, name, cancel).await
    }

    async fn get(&self, resource: &ResourceRef, name: &str, cancel: &CancellationToken) -> Result<Vec<u8>, ClusterError> {
        NamespacedClient::get(self, resource, name, cancel).await
    }

    async fn list(&self, resource: &ResourceRef, options: &ListOptions, cancel: &CancellationToken) -> Result<Vec<u8>, ClusterError> {
        NamespacedClient::list(self, resource, options, cancel).await
    }
}

impl ClusterProvider for KubeClient {
    fn scoped(&self, namespace: &str) -> Arc<dyn ClusterClient> {
        Arc::new(self.namespaced(namespace))
    }
}
