//! I/O seams used by run commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use castor_volume::{RpcClient, VolumeRpc};
use reqwest::Method;
use tracing::debug;

/// Raw HTTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> Result<HttpReply>;
}

/// [`HttpTransport`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("castor/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> Result<HttpReply> {
        debug!(%method, url, "run command http request");
        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = request.header(reqwest::header::CONTENT_TYPE, "application/json").body(body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("{} {}", method, url))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.context("read http response body")?.to_vec();
        Ok(HttpReply { status, body })
    }
}

/// Opens RPC channels to volume controllers by host.
pub trait VolumeConnector: Send + Sync {
    fn connect(&self, host: &str) -> Arc<dyn VolumeRpc>;
}

/// Connects over TCP to `<host>:7777`.
#[derive(Debug, Clone)]
pub struct TcpVolumeConnector {
    timeout: Duration,
}

impl TcpVolumeConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl VolumeConnector for TcpVolumeConnector {
    fn connect(&self, host: &str) -> Arc<dyn VolumeRpc> {
        Arc::new(RpcClient::for_host(host, self.timeout))
    }
}
