use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol::{RPC_PORT, VolumeRequest, VolumeResponse};
use crate::{VolumeError, VolumeRpc};

/// Client for a remote volume RPC endpoint. Opens one connection per call.
#[derive(Debug, Clone)]
pub struct RpcClient {
    address: String,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    /// Client for `<host>:7777`.
    pub fn for_host(host: &str, timeout: Duration) -> Self {
        Self::new(format!("{}:{}", host.trim(), RPC_PORT), timeout)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn exchange(&self, request: &VolumeRequest) -> Result<VolumeResponse, VolumeError> {
        let stream = TcpStream::connect(&self.address).await?;
        let (reader, mut writer) = stream.into_split();
        let mut encoded = serde_json::to_vec(request)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;

        let mut line = String::new();
        if BufReader::new(reader).read_line(&mut line).await? == 0 {
            return Err(VolumeError::Protocol("connection closed before response".into()));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

#[async_trait]
impl VolumeRpc for RpcClient {
    async fn call(&self, request: VolumeRequest) -> Result<VolumeResponse, VolumeError> {
        debug!(address = %self.address, method = request.method(), volume = request.volume(), "volume rpc call");
        match tokio::time::timeout(self.timeout, self.exchange(&request)).await {
            Ok(result) => result,
            Err(_) => Err(VolumeError::Command(format!(
                "{} timed out after {}s",
                request.method(),
                self.timeout.as_secs()
            ))),
        }
    }
}
