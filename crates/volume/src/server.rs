//! Host-side RPC server translating requests into control commands.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::{CMD_RESIZE, CMD_SNAP_CREATE, CMD_SNAP_DESTROY, ControlChannel, reply_failed, reply_status};
use crate::istgt::StorageLineGuard;
use crate::protocol::{VolumeRequest, VolumeResponse};
use crate::{VolumeError, VolumeRpc, VolumeSettings};

/// Executes volume requests against an injected control channel.
///
/// Requests are serialized: the control socket and the istgt configuration
/// are touched by at most one request at a time.
pub struct VolumeHandler {
    channel: Arc<dyn ControlChannel>,
    istgt_conf: PathBuf,
    io_wait: u64,
    total_wait: u64,
    serial: Mutex<()>,
}

impl VolumeHandler {
    pub fn new(channel: Arc<dyn ControlChannel>, settings: &VolumeSettings) -> Self {
        Self {
            channel,
            istgt_conf: settings.istgt_conf.clone(),
            io_wait: settings.io_wait,
            total_wait: settings.total_wait,
            serial: Mutex::new(()),
        }
    }

    pub async fn handle(&self, request: &VolumeRequest) -> VolumeResponse {
        let _serial = self.serial.lock().await;
        info!(method = request.method(), volume = request.volume(), "volume request received");
        match request {
            VolumeRequest::CreateSnapshot { volume, snapshot, .. } => {
                self.snapshot_command(CMD_SNAP_CREATE, volume, snapshot).await
            }
            VolumeRequest::DeleteSnapshot { volume, snapshot, .. } => {
                self.snapshot_command(CMD_SNAP_DESTROY, volume, snapshot).await
            }
            VolumeRequest::ResizeVolume { size, .. } => self.resize(size).await,
        }
    }

    async fn snapshot_command(&self, verb: &str, volume: &str, snapshot: &str) -> VolumeResponse {
        let command = format!("{} {} {} {} {}", verb, volume, snapshot, self.io_wait, self.total_wait);
        match self.channel.send_command(&command).await {
            Ok(lines) => VolumeResponse::new(reply_status(&lines)),
            Err(error) => VolumeResponse::failed(error.to_string()),
        }
    }

    async fn resize(&self, size: &str) -> VolumeResponse {
        let guard = match StorageLineGuard::apply(&self.istgt_conf, size) {
            Ok(guard) => guard,
            Err(error) => return VolumeResponse::failed(error.to_string()),
        };

        let command = format!("{} {} {}", CMD_RESIZE, self.io_wait, self.total_wait);
        match self.channel.send_command(&command).await {
            Ok(lines) if !reply_failed(&lines) => {
                guard.commit();
                VolumeResponse::new(reply_status(&lines))
            }
            Ok(lines) => {
                warn!(size, "resize rejected by target");
                VolumeResponse::new(reply_status(&lines))
            }
            Err(error) => VolumeResponse::failed(error.to_string()),
        }
    }
}

#[async_trait]
impl VolumeRpc for VolumeHandler {
    async fn call(&self, request: VolumeRequest) -> Result<VolumeResponse, VolumeError> {
        Ok(self.handle(&request).await)
    }
}

/// TCP front for a [`VolumeHandler`].
pub struct VolumeServer {
    handler: Arc<VolumeHandler>,
    bind_address: String,
}

impl VolumeServer {
    pub fn new(handler: Arc<VolumeHandler>, bind_address: impl Into<String>) -> Self {
        Self {
            handler,
            bind_address: bind_address.into(),
        }
    }

    /// Bind and serve in the background until stopped.
    pub async fn start(self) -> Result<RunningVolumeServer> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        let bound_address = listener.local_addr()?;
        let cancellation_token = CancellationToken::new();
        let server_handle = tokio::spawn(serve(listener, self.handler, cancellation_token.child_token()));
        info!(address = %bound_address, "volume rpc server listening");
        Ok(RunningVolumeServer {
            bound_address,
            cancellation_token,
            server_handle,
        })
    }
}

/// Handle for a running [`VolumeServer`].
#[derive(Debug)]
pub struct RunningVolumeServer {
    bound_address: SocketAddr,
    cancellation_token: CancellationToken,
    server_handle: JoinHandle<()>,
}

impl RunningVolumeServer {
    pub fn bound_address(&self) -> SocketAddr {
        self.bound_address
    }

    pub async fn stop(self) -> Result<()> {
        self.cancellation_token.cancel();
        self.server_handle
            .await
            .map_err(|error| anyhow!("volume rpc server task failed: {error}"))
    }
}

/// Accept connections until `cancellation_token` fires; one task per connection.
pub async fn serve(listener: TcpListener, handler: Arc<VolumeHandler>, cancellation_token: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "volume rpc connection accepted");
                    let handler = Arc::clone(&handler);
                    let shutdown = cancellation_token.child_token();
                    tokio::spawn(async move {
                        if let Err(error) = serve_connection(stream, handler, shutdown).await {
                            warn!(%peer, error = %error, "volume rpc connection failed");
                        }
                    });
                }
                Err(error) => warn!(error = %error, "failed to accept volume rpc connection"),
            },
        }
    }
}

async fn serve_connection(stream: TcpStream, handler: Arc<VolumeHandler>, shutdown: CancellationToken) -> Result<(), VolumeError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<VolumeRequest>(&line) {
            Ok(request) => handler.handle(&request).await,
            Err(error) => VolumeResponse::failed(format!("invalid request: {}", error)),
        };
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
    }
}
