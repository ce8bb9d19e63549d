//! Block-volume control plumbing.
//!
//! The host side runs a [`VolumeServer`] next to the iSCSI target daemon. It
//! accepts snapshot and resize requests over a JSON-lines TCP protocol and
//! turns each one into a command on the daemon's control socket. Callers reach
//! it through [`RpcClient`], or call a [`VolumeHandler`] in process; both
//! implement [`VolumeRpc`].

mod client;
pub mod control;
mod error;
pub mod istgt;
pub mod protocol;
mod server;
mod settings;

use async_trait::async_trait;

pub use client::RpcClient;
pub use control::{ControlChannel, UnixControlChannel};
pub use error::VolumeError;
pub use istgt::StorageLineGuard;
pub use protocol::{CommandStatus, PROTOCOL_VERSION, RPC_PORT, VolumeRequest, VolumeResponse};
pub use server::{RunningVolumeServer, VolumeHandler, VolumeServer, serve};
pub use settings::{DEFAULT_ISTGT_CONF, DEFAULT_ISTGT_SOCKET, IO_WAIT_SECS, TOTAL_WAIT_SECS, VolumeSettings};

/// Snapshot and resize calls, local or remote.
#[async_trait]
pub trait VolumeRpc: Send + Sync {
    async fn call(&self, request: VolumeRequest) -> Result<VolumeResponse, VolumeError>;
}
