//! JSON-lines wire format of the volume RPC endpoint.
//!
//! Each request and each response is one JSON object terminated by `\n`.

use serde::{Deserialize, Serialize};

pub const RPC_PORT: u16 = 7777;
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum VolumeRequest {
    CreateSnapshot { volume: String, snapshot: String, version: u32 },
    DeleteSnapshot { volume: String, snapshot: String, version: u32 },
    ResizeVolume { volume: String, size: String, version: u32 },
}

impl VolumeRequest {
    pub fn create_snapshot(volume: impl Into<String>, snapshot: impl Into<String>) -> Self {
        VolumeRequest::CreateSnapshot {
            volume: volume.into(),
            snapshot: snapshot.into(),
            version: PROTOCOL_VERSION,
        }
    }

    pub fn delete_snapshot(volume: impl Into<String>, snapshot: impl Into<String>) -> Self {
        VolumeRequest::DeleteSnapshot {
            volume: volume.into(),
            snapshot: snapshot.into(),
            version: PROTOCOL_VERSION,
        }
    }

    pub fn resize(volume: impl Into<String>, size: impl Into<String>) -> Self {
        VolumeRequest::ResizeVolume {
            volume: volume.into(),
            size: size.into(),
            version: PROTOCOL_VERSION,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            VolumeRequest::CreateSnapshot { .. } => "CreateSnapshot",
            VolumeRequest::DeleteSnapshot { .. } => "DeleteSnapshot",
            VolumeRequest::ResizeVolume { .. } => "ResizeVolume",
        }
    }

    pub fn volume(&self) -> &str {
        match self {
            VolumeRequest::CreateSnapshot { volume, .. }
            | VolumeRequest::DeleteSnapshot { volume, .. }
            | VolumeRequest::ResizeVolume { volume, .. } => volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatus {
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeResponse {
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VolumeResponse {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            status: CommandStatus { response: response.into() },
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: CommandStatus { response: "ERR".to_string() },
            error: Some(error.into()),
        }
    }

    /// A transport-level error or an `ERR` status.
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.status.response.contains("ERR")
    }
}
