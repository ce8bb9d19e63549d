//! Line-oriented control socket of the iSCSI target daemon.
//!
//! A command is a single line. The daemon answers with one or more lines and
//! terminates the reply with a status line that starts with `OK` or `ERR`.

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::VolumeError;

pub const CMD_SNAP_CREATE: &str = "SNAPCREATE";
pub const CMD_SNAP_DESTROY: &str = "SNAPDESTROY";
pub const CMD_RESIZE: &str = "RESIZE";

/// Sends one command and returns every reply line.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn send_command(&self, command: &str) -> Result<Vec<String>, VolumeError>;
}

/// `true` when any reply line carries the `ERR` keyword.
pub fn reply_failed(lines: &[String]) -> bool {
    lines.iter().any(|line| line.contains("ERR"))
}

/// The second reply line, or `ERR` when the reply is too short.
pub fn reply_status(lines: &[String]) -> String {
    lines.get(1).cloned().unwrap_or_else(|| "ERR".to_string())
}

fn is_status_line(line: &str) -> bool {
    matches!(line.split_whitespace().next(), Some("OK") | Some("ERR"))
}

/// Control channel over a Unix stream socket.
#[derive(Debug, Clone)]
pub struct UnixControlChannel {
    path: PathBuf,
    timeout: Duration,
}

impl UnixControlChannel {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { path: path.into(), timeout }
    }

    async fn exchange(&self, command: &str) -> Result<Vec<String>, VolumeError> {
        let mut stream = UnixStream::connect(&self.path).await?;
        stream.write_all(format!("{}\r\n", command).as_bytes()).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut lines = Vec::new();
        let mut buffer = String::new();
        loop {
            buffer.clear();
            if reader.read_line(&mut buffer).await? == 0 {
                break;
            }
            let line = buffer.trim_end_matches(['\r', '\n']).to_string();
            let done = is_status_line(&line);
            lines.push(line);
            if done {
                break;
            }
        }
        Ok(lines)
    }
}

#[async_trait]
impl ControlChannel for UnixControlChannel {
    async fn send_command(&self, command: &str) -> Result<Vec<String>, VolumeError> {
        debug!(socket = %self.path.display(), command, "sending control command");
        match tokio::time::timeout(self.timeout, self.exchange(command)).await {
            Ok(result) => result,
            Err(_) => Err(VolumeError::Command(format!(
                "no reply to '{}' within {}s",
                command,
                self.timeout.as_secs()
            ))),
        }
    }
}
