//! Host-side settings for the volume RPC server.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use tracing::debug;

use crate::protocol::RPC_PORT;

pub const ISTGT_SOCKET_ENV: &str = "CASTOR_ISTGT_SOCKET";
pub const ISTGT_CONF_ENV: &str = "CASTOR_ISTGT_CONF";
pub const RPC_LISTEN_ENV: &str = "CASTOR_VOLUME_RPC_LISTEN";

pub const DEFAULT_ISTGT_SOCKET: &str = "/var/run/istgt_ctl_sock";
pub const DEFAULT_ISTGT_CONF: &str = "/usr/local/etc/istgt/istgt.conf";

/// Seconds IO is quiesced before a snapshot or resize.
pub const IO_WAIT_SECS: u64 = 10;
/// Upper bound, in seconds, for the operation across all replicas.
pub const TOTAL_WAIT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct VolumeSettings {
    pub control_socket: PathBuf,
    pub istgt_conf: PathBuf,
    pub listen_address: String,
    pub io_wait: u64,
    pub total_wait: u64,
    /// Deadline for a single control-socket exchange.
    pub command_timeout: Duration,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            control_socket: PathBuf::from(DEFAULT_ISTGT_SOCKET),
            istgt_conf: PathBuf::from(DEFAULT_ISTGT_CONF),
            listen_address: format!("0.0.0.0:{}", RPC_PORT),
            io_wait: IO_WAIT_SECS,
            total_wait: TOTAL_WAIT_SECS,
            command_timeout: Duration::from_secs(TOTAL_WAIT_SECS + IO_WAIT_SECS),
        }
    }
}

impl VolumeSettings {
    /// Defaults overridden by `CASTOR_ISTGT_SOCKET`, `CASTOR_ISTGT_CONF` and
    /// `CASTOR_VOLUME_RPC_LISTEN`.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        if let Some(path) = non_empty_env(ISTGT_SOCKET_ENV) {
            settings.control_socket = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env(ISTGT_CONF_ENV) {
            settings.istgt_conf = PathBuf::from(path);
        }
        if let Some(address) = non_empty_env(RPC_LISTEN_ENV) {
            address
                .parse::<std::net::SocketAddr>()
                .with_context(|| format!("invalid {} '{}'", RPC_LISTEN_ENV, address))?;
            settings.listen_address = address;
        }
        debug!(socket = %settings.control_socket.display(), conf = %settings.istgt_conf.display(), "volume settings resolved");
        Ok(settings)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_rpc_port() {
        let settings = VolumeSettings::default();
        assert_eq!(settings.listen_address, "0.0.0.0:7777");
        assert_eq!(settings.control_socket, PathBuf::from("/var/run/istgt_ctl_sock"));
        assert_eq!((settings.io_wait, settings.total_wait), (10, 60));
    }
}
