//! Connection settings for the control-plane client.

use std::{env, fs, path::Path, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use url::Url;
use tracing::debug;

/// Base URL of the control plane API.
pub const CLUSTER_API_ENV: &str = "CASTOR_CLUSTER_API";
/// Bearer token override.
pub const CLUSTER_TOKEN_ENV: &str = "CASTOR_CLUSTER_TOKEN";
/// Request timeout, e.g. `30s`.
pub const CLUSTER_TIMEOUT_ENV: &str = "CASTOR_CLUSTER_TIMEOUT";

/// In-cluster default when no base URL is configured.
pub const DEFAULT_CLUSTER_API: &str = "https://kubernetes.default.svc";
/// Token mounted into pods by the control plane.
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ClusterSettings {
    /// Settings pointing at `base_url` with no credentials.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Resolve settings from the environment.
    ///
    /// Token resolution order:
    /// - `CASTOR_CLUSTER_TOKEN`
    /// - the service-account token file
    pub fn from_env() -> Result<Self> {
        let base_url = env::var(CLUSTER_API_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_CLUSTER_API.to_string());

        let token = env::var(CLUSTER_TOKEN_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| read_token_file(Path::new(SERVICE_ACCOUNT_TOKEN_PATH)));

        let timeout = match env::var(CLUSTER_TIMEOUT_ENV) {
            Ok(raw) => castor_util::parse_duration(&raw).with_context(|| format!("invalid {}", CLUSTER_TIMEOUT_ENV))?,
            Err(_) => DEFAULT_TIMEOUT,
        };

        let settings = Self { base_url, token, timeout };
        settings.validate()?;
        debug!(base_url = %settings.base_url, has_token = settings.token.is_some(), "cluster settings resolved");
        Ok(settings)
    }

    /// Check that the base URL is an absolute http(s) URL with a host.
    pub fn validate(&self) -> Result<()> {
        let parsed = Url::parse(&self.base_url).map_err(|error| anyhow!("invalid cluster API URL '{}': {}", self.base_url, error))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("cluster API URL must use http or https; got '{}://'", parsed.scheme());
        }
        if parsed.host_str().is_none() {
            bail!("cluster API URL '{}' must include a host", self.base_url);
        }
        Ok(())
    }
}

fn read_token_file(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let token = content.trim();
    if token.is_empty() { None } else { Some(token.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_http_and_https() {
        assert!(ClusterSettings::new("http://127.0.0.1:8001").validate().is_ok());
        assert!(ClusterSettings::new("https://kubernetes.default.svc").validate().is_ok());
    }

    #[test]
    fn validate_rejects_other_schemes() {
        let error = ClusterSettings::new("ftp://cluster").validate().expect_err("ftp");
        assert!(error.to_string().contains("http or https"), "unexpected error: {error}");
        assert!(ClusterSettings::new("not a url").validate().is_err());
    }
}
