//! Engine settings.
//!
//! Settings come from a JSON file named by `CASTOR_ENGINE_CONFIG` when set,
//! otherwise from individual environment variables. Missing fields take
//! their defaults.

use std::{env, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::meta::DEFAULT_RETRY;

/// Path of a JSON settings file.
pub const ENGINE_CONFIG_ENV: &str = "CASTOR_ENGINE_CONFIG";
/// Namespace used when neither the template nor the task names one.
pub const TASK_NAMESPACE_ENV: &str = "CASTOR_TASK_NAMESPACE";
/// `resource-first` or `configmap-only`.
pub const FETCH_STRATEGY_ENV: &str = "CASTOR_FETCH_STRATEGY";

pub const DEFAULT_TASK_NAMESPACE: &str = "default";

/// Where the cluster fetcher looks for run-tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    /// Run-task custom resource, then a config map of the same name.
    #[default]
    ResourceFirst,
    ConfigmapOnly,
}

impl std::str::FromStr for FetchStrategy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "resource-first" => Ok(FetchStrategy::ResourceFirst),
            "configmap-only" => Ok(FetchStrategy::ConfigmapOnly),
            other => anyhow::bail!("unknown fetch strategy '{}'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub task_namespace: String,
    /// Retry applied to read tasks that declare none.
    pub default_retry: String,
    pub fetch_strategy: FetchStrategy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            task_namespace: DEFAULT_TASK_NAMESPACE.to_string(),
            default_retry: DEFAULT_RETRY.to_string(),
            fetch_strategy: FetchStrategy::default(),
        }
    }
}

impl EngineSettings {
    /// Resolve settings from `CASTOR_ENGINE_CONFIG` or the environment.
    pub fn load() -> Result<Self> {
        match env::var(ENGINE_CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim())),
            _ => Self::from_env(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        if let Ok(namespace) = env::var(TASK_NAMESPACE_ENV)
            && !namespace.trim().is_empty()
        {
            settings.task_namespace = namespace.trim().to_string();
        }
        if let Ok(strategy) = env::var(FETCH_STRATEGY_ENV) {
            settings.fetch_strategy = strategy
                .parse()
                .with_context(|| format!("invalid {}", FETCH_STRATEGY_ENV))?;
        }
        debug!(namespace = %settings.task_namespace, strategy = ?settings.fetch_strategy, "engine settings resolved");
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let settings: Self =
            serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
        debug!(path = %path.display(), "engine settings loaded from file");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn file_settings_fill_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"taskNamespace": "openebs", "fetchStrategy": "configmap-only"}}"#).expect("write");
        let settings = EngineSettings::from_file(file.path()).expect("settings");
        assert_eq!(settings.task_namespace, "openebs");
        assert_eq!(settings.fetch_strategy, FetchStrategy::ConfigmapOnly);
        assert_eq!(settings.default_retry, DEFAULT_RETRY);
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("Resource-First".parse::<FetchStrategy>().expect("strategy"), FetchStrategy::ResourceFirst);
        assert!("cache".parse::<FetchStrategy>().is_err());
    }
}
