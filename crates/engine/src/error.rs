use castor_api::ClusterError;
use thiserror::Error;

use crate::jsonpath::PathError;

/// Failure of a composite-template run or one of its parts.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("template error: {0}")]
    Template(String),
    #[error("unsupported dispatch: {0}")]
    Dispatch(String),
    #[error("cluster error: {0}")]
    Cluster(ClusterError),
    #[error("verification failed: {0}")]
    Verify(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("version mismatch: {0}")]
    VersionMismatch(String),
    #[error("rollback failed: {0}")]
    Rollback(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(
        "task '{task}' failed (id '{id}', action '{action}', kind '{kind}', apiVersion '{api_version}', objectName '{object_name}', namespace '{namespace}'): {source}; values: {snapshot}"
    )]
    Task {
        task: String,
        id: String,
        action: String,
        kind: String,
        api_version: String,
        object_name: String,
        namespace: String,
        snapshot: String,
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Innermost error, looking through task wrappers.
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::Task { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_version_mismatch(&self) -> bool {
        matches!(self.root(), EngineError::VersionMismatch(_))
    }

    pub fn is_verify(&self) -> bool {
        matches!(self.root(), EngineError::Verify(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), EngineError::Cancelled)
    }
}

impl From<ClusterError> for EngineError {
    fn from(error: ClusterError) -> Self {
        match error {
            ClusterError::Cancelled => EngineError::Cancelled,
            other => EngineError::Cluster(other),
        }
    }
}

impl From<PathError> for EngineError {
    fn from(error: PathError) -> Self {
        EngineError::Parse(error.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(error: serde_yaml::Error) -> Self {
        EngineError::Parse(error.to_string())
    }
}
