//! Task-spec fetchers.
//!
//! The engine resolves run-task names and fallback composite templates
//! through [`TaskSpecFetcher`]. [`ClusterTaskFetcher`] reads them from the
//! cluster; [`StaticTaskFetcher`] serves an in-memory bundle.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use castor_api::ClusterError;
use castor_api::resources::{CORE_V1_CONFIG_MAPS, OPENEBS_V1ALPHA1_COMPOSITE_TEMPLATES, OPENEBS_V1ALPHA1_RUN_TASKS};
use castor_types::{CompositeTemplate, RunTaskSpec};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::EngineError;
use crate::cluster::ClusterProvider;
use crate::settings::FetchStrategy;

#[async_trait]
pub trait TaskSpecFetcher: Send + Sync {
    /// Fetch the run-task called `name` from `namespace`.
    async fn fetch(&self, namespace: &str, name: &str, cancel: &CancellationToken) -> Result<RunTaskSpec, EngineError>;

    /// Fetch the composite template called `name`.
    async fn fetch_composite(&self, name: &str, cancel: &CancellationToken) -> Result<CompositeTemplate, EngineError>;
}

/// In-memory run-tasks and composite templates.
#[derive(Debug, Clone, Default)]
pub struct StaticTaskFetcher {
    tasks: HashMap<String, RunTaskSpec>,
    templates: HashMap<String, CompositeTemplate>,
}

impl StaticTaskFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: RunTaskSpec) -> Self {
        self.tasks.insert(task.name.clone(), task);
        self
    }

    pub fn with_template(mut self, template: CompositeTemplate) -> Self {
        self.templates.insert(template.name.clone(), template);
        self
    }
}

#[async_trait]
impl TaskSpecFetcher for StaticTaskFetcher {
    async fn fetch(&self, _namespace: &str, name: &str, _cancel: &CancellationToken) -> Result<RunTaskSpec, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Fetch("missing run task name".into()));
        }
        self.tasks
            .get(name.trim())
            .cloned()
            .ok_or_else(|| EngineError::Fetch(format!("run task '{}' not found", name)))
    }

    async fn fetch_composite(&self, name: &str, _cancel: &CancellationToken) -> Result<CompositeTemplate, EngineError> {
        self.templates
            .get(name.trim())
            .cloned()
            .ok_or_else(|| EngineError::Fetch(format!("composite template '{}' not found", name)))
    }
}

/// Reads run-tasks from the cluster.
///
/// With [`FetchStrategy::ResourceFirst`] the run-task custom resource is tried
/// first (`spec.meta`, `spec.task`, `spec.post`) and a config map of the same
/// name (`data.meta`, `data.task`, `data.post`) when it does not exist.
pub struct ClusterTaskFetcher {
    cluster: Arc<dyn ClusterProvider>,
    strategy: FetchStrategy,
}

impl ClusterTaskFetcher {
    pub fn new(cluster: Arc<dyn ClusterProvider>, strategy: FetchStrategy) -> Self {
        Self { cluster, strategy }
    }

    async fn from_resource(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<RunTaskSpec, ClusterError> {
        let raw = self
            .cluster
            .scoped(namespace)
            .get(&OPENEBS_V1ALPHA1_RUN_TASKS, name, cancel)
            .await?;
        Ok(bundle(name, &raw, "spec"))
    }

    async fn from_config_map(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<RunTaskSpec, ClusterError> {
        let raw = self
            .cluster
            .scoped(namespace)
            .get(&CORE_V1_CONFIG_MAPS, name, cancel)
            .await?;
        Ok(bundle(name, &raw, "data"))
    }
}

fn bundle(name: &str, raw: &[u8], section: &str) -> RunTaskSpec {
    let document = serde_json::from_slice::<Value>(raw).unwrap_or(Value::Null);
    let field = |key: &str| {
        document
            .get(section)
            .and_then(|fields| fields.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    RunTaskSpec {
        name: name.to_string(),
        meta: field("meta"),
        task: field("task"),
        post: field("post"),
    }
}

fn fetch_error(kind: &str, name: &str, error: ClusterError) -> EngineError {
    match error {
        ClusterError::Cancelled => EngineError::Cancelled,
        other => EngineError::Fetch(format!("{} '{}': {}", kind, name, other)),
    }
}

#[async_trait]
impl TaskSpecFetcher for ClusterTaskFetcher {
    async fn fetch(&self, namespace: &str, name: &str, cancel: &CancellationToken) -> Result<RunTaskSpec, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Fetch("missing run task name".into()));
        }
        if self.strategy == FetchStrategy::ResourceFirst {
            match self.from_resource(namespace, name, cancel).await {
                Ok(task) => return Ok(task),
                Err(error) if error.is_not_found() => {
                    debug!(task = %name, namespace = %namespace, "run task resource not found; trying config map");
                }
                Err(error) => return Err(fetch_error("run task", name, error)),
            }
        }
        self.from_config_map(namespace, name, cancel)
            .await
            .map_err(|error| fetch_error("run task", name, error))
    }

    async fn fetch_composite(&self, name: &str, cancel: &CancellationToken) -> Result<CompositeTemplate, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Fetch("missing composite template name".into()));
        }
        let raw = self
            .cluster
            .scoped("")
            .get(&OPENEBS_V1ALPHA1_COMPOSITE_TEMPLATES, name, cancel)
            .await
            .map_err(|error| fetch_error("composite template", name, error))?;
        let document = String::from_utf8_lossy(&raw);
        CompositeTemplate::from_yaml(&document)
            .map_err(|error| EngineError::Parse(format!("composite template '{}': {}", name, error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_reads_the_named_section() {
        let raw = br#"{"data":{"meta":"id: a","task":"kind: Pod"}}"#;
        let task = bundle("cm", raw, "data");
        assert_eq!(task.meta, "id: a");
        assert_eq!(task.task, "kind: Pod");
        assert_eq!(task.post, "");
    }

    #[tokio::test]
    async fn static_fetcher_rejects_blank_names() {
        let fetcher = StaticTaskFetcher::new().with_task(RunTaskSpec::new("a", "id: a", ""));
        let cancel = CancellationToken::new();
        assert!(fetcher.fetch("default", "a", &cancel).await.is_ok());
        let error = fetcher.fetch("default", " ", &cancel).await.expect_err("blank");
        assert!(matches!(error, EngineError::Fetch(_)), "unexpected error: {error}");
    }
}
