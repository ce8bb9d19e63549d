//! Composite-template run entry.
//!
//! A [`CompositeEngine`] owns one composite template and the collaborators it
//! needs. Each [`CompositeEngine::run`] builds a fresh value context, layers
//! the caller's configuration over the template defaults, runs the task group
//! and follows fallback templates on version mismatches.

use std::sync::Arc;

use castor_types::{CompositeTemplate, ConfigEntry, validate_composite_template};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::EngineError;
use crate::cluster::ClusterProvider;
use crate::config::{config_to_map, merge_config};
use crate::context::{CONFIG_KEY, LIST_ITEMS_KEY, TASK_RESULT_KEY, ValueContext};
use crate::dsl::CommandRuntime;
use crate::fetch::TaskSpecFetcher;
use crate::group::{GroupContext, GroupOutcome, TaskGroupRunner};
use crate::meta::RetryPolicy;
use crate::settings::EngineSettings;
use crate::template::TemplatePipeline;

pub struct CompositeEngine {
    template: CompositeTemplate,
    fetcher: Arc<dyn TaskSpecFetcher>,
    cluster: Arc<dyn ClusterProvider>,
    pipeline: TemplatePipeline,
    settings: EngineSettings,
    config: Vec<ConfigEntry>,
    runtime_values: Option<(String, Map<String, Value>)>,
}

impl CompositeEngine {
    pub fn new(template: CompositeTemplate, fetcher: Arc<dyn TaskSpecFetcher>, cluster: Arc<dyn ClusterProvider>) -> Self {
        Self {
            template,
            fetcher,
            cluster,
            pipeline: TemplatePipeline::new(),
            settings: EngineSettings::default(),
            config: Vec::new(),
            runtime_values: None,
        }
    }

    /// Fetch the composite template called `name` and build an engine for it.
    pub async fn load(
        name: &str,
        fetcher: Arc<dyn TaskSpecFetcher>,
        cluster: Arc<dyn ClusterProvider>,
        cancel: &CancellationToken,
    ) -> Result<Self, EngineError> {
        let template = fetcher.fetch_composite(name, cancel).await?;
        Ok(Self::new(template, fetcher, cluster))
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Enable run-command helpers in templates.
    pub fn with_command_runtime(mut self, runtime: CommandRuntime) -> Self {
        self.pipeline = TemplatePipeline::with_runtime(runtime);
        self
    }

    /// High-priority configuration layered over the template defaults.
    pub fn with_config(mut self, config: Vec<ConfigEntry>) -> Self {
        self.config = config;
        self
    }

    /// Caller values exposed at the top-level `key`. A blank key is ignored.
    pub fn with_values(mut self, key: &str, values: Map<String, Value>) -> Self {
        let key = key.trim();
        self.runtime_values = (!key.is_empty()).then(|| (key.to_string(), values));
        self
    }

    pub fn template(&self) -> &CompositeTemplate {
        &self.template
    }

    /// The value context a run starts from.
    ///
    /// `Config` holds the merged configuration, `ListItems` and `TaskResult`
    /// start empty and the caller's values sit at their key.
    pub fn initial_values(&self) -> Result<ValueContext, EngineError> {
        let merged = merge_config(&self.config, &self.template.defaults);
        let mut values = Map::new();
        values.insert(CONFIG_KEY.to_string(), Value::Object(config_to_map(&merged)?));
        values.insert(LIST_ITEMS_KEY.to_string(), Value::Object(Map::new()));
        values.insert(TASK_RESULT_KEY.to_string(), Value::Object(Map::new()));
        let mut context = ValueContext::from_map(values);
        if let Some((key, runtime)) = &self.runtime_values {
            context.set(key, Value::Object(runtime.clone()));
        }
        Ok(context)
    }

    /// Run the template and return the rendered output task.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Vec<u8>, EngineError> {
        let mut values = self.initial_values()?;
        self.run_with(&mut values, cancel).await
    }

    /// Run against a caller-provided value context.
    ///
    /// A version mismatch hands the same context to the configured fallback
    /// template; a fallback chain that returns to a template already run
    /// surfaces the mismatch instead.
    pub async fn run_with(&self, values: &mut ValueContext, cancel: &CancellationToken) -> Result<Vec<u8>, EngineError> {
        let mut template = self.template.clone();
        let mut visited: Vec<String> = Vec::new();
        loop {
            validate_composite_template(&template).map_err(EngineError::Parse)?;
            visited.push(template.name.clone());
            let runner = self.prepare(&template, cancel).await?;
            let namespace = self.task_namespace(&template);
            let ctx = GroupContext {
                pipeline: &self.pipeline,
                cluster: self.cluster.as_ref(),
                namespace: &namespace,
                cancel,
                default_retry: RetryPolicy::parse(&self.settings.default_retry),
            };
            info!(template = %template.name, tasks = runner.len(), "composite template run started");
            match runner.run(ctx, values).await? {
                GroupOutcome::Output(output) => {
                    info!(template = %template.name, bytes = output.len(), "composite template run finished");
                    return Ok(output);
                }
                GroupOutcome::Fallback { template: next, cause } => {
                    if visited.iter().any(|name| name == &next) {
                        warn!(template = %template.name, fallback = %next, "fallback already attempted in this run");
                        return Err(cause);
                    }
                    template = self.fetcher.fetch_composite(&next, cancel).await?;
                    if template.name.trim().is_empty() {
                        template.name = next;
                    }
                }
            }
        }
    }

    async fn prepare(&self, template: &CompositeTemplate, cancel: &CancellationToken) -> Result<TaskGroupRunner, EngineError> {
        let namespace = self.task_namespace(template);
        let mut runner = TaskGroupRunner::new();
        for name in &template.run_tasks {
            let task = self.fetcher.fetch(&namespace, name, cancel).await?;
            runner.add_run_task(task)?;
        }
        if let Some(output) = template.output_task.as_deref().filter(|name| !name.trim().is_empty()) {
            let task = self.fetcher.fetch(&namespace, output, cancel).await?;
            runner.set_output_task(task)?;
        }
        runner.set_fallback(template.fallback.clone());
        debug!(template = %template.name, namespace = %namespace, tasks = runner.len(), "task group prepared");
        Ok(runner)
    }

    fn task_namespace(&self, template: &CompositeTemplate) -> String {
        match template.task_namespace.trim() {
            "" => self.settings.task_namespace.clone(),
            namespace => namespace.to_string(),
        }
    }
}
