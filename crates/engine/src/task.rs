//! Execution of a single run-task.
//!
//! A run-task renders its meta, dispatches against the cluster once per
//! repetition, records the projected results and finally renders its post
//! section while the raw payload is still visible. The raw payload is
//! redacted again before control returns to the group runner.

use castor_types::{PatchSpec, PostSpec, RunTaskSpec, TaskAction};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::EngineError;
use crate::context::{LIST_ITEMS_KEY, REPEAT_RESOURCE_KEY, TASK_RESULT_KEY, ValueContext};
use crate::meta::{MetaExecutor, MetaTask, TaskBody};
use crate::patch::TaskPatch;
use crate::post::{self, PostTarget};
use crate::group::GroupContext;

/// What a successful task leaves behind for the group runner.
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    /// Task id, empty for a task that never rendered its meta.
    pub id: String,
    /// Number of objects the task created.
    pub created: usize,
    /// Set when the meta disabled the task.
    pub skipped: bool,
}

/// Runs one run-task against a value context.
pub struct TaskExecutor<'a> {
    spec: &'a RunTaskSpec,
    ctx: GroupContext<'a>,
}

impl<'a> TaskExecutor<'a> {
    pub fn new(spec: &'a RunTaskSpec, ctx: GroupContext<'a>) -> Self {
        Self { spec, ctx }
    }

    /// Render the meta document into a [`MetaTask`].
    pub fn meta(&self, values: &mut ValueContext) -> Result<MetaTask, EngineError> {
        if self.spec.meta.trim().is_empty() {
            return Err(EngineError::Parse(format!("run task '{}' has no meta", self.spec.name)));
        }
        let rendered = self
            .ctx
            .pipeline
            .render(&format!("{}.meta", self.spec.name), &self.spec.meta, values)?;
        MetaTask::parse(&rendered)
    }

    /// Execute the task.
    ///
    /// # Arguments
    /// * `plan` - receives one delete per created object, as soon as the
    ///   create succeeds and even when the task fails afterwards
    ///
    /// # Notes
    /// - Results land at `TaskResult.<id>`, list payloads at `ListItems.<id>`.
    /// - Errors are wrapped in [`EngineError::Task`] with a redacted snapshot
    ///   of the value context.
    pub async fn execute(&self, values: &mut ValueContext, plan: &mut Vec<MetaTask>) -> Result<TaskOutcome, EngineError> {
        let meta = match self.meta(values) {
            Ok(meta) => meta,
            Err(error) => return Err(self.wrap(None, values, error)),
        };
        self.execute_meta(&meta, values, plan).await
    }

    /// Execute with a meta that was already rendered by [`TaskExecutor::meta`].
    pub async fn execute_meta(
        &self,
        meta: &MetaTask,
        values: &mut ValueContext,
        plan: &mut Vec<MetaTask>,
    ) -> Result<TaskOutcome, EngineError> {
        let result = self.run(meta, values, plan).await;
        values.redact_raw();
        values.remove(REPEAT_RESOURCE_KEY);
        result.map_err(|error| self.wrap(Some(meta), values, error))
    }

    async fn run(
        &self,
        meta: &MetaTask,
        values: &mut ValueContext,
        plan: &mut Vec<MetaTask>,
    ) -> Result<TaskOutcome, EngineError> {
        let id = meta.id().to_string();
        let mut outcome = TaskOutcome {
            id: id.clone(),
            ..TaskOutcome::default()
        };
        if meta.spec.props.disable {
            info!(task = %self.spec.name, task_id = %id, "task disabled; skipping");
            outcome.skipped = true;
            return Ok(outcome);
        }

        let executor = MetaExecutor::new(self.ctx.cluster, self.ctx.namespace, self.ctx.cancel)
            .with_default_retry(self.ctx.default_retry);
        for (resource, props) in meta.repetitions() {
            if props.disable {
                debug!(task_id = %id, resource = ?resource, "repetition disabled; skipping");
                continue;
            }
            if let Some(resource) = &resource {
                values.set(REPEAT_RESOURCE_KEY, Value::String(resource.clone()));
            }
            let body = self.body(meta, values)?;
            info!(
                task = %self.spec.name,
                task_id = %id,
                action = %meta.action,
                kind = %meta.spec.kind,
                namespace = %props.run_namespace,
                "task dispatched"
            );
            let mut created = Vec::new();
            let dispatched = executor.execute(meta, &props, &body, &mut created).await;
            outcome.created += created.len();
            plan.extend(created.iter().map(|(name, namespace)| meta.rollback_for(name, namespace)));
            let dispatched = dispatched?;

            if let Some(raw) = &dispatched.raw {
                values.set_raw(raw);
            }
            store_results(values, &id, dispatched.results);
            if let Some(items) = dispatched.list_items {
                values.set(&format!("{}.{}", LIST_ITEMS_KEY, id), items);
            }
        }

        self.post(meta, values)?;
        Ok(outcome)
    }

    fn body(&self, meta: &MetaTask, values: &mut ValueContext) -> Result<TaskBody, EngineError> {
        match meta.action {
            TaskAction::Put => {
                let rendered = self.render_task(values)?;
                let object: Value = serde_yaml::from_str(&rendered)?;
                if object.is_null() {
                    return Err(EngineError::Parse(format!("run task '{}' has an empty body", self.spec.name)));
                }
                Ok(TaskBody::Object(object))
            }
            TaskAction::Patch => {
                if let Some(patch) = &meta.spec.patch {
                    return Ok(TaskBody::Patch(TaskPatch::build(patch)?));
                }
                let rendered = self.render_task(values)?;
                let patch: PatchSpec = serde_yaml::from_str(&rendered)?;
                Ok(TaskBody::Patch(TaskPatch::build(&patch)?))
            }
            _ => Ok(TaskBody::None),
        }
    }

    fn render_task(&self, values: &mut ValueContext) -> Result<String, EngineError> {
        self.ctx
            .pipeline
            .render(&format!("{}.task", self.spec.name), &self.spec.task, values)
    }

    fn post(&self, meta: &MetaTask, values: &mut ValueContext) -> Result<(), EngineError> {
        if self.spec.post.trim().is_empty() {
            return Ok(());
        }
        let rendered = self
            .ctx
            .pipeline
            .render(&format!("{}.post", self.spec.name), &self.spec.post, values)?;
        if rendered.trim().is_empty() {
            return Ok(());
        }
        let spec = PostSpec::from_yaml(&rendered)?;
        let target = PostTarget {
            kind: &meta.spec.kind,
            action: meta.action.as_str(),
        };
        post::execute(&spec, target, values)
    }

    /// Render the body verbatim, without dispatching.
    pub fn output(&self, values: &mut ValueContext) -> Result<Vec<u8>, EngineError> {
        self.render_task(values)
            .map(String::into_bytes)
            .map_err(|error| self.wrap(None, values, error))
    }

    pub(crate) fn wrap(&self, meta: Option<&MetaTask>, values: &ValueContext, error: EngineError) -> EngineError {
        let field = |pick: fn(&MetaTask) -> String| meta.map(pick).unwrap_or_default();
        EngineError::Task {
            task: self.spec.name.clone(),
            id: field(|meta| meta.id().to_string()),
            action: field(|meta| meta.action.to_string()),
            kind: field(|meta| meta.spec.kind.clone()),
            api_version: field(|meta| meta.spec.api_version.clone()),
            object_name: field(|meta| meta.spec.props.object_name.clone()),
            namespace: field(|meta| meta.spec.props.run_namespace.clone()),
            snapshot: values.snapshot(),
            source: Box::new(error),
        }
    }
}

/// Merge projected aliases into `TaskResult.<id>`.
fn store_results(values: &mut ValueContext, id: &str, results: Map<String, Value>) {
    if results.is_empty() {
        return;
    }
    let path = format!("{}.{}", TASK_RESULT_KEY, id);
    let mut stored = match values.get(&path) {
        Some(Value::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };
    stored.extend(results);
    values.set(&path, Value::Object(stored));
}
