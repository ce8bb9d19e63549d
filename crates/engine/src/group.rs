//! Sequential execution of the run-tasks of a composite template.

use std::collections::HashSet;

use castor_types::RunTaskSpec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::EngineError;
use crate::cluster::ClusterProvider;
use crate::context::ValueContext;
use crate::meta::{MetaExecutor, MetaTask, RetryPolicy, TaskBody};
use crate::task::TaskExecutor;
use crate::template::TemplatePipeline;

/// Collaborators shared by every task of a run.
#[derive(Clone, Copy)]
pub struct GroupContext<'a> {
    pub pipeline: &'a TemplatePipeline,
    pub cluster: &'a dyn ClusterProvider,
    /// Namespace used by tasks that declare no `runNamespace`.
    pub namespace: &'a str,
    pub cancel: &'a CancellationToken,
    /// Retry for read tasks that declare none.
    pub default_retry: RetryPolicy,
}

/// How a group run ended when it did not fail outright.
#[derive(Debug)]
pub enum GroupOutcome {
    /// Rendered output task; empty without one.
    Output(Vec<u8>),
    /// A version mismatch aborted the run and a fallback template is
    /// configured. Rollback has already run.
    Fallback { template: String, cause: EngineError },
}

/// Ordered run-tasks with an optional output task and fallback.
#[derive(Debug, Clone, Default)]
pub struct TaskGroupRunner {
    tasks: Vec<RunTaskSpec>,
    output: Option<RunTaskSpec>,
    fallback: Option<String>,
}

impl TaskGroupRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` after the ones already added. A task without meta is rejected.
    pub fn add_run_task(&mut self, task: RunTaskSpec) -> Result<(), EngineError> {
        if task.meta.trim().is_empty() {
            return Err(EngineError::Parse(format!("run task '{}' has no meta", task.name)));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn set_output_task(&mut self, task: RunTaskSpec) -> Result<(), EngineError> {
        if task.task.trim().is_empty() {
            return Err(EngineError::Parse(format!("output task '{}' has no body", task.name)));
        }
        self.output = Some(task);
        Ok(())
    }

    pub fn set_fallback(&mut self, fallback: Option<String>) {
        self.fallback = fallback
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every task in order, then render the output task.
    ///
    /// # Notes
    /// - Task ids must be unique within the run, compared case-insensitively.
    /// - The first failure stops the run, including a failing output task.
    ///   Objects created so far are deleted in reverse order; a failing delete
    ///   is logged and skipped.
    /// - A version mismatch with a fallback configured yields
    ///   [`GroupOutcome::Fallback`] instead of an error.
    pub async fn run(&self, ctx: GroupContext<'_>, values: &mut ValueContext) -> Result<GroupOutcome, EngineError> {
        let mut plan: Vec<MetaTask> = Vec::new();
        let error = match self.run_tasks(ctx, values, &mut plan).await {
            Ok(()) => match self.render_output(ctx, values) {
                Ok(rendered) => return Ok(GroupOutcome::Output(rendered)),
                Err(error) => error,
            },
            Err(error) => error,
        };

        rollback(ctx, &plan).await;
        if error.is_version_mismatch()
            && let Some(fallback) = &self.fallback
        {
            info!(fallback = %fallback, error = %error, "version mismatch; handing over to fallback template");
            return Ok(GroupOutcome::Fallback {
                template: fallback.clone(),
                cause: error,
            });
        }
        Err(error)
    }

    fn render_output(&self, ctx: GroupContext<'_>, values: &mut ValueContext) -> Result<Vec<u8>, EngineError> {
        let Some(output) = &self.output else {
            return Ok(Vec::new());
        };
        let rendered = TaskExecutor::new(output, ctx).output(values)?;
        debug!(task = %output.name, bytes = rendered.len(), "output task rendered");
        Ok(rendered)
    }

    async fn run_tasks(
        &self,
        ctx: GroupContext<'_>,
        values: &mut ValueContext,
        plan: &mut Vec<MetaTask>,
    ) -> Result<(), EngineError> {
        let mut seen: HashSet<String> = HashSet::new();
        for spec in &self.tasks {
            if ctx.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let executor = TaskExecutor::new(spec, ctx);
            let meta = executor.meta(values).map_err(|error| executor.wrap(None, values, error))?;
            if !seen.insert(meta.id().to_ascii_lowercase()) {
                let error = EngineError::Parse(format!("duplicate task id '{}'", meta.id()));
                return Err(executor.wrap(Some(&meta), values, error));
            }

            let outcome = executor.execute_meta(&meta, values, plan).await?;
            if outcome.created > 0 {
                debug!(task_id = %outcome.id, entries = outcome.created, "rollback entries recorded");
            }
        }
        Ok(())
    }
}

/// Undo created objects, newest first.
///
/// Rollback uses its own token so it still runs after the run was cancelled.
async fn rollback(ctx: GroupContext<'_>, plan: &[MetaTask]) {
    if plan.is_empty() {
        return;
    }
    let token = CancellationToken::new();
    let executor = MetaExecutor::new(ctx.cluster, ctx.namespace, &token);
    for task in plan.iter().rev() {
        match executor
            .execute(task, &task.spec.props, &TaskBody::None, &mut Vec::new())
            .await
        {
            Ok(_) => info!(
                task_id = %task.id(),
                kind = %task.spec.kind,
                object = %task.spec.props.object_name,
                "rolled back"
            ),
            Err(error) => {
                let error = EngineError::Rollback(format!(
                    "delete {} '{}' for task '{}': {}",
                    task.spec.kind,
                    task.spec.props.object_name,
                    task.id(),
                    error
                ));
                warn!(error = %error, "rollback step failed");
            }
        }
    }
}
