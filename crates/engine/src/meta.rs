//! Meta-task execution.
//!
//! A rendered meta document becomes a [`MetaTask`]. The [`MetaExecutor`]
//! resolves its dispatch, talks to the cluster in the task's namespace(s),
//! projects the returned payload through the task's queries and retries read
//! actions while verification fails.

use std::time::Duration;

use castor_api::ListOptions;
use castor_types::{MetaProps, MetaSpec, TaskAction};
use castor_util::parse_duration;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::EngineError;
use crate::cluster::ClusterProvider;
use crate::dispatch::{self, Operation};
use crate::patch::TaskPatch;
use crate::query::run_queries;

/// Retry used when a task declares none or an unreadable one.
pub const DEFAULT_RETRY: &str = "1,0s";

/// `"<attempts>,<interval>"` retry budget of a read task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            interval: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Parse a retry declaration.
    ///
    /// Blank or malformed input yields the default of one attempt without
    /// delay. Negative attempts clamp to zero, which still executes once.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::default();
        }
        let (attempts, interval) = raw.split_once(',').unwrap_or((raw, "0s"));
        let Ok(attempts) = attempts.trim().parse::<i64>() else {
            return Self::default();
        };
        let Ok(interval) = parse_duration(interval.trim()) else {
            return Self::default();
        };
        Self {
            attempts: attempts.clamp(0, i64::from(u32::MAX)) as u32,
            interval,
        }
    }

    /// Number of times the dispatch runs at most.
    pub fn budget(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// A decoded meta document.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaTask {
    pub spec: MetaSpec,
    pub action: TaskAction,
}

impl MetaTask {
    /// Decode a rendered meta document. A task identity is mandatory.
    pub fn parse(rendered: &str) -> Result<Self, EngineError> {
        if rendered.trim().is_empty() {
            return Err(EngineError::Parse("empty meta document".into()));
        }
        let spec = MetaSpec::from_yaml(rendered)?;
        if spec.id.trim().is_empty() {
            return Err(EngineError::Parse("meta is missing its task id".into()));
        }
        let action = spec.action().map_err(EngineError::Parse)?;
        Ok(Self { spec, action })
    }

    pub fn id(&self) -> &str {
        self.spec.id.trim()
    }

    /// Properties for every repetition, paired with its repeat resource.
    ///
    /// Without `repeatWith` there is exactly one repetition using the task's
    /// own properties.
    pub fn repetitions(&self) -> Vec<(Option<String>, MetaProps)> {
        let repeat = &self.spec.repeat_with;
        if repeat.is_empty() {
            return vec![(None, self.spec.props.clone())];
        }
        (0..repeat.len())
            .map(|index| {
                let resource = repeat.resources.get(index).cloned();
                let props = match repeat.metas.get(index) {
                    Some(overrides) => self.spec.props.select_override(overrides),
                    None => self.spec.props.clone(),
                };
                (resource, props)
            })
            .collect()
    }

    /// The synthetic delete that undoes a create of `object_name`.
    pub fn rollback_for(&self, object_name: &str, namespace: &str) -> MetaTask {
        let mut spec = self.spec.clone();
        spec.action = TaskAction::Delete.as_str().to_string();
        spec.props.object_name = object_name.to_string();
        spec.props.run_namespace = namespace.to_string();
        spec.props.retry = String::new();
        spec.queries.clear();
        spec.patch = None;
        spec.repeat_with = Default::default();
        MetaTask {
            spec,
            action: TaskAction::Delete,
        }
    }
}

/// Input a dispatch needs besides the meta.
#[derive(Debug, Clone, Default)]
pub enum TaskBody {
    #[default]
    None,
    /// Object to create.
    Object(Value),
    Patch(TaskPatch),
}

/// Everything a dispatch produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaOutcome {
    /// Payload to expose as `JsonResult` while the task finishes.
    pub raw: Option<Vec<u8>>,
    /// Projected aliases; for multi-namespace lists keyed by namespace first.
    pub results: Map<String, Value>,
    /// Parsed list payload(s) for `ListItems`.
    pub list_items: Option<Value>,
}

/// Objects a dispatch created, as `(name, namespace)`.
///
/// Entries are pushed as soon as the cluster accepts a create, so they survive
/// a later failure of the same dispatch.
pub type CreatedObjects = Vec<(String, String)>;

/// Runs meta tasks against the cluster.
pub struct MetaExecutor<'a> {
    cluster: &'a dyn ClusterProvider,
    default_namespace: &'a str,
    cancel: &'a CancellationToken,
    default_retry: RetryPolicy,
}

impl<'a> MetaExecutor<'a> {
    pub fn new(cluster: &'a dyn ClusterProvider, default_namespace: &'a str, cancel: &'a CancellationToken) -> Self {
        Self {
            cluster,
            default_namespace,
            cancel,
            default_retry: RetryPolicy::default(),
        }
    }

    /// Retry for read tasks whose `retry` is blank.
    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    /// Dispatch `task` with `props`, retrying read actions on verify errors.
    ///
    /// Objects created on the way are appended to `created` whether or not
    /// the dispatch succeeds as a whole.
    pub async fn execute(
        &self,
        task: &MetaTask,
        props: &MetaProps,
        body: &TaskBody,
        created: &mut CreatedObjects,
    ) -> Result<MetaOutcome, EngineError> {
        let operation = dispatch::resolve(task.action, &task.spec.api_version, &task.spec.kind)?;
        let retry = match (task.action.is_retryable(), props.retry.trim()) {
            (false, _) => RetryPolicy::default(),
            (true, "") => self.default_retry,
            (true, declared) => RetryPolicy::parse(declared),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(task, props, body, operation, created).await {
                Err(error) if error.is_verify() && attempt < retry.budget() => {
                    warn!(
                        task_id = %task.id(),
                        attempt,
                        budget = retry.budget(),
                        error = %error,
                        "verification failed; retrying"
                    );
                    self.pause(retry.interval).await?;
                }
                Err(error) => {
                    if error.is_verify() && attempt > 1 {
                        warn!(task_id = %task.id(), attempts = attempt, "retries exhausted");
                    }
                    return Err(error);
                }
                Ok(outcome) => return Ok(outcome),
            }
        }
    }

    async fn pause(&self, interval: Duration) -> Result<(), EngineError> {
        if interval.is_zero() {
            return if self.cancel.is_cancelled() { Err(EngineError::Cancelled) } else { Ok(()) };
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(interval) => Ok(()),
        }
    }

    fn namespaces(&self, props: &MetaProps) -> Vec<String> {
        let namespaces = props.run_namespaces();
        if namespaces.is_empty() {
            vec![self.default_namespace.to_string()]
        } else {
            namespaces
        }
    }

    async fn attempt(
        &self,
        task: &MetaTask,
        props: &MetaProps,
        body: &TaskBody,
        operation: Operation,
        created: &mut CreatedObjects,
    ) -> Result<MetaOutcome, EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let id = task.id();
        let namespace = self.namespaces(props).remove(0);
        let object_name = props.object_name.trim();

        match operation {
            Operation::Create(resource) => {
                let TaskBody::Object(object) = body else {
                    return Err(EngineError::Parse(format!("task '{}' has no object to create", id)));
                };
                if !object.is_object() {
                    return Err(EngineError::Parse(format!("task '{}' body is not a mapping", id)));
                }
                let client = self.cluster.scoped(&namespace);
                let raw = client.create(&resource, object, self.cancel).await?;
                let name = created_name(&raw, object);
                info!(task_id = %id, kind = %resource.kind, object = %name, namespace = %namespace, "object created");
                if !name.is_empty() {
                    created.push((name, namespace.clone()));
                }
                let projections = run_queries(id, &raw, &task.spec.queries, true)?;
                Ok(MetaOutcome {
                    raw: Some(raw),
                    results: into_map(projections),
                    list_items: None,
                })
            }
            Operation::Patch(resource) => {
                let TaskBody::Patch(patch) = body else {
                    return Err(EngineError::Parse(format!("task '{}' has no patch", id)));
                };
                if object_name.is_empty() {
                    return Err(EngineError::Parse(format!("task '{}' patches without an objectName", id)));
                }
                let client = self.cluster.scoped(&namespace);
                let raw = client.patch(&resource, object_name, patch, self.cancel).await?;
                info!(task_id = %id, kind = %resource.kind, object = %object_name, patch_type = %patch.patch_type, "object patched");
                let projections = run_queries(id, &raw, &task.spec.queries, true)?;
                Ok(MetaOutcome {
                    raw: Some(raw),
                    results: into_map(projections),
                    ..MetaOutcome::default()
                })
            }
            Operation::Delete(resource) => {
                let names = props.object_names();
                if names.is_empty() {
                    warn!(task_id = %id, kind = %resource.kind, "delete without objectName; nothing to do");
                    return Ok(MetaOutcome::default());
                }
                let client = self.cluster.scoped(&namespace);
                for name in names {
                    client.delete(&resource, &name, self.cancel).await?;
                    info!(task_id = %id, kind = %resource.kind, object = %name, namespace = %namespace, "object deleted");
                }
                Ok(MetaOutcome::default())
            }
            Operation::Get(resource) => {
                if object_name.is_empty() {
                    return Err(EngineError::Parse(format!("task '{}' gets without an objectName", id)));
                }
                let client = self.cluster.scoped(&namespace);
                let raw = client.get(&resource, object_name, self.cancel).await?;
                debug!(task_id = %id, kind = %resource.kind, object = %object_name, bytes = raw.len(), "object fetched");
                let projections = run_queries(id, &raw, &task.spec.queries, true)?;
                Ok(MetaOutcome {
                    raw: Some(raw),
                    results: into_map(projections),
                    ..MetaOutcome::default()
                })
            }
            Operation::List(resource) => self.list(task, props, resource).await,
        }
    }

    async fn list(
        &self,
        task: &MetaTask,
        props: &MetaProps,
        resource: castor_api::ResourceRef,
    ) -> Result<MetaOutcome, EngineError> {
        let id = task.id();
        let options = list_options(&props.options)?;
        let namespaces = self.namespaces(props);

        if let [namespace] = namespaces.as_slice() {
            let raw = self.cluster.scoped(namespace).list(&resource, &options, self.cancel).await?;
            debug!(task_id = %id, kind = %resource.kind, namespace = %namespace, bytes = raw.len(), "objects listed");
            let projections = run_queries(id, &raw, &task.spec.queries, false)?;
            let items = serde_json::from_slice::<Value>(&raw).unwrap_or(Value::Null);
            return Ok(MetaOutcome {
                raw: Some(raw),
                results: into_map(projections),
                list_items: Some(items),
            });
        }

        let mut results = Map::new();
        let mut items = Map::new();
        for namespace in &namespaces {
            let raw = self.cluster.scoped(namespace).list(&resource, &options, self.cancel).await?;
            debug!(task_id = %id, kind = %resource.kind, namespace = %namespace, bytes = raw.len(), "objects listed");
            let projections = run_queries(id, &raw, &task.spec.queries, false)?;
            results.insert(namespace.clone(), Value::Object(into_map(projections)));
            items.insert(namespace.clone(), serde_json::from_slice::<Value>(&raw).unwrap_or(Value::Null));
        }
        let combined = Value::Object(items);
        let raw = serde_json::to_vec(&combined).map_err(|error| EngineError::Parse(error.to_string()))?;
        Ok(MetaOutcome {
            raw: Some(raw),
            results,
            list_items: Some(combined),
        })
    }
}

fn list_options(raw: &str) -> Result<ListOptions, EngineError> {
    if raw.trim().is_empty() {
        return Ok(ListOptions::default());
    }
    serde_yaml::from_str::<Option<ListOptions>>(raw)
        .map(Option::unwrap_or_default)
        .map_err(|error| EngineError::Parse(format!("invalid list options: {}", error)))
}

/// Name of a created object: the server's `metadata.name`, else the submitted one.
fn created_name(raw: &[u8], submitted: &Value) -> String {
    let name_of = |object: &Value| {
        object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    };
    serde_json::from_slice::<Value>(raw)
        .ok()
        .and_then(|returned| name_of(&returned))
        .or_else(|| name_of(submitted))
        .unwrap_or_default()
}

fn into_map(projections: IndexMap<String, String>) -> Map<String, Value> {
    projections
        .into_iter()
        .map(|(alias, value)| (alias, Value::String(value)))
        .collect()
}
