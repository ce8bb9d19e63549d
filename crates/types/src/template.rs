//! Composite template and run-task documents.
//!
//! A composite template binds an ordered list of run-task names to an optional
//! output task, an optional fallback template and a list of default
//! configuration entries. Run-tasks are looked up by name and carry three raw
//! YAML documents that are templated before use.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::TypesError;

pub mod validation;

/// One configuration entry, either a template default or a caller override.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    /// Configuration key. Compared after trimming when layering.
    pub name: String,
    /// Free-form enable flag, usually `"true"` or `"false"`.
    #[serde(default)]
    pub enabled: String,
    /// Scalar value of the entry.
    #[serde(default)]
    pub value: String,
    /// Optional structured payload attached to the entry.
    #[serde(default)]
    pub data: IndexMap<String, String>,
}

impl ConfigEntry {
    /// Convenience constructor for a name/value pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

/// Top-level orchestration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompositeTemplate {
    /// Name of the template, used in logs and for fallback lookups.
    #[serde(default)]
    pub name: String,
    /// Namespace searched for run-tasks.
    #[serde(default)]
    pub task_namespace: String,
    /// Run-task names in execution order.
    #[serde(default)]
    pub run_tasks: Vec<String>,
    /// Run-task rendered after all run-tasks succeed.
    #[serde(default)]
    pub output_task: Option<String>,
    /// Composite template invoked when a version mismatch aborts this one.
    #[serde(default)]
    pub fallback: Option<String>,
    /// Low-priority configuration layer.
    #[serde(default)]
    pub defaults: Vec<ConfigEntry>,
}

/// Cluster resource layout of a composite template.
#[derive(Debug, Deserialize)]
struct CompositeTemplateResource {
    #[serde(default)]
    metadata: ResourceMetadata,
    #[serde(default)]
    spec: CompositeTemplateResourceSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceMetadata {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompositeTemplateResourceSpec {
    #[serde(default)]
    default_config: Vec<ConfigEntry>,
    #[serde(default)]
    task_namespace: String,
    #[serde(default)]
    run: ResourceRun,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    fallback: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceRun {
    #[serde(default)]
    tasks: Vec<String>,
}

impl From<CompositeTemplateResource> for CompositeTemplate {
    fn from(resource: CompositeTemplateResource) -> Self {
        let spec = resource.spec;
        Self {
            name: resource.metadata.name,
            task_namespace: spec.task_namespace,
            run_tasks: spec.run.tasks,
            output_task: spec.output.filter(|name| !name.trim().is_empty()),
            fallback: spec.fallback.filter(|name| !name.trim().is_empty()),
            defaults: spec.default_config,
        }
    }
}

impl CompositeTemplate {
    /// Parse a composite template from YAML.
    ///
    /// Both the flat layout (`name`, `runTasks`, ...) and the cluster resource
    /// layout (`metadata.name`, `spec.run.tasks`, ...) are accepted. The
    /// resource layout is detected by the presence of a top-level `spec`.
    pub fn from_yaml(document: &str) -> Result<Self, TypesError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(document)?;
        let is_resource = raw.as_mapping().is_some_and(|mapping| mapping.contains_key("spec"));
        if is_resource {
            let resource: CompositeTemplateResource = serde_yaml::from_value(raw)?;
            return Ok(resource.into());
        }
        if raw.is_null() {
            return Err(TypesError::Invalid("empty composite template document".into()));
        }
        Ok(serde_yaml::from_value(raw)?)
    }
}

/// A run-task bundle as returned by a task-spec fetcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunTaskSpec {
    /// Name the task was fetched by.
    #[serde(default)]
    pub name: String,
    /// Templated meta document.
    #[serde(default)]
    pub meta: String,
    /// Templated body document.
    #[serde(default)]
    pub task: String,
    /// Templated post-processing document; may be empty.
    #[serde(default)]
    pub post: String,
}

impl RunTaskSpec {
    pub fn new(name: impl Into<String>, meta: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta: meta.into(),
            task: task.into(),
            post: String::new(),
        }
    }

    pub fn with_post(mut self, post: impl Into<String>) -> Self {
        self.post = post.into();
        self
    }
}
