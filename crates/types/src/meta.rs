//! Meta section of a run-task.
//!
//! The meta document is templated against the value context and then decoded
//! into [`MetaSpec`]. It names the task, selects the target resource type and
//! action, and carries the per-task parameters (namespace, object name, list
//! options, retry, patch, queries and repetition).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Actions a run-task may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Get,
    List,
    /// Create or update; creates are rolled back by a delete.
    Put,
    Patch,
    Delete,
    /// Render-only action used by output tasks.
    Output,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Get => "get",
            TaskAction::List => "list",
            TaskAction::Put => "put",
            TaskAction::Patch => "patch",
            TaskAction::Delete => "delete",
            TaskAction::Output => "output",
        }
    }

    /// Only read actions are eligible for verify-driven retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskAction::Get | TaskAction::List)
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskAction {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(TaskAction::Get),
            "list" => Ok(TaskAction::List),
            "put" => Ok(TaskAction::Put),
            "patch" => Ok(TaskAction::Patch),
            "delete" => Ok(TaskAction::Delete),
            "output" => Ok(TaskAction::Output),
            other => Err(format!("unsupported task action '{}'", other)),
        }
    }
}

/// Overridable per-task properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetaProps {
    /// Namespace the task runs in. Comma separated for multi-namespace lists.
    #[serde(default)]
    pub run_namespace: String,
    /// Owner reference recorded on rollback entries.
    #[serde(default)]
    pub owner: String,
    /// Target object name. Comma separated for multi-object deletes.
    #[serde(default)]
    pub object_name: String,
    /// Raw list options, e.g. `labelSelector: app=jiva`.
    #[serde(default)]
    pub options: String,
    /// `"<attempts>,<interval>"`, e.g. `"10,2s"`.
    #[serde(default)]
    pub retry: String,
    /// Skip the task entirely.
    #[serde(default)]
    pub disable: bool,
}

impl MetaProps {
    /// Apply non-blank fields of `given` on top of `self`.
    ///
    /// `disable` is always taken from `given`.
    pub fn select_override(&self, given: &MetaProps) -> MetaProps {
        fn pick(current: &str, candidate: &str) -> String {
            let candidate = candidate.trim();
            if candidate.is_empty() { current.to_string() } else { candidate.to_string() }
        }
        MetaProps {
            run_namespace: pick(&self.run_namespace, &given.run_namespace),
            owner: pick(&self.owner, &given.owner),
            object_name: pick(&self.object_name, &given.object_name),
            options: pick(&self.options, &given.options),
            retry: pick(&self.retry, &given.retry),
            disable: given.disable,
        }
    }

    /// `objectName` split on commas.
    pub fn object_names(&self) -> Vec<String> {
        split_csv(&self.object_name)
    }

    /// `runNamespace` split on commas.
    pub fn run_namespaces(&self) -> Vec<String> {
        split_csv(&self.run_namespace)
    }
}

/// Optional verification applied to a query result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifySpec {
    /// Expected count. Accepts a YAML string or integer.
    #[serde(default, deserialize_with = "string_or_number")]
    pub count: String,
    /// When set, the value is split by this separator and the parts counted.
    #[serde(default)]
    pub split: String,
}

impl VerifySpec {
    pub fn is_empty(&self) -> bool {
        self.count.trim().is_empty()
    }
}

/// One alias/path projection over a task result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuerySpec {
    pub alias: String,
    /// JSONPath expression. Empty means "use the well-known path of the alias".
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub verify: VerifySpec,
}

impl QuerySpec {
    pub fn new(alias: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            path: path.into(),
            verify: VerifySpec::default(),
        }
    }

    pub fn verified(mut self, count: impl Into<String>, split: impl Into<String>) -> Self {
        self.verify = VerifySpec {
            count: count.into(),
            split: split.into(),
        };
        self
    }
}

/// Patch declaration for patch actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatchSpec {
    /// One of `json`, `merge`, `strategic`.
    #[serde(rename = "type", default)]
    pub patch_type: String,
    /// Patch document as an embedded YAML string.
    #[serde(default)]
    pub pspec: String,
    /// Patch document as a YAML mapping. Takes precedence over `pspec`.
    #[serde(default)]
    pub specs: Option<serde_yaml::Value>,
}

/// Repetition of one task over a finite list of resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepeatWith {
    #[serde(default)]
    pub resources: Vec<String>,
    /// Per-item property overrides, matched by index.
    #[serde(default)]
    pub metas: Vec<MetaProps>,
}

impl RepeatWith {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.metas.is_empty()
    }

    /// Number of repetitions requested.
    pub fn len(&self) -> usize {
        self.resources.len().max(self.metas.len())
    }
}

/// Rendered meta document of a run-task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetaSpec {
    /// Task identity, unique within a run (case-insensitive).
    #[serde(default, alias = "identity")]
    pub id: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    /// Raw action string; see [`MetaSpec::action`].
    #[serde(default)]
    pub action: String,
    #[serde(flatten)]
    pub props: MetaProps,
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
    #[serde(default)]
    pub patch: Option<PatchSpec>,
    #[serde(default)]
    pub repeat_with: RepeatWith,
}

impl MetaSpec {
    /// Decode a rendered meta document.
    pub fn from_yaml(document: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(document)
    }

    /// Parsed action of this task.
    pub fn action(&self) -> Result<TaskAction, String> {
        self.action.parse()
    }

    /// Object names declared by this task, split on commas.
    pub fn object_names(&self) -> Vec<String> {
        self.props.object_names()
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }
    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(text)) => text,
        Some(Raw::Signed(number)) => number.to_string(),
        Some(Raw::Unsigned(number)) => number.to_string(),
        None => String::new(),
    })
}
