//! Run commands and their results.
//!
//! A run command is built inside a template with helpers such as
//! `(delete (jiva) (volume))` and travels between helpers as JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::messages::Messages;
use crate::jsonpath;

pub const ERR_NOT_SUPPORTED_CATEGORY: &str = "not supported category: invalid run command";
pub const ERR_NOT_SUPPORTED_ACTION: &str = "not supported action: invalid run command";
pub const ERR_INVALID_CATEGORY: &str = "invalid categories: invalid run command";
pub const ERR_EMPTY_CATEGORY: &str = "missing categories: invalid run command";
pub const SKIP_EXECUTION: &str = "will skip run command execution";

const SELECT_ALIAS_DELIMITER: &str = " as ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunAction {
    Get,
    List,
    Create,
    Update,
    Patch,
    Delete,
    Post,
    Put,
}

impl RunAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunAction::Get => "get",
            RunAction::List => "list",
            RunAction::Create => "create",
            RunAction::Update => "update",
            RunAction::Patch => "patch",
            RunAction::Delete => "delete",
            RunAction::Post => "post",
            RunAction::Put => "put",
        }
    }
}

impl fmt::Display for RunAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunAction {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "get" => Ok(RunAction::Get),
            "list" | "lst" => Ok(RunAction::List),
            "create" => Ok(RunAction::Create),
            "update" => Ok(RunAction::Update),
            "patch" => Ok(RunAction::Patch),
            "delete" => Ok(RunAction::Delete),
            "post" => Ok(RunAction::Post),
            "put" => Ok(RunAction::Put),
            other => Err(format!("unknown run command action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Jiva,
    Cstor,
    Volume,
    Snapshot,
    Pool,
    Http,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Jiva => "jiva",
            Category::Cstor => "cstor",
            Category::Volume => "volume",
            Category::Snapshot => "snapshot",
            Category::Pool => "pool",
            Category::Http => "http",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "jiva" => Ok(Category::Jiva),
            "cstor" => Ok(Category::Cstor),
            "volume" => Ok(Category::Volume),
            "snapshot" => Ok(Category::Snapshot),
            "pool" => Ok(Category::Pool),
            "http" => Ok(Category::Http),
            other => Err(format!("unknown run command category '{}'", other)),
        }
    }
}

/// Which executor a command resolves to, decided by its categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTarget {
    JivaVolume,
    Http,
    CstorSnapshot,
    CstorVolume,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommand {
    #[serde(default)]
    pub action: Option<RunAction>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub select_paths: Vec<String>,
    #[serde(default = "enabled")]
    pub will_run: bool,
    #[serde(default)]
    pub messages: Messages,
}

fn enabled() -> bool {
    true
}

impl Default for RunCommand {
    fn default() -> Self {
        Self {
            action: None,
            categories: Vec::new(),
            data: Map::new(),
            select_paths: Vec::new(),
            will_run: true,
            messages: Messages::default(),
        }
    }
}

impl RunCommand {
    pub fn new(action: RunAction) -> Self {
        Self {
            action: Some(action),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.categories.push(category);
        self
    }

    /// Set one input datum. Null values are kept but warned about.
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if value.is_null() {
            self.messages
                .warn(format!("nil value provided for '{}': run command may fail", key));
        }
        self.data.insert(key, value);
        self
    }

    pub fn with_select<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn disable(&mut self, reason: &str) {
        self.will_run = false;
        self.messages.error(reason);
    }

    pub fn has(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    /// Text datum; empty when missing.
    pub fn text(&self, key: &str) -> String {
        match self.data.get(key) {
            Some(Value::String(text)) => text.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn target(&self) -> CommandTarget {
        if self.has(Category::Jiva) && self.has(Category::Volume) {
            CommandTarget::JivaVolume
        } else if self.has(Category::Http) {
            CommandTarget::Http
        } else if self.has(Category::Cstor) && self.has(Category::Snapshot) {
            CommandTarget::CstorSnapshot
        } else if self.has(Category::Cstor) && self.has(Category::Volume) {
            CommandTarget::CstorVolume
        } else {
            CommandTarget::Unsupported
        }
    }

    /// Validate categories before execution; invalid commands are disabled.
    pub fn pre_run(&mut self) {
        if self.categories.is_empty() {
            self.disable(ERR_EMPTY_CATEGORY);
        }
        if self.has(Category::Jiva) && self.has(Category::Cstor) {
            self.disable(ERR_INVALID_CATEGORY);
        }
        if !self.will_run {
            self.messages.skip(SKIP_EXECUTION);
        }
    }

    /// One-line description used in messages.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.select_paths.is_empty() {
            parts.push(format!("select '{}'", self.select_paths.join("' '")));
        }
        parts.push(self.action.map(|action| action.as_str()).unwrap_or("").to_string());
        parts.extend(self.categories.iter().map(|category| category.as_str().to_string()));
        for (key, value) in &self.data {
            let shown = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            parts.push(format!("--{}={}", key, shown));
        }
        parts.push(format!("--willrun={}", self.will_run));
        parts.retain(|part| !part.is_empty());
        parts.join(" ")
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: &Value) -> Result<Self, String> {
        serde_json::from_value(value.clone()).map_err(|error| format!("not a run command: {}", error))
    }

    /// Alias/path pairs of the select list.
    pub fn alias_paths(&self) -> Vec<(String, String)> {
        self.select_paths
            .iter()
            .enumerate()
            .map(|(index, select)| match select.split_once(SELECT_ALIAS_DELIMITER) {
                Some((path, alias)) => (alias.trim().to_string(), path.trim().to_string()),
                None => (format!("s{}", index), select.trim().to_string()),
            })
            .collect()
    }

    /// Project a result through the select list; without selects the result is unchanged.
    pub fn post_run(&self, result: RunCommandResult) -> RunCommandResult {
        if self.select_paths.is_empty() {
            return result;
        }
        let RunCommandResult { result: value, mut debug } = result;
        if value.is_null() {
            debug.warn(format!(
                "nil command result: can not query select '{}'",
                self.select_paths.join("' '")
            ));
            return RunCommandResult::new(Value::Null, debug);
        }

        let mut selected = Map::new();
        for (alias, path) in self.alias_paths() {
            match jsonpath::query(&value, &path) {
                Ok(found) => {
                    selected.insert(alias, Value::String(found));
                }
                Err(error) => {
                    debug.warn(format!("select '{}' failed: {}", path, error));
                    selected.insert(alias, Value::String(String::new()));
                }
            }
        }
        RunCommandResult::new(Value::Object(selected), debug)
    }
}

/// Outcome of a run command: the result, the root cause and the debug log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunCommandResult {
    pub result: Value,
    pub debug: Messages,
}

impl RunCommandResult {
    pub fn new(result: Value, debug: Messages) -> Self {
        Self { result, debug }
    }

    pub fn error(&self) -> Option<&str> {
        self.debug.first_error()
    }

    /// Template-facing shape: `{result, error, debug}`.
    pub fn to_value(&self) -> Value {
        json!({
            "result": self.result,
            "error": self.error().unwrap_or(""),
            "debug": self.debug.to_string(),
        })
    }
}
