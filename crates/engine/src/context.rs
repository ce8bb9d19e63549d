//! Value context shared by the tasks of one run.
//!
//! The context is a nested JSON map. Reserved top-level keys:
//!
//! | Key | Holds |
//! |---|---|
//! | `Config` | merged configuration, `{name: {enabled, value, data}}` |
//! | `ListItems` | list results keyed by task id |
//! | `TaskResult` | per-task query results |
//! | `RuntimeObject` | parsed payload of the running task |
//! | `JsonResult` | raw payload of the running task |
//! | `RepeatResource` | current item of a repeated task |

use castor_util::{get_nested, redact_sensitive, remove_nested, set_nested, split_path};
use serde_json::{Map, Value};

pub const CONFIG_KEY: &str = "Config";
pub const LIST_ITEMS_KEY: &str = "ListItems";
pub const TASK_RESULT_KEY: &str = "TaskResult";
pub const RUNTIME_OBJECT_KEY: &str = "RuntimeObject";
pub const JSON_RESULT_KEY: &str = "JsonResult";
pub const REPEAT_RESOURCE_KEY: &str = "RepeatResource";

/// Placeholder left in `JsonResult` once a task finishes.
pub const REDACTED_RAW: &str = "--redacted--";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueContext {
    values: Map<String, Value>,
}

impl ValueContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Store `value` at a dotted `path`, creating intermediate maps.
    pub fn set(&mut self, path: &str, value: Value) {
        set_nested(&mut self.values, &split_path(path), value);
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        get_nested(&self.values, &split_path(path))
    }

    /// Text at `path`; empty when missing or null.
    pub fn get_text(&self, path: &str) -> String {
        match self.get(path) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        remove_nested(&mut self.values, &split_path(path))
    }

    /// Install the raw payload of the running task.
    pub fn set_raw(&mut self, payload: &[u8]) {
        let raw = String::from_utf8_lossy(payload).to_string();
        let parsed = serde_json::from_slice::<Value>(payload).unwrap_or(Value::Null);
        self.values.insert(JSON_RESULT_KEY.to_string(), Value::String(raw));
        self.values.insert(RUNTIME_OBJECT_KEY.to_string(), parsed);
    }

    /// Replace the raw payload with [`REDACTED_RAW`] and drop the parsed copy.
    pub fn redact_raw(&mut self) {
        self.values
            .insert(JSON_RESULT_KEY.to_string(), Value::String(REDACTED_RAW.to_string()));
        self.values.remove(RUNTIME_OBJECT_KEY);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn replace(&mut self, values: Map<String, Value>) {
        self.values = values;
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Compact JSON for diagnostics, without the raw payload and with secrets scrubbed.
    pub fn snapshot(&self) -> String {
        let mut values = self.values.clone();
        values.remove(JSON_RESULT_KEY);
        values.remove(RUNTIME_OBJECT_KEY);
        redact_sensitive(&Value::Object(values).to_string())
    }
}
