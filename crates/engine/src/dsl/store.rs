//! Bucketed storage of run command outcomes.
//!
//! Every stored command owns a bucket holding its `result`, `debug` and
//! `error`. The first error stored in any bucket is also kept at `rootCause`,
//! and once any bucket carries an error later commands are refused.

use chrono::Utc;
use serde_json::{Map, Value};

use super::command::{RunCommand, RunCommandResult};
use super::exec::{CommandRuntime, message_result};
use super::messages::Messages;

pub const RESULT_KEY: &str = "result";
pub const DEBUG_KEY: &str = "debug";
pub const ERROR_KEY: &str = "error";
pub const ROOT_CAUSE_KEY: &str = "rootCause";

pub const ERR_FAILED_CONDITION: &str = "run condition failed: can not execute run command";
const FAILED_CONDITION: &str = "errors with previous commands' execution(s)";

/// Key/value buckets over a borrowed map.
pub struct KvStore<'a> {
    store: &'a mut Map<String, Value>,
    bucket: String,
}

impl<'a> KvStore<'a> {
    pub fn new(store: &'a mut Map<String, Value>) -> Self {
        Self {
            store,
            bucket: String::new(),
        }
    }

    pub fn set_bucket(&mut self, bucket: impl Into<String>) {
        self.bucket = bucket.into();
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn is_bucket_taken(&self, bucket: &str) -> bool {
        self.store.contains_key(bucket)
    }

    pub fn store(&mut self, key: &str, data: Value) {
        let is_error = key == ERROR_KEY && !is_blank(&data);
        let bucket = self
            .store
            .entry(self.bucket.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !bucket.is_object() {
            *bucket = Value::Object(Map::new());
        }
        if let Value::Object(entries) = bucket {
            entries.insert(key.to_string(), data.clone());
        }
        if is_error && !self.store.contains_key(ROOT_CAUSE_KEY) {
            self.store.insert(ROOT_CAUSE_KEY.to_string(), data);
        }
    }

    /// False once any bucket holds an error.
    pub fn will_run(&self) -> (&'static str, bool) {
        let failed = self.store.values().any(|bucket| {
            bucket
                .as_object()
                .and_then(|entries| entries.get(ERROR_KEY))
                .is_some_and(|error| !is_blank(error))
        });
        (FAILED_CONDITION, !failed)
    }

    pub fn save(&mut self, outcome: &RunCommandResult) {
        self.store(RESULT_KEY, outcome.result.clone());
        self.store(DEBUG_KEY, Value::String(outcome.debug.to_string()));
        let error = outcome.error().map(|error| Value::String(error.to_string())).unwrap_or(Value::Null);
        self.store(ERROR_KEY, error);
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

fn generated_id() -> String {
    Utc::now().format("%H%M%S%f").to_string()
}

/// Run `command` under `id`, saving its outcome into `store`.
///
/// A missing or duplicate id prevents execution, as does an error stored by
/// an earlier command unless `always` is set. The refusal itself is stored.
pub async fn run_stored(
    runtime: &CommandRuntime,
    store: &mut Map<String, Value>,
    id: &str,
    mut command: RunCommand,
    always: bool,
) -> RunCommandResult {
    let mut kv = KvStore::new(store);
    let id = id.trim();

    let mut refusal = Messages::default();
    if id.is_empty() {
        refusal.error(format!("missing run command id: can not execute run command: '{}'", command.describe()));
    } else if kv.is_bucket_taken(id) {
        refusal.error(format!(
            "duplicate id '{}': can not execute run command: '{}'",
            id,
            command.describe()
        ));
    }
    if refusal.has_error() {
        kv.set_bucket(generated_id());
        let outcome = message_result(refusal);
        kv.save(&outcome);
        return outcome;
    }
    kv.set_bucket(id);

    let (condition, will_run) = kv.will_run();
    if !will_run && !always {
        command.messages.warn(condition);
        command.disable(ERR_FAILED_CONDITION);
    }

    let outcome = runtime.run(command).await;
    kv.save(&outcome);
    outcome
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn first_error_becomes_root_cause() {
        let mut map = Map::new();
        let mut kv = KvStore::new(&mut map);
        kv.set_bucket("one");
        kv.store(ERROR_KEY, json!("first"));
        kv.set_bucket("two");
        kv.store(ERROR_KEY, json!("second"));
        assert!(!kv.will_run().1);
        assert_eq!(map[ROOT_CAUSE_KEY], "first");
        assert_eq!(map["two"][ERROR_KEY], "second");
    }

    #[test]
    fn null_errors_keep_the_store_runnable() {
        let mut map = Map::new();
        let mut kv = KvStore::new(&mut map);
        kv.set_bucket("ok");
        kv.save(&RunCommandResult::new(json!({"size": "5G"}), Messages::default()));
        assert!(kv.will_run().1);
        assert!(kv.is_bucket_taken("ok"));
        assert!(!map.contains_key(ROOT_CAUSE_KEY));
    }
}
