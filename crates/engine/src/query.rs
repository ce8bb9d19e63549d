//! Projection of task payloads through meta queries.

use castor_types::{QuerySpec, VerifySpec};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::EngineError;
use crate::jsonpath::{self, well_known_path};

/// Alias under which every non-list task exposes its object name.
pub const OBJECT_NAME_ALIAS: &str = "objectName";

/// Run every query against `payload` and verify the results.
///
/// # Arguments
/// * `task_id` - used in error messages only
/// * `payload` - raw JSON returned by the dispatch
/// * `queries` - alias/path/verify triples from the task meta
/// * `with_object_name` - add the `objectName` projection (non-list actions)
///
/// # Returns
/// Aliases mapped to printed values, in query order.
pub fn run_queries(
    task_id: &str,
    payload: &[u8],
    queries: &[QuerySpec],
    with_object_name: bool,
) -> Result<IndexMap<String, String>, EngineError> {
    let document: Value = if payload.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(payload)
            .map_err(|error| EngineError::Parse(format!("task '{}' returned invalid json: {}", task_id, error)))?
    };

    let mut results = IndexMap::new();
    for query in queries {
        let alias = query.alias.trim();
        if alias.is_empty() {
            return Err(EngineError::Parse(format!("task '{}' has a query without an alias", task_id)));
        }
        let path = resolve_path(alias, &query.path).ok_or_else(|| {
            EngineError::Parse(format!("task '{}' query '{}' has no path and no well-known default", task_id, alias))
        })?;

        let value = jsonpath::query(&document, &path)?;
        verify(task_id, alias, &value, &query.verify)?;
        debug!(task_id, alias, %value, "query resolved");
        results.insert(alias.to_string(), value);
    }

    if with_object_name && !results.contains_key(OBJECT_NAME_ALIAS) {
        let name = jsonpath::query(&document, "{.metadata.name}")?;
        results.insert(OBJECT_NAME_ALIAS.to_string(), name);
    }
    Ok(results)
}

fn resolve_path(alias: &str, path: &str) -> Option<String> {
    let path = path.trim();
    if !path.is_empty() {
        return Some(path.to_string());
    }
    well_known_path(alias).map(str::to_string)
}

/// Check a projected value against its count constraint.
///
/// With a split separator the value is split and the parts counted; without
/// one the value itself must be the count.
pub fn verify(task_id: &str, alias: &str, value: &str, spec: &VerifySpec) -> Result<(), EngineError> {
    if spec.is_empty() {
        return Ok(());
    }
    let expected: i64 = spec.count.trim().parse().map_err(|_| {
        EngineError::Parse(format!(
            "task '{}' query '{}' has a non-numeric verify count '{}'",
            task_id, alias, spec.count
        ))
    })?;

    let actual = if spec.split.is_empty() {
        value.trim().parse::<i64>().ok()
    } else {
        i64::try_from(split_count(value, &spec.split)).ok()
    };

    match actual {
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(EngineError::Verify(format!(
            "task '{}' query '{}': expected count {} but found {} in '{}'",
            task_id, alias, expected, actual, value
        ))),
        None => Err(EngineError::Verify(format!(
            "task '{}' query '{}': expected count {} but value '{}' is not a number",
            task_id, alias, expected, value
        ))),
    }
}

/// Number of non-empty parts of `value` split by `separator`.
fn split_count(value: &str, separator: &str) -> usize {
    value
        .split(separator)
        .filter(|part| !part.trim().is_empty())
        .count()
}
