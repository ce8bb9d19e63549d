//! JSONPath templates over task payloads.
//!
//! Supported syntax:
//! - `{.a.b.c}` dotted selection, `{.items[*].field}` wildcards, `[n]` and `[a:b]`
//! - `{.items[?(@.name=='x')].field}` filters (`==`, `!=`, `<`, `<=`, `>`, `>=`, or bare existence)
//! - `{range .items[*]}{@.x}/{.y};{end}` repetition, literal text in between
//! - `..name` recursive descent
//! - keys with literal dots escaped as `controller\.openebs\.io/pv`
//!
//! Missing keys print as an empty string. Multiple matches of one action are
//! joined by a single space.

mod eval;
mod parser;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;

pub use eval::printable;
use parser::{parse_expr, parse_template};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid jsonpath: {0}")]
    Syntax(String),
    #[error("payload is not valid json: {0}")]
    Payload(String),
}

impl PathError {
    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        PathError::Syntax(message.into())
    }
}

static WELL_KNOWN_PATHS: Lazy<IndexMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut paths = IndexMap::new();
    paths.insert("objectName", "{.metadata.name}");
    paths
});

/// Canonical path registered for a well-known alias.
pub fn well_known_path(alias: &str) -> Option<&'static str> {
    WELL_KNOWN_PATHS.get(alias.trim()).copied()
}

/// Wrap a bare expression in braces so `.metadata.name` and `{.metadata.name}` agree.
fn normalize(template: &str) -> String {
    let trimmed = template.trim();
    if trimmed.contains('{') {
        trimmed.to_string()
    } else {
        format!("{{{}}}", trimmed)
    }
}

/// Evaluate a JSONPath template against a parsed document.
pub fn query(document: &Value, template: &str) -> Result<String, PathError> {
    let nodes = parse_template(&normalize(template))?;
    let mut out = String::new();
    eval::render(&nodes, document, document, &mut out);
    Ok(out)
}

/// Evaluate a JSONPath template against raw JSON bytes.
pub fn query_bytes(payload: &[u8], template: &str) -> Result<String, PathError> {
    let document: Value = if payload.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(payload).map_err(|error| PathError::Payload(error.to_string()))?
    };
    query(&document, template)
}

/// Values matched by a single expression, without printing.
pub fn select_values<'a>(document: &'a Value, expression: &str) -> Result<Vec<&'a Value>, PathError> {
    let trimmed = expression.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .unwrap_or(trimmed);
    let expr = parse_expr(inner)?;
    Ok(eval::select(&expr, document, document))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pod() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "kubectl-tester",
                "annotations": {"controller.openebs.io/affinity": "mypin"}
            },
            "spec": {
                "containers": [
                    {"name": "bb", "image": "k8s.gcr.io/busybox", "volumeMounts": [{"mountPath": "/mount/test-volume"}]},
                    {"name": "kubectl", "image": "lachlanevenson/k8s-kubectl"}
                ],
                "affinity": {"podAffinity": {"requiredDuringSchedulingIgnoredDuringExecution": [
                    {"topologyKey": "kubernetes.io/hostname"}
                ]}}
            }
        })
    }

    #[test]
    fn dotted_and_escaped_keys() {
        let pod = pod();
        assert_eq!(query(&pod, "{.metadata.name}").expect("name"), "kubectl-tester");
        assert_eq!(
            query(&pod, r"{.metadata.annotations.controller\.openebs\.io/affinity}").expect("affinity"),
            "mypin"
        );
        assert_eq!(query(&pod, ".metadata.name").expect("bare"), "kubectl-tester");
    }

    #[test]
    fn filters_and_wildcards() {
        let pod = pod();
        assert_eq!(
            query(&pod, "{.spec.containers[?(@.name=='bb')].image}").expect("filter"),
            "k8s.gcr.io/busybox"
        );
        assert_eq!(
            query(&pod, "{.spec.containers[?(@.name=='bb')].volumeMounts[*].mountPath}").expect("mounts"),
            "/mount/test-volume"
        );
        assert_eq!(query(&pod, "{.spec.containers[*].name}").expect("names"), "bb kubectl");
        assert_eq!(query(&pod, "{.spec.containers[-1].name}").expect("last"), "kubectl");
        assert_eq!(query(&pod, "{.spec.containers[?(@.image)].name}").expect("exists"), "bb kubectl");
    }

    #[test]
    fn range_with_punctuation() {
        let pod = pod();
        assert_eq!(query(&pod, "{range .spec.containers[*]}{.name},{end}").expect("range"), "bb,kubectl,");
        assert_eq!(
            query(&pod, "{range .spec.containers[*]}{@.name}={@.image};{end}").expect("range"),
            "bb=k8s.gcr.io/busybox;kubectl=lachlanevenson/k8s-kubectl;"
        );
    }

    #[test]
    fn recursive_descent() {
        assert_eq!(query(&pod(), "{..topologyKey}").expect("recursive"), "kubernetes.io/hostname");
    }

    #[test]
    fn missing_keys_print_empty() {
        let pod = pod();
        assert_eq!(query(&pod, "{.status.phase}").expect("missing"), "");
        assert_eq!(query(&pod, "{.spec.containers[7].name}").expect("out of range"), "");
    }

    #[test]
    fn invalid_expression_is_an_error() {
        let error = query(&pod(), "{.spec.containers[?(@.name=='bb'}").expect_err("unbalanced");
        assert!(matches!(error, PathError::Syntax(_)), "unexpected error: {error}");
        assert!(query_bytes(b"{not json", "{.a}").is_err());
    }

    #[test]
    fn registry_maps_object_name() {
        assert_eq!(well_known_path("objectName"), Some("{.metadata.name}"));
        assert_eq!(well_known_path("unknown"), None);
    }

    #[test]
    fn select_values_returns_raw_matches() {
        let pod = pod();
        let values = select_values(&pod, "{.spec.containers[*].name}").expect("select");
        assert_eq!(values, vec![&json!("bb"), &json!("kubectl")]);
    }
}
