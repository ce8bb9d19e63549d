//! Helpers without side effects on the value context.

use rand::seq::SliceRandom;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{PureFn, is_empty, param, string_list, text};
use crate::{jsonpath, version};

pub(crate) const PURE_HELPERS: &[(&str, PureFn)] = &[
    ("jsonpath", jsonpath_helper),
    ("noop", noop),
    ("isLen", is_len),
    ("empty", empty),
    ("default", default),
    ("ifNotNil", if_not_nil),
    ("IfNotNil", if_not_nil),
    ("toYaml", to_yaml),
    ("fromYaml", from_yaml),
    ("toJson", to_json),
    ("fromJson", from_json),
    ("trim", trim),
    ("lower", lower),
    ("upper", upper),
    ("quote", quote),
    ("indent", indent),
    ("contains", contains),
    ("hasPrefix", has_prefix),
    ("splitList", split_list),
    ("splitListTrim", split_list_trim),
    ("splitListLen", split_list_len),
    ("first", first),
    ("pluck", pluck),
    ("pick", pick),
    ("pickPrefix", pick_prefix),
    ("pickSuffix", pick_suffix),
    ("pickContains", pick_contains),
    ("randomize", randomize),
    ("debugf", debugf),
    ("kubeVersionEq", kube_version_eq),
    ("kubeVersionGt", kube_version_gt),
    ("kubeVersionGte", kube_version_gte),
    ("kubeVersionLt", kube_version_lt),
    ("kubeVersionLte", kube_version_lte),
    ("kubeVersionCompare", kube_version_compare),
    ("kubeVersionAsLabel", kube_version_as_label),
];

/// `jsonpath doc path`: doc is a JSON string or an already parsed value.
///
/// Never fails the render; an invalid path or payload yields a message.
fn jsonpath_helper(params: &[Value]) -> Result<Value, String> {
    let path = text(param(params, 1));
    let outcome = match param(params, 0) {
        Value::String(raw) => jsonpath::query_bytes(raw.as_bytes(), &path),
        document => jsonpath::query(document, &path),
    };
    Ok(Value::String(match outcome {
        Ok(found) => found,
        Err(error) => format!("jsonpath failed: path '{}': error '{}'", path, error),
    }))
}

fn noop(_: &[Value]) -> Result<Value, String> {
    Ok(Value::String(String::new()))
}

fn is_len(params: &[Value]) -> Result<Value, String> {
    let expected = match param(params, 0) {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => raw.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or("expected a non-negative length")?;
    let actual = match param(params, 1) {
        Value::Array(items) => Some(items.len()),
        Value::Object(entries) => Some(entries.len()),
        Value::String(raw) => Some(raw.len()),
        _ => None,
    };
    Ok(Value::Bool(actual.is_some_and(|len| len as u64 == expected)))
}

fn empty(params: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(is_empty(param(params, 0))))
}

/// `default fallback given`
fn default(params: &[Value]) -> Result<Value, String> {
    let given = param(params, 1);
    Ok(if is_empty(given) { param(params, 0).clone() } else { given.clone() })
}

/// `ifNotNil this then`: `then` when `this` is non-empty, otherwise `this`.
fn if_not_nil(params: &[Value]) -> Result<Value, String> {
    let this = param(params, 0);
    Ok(if is_empty(this) { this.clone() } else { param(params, 1).clone() })
}

fn to_yaml(params: &[Value]) -> Result<Value, String> {
    Ok(Value::String(match serde_yaml::to_string(param(params, 0)) {
        Ok(yaml) => yaml,
        Err(error) => format!("error: {}", error),
    }))
}

fn from_yaml(params: &[Value]) -> Result<Value, String> {
    let raw = text(param(params, 0));
    Ok(match serde_yaml::from_str::<Value>(&raw) {
        Ok(Value::Null) => Value::Object(Map::new()),
        Ok(value) => value,
        Err(error) => json!({ "Error": error.to_string() }),
    })
}

fn to_json(params: &[Value]) -> Result<Value, String> {
    Ok(Value::String(param(params, 0).to_string()))
}

fn from_json(params: &[Value]) -> Result<Value, String> {
    let raw = text(param(params, 0));
    Ok(serde_json::from_str::<Value>(&raw).unwrap_or_else(|error| json!({ "Error": error.to_string() })))
}

fn trim(params: &[Value]) -> Result<Value, String> {
    Ok(Value::String(text(param(params, 0)).trim().to_string()))
}

fn lower(params: &[Value]) -> Result<Value, String> {
    Ok(Value::String(text(param(params, 0)).to_lowercase()))
}

fn upper(params: &[Value]) -> Result<Value, String> {
    Ok(Value::String(text(param(params, 0)).to_uppercase()))
}

fn quote(params: &[Value]) -> Result<Value, String> {
    let quoted: Vec<String> = params
        .iter()
        .filter(|value| !value.is_null())
        .map(|value| format!("{:?}", text(value)))
        .collect();
    Ok(Value::String(quoted.join(" ")))
}

/// `indent n text`: prefix every line with `n` spaces.
fn indent(params: &[Value]) -> Result<Value, String> {
    let width = param(params, 0).as_u64().unwrap_or(0) as usize;
    let pad = " ".repeat(width);
    let body = text(param(params, 1));
    let indented: Vec<String> = body.split('\n').map(|line| format!("{}{}", pad, line)).collect();
    Ok(Value::String(indented.join("\n")))
}

/// `contains needle haystack`
fn contains(params: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(text(param(params, 1)).contains(&text(param(params, 0)))))
}

/// `hasPrefix prefix text`
fn has_prefix(params: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(text(param(params, 1)).starts_with(&text(param(params, 0)))))
}

/// `splitList sep text`
fn split_list(params: &[Value]) -> Result<Value, String> {
    let separator = text(param(params, 0));
    let raw = text(param(params, 1));
    if separator.is_empty() {
        return Ok(json!([raw]));
    }
    Ok(json!(raw.split(separator.as_str()).collect::<Vec<_>>()))
}

fn split_trimmed(separator: &str, raw: &str) -> Vec<String> {
    if separator.is_empty() {
        return vec![raw.to_string()];
    }
    let mut trimmed = raw;
    while let Some(rest) = trimmed.strip_prefix(separator) {
        trimmed = rest;
    }
    while let Some(rest) = trimmed.strip_suffix(separator) {
        trimmed = rest;
    }
    trimmed.split(separator).map(str::to_string).collect()
}

/// `splitListTrim sep text`: like `splitList` after removing leading and trailing separators.
fn split_list_trim(params: &[Value]) -> Result<Value, String> {
    Ok(json!(split_trimmed(&text(param(params, 0)), &text(param(params, 1)))))
}

fn split_list_len(params: &[Value]) -> Result<Value, String> {
    Ok(json!(split_trimmed(&text(param(params, 0)), &text(param(params, 1))).len()))
}

fn first(params: &[Value]) -> Result<Value, String> {
    Ok(match param(params, 0) {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        Value::String(raw) => raw.chars().next().map(|c| Value::String(c.to_string())).unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

/// `pluck key map...`: values of `key` in each map that has it.
fn pluck(params: &[Value]) -> Result<Value, String> {
    let key = text(param(params, 0));
    let mut found = Vec::new();
    for candidate in params.iter().skip(1) {
        let maps: Vec<&Value> = match candidate {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        found.extend(maps.into_iter().filter_map(|map| map.get(&key)).cloned());
    }
    Ok(Value::Array(found))
}

/// `pick map key...`: a map with only the given keys.
fn pick(params: &[Value]) -> Result<Value, String> {
    let Value::Object(source) = param(params, 0) else {
        return Ok(Value::Object(Map::new()));
    };
    let mut picked = Map::new();
    for key in params.iter().skip(1).map(text) {
        if let Some(value) = source.get(&key) {
            picked.insert(key, value.clone());
        }
    }
    Ok(Value::Object(picked))
}

fn pick_first(params: &[Value], matches: fn(&str, &str) -> bool) -> Result<Value, String> {
    let needle = text(param(params, 0));
    let matched = string_list(param(params, 1))
        .into_iter()
        .find(|item| matches(item, &needle))
        .unwrap_or_default();
    Ok(Value::String(matched))
}

/// `pickPrefix prefix list`: first item starting with `prefix`.
fn pick_prefix(params: &[Value]) -> Result<Value, String> {
    pick_first(params, |item, needle| item.starts_with(needle))
}

fn pick_suffix(params: &[Value]) -> Result<Value, String> {
    pick_first(params, |item, needle| item.ends_with(needle))
}

fn pick_contains(params: &[Value]) -> Result<Value, String> {
    pick_first(params, |item, needle| item.contains(needle))
}

fn randomize(params: &[Value]) -> Result<Value, String> {
    let mut items = string_list(param(params, 0));
    items.shuffle(&mut rand::thread_rng());
    Ok(json!(items))
}

/// `debugf msg value`: log `value` at debug level.
fn debugf(params: &[Value]) -> Result<Value, String> {
    let message = text(param(params, 0));
    let value = param(params, 1);
    if value.is_null() {
        return Err(format!("failed to get debug info, got empty args, msg: {}", message));
    }
    debug!(message = %message, value = %value, "template debug");
    Ok(Value::String(String::new()))
}

fn versions(params: &[Value]) -> (String, String) {
    (text(param(params, 0)), text(param(params, 1)))
}

fn kube_version_eq(params: &[Value]) -> Result<Value, String> {
    let (left, right) = versions(params);
    Ok(Value::Bool(version::equals(&left, &right)))
}

fn kube_version_gt(params: &[Value]) -> Result<Value, String> {
    let (left, right) = versions(params);
    Ok(Value::Bool(version::greater_than(&left, &right)))
}

fn kube_version_gte(params: &[Value]) -> Result<Value, String> {
    let (left, right) = versions(params);
    Ok(Value::Bool(version::greater_than_or_equals(&left, &right)))
}

fn kube_version_lt(params: &[Value]) -> Result<Value, String> {
    let (left, right) = versions(params);
    Ok(Value::Bool(version::less_than(&left, &right)))
}

fn kube_version_lte(params: &[Value]) -> Result<Value, String> {
    let (left, right) = versions(params);
    Ok(Value::Bool(version::less_than_or_equals(&left, &right)))
}

/// -1, 0 or 1.
fn kube_version_compare(params: &[Value]) -> Result<Value, String> {
    let (left, right) = versions(params);
    Ok(json!(version::compare(&left, &right) as i8))
}

fn kube_version_as_label(params: &[Value]) -> Result<Value, String> {
    Ok(Value::String(version::as_label_value(&text(param(params, 0)))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonpath_reports_invalid_paths_as_text() {
        let out = jsonpath_helper(&[json!(r#"{"a":{"b":"c"}}"#), json!("{.a.b}")]).expect("query");
        assert_eq!(out, "c");
        let out = jsonpath_helper(&[json!({"a": 1}), json!("{.a[}")]).expect("query");
        assert!(text(&out).starts_with("jsonpath failed: path '{.a[}'"), "unexpected output: {out}");
    }

    #[test]
    fn is_len_counts_lists_maps_and_strings() {
        assert_eq!(is_len(&[json!(2), json!(["a", "b"])]).expect("len"), json!(true));
        assert_eq!(is_len(&[json!("1"), json!({"a": 1})]).expect("len"), json!(true));
        assert_eq!(is_len(&[json!(3), json!("ab")]).expect("len"), json!(false));
        assert_eq!(is_len(&[json!(0), Value::Null]).expect("len"), json!(false));
    }

    #[test]
    fn split_list_trim_drops_outer_separators() {
        assert_eq!(
            split_list_trim(&[json!(","), json!(",a,b,")]).expect("split"),
            json!(["a", "b"])
        );
        assert_eq!(split_list_len(&[json!(" "), json!("a b c")]).expect("len"), json!(3));
    }

    #[test]
    fn pick_prefix_returns_first_match() {
        let list = json!(["pkey=openebs", "stor1=jiva"]);
        assert_eq!(pick_prefix(&[json!("stor"), list.clone()]).expect("pick"), json!("stor1=jiva"));
        assert_eq!(pick_suffix(&[json!("none"), list]).expect("pick"), json!(""));
    }

    #[test]
    fn yaml_helpers_report_errors_in_band() {
        let parsed = from_yaml(&[json!("a: [1")]).expect("from yaml");
        assert!(parsed.get("Error").is_some(), "unexpected value: {parsed}");
        let yaml = to_yaml(&[json!({"a": 1})]).expect("to yaml");
        assert_eq!(yaml, "a: 1\n");
    }

    #[test]
    fn version_helpers_delegate_to_comparator() {
        assert_eq!(kube_version_compare(&[json!("v1.9.0"), json!("v1.10.0")]).expect("cmp"), json!(-1));
        assert_eq!(kube_version_gte(&[json!("v1.12.0"), json!("v1.12.0")]).expect("gte"), json!(true));
    }

    #[test]
    fn default_and_if_not_nil() {
        assert_eq!(default(&[json!("x"), json!("")]).expect("default"), json!("x"));
        assert_eq!(default(&[json!("x"), json!("y")]).expect("default"), json!("y"));
        assert_eq!(if_not_nil(&[json!("a"), json!("b")]).expect("if"), json!("b"));
        assert_eq!(if_not_nil(&[Value::Null, json!("b")]).expect("if"), Value::Null);
    }
}
