//! Helpers that write into the value context or raise error markers.

use castor_util::{get_nested, set_nested};
use serde_json::{Map, Value};

use super::{Param, RenderState, StateFn, context_segments, is_empty, is_truthy, path_segments, string_list, text};
use crate::EngineError;

pub(crate) const STATE_HELPERS: &[(&str, StateFn)] = &[
    ("saveAs", save_as),
    ("saveas", save_as),
    ("saveIf", save_if),
    ("saveif", save_if),
    ("addTo", add_to),
    ("notFoundErr", not_found_err),
    ("verifyErr", verify_err),
    ("versionMismatchErr", version_mismatch_err),
    ("asNestedMap", as_nested_map),
    ("nestedKeyMap", as_nested_map),
    ("asKeyMap", as_key_map),
    ("keyMap", as_key_map),
    ("splitKeyMap", split_key_map),
];

const DEFAULT_NOT_FOUND: &str = "item is not found";
const DEFAULT_VERIFY: &str = "verification failed";
const DEFAULT_VERSION_MISMATCH: &str = "version mismatch";

const PRIMARY_KEY: &str = "pkey";
const APPEND_DELIMITER: &str = ", ";

fn value_at(params: &[Param], index: usize) -> Value {
    params.get(index).map(|param| param.value.clone()).unwrap_or(Value::Null)
}

fn anchor(params: &[Param], index: usize) -> Result<Vec<String>, String> {
    let Some(ctx) = params.get(index) else {
        return Err(format!("missing context argument at position {}", index + 1));
    };
    context_segments(ctx)
}

/// Keys from the root for `path` below the context argument at `ctx_index`.
fn target(params: &[Param], path_index: usize, ctx_index: usize) -> Result<Vec<String>, String> {
    let mut keys = anchor(params, ctx_index)?;
    let path = text(&value_at(params, path_index));
    let relative = path_segments(&path);
    if relative.is_empty() {
        return Err(format!("invalid path '{}'", path));
    }
    keys.extend(relative);
    Ok(keys)
}

fn borrowed(keys: &[String]) -> Vec<&str> {
    keys.iter().map(String::as_str).collect()
}

fn existing_text(values: &Map<String, Value>, keys: &[String]) -> String {
    get_nested(values, &borrowed(keys)).map(text).unwrap_or_default().trim().to_string()
}

/// Append `value` to the text stored at `keys`, comma separated.
fn append(values: &mut Map<String, Value>, keys: &[String], value: &str) {
    let existing = existing_text(values, keys);
    let joined = if existing.is_empty() {
        value.to_string()
    } else {
        let joined = format!("{}{}{}", existing, APPEND_DELIMITER, value);
        joined.trim_end_matches(APPEND_DELIMITER).to_string()
    };
    set_nested(values, &borrowed(keys), Value::String(joined));
}

/// `saveAs path ctx value`: store unconditionally, returning `value`.
fn save_as(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    let keys = target(params, 0, 1)?;
    let value = value_at(params, 2);
    state.write(|values| set_nested(values, &borrowed(&keys), value.clone()));
    Ok(value)
}

/// `saveIf path ctx value`: store only when nothing non-empty is there yet.
///
/// Returns whichever value ends up stored.
fn save_if(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    let keys = target(params, 0, 1)?;
    let path = borrowed(&keys);
    if let Some(current) = get_nested(&state.values(), &path)
        && !is_empty(current)
    {
        return Ok(current.clone());
    }
    let value = value_at(params, 2);
    state.write(|values| set_nested(values, &path, value.clone()));
    Ok(value)
}

/// `addTo path ctx value`: append to the existing text with `", "`.
fn add_to(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    let given = value_at(params, 2);
    let added = text(&given).trim().to_string();
    if added.is_empty() {
        return Ok(given);
    }
    let keys = target(params, 0, 1)?;
    state.write(|values| append(values, &keys, &added));
    Ok(given)
}

fn message_or(params: &[Param], fallback: &str) -> String {
    let message = text(&value_at(params, 0));
    if message.trim().is_empty() { fallback.to_string() } else { message }
}

/// `notFoundErr msg value`: raise when `value` is empty.
fn not_found_err(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    if !is_empty(&value_at(params, 1)) {
        return Ok(Value::Null);
    }
    let message = message_or(params, DEFAULT_NOT_FOUND);
    state.raise(EngineError::NotFound(message.clone()));
    Ok(Value::String(message))
}

/// `verifyErr msg failed`: raise when `failed` is true.
fn verify_err(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    if !is_truthy(&value_at(params, 1)) {
        return Ok(Value::Null);
    }
    let message = message_or(params, DEFAULT_VERIFY);
    state.raise(EngineError::Verify(message.clone()));
    Ok(Value::String(message))
}

/// `versionMismatchErr msg wrong`: raise when `wrong` is true.
fn version_mismatch_err(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    if !is_truthy(&value_at(params, 1)) {
        return Ok(Value::Null);
    }
    let message = message_or(params, DEFAULT_VERSION_MISMATCH);
    state.raise(EngineError::VersionMismatch(message.clone()));
    Ok(Value::String(message))
}

/// `asNestedMap delimiters ctx items`
///
/// Each item is cut at the first occurrence of every delimiter in turn; the
/// pieces before each cut become map keys and the remainder the leaf value.
/// `"default/pod@app=jiva"` with `"@ ="` stores `{"default/pod": {"app": "jiva"}}`.
fn as_nested_map(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    let delimiters = text(&value_at(params, 0));
    let root = anchor(params, 1)?;
    let items = string_list(&value_at(params, 2));

    state.write(|values| {
        for item in &items {
            let mut keys = root.clone();
            let mut remainder = item.as_str();
            for delimiter in delimiters.split(' ').filter(|delimiter| !delimiter.is_empty()) {
                let Some((key, rest)) = remainder.split_once(delimiter) else {
                    continue;
                };
                let key = key.trim();
                if !key.is_empty() {
                    keys.push(key.to_string());
                }
                remainder = rest.trim();
            }
            if keys.len() == root.len() {
                continue;
            }
            append(values, &keys, remainder.trim());
        }
    });
    Ok(Value::String(String::new()))
}

/// `asKeyMap outerKey ctx items`: `splitKeyMap` with `,` between pairs and `=` within.
fn as_key_map(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    let mut shifted = Vec::with_capacity(params.len() + 1);
    shifted.push(Param {
        path: None,
        value: Value::String(", =".to_string()),
    });
    shifted.extend(params.iter().cloned());
    split_key_map(state, &shifted)
}

/// `splitKeyMap "<pairs> <pair>" outerKey ctx items`
///
/// Every item is a list of pairs such as `pkey=openebs,stor1=jiva`. Pairs are
/// stored below `outerKey.<pkey value>`, or `outerKey.pkey` when the item has
/// no primary key. Values for keys already present are appended.
fn split_key_map(state: &RenderState, params: &[Param]) -> Result<Value, String> {
    let splitters = text(&value_at(params, 0));
    let (mut pair_items, mut pair) = (",".to_string(), "=".to_string());
    if let [items_splitter, pair_splitter] = splitters.trim().split(' ').collect::<Vec<_>>()[..] {
        if !items_splitter.trim().is_empty() {
            pair_items = items_splitter.trim().to_string();
        }
        if !pair_splitter.trim().is_empty() {
            pair = pair_splitter.trim().to_string();
        }
    }

    let mut root = anchor(params, 2)?;
    root.extend(path_segments(&text(&value_at(params, 1))));
    let items = string_list(&value_at(params, 3));
    let primary_prefix = format!("{}{}", PRIMARY_KEY, pair);

    state.write(|values| {
        for item in &items {
            let pairs: Vec<&str> = item.split(pair_items.as_str()).collect();
            let primary_pair = pairs.iter().copied().find(|candidate| candidate.starts_with(&primary_prefix));
            let primary = primary_pair
                .and_then(|found| match found.split(pair.as_str()).collect::<Vec<_>>()[..] {
                    [_, value] if !value.is_empty() => Some(value.to_string()),
                    _ => None,
                })
                .unwrap_or_else(|| PRIMARY_KEY.to_string());

            for entry in pairs {
                if entry.is_empty() || Some(entry) == primary_pair {
                    continue;
                }
                let (key, value) = match entry.split(pair.as_str()).collect::<Vec<_>>()[..] {
                    [key, value] => (key.trim(), value.trim()),
                    ref parts => (parts.first().copied().unwrap_or_default().trim(), ""),
                };
                if key.is_empty() {
                    continue;
                }
                let mut keys = root.clone();
                keys.push(primary.clone());
                keys.push(key.to_string());
                append(values, &keys, value);
            }
        }
    });
    Ok(Value::String(String::new()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::context::ValueContext;
    use crate::template::TemplatePipeline;

    fn render(source: &str, values: &mut ValueContext) -> String {
        TemplatePipeline::new().render("store", source, values).expect("render")
    }

    #[test]
    fn save_if_keeps_the_first_value() {
        let mut values = ValueContext::new();
        render(
            r#"{{noop (saveIf "TaskResult.msg" this "Hi")}}{{noop (saveIf "TaskResult.msg" this "Hi There")}}"#,
            &mut values,
        );
        assert_eq!(values.get_text("TaskResult.msg"), "Hi");
        render(r#"{{noop (saveAs "TaskResult.msg" this "Hi There")}}"#, &mut values);
        assert_eq!(values.get_text("TaskResult.msg"), "Hi There");
    }

    #[test]
    fn add_to_appends_with_commas() {
        let mut values = ValueContext::new();
        let out = render(
            r#"{{noop (addTo "TaskResult.msg" this "Hi")}}{{noop (addTo "TaskResult.msg" this "Hello")}}{{TaskResult.msg}}"#,
            &mut values,
        );
        assert_eq!(out, "Hi, Hello");
    }

    #[test]
    fn nested_map_splits_items_by_delimiters() {
        let mut values = ValueContext::new();
        values.set("Target", json!({}));
        render(
            r#"{{noop (asNestedMap "@ =" Target (splitList " " "default/mypod@app=jiva openebs/mypod@app=cstor"))}}{{noop (asNestedMap "/ @ =" Target (splitList " " "litmus/mypod@backend=true"))}}{{noop (asNestedMap "@ =" Target (splitList " " "default/mypod@app=extra"))}}"#,
            &mut values,
        );
        assert_eq!(
            values.get("Target").cloned().expect("target"),
            json!({
                "default/mypod": {"app": "jiva, extra"},
                "openebs/mypod": {"app": "cstor"},
                "litmus": {"mypod": {"backend": "true"}},
            })
        );
    }

    #[test]
    fn key_map_groups_pairs_by_primary_key() {
        let mut values = ValueContext::new();
        values.set("Target", json!({}));
        render(
            r#"{{noop (asKeyMap "vals" Target (splitList " " "pkey=openebs,stor1=jiva,stor2=cstor"))}}{{noop (keyMap "vals" Target (splitList " " "co1=swarm,co2=k8s"))}}{{noop (splitKeyMap "-- =" "vals" Target (splitList " " "pkey=openebs--stor2=mstor"))}}"#,
            &mut values,
        );
        assert_eq!(
            values.get("Target.vals").cloned().expect("vals"),
            json!({
                "openebs": {"stor1": "jiva", "stor2": "cstor, mstor"},
                "pkey": {"co1": "swarm", "co2": "k8s"},
            })
        );
    }

    #[test]
    fn verify_marker_ignores_false_flags() {
        let mut values = ValueContext::new();
        let out = TemplatePipeline::new()
            .render("store", r#"{{verifyErr "bad" false}}ok"#, &mut values)
            .expect("no marker");
        assert_eq!(out, "ok");
        let error = TemplatePipeline::new()
            .render("store", r#"{{noop (verifyErr "" true)}}"#, &mut values)
            .expect_err("marker");
        assert!(error.is_verify(), "unexpected error: {error}");
        assert_eq!(error.to_string(), "verification failed: verification failed");
    }
}
