//! Dotted-path access into nested JSON maps.
//!
//! Paths are sequences of map keys; there is no list indexing. Setting a value
//! creates intermediate maps and overwrites whatever sits in the way, scalar or
//! map.

use serde_json::{Map, Value};

/// Split a dotted path into its non-empty segments.
///
/// A leading `.` is ignored so `.TaskResult.a` and `TaskResult.a` are equal.
pub fn split_path(path: &str) -> Vec<&str> {
    path.trim()
        .split('.')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Store `value` under `path`, creating intermediate maps.
///
/// An empty path is ignored.
pub fn set_nested(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

/// Look up the value stored under `path`.
pub fn get_nested<'a>(root: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = root.get(*first)?;
    for segment in rest {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current)
}

/// Remove and return the value stored under `path`.
pub fn remove_nested(root: &mut Map<String, Value>, path: &[&str]) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    let mut current = root;
    for segment in parents {
        current = current.get_mut(*segment)?.as_object_mut()?;
    }
    current.remove(*last)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn set_creates_intermediate_maps() {
        let mut root = Map::new();
        set_nested(&mut root, &["TaskResult", "pvc", "name"], json!("claim"));
        assert_eq!(Value::Object(root), json!({"TaskResult": {"pvc": {"name": "claim"}}}));
    }

    #[test]
    fn set_overwrites_conflicting_scalars_and_maps() {
        let mut root = Map::new();
        set_nested(&mut root, &["a"], json!("scalar"));
        set_nested(&mut root, &["a", "b"], json!(1));
        assert_eq!(get_nested(&root, &["a", "b"]), Some(&json!(1)));

        set_nested(&mut root, &["a"], json!("again"));
        assert_eq!(get_nested(&root, &["a"]), Some(&json!("again")));
    }

    #[test]
    fn get_through_scalar_is_none() {
        let mut root = Map::new();
        set_nested(&mut root, &["a"], json!("x"));
        assert!(get_nested(&root, &["a", "b"]).is_none());
        assert!(get_nested(&root, &[]).is_none());
    }

    #[test]
    fn split_ignores_leading_dot_and_blanks() {
        assert_eq!(split_path(".TaskResult..a "), vec!["TaskResult", "a"]);
        assert!(split_path("").is_empty());
    }

    #[test]
    fn remove_returns_previous_value() {
        let mut root = Map::new();
        set_nested(&mut root, &["JsonResult"], json!("{}"));
        assert_eq!(remove_nested(&mut root, &["JsonResult"]), Some(json!("{}")));
        assert!(root.is_empty());
    }
}
