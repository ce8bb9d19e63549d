use serde_json::Value;

use super::parser::{Anchor, CompareOp, Expr, Filter, Literal, Node, Segment};

/// Render parsed nodes against `root`.
pub fn render(nodes: &[Node], root: &Value, current: &Value, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Path(expr) => {
                let printed: Vec<String> = select(expr, root, current).into_iter().map(printable).collect();
                out.push_str(&printed.join(" "));
            }
            Node::Range { expr, body } => {
                for item in select(expr, root, current) {
                    render(body, root, item, out);
                }
            }
        }
    }
}

/// Every value matched by `expr`.
pub fn select<'a>(expr: &Expr, root: &'a Value, current: &'a Value) -> Vec<&'a Value> {
    let start = match expr.anchor {
        Anchor::Root => root,
        Anchor::Current => current,
    };
    let mut matches = vec![start];
    for segment in &expr.segments {
        let mut next = Vec::new();
        for value in matches {
            apply(segment, root, value, &mut next);
        }
        matches = next;
        if matches.is_empty() {
            break;
        }
    }
    matches
}

fn apply<'a>(segment: &Segment, root: &'a Value, value: &'a Value, next: &mut Vec<&'a Value>) {
    match segment {
        Segment::Child(name) => {
            if let Some(child) = value.as_object().and_then(|map| map.get(name)) {
                next.push(child);
            }
        }
        Segment::Wildcard => match value {
            Value::Array(items) => next.extend(items.iter()),
            Value::Object(map) => next.extend(map.values()),
            _ => {}
        },
        Segment::Index(index) => {
            if let Some(items) = value.as_array()
                && let Some(position) = resolve_index(*index, items.len())
            {
                next.push(&items[position]);
            }
        }
        Segment::Slice(start, end) => {
            if let Some(items) = value.as_array() {
                let length = items.len();
                let from = start.and_then(|s| resolve_bound(s, length)).unwrap_or(0);
                let to = end.and_then(|e| resolve_bound(e, length)).unwrap_or(length);
                if from < to {
                    next.extend(items[from..to].iter());
                }
            }
        }
        Segment::Recursive(target) => collect_descendants(value, target.as_deref(), next),
        Segment::Filter(filter) => {
            let candidates: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                Value::Object(map) => map.values().collect(),
                _ => Vec::new(),
            };
            next.extend(candidates.into_iter().filter(|item| filter_matches(filter, root, item)));
        }
    }
}

fn resolve_index(index: i64, length: usize) -> Option<usize> {
    let length = i64::try_from(length).ok()?;
    let resolved = if index < 0 { length + index } else { index };
    if (0..length).contains(&resolved) { usize::try_from(resolved).ok() } else { None }
}

fn resolve_bound(bound: i64, length: usize) -> Option<usize> {
    let length_signed = i64::try_from(length).ok()?;
    let resolved = if bound < 0 { length_signed + bound } else { bound };
    usize::try_from(resolved.clamp(0, length_signed)).ok()
}

fn collect_descendants<'a>(value: &'a Value, target: Option<&str>, next: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if target.is_none_or(|name| name == key) {
                    next.push(child);
                }
                collect_descendants(child, target, next);
            }
        }
        Value::Array(items) => {
            for child in items {
                if target.is_none() {
                    next.push(child);
                }
                collect_descendants(child, target, next);
            }
        }
        _ => {}
    }
}

fn filter_matches(filter: &Filter, root: &Value, item: &Value) -> bool {
    let found = select(&filter.left, root, item);
    let Some((op, literal)) = &filter.comparison else {
        return found.iter().any(|value| !value.is_null());
    };
    found.iter().any(|value| compare(value, *op, literal))
}

fn compare(value: &Value, op: CompareOp, literal: &Literal) -> bool {
    match literal {
        Literal::Number(expected) => {
            let actual = match value {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            };
            let Some(actual) = actual else {
                return op == CompareOp::Ne;
            };
            match op {
                CompareOp::Eq => actual == *expected,
                CompareOp::Ne => actual != *expected,
                CompareOp::Lt => actual < *expected,
                CompareOp::Le => actual <= *expected,
                CompareOp::Gt => actual > *expected,
                CompareOp::Ge => actual >= *expected,
            }
        }
        Literal::Text(expected) => {
            let actual = printable(value);
            let ordering = actual.as_str().cmp(expected.as_str());
            match op {
                CompareOp::Eq => ordering.is_eq(),
                CompareOp::Ne => ordering.is_ne(),
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
            }
        }
    }
}

/// Text form of a matched value: strings verbatim, null as empty, the rest as JSON.
pub fn printable(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
