//! Kubernetes-style version ordering.
//!
//! Versions look like `v<major>.<minor>.<patch>[-<channel>[.<build>]]`. Channels
//! order `alpha < beta < GA`; `gke`, `eks`, and a missing channel are GA.

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;

const INVALID_LABEL: &str = "invalid";
const MAX_LABEL_LENGTH: usize = 63;

static VERSION_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^v(\d+)(?:.)(\d+)(?:.)(\d+)(?:-(alpha|beta|gke|eks))?(?:.(\d+))?").ok());

static LABEL_VALUE_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(?:[A-Za-z0-9](?:[-A-Za-z0-9_.]*[A-Za-z0-9])?)?$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Channel {
    Alpha,
    Beta,
    Ga,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    channel: Channel,
    build: u64,
}

fn parse(raw: &str) -> Option<Version> {
    let captures = VERSION_PATTERN.as_ref()?.captures(raw)?;
    let number = |index: usize| captures.get(index).and_then(|m| m.as_str().parse::<u64>().ok());
    let channel = match captures.get(4).map(|m| m.as_str()) {
        Some("alpha") => Channel::Alpha,
        Some("beta") => Channel::Beta,
        _ => Channel::Ga,
    };
    Some(Version {
        major: number(1)?,
        minor: number(2)?,
        patch: number(3)?,
        channel,
        build: number(5).unwrap_or(0),
    })
}

/// Order two version strings.
///
/// # Notes
/// - Identical strings are equal without parsing.
/// - Two unparsable strings order lexically.
/// - An unparsable string is less than a parsable one.
pub fn compare(v1: &str, v2: &str) -> Ordering {
    if v1 == v2 {
        return Ordering::Equal;
    }
    match (parse(v1), parse(v2)) {
        (Some(left), Some(right)) => left.cmp(&right),
        (None, None) => v1.cmp(v2),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}

pub fn equals(v1: &str, v2: &str) -> bool {
    compare(v1, v2).is_eq()
}

pub fn greater_than(v1: &str, v2: &str) -> bool {
    compare(v1, v2).is_gt()
}

pub fn greater_than_or_equals(v1: &str, v2: &str) -> bool {
    compare(v1, v2).is_ge()
}

pub fn less_than(v1: &str, v2: &str) -> bool {
    compare(v1, v2).is_lt()
}

pub fn less_than_or_equals(v1: &str, v2: &str) -> bool {
    compare(v1, v2).is_le()
}

fn is_valid_label_value(value: &str) -> bool {
    value.len() <= MAX_LABEL_LENGTH
        && LABEL_VALUE_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(value))
}

/// Make a version usable as a label value.
///
/// Valid label values pass through. Otherwise the canonical version prefix is
/// used, or `invalid` when there is none.
pub fn as_label_value(raw: &str) -> String {
    if is_valid_label_value(raw) {
        return raw.to_string();
    }
    let prefix = VERSION_PATTERN
        .as_ref()
        .and_then(|pattern| pattern.find(raw))
        .map(|m| m.as_str().to_string());
    match prefix {
        Some(prefix) if is_valid_label_value(&prefix) => prefix,
        _ => INVALID_LABEL.to_string(),
    }
}
