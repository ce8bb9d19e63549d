//! Layering of composite-template configuration.

use castor_types::ConfigEntry;
use serde_json::{Map, Value, json};

use crate::EngineError;

/// Merge two configuration layers; entries in `high` win by trimmed name.
///
/// High-priority entries come first in their given order, followed by the
/// low-priority entries they do not override.
pub fn merge_config(high: &[ConfigEntry], low: &[ConfigEntry]) -> Vec<ConfigEntry> {
    let mut merged: Vec<ConfigEntry> = Vec::with_capacity(high.len() + low.len());
    for entry in high.iter().chain(low.iter()) {
        let name = entry.name.trim();
        if merged.iter().any(|existing| existing.name.trim() == name) {
            continue;
        }
        merged.push(entry.clone());
    }
    merged
}

/// Expose entries as `{name: {enabled, value, data}}`.
pub fn config_to_map(entries: &[ConfigEntry]) -> Result<Map<String, Value>, EngineError> {
    let mut map = Map::new();
    for (position, entry) in entries.iter().enumerate() {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(EngineError::Config(format!(
                "config entry at position {} has an empty name",
                position + 1
            )));
        }
        map.insert(
            name.to_string(),
            json!({
                "enabled": entry.enabled,
                "value": entry.value,
                "data": entry.data,
            }),
        );
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_priority_wins_by_trimmed_name() {
        let high = vec![ConfigEntry::new(" ReplicaCount ", "3")];
        let low = vec![ConfigEntry::new("ReplicaCount", "1"), ConfigEntry::new("TargetPort", "3260")];
        let merged = merge_config(&high, &low);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].value, "3");
        assert_eq!(merged[1].name, "TargetPort");
    }

    #[test]
    fn map_exposes_value_and_data() {
        let mut entry = ConfigEntry::new("Pool", "default");
        entry.enabled = "true".into();
        entry.data.insert("zone".into(), "a".into());
        let map = config_to_map(&[entry]).expect("map");
        assert_eq!(map["Pool"]["value"], "default");
        assert_eq!(map["Pool"]["enabled"], "true");
        assert_eq!(map["Pool"]["data"]["zone"], "a");
    }

    #[test]
    fn empty_name_is_rejected() {
        let error = config_to_map(&[ConfigEntry::new("  ", "x")]).expect_err("empty name");
        assert!(matches!(error, EngineError::Config(_)), "unexpected error: {error}");
    }
}
