//! Resource tag maps

use std::collections::BTreeMap;

use serde_json::{json, Value};

/// Key-value tags applied to cloud resources
pub type Tags = BTreeMap<String, String>;

/// Overlay `overrides` on top of `base`; keys in `overrides` win
///
/// Returns `None` when neither side has tags so callers can leave the
/// property unset instead of sending an empty map.
pub fn merge(base: Option<&Tags>, overrides: Option<&Tags>) -> Option<Tags> {
    match (base, overrides) {
        (None, None) => None,
        _ => {
            let mut merged = base.cloned().unwrap_or_default();
            if let Some(overrides) = overrides {
                merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(merged)
        }
    }
}

/// Tags as a `{key: value}` JSON object
pub fn to_map_value(tags: &Tags) -> Value {
    json!(tags)
}

/// Tags as a `[{key, value}]` list, the shape used by CloudControl resources
pub fn to_native_tags(tags: &Tags) -> Value {
    Value::Array(
        tags.iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect(),
    )
}
