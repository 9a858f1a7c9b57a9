// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use serde_json::Value;

/// Older settings files stored OpenAI's Chat Completions URL; the engine only
/// speaks the Responses API.
const LEGACY_OPENAI_PATH: &str = "/v1/chat/completions";
const RESPONSES_PATH: &str = "/v1/responses";

pub(super) fn migrate_on_load(mut value: Value) -> Value {
    if let Some(url) = value
        .pointer_mut("/providers/openai/base_url")
        .filter(|url| url.as_str().is_some_and(|s| s.contains(LEGACY_OPENAI_PATH)))
    {
        let migrated = url
            .as_str()
            .map(|s| s.replace(LEGACY_OPENAI_PATH, RESPONSES_PATH))
            .unwrap_or_default();
        tracing::info!(
            target: "shoulders.config",
            base_url = %migrated,
            "migrated legacy OpenAI endpoint"
        );
        *url = Value::String(migrated);
    }
    value
}

/// Deep-merge two JSON values.
/// `base` is existing file content, `overlay` is serialized current struct.
/// Overlay values take priority.
pub(super) fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = if let Some(base_val) = base_map.remove(&key) {
                    deep_merge(base_val, overlay_val)
                } else {
                    overlay_val
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_base, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_migrate_legacy_openai_url() {
        let value = json!({"providers": {"openai": {"base_url": "https://proxy.local/v1/chat/completions"}}});
        let migrated = migrate_on_load(value);
        assert_eq!(
            migrated["providers"]["openai"]["base_url"],
            "https://proxy.local/v1/responses"
        );
    }

    #[test]
    fn test_migrate_leaves_other_values_alone() {
        let value = json!({"providers": {"openai": {"base_url": "https://api.openai.com/v1/responses"}}});
        assert_eq!(migrate_on_load(value.clone()), value);
        assert_eq!(migrate_on_load(json!({})), json!({}));
    }

    #[test]
    fn test_deep_merge_overlay_wins() {
        let base = json!({"a": {"b": 1, "c": 2}, "keep": true});
        let overlay = json!({"a": {"b": 3}});
        let merged = deep_merge(base, overlay);
        assert_eq!(merged, json!({"a": {"b": 3, "c": 2}, "keep": true}));
    }
}
