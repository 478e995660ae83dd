use serde_json::{Map, Value};
use tracing::warn;

/// Feature status labels from older schemas, rewritten on load
const DEPRECATED_STATUS: &[(&str, &str)] = &[
    ("pending", "defining"),
    ("define", "defining"),
    ("in_progress", "implementing"),
    ("in-progress", "implementing"),
    ("done", "completed"),
    ("complete", "completed"),
    ("error", "failed"),
    ("cancelled", "failed"),
];

/// Migrate a raw state document to the current schema, in place.
///
/// Rules:
/// - unknown top-level keys are preserved untouched;
/// - `features` stored as an id-keyed object becomes an array with the id
///   injected into each element;
/// - a feature payload that is not a mapping is coerced to
///   `{"prompt": <string form>}` and logged;
/// - deprecated status labels are rewritten to the current enum;
/// - a feature missing `updated_at` adopts its `created_at`.
pub fn migrate(document: &mut Value) {
    let Some(root) = document.as_object_mut() else {
        return;
    };

    let features = match root.remove("features") {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| migrate_feature(item, None))
            .collect::<Vec<Value>>(),
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(id, item)| migrate_feature(item, Some(id)))
            .collect(),
        Some(other) => {
            warn!("State field 'features' had unexpected shape; resetting");
            let _ = other;
            Vec::new()
        }
        None => Vec::new(),
    };
    root.insert("features".to_string(), Value::Array(features));
}

fn migrate_feature(payload: Value, id_hint: Option<String>) -> Value {
    let mut feature = match payload {
        Value::Object(map) => map,
        other => {
            warn!("Feature payload was not a mapping; coercing to a prompt");
            let prompt = match other {
                Value::String(s) => s,
                other => other.to_string(),
            };
            let mut map = Map::new();
            map.insert("prompt".to_string(), Value::String(prompt));
            map
        }
    };

    if let Some(id) = id_hint {
        feature.entry("id".to_string()).or_insert(Value::String(id));
    }

    if let Some(Value::String(status)) = feature.get("status") {
        let folded = status.to_lowercase();
        if let Some((_, current)) = DEPRECATED_STATUS.iter().find(|(old, _)| *old == folded) {
            feature.insert("status".to_string(), Value::String(current.to_string()));
        }
    }
    feature
        .entry("status".to_string())
        .or_insert(Value::String("defining".to_string()));

    feature
        .entry("current_phase".to_string())
        .or_insert(Value::String("define".to_string()));

    if !feature.contains_key("updated_at") {
        if let Some(created) = feature.get("created_at").cloned() {
            feature.insert("updated_at".to_string(), created);
        }
    }

    Value::Object(feature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_features_become_array_with_ids() {
        let mut document = json!({
            "name": "demo",
            "features": {
                "11111111-1111-1111-1111-111111111111": {
                    "prompt": "add login",
                    "status": "in_progress",
                    "created_at": "2026-01-01T00:00:00Z"
                }
            }
        });
        migrate(&mut document);
        let features = document["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(
            features[0]["id"],
            "11111111-1111-1111-1111-111111111111"
        );
        assert_eq!(features[0]["status"], "implementing");
        assert_eq!(features[0]["updated_at"], "2026-01-01T00:00:00Z");
    }

    #[test]
    fn test_non_mapping_feature_coerced_to_prompt() {
        let mut document = json!({
            "features": { "f1": "just a prompt string" }
        });
        migrate(&mut document);
        let features = document["features"].as_array().unwrap();
        assert_eq!(features[0]["prompt"], "just a prompt string");
        assert_eq!(features[0]["status"], "defining");
        assert_eq!(features[0]["current_phase"], "define");
    }

    #[test]
    fn test_unknown_top_level_keys_preserved() {
        let mut document = json!({
            "features": [],
            "legacy_settings": {"theme": "dark"}
        });
        migrate(&mut document);
        assert_eq!(document["legacy_settings"]["theme"], "dark");
    }

    #[test]
    fn test_current_labels_untouched() {
        let mut document = json!({
            "features": [{"prompt": "x", "status": "reviewing"}]
        });
        migrate(&mut document);
        assert_eq!(document["features"][0]["status"], "reviewing");
    }
}
