use serde_json::{Map, Value};

use crate::models::product::Product;

/// Structured field-level diff between two product states, shaped as
/// `{ field: { "old": ..., "new": ... } }`. Timestamps are skipped; they
/// change on every save and carry no audit signal.
pub fn product_diff(old: Option<&Product>, new: Option<&Product>) -> Value {
    let old_map = to_map(old);
    let new_map = to_map(new);

    let mut diff = Map::new();
    let keys: std::collections::BTreeSet<&String> = old_map.keys().chain(new_map.keys()).collect();

    for key in keys {
        if key == "created_at" || key == "updated_at" {
            continue;
        }
        let old_value = old_map.get(key.as_str()).cloned().unwrap_or(Value::Null);
        let new_value = new_map.get(key.as_str()).cloned().unwrap_or(Value::Null);
        if old_value != new_value {
            let mut entry = Map::new();
            entry.insert("old".to_string(), old_value);
            entry.insert("new".to_string(), new_value);
            diff.insert(key.clone(), Value::Object(entry));
        }
    }

    Value::Object(diff)
}

fn to_map(product: Option<&Product>) -> Map<String, Value> {
    product
        .and_then(|p| serde_json::to_value(p).ok())
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}
