//! Compact structural summaries of JSON values.
//!
//! Type names follow Python (`dict`, `list`, `str`, ...) because the
//! summaries are read by a model writing Python.

use serde_json::{json, Map, Value};

/// Keys listed per object.
const MAX_KEYS: usize = 10;
/// Entries recursed into per object or array.
const MAX_SAMPLES: usize = 3;
/// Characters kept from a string leaf.
const MAX_LEAF_CHARS: usize = 100;

/// Python type name of a JSON value.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Key/depth summary of `value`, recursing at most `max_depth` levels.
///
/// # Example
///
/// ```
/// use llm_agent::tools::structure::json_structure;
/// use serde_json::json;
///
/// let s = json_structure(&json!({"rows": [1, 2, 3, 4]}), 3);
/// assert_eq!(s["type"], "dict");
/// assert_eq!(s["sample_values"]["rows"]["length"], 4);
/// ```
pub fn json_structure(value: &Value, max_depth: usize) -> Value {
    if max_depth == 0 {
        return json!({"type": type_name(value), "truncated": true});
    }

    match value {
        Value::Object(map) => {
            let samples: Map<String, Value> = map
                .iter()
                .take(MAX_SAMPLES)
                .map(|(k, v)| (k.clone(), json_structure(v, max_depth - 1)))
                .collect();
            json!({
                "type": "dict",
                "keys": map.keys().take(MAX_KEYS).collect::<Vec<_>>(),
                "key_count": map.len(),
                "sample_values": samples,
            })
        }
        Value::Array(items) => json!({
            "type": "list",
            "length": items.len(),
            "sample_items": items
                .iter()
                .take(MAX_SAMPLES)
                .map(|item| json_structure(item, max_depth - 1))
                .collect::<Vec<_>>(),
        }),
        Value::String(s) => json!({
            "type": "str",
            "value": s.chars().take(MAX_LEAF_CHARS).collect::<String>(),
        }),
        leaf => json!({"type": type_name(leaf), "value": leaf}),
    }
}

/// Human-readable size of `value` in its serialized form.
pub fn estimate_size(value: &Value) -> String {
    let bytes = serde_json::to_string(value).map(|s| s.len()).unwrap_or(0);
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// General summary of any value: type, size and a shape hint.
pub fn data_summary(value: &Value) -> Value {
    let mut summary = json!({
        "type": type_name(value),
        "size": estimate_size(value),
    });

    match value {
        Value::Object(map) => {
            summary["key_count"] = json!(map.len());
            summary["keys"] = json!(map.keys().take(MAX_KEYS).collect::<Vec<_>>());
        }
        Value::Array(items) => {
            let mut item_types: Vec<&str> = items.iter().take(100).map(type_name).collect();
            item_types.sort_unstable();
            item_types.dedup();
            summary["length"] = json!(items.len());
            summary["item_types"] = json!(item_types);
        }
        Value::String(s) => {
            summary["length"] = json!(s.chars().count());
            summary["word_count"] = json!(s.split_whitespace().count());
            summary["preview"] = json!(s.chars().take(200).collect::<String>());
        }
        _ => {}
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(&json!(null)), "NoneType");
        assert_eq!(type_name(&json!(1)), "int");
        assert_eq!(type_name(&json!(1.5)), "float");
        assert_eq!(type_name(&json!("s")), "str");
        assert_eq!(type_name(&json!([])), "list");
        assert_eq!(type_name(&json!({})), "dict");
    }

    #[test]
    fn test_structure_depth_limit() {
        let nested = json!({"a": {"b": {"c": {"d": 1}}}});
        let s = json_structure(&nested, 3);
        assert_eq!(
            s["sample_values"]["a"]["sample_values"]["b"]["sample_values"]["c"],
            json!({"type": "dict", "truncated": true})
        );
    }

    #[test]
    fn test_keys_keep_document_order() {
        let value: Value = serde_json::from_str(r#"{"zeta": 1, "alpha": 2, "mid": 3}"#).unwrap();
        let s = json_structure(&value, 2);
        assert_eq!(s["keys"], json!(["zeta", "alpha", "mid"]));
        assert_eq!(data_summary(&value)["keys"], json!(["zeta", "alpha", "mid"]));
    }

    #[test]
    fn test_structure_limits_keys_and_samples() {
        let map: Map<String, Value> = (0..15).map(|i| (format!("k{i:02}"), json!(i))).collect();
        let s = json_structure(&Value::Object(map), 3);
        assert_eq!(s["key_count"], 15);
        assert_eq!(s["keys"].as_array().unwrap().len(), 10);
        assert_eq!(s["sample_values"].as_object().unwrap().len(), 3);

        let list = json!([1, 2, 3, 4, 5]);
        let s = json_structure(&list, 3);
        assert_eq!(s["sample_items"].as_array().unwrap().len(), 3);
        assert_eq!(s["sample_items"][0], json!({"type": "int", "value": 1}));
    }

    #[test]
    fn test_string_leaf_truncated() {
        let s = json_structure(&json!("x".repeat(300)), 1);
        assert_eq!(s["value"].as_str().unwrap().len(), 100);
    }

    #[test]
    fn test_data_summary_shapes() {
        let s = data_summary(&json!([1, "a", 2]));
        assert_eq!(s["length"], 3);
        assert_eq!(s["item_types"], json!(["int", "str"]));

        let s = data_summary(&json!("hello big world"));
        assert_eq!(s["word_count"], 3);

        let s = data_summary(&json!({"x": 1}));
        assert_eq!(s["keys"], json!(["x"]));
        assert_eq!(s["size"], "7 bytes");
    }

    #[test]
    fn test_estimate_size_units() {
        assert_eq!(estimate_size(&json!("x".repeat(2046))), "2.0 KB");
    }
}
