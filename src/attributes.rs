//! Conversion between loose JSON attribute maps and typed OTLP attributes.
//!
//! Callers hand the SDK `serde_json` values; exporters need
//! [`opentelemetry::KeyValue`] pairs. The conversion is total: every JSON
//! value maps to some attribute value, falling back to its JSON string form
//! when no typed representation fits.

use opentelemetry::{Array, KeyValue, StringValue, Value};
use serde_json::Value as JsonValue;

/// Attributes attached to metrics, logs, span starts and span events.
pub type AttributeMap = serde_json::Map<String, JsonValue>;

/// Converts an attribute map into OTLP key-value pairs.
///
/// Iteration order follows the map; `serde_json::Map` preserves insertion
/// order when built through the public API.
pub(crate) fn to_key_values(attributes: &AttributeMap) -> Vec<KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), to_value(value)))
        .collect()
}

fn to_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::I64(i)
            } else {
                // u64 above i64::MAX and all floats take the f64 path
                Value::F64(n.as_f64().unwrap_or_default())
            }
        }
        JsonValue::String(s) => Value::String(StringValue::from(s.clone())),
        JsonValue::Array(items) => Value::Array(to_array(items)),
        // null and nested objects carry no typed equivalent
        other => Value::String(StringValue::from(other.to_string())),
    }
}

fn to_array(items: &[JsonValue]) -> Array {
    // non-primitive elements (nulls, nested arrays, objects) are dropped
    let items: Vec<&JsonValue> = items
        .iter()
        .filter(|v| v.is_boolean() || v.is_number() || v.is_string())
        .collect();

    if items.iter().all(|v| v.is_boolean()) {
        return Array::Bool(items.iter().filter_map(|v| v.as_bool()).collect());
    }
    if items.iter().all(|v| v.as_i64().is_some()) {
        return Array::I64(items.iter().filter_map(|v| v.as_i64()).collect());
    }
    if items.iter().all(|v| v.is_number()) {
        return Array::F64(items.iter().filter_map(|v| v.as_f64()).collect());
    }
    if items.iter().all(|v| v.is_string()) {
        return Array::String(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| StringValue::from(s.to_owned()))
                .collect(),
        );
    }
    // Mixed primitive types degrade to their element-wise string forms.
    Array::String(
        items
            .iter()
            .map(|v| match v {
                JsonValue::String(s) => StringValue::from(s.clone()),
                other => StringValue::from(other.to_string()),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(entries: &[(&str, JsonValue)]) -> AttributeMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn scalars_keep_their_types() {
        let kvs = to_key_values(&map(&[
            ("flag", json!(true)),
            ("count", json!(42)),
            ("ratio", json!(0.5)),
            ("label", json!("hello")),
        ]));

        let by_key = |key: &str| {
            kvs.iter()
                .find(|kv| kv.key.as_str() == key)
                .map(|kv| kv.value.clone())
                .unwrap()
        };
        assert_eq!(by_key("flag"), Value::Bool(true));
        assert_eq!(by_key("count"), Value::I64(42));
        assert_eq!(by_key("ratio"), Value::F64(0.5));
        assert_eq!(by_key("label"), Value::String("hello".into()));
    }

    #[test]
    fn homogeneous_arrays_stay_typed() {
        let kvs = to_key_values(&map(&[("ports", json!([80, 443, 8080]))]));
        assert_eq!(kvs[0].value, Value::Array(Array::I64(vec![80, 443, 8080])));

        let kvs = to_key_values(&map(&[("flags", json!([true, false]))]));
        assert_eq!(kvs[0].value, Value::Array(Array::Bool(vec![true, false])));
    }

    #[test]
    fn string_arrays_stay_typed() {
        let kvs = to_key_values(&map(&[("regions", json!(["eu-west", "us-east"]))]));
        match &kvs[0].value {
            Value::Array(Array::String(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].as_str(), "eu-west");
                assert_eq!(items[1].as_str(), "us-east");
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn mixed_numeric_arrays_widen_to_f64() {
        let kvs = to_key_values(&map(&[("values", json!([1, 2.5]))]));
        assert_eq!(kvs[0].value, Value::Array(Array::F64(vec![1.0, 2.5])));
    }

    #[test]
    fn heterogeneous_arrays_degrade_to_strings() {
        let kvs = to_key_values(&map(&[("mixed", json!([1, "two", true]))]));
        match &kvs[0].value {
            Value::Array(Array::String(items)) => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[0].as_str(), "1");
                assert_eq!(items[1].as_str(), "two");
                assert_eq!(items[2].as_str(), "true");
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn non_primitive_array_elements_are_dropped() {
        let kvs = to_key_values(&map(&[("ports", json!([80, {"nested": true}, 443, null]))]));
        assert_eq!(kvs[0].value, Value::Array(Array::I64(vec![80, 443])));
    }

    #[test]
    fn nulls_and_objects_are_stringified() {
        let kvs = to_key_values(&map(&[
            ("absent", JsonValue::Null),
            ("nested", json!({"a": 1})),
        ]));
        let by_key = |key: &str| {
            kvs.iter()
                .find(|kv| kv.key.as_str() == key)
                .map(|kv| kv.value.clone())
                .unwrap()
        };
        assert_eq!(by_key("absent"), Value::String("null".into()));
        assert_eq!(by_key("nested"), Value::String("{\"a\":1}".into()));
    }
}
