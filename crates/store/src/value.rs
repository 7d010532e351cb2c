//! Conversion between document values and JSON values.
//!
//! Rows and KV values cross the document boundary as `yrs::Any`; the
//! rest of the engine works in `serde_json::Value`. Object conversion
//! goes through `serde_json::Map`, whose key ordering is stable, so
//! equal document states project to byte-equal JSON.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Number, Value};
use yrs::Any;

/// Converts a document value into JSON.
///
/// `Undefined` maps to `Null`; binary buffers map to arrays of byte
/// values (JSON has no native byte string).
#[must_use]
pub fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(flag) => Value::Bool(*flag),
        Any::Number(num) => Number::from_f64(*num).map_or(Value::Null, Value::Number),
        Any::BigInt(num) => Value::Number(Number::from(*num)),
        Any::String(text) => Value::String(text.to_string()),
        Any::Buffer(bytes) => Value::Array(
            bytes
                .iter()
                .map(|byte| Value::Number(Number::from(*byte)))
                .collect(),
        ),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(entries) => {
            let mut object = JsonMap::new();
            for (key, value) in entries.iter() {
                let _ = object.insert(key.clone(), any_to_json(value));
            }
            Value::Object(object)
        }
    }
}

/// Converts a JSON value into a document value.
///
/// Integers that fit `i64` are stored exactly; other numbers fall back
/// to `f64`.
#[must_use]
pub fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(flag) => Any::Bool(*flag),
        Value::Number(num) => num.as_i64().map_or_else(
            || Any::Number(num.as_f64().unwrap_or(f64::NAN)),
            Any::BigInt,
        ),
        Value::String(text) => Any::String(Arc::from(text.as_str())),
        Value::Array(items) => {
            let converted: Vec<Any> = items.iter().map(json_to_any).collect();
            Any::Array(Arc::from(converted))
        }
        Value::Object(entries) => {
            let converted: HashMap<String, Any> = entries
                .iter()
                .map(|(key, value)| (key.clone(), json_to_any(value)))
                .collect();
            Any::Map(Arc::new(converted))
        }
    }
}
