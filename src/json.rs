//! Presence-checked accessors over untyped JSON.
//!
//! Registry payloads vary by operator, so every read is optional: a field
//! that is missing or has an unexpected type reads as `None` instead of
//! failing the whole document.

use serde_json::{Map, Value};

pub trait JsonObjectExt {
    fn str_field(&self, key: &str) -> Option<&str>;
    fn array_field(&self, key: &str) -> Option<&Vec<Value>>;
    fn object_field(&self, key: &str) -> Option<&Map<String, Value>>;

    /// A string or number field rendered as text.
    fn scalar_field(&self, key: &str) -> Option<String>;

    /// The string elements of an array field; other elements are skipped.
    fn string_list(&self, key: &str) -> Vec<String> {
        self.array_field(key).map(|values| string_list(values)).unwrap_or_default()
    }
}

impl JsonObjectExt for Map<String, Value> {
    fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn array_field(&self, key: &str) -> Option<&Vec<Value>> {
        self.get(key).and_then(Value::as_array)
    }

    fn object_field(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get(key).and_then(Value::as_object)
    }

    fn scalar_field(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_text)
    }
}

pub fn string_list(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Strings as-is, integers (including integral floats such as `8.0`) without a fraction.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Some((f as i64).to_string())
                } else {
                    Some(f.to_string())
                }
            }
        }
        _ => None,
    }
}
