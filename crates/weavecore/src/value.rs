use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key/value map used for trigger data, node inputs and node outputs
pub type ValueMap = HashMap<String, Value>;

/// Dynamic value type for node inputs/outputs
///
/// Serializes as plain JSON so request bodies and stored executions
/// stay readable by any client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(ValueMap),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ValueMap> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the variant, used in type mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Walk a dotted path (`a.b.0.c`) through objects and arrays.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Render the value the way it appears inside a template string.
    ///
    /// Strings are inserted verbatim, integral numbers lose the trailing `.0`,
    /// and composite values are rendered as compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Loose equality used by condition evaluation: numbers compare numerically
    /// against numeric strings, booleans against `"true"`/`"false"`.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => (a - b).abs() < f64::EPSILON,
            (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => s
                .trim()
                .parse::<f64>()
                .map(|parsed| (parsed - n).abs() < f64::EPSILON)
                .unwrap_or(false),
            (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
                s.trim().parse::<bool>().map(|parsed| parsed == *b).unwrap_or(false)
            }
            _ => self == other,
        }
    }

    /// Numeric view used by ordering operators; numeric strings are accepted.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Object(map)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, serde_json::Value::from(v))).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_path_walks_objects_and_arrays() {
        let value = Value::from(json!({
            "user": { "name": "ada", "tags": ["x", "y"] }
        }));

        assert_eq!(value.get_path("user.name"), Some(&Value::from("ada")));
        assert_eq!(value.get_path("user.tags.1"), Some(&Value::from("y")));
        assert_eq!(value.get_path("user.missing"), None);
        assert_eq!(value.get_path("user.name.deeper"), None);
    }

    #[test]
    fn untagged_serialization_is_plain_json() {
        let value = Value::from(json!({ "status": "success", "count": 3 }));
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded, json!({ "status": "success", "count": 3.0 }));
    }

    #[test]
    fn to_text_drops_integral_fraction() {
        assert_eq!(Value::Number(42.0).to_text(), "42");
        assert_eq!(Value::Number(2.5).to_text(), "2.5");
        assert_eq!(Value::Null.to_text(), "");
    }

    #[test]
    fn loose_equality_crosses_string_and_number() {
        assert!(Value::Number(10.0).loosely_equals(&Value::from("10")));
        assert!(Value::Bool(true).loosely_equals(&Value::from("true")));
        assert!(!Value::from("success").loosely_equals(&Value::from("failure")));
    }
}
