//! `{{path.to.field}}` substitution in node configuration.
//!
//! Placeholders are resolved against the node's merged input. A placeholder
//! whose path does not resolve is left in the output untouched, so a typo is
//! visible in the result instead of silently turning into an empty string.
//! A string that is exactly one placeholder resolves to the referenced value
//! itself, keeping numbers and objects typed.

use crate::{Value, ValueMap};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// One piece of a parsed template string.
#[derive(Debug, Clone, PartialEq)]
enum Segment<'a> {
    Literal(&'a str),
    Placeholder { raw: &'a str, path: &'a str },
}

fn parse(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        if start > 0 {
            segments.push(Segment::Literal(&rest[..start]));
        }
        let raw = &rest[start..start + OPEN.len() + end + CLOSE.len()];
        segments.push(Segment::Placeholder {
            raw,
            path: after_open[..end].trim(),
        });
        rest = &after_open[end + CLOSE.len()..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    segments
}

/// Substitute placeholders inside a single string.
pub fn render_str(template: &str, data: &Value) -> Value {
    let segments = parse(template);

    if let [Segment::Placeholder { path, .. }] = segments.as_slice() {
        if let Some(value) = lookup(data, path) {
            return value.clone();
        }
        return Value::String(template.to_string());
    }

    let mut out = String::with_capacity(template.len());
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder { raw, path } => match lookup(data, path) {
                Some(value) => out.push_str(&value.to_text()),
                None => out.push_str(raw),
            },
        }
    }
    Value::String(out)
}

/// Substitute placeholders anywhere inside a value, recursing into
/// arrays and objects.
pub fn render_value(value: &Value, data: &Value) -> Value {
    match value {
        Value::String(s) if s.contains(OPEN) => render_str(s, data),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, data)).collect()),
        Value::Object(map) => Value::Object(render_map(map, data)),
        other => other.clone(),
    }
}

/// Substitute placeholders in every entry of a config map.
pub fn render_map(config: &ValueMap, data: &Value) -> ValueMap {
    config
        .iter()
        .map(|(key, value)| (key.clone(), render_value(value, data)))
        .collect()
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    data.get_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Value {
        Value::from(json!({
            "user": { "name": "Ada", "age": 36 },
            "items": [ { "sku": "A1" } ],
            "status": "success"
        }))
    }

    #[test]
    fn substitutes_nested_paths_inside_text() {
        let rendered = render_str("Hello {{user.name}}, you are {{ user.age }}", &data());
        assert_eq!(rendered, Value::from("Hello Ada, you are 36"));
    }

    #[test]
    fn array_index_segments_resolve() {
        assert_eq!(render_str("sku={{items.0.sku}}", &data()), Value::from("sku=A1"));
    }

    #[test]
    fn missing_path_leaves_placeholder() {
        let rendered = render_str("Hi {{user.email}}!", &data());
        assert_eq!(rendered, Value::from("Hi {{user.email}}!"));
    }

    #[test]
    fn lone_placeholder_keeps_type() {
        assert_eq!(render_str("{{user.age}}", &data()), Value::Number(36.0));
        assert_eq!(render_str("{{missing}}", &data()), Value::from("{{missing}}"));
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(render_str("open {{user.name", &data()), Value::from("open {{user.name"));
    }

    #[test]
    fn render_map_recurses_into_objects() {
        let mut config = ValueMap::new();
        config.insert(
            "headers".into(),
            Value::from(json!({ "X-Status": "{{status}}" })),
        );
        config.insert("retries".into(), Value::Number(2.0));

        let rendered = render_map(&config, &data());
        assert_eq!(
            rendered["headers"].get_path("X-Status"),
            Some(&Value::from("success"))
        );
        assert_eq!(rendered["retries"], Value::Number(2.0));
    }
}
