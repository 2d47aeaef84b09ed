// Defensive projection of agent JSON onto stage schemas. Every accessor
// records a warning when it has to substitute a default.

use serde_json::{Map, Value};

/// The object to project from. A top-level array contributes its last
/// object element; anything else projects as an empty object.
pub fn root_object(value: Value, warnings: &mut Vec<String>) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Array(items) => {
            warnings.push("answer was an array; using its last object".to_string());
            items
                .into_iter()
                .rev()
                .find_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .unwrap_or_default()
        }
        other => {
            warnings.push(format!("answer was not an object: {}", kind_of(&other)));
            Map::new()
        }
    }
}

/// A list of strings. `None` when the field is absent or null, so callers
/// can tell "not provided" from "explicitly empty".
pub fn optional_string_list(
    obj: &Map<String, Value>,
    key: &str,
    warnings: &mut Vec<String>,
) -> Option<Vec<String>> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            let mut dropped = 0usize;
            for item in items {
                match item {
                    Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
                    Value::Number(n) => out.push(n.to_string()),
                    _ => dropped += 1,
                }
            }
            if dropped > 0 {
                warnings.push(format!("{key}: dropped {dropped} non-text entries"));
            }
            Some(out)
        }
        // A lone string is a one-element list.
        Some(Value::String(s)) if !s.trim().is_empty() => Some(vec![s.trim().to_string()]),
        Some(other) => {
            warnings.push(format!("{key}: expected a list, got {}; defaulted to []", kind_of(other)));
            Some(Vec::new())
        }
    }
}

/// A list of strings defaulting to `[]` when absent.
pub fn string_list(obj: &Map<String, Value>, key: &str, warnings: &mut Vec<String>) -> Vec<String> {
    optional_string_list(obj, key, warnings).unwrap_or_else(|| {
        warnings.push(format!("{key}: missing; defaulted to []"));
        Vec::new()
    })
}

/// A non-blank string field.
pub fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// An enum-like field parsed with `parse`, defaulting with a warning when
/// missing or unrecognized.
pub fn parsed<T: Copy + std::fmt::Debug>(
    obj: &Map<String, Value>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
    default: T,
    warnings: &mut Vec<String>,
) -> T {
    match obj.get(key) {
        Some(Value::String(s)) => parse(s).unwrap_or_else(|| {
            warnings.push(format!("{key}: unrecognized value {s:?}; defaulted to {default:?}"));
            default
        }),
        None | Some(Value::Null) => {
            warnings.push(format!("{key}: missing; defaulted to {default:?}"));
            default
        }
        Some(other) => {
            warnings.push(format!("{key}: expected text, got {}; defaulted to {default:?}", kind_of(other)));
            default
        }
    }
}

pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
