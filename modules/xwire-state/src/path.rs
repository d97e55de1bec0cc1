//! Dot-path lookup into state and payload values.
//!
//! Paths look like `config.maxItems` or `results.0.id`. Numeric segments
//! index into arrays. The empty path selects the whole value.

use serde_json::{Map, Value};

use crate::error::PathError;

/// Resolve `path` inside `value`.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Result<&'a Value, PathError> {
    if path.is_empty() {
        return Ok(value);
    }

    let mut current = value;
    for segment in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| PathError::TaggingPathNotFound {
            path: path.to_string(),
        })?;
    }
    Ok(current)
}

/// Like [`lookup`], but a missing path reads as `Value::Null`.
pub fn get_or_null(value: &Value, path: &str) -> Value {
    lookup(value, path).cloned().unwrap_or(Value::Null)
}

/// Build an object by picking `(key, path)` pairs out of `source`.
///
/// Missing paths are logged and their keys omitted, so callers get a
/// partial result instead of an error.
pub fn select_paths<'a>(
    source: &Value,
    mapping: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Map<String, Value> {
    let mut selected = Map::new();
    for (key, path) in mapping {
        match lookup(source, path) {
            Ok(value) => {
                selected.insert(key.to_string(), value.clone());
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Omitting unmapped key");
            }
        }
    }
    selected
}
