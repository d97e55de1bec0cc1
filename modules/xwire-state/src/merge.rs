//! Structural merge over the JSON value model.
//!
//! Objects merge key by key, recursively. Arrays and scalars are replaced
//! wholesale; arrays are never concatenated.

use serde_json::Value;

/// Merge `source` into `target` in place. `source` wins on every leaf.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

/// Merge each layer onto a copy of `base`, later layers winning.
///
/// Neither `base` nor any layer is modified.
pub fn merged<'a>(base: &Value, layers: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut result = base.clone();
    for layer in layers {
        deep_merge(&mut result, layer);
    }
    result
}
