//! Deep merge of plugin-default configuration into explicit configuration.

use serde_json::Value;

use sluice_types::{value_kind, Result, SluiceError};

/// Merges `source` into `dest`, key by key. `source` is left untouched.
///
/// - key absent in `dest` → copied from `source`
/// - both maps → merged recursively
/// - both lists → `source` items appended to `dest`
/// - both scalars of one kind → `dest` wins
/// - anything else → [`SluiceError::MergeConflict`] naming the key
///
/// Call it with defaults as `source` and explicit configuration as
/// `dest`, so explicit settings always win.
pub fn merge_into(
    source: &serde_json::Map<String, Value>,
    dest: &mut serde_json::Map<String, Value>,
) -> Result<()> {
    for (key, value) in source {
        match dest.get_mut(key) {
            None => {
                dest.insert(key.clone(), value.clone());
            }
            Some(existing) => match (value, existing) {
                (Value::Object(src), Value::Object(dst)) => merge_into(src, dst)?,
                (Value::Array(src), Value::Array(dst)) => dst.extend(src.iter().cloned()),
                (src, dst) if scalar_kinds_match(src, dst) => {}
                (src, dst) => {
                    return Err(SluiceError::MergeConflict {
                        key: key.clone(),
                        source_kind: value_kind(src).to_string(),
                        dest_kind: value_kind(dst).to_string(),
                    })
                }
            },
        }
    }
    Ok(())
}

fn scalar_kinds_match(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Null, Value::Null)
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
    )
}

/// Resolves the `settings.<keyword>` section of a configuration against
/// a plugin's defaults: the explicit section is cloned and `defaults` is
/// merged into it, so user settings override defaults.
pub fn settings_for(
    settings: &serde_json::Map<String, Value>,
    keyword: &str,
    defaults: Value,
) -> Result<Value> {
    let mut resolved = match settings.get(keyword) {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(SluiceError::Config(format!(
                "settings.{keyword} must be a map, got {}",
                value_kind(other)
            )))
        }
        None => serde_json::Map::new(),
    };
    match defaults {
        Value::Object(def) => merge_into(&def, &mut resolved)?,
        Value::Null => {}
        other => {
            return Err(SluiceError::Config(format!(
                "defaults for '{keyword}' must be a map, got {}",
                value_kind(&other)
            )))
        }
    }
    Ok(Value::Object(resolved))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
