//! Ingestion of caller-supplied data.
//!
//! Incoming JSON may carry `.priority` / `.value` metadata at any depth, use
//! arrays, or contain nulls and empty objects. Nodes only ever store the
//! canonical form: objects without metadata, no null members, and no empty
//! objects (an empty composite is "no data", i.e. `Null`).

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::priority::Priority;

pub const PRIORITY_KEY: &str = ".priority";
pub const VALUE_KEY: &str = ".value";

const FORBIDDEN_KEY_CHARS: [char; 6] = ['.', '#', '$', '[', ']', '/'];

fn is_meta_key(key: &str) -> bool {
    key == PRIORITY_KEY || key == VALUE_KEY
}

/// Reject keys the database would refuse and metadata of the wrong type.
pub fn validate(data: &Value) -> Result<()> {
    match data {
        Value::Object(map) => {
            for (key, child) in map {
                if key == PRIORITY_KEY {
                    Priority::from_json(child)?;
                } else if key == VALUE_KEY {
                    if child.is_object() || child.is_array() {
                        return Err(Error::Validation(format!(
                            "{VALUE_KEY} must hold a scalar, got {child}"
                        )));
                    }
                } else {
                    validate_key(key)?;
                    validate(child)?;
                }
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(validate),
        _ => Ok(()),
    }
}

pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation("keys must be non-empty".into()));
    }
    if key.chars().any(|c| FORBIDDEN_KEY_CHARS.contains(&c) || c.is_control()) {
        return Err(Error::Validation(format!(
            "key {key:?} contains one of . # $ [ ] / or a control character"
        )));
    }
    Ok(())
}

/// Convert arrays to index-keyed objects and drop null members and empty
/// objects, keeping metadata in place.
pub fn prepare(raw: Value) -> Value {
    match raw {
        Value::Array(items) => {
            let map = items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect::<Map<_, _>>();
            prepare(Value::Object(map))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                if is_meta_key(&key) {
                    if !child.is_null() {
                        out.insert(key, child);
                    }
                    continue;
                }
                let child = prepare(child);
                if !child.is_null() {
                    out.insert(key, child);
                }
            }
            let has_data = out.keys().any(|k| !is_meta_key(k)) || out.contains_key(VALUE_KEY);
            if has_data {
                Value::Object(out)
            } else {
                Value::Null
            }
        }
        other => other,
    }
}

/// Strip all metadata from prepared data.
pub fn canonical(prepared: &Value) -> Value {
    match prepared {
        Value::Object(map) => {
            if let Some(inner) = map.get(VALUE_KEY) {
                return canonical(inner);
            }
            let out = map
                .iter()
                .filter(|(k, _)| !is_meta_key(k))
                .map(|(k, v)| (k.clone(), canonical(v)))
                .filter(|(_, v)| !v.is_null())
                .collect::<Map<_, _>>();
            if out.is_empty() {
                Value::Null
            } else {
                Value::Object(out)
            }
        }
        other => other.clone(),
    }
}

/// Take the top-level priority off prepared data and unwrap `.value`.
///
/// The returned body keeps nested metadata so children can pick up their
/// own priorities.
pub fn split_priority(prepared: Value) -> (Option<Priority>, Value) {
    match prepared {
        Value::Object(mut map) => {
            let priority = map
                .remove(PRIORITY_KEY)
                .and_then(|p| Priority::from_json(&p).ok());
            let body = match map.remove(VALUE_KEY) {
                Some(inner) => inner,
                None if map.is_empty() => Value::Null,
                None => Value::Object(map),
            };
            (priority, body)
        }
        other => (None, other),
    }
}

/// Data keys of a composite in sorted order; empty for scalars.
pub fn keys(value: &Value) -> Vec<String> {
    let mut keys = match value {
        Value::Object(map) => map
            .keys()
            .filter(|k| !is_meta_key(k))
            .cloned()
            .collect::<Vec<_>>(),
        _ => Vec::new(),
    };
    keys.sort();
    keys
}

pub fn child_of(body: &Value, key: &str) -> Value {
    body.get(key).cloned().unwrap_or(Value::Null)
}

/// Validate the argument of `update`: it must be an object whose keys are
/// slash-separated paths of valid keys.
pub fn validate_update(changes: &Value) -> Result<&Map<String, Value>> {
    let Value::Object(map) = changes else {
        return Err(Error::Validation("update() requires an object".into()));
    };
    for (path, child) in map {
        for segment in path.split('/') {
            validate_key(segment)?;
        }
        validate(child)?;
    }
    Ok(map)
}

/// Merge path-keyed partial changes into `current`.
///
/// `"a/b": 1` sets `current.a.b`, creating intermediate objects (and
/// replacing scalars in the way). A null leaf deletes the entry.
pub fn merge_update(current: &Value, changes: &Map<String, Value>) -> Value {
    let mut merged = match current {
        Value::Object(_) => current.clone(),
        _ => Value::Object(Map::new()),
    };
    for (path, change) in changes {
        let segments = path.split('/').collect::<Vec<_>>();
        set_at(&mut merged, &segments, change.clone());
    }
    merged
}

fn set_at(target: &mut Value, segments: &[&str], change: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = change;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(map) = target else {
        return;
    };
    if rest.is_empty() {
        if change.is_null() {
            map.remove(*head);
        } else {
            map.insert((*head).to_string(), change);
        }
        return;
    }
    let slot = map.entry((*head).to_string()).or_insert(Value::Null);
    set_at(slot, rest, change);
}
