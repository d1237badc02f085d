//! Dotted-key helpers over a `serde_json::Value` tree.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{ConfigError, Result};

/// Join a scope prefix and a relative key with a dot, skipping empty parts.
pub(crate) fn join(prefix: &str, key: &str) -> String {
    match (prefix.is_empty(), key.is_empty()) {
        (true, _) => key.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{prefix}.{key}"),
    }
}

/// Decode the subtree found at `section`. Errors carry the dotted path of the
/// offending value, e.g. `server.read_timeout`.
pub(crate) fn decode<T: DeserializeOwned>(value: Value, section: &str) -> Result<T> {
    serde_path_to_error::deserialize(value).map_err(|e| {
        let path = e.path().to_string();
        let inner = if path == "." { "" } else { path.as_str() };
        let key = join(section, inner);
        ConfigError::Decode {
            section: if section.is_empty() {
                "<root>".to_string()
            } else {
                section.to_string()
            },
            key: if key.is_empty() { "<root>".to_string() } else { key },
            source: e.into_inner(),
        }
    })
}

/// Split `a.b.c` into segments. An empty key addresses the root.
pub(crate) fn segments(key: &str) -> Result<Vec<&str>> {
    if key.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::InvalidKey(key.to_string()));
    }
    Ok(parts)
}

pub(crate) fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    let parts = segments(key).ok()?;
    let mut cur = root;
    for p in parts {
        cur = cur.as_object()?.get(p)?;
    }
    Some(cur)
}

/// Insert `value` at `key`, replacing any non-object intermediate nodes.
pub(crate) fn insert(root: &mut Value, key: &str, value: Value) -> Result<()> {
    let parts = segments(key)?;
    let Some((last, parents)) = parts.split_last() else {
        return Err(ConfigError::InvalidKey(key.to_string()));
    };

    let mut cur = root;
    for p in parents {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        cur = cur
            .as_object_mut()
            .map(|m| m.entry(p.to_string()).or_insert(Value::Object(Map::new())))
            .ok_or_else(|| ConfigError::InvalidKey(key.to_string()))?;
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    if let Some(map) = cur.as_object_mut() {
        map.insert(last.to_string(), value);
    }
    Ok(())
}

pub(crate) fn remove(root: &mut Value, key: &str) -> Option<Value> {
    let parts = segments(key).ok()?;
    let (last, parents) = parts.split_last()?;
    let mut cur = root;
    for p in parents {
        cur = cur.as_object_mut()?.get_mut(*p)?;
    }
    cur.as_object_mut()?.remove(*last)
}

/// Deep-merge `overlay` into `base`. Objects merge key by key, anything else replaces.
pub(crate) fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (k, v) in overlay {
                match base.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base.insert(k, v);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Every non-object node with its dotted key. Arrays count as leaves.
pub(crate) fn leaves(root: &Value) -> Vec<(String, Value)> {
    fn walk(prefix: &str, v: &Value, out: &mut Vec<(String, Value)>) {
        match v {
            Value::Object(map) => {
                for (k, child) in map {
                    walk(&join(prefix, k), child, out);
                }
            }
            other if !prefix.is_empty() => out.push((prefix.to_string(), other.clone())),
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk("", root, &mut out);
    out
}

pub(crate) fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}
