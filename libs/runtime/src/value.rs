use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use humantime_serde::re::humantime;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ConfigStore;
use crate::error::{ConfigError, Result};
use crate::tree;

/// Lazy handle to one key of a [`ConfigProvider`](crate::ConfigProvider).
///
/// Every read looks at the current snapshot, so a handle kept around observes
/// later `set` calls and file reloads. Three flavours of accessor exist:
/// `*_or(default)` falls back on missing or mistyped values, the bare form
/// falls back to the zero value, and `try_*` reports why it could not answer.
#[derive(Clone)]
pub struct ConfigValue {
    store: Arc<ConfigStore>,
    key: String,
}

impl std::fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigValue")
            .field("key", &self.key)
            .field("value", &self.raw())
            .finish()
    }
}

impl ConfigValue {
    pub(crate) fn new(store: Arc<ConfigStore>, key: String) -> Self {
        Self { store, key }
    }

    /// Full dotted key this handle reads.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The raw merged value, `None` when the key is absent or null.
    pub fn raw(&self) -> Option<Value> {
        let snapshot = self.store.snapshot();
        match tree::lookup(&snapshot, &self.key) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.clone()),
        }
    }

    pub fn exists(&self) -> bool {
        self.raw().is_some()
    }

    fn typed<T>(&self, expected: &'static str, f: impl FnOnce(&Value) -> Option<T>) -> Result<T> {
        let raw = self.raw().ok_or_else(|| ConfigError::Missing {
            key: self.key.clone(),
        })?;
        f(&raw).ok_or_else(|| ConfigError::TypeMismatch {
            key: self.key.clone(),
            expected,
            found: tree::type_name(&raw),
        })
    }

    // bool

    pub fn try_bool(&self) -> Result<bool> {
        self.typed("a bool", |v| match v {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn bool_or(&self, default: bool) -> bool {
        self.try_bool().unwrap_or(default)
    }

    pub fn bool(&self) -> bool {
        self.bool_or(false)
    }

    // string

    /// Only string values qualify; numbers and bools are not stringified.
    pub fn try_string(&self) -> Result<String> {
        self.typed("a string", |v| v.as_str().map(str::to_string))
    }

    pub fn string_or(&self, default: &str) -> String {
        self.try_string().unwrap_or_else(|_| default.to_string())
    }

    pub fn string(&self) -> String {
        self.string_or("")
    }

    // float

    pub fn try_float(&self) -> Result<f64> {
        self.typed("a number", |v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn float_or(&self, default: f64) -> f64 {
        self.try_float().unwrap_or(default)
    }

    pub fn float(&self) -> f64 {
        self.float_or(0.0)
    }

    // int

    pub fn try_int(&self) -> Result<i64> {
        self.typed("an integer", |v| match v {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn int_or(&self, default: i64) -> i64 {
        self.try_int().unwrap_or(default)
    }

    pub fn int(&self) -> i64 {
        self.int_or(0)
    }

    // duration

    /// Strings use humantime syntax (`10s`, `1m30s`); bare numbers are seconds.
    pub fn try_duration(&self) -> Result<Duration> {
        self.typed("a duration", |v| match v {
            Value::String(s) => humantime::parse_duration(s.trim()).ok(),
            Value::Number(n) => match n.as_u64() {
                Some(secs) => Some(Duration::from_secs(secs)),
                None => n
                    .as_f64()
                    .and_then(|f| Duration::try_from_secs_f64(f).ok()),
            },
            _ => None,
        })
    }

    pub fn duration_or(&self, default: Duration) -> Duration {
        self.try_duration().unwrap_or(default)
    }

    pub fn duration(&self) -> Duration {
        self.duration_or(Duration::ZERO)
    }

    // lists and maps

    /// A list of scalars, or a comma separated string.
    pub fn try_string_list(&self) -> Result<Vec<String>> {
        self.typed("a list of strings", |v| match v {
            Value::Array(items) => items.iter().map(scalar_to_string).collect(),
            Value::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        })
    }

    pub fn string_list_or(&self, default: &[&str]) -> Vec<String> {
        self.try_string_list()
            .unwrap_or_else(|_| default.iter().map(|s| s.to_string()).collect())
    }

    pub fn string_list(&self) -> Vec<String> {
        self.string_list_or(&[])
    }

    pub fn try_string_map(&self) -> Result<HashMap<String, Value>> {
        self.typed("a map", |v| {
            v.as_object()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        })
    }

    pub fn string_map_or(&self, default: HashMap<String, Value>) -> HashMap<String, Value> {
        self.try_string_map().unwrap_or(default)
    }

    pub fn string_map(&self) -> HashMap<String, Value> {
        self.string_map_or(HashMap::new())
    }

    /// A map whose values are all scalars, rendered as strings.
    pub fn try_string_map_string(&self) -> Result<HashMap<String, String>> {
        self.typed("a map of strings", |v| {
            v.as_object()?
                .iter()
                .map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
                .collect()
        })
    }

    pub fn string_map_string_or(&self, default: HashMap<String, String>) -> HashMap<String, String> {
        self.try_string_map_string().unwrap_or(default)
    }

    pub fn string_map_string(&self) -> HashMap<String, String> {
        self.string_map_string_or(HashMap::new())
    }

    // structured

    /// Decode the value into `T`. A missing key is reported as [`ConfigError::Missing`].
    pub fn scan<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self.raw().ok_or_else(|| ConfigError::Missing {
            key: self.key.clone(),
        })?;
        tree::decode(raw, &self.key)
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::{ConfigError, ConfigProvider};
    use serde_json::json;
    use std::time::Duration;

    fn provider() -> ConfigProvider {
        ConfigProvider::from_value(json!({
            "flag": true,
            "flag_str": "false",
            "name": "svc",
            "port": 8080,
            "ratio": 0.25,
            "timeout": "1m30s",
            "timeout_secs": 45,
            "hosts": ["a", "b", 3],
            "csv": "x, y,,z",
            "labels": { "team": "core", "tier": 1 },
            "nested_map": { "inner": { "x": 1 } },
            "nothing": null
        }))
    }

    #[test]
    fn scalar_accessors() {
        let cfg = provider();
        assert!(cfg.get("flag").bool());
        assert!(!cfg.get("flag_str").bool_or(true));
        assert_eq!(cfg.get("port").int(), 8080);
        assert_eq!(cfg.get("ratio").float(), 0.25);
        assert_eq!(cfg.get("port").float(), 8080.0);
        assert_eq!(cfg.get("name").string(), "svc");
    }

    #[test]
    fn missing_and_null_use_defaults() {
        let cfg = provider();
        assert_eq!(cfg.get("nope").int_or(5), 5);
        assert_eq!(cfg.get("nothing").string_or("d"), "d");
        assert!(!cfg.get("nothing").exists());
        assert_eq!(cfg.get("nope").duration(), Duration::ZERO);
    }

    #[test]
    fn try_accessors_explain_failures() {
        let cfg = provider();
        assert!(matches!(
            cfg.get("nope").try_int(),
            Err(ConfigError::Missing { .. })
        ));
        match cfg.get("name").try_int() {
            Err(ConfigError::TypeMismatch {
                key,
                expected,
                found,
            }) => {
                assert_eq!(key, "name");
                assert_eq!(expected, "an integer");
                assert_eq!(found, "a string");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(cfg.get("port").try_string().is_err());
    }

    #[test]
    fn durations_accept_humantime_and_seconds() {
        let cfg = provider();
        assert_eq!(cfg.get("timeout").duration(), Duration::from_secs(90));
        assert_eq!(cfg.get("timeout_secs").duration(), Duration::from_secs(45));
        assert_eq!(
            cfg.get("name").duration_or(Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn out_of_range_durations_fall_back_instead_of_panicking() {
        let cfg = ConfigProvider::from_value(json!({ "huge": 1e300, "neg": -2.5, "half": 0.5 }));
        assert_eq!(cfg.get("huge").duration_or(Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(cfg.get("neg").duration_or(Duration::from_secs(1)), Duration::from_secs(1));
        assert!(matches!(
            cfg.get("huge").try_duration(),
            Err(ConfigError::TypeMismatch { .. })
        ));
        assert_eq!(cfg.get("half").duration(), Duration::from_millis(500));
    }

    #[test]
    fn lists_and_maps() {
        let cfg = provider();
        assert_eq!(cfg.get("hosts").string_list(), vec!["a", "b", "3"]);
        assert_eq!(cfg.get("csv").string_list(), vec!["x", "y", "z"]);
        assert_eq!(cfg.get("nope").string_list_or(&["d"]), vec!["d"]);

        let labels = cfg.get("labels").string_map_string();
        assert_eq!(labels.get("team").map(String::as_str), Some("core"));
        assert_eq!(labels.get("tier").map(String::as_str), Some("1"));

        assert!(cfg.get("nested_map").try_string_map_string().is_err());
        assert_eq!(cfg.get("nested_map").string_map().len(), 1);
    }

    #[test]
    fn handle_observes_later_writes() {
        let cfg = provider();
        let port = cfg.get("port");
        cfg.set("port", 9090).unwrap();
        assert_eq!(port.int(), 9090);
    }
}
