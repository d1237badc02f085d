//! Layered configuration store.
//!
//! Layers, lowest precedence first:
//! 1. compiled-in defaults (`ConfigOptions::defaults`)
//! 2. the config file (`<name>.yaml|yml|toml|json`, first hit in the search paths)
//! 3. nested environment variables, `<PREFIX>__SERVER__ADDR` → `server.addr`
//! 4. flat environment variables for keys that already exist, `<PREFIX>_SERVER_ADDR`
//! 5. runtime overrides written with [`ConfigProvider::set`]
//!
//! Readers get a lock-free snapshot; writers (set / unset / reload) are serialized.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigError, Result};
use crate::tree;
use crate::value::ConfigValue;
use crate::watch::ConfigWatcher;

/// File extensions probed during discovery, in order.
pub const CONFIG_EXTENSIONS: &[&str] = &["yaml", "yml", "toml", "json"];

/// Callback invoked after the backing file changed and was reloaded. It gets
/// the view it was registered on.
pub type OnChangeFn = Arc<dyn Fn(&ConfigProvider) + Send + Sync + 'static>;

/// Where and how to load configuration from.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// Base name of the config file, without extension.
    pub name: String,
    /// Explicit config file. When set, discovery is skipped and the file must exist.
    pub file: Option<PathBuf>,
    /// Extra directories probed after the working directory.
    pub search_paths: Vec<PathBuf>,
    /// Environment variable prefix, e.g. `WEBAPP`.
    pub env_prefix: Option<String>,
    /// Compiled-in defaults (a JSON object).
    pub defaults: Value,
    /// Do not look for a config file at all.
    pub standalone: bool,
}

struct Layers {
    file: Value,
    overrides: Value,
}

pub(crate) struct ConfigStore {
    options: ConfigOptions,
    file: Option<PathBuf>,
    layers: Mutex<Layers>,
    merged: ArcSwap<Value>,
    callbacks: RwLock<Vec<(String, OnChangeFn)>>,
    watcher: Mutex<Option<ConfigWatcher>>,
}

impl ConfigStore {
    pub(crate) fn snapshot(&self) -> Arc<Value> {
        self.merged.load_full()
    }

    pub(crate) fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Re-read the file layer and recompute the merged tree.
    pub(crate) fn reload(&self) -> Result<()> {
        let file = match &self.file {
            Some(path) => read_file(path)?,
            None => empty(),
        };
        let mut layers = self.layers.lock();
        let merged = compose(&self.options, &file, &layers.overrides)?;
        layers.file = file;
        self.merged.store(Arc::new(merged));
        Ok(())
    }

    pub(crate) fn notify_changed(self: &Arc<Self>) {
        let callbacks: Vec<(String, OnChangeFn)> = self.callbacks.read().clone();
        for (scope, cb) in callbacks {
            cb(&ConfigProvider {
                store: self.clone(),
                scope,
            });
        }
    }
}

/// Handle to a (possibly scoped) view of a shared configuration store.
///
/// Cloning is cheap. A provider returned by [`sub`](Self::sub) is a view onto
/// the same store: values set through it land under the parent's namespace.
#[derive(Clone)]
pub struct ConfigProvider {
    store: Arc<ConfigStore>,
    scope: String,
}

impl fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigProvider")
            .field("scope", &self.scope)
            .field("file", &self.store.file)
            .finish()
    }
}

impl Default for ConfigProvider {
    fn default() -> Self {
        Self::empty()
    }
}

impl ConfigProvider {
    /// Load `<name>.*` from the working directory or any of `search_paths`.
    pub fn load(name: &str, search_paths: &[PathBuf]) -> Result<Self> {
        Self::from_options(ConfigOptions {
            name: name.to_string(),
            search_paths: search_paths.to_vec(),
            ..Default::default()
        })
    }

    pub fn from_options(options: ConfigOptions) -> Result<Self> {
        let file = if options.standalone {
            None
        } else {
            discover(&options)?
        };

        let file_layer = match &file {
            Some(path) => read_file(path)?,
            None => empty(),
        };
        let merged = compose(&options, &file_layer, &empty())?;

        match &file {
            Some(path) => tracing::debug!(file = %path.display(), "configuration loaded"),
            None => tracing::debug!(name = %options.name, "no config file found; using defaults"),
        }

        Ok(Self {
            store: Arc::new(ConfigStore {
                options,
                file,
                layers: Mutex::new(Layers {
                    file: file_layer,
                    overrides: empty(),
                }),
                merged: ArcSwap::from_pointee(merged),
                callbacks: RwLock::new(Vec::new()),
                watcher: Mutex::new(None),
            }),
            scope: String::new(),
        })
    }

    /// Standalone in-memory provider seeded with `defaults`.
    pub fn from_value(defaults: Value) -> Self {
        let options = ConfigOptions {
            defaults,
            standalone: true,
            ..Default::default()
        };
        let merged = match options.defaults {
            Value::Object(_) => options.defaults.clone(),
            _ => empty(),
        };
        Self {
            store: Arc::new(ConfigStore {
                options,
                file: None,
                layers: Mutex::new(Layers {
                    file: empty(),
                    overrides: empty(),
                }),
                merged: ArcSwap::from_pointee(merged),
                callbacks: RwLock::new(Vec::new()),
                watcher: Mutex::new(None),
            }),
            scope: String::new(),
        }
    }

    /// Provider with no values at all; every read yields the caller's default.
    pub fn empty() -> Self {
        Self::from_value(empty())
    }

    /// Dotted path this view is rooted at (empty for the root view).
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The config file backing the store, if one was found.
    pub fn config_file(&self) -> Option<&Path> {
        self.store.file()
    }

    /// Lazy accessor; the value is resolved when read, not now.
    pub fn get(&self, key: &str) -> ConfigValue {
        ConfigValue::new(self.store.clone(), tree::join(&self.scope, key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).exists()
    }

    /// Scoped view rooted at `key`. Never fails: a missing section simply reads
    /// as empty.
    pub fn sub(&self, key: &str) -> ConfigProvider {
        ConfigProvider {
            store: self.store.clone(),
            scope: tree::join(&self.scope, key),
        }
    }

    /// Override `key` at runtime. Overrides win over every other layer and
    /// survive file reloads. An object value is merged over the lower layers
    /// key by key, like any other layer.
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let full = tree::join(&self.scope, key);
        let value = serde_json::to_value(value).map_err(|e| ConfigError::Serialize {
            key: full.clone(),
            message: e.to_string(),
        })?;

        let mut layers = self.store.layers.lock();
        tree::insert(&mut layers.overrides, &full, value)?;
        let merged = compose(&self.store.options, &layers.file, &layers.overrides)?;
        self.store.merged.store(Arc::new(merged));
        Ok(())
    }

    /// Drop a runtime override, exposing the lower layers again.
    pub fn unset(&self, key: &str) -> Result<()> {
        let full = tree::join(&self.scope, key);
        tree::segments(&full)?;
        let mut layers = self.store.layers.lock();
        if tree::remove(&mut layers.overrides, &full).is_some() {
            let merged = compose(&self.store.options, &layers.file, &layers.overrides)?;
            self.store.merged.store(Arc::new(merged));
        }
        Ok(())
    }

    /// Decode the whole view into `T`.
    pub fn scan<T: DeserializeOwned>(&self) -> Result<T> {
        tree::decode(self.snapshot(), &self.scope)
    }

    /// Current merged values under this view (an empty map when absent).
    pub fn snapshot(&self) -> Value {
        let root = self.store.snapshot();
        tree::lookup(&root, &self.scope)
            .cloned()
            .unwrap_or_else(empty)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.snapshot()).map_err(|e| ConfigError::Serialize {
            key: self.scope.clone(),
            message: e.to_string(),
        })
    }

    /// Re-read the backing file.
    pub fn reload(&self) -> Result<()> {
        self.store.reload()
    }

    /// Persist the file layer plus runtime overrides back to the config file.
    /// Defaults and environment values are not written.
    pub fn write(&self) -> Result<()> {
        let path = self
            .store
            .file()
            .ok_or(ConfigError::NoConfigFile)?
            .to_path_buf();

        let mut layers = self.store.layers.lock();
        let mut content = layers.file.clone();
        tree::merge(&mut content, layers.overrides.clone());

        let rendered = render(&path, &content)?;
        std::fs::write(&path, rendered).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })?;
        layers.file = content;
        tracing::info!(file = %path.display(), "configuration written");
        Ok(())
    }

    /// Register a callback fired after the backing file changes and has been
    /// reloaded. One watcher serves all callbacks of a store; callbacks run on
    /// the watcher's dispatch thread, so long work should be handed off.
    ///
    /// The callback receives this view, so it need not capture a provider
    /// (which would keep the store alive forever).
    ///
    /// Without a config file the callback is kept but never fires.
    pub fn on_change<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&ConfigProvider) + Send + Sync + 'static,
    {
        self.store
            .callbacks
            .write()
            .push((self.scope.clone(), Arc::new(callback)));

        let Some(path) = self.store.file() else {
            tracing::debug!("on_change registered without a config file; nothing to watch");
            return Ok(());
        };

        let mut watcher = self.store.watcher.lock();
        if watcher.is_none() {
            let weak: Weak<ConfigStore> = Arc::downgrade(&self.store);
            *watcher = Some(ConfigWatcher::spawn(weak, path)?);
        }
        Ok(())
    }
}

fn empty() -> Value {
    Value::Object(Map::new())
}

fn discover(options: &ConfigOptions) -> Result<Option<PathBuf>> {
    if let Some(path) = &options.file {
        if !path.is_file() {
            return Err(ConfigError::Read {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
            });
        }
        return Ok(Some(path.clone()));
    }
    if options.name.is_empty() {
        return Ok(None);
    }

    let dirs = std::iter::once(PathBuf::from(".")).chain(options.search_paths.iter().cloned());
    for dir in dirs {
        for ext in CONFIG_EXTENSIONS {
            let candidate = dir.join(format!("{}.{}", options.name, ext));
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }
    }
    Ok(None)
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

pub(crate) fn read_file(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(empty());
    }

    let figment = match extension(path).as_str() {
        "toml" => Figment::from(Toml::string(&raw)),
        "json" => Figment::from(Json::string(&raw)),
        _ => Figment::from(Yaml::string(&raw)),
    };
    figment
        .extract::<Value>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
}

fn render(path: &Path, content: &Value) -> Result<String> {
    let key = path.display().to_string();
    match extension(path).as_str() {
        "toml" => toml::to_string_pretty(content).map_err(|e| ConfigError::Serialize {
            key,
            message: e.to_string(),
        }),
        "json" => serde_json::to_string_pretty(content).map_err(|e| ConfigError::Serialize {
            key,
            message: e.to_string(),
        }),
        _ => serde_yaml::to_string(content).map_err(|e| ConfigError::Serialize {
            key,
            message: e.to_string(),
        }),
    }
}

fn compose(options: &ConfigOptions, file: &Value, overrides: &Value) -> Result<Value> {
    let mut merged = match &options.defaults {
        Value::Object(_) => options.defaults.clone(),
        _ => empty(),
    };
    tree::merge(&mut merged, file.clone());

    if let Some(prefix) = options.env_prefix.as_deref().filter(|p| !p.is_empty()) {
        let prefix = prefix.to_ascii_uppercase();
        // Example: WEBAPP__SERVER__ADDR=:9090 maps to server.addr
        let nested: Value = Figment::from(Env::prefixed(&format!("{prefix}__")).split("__"))
            .extract()
            .map_err(|e| ConfigError::Env(Box::new(e)))?;
        tree::merge(&mut merged, nested);
        apply_flat_env(&mut merged, &prefix);
    }

    tree::merge(&mut merged, overrides.clone());
    Ok(merged)
}

/// `<PREFIX>_A_B_C` overrides the existing key `a.b_c`, keeping its type.
fn apply_flat_env(merged: &mut Value, prefix: &str) {
    for (key, current) in tree::leaves(merged) {
        let var = format!("{}_{}", prefix, key.replace('.', "_").to_ascii_uppercase());
        if let Ok(raw) = std::env::var(&var) {
            let value = coerce_env(&raw, &current);
            if let Err(e) = tree::insert(merged, &key, value) {
                tracing::warn!(%var, error = %e, "ignoring environment override");
            }
        }
    }
}

fn coerce_env(raw: &str, current: &Value) -> Value {
    let trimmed = raw.trim();
    match current {
        Value::Bool(_) => trimmed
            .parse::<bool>()
            .map(Value::Bool)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Value::Number(n) if n.is_f64() => trimmed
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        Value::Number(_) => trimmed
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Value::Array(_) => Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn set_then_get_round_trips() {
        let cfg = ConfigProvider::empty();
        cfg.set("server.addr", ":9000").unwrap();
        cfg.set("static_server.enabled", false).unwrap();
        cfg.set("ratio", 0.5).unwrap();

        assert_eq!(cfg.get("server.addr").string(), ":9000");
        assert!(!cfg.get("static_server.enabled").bool_or(true));
        assert_eq!(cfg.get("ratio").float(), 0.5);
    }

    #[test]
    fn string_falls_back_to_default_for_missing_or_non_string() {
        let cfg = ConfigProvider::from_value(json!({ "port": 8080, "name": "svc" }));
        assert_eq!(cfg.get("missing").string_or("dflt"), "dflt");
        assert_eq!(cfg.get("port").string_or("dflt"), "dflt");
        assert_eq!(cfg.get("name").string_or("dflt"), "svc");
    }

    #[test]
    fn sub_is_a_view_onto_the_same_store() {
        let root = ConfigProvider::from_value(json!({ "hello": { "greeting": "hi" } }));
        let sub = root.sub("hello");
        assert_eq!(sub.get("greeting").string(), "hi");

        sub.set("greeting", "hey").unwrap();
        assert_eq!(root.get("hello.greeting").string(), "hey");

        root.set("hello.count", 3).unwrap();
        assert_eq!(sub.get("count").int(), 3);
    }

    #[test]
    fn sub_on_missing_path_reads_defaults() {
        let root = ConfigProvider::from_value(json!({ "a": 1 }));
        let sub = root.sub("does.not.exist");
        assert_eq!(sub.get("anything").string_or("d"), "d");
        assert!(!sub.get("flag").bool());
        assert_eq!(sub.snapshot(), json!({}));
        let nested = sub.sub("deeper");
        assert_eq!(nested.get("x").int_or(7), 7);
    }

    #[test]
    fn set_object_merges_with_lower_layers_like_any_reload() {
        let cfg = ConfigProvider::from_value(json!({
            "server": { "addr": ":8080", "read_timeout": "10s" }
        }));
        cfg.set("server", json!({ "addr": ":1" })).unwrap();
        assert_eq!(cfg.get("server.addr").string(), ":1");
        assert_eq!(cfg.get("server.read_timeout").string(), "10s");

        cfg.set("other", 1).unwrap();
        cfg.unset("other").unwrap();
        assert_eq!(cfg.get("server.addr").string(), ":1");
        assert_eq!(cfg.get("server.read_timeout").string(), "10s");
    }

    #[test]
    fn unset_restores_lower_layer() {
        let cfg = ConfigProvider::from_value(json!({ "log": { "level": "info" } }));
        cfg.set("log.level", "debug").unwrap();
        assert_eq!(cfg.get("log.level").string(), "debug");
        cfg.unset("log.level").unwrap();
        assert_eq!(cfg.get("log.level").string(), "info");
    }

    #[test]
    fn discovers_file_in_search_paths_and_file_beats_defaults() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join("discover-test.yaml"),
            "server:\n  addr: \":9191\"\nextra:\n  key: v\n",
        )
        .unwrap();

        let cfg = ConfigProvider::from_options(ConfigOptions {
            name: "discover-test".into(),
            search_paths: vec![tmp.path().to_path_buf()],
            defaults: json!({ "server": { "addr": ":8080", "read_timeout": "10s" } }),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(cfg.get("server.addr").string(), ":9191");
        assert_eq!(cfg.get("server.read_timeout").string(), "10s");
        assert_eq!(cfg.get("extra.key").string(), "v");
        assert!(cfg.config_file().is_some());
    }

    #[test]
    fn toml_and_json_files_are_supported() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("a.toml"), "[server]\naddr = \":7000\"\n").unwrap();
        fs::write(tmp.path().join("b.json"), r#"{"server":{"addr":":7001"}}"#).unwrap();

        let a = ConfigProvider::load("a", &[tmp.path().to_path_buf()]).unwrap();
        let b = ConfigProvider::load("b", &[tmp.path().to_path_buf()]).unwrap();
        assert_eq!(a.get("server.addr").string(), ":7000");
        assert_eq!(b.get("server.addr").string(), ":7001");
    }

    #[test]
    fn missing_file_is_fine_but_missing_explicit_file_is_not() {
        let tmp = tempdir().unwrap();
        let cfg = ConfigProvider::load("nothing-here", &[tmp.path().to_path_buf()]).unwrap();
        assert!(cfg.config_file().is_none());

        let err = ConfigProvider::from_options(ConfigOptions {
            file: Some(tmp.path().join("absent.yaml")),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("absent.yaml"));
    }

    #[test]
    fn malformed_file_is_a_parse_error_naming_the_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("broken.yaml");
        fs::write(&path, "server: [unclosed").unwrap();

        let err = ConfigProvider::from_options(ConfigOptions {
            file: Some(path),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn flat_env_overrides_known_keys_with_type_coercion() {
        std::env::set_var("CFGFLAT_SERVER_READ_TIMEOUT", "30s");
        std::env::set_var("CFGFLAT_STATIC_SERVER_ENABLED", "false");
        std::env::set_var("CFGFLAT_DB_MAX_OPEN_CONNS", "42");
        std::env::set_var("CFGFLAT_NOT_A_KEY", "ignored");

        let cfg = ConfigProvider::from_options(ConfigOptions {
            env_prefix: Some("CFGFLAT".into()),
            standalone: true,
            defaults: json!({
                "server": { "read_timeout": "10s" },
                "static_server": { "enabled": true },
                "db": { "max_open_conns": 10 }
            }),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(cfg.get("server.read_timeout").string(), "30s");
        assert_eq!(cfg.get("static_server.enabled").try_bool().unwrap(), false);
        assert_eq!(cfg.get("db.max_open_conns").try_int().unwrap(), 42);
        assert!(!cfg.contains("not_a_key"));
    }

    #[test]
    fn nested_env_overrides_file() {
        std::env::set_var("CFGNESTED__SERVER__ADDR", ":6060");
        let cfg = ConfigProvider::from_options(ConfigOptions {
            env_prefix: Some("CFGNESTED".into()),
            standalone: true,
            defaults: json!({ "server": { "addr": ":8080" } }),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.get("server.addr").string(), ":6060");
    }

    #[test]
    fn write_persists_file_layer_and_overrides_only() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("persist.yaml");
        fs::write(&path, "app:\n  title: old\n").unwrap();

        let cfg = ConfigProvider::from_options(ConfigOptions {
            file: Some(path.clone()),
            defaults: json!({ "server": { "addr": ":8080" } }),
            ..Default::default()
        })
        .unwrap();
        cfg.set("app.title", "new").unwrap();
        cfg.write().unwrap();

        let written: serde_yaml::Value =
            serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["app"]["title"], serde_yaml::Value::from("new"));
        assert!(written.get("server").is_none());
    }

    #[test]
    fn write_without_file_fails() {
        let cfg = ConfigProvider::empty();
        assert!(matches!(cfg.write(), Err(ConfigError::NoConfigFile)));
    }

    #[test]
    fn reload_picks_up_file_changes_and_keeps_overrides() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("reload.yaml");
        fs::write(&path, "a: 1\nb: 1\n").unwrap();

        let cfg = ConfigProvider::from_options(ConfigOptions {
            file: Some(path.clone()),
            ..Default::default()
        })
        .unwrap();
        cfg.set("b", 100).unwrap();

        fs::write(&path, "a: 2\nb: 2\n").unwrap();
        cfg.reload().unwrap();
        assert_eq!(cfg.get("a").int(), 2);
        assert_eq!(cfg.get("b").int(), 100);
    }

    #[test]
    fn scan_decodes_scoped_view() {
        #[derive(serde::Deserialize, Debug, PartialEq, Default)]
        #[serde(default)]
        struct Greeting {
            text: String,
            times: u32,
        }

        let cfg = ConfigProvider::from_value(json!({ "hello": { "text": "hi", "times": 2 } }));
        let g: Greeting = cfg.sub("hello").scan().unwrap();
        assert_eq!(
            g,
            Greeting {
                text: "hi".into(),
                times: 2
            }
        );

        let missing: Greeting = cfg.sub("nope").scan().unwrap();
        assert_eq!(missing, Greeting::default());
    }

    #[test]
    fn coerce_env_keeps_string_when_parse_fails() {
        assert_eq!(coerce_env("yes", &json!(true)), json!("yes"));
        assert_eq!(coerce_env("12", &json!(1)), json!(12));
        assert_eq!(coerce_env("1.5", &json!(0.5)), json!(1.5));
        assert_eq!(coerce_env("a, b", &json!([])), json!(["a", "b"]));
    }
}
