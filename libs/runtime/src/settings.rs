//! Typed application settings decoded from a [`ConfigProvider`].
//!
//! ```yaml
//! log:
//!   level: info          # trace | debug | info | warn | error | off
//!   format: text         # text | json
//!   file: ""             # empty = console only
//! server:
//!   addr: ":8080"
//!   read_timeout: 10s
//!   write_timeout: 10s
//!   idle_timeout: 0s
//! static_server:
//!   enabled: true
//!   path: /
//!   dir: ui/dist
//!   index_path: index.html
//! db:
//!   uri: ""              # empty = no database
//!   max_idle_conns: 10
//!   max_open_conns: 10
//!   conn_max_lifetime: 60s
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ConfigOptions, ConfigProvider};
use crate::error::Result;
use crate::tree;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    /// Log file path; relative paths resolve against the working directory.
    pub file: String,
    pub max_size_mb: u64,
    pub max_backups: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: String::new(),
            max_size_mb: 100,
            max_backups: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// `host:port`, or `:port` for all interfaces.
    pub addr: String,
    #[serde(with = "duration")]
    pub read_timeout: Duration,
    #[serde(with = "duration")]
    pub write_timeout: Duration,
    #[serde(with = "duration")]
    pub idle_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: ":8080".to_string(),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::ZERO,
        }
    }
}

impl ServerSettings {
    /// Socket address string suitable for binding; `:8080` becomes `0.0.0.0:8080`.
    pub fn bind_addr(&self) -> String {
        let addr = self.addr.trim();
        if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticServerSettings {
    pub enabled: bool,
    /// URL prefix the files are served under.
    pub path: String,
    /// Directory on disk holding the assets.
    pub dir: String,
    /// File served for unknown paths (single-page apps).
    pub index_path: String,
}

impl Default for StaticServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/".to_string(),
            dir: "ui/dist".to_string(),
            index_path: "index.html".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSettings {
    /// sqlx connection URL, e.g. `postgres://…` or `sqlite://app.db`.
    pub uri: String,
    pub max_idle_conns: u32,
    pub max_open_conns: u32,
    #[serde(with = "duration")]
    pub conn_max_lifetime: Duration,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            uri: String::new(),
            max_idle_conns: 10,
            max_open_conns: 10,
            conn_max_lifetime: Duration::from_secs(60),
        }
    }
}

impl DatabaseSettings {
    pub fn is_configured(&self) -> bool {
        !self.uri.trim().is_empty()
    }
}

/// Application settings. Loaded once per run and shared read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub static_server: StaticServerSettings,
    #[serde(default)]
    pub db: DatabaseSettings,
    #[serde(skip)]
    config: ConfigProvider,
}

impl Settings {
    /// Decode the well-known sections out of `config`. Each section is decoded
    /// on its own so errors name the section at fault.
    pub fn from_provider(config: ConfigProvider) -> Result<Self> {
        Ok(Self {
            log: decode_section(&config, "log")?,
            server: decode_section(&config, "server")?,
            static_server: decode_section(&config, "static_server")?,
            db: decode_section(&config, "db")?,
            config,
        })
    }

    /// The provider the settings were decoded from. Modules read their own
    /// sections from here.
    pub fn raw_config(&self) -> &ConfigProvider {
        &self.config
    }

    /// Built-in defaults as a config tree, used as the lowest layer.
    pub fn default_tree() -> Value {
        serde_json::to_value(Self::default()).unwrap_or_default()
    }
}

fn decode_section<T: DeserializeOwned + Default>(config: &ConfigProvider, section: &str) -> Result<T> {
    match config.get(section).raw() {
        None => Ok(T::default()),
        Some(value) => tree::decode(value, section),
    }
}

/// Durations written as humantime strings (`10s`, `1m30s`) or plain seconds.
mod duration {
    use std::fmt;
    use std::time::Duration;

    use humantime_serde::re::humantime;
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        humantime_serde::serialize(d, s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        d.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> de::Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a duration such as `10s` or a number of seconds")
        }

        fn visit_u64<E: de::Error>(self, secs: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(secs))
        }

        fn visit_i64<E: de::Error>(self, secs: i64) -> Result<Duration, E> {
            u64::try_from(secs)
                .map(Duration::from_secs)
                .map_err(|_| E::invalid_value(de::Unexpected::Signed(secs), &self))
        }

        fn visit_f64<E: de::Error>(self, secs: f64) -> Result<Duration, E> {
            Duration::try_from_secs_f64(secs)
                .map_err(|_| E::invalid_value(de::Unexpected::Float(secs), &self))
        }

        fn visit_str<E: de::Error>(self, text: &str) -> Result<Duration, E> {
            humantime::parse_duration(text.trim())
                .map_err(|e| E::custom(format!("invalid duration '{text}': {e}")))
        }
    }
}

/// Config options for `app_name`: `<app_name>.*` searched in `.`, `$HOME` and
/// `$HOME/.config/<app_name>`, environment prefix `env_prefix`.
pub fn settings_options(app_name: &str, env_prefix: Option<&str>) -> ConfigOptions {
    let mut search_paths: Vec<PathBuf> = Vec::new();
    if let Some(home) = dirs::home_dir() {
        search_paths.push(home.clone());
        search_paths.push(home.join(".config").join(app_name));
    }
    ConfigOptions {
        name: app_name.to_string(),
        search_paths,
        env_prefix: env_prefix.map(str::to_string),
        defaults: Settings::default_tree(),
        ..Default::default()
    }
}

pub fn load_settings(app_name: &str, env_prefix: Option<&str>) -> Result<Settings> {
    load_settings_with(settings_options(app_name, env_prefix))
}

/// Load settings from explicit options. Empty defaults are filled in with
/// [`Settings::default_tree`].
pub fn load_settings_with(mut options: ConfigOptions) -> Result<Settings> {
    if options.defaults.is_null() {
        options.defaults = Settings::default_tree();
    }
    let config = ConfigProvider::from_options(options)?;
    Settings::from_provider(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_apply_without_any_file() {
        let s = load_settings_with(ConfigOptions {
            standalone: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(s.server.addr, ":8080");
        assert_eq!(s.server.read_timeout, Duration::from_secs(10));
        assert_eq!(s.server.idle_timeout, Duration::ZERO);
        assert_eq!(s.log.level, "info");
        assert!(s.static_server.enabled);
        assert_eq!(s.static_server.dir, "ui/dist");
        assert!(!s.db.is_configured());
        assert_eq!(s.db.conn_max_lifetime, Duration::from_secs(60));
    }

    #[test]
    fn file_overrides_defaults_per_field() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("app.yaml");
        fs::write(
            &path,
            "server:\n  addr: \":9090\"\nlog:\n  level: debug\n  format: json\nhello:\n  greeting: hi\n",
        )
        .unwrap();

        let s = load_settings_with(ConfigOptions {
            file: Some(path),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(s.server.addr, ":9090");
        assert_eq!(s.server.write_timeout, Duration::from_secs(10));
        assert_eq!(s.log.level, "debug");
        assert_eq!(s.log.format, LogFormat::Json);
        assert_eq!(s.raw_config().get("hello.greeting").string(), "hi");
    }

    #[test]
    fn bad_value_names_the_key() {
        let cfg = ConfigProvider::from_value(json!({ "server": { "read_timeout": "banana" } }));
        let err = Settings::from_provider(cfg).unwrap_err();
        assert!(matches!(
            &err,
            ConfigError::Decode { section, key, .. } if section == "server" && key == "server.read_timeout"
        ));

        let cfg = ConfigProvider::from_value(json!({ "server": { "read_timeout": true } }));
        let msg = Settings::from_provider(cfg).unwrap_err().to_string();
        assert!(msg.contains("server.read_timeout"), "{msg}");
        assert!(msg.contains("a duration such as `10s`"), "{msg}");
    }

    #[test]
    fn oversized_or_negative_durations_are_decode_errors() {
        for bad in [json!(1e300), json!(-1), json!(-0.5)] {
            let cfg = ConfigProvider::from_value(json!({ "server": { "read_timeout": bad } }));
            let err = Settings::from_provider(cfg).unwrap_err();
            assert!(matches!(&err, ConfigError::Decode { key, .. } if key == "server.read_timeout"));
        }

        let cfg = ConfigProvider::from_value(json!({ "server": { "read_timeout": 1.5 } }));
        let s = Settings::from_provider(cfg).unwrap();
        assert_eq!(s.server.read_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let cfg = ConfigProvider::from_value(json!({ "server": { "adr": ":1" } }));
        let err = Settings::from_provider(cfg).unwrap_err();
        assert!(err.to_string().contains("adr"));
    }

    #[test]
    fn durations_accept_units_or_plain_seconds() {
        let cfg = ConfigProvider::from_value(json!({
            "db": { "conn_max_lifetime": "2m" },
            "server": { "read_timeout": 30 }
        }));
        let s = Settings::from_provider(cfg).unwrap();
        assert_eq!(s.db.conn_max_lifetime, Duration::from_secs(120));
        assert_eq!(s.server.read_timeout, Duration::from_secs(30));
    }

    #[test]
    fn bind_addr_normalizes_port_only_form() {
        let mut server = ServerSettings::default();
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
        server.addr = "127.0.0.1:3000".into();
        assert_eq!(server.bind_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn env_prefix_reaches_settings() {
        std::env::set_var("SETTINGSTEST_SERVER_ADDR", ":7070");
        let s = load_settings_with(ConfigOptions {
            env_prefix: Some("SETTINGSTEST".into()),
            standalone: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(s.server.addr, ":7070");
    }
}
