//! Runtime plumbing shared by the server and its modules: layered
//! configuration, typed settings and logging.

pub mod config;
pub mod error;
pub mod logging;
pub mod settings;
mod tree;
mod value;
mod watch;

pub use config::{ConfigOptions, ConfigProvider, OnChangeFn, CONFIG_EXTENSIONS};
pub use error::{ConfigError, Result};
pub use logging::{init_logging, set_log_level};
pub use settings::{
    load_settings, load_settings_with, settings_options, DatabaseSettings, LogFormat,
    LogSettings, ServerSettings, Settings, StaticServerSettings,
};
pub use value::ConfigValue;
