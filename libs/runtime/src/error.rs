use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while loading, decoding, mutating or persisting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<figment::Error>,
    },
    #[error("failed to merge environment overrides: {0}")]
    Env(#[source] Box<figment::Error>),
    #[error("invalid config key `{key}` in `{section}` section: {source}")]
    Decode {
        section: String,
        /// Full dotted path of the value that failed to decode.
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("config key `{key}` is not set")]
    Missing { key: String },
    #[error("config key `{key}` holds {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid config key `{0}`")]
    InvalidKey(String),
    #[error("no config file is associated with this provider")]
    NoConfigFile,
    #[error("failed to serialize config value for `{key}`: {message}")]
    Serialize { key: String, message: String },
    #[error("failed to write config file '{}'", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;
