use thiserror::Error;

/// Errors surfaced by [`App`](crate::App).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] runtime::ConfigError),

    #[error("failed to bind HTTP server to '{addr}': {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid server address '{addr}'")]
    InvalidAddress { addr: String },

    #[error("module '{module}' failed to initialize: {source:#}")]
    ModuleInit {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("module '{module}' failed to register routes: {source:#}")]
    RouteRegistration {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    /// Logged while closing; never returned from `run`.
    #[error("module '{module}' failed to close: {source:#}")]
    ModuleClose {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    /// Logged when the grace period elapses; never returned from `run`.
    #[error("shutdown did not complete within {grace:?}")]
    ShutdownTimeout { grace: std::time::Duration },

    #[error("command '{command}' failed: {source:#}")]
    Command {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("database error: {0}")]
    Database(#[from] modkit_db::DbError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("app has already been started")]
    AlreadyStarted,

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    #[error("HTTP server failed: {0}")]
    Server(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module '{0}' is already registered")]
    DuplicateModule(String),

    #[error("modules can no longer be registered once the app has started")]
    RegistrationClosed,

    #[error("command '{command}' is provided by both '{first}' and '{second}'")]
    DuplicateCommand {
        command: String,
        first: String,
        second: String,
    },
}
