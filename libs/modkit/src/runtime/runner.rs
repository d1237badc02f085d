//! The App: owns the module registry and drives one run of the lifecycle.
//!
//! ```text
//! Created → Configuring → Initializing → Serving → Closing → Terminated
//! ```
//!
//! Design notes:
//! - Settings are loaded once per run and shared read-only through `ModuleCtx`.
//! - Modules are constructed and initialized one by one in registration order.
//!   Every module that was constructed is closed exactly once, even when a
//!   later step fails.
//! - The only suspension point while serving is [`SignalNotifier::wait`];
//!   cancelling the token passed to `run` has the same effect as a signal.
//! - One deadline (`grace_period` from the start of `Closing`) bounds module
//!   closes and the HTTP drain together.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use modkit_db::{DbHandle, PoolConfig};
use runtime::{ConfigOptions, ConfigProvider, Settings};
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::{ModuleCtx, ModuleCtxBuilder};
use crate::contracts::Module;
use crate::error::{AppError, RegistryError};
use crate::http::{self, Middleware, StaticSource};
use crate::lifecycle::{AppState, StateCell};
use crate::registry::{build_command_tree, ModuleEntry, ModuleRegistry, ModuleSet};
use crate::runtime::shutdown::{Signal, SignalNotifier};

/// Default time allowed for modules to close and in-flight requests to drain.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(120);

/// Name of the built-in sub-command that serves HTTP.
const START_COMMAND: &str = "start";

/// What to do when a module's `init` fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitPolicy {
    /// Stop at the first failure, close what was built and return the error.
    #[default]
    FailFast,
    /// Log the failure and keep going.
    BestEffort,
}

/// Options for running an [`App`].
#[derive(Clone)]
pub struct AppOptions {
    /// Application name; also the config file base name.
    pub name: String,
    /// Environment variable prefix. Defaults to the upper-cased name.
    pub env_prefix: Option<String>,
    /// Explicit config file; skips discovery.
    pub config_file: Option<PathBuf>,
    /// Directories searched for `<name>.*`. `None` means `.`, `$HOME` and
    /// `$HOME/.config/<name>`.
    pub search_paths: Option<Vec<PathBuf>>,
    /// Pre-built provider used instead of loading one.
    pub config: Option<ConfigProvider>,
    /// Values set on top of every other config layer, e.g. from CLI flags.
    pub overrides: Vec<(String, serde_json::Value)>,
    pub grace_period: Duration,
    pub init_policy: InitPolicy,
    /// Install SIGINT/SIGTERM listeners. When off, only the cancellation token
    /// (or [`SignalNotifier::deliver`]) stops the app.
    pub listen_signals: bool,
    /// Prefix module routes are mounted under.
    pub api_root: String,
    /// Applied around the whole router, first entry outermost.
    pub middlewares: Vec<Middleware>,
    /// Static assets from `static_server.dir` or compiled into the binary.
    pub static_source: StaticSource,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            name: "webapp".to_string(),
            env_prefix: None,
            config_file: None,
            search_paths: None,
            config: None,
            overrides: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
            init_policy: InitPolicy::default(),
            listen_signals: true,
            api_root: "/api".to_string(),
            middlewares: Vec::new(),
            static_source: StaticSource::Disk,
        }
    }
}

impl std::fmt::Debug for AppOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppOptions")
            .field("name", &self.name)
            .field("env_prefix", &self.env_prefix)
            .field("config_file", &self.config_file)
            .field("search_paths", &self.search_paths)
            .field("has_config", &self.config.is_some())
            .field("overrides", &self.overrides)
            .field("grace_period", &self.grace_period)
            .field("init_policy", &self.init_policy)
            .field("listen_signals", &self.listen_signals)
            .field("api_root", &self.api_root)
            .field("middlewares", &self.middlewares.len())
            .field("static_source", &self.static_source)
            .finish()
    }
}

impl AppOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn env_prefix(&self) -> String {
        self.env_prefix.clone().unwrap_or_else(|| {
            self.name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect()
        })
    }

    fn config_options(&self) -> ConfigOptions {
        let prefix = self.env_prefix();
        let mut options = runtime::settings_options(&self.name, Some(&prefix));
        if let Some(file) = &self.config_file {
            options.file = Some(file.clone());
        }
        if let Some(paths) = &self.search_paths {
            options.search_paths = paths.clone();
        }
        options
    }
}

/// Everything built during Configuring/Initializing that must be torn down.
struct Running {
    settings: Arc<Settings>,
    db: Option<DbHandle>,
    modules: ModuleSet,
    base_ctx: ModuleCtx,
    module_token: CancellationToken,
}

struct ServerHandle {
    token: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

enum InitOutcome {
    Ready,
    Cancelled,
    Failed(AppError),
}

enum Wake {
    Stop(Option<Signal>),
    ServerExited(Result<std::io::Result<()>, JoinError>),
}

pub struct App {
    options: AppOptions,
    registry: ModuleRegistry,
    state: StateCell,
    local_addr: OnceLock<SocketAddr>,
    notifier: OnceLock<Arc<SignalNotifier>>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.options.name)
            .field("state", &self.state.load())
            .field("registry", &self.registry)
            .field("local_addr", &self.local_addr.get())
            .finish()
    }
}

impl App {
    pub fn new(options: AppOptions) -> Self {
        Self {
            options,
            registry: ModuleRegistry::default(),
            state: StateCell::new(),
            local_addr: OnceLock::new(),
            notifier: OnceLock::new(),
        }
    }

    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    /// Add a module factory. Factories run in registration order when the app
    /// starts; registering after that fails with `RegistrationClosed`.
    pub fn register<F>(&self, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&Settings) -> ModuleEntry + Send + Sync + 'static,
    {
        self.registry.register(Box::new(factory))
    }

    pub fn state(&self) -> AppState {
        self.state.load()
    }

    /// Address the HTTP server is bound to, once it is serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// The notifier of the current run, available once `run` has started.
    pub fn signal_notifier(&self) -> Option<Arc<SignalNotifier>> {
        self.notifier.get().cloned()
    }

    /// Build the merged configuration exactly as `run` would, overrides included.
    pub fn load_config(&self) -> Result<ConfigProvider, AppError> {
        let config = match &self.options.config {
            Some(config) => config.clone(),
            None => ConfigProvider::from_options(self.options.config_options())?,
        };
        for (key, value) in &self.options.overrides {
            config.set(key, value.clone())?;
        }
        Ok(config)
    }

    /// Full cycle: configure → init → serve → wait for a signal or `cancel` → close.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AppError> {
        let notifier = self.begin()?;
        let Some(running) = self.prepare(&cancel).await? else {
            return Ok(());
        };

        let (result, server) = self.serve_until_stopped(&running, &notifier, &cancel).await;
        self.close(running, server).await;
        result
    }

    /// Command-tree mode. `args` includes the program name, as for
    /// `std::env::args_os()`.
    ///
    /// Modules are initialized first, then either the built-in `start` command
    /// (also the default) serves HTTP until stopped, or a module command runs
    /// to completion. Modules are closed afterwards in both cases.
    pub async fn run_cli<I, T>(&self, args: I, cancel: CancellationToken) -> Result<(), AppError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let notifier = self.begin()?;
        let Some(running) = self.prepare(&cancel).await? else {
            return Ok(());
        };

        let root = clap::Command::new(self.options.name.clone())
            .about("Application server")
            .subcommand(clap::Command::new(START_COMMAND).about("Start the HTTP server"));
        let (tree, owners) =
            match build_command_tree(root, running.modules.entries(), &[START_COMMAND]) {
                Ok(built) => built,
                Err(e) => {
                    self.close(running, None).await;
                    return Err(e.into());
                }
            };

        let matches = match tree.try_get_matches_from(args) {
            Ok(matches) => matches,
            Err(e) => {
                use clap::error::ErrorKind;
                self.close(running, None).await;
                return match e.kind() {
                    ErrorKind::DisplayHelp
                    | ErrorKind::DisplayVersion
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                        let _ = e.print();
                        Ok(())
                    }
                    _ => Err(AppError::Cli(e)),
                };
            }
        };

        let (result, server) = match matches.subcommand() {
            None | Some((START_COMMAND, _)) => {
                self.serve_until_stopped(&running, &notifier, &cancel).await
            }
            Some((name, sub)) => {
                let result = match owners.get(name).map(|&idx| &running.modules.entries()[idx]) {
                    Some(entry) => {
                        let ctx = running.base_ctx.clone().for_module(&entry.name);
                        tracing::info!(module = %entry.name, command = name, "executing command");
                        match &entry.cli {
                            Some(cli) => cli.execute(&ctx, name, sub).await.map_err(|source| {
                                AppError::Command {
                                    command: name.to_string(),
                                    source,
                                }
                            }),
                            None => Ok(()),
                        }
                    }
                    None => Err(AppError::Command {
                        command: name.to_string(),
                        source: anyhow::anyhow!("no module provides this command"),
                    }),
                };
                (result, None)
            }
        };

        self.close(running, server).await;
        result
    }

    // ---- phases ----

    fn begin(&self) -> Result<Arc<SignalNotifier>, AppError> {
        if !self.state.try_start() {
            return Err(AppError::AlreadyStarted);
        }

        // Listeners go in before anything else so an early signal is buffered.
        let notifier = if self.options.listen_signals {
            match SignalNotifier::new() {
                Ok(n) => n,
                Err(e) => {
                    self.state.advance(AppState::Terminated);
                    return Err(AppError::Signal(e));
                }
            }
        } else {
            SignalNotifier::detached()
        };
        notifier.on_signal(|_, signal| {
            tracing::info!(%signal, "shutdown requested");
            true
        });

        let notifier = Arc::new(notifier);
        let _ = self.notifier.set(notifier.clone());
        Ok(notifier)
    }

    /// Configuring + Initializing. `Ok(None)` means `cancel` fired during init;
    /// everything built so far has been closed.
    async fn prepare(&self, cancel: &CancellationToken) -> Result<Option<Running>, AppError> {
        let factories = self.registry.seal();

        tracing::info!(app = %self.options.name, "Phase: configuring");
        let (settings, db) = match self.configure().await {
            Ok(configured) => configured,
            Err(e) => {
                self.state.advance(AppState::Terminated);
                return Err(e);
            }
        };

        let module_token = cancel.child_token();
        let mut ctx_builder = ModuleCtxBuilder::new(settings.clone(), module_token.clone());
        if let Some(db) = &db {
            ctx_builder = ctx_builder.with_db(db.clone());
        }

        let mut running = Running {
            settings,
            db,
            modules: ModuleSet::default(),
            base_ctx: ctx_builder.build(),
            module_token,
        };

        tracing::info!("Phase: init");
        self.state.advance(AppState::Initializing);
        match self.init_modules(factories, &mut running).await {
            InitOutcome::Ready => Ok(Some(running)),
            InitOutcome::Cancelled => {
                tracing::info!("cancelled during init");
                self.close(running, None).await;
                Ok(None)
            }
            InitOutcome::Failed(e) => {
                self.close(running, None).await;
                Err(e)
            }
        }
    }

    async fn configure(&self) -> Result<(Arc<Settings>, Option<DbHandle>), AppError> {
        let config = self.load_config()?;
        let settings = Arc::new(Settings::from_provider(config)?);

        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        runtime::init_logging(&settings.log, &base_dir);
        watch_log_level(settings.raw_config());

        if let Some(file) = settings.raw_config().config_file() {
            tracing::info!(file = %file.display(), "configuration loaded");
        }

        let db = if settings.db.is_configured() {
            let pool = PoolConfig {
                max_idle_conns: settings.db.max_idle_conns,
                max_open_conns: settings.db.max_open_conns,
                conn_max_lifetime: settings.db.conn_max_lifetime,
            };
            Some(DbHandle::connect(&settings.db.uri, &pool).await?)
        } else {
            None
        };

        Ok((settings, db))
    }

    async fn init_modules(
        &self,
        factories: Vec<crate::registry::ModuleFactory>,
        running: &mut Running,
    ) -> InitOutcome {
        let token = running.module_token.clone();

        for factory in factories {
            if token.is_cancelled() {
                return InitOutcome::Cancelled;
            }

            let entry = factory(&running.settings);
            let name = entry.name.clone();
            let core = entry.core.clone();
            if let Err((e, rejected)) = running.modules.push(entry) {
                // Constructed but not tracked; close it here.
                close_module(&rejected.name, rejected.core).await;
                return InitOutcome::Failed(e.into());
            }

            let ctx = running.base_ctx.clone().for_module(&name);
            tracing::debug!(module = %name, "initializing module");
            let result = tokio::select! {
                r = core.init(&ctx) => r,
                _ = token.cancelled() => return InitOutcome::Cancelled,
            };

            match result {
                Ok(()) => tracing::info!(module = %name, "module initialized"),
                Err(source) => match self.options.init_policy {
                    InitPolicy::FailFast => {
                        return InitOutcome::Failed(AppError::ModuleInit {
                            module: name,
                            source,
                        })
                    }
                    InitPolicy::BestEffort => {
                        tracing::error!(module = %name, error = %source, "module init failed; continuing");
                    }
                },
            }
        }
        InitOutcome::Ready
    }

    fn build_router(&self, running: &Running) -> Result<Router, AppError> {
        let mut api = Router::new();
        for entry in running.modules.entries() {
            if let Some(rest) = &entry.rest {
                let ctx = running.base_ctx.clone().for_module(&entry.name);
                api = rest
                    .register_routes(&ctx, api)
                    .map_err(|source| AppError::RouteRegistration {
                        module: entry.name.clone(),
                        source,
                    })?;
                tracing::debug!(module = %entry.name, "routes registered");
            }
        }
        Ok(http::compose_router(
            &running.settings,
            api,
            &self.options.api_root,
            &self.options.middlewares,
            self.options.static_source,
        ))
    }

    async fn bind(&self, settings: &Settings) -> Result<TcpListener, AppError> {
        let addr = settings.server.bind_addr();
        let valid_port = addr
            .rsplit_once(':')
            .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
        if !valid_port {
            return Err(AppError::InvalidAddress {
                addr: settings.server.addr.clone(),
            });
        }
        TcpListener::bind(&addr)
            .await
            .map_err(|source| AppError::Bind { addr, source })
    }

    /// Serving: start HTTP and block until a signal, `cancel`, or a server failure.
    async fn serve_until_stopped(
        &self,
        running: &Running,
        notifier: &SignalNotifier,
        cancel: &CancellationToken,
    ) -> (Result<(), AppError>, Option<ServerHandle>) {
        tracing::info!("Phase: serve");
        let router = match self.build_router(running) {
            Ok(router) => router,
            Err(e) => return (Err(e), None),
        };
        let listener = match self.bind(&running.settings).await {
            Ok(listener) => listener,
            Err(e) => return (Err(e), None),
        };

        if let Ok(addr) = listener.local_addr() {
            let _ = self.local_addr.set(addr);
            tracing::info!(%addr, "HTTP server listening");
        }

        // Graceful shutdown on cancel
        let token = CancellationToken::new();
        let shutdown = {
            let token = token.clone();
            async move {
                token.cancelled().await;
                tracing::info!("HTTP server shutting down gracefully");
            }
        };
        let mut task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
        });

        self.state.advance(AppState::Serving);

        let wake = tokio::select! {
            signal = notifier.wait(cancel) => Wake::Stop(signal),
            exited = &mut task => Wake::ServerExited(exited),
        };

        match wake {
            Wake::Stop(signal) => {
                match signal {
                    Some(signal) => tracing::info!(%signal, "stopping"),
                    None => tracing::info!("cancelled; stopping"),
                }
                (Ok(()), Some(ServerHandle { token, task }))
            }
            Wake::ServerExited(Ok(Ok(()))) => {
                tracing::warn!("HTTP server exited unexpectedly");
                (Ok(()), None)
            }
            Wake::ServerExited(Ok(Err(e))) => (Err(AppError::Server(e)), None),
            Wake::ServerExited(Err(join)) => (
                Err(AppError::Server(std::io::Error::other(join.to_string()))),
                None,
            ),
        }
    }

    /// Closing → Terminated. Modules close in registration order on their own
    /// task, then the server drains; both share one deadline.
    async fn close(&self, running: Running, server: Option<ServerHandle>) {
        tracing::info!("Phase: close");
        self.state.advance(AppState::Closing);
        running.module_token.cancel();

        let grace = self.options.grace_period;
        let deadline = Instant::now() + grace;

        let modules: Vec<(String, Arc<dyn Module>)> = running
            .modules
            .entries()
            .iter()
            .map(|e| (e.name.clone(), e.core.clone()))
            .collect();
        let closer = tokio::spawn(async move {
            for (name, module) in modules {
                close_module(&name, module).await;
            }
        });
        if tokio::time::timeout_at(deadline, closer).await.is_err() {
            tracing::warn!(
                error = %AppError::ShutdownTimeout { grace },
                "modules are still closing; not waiting any longer"
            );
        }

        if let Some(ServerHandle { token, mut task }) = server {
            token.cancel();
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(Ok(()))) => tracing::info!("HTTP server stopped"),
                Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server failed while stopping"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
                Err(_) => {
                    tracing::warn!(
                        error = %AppError::ShutdownTimeout { grace },
                        "forcing HTTP server shutdown"
                    );
                    task.abort();
                    // Wait for the abort so the listener is closed when we return.
                    let _ = task.await;
                }
            }
        }

        if let Some(db) = &running.db {
            db.close().await;
        }

        self.state.advance(AppState::Terminated);
        tracing::info!("shutdown complete");
    }
}

async fn close_module(name: &str, module: Arc<dyn Module>) {
    match module.close().await {
        Ok(()) => tracing::debug!(module = %name, "module closed"),
        Err(source) => {
            let err = AppError::ModuleClose {
                module: name.to_string(),
                source,
            };
            tracing::error!(module = %name, error = %err, "module close failed");
        }
    }
}

/// Re-apply `log.level` whenever the config file changes.
fn watch_log_level(config: &ConfigProvider) {
    if config.config_file().is_none() {
        return;
    }
    let result = config.on_change(|cfg| {
        let level = cfg.get("log.level").string_or("info");
        runtime::set_log_level(&level);
        tracing::info!(%level, "log level re-applied after config change");
    });
    if let Err(e) = result {
        tracing::warn!(error = %e, "config file changes will not be picked up");
    }
}
