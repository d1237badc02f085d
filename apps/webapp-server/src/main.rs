use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use modkit::{App, AppOptions};
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const APP_NAME: &str = "webapp";
const ENV_PREFIX: &str = "WEBAPP";

#[cfg(feature = "embed")]
#[derive(rust_embed::RustEmbed)]
#[folder = "../../ui/dist/"]
#[allow_missing = true]
struct UiAssets;

/// WebApp Server - modular HTTP application host
#[derive(Parser)]
#[command(name = "webapp-server")]
#[command(about = "WebApp Server - modular HTTP application host")]
#[command(version)]
#[command(after_help = "Run `webapp-server help` to list the commands provided by modules.")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the merged configuration as YAML and exit
    #[arg(long)]
    print_config: bool,

    /// Command to run and its arguments (default: start)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    fn app_options(&self) -> AppOptions {
        let mut options = AppOptions {
            env_prefix: Some(ENV_PREFIX.to_string()),
            config_file: self.config.clone(),
            ..AppOptions::new(APP_NAME)
        };
        #[cfg(feature = "embed")]
        {
            options.static_source = modkit::http::StaticSource::embedded::<UiAssets>();
        }
        let level = match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        };
        if let Some(level) = level {
            options
                .overrides
                .push(("log.level".to_string(), serde_json::json!(level)));
        }
        options
    }
}

fn register_modules(app: &App) -> Result<()> {
    app.register(hello::entry)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app = App::new(cli.app_options());

    // Print config and exit if requested
    if cli.print_config {
        let config = app.load_config()?;
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    register_modules(&app)?;

    let args = std::iter::once("webapp-server".to_string()).chain(cli.command);
    app.run_cli(args, CancellationToken::new())
        .await
        .context("webapp-server failed")
}
