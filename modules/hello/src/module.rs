use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use axum::{http::StatusCode, routing::get, Router};
use modkit::{CliModule, Module, ModuleCtx, RestfulModule};
use tracing::{debug, info};

use crate::config::HelloConfig;

const COMMAND: &str = "hello";

/// Greets over HTTP and on the command line.
#[derive(Default)]
pub struct Hello {
    // Set once during init; routes and commands read it afterwards.
    greeting: ArcSwapOption<String>,
}

impl Hello {
    pub fn greeting(&self) -> String {
        match self.greeting.load_full() {
            Some(greeting) => greeting.as_ref().clone(),
            None => HelloConfig::default().greeting,
        }
    }
}

#[async_trait]
impl Module for Hello {
    async fn init(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: HelloConfig = ctx.module_config();
        debug!(greeting = %cfg.greeting, "loaded hello config");
        self.greeting.store(Some(Arc::new(cfg.greeting)));
        info!("hello module initialized");
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        debug!("hello module closed");
        Ok(())
    }
}

impl RestfulModule for Hello {
    fn register_routes(&self, _ctx: &ModuleCtx, router: Router) -> anyhow::Result<Router> {
        let greeting: Arc<str> = Arc::from(self.greeting());
        let router = router.route(
            "/hello",
            get(move || {
                let greeting = greeting.clone();
                async move { (StatusCode::OK, greeting.to_string()) }
            }),
        );
        Ok(router)
    }
}

#[async_trait]
impl CliModule for Hello {
    fn register_commands(&self, root: clap::Command) -> clap::Command {
        root.subcommand(
            clap::Command::new(COMMAND).about("Print the greeting").arg(
                clap::Arg::new("name")
                    .long("name")
                    .short('n')
                    .help("Greet someone in particular"),
            ),
        )
    }

    async fn execute(
        &self,
        _ctx: &ModuleCtx,
        command: &str,
        matches: &clap::ArgMatches,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(command == COMMAND, "unknown command '{command}'");
        println!("{}", self.message(matches.get_one::<String>("name").map(String::as_str)));
        Ok(())
    }
}

impl Hello {
    fn message(&self, name: Option<&str>) -> String {
        match name {
            Some(name) => format!("Hello, {name}!"),
            None => self.greeting(),
        }
    }
}
