use async_trait::async_trait;
use axum::Router;

use crate::context::ModuleCtx;

/// Core module: every registered module implements this.
///
/// `init` runs once, in registration order, before the server starts.
/// `close` runs once during shutdown for every module that was constructed,
/// whether or not its `init` succeeded.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    async fn init(&self, ctx: &ModuleCtx) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Module that contributes HTTP routes. Pure wiring; must be sync.
///
/// Routes are mounted under the app's API root (`/api` by default), so a
/// module registering `/hello` is reachable at `/api/hello`.
pub trait RestfulModule: Send + Sync {
    fn register_routes(&self, ctx: &ModuleCtx, router: Router) -> anyhow::Result<Router>;
}

/// Module that contributes sub-commands to the command tree.
#[async_trait]
pub trait CliModule: Send + Sync {
    /// Attach this module's sub-commands to `root` and return it.
    fn register_commands(&self, root: clap::Command) -> clap::Command;

    /// Run one of the sub-commands registered above.
    async fn execute(
        &self,
        ctx: &ModuleCtx,
        command: &str,
        matches: &clap::ArgMatches,
    ) -> anyhow::Result<()>;
}
