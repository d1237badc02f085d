//! Sample feature module: `GET /api/hello` and a `hello` command.

mod config;
mod module;

pub use config::HelloConfig;
pub use module::Hello;

use std::sync::Arc;

use modkit::{ModuleEntry, Settings};

pub const MODULE_NAME: &str = "hello";

/// Factory suitable for [`modkit::App::register`].
pub fn entry(_settings: &Settings) -> ModuleEntry {
    ModuleEntry::builder(MODULE_NAME, Arc::new(Hello::default()))
        .rest()
        .cli()
        .build()
}
