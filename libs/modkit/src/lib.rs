//! # ModKit - module registry and application lifecycle
//!
//! Modules implement [`Module`] and optionally [`RestfulModule`] and
//! [`CliModule`]. An [`App`] collects module factories, loads settings, runs
//! every module through init, serves HTTP and closes everything on the way out.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use modkit::{App, AppOptions, ModuleEntry};
//!
//! let app = App::new(AppOptions::new("webapp"));
//! app.register(|_settings| ModuleEntry::builder("hello", Arc::new(Hello)).rest().build())?;
//! app.run(tokio_util::sync::CancellationToken::new()).await?;
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

// Core module contracts and traits
pub mod contracts;
pub use crate::contracts::*;

pub mod context;
pub use context::{ModuleCtx, ModuleCtxBuilder};

pub mod error;
pub use error::{AppError, RegistryError};

pub mod registry;
pub use registry::{ModuleEntry, ModuleEntryBuilder, ModuleFactory, ModuleRegistry};

// HTTP utilities
pub mod http;

pub mod lifecycle;
pub use lifecycle::AppState;

pub mod runtime;
pub use crate::runtime::{
    App, AppOptions, InitPolicy, Signal, SignalNotifier, SignalPredicate, DEFAULT_GRACE_PERIOD,
};

// Settings types modules commonly need.
pub use ::runtime::{ConfigProvider, ConfigValue, Settings};
pub use modkit_db::{DbEngine, DbHandle};
