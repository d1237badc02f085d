mod runner;
mod shutdown;

pub use runner::{App, AppOptions, InitPolicy, DEFAULT_GRACE_PERIOD};
pub use shutdown::{Signal, SignalNotifier, SignalPredicate};
