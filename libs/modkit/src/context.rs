use std::sync::Arc;

use modkit_db::DbHandle;
use runtime::{ConfigProvider, Settings};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

/// What a module sees of the running app.
#[derive(Clone)]
pub struct ModuleCtx {
    pub(crate) settings: Arc<Settings>,
    pub(crate) db: Option<DbHandle>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) module_name: Option<Arc<str>>,
}

impl std::fmt::Debug for ModuleCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCtx")
            .field("module", &self.module_name)
            .field("has_db", &self.db.is_some())
            .field("cancelled", &self.cancellation_token.is_cancelled())
            .finish()
    }
}

// ---- construction/scoping ----
pub struct ModuleCtxBuilder {
    inner: ModuleCtx,
}

impl ModuleCtxBuilder {
    pub fn new(settings: Arc<Settings>, token: CancellationToken) -> Self {
        Self {
            inner: ModuleCtx {
                settings,
                db: None,
                cancellation_token: token,
                module_name: None,
            },
        }
    }

    pub fn with_db(mut self, db: DbHandle) -> Self {
        self.inner.db = Some(db);
        self
    }

    pub fn build(self) -> ModuleCtx {
        self.inner
    }
}

impl ModuleCtx {
    /// Scope context to a specific module name (used by the app).
    pub fn for_module(mut self, name: &str) -> Self {
        self.module_name = Some(Arc::<str>::from(name));
        self
    }

    // ---- public read-only API for modules ----

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn db(&self) -> Option<&DbHandle> {
        self.db.as_ref()
    }

    pub fn db_required(&self) -> anyhow::Result<&DbHandle> {
        self.db
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no database configured (set db.uri)"))
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn current_module(&self) -> Option<&str> {
        self.module_name.as_deref()
    }

    /// The module's own config section (`<module name>.*`), or the whole
    /// config if the context is not scoped.
    pub fn config(&self) -> ConfigProvider {
        let raw = self.settings.raw_config();
        match self.current_module() {
            Some(name) => raw.sub(name),
            None => raw.clone(),
        }
    }

    /// Best-effort: deserialize the module's config into `T`, fallback to `T::default()`
    /// if section is missing or invalid.
    pub fn module_config<T: DeserializeOwned + Default>(&self) -> T {
        if self.current_module().is_none() {
            return T::default();
        }
        match self.config().scan::<T>() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(
                    module = self.current_module().unwrap_or_default(),
                    error = %e,
                    "invalid module config; using defaults"
                );
                T::default()
            }
        }
    }

    /// Strict: deserialize the module's config into `T`, returning a pathful error on failure.
    pub fn module_config_required<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let name = self
            .current_module()
            .ok_or_else(|| anyhow::anyhow!("context is not scoped to a module"))?;

        let section = self.settings.raw_config().get(name);
        if !section.exists() {
            anyhow::bail!("missing module config: {name}");
        }
        section
            .scan::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {name} config: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct HelloCfg {
        greeting: String,
    }

    fn ctx(config: serde_json::Value) -> ModuleCtx {
        let settings = Settings::from_provider(ConfigProvider::from_value(config)).unwrap();
        ModuleCtxBuilder::new(Arc::new(settings), CancellationToken::new()).build()
    }

    #[test]
    fn module_config_reads_own_section() {
        let c = ctx(json!({ "hello": { "greeting": "hi" } })).for_module("hello");
        let cfg: HelloCfg = c.module_config();
        assert_eq!(cfg.greeting, "hi");
        assert_eq!(c.config().get("greeting").string(), "hi");
    }

    #[test]
    fn module_config_falls_back_to_default() {
        let c = ctx(json!({ "hello": { "greeting": 5 } })).for_module("hello");
        assert_eq!(c.module_config::<HelloCfg>(), HelloCfg::default());

        let unscoped = ctx(json!({ "hello": { "greeting": "hi" } }));
        assert_eq!(unscoped.module_config::<HelloCfg>(), HelloCfg::default());
    }

    #[test]
    fn module_config_required_reports_missing_section() {
        let c = ctx(json!({})).for_module("hello");
        let err = c.module_config_required::<HelloCfg>().unwrap_err();
        assert!(err.to_string().contains("missing module config: hello"));
        assert!(c.db().is_none());
        assert!(c.db_required().is_err());
    }
}
