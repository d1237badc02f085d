//! Database handle shared by the app and its modules.
//!
//! The engine is picked from the DSN scheme (`postgres://`, `postgresql://`,
//! `sqlite:`), the pool is sized from [`PoolConfig`], and the handle is cheap
//! to clone.
//!
//! ```rust,no_run
//! # async fn demo() -> modkit_db::Result<()> {
//! use modkit_db::{DbHandle, PoolConfig};
//!
//! let db = DbHandle::connect("sqlite://data/app.db", &PoolConfig::default()).await?;
//! db.ping().await?;
//! db.close().await;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::time::Duration;

use sqlx::pool::PoolOptions;
use sqlx::postgres::PgPool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use thiserror::Error;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Typed error for the DB handle and helpers.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Unknown DSN: {0}")]
    UnknownDsn(String),

    #[error("failed to connect to {dsn}: {source}")]
    Connect {
        dsn: String,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Supported engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbEngine {
    Postgres,
    Sqlite,
}

/// Pool sizing knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Cap on idle connections. sqlx pools have no idle cap, so this is not a
    /// pool minimum: connections are opened lazily, idle ones are released
    /// after the pool's idle timeout, and zero releases them right away.
    pub max_idle_conns: u32,
    /// Upper bound on open connections.
    pub max_open_conns: u32,
    /// Connections older than this are recycled; zero disables recycling.
    pub conn_max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_conns: 10,
            max_open_conns: 10,
            conn_max_lifetime: Duration::from_secs(60),
        }
    }
}

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const NO_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

impl PoolConfig {
    fn options<DB: sqlx::Database>(&self) -> PoolOptions<DB> {
        let max = self.max_open_conns.max(1);
        let mut o = PoolOptions::<DB>::new()
            .max_connections(max)
            .min_connections(0)
            .idle_timeout(if self.max_idle_conns == 0 {
                NO_IDLE_TIMEOUT
            } else {
                IDLE_TIMEOUT
            })
            .acquire_timeout(ACQUIRE_TIMEOUT);
        if !self.conn_max_lifetime.is_zero() {
            o = o.max_lifetime(self.conn_max_lifetime);
        }
        o
    }
}

/// One concrete sqlx pool.
#[derive(Clone, Debug)]
pub enum DbPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

/// Main handle.
#[derive(Clone, Debug)]
pub struct DbHandle {
    engine: DbEngine,
    pool: DbPool,
    dsn: String,
}

impl DbHandle {
    /// Detect engine by DSN.
    ///
    /// Note: we only check scheme prefixes and don't mutate the tail (credentials etc.).
    pub fn detect(dsn: &str) -> Result<DbEngine> {
        let s = dsn.trim_start();
        if s.starts_with("postgres://") || s.starts_with("postgresql://") {
            Ok(DbEngine::Postgres)
        } else if s.starts_with("sqlite:") {
            Ok(DbEngine::Sqlite)
        } else {
            Err(DbError::UnknownDsn(redact_credentials_in_dsn(dsn)))
        }
    }

    /// Connect and build handle.
    pub async fn connect(dsn: &str, pool: &PoolConfig) -> Result<Self> {
        let dsn = dsn.trim();
        let engine = Self::detect(dsn)?;
        let connect_err = |source| DbError::Connect {
            dsn: redact_credentials_in_dsn(dsn),
            source,
        };

        let pool = match engine {
            DbEngine::Postgres => DbPool::Postgres(
                pool.options::<sqlx::Postgres>()
                    .connect(dsn)
                    .await
                    .map_err(connect_err)?,
            ),
            DbEngine::Sqlite => {
                prepare_sqlite_path(dsn)?;
                let opts = SqliteConnectOptions::from_str(dsn)
                    .map_err(connect_err)?
                    .create_if_missing(true);
                DbPool::Sqlite(
                    pool.options::<sqlx::Sqlite>()
                        .connect_with(opts)
                        .await
                        .map_err(connect_err)?,
                )
            }
        };

        tracing::info!(engine = ?engine, dsn = %redact_credentials_in_dsn(dsn), "database connected");
        Ok(Self {
            engine,
            pool,
            dsn: dsn.to_string(),
        })
    }

    /// Get the backend.
    pub fn engine(&self) -> DbEngine {
        self.engine
    }

    /// DSN with the password masked, safe for logs.
    pub fn redacted_dsn(&self) -> String {
        redact_credentials_in_dsn(&self.dsn)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn sqlx_postgres(&self) -> Option<&PgPool> {
        match &self.pool {
            DbPool::Postgres(p) => Some(p),
            _ => None,
        }
    }

    pub fn sqlx_sqlite(&self) -> Option<&SqlitePool> {
        match &self.pool {
            DbPool::Sqlite(p) => Some(p),
            _ => None,
        }
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<()> {
        match &self.pool {
            DbPool::Postgres(p) => {
                sqlx::query("SELECT 1").execute(p).await?;
            }
            DbPool::Sqlite(p) => {
                sqlx::query("SELECT 1").execute(p).await?;
            }
        }
        Ok(())
    }

    /// Close every connection of the pool. Clones of this handle share the
    /// pool and are closed as well.
    pub async fn close(&self) {
        match &self.pool {
            DbPool::Postgres(p) => p.close().await,
            DbPool::Sqlite(p) => p.close().await,
        }
        tracing::info!(dsn = %self.redacted_dsn(), "database closed");
    }

    pub fn is_closed(&self) -> bool {
        match &self.pool {
            DbPool::Postgres(p) => p.is_closed(),
            DbPool::Sqlite(p) => p.is_closed(),
        }
    }
}

/// Mask the password of a URL-style DSN.
pub fn redact_credentials_in_dsn(dsn: &str) -> String {
    if !dsn.contains('@') {
        return dsn.to_string();
    }
    match url::Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}

/// Create the parent directory of a file-backed SQLite DSN.
fn prepare_sqlite_path(dsn: &str) -> Result<()> {
    if dsn.contains(":memory:") || dsn.contains("mode=memory") {
        return Ok(());
    }

    // Handles "sqlite:/path", "sqlite://path" and "sqlite:path?query".
    let raw = dsn
        .strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))
        .unwrap_or(dsn);
    let raw = raw.split('?').next().unwrap_or(raw);

    if !raw.starts_with("file:") {
        if let Some(parent) = std::path::Path::new(raw).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
