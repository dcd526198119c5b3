//! Connection pool and its owner
//!
//! A [`PoolManager`] is created once by the application and handed to every
//! store that should share connections. The first `acquire` builds the pool
//! and creates the auth table; later calls return the same pool.

use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

use super::{Dialect, QueryBackend, Row, SqlParam};
use crate::config::{Driver, StoreConfig, TlsConfig};
use crate::error::{AuthStateError, Result};

/// A live connection pool plus its admission gate.
pub struct AuthPool {
    backend: Arc<dyn QueryBackend>,
    admission: Option<Semaphore>,
    admission_limit: usize,
}

impl std::fmt::Debug for AuthPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPool")
            .field("dialect", &self.backend.dialect())
            .field("admission_limit", &self.admission_limit)
            .finish()
    }
}

impl AuthPool {
    /// Wrap an existing backend without an admission limit.
    pub fn from_backend(backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            backend,
            admission: None,
            admission_limit: 0,
        }
    }

    /// Reject statements once `limit` are already in flight.
    pub fn with_admission_limit(mut self, limit: usize) -> Self {
        self.admission = Some(Semaphore::new(limit));
        self.admission_limit = limit;
        self
    }

    /// Open a pool for `config` without touching the schema.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let backend: Arc<dyn QueryBackend> = match config.driver {
            Driver::Mysql => Arc::new(connect_mysql(config).await?),
            Driver::Sqlite => Arc::new(connect_sqlite(config).await?),
        };
        let pool = Self::from_backend(backend);
        // queue_limit 0 means unbounded waiting in the driver.
        if config.queue_limit > 0 {
            let limit = (config.connection_limit as usize)
                .saturating_add(config.queue_limit as usize)
                .min(Semaphore::MAX_PERMITS);
            return Ok(pool.with_admission_limit(limit));
        }
        Ok(pool)
    }

    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    /// Run one statement, once. Retrying is the executor's job.
    pub async fn run(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>> {
        let _permit = match &self.admission {
            Some(gate) => Some(gate.try_acquire().map_err(|_| AuthStateError::QueueFull {
                limit: self.admission_limit,
            })?),
            None => None,
        };
        self.backend.run(sql, params).await
    }

    /// Create the auth table and its indexes if they do not exist yet.
    pub async fn ensure_table(&self, table: &str) -> Result<()> {
        for stmt in self.dialect().create_table(table) {
            self.run(&stmt, &[]).await?;
        }
        tracing::debug!("Ensured auth table `{}`", table);
        Ok(())
    }
}

async fn connect_mysql(config: &StoreConfig) -> Result<sqlx::MySqlPool> {
    let mut opts = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(&config.database);
    if let Some(password) = config.effective_password() {
        opts = opts.password(password);
    }
    if let Some(socket) = &config.socket_path {
        opts = opts.socket(socket);
    }
    opts = apply_tls(opts, config.tls.as_ref());

    MySqlPoolOptions::new()
        .max_connections(config.connection_limit)
        .connect_with(opts)
        .await
        .map_err(|e| AuthStateError::PoolInit(e.to_string()))
}

fn is_inline_pem(value: &str) -> bool {
    value.trim_start().starts_with("-----BEGIN")
}

fn apply_tls(opts: MySqlConnectOptions, tls: Option<&TlsConfig>) -> MySqlConnectOptions {
    let Some(tls) = tls else {
        return opts.ssl_mode(MySqlSslMode::Disabled);
    };

    let mode = if !tls.reject_unauthorized {
        MySqlSslMode::Required
    } else if tls.verify_identity {
        MySqlSslMode::VerifyIdentity
    } else {
        MySqlSslMode::VerifyCa
    };
    let mut opts = opts.ssl_mode(mode);

    if let Some(ca) = &tls.ca {
        opts = if is_inline_pem(ca) {
            opts.ssl_ca_from_pem(ca.as_bytes().to_vec())
        } else {
            opts.ssl_ca(ca)
        };
    }
    if let Some(cert) = &tls.cert {
        opts = if is_inline_pem(cert) {
            opts.ssl_client_cert_from_pem(cert.as_bytes())
        } else {
            opts.ssl_client_cert(cert)
        };
    }
    if let Some(key) = &tls.key {
        opts = if is_inline_pem(key) {
            opts.ssl_client_key_from_pem(key.as_bytes())
        } else {
            opts.ssl_client_key(key)
        };
    }
    opts
}

async fn connect_sqlite(config: &StoreConfig) -> Result<sqlx::SqlitePool> {
    let path = config.sqlite_path.as_deref().unwrap_or(":memory:");
    let in_memory = path.contains(":memory:") || path.contains("mode=memory");

    let mut opts = SqliteConnectOptions::from_str(path)
        .map_err(|e| AuthStateError::PoolInit(e.to_string()))?
        .create_if_missing(true);
    if !in_memory {
        opts = opts.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool_opts = SqlitePoolOptions::new().max_connections(config.connection_limit);
    if in_memory {
        // The database lives only as long as a connection does.
        pool_opts = pool_opts
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    pool_opts
        .connect_with(opts)
        .await
        .map_err(|e| AuthStateError::PoolInit(e.to_string()))
}

#[derive(Default)]
struct ManagerState {
    pool: Option<Arc<AuthPool>>,
    tables: HashSet<String>,
}

/// Owns the shared pool. Initialization is serialized, so concurrent first
/// callers still create exactly one pool.
#[derive(Default)]
pub struct PoolManager {
    state: Mutex<ManagerState>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared pool, creating it (and the table) on first use.
    ///
    /// Connection settings of later calls are ignored once a pool exists, but
    /// a table name not seen before still gets its schema created.
    pub async fn acquire(&self, config: &StoreConfig) -> Result<Arc<AuthPool>> {
        self.init(config, false).await
    }

    /// Build a fresh pool from `config`, replacing the current one on success.
    pub async fn reinitialize(&self, config: &StoreConfig) -> Result<Arc<AuthPool>> {
        self.init(config, true).await
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.pool.is_some()
    }

    async fn init(&self, config: &StoreConfig, force: bool) -> Result<Arc<AuthPool>> {
        config.validate()?;
        let mut state = self.state.lock().await;

        if !force && let Some(pool) = state.pool.clone() {
            if !state.tables.contains(&config.table_name) {
                create_table(&pool, &config.table_name).await?;
                state.tables.insert(config.table_name.clone());
            }
            return Ok(pool);
        }

        for option in config.unsupported_options() {
            tracing::warn!("Option `{}` is not supported by the driver and is ignored", option);
        }
        let pool = Arc::new(AuthPool::connect(config).await?);
        create_table(&pool, &config.table_name).await?;

        tracing::info!(
            "Initialized {:?} pool (connection_limit={}, table={})",
            pool.dialect(),
            config.connection_limit,
            config.table_name
        );
        state.pool = Some(pool.clone());
        state.tables = HashSet::from([config.table_name.clone()]);
        Ok(pool)
    }
}

async fn create_table(pool: &AuthPool, table: &str) -> Result<()> {
    pool.ensure_table(table)
        .await
        .map_err(|e| AuthStateError::PoolInit(format!("failed to create table `{}`: {}", table, e)))
}
