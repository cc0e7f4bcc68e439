//! Database connection pool management.
//!
//! [`PoolManager`] owns the single process-wide pool. It is created lazily
//! on first [`PoolManager::acquire_pool`], torn down by
//! [`PoolManager::close_pool`], and may be rebuilt afterwards.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Executor;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use ragstore_core::{defaults, Error, Result};

/// Sizing and timeouts for the store's connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to maintain.
    pub min_connections: u32,
    /// Connection timeout duration.
    pub connect_timeout: Duration,
    /// Idle connection timeout duration.
    pub idle_timeout: Duration,
    /// Maximum connection lifetime.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::POOL_MAX_CONNECTIONS,
            min_connections: 1,
            connect_timeout: Duration::from_secs(defaults::POOL_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(defaults::POOL_IDLE_TIMEOUT_SECS),
            max_lifetime: Some(Duration::from_secs(defaults::POOL_MAX_LIFETIME_SECS)),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Outcome of a best-effort bootstrap step. Only schema-level uniqueness
/// is ever escalated; these steps never fail the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step changed something.
    Applied,
    /// Nothing to do.
    AlreadyPresent,
    /// The step failed and was skipped.
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

/// Per-connection bootstrap: make sure the `vector` extension exists and
/// that the `vector` type resolves on this connection.
pub async fn bootstrap_connection(conn: &mut PgConnection) -> (StepOutcome, StepOutcome) {
    let extension = ensure_vector_extension(conn).await;
    let vector_type = match conn.execute("SELECT NULL::vector").await {
        Ok(_) => StepOutcome::AlreadyPresent,
        Err(e) => StepOutcome::Failed(e.to_string()),
    };
    (extension, vector_type)
}

/// `CREATE EXTENSION IF NOT EXISTS vector`, reporting whether it was
/// already installed.
pub async fn ensure_vector_extension(conn: &mut PgConnection) -> StepOutcome {
    let present: std::result::Result<bool, sqlx::Error> =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'vector')")
            .fetch_one(&mut *conn)
            .await;
    if let Ok(true) = present {
        return StepOutcome::AlreadyPresent;
    }
    match conn.execute("CREATE EXTENSION IF NOT EXISTS vector").await {
        Ok(_) => StepOutcome::Applied,
        Err(e) => StepOutcome::Failed(e.to_string()),
    }
}

/// Create a new PostgreSQL connection pool with default configuration.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

/// Create a new PostgreSQL connection pool with custom configuration.
///
/// Every new connection runs [`bootstrap_connection`]; bootstrap failures
/// are logged and swallowed. Only failing to connect is an error.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_secs = config.connect_timeout.as_secs(),
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "Creating database connection pool"
    );

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                let (extension, vector_type) = bootstrap_connection(conn).await;
                for (step, outcome) in [("vector_extension", extension), ("vector_type", vector_type)]
                {
                    match outcome {
                        StepOutcome::Failed(reason) => warn!(
                            subsystem = "db",
                            component = "pool",
                            step,
                            error = %reason,
                            "Connection bootstrap step failed, continuing"
                        ),
                        other => debug!(subsystem = "db", component = "pool", step, outcome = ?other),
                    }
                }
                Ok(())
            })
        });

    if let Some(max_lifetime) = config.max_lifetime {
        options = options.max_lifetime(max_lifetime);
    }

    let pool = options
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        pool_idle = pool.num_idle(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Log current pool health metrics.
///
/// Warns if idle connections drop to zero (potential exhaustion).
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        "Pool health check"
    );

    if idle == 0 && size > 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            "Connection pool has no idle connections, potential exhaustion"
        );
    }
}

/// Lazily initialized owner of the shared connection pool.
///
/// Concurrent first callers are serialized on the write lock and converge
/// on one pool.
pub struct PoolManager {
    database_url: String,
    config: PoolConfig,
    pool: RwLock<Option<PgPool>>,
}

impl PoolManager {
    pub fn new(database_url: impl Into<String>, config: PoolConfig) -> Self {
        Self {
            database_url: database_url.into(),
            config,
            pool: RwLock::new(None),
        }
    }

    /// Wrap an already-built pool (tests, embedding in another service).
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            database_url: String::new(),
            config: PoolConfig::default(),
            pool: RwLock::new(Some(pool)),
        }
    }

    /// Return the shared pool, creating it on first use.
    pub async fn acquire_pool(&self) -> Result<PgPool> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }

        let mut slot = self.pool.write().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        if self.database_url.is_empty() {
            return Err(Error::Config(
                "Pool was closed and no database URL is available to rebuild it".to_string(),
            ));
        }
        let pool = create_pool_with_config(&self.database_url, self.config.clone()).await?;
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// Close the pool and return to the uninitialized state. Idempotent.
    pub async fn close_pool(&self) {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            info!(
                subsystem = "db",
                component = "pool",
                op = "close",
                "Database connection pool closed"
            );
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.pool.read().await.is_some()
    }
}
