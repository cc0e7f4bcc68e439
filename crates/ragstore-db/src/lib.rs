//! # ragstore-db
//!
//! PostgreSQL + pgvector storage layer for ragstore.
//!
//! This crate provides:
//! - Lazily created, shared connection pool with per-connection bootstrap
//! - Schema management for the global table and per-namespace tables
//! - Unique-index repair for tables holding duplicate chunk ids
//! - The namespace store: dual-table upserts, similarity search, deletes
//! - Health probe
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ragstore_db::{ChunkInput, Database, PoolConfig, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let embedder = Arc::new(my_backend());
//!     let db = Database::connect(
//!         "postgres://localhost/ragstore",
//!         PoolConfig::default(),
//!         StoreConfig::default(),
//!         embedder,
//!     )
//!     .await?;
//!     db.initialize().await?;
//!
//!     let alice = db.namespace("alice")?;
//!     alice
//!         .upsert(&[ChunkInput::new("Hello, world!").with_file_id("f1")], true)
//!         .await?;
//!     let hits = alice.similarity_search("greeting", 4, None, None).await?;
//!     println!("{} hits", hits.len());
//!
//!     db.close().await;
//!     Ok(())
//! }
//! ```
pub mod health;
pub mod index_repair;
pub mod namespace_store;
pub mod pool;
pub mod query;
pub mod registry;
pub mod schema;
pub mod schema_validation;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

use std::sync::Arc;

use sqlx::PgPool;

// Re-export core types
pub use ragstore_core::*;

pub use health::health_check;
pub use index_repair::{ensure_unique_chunk_index, RepairOutcome, UniqueIndexState};
pub use namespace_store::{MirrorWriteMode, NamespaceStore};
pub use pool::{
    create_pool, create_pool_with_config, log_pool_metrics, PoolConfig, PoolManager, StepOutcome,
};
pub use query::SearchFilter;
pub use registry::TableRegistry;
pub use schema::{SchemaManager, TableReport, VectorIndex};
pub use schema_validation::{validate_schema_name, QualifiedTable};

use namespace_store::StoreSettings;

/// Store-wide settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Schema holding every table.
    pub schema: String,
    /// Dimension of every embedding column.
    pub dimension: usize,
    pub general_copy: GeneralCopyPolicy,
    pub mirror_mode: MirrorWriteMode,
    pub vector_index: VectorIndex,
    /// Rows per multi-row `INSERT`.
    pub batch_rows: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            schema: defaults::DB_SCHEMA.to_string(),
            dimension: defaults::EMBED_DIMENSION,
            general_copy: GeneralCopyPolicy::default(),
            mirror_mode: MirrorWriteMode::default(),
            vector_index: VectorIndex::default(),
            batch_rows: defaults::UPSERT_BATCH_ROWS,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn general_copy(mut self, policy: GeneralCopyPolicy) -> Self {
        self.general_copy = policy;
        self
    }

    pub fn mirror_mode(mut self, mode: MirrorWriteMode) -> Self {
        self.mirror_mode = mode;
        self
    }

    pub fn vector_index(mut self, index: VectorIndex) -> Self {
        self.vector_index = index;
        self
    }

    pub fn batch_rows(mut self, rows: usize) -> Self {
        self.batch_rows = rows.max(1);
        self
    }
}

/// Entry point to the store: owns the pool and the table registry, and
/// hands out per-namespace stores.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    pools: Arc<PoolManager>,
    registry: Arc<TableRegistry>,
    embedder: Arc<dyn EmbeddingBackend>,
    settings: Arc<StoreSettings>,
}

impl Database {
    /// Acquire a pool from `pools` and build the store on it.
    pub async fn open(
        pools: Arc<PoolManager>,
        config: StoreConfig,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self> {
        let pool = pools.acquire_pool().await?;
        Self::build(pool, pools, config, embedder)
    }

    /// Connect to `url` with a fresh pool manager.
    pub async fn connect(
        url: &str,
        pool_config: PoolConfig,
        config: StoreConfig,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self> {
        Self::open(Arc::new(PoolManager::new(url, pool_config)), config, embedder).await
    }

    /// Build on an existing pool.
    pub fn from_pool(
        pool: PgPool,
        config: StoreConfig,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self> {
        let pools = Arc::new(PoolManager::from_pool(pool.clone()));
        Self::build(pool, pools, config, embedder)
    }

    fn build(
        pool: PgPool,
        pools: Arc<PoolManager>,
        config: StoreConfig,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self> {
        if embedder.dimension() != config.dimension {
            return Err(Error::Config(format!(
                "Embedding backend '{}' produces {} dimensions, store expects {}",
                embedder.model_name(),
                embedder.dimension(),
                config.dimension
            )));
        }
        let schema = SchemaManager::new(
            pool.clone(),
            config.schema.to_lowercase(),
            config.dimension,
            config.vector_index,
        )?;
        Ok(Self {
            pool,
            pools,
            registry: Arc::new(TableRegistry::new(schema)),
            embedder,
            settings: Arc::new(StoreSettings {
                dimension: config.dimension,
                general_copy: config.general_copy,
                mirror_mode: config.mirror_mode,
                vector_index: config.vector_index,
                batch_rows: config.batch_rows.max(1),
            }),
        })
    }

    /// Ensure the global table exists and is migrated.
    pub async fn initialize(&self) -> Result<QualifiedTable> {
        self.registry.global_table().await
    }

    /// A store bound to `namespace`. Its table is created on first write.
    pub fn namespace(&self, namespace: &str) -> Result<NamespaceStore> {
        validate_namespace(namespace)?;
        Ok(NamespaceStore::new(
            namespace.to_string(),
            self.pool.clone(),
            self.registry.clone(),
            self.embedder.clone(),
            self.settings.clone(),
        ))
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema_manager(&self) -> &SchemaManager {
        self.registry.schema_manager()
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingBackend> {
        &self.embedder
    }

    pub async fn health_check(&self) -> bool {
        health::health_check(&self.pool).await
    }

    /// Close the pool. Stores handed out earlier fail afterwards.
    pub async fn close(&self) {
        self.pools.close_pool().await;
    }
}
