//! Schema management for the global table and per-namespace tables.
//!
//! Every operation here is "create if not exists" and safe to run
//! concurrently from several processes: losing a creation race counts as
//! success. Pre-existing tables are migrated additively.

use std::str::FromStr;
use std::time::Instant;

use sqlx::PgPool;
use tracing::{debug, info, warn};

use ragstore_core::{defaults, sanitize_namespace, validate_namespace, Error, Result};

use crate::index_repair::{ensure_unique_chunk_index, RepairOutcome};
use crate::pool::StepOutcome;
use crate::schema_validation::{quote_literal, validate_schema_name, QualifiedTable};

// SQLSTATE codes for objects that already exist.
const DUPLICATE_TABLE: &str = "42P07";
const DUPLICATE_OBJECT: &str = "42710";
const DUPLICATE_COLUMN: &str = "42701";
const UNIQUE_VIOLATION: &str = "23505";

/// Whether `err` means the object being created already exists.
///
/// Concurrent `CREATE TABLE IF NOT EXISTS` can also fail with a unique
/// violation on the system catalogs; pass `catalog_race = true` to accept
/// that too. Never pass it for unique index creation, where a unique
/// violation means duplicate data.
pub fn is_already_exists(err: &sqlx::Error, catalog_race: bool) -> bool {
    let Some(db_err) = err.as_database_error() else {
        return false;
    };
    match db_err.code().as_deref() {
        Some(DUPLICATE_TABLE) | Some(DUPLICATE_OBJECT) | Some(DUPLICATE_COLUMN) => true,
        Some(UNIQUE_VIOLATION) => catalog_race,
        _ => false,
    }
}

/// Approximate nearest-neighbour index on the global table's embeddings.
///
/// Off by default: the global table is shared by every namespace and the
/// namespace predicate is applied to the HNSW candidate list, so a
/// namespace holding a small share of the rows can get fewer than `k`
/// results. Without the index every search is an exact scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorIndex {
    Hnsw,
    #[default]
    None,
}

impl FromStr for VectorIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hnsw" => Ok(VectorIndex::Hnsw),
            "none" | "off" => Ok(VectorIndex::None),
            other => Err(Error::Config(format!(
                "Unknown vector index '{}', expected 'hnsw' or 'none'",
                other
            ))),
        }
    }
}

/// What ensuring one table did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: QualifiedTable,
    /// Whether this call created the table.
    pub created: bool,
    /// Columns added to a pre-existing table.
    pub columns_added: Vec<&'static str>,
    pub unique_index: RepairOutcome,
    pub dimension: StepOutcome,
    pub vector_index: StepOutcome,
}

/// Creates and migrates the store's tables within one schema.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    pool: PgPool,
    schema: String,
    dimension: usize,
    vector_index: VectorIndex,
}

impl SchemaManager {
    pub fn new(
        pool: PgPool,
        schema: impl Into<String>,
        dimension: usize,
        vector_index: VectorIndex,
    ) -> Result<Self> {
        let schema = schema.into();
        validate_schema_name(&schema)?;
        if dimension == 0 {
            return Err(Error::Config(
                "Embedding dimension must be positive".to_string(),
            ));
        }
        Ok(Self {
            pool,
            schema,
            dimension,
            vector_index,
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The global table, shared by every namespace.
    pub fn global_table(&self) -> QualifiedTable {
        QualifiedTable::new(self.schema.clone(), defaults::GLOBAL_TABLE)
    }

    /// The table backing `namespace`, after sanitization.
    pub fn namespace_table(&self, namespace: &str) -> QualifiedTable {
        QualifiedTable::new(self.schema.clone(), &sanitize_namespace(namespace))
    }

    /// Create the global table if absent, or migrate it in place.
    pub async fn ensure_global_table(&self) -> Result<TableReport> {
        let start = Instant::now();
        let table = self.global_table();

        self.ensure_schema().await;
        let created = self
            .create_table(&table, defaults::GENERAL_NAMESPACE)
            .await?;
        let columns_added = self
            .add_missing_columns(&table, defaults::GENERAL_NAMESPACE)
            .await?;
        self.create_index(&table, "namespace").await?;
        self.create_index(&table, "file_id").await?;
        let unique_index = ensure_unique_chunk_index(&self.pool, &table).await?;
        let dimension = self.normalize_dimension(&table).await;
        let vector_index = match self.vector_index {
            VectorIndex::Hnsw => self.create_hnsw_index(&table).await,
            VectorIndex::None => StepOutcome::AlreadyPresent,
        };

        let report = TableReport {
            table,
            created,
            columns_added,
            unique_index,
            dimension,
            vector_index,
        };
        log_report(&report, start);
        Ok(report)
    }

    /// Create the table for `namespace` if absent, or migrate it in place.
    ///
    /// The table's `namespace` column defaults to `namespace` as given,
    /// not its sanitized form.
    pub async fn ensure_namespace_table(&self, namespace: &str) -> Result<TableReport> {
        validate_namespace(namespace)?;
        let start = Instant::now();
        let table = self.namespace_table(namespace);

        let created = self.create_table(&table, namespace).await?;
        let columns_added = self.add_missing_columns(&table, namespace).await?;
        self.create_index(&table, "chunk_id").await?;
        self.create_index(&table, "file_id").await?;
        let unique_index = ensure_unique_chunk_index(&self.pool, &table).await?;
        let dimension = self.normalize_dimension(&table).await;

        let report = TableReport {
            table,
            created,
            columns_added,
            unique_index,
            dimension,
            vector_index: StepOutcome::AlreadyPresent,
        };
        log_report(&report, start);
        Ok(report)
    }

    /// Whether `table` exists.
    pub async fn table_exists(&self, table: &QualifiedTable) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2)",
        )
        .bind(table.schema())
        .bind(table.table())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)
    }

    async fn ensure_schema(&self) {
        if self.schema == defaults::DB_SCHEMA {
            return;
        }
        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            crate::schema_validation::quote_ident(&self.schema)
        );
        if let Err(e) = sqlx::query(&sql).execute(&self.pool).await {
            if !is_already_exists(&e, true) {
                warn!(
                    subsystem = "db",
                    component = "schema",
                    schema = %self.schema,
                    error = %e,
                    "Could not create schema, continuing"
                );
            }
        }
    }

    pub(crate) fn create_table_sql(&self, table: &QualifiedTable, default_namespace: &str) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id SERIAL PRIMARY KEY,
                chunk_id TEXT,
                file_id TEXT,
                source TEXT,
                chunk_index INTEGER,
                text TEXT,
                embedding vector({}),
                namespace TEXT DEFAULT {},
                created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            table.sql(),
            self.dimension,
            quote_literal(default_namespace)
        )
    }

    async fn create_table(&self, table: &QualifiedTable, default_namespace: &str) -> Result<bool> {
        if self.table_exists(table).await? {
            return Ok(false);
        }
        match sqlx::query(&self.create_table_sql(table, default_namespace))
            .execute(&self.pool)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_already_exists(&e, true) => Ok(false),
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn existing_columns(&self, table: &QualifiedTable) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(table.schema())
        .bind(table.table())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)
    }

    /// Additive migrations for tables created by older releases.
    async fn add_missing_columns(
        &self,
        table: &QualifiedTable,
        default_namespace: &str,
    ) -> Result<Vec<&'static str>> {
        let existing = self.existing_columns(table).await?;
        let migrations: [(&'static str, String); 3] = [
            (
                "namespace",
                format!("TEXT DEFAULT {}", quote_literal(default_namespace)),
            ),
            ("file_id", "TEXT".to_string()),
            (
                "created_at",
                "TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP".to_string(),
            ),
        ];

        let mut added = Vec::new();
        for (column, definition) in migrations {
            if existing.iter().any(|c| c == column) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
                table.sql(),
                column,
                definition
            );
            match sqlx::query(&sql).execute(&self.pool).await {
                Ok(_) => {
                    info!(
                        subsystem = "db",
                        component = "schema",
                        op = "migrate",
                        db_table = %table,
                        column,
                        "Added missing column"
                    );
                    added.push(column);
                }
                Err(e) if is_already_exists(&e, true) => {}
                Err(e) => return Err(Error::Database(e)),
            }
        }
        Ok(added)
    }

    async fn create_index(&self, table: &QualifiedTable, column: &str) -> Result<()> {
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            table.index_name("idx", column),
            table.sql(),
            column
        );
        match sqlx::query(&sql).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if is_already_exists(&e, true) => Ok(()),
            Err(e) => Err(Error::Database(e)),
        }
    }

    /// Best-effort: make the embedding column's declared type match the
    /// configured dimension.
    async fn normalize_dimension(&self, table: &QualifiedTable) -> StepOutcome {
        let expected = format!("vector({})", self.dimension);
        let declared: std::result::Result<Option<String>, sqlx::Error> = sqlx::query_scalar(
            r#"
            SELECT format_type(a.atttypid, a.atttypmod)
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1
              AND c.relname = $2
              AND a.attname = 'embedding'
              AND NOT a.attisdropped
            "#,
        )
        .bind(table.schema())
        .bind(table.table())
        .fetch_optional(&self.pool)
        .await;

        let outcome = match declared {
            Ok(Some(declared)) if declared == expected => StepOutcome::AlreadyPresent,
            Ok(None) => StepOutcome::Failed("embedding column missing".to_string()),
            Ok(Some(declared)) => {
                debug!(
                    subsystem = "db",
                    component = "schema",
                    db_table = %table,
                    declared = %declared,
                    expected = %expected,
                    "Normalizing embedding column type"
                );
                let sql = format!(
                    "ALTER TABLE {} ALTER COLUMN embedding TYPE {} USING embedding::{}",
                    table.sql(),
                    expected,
                    expected
                );
                match sqlx::query(&sql).execute(&self.pool).await {
                    Ok(_) => StepOutcome::Applied,
                    Err(e) => StepOutcome::Failed(e.to_string()),
                }
            }
            Err(e) => StepOutcome::Failed(e.to_string()),
        };

        if let StepOutcome::Failed(reason) = &outcome {
            warn!(
                subsystem = "db",
                component = "schema",
                db_table = %table,
                error = %reason,
                "Embedding dimension normalization skipped"
            );
        }
        outcome
    }

    /// Best-effort HNSW index for cosine distance.
    async fn create_hnsw_index(&self, table: &QualifiedTable) -> StepOutcome {
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING hnsw (embedding vector_cosine_ops)",
            table.index_name("idx", "embedding_hnsw"),
            table.sql()
        );
        match sqlx::query(&sql).execute(&self.pool).await {
            Ok(_) => StepOutcome::Applied,
            Err(e) if is_already_exists(&e, true) => StepOutcome::AlreadyPresent,
            Err(e) => {
                warn!(
                    subsystem = "db",
                    component = "schema",
                    db_table = %table,
                    error = %e,
                    "Vector index creation failed, continuing without it"
                );
                StepOutcome::Failed(e.to_string())
            }
        }
    }
}

fn log_report(report: &TableReport, start: Instant) {
    if report.created || !report.columns_added.is_empty() {
        info!(
            subsystem = "db",
            component = "schema",
            op = "ensure_table",
            db_table = %report.table,
            created = report.created,
            columns_added = ?report.columns_added,
            unique_index = ?report.unique_index,
            duration_ms = start.elapsed().as_millis() as u64,
            "Table ready"
        );
    } else {
        debug!(
            subsystem = "db",
            component = "schema",
            op = "ensure_table",
            db_table = %report.table,
            unique_index = ?report.unique_index,
            duration_ms = start.elapsed().as_millis() as u64,
            "Table already up to date"
        );
    }
}
