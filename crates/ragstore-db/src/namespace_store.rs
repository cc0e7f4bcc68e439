//! The namespace store: dual-table upserts, similarity search, and scoped
//! deletes, counts and listings.
//!
//! Every chunk lives twice: once in the global table (tagged with its
//! namespace) and once in its namespace's own table. Searches and reads go
//! to the global table; deletes touch both.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use ragstore_core::{
    validate_embeddings, ChunkInput, ChunkRecord, DeleteSummary, EmbeddingBackend, Error,
    GeneralCopyPolicy, Result, ScoredChunk, StoredChunk, UpsertSummary, Vector,
};

use crate::pool::log_pool_metrics;
use crate::query::{
    count_sql, delete_chunk_ids_sql, delete_global_sql, delete_namespace_sql, get_sql,
    hnsw_ef_search, list_distinct_sql, similarity_sql, stored_chunk_from_row, upsert_query,
    DocumentKey, SearchFilter, SET_EF_SEARCH_SQL,
};
use crate::registry::TableRegistry;
use crate::schema::VectorIndex;
use crate::schema_validation::QualifiedTable;

/// How an upsert spanning several tables is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorWriteMode {
    /// One transaction per table, in order. A failure after an earlier
    /// table committed leaves the tables diverged and is reported as
    /// [`Error::PartialWrite`].
    #[default]
    Sequential,
    /// One transaction across all tables.
    Atomic,
}

impl FromStr for MirrorWriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(MirrorWriteMode::Sequential),
            "atomic" => Ok(MirrorWriteMode::Atomic),
            other => Err(Error::Config(format!(
                "Unknown mirror write mode '{}', expected 'sequential' or 'atomic'",
                other
            ))),
        }
    }
}

/// Settings shared by every store handed out by a [`crate::Database`].
#[derive(Debug, Clone)]
pub(crate) struct StoreSettings {
    pub dimension: usize,
    pub general_copy: GeneralCopyPolicy,
    pub mirror_mode: MirrorWriteMode,
    pub vector_index: VectorIndex,
    pub batch_rows: usize,
}

/// Store operations bound to one namespace.
#[derive(Clone)]
pub struct NamespaceStore {
    namespace: String,
    pool: PgPool,
    registry: Arc<TableRegistry>,
    embedder: Arc<dyn EmbeddingBackend>,
    settings: Arc<StoreSettings>,
}

impl NamespaceStore {
    pub(crate) fn new(
        namespace: String,
        pool: PgPool,
        registry: Arc<TableRegistry>,
        embedder: Arc<dyn EmbeddingBackend>,
        settings: Arc<StoreSettings>,
    ) -> Self {
        Self {
            namespace,
            pool,
            registry,
            embedder,
            settings,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Embed and upsert `chunks` into the global and namespace tables, and
    /// into the general partition when `copy_to_general` is set and the
    /// policy allows it.
    ///
    /// Replaying the same batch converges to the same rows.
    pub async fn upsert(&self, chunks: &[ChunkInput], copy_to_general: bool) -> Result<UpsertSummary> {
        if chunks.is_empty() {
            return Ok(UpsertSummary {
                namespace: self.namespace.clone(),
                ..Default::default()
            });
        }
        let start = Instant::now();

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_texts(&texts).await?;
        validate_embeddings(&embeddings, chunks.len(), self.settings.dimension)?;
        let embed_ms = start.elapsed().as_millis() as u64;

        let (chunk_ids, records) = build_records(&self.namespace, chunks, embeddings);
        let records = dedup_last_wins(records);
        let policy = &self.settings.general_copy;
        let copy = copy_to_general && policy.should_copy(&self.namespace);

        // Ensure every target before writing anything.
        let global = self.registry.global_table().await?;
        let own = self.registry.namespace_table(&self.namespace).await?;
        let mut plan: Vec<(QualifiedTable, Vec<ChunkRecord>)> = Vec::with_capacity(3);
        if copy {
            let general = self
                .registry
                .namespace_table(policy.general_namespace())
                .await?;
            let copies = general_copies(policy, &records);
            let mut global_rows = records.clone();
            global_rows.extend(copies.iter().cloned());
            plan.push((global, dedup_last_wins(global_rows)));
            plan.push((own, records));
            plan.push((general, copies));
        } else {
            plan.push((global, records.clone()));
            plan.push((own, records));
        }

        match self.settings.mirror_mode {
            MirrorWriteMode::Sequential => self.write_sequential(&plan).await?,
            MirrorWriteMode::Atomic => self.write_atomic(&plan).await?,
        }
        log_pool_metrics(&self.pool);

        let tables: Vec<String> = plan.iter().map(|(t, _)| t.to_string()).collect();
        info!(
            subsystem = "db",
            component = "namespace_store",
            op = "upsert",
            namespace = %self.namespace,
            chunk_count = chunk_ids.len(),
            copied_to_general = copy,
            tables = ?tables,
            embed_ms,
            duration_ms = start.elapsed().as_millis() as u64,
            "Upserted chunks"
        );

        Ok(UpsertSummary {
            namespace: self.namespace.clone(),
            chunk_ids,
            tables,
            copied_to_general: copy,
        })
    }

    async fn write_sequential(&self, plan: &[(QualifiedTable, Vec<ChunkRecord>)]) -> Result<()> {
        let mut completed: Vec<String> = Vec::new();
        for (table, rows) in plan {
            let result = async {
                let mut tx = self.pool.begin().await?;
                write_rows(&mut tx, table, rows, self.settings.batch_rows).await?;
                tx.commit().await
            }
            .await;
            if let Err(e) = result {
                return Err(self.diverged("upsert", completed, table, e));
            }
            completed.push(table.to_string());
        }
        Ok(())
    }

    async fn write_atomic(&self, plan: &[(QualifiedTable, Vec<ChunkRecord>)]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        for (table, rows) in plan {
            write_rows(&mut tx, table, rows, self.settings.batch_rows)
                .await
                .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)
    }

    /// Turn a failure on `failed` into the caller's error. Once another
    /// table has committed the store has diverged; that is logged loudly and
    /// reported as [`Error::PartialWrite`].
    fn diverged(
        &self,
        op: &'static str,
        completed: Vec<String>,
        failed: &QualifiedTable,
        err: sqlx::Error,
    ) -> Error {
        if completed.is_empty() {
            return Error::Database(err);
        }
        error!(
            subsystem = "db",
            component = "namespace_store",
            op,
            namespace = %self.namespace,
            completed = ?completed,
            db_table = %failed,
            error = %err,
            "Multi-table write stopped part-way; tables are inconsistent"
        );
        Error::PartialWrite {
            namespace: self.namespace.clone(),
            completed,
            failed: failed.to_string(),
            message: err.to_string(),
        }
    }

    // =========================================================================
    // SEARCH
    // =========================================================================

    /// The `k` chunks in this namespace nearest to `query`, nearest first.
    ///
    /// `file_id` takes precedence over `source`; empty filters are ignored.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        file_id: Option<&str>,
        source: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let embedding = self.embedder.embed_query(query).await?;
        validate_embeddings(
            std::slice::from_ref(&embedding),
            1,
            self.settings.dimension,
        )?;

        let global = self.registry.global_table().await?;
        let filter = SearchFilter::from_options(file_id, source);
        let sql = similarity_sql(&global, &filter);
        let limit = i64::try_from(k).unwrap_or(i64::MAX);

        let mut q = sqlx::query(&sql).bind(embedding).bind(&self.namespace);
        if let Some(value) = filter.value() {
            q = q.bind(value);
        }
        let q = q.bind(limit);

        // With an HNSW index the namespace filter runs over the candidate
        // list, which is sized to k for this query only.
        let rows = match self.settings.vector_index {
            VectorIndex::None => q.fetch_all(&self.pool).await,
            VectorIndex::Hnsw => {
                async {
                    let mut tx = self.pool.begin().await?;
                    sqlx::query(SET_EF_SEARCH_SQL)
                        .bind(hnsw_ef_search(k).to_string())
                        .execute(&mut *tx)
                        .await?;
                    let rows = q.fetch_all(&mut *tx).await?;
                    tx.commit().await?;
                    Ok::<_, sqlx::Error>(rows)
                }
                .await
            }
        }
        .map_err(Error::Database)?;

        let hits = rows
            .iter()
            .map(|row| {
                Ok(ScoredChunk {
                    chunk: stored_chunk_from_row(row)?,
                    similarity: row.try_get("similarity").map_err(Error::Database)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            subsystem = "db",
            component = "namespace_store",
            op = "similarity_search",
            namespace = %self.namespace,
            filter = ?filter,
            k,
            result_count = hits.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Similarity search complete"
        );
        Ok(hits)
    }

    // =========================================================================
    // DELETES
    // =========================================================================

    pub async fn delete_by_file_id(&self, file_id: &str) -> Result<DeleteSummary> {
        self.delete_document(DocumentKey::FileId, file_id).await
    }

    pub async fn delete_by_source(&self, source: &str) -> Result<DeleteSummary> {
        self.delete_document(DocumentKey::Source, source).await
    }

    /// Delete chunks by id from the global table (whatever their namespace)
    /// and from this namespace's table.
    pub async fn delete_by_chunk_ids(&self, chunk_ids: &[String]) -> Result<DeleteSummary> {
        if chunk_ids.is_empty() {
            return Ok(DeleteSummary::default());
        }
        let global = self.registry.global_table().await?;
        let global_rows = sqlx::query(&delete_chunk_ids_sql(&global))
            .bind(chunk_ids)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        let namespace_rows = match self.existing_namespace_table().await? {
            Some(table) => sqlx::query(&delete_chunk_ids_sql(&table))
                .bind(chunk_ids)
                .execute(&self.pool)
                .await
                .map_err(|e| self.diverged("delete_by_chunk_ids", vec![global.to_string()], &table, e))?
                .rows_affected(),
            None => 0,
        };

        let summary = DeleteSummary {
            global_rows,
            namespace_rows,
        };
        self.log_delete("delete_by_chunk_ids", chunk_ids.len(), &summary);
        Ok(summary)
    }

    async fn delete_document(&self, key: DocumentKey, value: &str) -> Result<DeleteSummary> {
        let global = self.registry.global_table().await?;
        let global_rows = sqlx::query(&delete_global_sql(&global, key))
            .bind(&self.namespace)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        let op = match key {
            DocumentKey::FileId => "delete_by_file_id",
            DocumentKey::Source => "delete_by_source",
        };
        let namespace_rows = match self.existing_namespace_table().await? {
            Some(table) => sqlx::query(&delete_namespace_sql(&table, key))
                .bind(&self.namespace)
                .bind(value)
                .execute(&self.pool)
                .await
                .map_err(|e| self.diverged(op, vec![global.to_string()], &table, e))?
                .rows_affected(),
            None => 0,
        };

        let summary = DeleteSummary {
            global_rows,
            namespace_rows,
        };
        self.log_delete(op, 1, &summary);
        Ok(summary)
    }

    /// This namespace's table, without creating it.
    async fn existing_namespace_table(&self) -> Result<Option<QualifiedTable>> {
        let schema = self.registry.schema_manager();
        let table = schema.namespace_table(&self.namespace);
        if self.registry.is_ensured(&self.namespace) || schema.table_exists(&table).await? {
            Ok(Some(table))
        } else {
            debug!(
                subsystem = "db",
                component = "namespace_store",
                namespace = %self.namespace,
                db_table = %table,
                "Namespace table does not exist, nothing to delete"
            );
            Ok(None)
        }
    }

    fn log_delete(&self, op: &'static str, input_count: usize, summary: &DeleteSummary) {
        info!(
            subsystem = "db",
            component = "namespace_store",
            op,
            namespace = %self.namespace,
            input_count,
            global_rows = summary.global_rows,
            namespace_rows = summary.namespace_rows,
            "Deleted chunks"
        );
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Chunks for `file_id` in this namespace. Falls back to counting by
    /// legacy `source` when nothing matches and the id looks like a path.
    pub async fn count_by_file_id(&self, file_id: &str) -> Result<u64> {
        let count = self.count(DocumentKey::FileId, file_id).await?;
        if count == 0 && looks_like_path(file_id) {
            debug!(
                subsystem = "db",
                component = "namespace_store",
                namespace = %self.namespace,
                file_id,
                "No file_id match, counting by legacy source"
            );
            return self.count(DocumentKey::Source, file_id).await;
        }
        Ok(count)
    }

    pub async fn count_by_source(&self, source: &str) -> Result<u64> {
        self.count(DocumentKey::Source, source).await
    }

    async fn count(&self, key: DocumentKey, value: &str) -> Result<u64> {
        let global = self.registry.global_table().await?;
        let count: i64 = sqlx::query_scalar(&count_sql(&global, key))
            .bind(&self.namespace)
            .bind(value)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count.max(0) as u64)
    }

    /// Chunks of `file_id` in document order.
    pub async fn get_by_file_id(&self, file_id: &str) -> Result<Vec<StoredChunk>> {
        self.get(DocumentKey::FileId, file_id).await
    }

    /// Chunks of legacy `source` in document order.
    pub async fn get_by_source(&self, source: &str) -> Result<Vec<StoredChunk>> {
        self.get(DocumentKey::Source, source).await
    }

    async fn get(&self, key: DocumentKey, value: &str) -> Result<Vec<StoredChunk>> {
        let global = self.registry.global_table().await?;
        let rows = sqlx::query(&get_sql(&global, key))
            .bind(&self.namespace)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(stored_chunk_from_row).collect()
    }

    pub async fn get_all_file_ids(&self) -> Result<Vec<String>> {
        self.list_distinct(DocumentKey::FileId).await
    }

    pub async fn get_all_sources(&self) -> Result<Vec<String>> {
        self.list_distinct(DocumentKey::Source).await
    }

    async fn list_distinct(&self, key: DocumentKey) -> Result<Vec<String>> {
        let global = self.registry.global_table().await?;
        sqlx::query_scalar(&list_distinct_sql(&global, key))
            .bind(&self.namespace)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)
    }
}

async fn write_rows(
    conn: &mut PgConnection,
    table: &QualifiedTable,
    rows: &[ChunkRecord],
    batch_rows: usize,
) -> std::result::Result<(), sqlx::Error> {
    for batch in rows.chunks(batch_rows.max(1)) {
        upsert_query(table, batch).build().execute(&mut *conn).await?;
    }
    Ok(())
}

/// Resolve identities and attach embeddings. Returns the chunk ids in
/// input order alongside the records.
pub(crate) fn build_records(
    namespace: &str,
    chunks: &[ChunkInput],
    embeddings: Vec<Vector>,
) -> (Vec<String>, Vec<ChunkRecord>) {
    let mut chunk_ids = Vec::with_capacity(chunks.len());
    let records = chunks
        .iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (chunk, embedding))| {
            let chunk_id = chunk
                .supplied_chunk_id()
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            chunk_ids.push(chunk_id.clone());
            ChunkRecord {
                chunk_id,
                file_id: chunk.file_id.clone(),
                source: chunk.source.clone(),
                chunk_index: chunk
                    .chunk_index
                    .unwrap_or_else(|| i32::try_from(i).unwrap_or(i32::MAX)),
                text: chunk.text.clone(),
                embedding,
                namespace: namespace.to_string(),
            }
        })
        .collect();
    (chunk_ids, records)
}

/// Collapse repeated chunk ids, keeping the last occurrence at the
/// position of the first. A single `ON CONFLICT DO UPDATE` statement
/// cannot touch the same row twice.
pub(crate) fn dedup_last_wins(records: Vec<ChunkRecord>) -> Vec<ChunkRecord> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<ChunkRecord> = Vec::with_capacity(records.len());
    for record in records {
        match positions.get(&record.chunk_id) {
            Some(&i) => out[i] = record,
            None => {
                positions.insert(record.chunk_id.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}

/// The general-partition copies of `records`.
pub(crate) fn general_copies(policy: &GeneralCopyPolicy, records: &[ChunkRecord]) -> Vec<ChunkRecord> {
    records
        .iter()
        .map(|r| ChunkRecord {
            chunk_id: policy.copy_chunk_id(&r.chunk_id),
            namespace: policy.general_namespace().to_string(),
            ..r.clone()
        })
        .collect()
}

fn looks_like_path(id: &str) -> bool {
    id.contains('/') || id.contains('\\')
}
