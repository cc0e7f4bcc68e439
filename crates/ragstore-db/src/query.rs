//! SQL construction for the namespace store.
//!
//! Table names are interpolated (already quoted by [`QualifiedTable`]);
//! every value is a bind parameter.

use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};

use ragstore_core::{defaults, ChunkRecord, Error, Result, StoredChunk};

use crate::schema_validation::QualifiedTable;

/// Columns read back for a [`StoredChunk`]. Legacy rows may hold NULLs.
pub const CHUNK_COLUMNS: &str = "COALESCE(chunk_id, '') AS chunk_id, \
     COALESCE(file_id, '') AS file_id, \
     COALESCE(source, '') AS source, \
     COALESCE(chunk_index, 0) AS chunk_index, \
     COALESCE(text, '') AS text, \
     COALESCE(namespace, '') AS namespace";

/// Document identity a scoped read or delete matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKey {
    FileId,
    /// Legacy path-like identifier.
    Source,
}

impl DocumentKey {
    pub fn column(&self) -> &'static str {
        match self {
            DocumentKey::FileId => "file_id",
            DocumentKey::Source => "source",
        }
    }
}

/// Optional restriction of a similarity search to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchFilter {
    All,
    FileId(String),
    Source(String),
}

impl SearchFilter {
    /// `file_id` wins over `source`; empty strings count as absent.
    pub fn from_options(file_id: Option<&str>, source: Option<&str>) -> Self {
        match (
            file_id.filter(|s| !s.is_empty()),
            source.filter(|s| !s.is_empty()),
        ) {
            (Some(file_id), _) => SearchFilter::FileId(file_id.to_string()),
            (None, Some(source)) => SearchFilter::Source(source.to_string()),
            (None, None) => SearchFilter::All,
        }
    }

    fn clause(&self) -> Option<(&'static str, &str)> {
        match self {
            SearchFilter::All => None,
            SearchFilter::FileId(v) => Some((DocumentKey::FileId.column(), v)),
            SearchFilter::Source(v) => Some((DocumentKey::Source.column(), v)),
        }
    }

    /// The filter value, if any.
    pub fn value(&self) -> Option<&str> {
        self.clause().map(|(_, v)| v)
    }
}

/// Nearest-neighbour query against `table`.
///
/// Binds: `$1` query vector, `$2` namespace, then the filter value if
/// any, then the limit.
pub fn similarity_sql(table: &QualifiedTable, filter: &SearchFilter) -> String {
    let (filter_sql, limit_param) = match filter.clause() {
        Some((column, _)) => (format!(" AND {} = $3", column), "$4"),
        None => (String::new(), "$3"),
    };
    format!(
        "SELECT {}, (1 - (embedding <=> $1))::float4 AS similarity \
         FROM {} \
         WHERE namespace = $2 AND embedding IS NOT NULL{} \
         ORDER BY embedding <=> $1 \
         LIMIT {}",
        CHUNK_COLUMNS,
        table.sql(),
        filter_sql,
        limit_param
    )
}

/// Raise the HNSW candidate list for the current transaction.
/// Binds: `$1` the value, as text.
pub const SET_EF_SEARCH_SQL: &str = "SELECT set_config('hnsw.ef_search', $1, true)";

/// `hnsw.ef_search` for a search returning `k` rows.
pub fn hnsw_ef_search(k: usize) -> usize {
    k.saturating_mul(defaults::HNSW_EF_SEARCH_PER_RESULT)
        .clamp(defaults::HNSW_EF_SEARCH_MIN, defaults::HNSW_EF_SEARCH_MAX)
}

/// Multi-row upsert of `rows` into `table`: insert, or overwrite every
/// mutable column on a `chunk_id` conflict. `created_at` is kept from the
/// first insert.
///
/// `rows` must not repeat a `chunk_id`.
pub fn upsert_query(table: &QualifiedTable, rows: &[ChunkRecord]) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} (chunk_id, file_id, source, chunk_index, text, embedding, namespace) ",
        table.sql()
    ));
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.chunk_id.clone())
            .push_bind(row.file_id.clone())
            .push_bind(row.source.clone())
            .push_bind(row.chunk_index)
            .push_bind(row.text.clone())
            .push_bind(row.embedding.clone())
            .push_bind(row.namespace.clone());
    });
    builder.push(
        " ON CONFLICT (chunk_id) DO UPDATE SET \
         file_id = EXCLUDED.file_id, \
         source = EXCLUDED.source, \
         chunk_index = EXCLUDED.chunk_index, \
         text = EXCLUDED.text, \
         embedding = EXCLUDED.embedding, \
         namespace = EXCLUDED.namespace",
    );
    builder
}

/// `DELETE` of one namespace's rows for a document from the global table.
/// Binds: `$1` namespace, `$2` key value.
pub fn delete_global_sql(table: &QualifiedTable, key: DocumentKey) -> String {
    format!(
        "DELETE FROM {} WHERE namespace = $1 AND {} = $2",
        table.sql(),
        key.column()
    )
}

/// `DELETE` of a document from a namespace table. Namespaces whose names
/// sanitize alike share a table, so rows are still matched on the verbatim
/// namespace. Binds: `$1` namespace, `$2` key value.
pub fn delete_namespace_sql(table: &QualifiedTable, key: DocumentKey) -> String {
    format!(
        "DELETE FROM {} WHERE namespace = $1 AND {} = $2",
        table.sql(),
        key.column()
    )
}

/// `DELETE` by chunk id, across all namespaces. Binds: `$1` text array.
pub fn delete_chunk_ids_sql(table: &QualifiedTable) -> String {
    format!("DELETE FROM {} WHERE chunk_id = ANY($1)", table.sql())
}

/// Binds: `$1` namespace, `$2` key value.
pub fn count_sql(table: &QualifiedTable, key: DocumentKey) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE namespace = $1 AND {} = $2",
        table.sql(),
        key.column()
    )
}

/// Chunks of one document in document order. Binds: `$1` namespace,
/// `$2` key value.
pub fn get_sql(table: &QualifiedTable, key: DocumentKey) -> String {
    format!(
        "SELECT {} FROM {} WHERE namespace = $1 AND {} = $2 ORDER BY chunk_index ASC, id ASC",
        CHUNK_COLUMNS,
        table.sql(),
        key.column()
    )
}

/// Distinct non-empty values of `key` in one namespace, sorted.
/// Binds: `$1` namespace.
pub fn list_distinct_sql(table: &QualifiedTable, key: DocumentKey) -> String {
    let empty_filter = match key {
        DocumentKey::FileId => " AND file_id <> ''",
        DocumentKey::Source => "",
    };
    let column = key.column();
    format!(
        "SELECT DISTINCT {column} FROM {} WHERE namespace = $1 AND {column} IS NOT NULL{} ORDER BY {column}",
        table.sql(),
        empty_filter
    )
}

/// Decode a row selected with [`CHUNK_COLUMNS`].
pub fn stored_chunk_from_row(row: &PgRow) -> Result<StoredChunk> {
    Ok(StoredChunk {
        chunk_id: row.try_get("chunk_id").map_err(Error::Database)?,
        file_id: row.try_get("file_id").map_err(Error::Database)?,
        source: row.try_get("source").map_err(Error::Database)?,
        chunk_index: row.try_get("chunk_index").map_err(Error::Database)?,
        text: row.try_get("text").map_err(Error::Database)?,
        namespace: row.try_get("namespace").map_err(Error::Database)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragstore_core::{sanitize_namespace, Vector};

    fn global() -> QualifiedTable {
        QualifiedTable::new("public", "embeddings")
    }

    fn record(id: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: id.to_string(),
            file_id: "f1".to_string(),
            source: "docs/a.md".to_string(),
            chunk_index: 0,
            text: "hello".to_string(),
            embedding: Vector::from(vec![0.0, 1.0]),
            namespace: "alice".to_string(),
        }
    }

    #[test]
    fn test_filter_file_id_takes_precedence() {
        assert_eq!(
            SearchFilter::from_options(Some("f1"), Some("docs/a.md")),
            SearchFilter::FileId("f1".to_string())
        );
    }

    #[test]
    fn test_filter_empty_strings_are_absent() {
        assert_eq!(
            SearchFilter::from_options(Some(""), Some("docs/a.md")),
            SearchFilter::Source("docs/a.md".to_string())
        );
        assert_eq!(SearchFilter::from_options(Some(""), Some("")), SearchFilter::All);
        assert_eq!(SearchFilter::from_options(None, None), SearchFilter::All);
    }

    #[test]
    fn test_similarity_sql_without_filter() {
        let sql = similarity_sql(&global(), &SearchFilter::All);
        assert!(sql.contains("(1 - (embedding <=> $1))::float4 AS similarity"));
        assert!(sql.contains("FROM \"public\".\"embeddings\""));
        assert!(sql.contains("WHERE namespace = $2 AND embedding IS NOT NULL ORDER BY"));
        assert!(sql.ends_with("ORDER BY embedding <=> $1 LIMIT $3"));
    }

    #[test]
    fn test_similarity_sql_with_filters() {
        let sql = similarity_sql(&global(), &SearchFilter::FileId("f1".to_string()));
        assert!(sql.contains("AND file_id = $3"));
        assert!(sql.ends_with("LIMIT $4"));

        let sql = similarity_sql(&global(), &SearchFilter::Source("a".to_string()));
        assert!(sql.contains("AND source = $3"));
        assert!(!sql.contains("file_id = $3"));
    }

    #[test]
    fn test_hnsw_ef_search_scales_with_k() {
        assert_eq!(hnsw_ef_search(1), 40);
        assert_eq!(hnsw_ef_search(4), 100);
        assert_eq!(hnsw_ef_search(20), 500);
        assert_eq!(hnsw_ef_search(1_000), 1000);
        assert_eq!(hnsw_ef_search(usize::MAX), 1000);
    }

    #[test]
    fn test_upsert_query_shape() {
        let rows = vec![record("c1"), record("c2")];
        let builder = upsert_query(&global(), &rows);
        let sql = builder.sql();
        assert!(sql.starts_with(
            "INSERT INTO \"public\".\"embeddings\" (chunk_id, file_id, source, chunk_index, text, embedding, namespace) VALUES "
        ));
        assert!(sql.contains("($1, $2, $3, $4, $5, $6, $7), ($8, $9, $10, $11, $12, $13, $14)"));
        assert!(sql.contains("ON CONFLICT (chunk_id) DO UPDATE SET"));
        assert!(sql.contains("embedding = EXCLUDED.embedding"));
        assert!(sql.contains("namespace = EXCLUDED.namespace"));
        assert!(!sql.contains("created_at"));
    }

    #[test]
    fn test_delete_sql_scoping() {
        let ns = QualifiedTable::new("public", "alice");
        assert_eq!(
            delete_global_sql(&global(), DocumentKey::FileId),
            "DELETE FROM \"public\".\"embeddings\" WHERE namespace = $1 AND file_id = $2"
        );
        assert_eq!(
            delete_namespace_sql(&ns, DocumentKey::Source),
            "DELETE FROM \"public\".\"alice\" WHERE namespace = $1 AND source = $2"
        );
        let chunk_sql = delete_chunk_ids_sql(&global());
        assert!(!chunk_sql.contains("namespace"));
        assert!(chunk_sql.contains("chunk_id = ANY($1)"));
    }

    #[test]
    fn test_namespace_delete_matches_verbatim_namespace() {
        // Both spellings land in the same table.
        assert_eq!(sanitize_namespace("Team-A"), sanitize_namespace("team_a"));
        let shared = QualifiedTable::new("public", &sanitize_namespace("Team-A"));
        assert_eq!(
            delete_namespace_sql(&shared, DocumentKey::FileId),
            "DELETE FROM \"public\".\"team_a\" WHERE namespace = $1 AND file_id = $2"
        );
    }

    #[test]
    fn test_get_sql_orders_by_chunk_index() {
        let sql = get_sql(&global(), DocumentKey::FileId);
        assert!(sql.ends_with("ORDER BY chunk_index ASC, id ASC"));
    }

    #[test]
    fn test_list_distinct_sql() {
        let sql = list_distinct_sql(&global(), DocumentKey::FileId);
        assert!(sql.contains("file_id IS NOT NULL AND file_id <> ''"));
        assert!(sql.ends_with("ORDER BY file_id"));

        let sql = list_distinct_sql(&global(), DocumentKey::Source);
        assert!(sql.contains("source IS NOT NULL ORDER BY source"));
        assert!(!sql.contains("<> ''"));
    }
}
