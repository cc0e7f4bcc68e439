//! Centralized default constants for ragstore.
//!
//! All crates and the API server reference these constants instead of
//! defining their own magic numbers.

// =============================================================================
// STORAGE
// =============================================================================

/// Namespace used when a caller does not name one, and the target of
/// `copy_to_general` mirroring.
pub const GENERAL_NAMESPACE: &str = "general";

/// PostgreSQL schema holding the global and namespace tables.
pub const DB_SCHEMA: &str = "public";

/// Name of the global table that holds every namespace's chunks.
pub const GLOBAL_TABLE: &str = "embeddings";

/// Prefixes of generated index names. Namespace tables may not use them,
/// since indexes and tables share one name space per schema.
pub const INDEX_NAME_PREFIXES: &[&str] = &["idx_", "uniq_"];

/// Namespace markers (case-insensitive substrings) that are never copied
/// into the general namespace.
pub const GENERAL_COPY_EXEMPT: &[&str] = &["totalsoft"];

/// Rows per multi-row INSERT. Seven bind parameters per row keeps a full
/// batch well below PostgreSQL's 65535 parameter limit.
pub const UPSERT_BATCH_ROWS: usize = 1000;

/// PostgreSQL truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name (Ollama).
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Embedding vector dimension of every table.
pub const EMBED_DIMENSION: usize = 768;

/// Default Ollama endpoint.
pub const OLLAMA_URL: &str = "http://localhost:11434";

/// Timeout for embedding requests (seconds).
pub const EMBED_TIMEOUT_SECS: u64 = 60;

/// Upper bound on embedding worker threads regardless of core count.
pub const EMBED_WORKERS_MAX: usize = 8;

// =============================================================================
// SEARCH
// =============================================================================

/// Default number of nearest neighbours returned by a similarity search.
pub const SEARCH_K: usize = 4;

/// HNSW candidate list per requested result when the vector index is on.
pub const HNSW_EF_SEARCH_PER_RESULT: usize = 25;

/// pgvector's default `hnsw.ef_search`.
pub const HNSW_EF_SEARCH_MIN: usize = 40;

/// pgvector's upper bound for `hnsw.ef_search`.
pub const HNSW_EF_SEARCH_MAX: usize = 1000;

// =============================================================================
// DATABASE POOL
// =============================================================================

/// Default maximum number of connections in the pool.
pub const POOL_MAX_CONNECTIONS: u32 = 10;

/// Default connection acquire timeout in seconds.
pub const POOL_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds.
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default maximum connection lifetime in seconds.
pub const POOL_MAX_LIFETIME_SECS: u64 = 1800;

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Path appended to a webhook base URL that does not already end in
/// `/embedding`.
pub const WEBHOOK_EMBEDDING_PATH: &str = "/api/files/webhooks/embedding";

/// Timeout for a single webhook delivery (seconds).
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// SERVER
// =============================================================================

/// Default listen host.
pub const SERVER_HOST: &str = "0.0.0.0";

/// Default listen port.
pub const SERVER_PORT: u16 = 8000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_rows_fit_parameter_limit() {
        assert!(UPSERT_BATCH_ROWS * 7 < 65_535);
    }

    #[test]
    fn test_hnsw_ef_search_bounds() {
        assert!(HNSW_EF_SEARCH_MIN <= HNSW_EF_SEARCH_MAX);
        assert!(SEARCH_K * HNSW_EF_SEARCH_PER_RESULT >= HNSW_EF_SEARCH_MIN);
    }

    #[test]
    fn test_general_namespace_is_not_exempt() {
        assert!(!GENERAL_COPY_EXEMPT
            .iter()
            .any(|m| GENERAL_NAMESPACE.contains(m)));
    }
}
