//! Structured logging field name constants for ragstore.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service: partial multi-table writes, failed index repair |
//! | WARN  | Recovered issue: index repaired, bootstrap step skipped, name collision |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values |
//! | TRACE | Per-item iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "inference", "notify"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "schema", "index_repair", "namespace_store", "webhook"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "upsert", "similarity_search", "delete_by_file_id"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Namespace as given by the caller.
pub const NAMESPACE: &str = "namespace";

/// Source document identifier.
pub const FILE_ID: &str = "file_id";

/// Database table affected (schema-qualified).
pub const DB_TABLE: &str = "db_table";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks processed.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of rows returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of rows removed by a delete or deduplication.
pub const ROWS_DELETED: &str = "rows_deleted";

/// Number of input texts sent to an embedding model.
pub const INPUT_COUNT: &str = "input_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
