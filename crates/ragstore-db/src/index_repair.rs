//! Unique-index repair: enforce uniqueness of `chunk_id` on a table that
//! may already hold duplicates.
//!
//! The protocol has two states. In [`UniqueIndexState::UniqueEnforced`]
//! the index exists and upserts can rely on `ON CONFLICT (chunk_id)`. If
//! creating the index fails the table moves to
//! [`UniqueIndexState::RepairInProgress`]: duplicates are removed (the most
//! recently created row wins, ties broken by the physically later row) and
//! index creation is retried exactly once. A second failure is fatal.
//! Transient pool or connection errors skip the repair and are returned
//! as they are.

use std::time::Instant;

use sqlx::PgPool;
use tracing::{debug, error, warn};

use ragstore_core::{Error, Result};

use crate::schema::is_already_exists;
use crate::schema_validation::QualifiedTable;

/// Where a table stands with respect to `chunk_id` uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueIndexState {
    UniqueEnforced,
    RepairInProgress,
}

/// How uniqueness was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The index was created (or already present) on the first attempt.
    Enforced,
    /// Duplicates had to be removed before the index could be created.
    Repaired { removed_rows: u64 },
}

/// `CREATE UNIQUE INDEX IF NOT EXISTS` on `chunk_id`.
pub fn create_unique_index_sql(table: &QualifiedTable) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} (chunk_id)",
        table.unique_index_name(),
        table.sql()
    )
}

/// Delete every row but the newest per `chunk_id`.
///
/// Rows are ranked by `created_at` descending, then by physical position
/// descending, so the latest insert wins an exact timestamp tie. Rows
/// without a timestamp rank last. NULL chunk ids never conflict and are
/// left alone.
pub fn dedup_sql(table: &QualifiedTable) -> String {
    let t = table.sql();
    format!(
        r#"
        WITH ranked AS (
            SELECT ctid AS row_ctid,
                   row_number() OVER (
                       PARTITION BY chunk_id
                       ORDER BY created_at DESC NULLS LAST, ctid DESC
                   ) AS rn
            FROM {t}
            WHERE chunk_id IS NOT NULL
        )
        DELETE FROM {t} AS target
        USING ranked
        WHERE target.ctid = ranked.row_ctid
          AND ranked.rn > 1
        "#
    )
}

async fn try_create_unique_index(pool: &PgPool, table: &QualifiedTable) -> Result<()> {
    match sqlx::query(&create_unique_index_sql(table))
        .execute(pool)
        .await
    {
        Ok(_) => Ok(()),
        // A concurrent creator won the race under the same name.
        Err(e) if is_already_exists(&e, false) => Ok(()),
        Err(e) => Err(Error::Database(e)),
    }
}

/// Remove duplicate `chunk_id` rows from `table`, returning how many were
/// deleted.
pub async fn deduplicate(pool: &PgPool, table: &QualifiedTable) -> Result<u64> {
    let result = sqlx::query(&dedup_sql(table))
        .execute(pool)
        .await
        .map_err(Error::Database)?;
    Ok(result.rows_affected())
}

/// Make sure `table` has a unique index on `chunk_id`, repairing
/// duplicates if necessary.
///
/// Returns [`Error::UniqueIndex`] when the retry after deduplication also
/// fails; callers must not write to the table in that case.
pub async fn ensure_unique_chunk_index(
    pool: &PgPool,
    table: &QualifiedTable,
) -> Result<RepairOutcome> {
    let start = Instant::now();

    let first_error = match try_create_unique_index(pool, table).await {
        Ok(()) => {
            debug!(
                subsystem = "db",
                component = "index_repair",
                db_table = %table,
                state = ?UniqueIndexState::UniqueEnforced,
                "Unique chunk_id index present"
            );
            return Ok(RepairOutcome::Enforced);
        }
        Err(e) => e,
    };

    // Pool and connection failures say nothing about the table's data.
    if first_error.is_transient() {
        return Err(first_error);
    }

    warn!(
        subsystem = "db",
        component = "index_repair",
        op = "repair",
        db_table = %table,
        state = ?UniqueIndexState::RepairInProgress,
        error = %first_error,
        "Unique chunk_id index creation failed, deduplicating and retrying"
    );

    let removed_rows = match deduplicate(pool, table).await {
        Ok(n) => n,
        Err(e) => {
            error!(
                subsystem = "db",
                component = "index_repair",
                db_table = %table,
                error = %e,
                "Deduplication failed"
            );
            return Err(Error::UniqueIndex {
                table: table.to_string(),
                message: format!("deduplication failed: {}", e),
            });
        }
    };

    match try_create_unique_index(pool, table).await {
        Ok(()) => {
            warn!(
                subsystem = "db",
                component = "index_repair",
                op = "repair",
                db_table = %table,
                rows_deleted = removed_rows,
                duration_ms = start.elapsed().as_millis() as u64,
                state = ?UniqueIndexState::UniqueEnforced,
                "Removed duplicate chunk_id rows and enforced unique index"
            );
            Ok(RepairOutcome::Repaired { removed_rows })
        }
        Err(e) => {
            error!(
                subsystem = "db",
                component = "index_repair",
                db_table = %table,
                rows_deleted = removed_rows,
                error = %e,
                "Unique chunk_id index still failing after deduplication"
            );
            Err(Error::UniqueIndex {
                table: table.to_string(),
                message: e.to_string(),
            })
        }
    }
}
