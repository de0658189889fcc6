//! Schema for the search store, applied from `migrations/` at startup.
//!
//! | Migration | Table | Holds |
//! |-----------|-------|-------|
//! | 0001 | `keywords` | Search terms, their category and status, and when each was last searched |
//! | 0002 | `search_runs` | One row per batch: counters, final status and the JSON error log |
//! | 0003 | `search_results` | Listings per run, unique on run, keyword and item id |
//! | 0004 | `keyword_outcomes` | The single terminal outcome of each keyword in a run |
//!
//! `keyword_outcomes` is keyed on `(search_run_id, keyword_id)`, which is what makes recording
//! an outcome at most once per keyword per run.

use crate::error::{DatabaseError, Result};
use sqlx::{Pool, Sqlite};

/// Run all pending database migrations.
///
/// Applied migrations are tracked in the `_sqlx_migrations` table, so calling this on an
/// up-to-date database is a no-op.
///
/// # Errors
/// Returns `DatabaseError::Migration` if any migration fails to execute.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    tracing::info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration execution failed: {e}")))?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

/// Get the current schema version.
///
/// Returns 0 if no migrations have been applied yet.
pub async fn get_schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let table_exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?
        > 0;

    if !table_exists {
        return Ok(0);
    }

    let version =
        sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations")
            .fetch_optional(pool)
            .await?
            .unwrap_or(0);

    Ok(version)
}
