//! Lotwatch Database Layer
//!
//! Provides `SQLite` storage for keywords, captured listings and search run history.
//! Uses `SQLx` with embedded migrations.
//!
//! # Architecture
//!
//! - **Migrations**: SQL migrations are embedded and versioned using `SQLx`
//! - **Connection Pooling**: WAL-journaled file pool, or a single-connection in-memory pool
//! - **Atomic outcomes**: one keyword's results, timestamp and run progress are written in a
//!   single transaction by [`outcomes::record_keyword_outcome`]
//!
//! # Example
//!
//! ```ignore
//! use lotwatch_db::{Database, search_runs};
//!
//! let db = Database::new("lotwatch.db").await?;
//! db.run_migrations().await?;
//! let run_id = search_runs::start_run(db.pool(), 3).await?;
//! ```
//!
//! # Design Principles
//!
//! - Writes that belong to one keyword outcome are never split across transactions
//! - Repeating a write for the same `(run, keyword)` never duplicates state
//! - Timestamps are stored as fixed-width RFC3339 UTC text so SQL comparisons are chronological

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod error;
pub mod keywords;
pub mod migrations;
pub mod outcomes;
pub mod search_results;
pub mod search_runs;

// Re-export commonly used types
pub use connection::DbPool;
pub use error::{DatabaseError, Result};
pub use keywords::{Keyword, KeywordStatus, NewKeyword, UpsertSummary};
pub use outcomes::{KeywordOutcome, NewKeywordOutcome, RecordSummary};
pub use search_results::{ResultFilter, SearchResultRecord, StoredSearchResult};
pub use search_runs::{ErrorLogEntry, RunStatus, SearchRun};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::Path;

/// High-level database interface with migrations.
///
/// Components receive this handle explicitly; there is no global session.
#[derive(Debug)]
pub struct Database {
    pool: DbPool,
}

/// Row counts across the main tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// All stored keywords
    pub keywords_total: i64,
    /// Keywords with status `active`
    pub keywords_active: i64,
    /// Captured listing rows
    pub results_total: i64,
    /// Search runs, any status
    pub runs_total: i64,
    /// Runs that finalized `completed`
    pub runs_completed: i64,
}

impl Database {
    /// Open (or create) a database file with the default pool size.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, connection::DEFAULT_MAX_CONNECTIONS).await
    }

    /// Open (or create) a database file.
    ///
    /// # Arguments
    /// * `path` - Path to the database file
    /// * `max_connections` - Pool size
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let pool = DbPool::open(path, max_connections).await?;
        Ok(Self { pool })
    }

    /// Open a private in-memory database. Used by tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let pool = DbPool::in_memory().await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool.pool()).await
    }

    /// Get the current schema version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool.pool()).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Check that the database is reachable.
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    /// Count keywords, results and runs.
    pub async fn statistics(&self) -> Result<Statistics> {
        let (keywords_total, keywords_active): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0)
             FROM keywords",
        )
        .fetch_one(self.pool())
        .await?;

        let results_total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_results")
            .fetch_one(self.pool())
            .await?;

        let (runs_total, runs_completed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0)
             FROM search_runs",
        )
        .fetch_one(self.pool())
        .await?;

        Ok(Statistics {
            keywords_total,
            keywords_active,
            results_total,
            runs_total,
            runs_completed,
        })
    }

    /// Close the database connection gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Encode a timestamp as fixed-width RFC3339 (`2024-05-01T10:00:00.000000Z`).
pub(crate) fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{raw}': {e}")))
}

pub(crate) fn decode_opt_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode_time).transpose()
}
