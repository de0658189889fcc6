//! Search run history.
//!
//! A run is created when a batch starts, its counters advance as keywords reach a terminal
//! outcome, and it is finalized exactly once.

use crate::error::{DatabaseError, Result};
use crate::{decode_opt_time, decode_time, encode_time};
use chrono::{DateTime, Utc};
use lotwatch_core::{FailureClass, KeywordId, RunId};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite, SqliteConnection};

/// Aggregate status of a search run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Keywords are still being processed
    InProgress,
    /// Every keyword succeeded
    Completed,
    /// No keyword succeeded, or the batch hit a fatal error
    Failed,
    /// Some keywords failed, or the batch was cancelled
    PartiallyCompleted,
}

impl RunStatus {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PartiallyCompleted => "partially_completed",
        }
    }

    /// Parse from storage representation.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partially_completed" => Ok(Self::PartiallyCompleted),
            other => Err(DatabaseError::Decode(format!("unknown run status '{other}'"))),
        }
    }

    /// Whether the run has been finalized.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One terminal failure recorded in a run's error log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorLogEntry {
    /// Keyword that failed; `None` for batch-level errors
    pub keyword_id: Option<KeywordId>,
    /// Keyword text, for readability
    pub keyword: String,
    /// Last failure classification
    pub classification: FailureClass,
    /// Attempts made
    pub attempts: u32,
    /// Last error detail
    pub detail: String,
    /// When the failure became terminal
    pub at: DateTime<Utc>,
}

/// A stored search run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRun {
    /// Run identifier
    pub id: RunId,
    /// When the batch started
    pub start_time: DateTime<Utc>,
    /// When the run was finalized
    pub end_time: Option<DateTime<Utc>>,
    /// Keywords in the batch
    pub total_keywords: u32,
    /// Keywords with a terminal outcome
    pub processed_keywords: u32,
    /// Keywords that succeeded
    pub successful_keywords: u32,
    /// Keywords that failed
    pub failed_keywords: u32,
    /// Aggregate status
    pub status: RunStatus,
    /// Structured log of terminal failures
    pub error_log: Vec<ErrorLogEntry>,
    /// Wall-clock duration, set on finalization
    pub execution_time_seconds: Option<f64>,
}

/// Create an `in_progress` run for a batch of `total_keywords`.
pub async fn start_run(pool: &Pool<Sqlite>, total_keywords: u32) -> Result<RunId> {
    let started_at = encode_time(&Utc::now());

    let id = sqlx::query(
        "INSERT INTO search_runs (start_time, total_keywords, status)
         VALUES (?, ?, 'in_progress')",
    )
    .bind(&started_at)
    .bind(i64::from(total_keywords))
    .execute(pool)
    .await?
    .last_insert_rowid();

    let run_id = RunId::new(id);
    tracing::info!("Started search run {} for {} keywords", run_id, total_keywords);
    Ok(run_id)
}

/// Advance the processed counter by `delta`.
///
/// # Errors
/// Returns `DatabaseError::ProgressOverflow` if the counter would exceed the total, and
/// `DatabaseError::AlreadyFinalized` once the run has left `in_progress`.
pub async fn update_run_progress(pool: &Pool<Sqlite>, run_id: RunId, delta: u32) -> Result<()> {
    let mut conn = pool.acquire().await?;
    bump_progress(&mut conn, run_id, delta, 0, 0).await
}

/// Guarded counter update shared with the outcome transaction.
pub(crate) async fn bump_progress(
    conn: &mut SqliteConnection,
    run_id: RunId,
    processed: u32,
    successful: u32,
    failed: u32,
) -> Result<()> {
    let updated = sqlx::query(
        "UPDATE search_runs
         SET processed_keywords = processed_keywords + ?1,
             successful_keywords = successful_keywords + ?2,
             failed_keywords = failed_keywords + ?3
         WHERE id = ?4
           AND status = 'in_progress'
           AND processed_keywords + ?1 <= total_keywords",
    )
    .bind(i64::from(processed))
    .bind(i64::from(successful))
    .bind(i64::from(failed))
    .bind(run_id.get())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 1 {
        return Ok(());
    }

    let status: Option<String> = sqlx::query_scalar("SELECT status FROM search_runs WHERE id = ?")
        .bind(run_id.get())
        .fetch_optional(&mut *conn)
        .await?;

    match status.as_deref() {
        None => Err(DatabaseError::NotFoundWithMessage(format!(
            "search run {run_id} not found"
        ))),
        Some("in_progress") => Err(DatabaseError::ProgressOverflow { run_id }),
        Some(_) => Err(DatabaseError::AlreadyFinalized { run_id }),
    }
}

/// Finalize a run: set its status, end time, duration and error log.
///
/// Only a run that is still `in_progress` can be finalized.
///
/// # Errors
/// Returns `DatabaseError::AlreadyFinalized` on a second call and `DatabaseError::Query` when
/// asked to finalize as `in_progress`.
pub async fn finalize_run(
    pool: &Pool<Sqlite>,
    run_id: RunId,
    status: RunStatus,
    error_log: &[ErrorLogEntry],
) -> Result<SearchRun> {
    if !status.is_terminal() {
        return Err(DatabaseError::Query(
            "a run cannot be finalized as in_progress".to_string(),
        ));
    }

    let log_json = serde_json::to_string(error_log)?;
    let mut tx = pool.begin().await?;

    let current = sqlx::query("SELECT start_time, status FROM search_runs WHERE id = ?")
        .bind(run_id.get())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DatabaseError::NotFoundWithMessage(format!("search run {run_id} not found")))?;

    let current_status: String = current.try_get("status")?;
    if RunStatus::parse(&current_status)?.is_terminal() {
        return Err(DatabaseError::AlreadyFinalized { run_id });
    }

    let start_time: String = current.try_get("start_time")?;
    let end_time = Utc::now();
    #[allow(clippy::cast_precision_loss)]
    let elapsed = (end_time - decode_time(&start_time)?)
        .num_milliseconds()
        .max(0) as f64
        / 1000.0;

    sqlx::query(
        "UPDATE search_runs
         SET status = ?, end_time = ?, error_log = ?, execution_time_seconds = ?
         WHERE id = ? AND status = 'in_progress'",
    )
    .bind(status.as_str())
    .bind(encode_time(&end_time))
    .bind(&log_json)
    .bind(elapsed)
    .bind(run_id.get())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        "Finalized search run {} as {} after {:.1}s ({} errors)",
        run_id,
        status,
        elapsed,
        error_log.len()
    );

    get_run(pool, run_id).await
}

/// Fetch one run.
pub async fn get_run(pool: &Pool<Sqlite>, run_id: RunId) -> Result<SearchRun> {
    let row = sqlx::query(
        "SELECT id, start_time, end_time, total_keywords, processed_keywords,
                successful_keywords, failed_keywords, status, error_log, execution_time_seconds
         FROM search_runs WHERE id = ?",
    )
    .bind(run_id.get())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::NotFoundWithMessage(format!("search run {run_id} not found")))?;

    parse_run_row(&row)
}

/// Most recent runs first.
pub async fn recent_runs(pool: &Pool<Sqlite>, limit: u32) -> Result<Vec<SearchRun>> {
    let rows = sqlx::query(
        "SELECT id, start_time, end_time, total_keywords, processed_keywords,
                successful_keywords, failed_keywords, status, error_log, execution_time_seconds
         FROM search_runs
         ORDER BY id DESC
         LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_run_row).collect()
}

fn parse_run_row(row: &SqliteRow) -> Result<SearchRun> {
    let start_time: String = row.try_get("start_time")?;
    let status: String = row.try_get("status")?;
    let error_log: String = row.try_get("error_log")?;

    Ok(SearchRun {
        id: RunId::new(row.try_get("id")?),
        start_time: decode_time(&start_time)?,
        end_time: decode_opt_time(row.try_get("end_time")?)?,
        total_keywords: decode_count(row, "total_keywords")?,
        processed_keywords: decode_count(row, "processed_keywords")?,
        successful_keywords: decode_count(row, "successful_keywords")?,
        failed_keywords: decode_count(row, "failed_keywords")?,
        status: RunStatus::parse(&status)?,
        error_log: serde_json::from_str(&error_log)?,
        execution_time_seconds: row.try_get("execution_time_seconds")?,
    })
}

pub(crate) fn decode_count(row: &SqliteRow, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value)
        .map_err(|_| DatabaseError::Decode(format!("{column} out of range: {value}")))
}
