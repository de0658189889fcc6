//! Per-keyword terminal outcomes.
//!
//! [`record_keyword_outcome`] is the single write a worker performs when a keyword is done:
//! the outcome row, the keyword's results, its `last_searched_at`/status and the run's
//! progress counters commit together or not at all. The `(run, keyword)` primary key makes a
//! repeated call a no-op.

use crate::error::{DatabaseError, Result};
use crate::search_results::{insert_results, SearchResultRecord};
use crate::search_runs::{bump_progress, decode_count};
use crate::{decode_time, encode_time, keywords};
use chrono::{DateTime, Utc};
use lotwatch_core::{FailureClass, KeywordId, OutcomeKind, RunId};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

/// Terminal outcome to persist for one keyword.
#[derive(Debug, Clone)]
pub struct NewKeywordOutcome {
    /// Run being processed
    pub run_id: RunId,
    /// Keyword that reached a terminal state
    pub keyword_id: KeywordId,
    /// Succeeded, failed or cancelled
    pub outcome: OutcomeKind,
    /// Last failure classification, if any
    pub classification: Option<FailureClass>,
    /// Attempts made
    pub attempts: u32,
    /// Last error detail
    pub detail: Option<String>,
    /// Results to store (successes, or partial results kept after schema drift)
    pub results: Vec<SearchResultRecord>,
    /// Outcome time; becomes the keyword's `last_searched_at` unless cancelled
    pub finished_at: DateTime<Utc>,
}

/// What `record_keyword_outcome` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    /// An outcome for this `(run, keyword)` already existed; nothing was written
    pub already_recorded: bool,
    /// Result rows inserted
    pub results_inserted: u64,
}

/// A stored keyword outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordOutcome {
    /// Run
    pub run_id: RunId,
    /// Keyword
    pub keyword_id: KeywordId,
    /// Outcome kind
    pub outcome: OutcomeKind,
    /// Last failure classification
    pub classification: Option<FailureClass>,
    /// Attempts made
    pub attempts: u32,
    /// Result rows stored with the outcome
    pub results_stored: u32,
    /// Last error detail
    pub detail: Option<String>,
    /// When the outcome was written
    pub recorded_at: DateTime<Utc>,
}

/// Persist one keyword's terminal outcome atomically.
///
/// # Errors
/// Any failure rolls the whole unit back. `DatabaseError::AlreadyFinalized` is returned if the
/// run was finalized before the outcome arrived.
pub async fn record_keyword_outcome(
    pool: &Pool<Sqlite>,
    outcome: &NewKeywordOutcome,
) -> Result<RecordSummary> {
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query(
        "INSERT OR IGNORE INTO keyword_outcomes (
             search_run_id, keyword_id, outcome, classification, attempts, detail, recorded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(outcome.run_id.get())
    .bind(outcome.keyword_id.get())
    .bind(outcome.outcome.as_str())
    .bind(outcome.classification.map(|c| c.as_str()))
    .bind(i64::from(outcome.attempts))
    .bind(outcome.detail.as_deref())
    .bind(encode_time(&outcome.finished_at))
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if claimed == 0 {
        tx.rollback().await?;
        tracing::debug!(
            "Outcome for keyword {} in run {} already recorded",
            outcome.keyword_id,
            outcome.run_id
        );
        return Ok(RecordSummary {
            already_recorded: true,
            results_inserted: 0,
        });
    }

    let results_inserted =
        insert_results(&mut tx, outcome.run_id, outcome.keyword_id, &outcome.results).await?;

    sqlx::query(
        "UPDATE keyword_outcomes SET results_stored = ?
         WHERE search_run_id = ? AND keyword_id = ?",
    )
    .bind(i64::try_from(results_inserted).unwrap_or(i64::MAX))
    .bind(outcome.run_id.get())
    .bind(outcome.keyword_id.get())
    .execute(&mut *tx)
    .await?;

    if outcome.outcome != OutcomeKind::Cancelled {
        keywords::touch_last_searched(&mut tx, outcome.keyword_id, &outcome.finished_at).await?;
    }
    if outcome.classification == Some(FailureClass::Fatal) {
        keywords::mark_exhausted(&mut tx, outcome.keyword_id).await?;
    }

    let (succeeded, failed) = match outcome.outcome {
        OutcomeKind::Succeeded => (1, 0),
        OutcomeKind::Failed => (0, 1),
        OutcomeKind::Cancelled => (0, 0),
    };
    bump_progress(&mut tx, outcome.run_id, 1, succeeded, failed).await?;

    tx.commit().await?;

    Ok(RecordSummary {
        already_recorded: false,
        results_inserted,
    })
}

/// All outcomes recorded for a run, in keyword order.
pub async fn get_by_run(pool: &Pool<Sqlite>, run_id: RunId) -> Result<Vec<KeywordOutcome>> {
    let rows = sqlx::query(
        "SELECT search_run_id, keyword_id, outcome, classification, attempts, results_stored,
                detail, recorded_at
         FROM keyword_outcomes
         WHERE search_run_id = ?
         ORDER BY keyword_id",
    )
    .bind(run_id.get())
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_outcome_row).collect()
}

fn parse_outcome_row(row: &SqliteRow) -> Result<KeywordOutcome> {
    let outcome: String = row.try_get("outcome")?;
    let classification: Option<String> = row.try_get("classification")?;
    let recorded_at: String = row.try_get("recorded_at")?;

    let classification = classification
        .as_deref()
        .map(FailureClass::parse)
        .transpose()
        .map_err(|e| DatabaseError::Decode(e.to_string()))?;

    Ok(KeywordOutcome {
        run_id: RunId::new(row.try_get("search_run_id")?),
        keyword_id: KeywordId::new(row.try_get("keyword_id")?),
        outcome: OutcomeKind::parse(&outcome).map_err(|e| DatabaseError::Decode(e.to_string()))?,
        classification,
        attempts: decode_count(row, "attempts")?,
        results_stored: decode_count(row, "results_stored")?,
        detail: row.try_get("detail")?,
        recorded_at: decode_time(&recorded_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keywords::{get_by_id, upsert_keywords, KeywordStatus, NewKeyword};
    use crate::search_results::{query_results, ResultFilter};
    use crate::search_runs::{finalize_run, get_run, start_run, RunStatus};
    use crate::Database;
    use lotwatch_core::ItemId;

    async fn setup(total: u32) -> (Database, RunId, Vec<KeywordId>) {
        let db = Database::in_memory().await.expect("create test database");
        db.run_migrations().await.expect("run migrations");
        upsert_keywords(
            db.pool(),
            &[NewKeyword::new("minolta x-700"), NewKeyword::new("yashica mat")],
        )
        .await
        .expect("upsert");
        let ids = crate::keywords::get_keywords(db.pool(), None, None)
            .await
            .expect("list")
            .into_iter()
            .map(|k| k.id)
            .collect();
        let run_id = start_run(db.pool(), total).await.expect("start");
        (db, run_id, ids)
    }

    fn success(run_id: RunId, keyword_id: KeywordId, items: &[&str]) -> NewKeywordOutcome {
        let now = Utc::now();
        NewKeywordOutcome {
            run_id,
            keyword_id,
            outcome: OutcomeKind::Succeeded,
            classification: None,
            attempts: 1,
            detail: None,
            results: items
                .iter()
                .map(|i| SearchResultRecord::new(ItemId::new(*i).expect("item id"), now))
                .collect(),
            finished_at: now,
        }
    }

    #[tokio::test]
    async fn test_success_writes_everything() {
        let (db, run_id, ids) = setup(2).await;

        let summary = record_keyword_outcome(
            db.pool(),
            &success(run_id, ids[0], &["200000000001", "200000000002"]),
        )
        .await
        .expect("record");
        assert!(!summary.already_recorded);
        assert_eq!(summary.results_inserted, 2);

        let run = get_run(db.pool(), run_id).await.expect("run");
        assert_eq!(run.processed_keywords, 1);
        assert_eq!(run.successful_keywords, 1);
        assert!(get_by_id(db.pool(), ids[0])
            .await
            .expect("keyword")
            .last_searched_at
            .is_some());

        let outcomes = get_by_run(db.pool(), run_id).await.expect("outcomes");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].results_stored, 2);
        assert_eq!(outcomes[0].outcome, OutcomeKind::Succeeded);
    }

    #[tokio::test]
    async fn test_second_record_is_noop() {
        let (db, run_id, ids) = setup(2).await;
        let outcome = success(run_id, ids[0], &["200000000001"]);

        record_keyword_outcome(db.pool(), &outcome).await.expect("first");
        let again = record_keyword_outcome(db.pool(), &outcome).await.expect("second");

        assert!(again.already_recorded);
        let run = get_run(db.pool(), run_id).await.expect("run");
        assert_eq!(run.processed_keywords, 1);
        let results = query_results(db.pool(), &ResultFilter::default())
            .await
            .expect("results");
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_leaves_timestamp() {
        let (db, run_id, ids) = setup(2).await;
        let outcome = NewKeywordOutcome {
            outcome: OutcomeKind::Cancelled,
            classification: Some(FailureClass::Cancelled),
            results: Vec::new(),
            ..success(run_id, ids[1], &[])
        };

        record_keyword_outcome(db.pool(), &outcome).await.expect("record");

        let keyword = get_by_id(db.pool(), ids[1]).await.expect("keyword");
        assert!(keyword.last_searched_at.is_none());
        let run = get_run(db.pool(), run_id).await.expect("run");
        assert_eq!(run.processed_keywords, 1);
        assert_eq!(run.successful_keywords, 0);
        assert_eq!(run.failed_keywords, 0);
    }

    #[tokio::test]
    async fn test_fatal_exhausts_keyword() {
        let (db, run_id, ids) = setup(2).await;
        let outcome = NewKeywordOutcome {
            outcome: OutcomeKind::Failed,
            classification: Some(FailureClass::Fatal),
            detail: Some("keyword text is empty".to_string()),
            results: Vec::new(),
            ..success(run_id, ids[0], &[])
        };

        record_keyword_outcome(db.pool(), &outcome).await.expect("record");

        let keyword = get_by_id(db.pool(), ids[0]).await.expect("keyword");
        assert_eq!(keyword.status, KeywordStatus::Exhausted);
        let stored = get_by_run(db.pool(), run_id).await.expect("outcomes");
        assert_eq!(stored[0].classification, Some(FailureClass::Fatal));
        assert_eq!(get_run(db.pool(), run_id).await.expect("run").failed_keywords, 1);
    }

    #[tokio::test]
    async fn test_overflow_rolls_back_results() {
        // total of 1 keyword; the second outcome cannot fit
        let (db, run_id, ids) = setup(1).await;
        record_keyword_outcome(db.pool(), &success(run_id, ids[0], &["200000000001"]))
            .await
            .expect("first");

        let overflow =
            record_keyword_outcome(db.pool(), &success(run_id, ids[1], &["200000000002"])).await;
        assert!(matches!(overflow, Err(DatabaseError::ProgressOverflow { .. })));

        let results = query_results(db.pool(), &ResultFilter::default())
            .await
            .expect("results");
        assert_eq!(results.len(), 1);
        assert_eq!(get_by_run(db.pool(), run_id).await.expect("outcomes").len(), 1);
        assert!(get_by_id(db.pool(), ids[1])
            .await
            .expect("keyword")
            .last_searched_at
            .is_none());
    }

    #[tokio::test]
    async fn test_record_after_finalize_fails() {
        let (db, run_id, ids) = setup(2).await;
        finalize_run(db.pool(), run_id, RunStatus::Failed, &[])
            .await
            .expect("finalize");

        let late = record_keyword_outcome(db.pool(), &success(run_id, ids[0], &[])).await;
        assert!(matches!(late, Err(DatabaseError::AlreadyFinalized { .. })));
        assert!(get_by_run(db.pool(), run_id).await.expect("outcomes").is_empty());
    }
}
