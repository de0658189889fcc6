//! Keyword storage.
//!
//! Keywords are created by import, deduplicated by their text, and only change status or
//! `last_searched_at` afterwards. They are never deleted while a run uses them.

use crate::error::{DatabaseError, Result};
use crate::{decode_opt_time, decode_time, encode_time};
use chrono::{DateTime, Utc};
use lotwatch_core::KeywordId;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite, SqliteConnection};

/// Lifecycle status of a keyword.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KeywordStatus {
    /// Included in batches
    Active,
    /// Temporarily excluded by the operator
    Paused,
    /// Permanently excluded after a non-retryable failure
    Exhausted,
}

impl KeywordStatus {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Exhausted => "exhausted",
        }
    }

    /// Parse from storage representation.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "exhausted" => Ok(Self::Exhausted),
            other => Err(DatabaseError::Decode(format!("unknown keyword status '{other}'"))),
        }
    }
}

impl std::fmt::Display for KeywordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored keyword.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyword {
    /// Identifier assigned in import order
    pub id: KeywordId,
    /// Search text
    pub keyword: String,
    /// Optional marketplace category id
    pub category: Option<String>,
    /// Lifecycle status
    pub status: KeywordStatus,
    /// Last time a search attempt for this keyword reached a terminal outcome
    pub last_searched_at: Option<DateTime<Utc>>,
    /// Import time
    pub created_at: DateTime<Utc>,
}

/// Keyword to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewKeyword {
    /// Search text
    pub keyword: String,
    /// Optional marketplace category id
    pub category: Option<String>,
}

impl NewKeyword {
    /// Keyword without a category.
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            category: None,
        }
    }

    /// Attach a category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// What `upsert_keywords` did with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    /// Newly inserted keywords
    pub added: u64,
    /// Already present (category refreshed when one was given)
    pub existing: u64,
    /// Blank entries that were ignored
    pub rejected: u64,
}

/// Insert keywords that are not stored yet, deduplicated by trimmed text.
///
/// Existing keywords keep their id and status; a supplied category replaces the stored one.
pub async fn upsert_keywords(pool: &Pool<Sqlite>, keywords: &[NewKeyword]) -> Result<UpsertSummary> {
    let mut summary = UpsertSummary::default();
    let now = encode_time(&Utc::now());
    let mut tx = pool.begin().await?;

    for entry in keywords {
        let text = entry.keyword.trim();
        if text.is_empty() {
            summary.rejected += 1;
            continue;
        }
        let category = entry
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO keywords (keyword, category, status, created_at)
             VALUES (?, ?, 'active', ?)",
        )
        .bind(text)
        .bind(category)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted > 0 {
            summary.added += 1;
        } else {
            summary.existing += 1;
            if let Some(category) = category {
                sqlx::query("UPDATE keywords SET category = ? WHERE keyword = ?")
                    .bind(category)
                    .bind(text)
                    .execute(&mut *tx)
                    .await?;
            }
        }
    }

    tx.commit().await?;

    tracing::info!(
        "Imported keywords: {} added, {} existing, {} rejected",
        summary.added,
        summary.existing,
        summary.rejected
    );
    Ok(summary)
}

/// List keywords in import order, optionally filtered by status.
pub async fn get_keywords(
    pool: &Pool<Sqlite>,
    status: Option<KeywordStatus>,
    limit: Option<u32>,
) -> Result<Vec<Keyword>> {
    let rows = sqlx::query(
        "SELECT id, keyword, category, status, last_searched_at, created_at
         FROM keywords
         WHERE (?1 IS NULL OR status = ?1)
         ORDER BY id
         LIMIT ?2",
    )
    .bind(status.map(|s| s.as_str()))
    .bind(limit.map_or(-1, i64::from))
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_keyword_row).collect()
}

/// Fetch one keyword.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` if the id is unknown.
pub async fn get_by_id(pool: &Pool<Sqlite>, id: KeywordId) -> Result<Keyword> {
    let row = sqlx::query(
        "SELECT id, keyword, category, status, last_searched_at, created_at
         FROM keywords WHERE id = ?",
    )
    .bind(id.get())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::NotFoundWithMessage(format!("keyword {id} not found")))?;

    parse_keyword_row(&row)
}

/// Change a keyword's lifecycle status.
pub async fn set_status(pool: &Pool<Sqlite>, id: KeywordId, status: KeywordStatus) -> Result<()> {
    let updated = sqlx::query("UPDATE keywords SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id.get())
        .execute(pool)
        .await?
        .rows_affected();

    if updated == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "keyword {id} not found"
        )));
    }
    Ok(())
}

/// Advance `last_searched_at`, never moving it backwards.
pub(crate) async fn touch_last_searched(
    conn: &mut SqliteConnection,
    id: KeywordId,
    at: &DateTime<Utc>,
) -> Result<()> {
    let at = encode_time(at);
    let updated = sqlx::query(
        "UPDATE keywords
         SET last_searched_at = CASE
             WHEN last_searched_at IS NULL OR last_searched_at < ?1 THEN ?1
             ELSE last_searched_at
         END
         WHERE id = ?2",
    )
    .bind(&at)
    .bind(id.get())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "keyword {id} not found"
        )));
    }
    Ok(())
}

pub(crate) async fn mark_exhausted(conn: &mut SqliteConnection, id: KeywordId) -> Result<()> {
    sqlx::query("UPDATE keywords SET status = 'exhausted' WHERE id = ?")
        .bind(id.get())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn parse_keyword_row(row: &SqliteRow) -> Result<Keyword> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Keyword {
        id: KeywordId::new(row.try_get("id")?),
        keyword: row.try_get("keyword")?,
        category: row.try_get("category")?,
        status: KeywordStatus::parse(&status)?,
        last_searched_at: decode_opt_time(row.try_get("last_searched_at")?)?,
        created_at: decode_time(&created_at)?,
    })
}
