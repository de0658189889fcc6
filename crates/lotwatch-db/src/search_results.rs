//! Captured listings.
//!
//! Rows are keyed by `(keyword_id, item_id, search_run_id)`: a later run adds new rows for the
//! same item instead of overwriting, and repeating a write within a run is a no-op.

use crate::error::{DatabaseError, Result};
use crate::{decode_opt_time, decode_time, encode_time};
use chrono::{DateTime, Utc};
use lotwatch_core::{ItemId, KeywordId, ListingType, ParseWarning, RunId};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, QueryBuilder, Row, Sqlite, SqliteConnection};

/// One listing as persisted. Fields the page did not yield are `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResultRecord {
    /// Marketplace item id
    pub item_id: ItemId,
    /// Listing title
    pub title: Option<String>,
    /// Price in `currency`
    pub price: Option<f64>,
    /// ISO currency code
    pub currency: Option<String>,
    /// Shipping price, 0 for free shipping
    pub shipping_price: Option<f64>,
    /// Units available
    pub stock_quantity: Option<i64>,
    /// Seller name
    pub seller_name: Option<String>,
    /// Positive feedback ratio (0..=1)
    pub seller_rating: Option<f64>,
    /// Seller feedback count
    pub seller_feedback_count: Option<i64>,
    /// Auction end, derived from the time-left text
    pub auction_end_time: Option<DateTime<Utc>>,
    /// Auction / fixed price
    pub listing_type: ListingType,
    /// Condition label
    pub condition: Option<String>,
    /// Buy It Now offered
    pub is_buy_it_now: bool,
    /// Bids placed
    pub bids_count: Option<i64>,
    /// Listing URL
    pub item_url: Option<String>,
    /// Thumbnail URL
    pub image_url: Option<String>,
    /// Fields that could not be read
    pub parse_warnings: Vec<ParseWarning>,
    /// When the page was captured
    pub captured_at: DateTime<Utc>,
}

impl SearchResultRecord {
    /// Record with only the mandatory fields set.
    #[must_use]
    pub fn new(item_id: ItemId, captured_at: DateTime<Utc>) -> Self {
        Self {
            item_id,
            title: None,
            price: None,
            currency: None,
            shipping_price: None,
            stock_quantity: None,
            seller_name: None,
            seller_rating: None,
            seller_feedback_count: None,
            auction_end_time: None,
            listing_type: ListingType::Unknown,
            condition: None,
            is_buy_it_now: false,
            bids_count: None,
            item_url: None,
            image_url: None,
            parse_warnings: Vec::new(),
            captured_at,
        }
    }
}

/// A persisted listing with its owning run and keyword.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredSearchResult {
    /// Row id
    pub id: i64,
    /// Run that captured it
    pub search_run_id: RunId,
    /// Keyword that found it
    pub keyword_id: KeywordId,
    /// Listing data
    pub result: SearchResultRecord,
}

/// Read-only selection over stored results, used by export sinks.
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    /// Restrict to one run
    pub run: Option<RunId>,
    /// Restrict to these keywords (empty = all)
    pub keyword_ids: Vec<KeywordId>,
    /// Captured at or after
    pub captured_from: Option<DateTime<Utc>>,
    /// Captured at or before
    pub captured_to: Option<DateTime<Utc>>,
    /// Minimum price
    pub min_price: Option<f64>,
    /// Maximum price
    pub max_price: Option<f64>,
    /// Row cap
    pub limit: Option<u32>,
}

/// Add results for one keyword in one run.
///
/// Idempotent per `(run, keyword)`: items already stored for the pair are ignored, so a
/// repeated call with the same batch inserts nothing. Returns rows actually inserted.
pub async fn append_search_results(
    pool: &Pool<Sqlite>,
    run_id: RunId,
    keyword_id: KeywordId,
    results: &[SearchResultRecord],
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let inserted = insert_results(&mut tx, run_id, keyword_id, results).await?;
    tx.commit().await?;

    tracing::debug!(
        "Stored {} of {} results for keyword {} in run {}",
        inserted,
        results.len(),
        keyword_id,
        run_id
    );
    Ok(inserted)
}

pub(crate) async fn insert_results(
    conn: &mut SqliteConnection,
    run_id: RunId,
    keyword_id: KeywordId,
    results: &[SearchResultRecord],
) -> Result<u64> {
    let mut inserted = 0;

    for r in results {
        let warnings = serde_json::to_string(&r.parse_warnings)?;
        inserted += sqlx::query(
            "INSERT OR IGNORE INTO search_results (
                 search_run_id, keyword_id, item_id, title, price, currency, shipping_price,
                 stock_quantity, seller_name, seller_rating, seller_feedback_count,
                 auction_end_time, listing_type, condition, is_buy_it_now, bids_count,
                 item_url, image_url, parse_warnings, captured_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id.get())
        .bind(keyword_id.get())
        .bind(r.item_id.as_str())
        .bind(r.title.as_deref())
        .bind(r.price)
        .bind(r.currency.as_deref())
        .bind(r.shipping_price)
        .bind(r.stock_quantity)
        .bind(r.seller_name.as_deref())
        .bind(r.seller_rating)
        .bind(r.seller_feedback_count)
        .bind(r.auction_end_time.as_ref().map(encode_time))
        .bind(r.listing_type.as_str())
        .bind(r.condition.as_deref())
        .bind(r.is_buy_it_now)
        .bind(r.bids_count)
        .bind(r.item_url.as_deref())
        .bind(r.image_url.as_deref())
        .bind(&warnings)
        .bind(encode_time(&r.captured_at))
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }

    Ok(inserted)
}

/// Query stored results, oldest capture first.
pub async fn query_results(
    pool: &Pool<Sqlite>,
    filter: &ResultFilter,
) -> Result<Vec<StoredSearchResult>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, search_run_id, keyword_id, item_id, title, price, currency, shipping_price,
                stock_quantity, seller_name, seller_rating, seller_feedback_count,
                auction_end_time, listing_type, condition, is_buy_it_now, bids_count,
                item_url, image_url, parse_warnings, captured_at
         FROM search_results WHERE 1 = 1",
    );

    if let Some(run) = filter.run {
        qb.push(" AND search_run_id = ").push_bind(run.get());
    }
    if !filter.keyword_ids.is_empty() {
        qb.push(" AND keyword_id IN (");
        let mut separated = qb.separated(", ");
        for id in &filter.keyword_ids {
            separated.push_bind(id.get());
        }
        separated.push_unseparated(")");
    }
    if let Some(from) = filter.captured_from {
        qb.push(" AND captured_at >= ").push_bind(encode_time(&from));
    }
    if let Some(to) = filter.captured_to {
        qb.push(" AND captured_at <= ").push_bind(encode_time(&to));
    }
    if let Some(min) = filter.min_price {
        qb.push(" AND price >= ").push_bind(min);
    }
    if let Some(max) = filter.max_price {
        qb.push(" AND price <= ").push_bind(max);
    }
    qb.push(" ORDER BY captured_at, id");
    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ").push_bind(i64::from(limit));
    }

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(parse_result_row).collect()
}

fn parse_result_row(row: &SqliteRow) -> Result<StoredSearchResult> {
    let item_id: String = row.try_get("item_id")?;
    let listing_type: String = row.try_get("listing_type")?;
    let warnings: String = row.try_get("parse_warnings")?;
    let captured_at: String = row.try_get("captured_at")?;

    let result = SearchResultRecord {
        item_id: ItemId::new(item_id).map_err(|e| DatabaseError::Decode(e.to_string()))?,
        title: row.try_get("title")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        shipping_price: row.try_get("shipping_price")?,
        stock_quantity: row.try_get("stock_quantity")?,
        seller_name: row.try_get("seller_name")?,
        seller_rating: row.try_get("seller_rating")?,
        seller_feedback_count: row.try_get("seller_feedback_count")?,
        auction_end_time: decode_opt_time(row.try_get("auction_end_time")?)?,
        listing_type: ListingType::parse(&listing_type),
        condition: row.try_get("condition")?,
        is_buy_it_now: row.try_get("is_buy_it_now")?,
        bids_count: row.try_get("bids_count")?,
        item_url: row.try_get("item_url")?,
        image_url: row.try_get("image_url")?,
        parse_warnings: serde_json::from_str(&warnings)?,
        captured_at: decode_time(&captured_at)?,
    };

    Ok(StoredSearchResult {
        id: row.try_get("id")?,
        search_run_id: RunId::new(row.try_get("search_run_id")?),
        keyword_id: KeywordId::new(row.try_get("keyword_id")?),
        result,
    })
}
