use crate::error::{Result, SearchError};
use lotwatch_core::SearchFilterConfig;
use url::Url;

const SEARCH_PATH: &str = "/sch/i.html";

/// Build the first-page search URL for a keyword.
///
/// `category` is only sent when it is a numeric marketplace category id; free-text categories
/// are for local grouping and ordering.
pub fn build_search_url(
    base_url: &str,
    keyword: &str,
    category: Option<&str>,
    filters: &SearchFilterConfig,
) -> Result<String> {
    let mut url = Url::parse(base_url)
        .and_then(|base| base.join(SEARCH_PATH))
        .map_err(|e| SearchError::InvalidUrl(format!("{base_url}: {e}")))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("_nkw", keyword.trim());

        if let Some(category) = category.map(str::trim) {
            if !category.is_empty() && category.chars().all(|c| c.is_ascii_digit()) {
                query.append_pair("_sacat", category);
            }
        }

        if let Some(min) = filters.min_price {
            query.append_pair("_udlo", &min.to_string());
        }
        if let Some(max) = filters.max_price {
            query.append_pair("_udhi", &max.to_string());
        }

        match filters.listing_type.as_deref().map(str::to_lowercase).as_deref() {
            Some("auction") => {
                query.append_pair("LH_Auction", "1");
            }
            Some("fixed" | "fixed_price" | "buy_it_now") => {
                query.append_pair("LH_BIN", "1");
            }
            _ => {}
        }

        match filters.condition.as_deref().map(str::to_lowercase).as_deref() {
            Some("new") => {
                query.append_pair("LH_ItemCondition", "1000");
            }
            Some("used") => {
                query.append_pair("LH_ItemCondition", "3000");
            }
            _ => {}
        }
    }

    Ok(url.into())
}

/// URL of result page `page` (1-based) for a first-page search URL.
pub fn page_url(search_url: &str, page: u32) -> Result<String> {
    if page <= 1 {
        return Ok(search_url.to_string());
    }
    let mut url =
        Url::parse(search_url).map_err(|e| SearchError::InvalidUrl(format!("{search_url}: {e}")))?;
    url.query_pairs_mut().append_pair("_pgn", &page.to_string());
    Ok(url.into())
}
