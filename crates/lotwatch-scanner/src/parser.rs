//! Extraction pipeline: turns a search results page into listing records.
//!
//! Extraction is pure. It never touches the network or the clock; auction end times are
//! computed from the page's capture timestamp so the same page always yields the same records.
//!
//! `scraper::Html` is not `Send`, so a [`ParsedPage`] must be consumed before the caller
//! awaits anything.

use crate::error::ExtractError;
use chrono::{DateTime, Utc};
use lotwatch_browser::RawPage;
use lotwatch_core::{ItemId, ListingType, ParseWarning, SelectorConfig};
use lotwatch_db::SearchResultRecord;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

/// Longest title accepted before the field is demoted.
pub const MAX_TITLE_LEN: usize = 512;

/// Largest price or shipping amount accepted before the field is demoted.
pub const MAX_AMOUNT: f64 = 10_000_000.0;

/// Title eBay gives the placeholder card at the top of every result list.
const PLACEHOLDER_TITLE: &str = "Shop on eBay";

const TITLE_PREFIXES: &[&str] = &["New Listing", "NEW LISTING"];

const CHALLENGE_MARKERS: &[&str] = &[
    "Pardon Our Interruption",
    "Security Measure",
    "verify you are a human",
    "Checking your browser",
];

const RATE_LIMIT_MARKERS: &[&str] = &["Too Many Requests", "Error 429", "rate limit exceeded"];

/// Currency markers, most specific first.
const CURRENCY_MARKERS: &[(&str, &str)] = &[
    ("AU $", "AUD"),
    ("AU$", "AUD"),
    ("AUD", "AUD"),
    ("C $", "CAD"),
    ("C$", "CAD"),
    ("CAD", "CAD"),
    ("US $", "USD"),
    ("US$", "USD"),
    ("USD", "USD"),
    ("GBP", "GBP"),
    ("£", "GBP"),
    ("EUR", "EUR"),
    ("€", "EUR"),
    ("JPY", "JPY"),
    ("円", "JPY"),
    ("¥", "JPY"),
    ("$", "USD"),
];

/// A field that may be absent from the card, or present but unreadable.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    /// Parsed and validated
    Value(T),
    /// The card does not show this field
    Missing,
    /// The card shows the field but it could not be read; see the listing's warnings
    Unavailable,
}

impl<T> Field<T> {
    /// Borrow the value if there is one.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Missing | Self::Unavailable => None,
        }
    }

    /// Take the value if there is one.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Missing | Self::Unavailable => None,
        }
    }

    /// Whether the field was present but unreadable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

/// An amount with its ISO currency code.
#[derive(Debug, Clone, PartialEq)]
pub struct Price {
    pub amount: f64,
    pub currency: Option<String>,
}

/// Seller line: `name (feedback) pct%`.
#[derive(Debug, Clone, PartialEq)]
pub struct Seller {
    pub name: String,
    pub feedback_count: Option<i64>,
    /// Positive feedback as a ratio in `0..=1`
    pub rating: Option<f64>,
}

/// One listing read from a result card.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub item_id: ItemId,
    pub item_url: Option<String>,
    pub title: Field<String>,
    pub price: Field<Price>,
    pub shipping: Field<f64>,
    pub stock_quantity: Field<i64>,
    pub seller: Field<Seller>,
    pub bids: Field<i64>,
    pub condition: Field<String>,
    pub listing_type: ListingType,
    pub buy_it_now: bool,
    pub auction_end: Field<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub warnings: Vec<ParseWarning>,
    pub captured_at: DateTime<Utc>,
}

impl Listing {
    /// Convert to the persisted form.
    #[must_use]
    pub fn into_record(self) -> SearchResultRecord {
        let mut record = SearchResultRecord::new(self.item_id, self.captured_at);
        record.title = self.title.into_option();
        if let Some(price) = self.price.into_option() {
            record.price = Some(price.amount);
            record.currency = price.currency;
        }
        record.shipping_price = self.shipping.into_option();
        record.stock_quantity = self.stock_quantity.into_option();
        if let Some(seller) = self.seller.into_option() {
            record.seller_name = Some(seller.name);
            record.seller_rating = seller.rating;
            record.seller_feedback_count = seller.feedback_count;
        }
        record.bids_count = self.bids.into_option();
        record.condition = self.condition.into_option();
        record.listing_type = self.listing_type;
        record.is_buy_it_now = self.buy_it_now;
        record.auction_end_time = self.auction_end.into_option();
        record.item_url = self.item_url;
        record.image_url = self.image_url;
        record.parse_warnings = self.warnings;
        record
    }
}

/// What one result card turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Card {
    Listing(Box<Listing>),
    /// Sponsored or placeholder card
    Sponsored,
    /// No usable item id; cannot be keyed
    Unkeyed,
}

impl Card {
    /// The listing, if the card held one.
    pub fn into_listing(self) -> Option<Listing> {
        match self {
            Self::Listing(listing) => Some(*listing),
            Self::Sponsored | Self::Unkeyed => None,
        }
    }
}

/// How the site answered, independent of listing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSignal {
    Content,
    Challenge,
    RateLimited,
}

/// Everything extracted from one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub listings: Vec<Listing>,
    /// Cards skipped for lack of an item id
    pub skipped: usize,
    /// Sponsored and placeholder cards ignored
    pub sponsored: usize,
    /// The site reported no matches
    pub no_results: bool,
    /// Result pages reported by the pagination bar
    pub page_count: u32,
}

impl Extraction {
    /// Convert all listings to persisted records.
    #[must_use]
    pub fn into_records(self) -> Vec<SearchResultRecord> {
        self.listings.into_iter().map(Listing::into_record).collect()
    }
}

/// Cheap summary used while fetching, before full extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInspection {
    pub signal: PageSignal,
    pub page_count: u32,
}

struct CompiledSelectors {
    results_container: Selector,
    no_results: Selector,
    item: Selector,
    sponsored: Selector,
    link: Selector,
    title: Selector,
    price: Selector,
    shipping: Selector,
    seller: Selector,
    bids: Selector,
    condition: Selector,
    buy_it_now: Selector,
    time_left: Selector,
    stock: Selector,
    image: Selector,
    pagination_item: Selector,
    captcha: Selector,
    page_title: Selector,
}

fn compile(name: &str, css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::InvalidSelector {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

impl CompiledSelectors {
    fn new(config: &SelectorConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            results_container: compile("results_container", &config.results_container)?,
            no_results: compile("no_results", &config.no_results)?,
            item: compile("item", &config.item)?,
            sponsored: compile("sponsored", &config.sponsored)?,
            link: compile("link", &config.link)?,
            title: compile("title", &config.title)?,
            price: compile("price", &config.price)?,
            shipping: compile("shipping", &config.shipping)?,
            seller: compile("seller", &config.seller)?,
            bids: compile("bids", &config.bids)?,
            condition: compile("condition", &config.condition)?,
            buy_it_now: compile("buy_it_now", &config.buy_it_now)?,
            time_left: compile("time_left", &config.time_left)?,
            stock: compile("stock", &config.stock)?,
            image: compile("image", &config.image)?,
            pagination_item: compile("pagination_item", &config.pagination_item)?,
            captcha: compile("captcha", &config.captcha)?,
            page_title: compile("page_title", "title, h1")?,
        })
    }
}

/// Compiled selectors plus the site base URL.
pub struct ExtractionPipeline {
    selectors: CompiledSelectors,
    base_url: String,
}

impl std::fmt::Debug for ExtractionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionPipeline")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ExtractionPipeline {
    /// Compile the configured selectors.
    ///
    /// # Errors
    /// Returns `ExtractError::InvalidSelector` naming the first selector that does not parse.
    pub fn new(selectors: &SelectorConfig, base_url: &str) -> Result<Self, ExtractError> {
        Ok(Self {
            selectors: CompiledSelectors::new(selectors)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Parse a page for lazy inspection.
    pub fn parse<'p>(&'p self, page: &'p RawPage) -> ParsedPage<'p> {
        ParsedPage {
            pipeline: self,
            page,
            document: Html::parse_document(&page.html),
        }
    }

    /// Extract every listing on the page.
    ///
    /// # Errors
    /// Returns `ExtractError::SchemaDrift` when the page no longer looks like a result page.
    pub fn extract(&self, page: &RawPage) -> Result<Extraction, ExtractError> {
        self.parse(page).extract()
    }

    /// Classify how the site answered.
    pub fn classify_page(&self, page: &RawPage) -> PageSignal {
        self.parse(page).signal()
    }

    /// Signal and page count in one parse.
    pub fn inspect(&self, page: &RawPage) -> PageInspection {
        let parsed = self.parse(page);
        PageInspection {
            signal: parsed.signal(),
            page_count: parsed.page_count(),
        }
    }
}

/// A parsed result page. Not `Send`; do not hold across an await.
pub struct ParsedPage<'p> {
    pipeline: &'p ExtractionPipeline,
    page: &'p RawPage,
    document: Html,
}

impl ParsedPage<'_> {
    fn sel(&self) -> &CompiledSelectors {
        &self.pipeline.selectors
    }

    /// How the site answered.
    pub fn signal(&self) -> PageSignal {
        if self.page.status == Some(429) {
            return PageSignal::RateLimited;
        }
        if is_challenge_url(&self.page.url) {
            return PageSignal::Challenge;
        }
        if self.document.select(&self.sel().captcha).next().is_some() {
            return PageSignal::Challenge;
        }

        let headings: Vec<String> = self
            .document
            .select(&self.sel().page_title)
            .map(|el| clean_text(&el.text().collect::<String>()))
            .collect();
        let mentions = |markers: &[&str]| {
            headings.iter().any(|heading| {
                let lowered = heading.to_lowercase();
                markers
                    .iter()
                    .any(|marker| lowered.contains(&marker.to_lowercase()))
            })
        };

        if mentions(CHALLENGE_MARKERS) {
            PageSignal::Challenge
        } else if mentions(RATE_LIMIT_MARKERS) {
            PageSignal::RateLimited
        } else {
            PageSignal::Content
        }
    }

    /// Highest page number in the pagination bar; 1 when there is none.
    pub fn page_count(&self) -> u32 {
        self.document
            .select(&self.sel().pagination_item)
            .filter_map(|el| clean_text(&el.text().collect::<String>()).parse::<u32>().ok())
            .max()
            .unwrap_or(1)
            .max(1)
    }

    /// Whether the site reported no matches.
    pub fn has_no_results(&self) -> bool {
        self.document.select(&self.sel().no_results).next().is_some()
    }

    fn has_container(&self) -> bool {
        self.document
            .select(&self.sel().results_container)
            .next()
            .is_some()
    }

    /// Iterate over result cards in document order.
    pub fn cards(&self) -> impl Iterator<Item = Card> + '_ {
        self.document
            .select(&self.sel().item)
            .map(move |card| self.read_card(card))
    }

    /// Iterate over usable listings in document order.
    pub fn listings(&self) -> impl Iterator<Item = Listing> + '_ {
        self.cards().filter_map(Card::into_listing)
    }

    /// Collect the page.
    ///
    /// # Errors
    /// Returns `ExtractError::SchemaDrift` when the results container is gone without a
    /// no-results notice, or when cards are present but none carries an item id.
    pub fn extract(&self) -> Result<Extraction, ExtractError> {
        let no_results = self.has_no_results();
        let page_count = self.page_count();

        if no_results {
            return Ok(Extraction {
                no_results: true,
                page_count,
                ..Extraction::default()
            });
        }
        if !self.has_container() {
            return Err(ExtractError::SchemaDrift {
                reason: "results container not found".to_string(),
            });
        }

        let mut extraction = Extraction {
            page_count,
            ..Extraction::default()
        };
        for card in self.cards() {
            match card {
                Card::Listing(listing) => extraction.listings.push(*listing),
                Card::Sponsored => extraction.sponsored += 1,
                Card::Unkeyed => extraction.skipped += 1,
            }
        }

        if extraction.listings.is_empty() && extraction.skipped > 0 {
            return Err(ExtractError::SchemaDrift {
                reason: format!(
                    "{} result cards but none with an item id",
                    extraction.skipped
                ),
            });
        }
        if extraction.skipped > 0 {
            tracing::debug!(
                "Skipped {} cards without item id on {}",
                extraction.skipped,
                self.page.url
            );
        }

        Ok(extraction)
    }

    fn read_card(&self, card: ElementRef<'_>) -> Card {
        let sel = self.sel();

        if card.select(&sel.sponsored).next().is_some() {
            return Card::Sponsored;
        }
        let raw_title = first_text(card, &sel.title);
        if raw_title.as_deref() == Some(PLACEHOLDER_TITLE) {
            return Card::Sponsored;
        }

        let href = card
            .select(&sel.link)
            .next()
            .and_then(|el| el.value().attr("href"));
        let item_id = href
            .and_then(item_id_from_url)
            .or_else(|| {
                card.value()
                    .attr("data-listingid")
                    .and_then(|id| ItemId::new(id.trim()).ok())
            });
        let Some(item_id) = item_id else {
            return Card::Unkeyed;
        };

        let mut warnings = Vec::new();

        let title = match raw_title.map(strip_title_prefix) {
            None => Field::Missing,
            Some(t) if t.is_empty() => Field::Missing,
            Some(t) if t.chars().count() > MAX_TITLE_LEN => {
                warnings.push(ParseWarning::new("title", &t, "longer than 512 characters"));
                Field::Unavailable
            }
            Some(t) => Field::Value(t),
        };

        let price = match first_text(card, &sel.price) {
            None => Field::Missing,
            Some(raw) => match parse_price(&raw) {
                Some(p) if (0.0..=MAX_AMOUNT).contains(&p.amount) => Field::Value(p),
                Some(_) => {
                    warnings.push(ParseWarning::new("price", &raw, "out of range"));
                    Field::Unavailable
                }
                None => {
                    warnings.push(ParseWarning::new("price", &raw, "no amount"));
                    Field::Unavailable
                }
            },
        };

        let shipping = match first_text(card, &sel.shipping) {
            None => Field::Missing,
            Some(raw) => match parse_shipping(&raw) {
                Some(v) if (0.0..=MAX_AMOUNT).contains(&v) => Field::Value(v),
                Some(_) => {
                    warnings.push(ParseWarning::new("shipping", &raw, "out of range"));
                    Field::Unavailable
                }
                None => {
                    warnings.push(ParseWarning::new("shipping", &raw, "no amount"));
                    Field::Unavailable
                }
            },
        };

        let stock_quantity = match first_text(card, &sel.stock) {
            // Cards only show availability when it is limited
            None => Field::Value(1),
            Some(raw) => match parse_stock(&raw) {
                Some(n) if n >= 0 => Field::Value(n),
                _ => {
                    warnings.push(ParseWarning::new("stock_quantity", &raw, "unrecognized"));
                    Field::Unavailable
                }
            },
        };

        let seller = match first_text(card, &sel.seller) {
            None => Field::Missing,
            Some(raw) => match parse_seller(&raw) {
                Some(mut seller) => {
                    if seller.rating.is_some_and(|r| !(0.0..=1.0).contains(&r)) {
                        warnings.push(ParseWarning::new("seller_rating", &raw, "out of range"));
                        seller.rating = None;
                    }
                    Field::Value(seller)
                }
                None => {
                    warnings.push(ParseWarning::new("seller", &raw, "unrecognized format"));
                    Field::Unavailable
                }
            },
        };

        let bids = match first_text(card, &sel.bids) {
            None => Field::Value(0),
            Some(raw) => match parse_bids(&raw) {
                Some(n) => Field::Value(n),
                None => {
                    warnings.push(ParseWarning::new("bids", &raw, "no count"));
                    Field::Unavailable
                }
            },
        };

        let condition = first_text(card, &sel.condition).map_or(Field::Missing, Field::Value);

        let time_left = first_text(card, &sel.time_left);
        let auction_end = match &time_left {
            None => Field::Missing,
            Some(raw) => match parse_time_left(raw) {
                Some(left) => match self.page.captured_at.checked_add_signed(left) {
                    Some(end) => Field::Value(end),
                    None => {
                        warnings.push(ParseWarning::new(
                            "auction_end_time",
                            raw,
                            "end time out of range",
                        ));
                        Field::Unavailable
                    }
                },
                None => {
                    warnings.push(ParseWarning::new("auction_end_time", raw, "unrecognized"));
                    Field::Unavailable
                }
            },
        };

        let has_bin_badge = card.select(&sel.buy_it_now).next().is_some();
        let has_bids = bids.value().is_some_and(|n| *n > 0);
        let listing_type = if has_bids || time_left.is_some() {
            ListingType::Auction
        } else if has_bin_badge {
            ListingType::FixedPrice
        } else {
            ListingType::Unknown
        };

        let image_url = card.select(&sel.image).next().and_then(|img| {
            img.value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"))
                .map(|src| self.absolute_url(src))
        });

        Card::Listing(Box::new(Listing {
            item_id,
            item_url: href.map(|h| self.absolute_url(h)),
            title,
            price,
            shipping,
            stock_quantity,
            seller,
            bids,
            condition,
            listing_type,
            buy_it_now: has_bin_badge,
            auction_end,
            image_url,
            warnings,
            captured_at: self.page.captured_at,
        }))
    }

    fn absolute_url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else if let Some(rest) = href.strip_prefix("//") {
            format!("https://{rest}")
        } else {
            format!(
                "{}/{}",
                self.pipeline.base_url,
                href.trim_start_matches('/')
            )
        }
    }
}

fn first_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    card.select(selector)
        .next()
        .map(|el| clean_text(&el.text().collect::<String>()))
        .filter(|text| !text.is_empty())
}

fn item_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/itm/(?:[^/?#]+/)?(\d{6,20})").expect("valid regex"))
}

fn amount_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d[\d.,]*").expect("valid regex"))
}

fn seller_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>.+?)\s*\((?P<count>[\d.,]+[Kk]?)\)\s*(?P<pct>[\d.,]+)\s*%")
            .expect("valid regex")
    })
}

fn seller_positive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>\S+)\s+(?P<pct>[\d.,]+)\s*%\s*positive\s*\((?P<count>[\d.,]+[Kk]?)\)")
            .expect("valid regex")
    })
}

fn bids_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d[\d,]*)\s*bids?\b").expect("valid regex"))
}

fn time_left_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*([dhms])\b").expect("valid regex"))
}

fn stock_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d[\d,]*)\s+available").expect("valid regex"))
}

fn markup_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]{1,200}>").expect("valid regex"))
}

/// Pull the item id out of a listing URL.
pub fn item_id_from_url(href: &str) -> Option<ItemId> {
    item_id_regex()
        .captures(href)
        .and_then(|caps| ItemId::new(&caps[1]).ok())
}

fn is_challenge_url(url: &str) -> bool {
    let lowered = url.to_lowercase();
    lowered.contains("/splashui/captcha") || lowered.contains("/captcha")
}

/// Strip zero-width characters, stray markup and entities, and collapse whitespace.
pub fn clean_text(raw: &str) -> String {
    let without_markup = markup_regex().replace_all(raw, " ");
    let decoded = without_markup
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    decoded
        .chars()
        .filter(|c| !matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{feff}'))
        .map(|c| if c == '\u{a0}' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_title_prefix(title: String) -> String {
    for prefix in TITLE_PREFIXES {
        if let Some(rest) = title.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    title
}

/// Currency code for the first marker found in `raw`.
pub fn detect_currency(raw: &str) -> Option<&'static str> {
    CURRENCY_MARKERS
        .iter()
        .find(|(marker, _)| raw.contains(marker))
        .map(|(_, code)| *code)
}

/// First number in `raw`, with thousands and decimal separators resolved.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let token = amount_regex()
        .find(raw)?
        .as_str()
        .trim_end_matches(['.', ',']);

    let normalized = match (token.rfind(','), token.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => token.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => token.replace(',', ""),
        (Some(comma), None) => {
            let decimals = token.len() - comma - 1;
            if token.matches(',').count() == 1 && decimals != 3 {
                token.replace(',', ".")
            } else {
                token.replace(',', "")
            }
        }
        (None, Some(_)) if token.matches('.').count() > 1 => token.replace('.', ""),
        _ => token.to_string(),
    };

    normalized.parse::<f64>().ok()
}

/// Price with currency; ranges such as `$10.00 to $25.00` yield the lower bound.
pub fn parse_price(raw: &str) -> Option<Price> {
    Some(Price {
        amount: parse_amount(raw)?,
        currency: detect_currency(raw).map(str::to_string),
    })
}

/// Shipping cost; any mention of free shipping is zero.
pub fn parse_shipping(raw: &str) -> Option<f64> {
    if raw.to_lowercase().contains("free") {
        return Some(0.0);
    }
    parse_amount(raw)
}

/// Counts such as `1,234` or `1.2K`.
fn parse_count(raw: &str) -> Option<i64> {
    let (digits, factor) = match raw.strip_suffix(['K', 'k']) {
        Some(rest) => (rest, 1000.0),
        None => (raw, 1.0),
    };
    if factor > 1.0 {
        let value: f64 = digits.replace(',', "").parse().ok()?;
        #[allow(clippy::cast_possible_truncation)]
        return Some((value * factor).round() as i64);
    }
    digits.replace([',', '.'], "").parse().ok()
}

/// Seller line in either `name (1,234) 99.5%` or `name 99.5% positive (1.2K)` form.
pub fn parse_seller(raw: &str) -> Option<Seller> {
    let caps = seller_regex()
        .captures(raw)
        .or_else(|| seller_positive_regex().captures(raw))?;
    let name = caps["name"].trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some(Seller {
        name,
        feedback_count: parse_count(&caps["count"]),
        rating: parse_amount(&caps["pct"]).map(|pct| pct / 100.0),
    })
}

/// Bid count from `3 bids`.
pub fn parse_bids(raw: &str) -> Option<i64> {
    let caps = bids_regex().captures(raw)?;
    caps[1].replace(',', "").parse().ok()
}

/// Remaining time from `1d 2h left`, `5m 30s`, and similar.
pub fn parse_time_left(raw: &str) -> Option<chrono::Duration> {
    let mut total = chrono::Duration::zero();
    let mut matched = false;
    for caps in time_left_regex().captures_iter(raw) {
        let value: i64 = caps[1].parse().ok()?;
        let part = match &caps[2] {
            "d" => chrono::Duration::try_days(value)?,
            "h" => chrono::Duration::try_hours(value)?,
            "m" => chrono::Duration::try_minutes(value)?,
            _ => chrono::Duration::try_seconds(value)?,
        };
        total = total.checked_add(&part)?;
        matched = true;
    }
    matched.then_some(total)
}

/// Units available from `5 available`, `More than 10 available`, `Last one`.
pub fn parse_stock(raw: &str) -> Option<i64> {
    if let Some(caps) = stock_regex().captures(raw) {
        return caps[1].replace(',', "").parse().ok();
    }
    let lowered = raw.to_lowercase();
    if lowered.contains("last one") || lowered.contains("last item") {
        Some(1)
    } else if lowered.contains("sold out") || lowered.contains("out of stock") {
        Some(0)
    } else {
        None
    }
}
