//! Configuration management for lotwatch.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/lotwatch/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used. A loaded config is treated as an
/// immutable snapshot for the duration of a search run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General application settings
    pub general: GeneralConfig,
    /// Database location and pool settings
    pub database: DatabaseConfig,
    /// Target marketplace settings
    pub marketplace: MarketplaceConfig,
    /// Search, retry and throttling behavior
    pub search: SearchConfig,
    /// Browser automation settings
    pub browser: BrowserConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, falling back to defaults if not found.
    pub fn load_from(config_path: &std::path::Path) -> ConfigResult<Self> {
        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `LOTWATCH_CONCURRENCY`: Override `search.concurrency_limit`
    /// - `LOTWATCH_PAGE_LIMIT`: Override `search.page_limit`
    /// - `LOTWATCH_HEADLESS`: Override browser headless mode (true/false)
    /// - `LOTWATCH_DB_PATH`: Override the database file location
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup. Unparsable values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("LOTWATCH_CONCURRENCY") {
            if let Ok(limit) = val.parse() {
                self.search.concurrency_limit = limit;
                tracing::debug!("Override search.concurrency_limit from env: {}", limit);
            }
        }

        if let Some(val) = lookup("LOTWATCH_PAGE_LIMIT") {
            if let Ok(pages) = val.parse() {
                self.search.page_limit = pages;
                tracing::debug!("Override search.page_limit from env: {}", pages);
            }
        }

        if let Some(val) = lookup("LOTWATCH_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Some(val) = lookup("LOTWATCH_DB_PATH") {
            if !val.is_empty() {
                tracing::debug!("Override database.path from env: {}", val);
                self.database.path = Some(PathBuf::from(val));
            }
        }

        if let Some(val) = lookup("LOTWATCH_CAPTURE_DIR") {
            if !val.is_empty() {
                tracing::debug!("Override search.capture_dir from env: {}", val);
                self.search.capture_dir = Some(PathBuf::from(val));
            }
        }
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        let s = &self.search;
        if s.concurrency_limit < 1 {
            return Err(invalid("search.concurrency_limit", "must be at least 1"));
        }
        if s.max_attempts_per_keyword < 1 {
            return Err(invalid("search.max_attempts_per_keyword", "must be at least 1"));
        }
        if s.page_limit < 1 {
            return Err(invalid("search.page_limit", "must be at least 1"));
        }
        if s.backoff_max_ms < s.backoff_base_ms {
            return Err(invalid(
                "search.backoff_max_ms",
                "must not be lower than search.backoff_base_ms",
            ));
        }
        if !s.backoff_multiplier.is_finite() || s.backoff_multiplier < 1.0 {
            return Err(invalid("search.backoff_multiplier", "must be a finite value >= 1.0"));
        }
        if s.request_timeout_secs == 0 {
            return Err(invalid("search.request_timeout_secs", "must be at least 1"));
        }
        if s.attempt_timeout_secs == 0 {
            return Err(invalid("search.attempt_timeout_secs", "must be at least 1"));
        }
        if s.throttle_threshold < 1 {
            return Err(invalid("search.throttle_threshold", "must be at least 1"));
        }
        if let (Some(min), Some(max)) = (s.filters.min_price, s.filters.max_price) {
            if min > max {
                return Err(invalid("search.filters.min_price", "must not exceed max_price"));
            }
        }

        let base = &self.marketplace.base_url;
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(invalid("marketplace.base_url", "must be an http(s) URL"));
        }
        if self.marketplace.service_name.trim().is_empty() {
            return Err(invalid("marketplace.service_name", "must not be empty"));
        }

        if self.database.max_connections < 1 {
            return Err(invalid("database.max_connections", "must be at least 1"));
        }
        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| invalid("config_path", "no parent directory"))?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/lotwatch/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "lotwatch", "lotwatch").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/lotwatch`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "lotwatch", "lotwatch").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Resolve the database file: the configured path or `<data_dir>/lotwatch.db`.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("lotwatch.db")),
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,lotwatch=debug".to_string(),
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file; defaults to `<data_dir>/lotwatch.db`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Maximum pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
        }
    }
}

/// Target marketplace settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Storefront root, e.g. `https://www.ebay.com`
    pub base_url: String,
    /// Service name handed to the credential provider
    pub service_name: String,
    /// Sign in before searching
    pub require_login: bool,
    /// Environment variable holding the account identity
    pub identity_env: String,
    /// Environment variable holding the account secret
    pub secret_env: String,
    /// CSS selectors for result pages and the sign-in form
    pub selectors: SelectorConfig,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.ebay.com".to_string(),
            service_name: "ebay".to_string(),
            require_login: false,
            identity_env: "EBAY_USERNAME".to_string(),
            secret_env: "EBAY_PASSWORD".to_string(),
            selectors: SelectorConfig::default(),
        }
    }
}

/// CSS selectors used to read search result pages.
///
/// Defaults match the eBay search result layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Container present on every result page
    pub results_container: String,
    /// Marker shown when a search has zero matches
    pub no_results: String,
    /// One result card
    pub item: String,
    /// Sponsored placeholder card (skipped)
    pub sponsored: String,
    /// Item link carrying `/itm/<id>`
    pub link: String,
    /// Listing title
    pub title: String,
    /// Price text
    pub price: String,
    /// Shipping text
    pub shipping: String,
    /// `name (feedback) pct%` seller line
    pub seller: String,
    /// Bid count
    pub bids: String,
    /// Condition subtitle
    pub condition: String,
    /// Buy It Now badge
    pub buy_it_now: String,
    /// `1d 2h left` countdown
    pub time_left: String,
    /// Quantity line, e.g. `5 available`
    pub stock: String,
    /// Thumbnail image
    pub image: String,
    /// Pagination entries; the last numeric one is the page count
    pub pagination_item: String,
    /// Bot-challenge widgets
    pub captcha: String,
    /// Sign-in identity input
    pub login_identity: String,
    /// Sign-in continue button
    pub login_continue: String,
    /// Sign-in secret input
    pub login_secret: String,
    /// Sign-in submit button
    pub login_submit: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            results_container: ".srp-results".to_string(),
            no_results: ".srp-save-null-search".to_string(),
            item: "li.s-item".to_string(),
            sponsored: ".s-item__info-col .s-item__title--tagblock".to_string(),
            link: ".s-item__link".to_string(),
            title: ".s-item__title".to_string(),
            price: ".s-item__price".to_string(),
            shipping: ".s-item__shipping".to_string(),
            seller: ".s-item__seller-info-text".to_string(),
            bids: ".s-item__bids".to_string(),
            condition: ".s-item__subtitle".to_string(),
            buy_it_now: ".s-item__dynamic.s-item__buyItNowOption".to_string(),
            time_left: ".s-item__time-left".to_string(),
            stock: ".s-item__availability".to_string(),
            image: ".s-item__image-wrapper > img".to_string(),
            pagination_item: ".pagination__item".to_string(),
            captcha: "#captcha_loading, .g-recaptcha, #px-captcha, iframe[src*=\"captcha\"]"
                .to_string(),
            login_identity: "#userid".to_string(),
            login_continue: "#signin-continue-btn".to_string(),
            login_secret: "#pass".to_string(),
            login_submit: "#sgnBt".to_string(),
        }
    }
}

/// Keyword processing order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordOrder {
    /// FIFO by import order
    #[default]
    Import,
    /// Keywords in `priority_categories` first, then the rest, each stable
    CategoryFirst,
    /// Never-searched first, then oldest `last_searched_at`
    LeastRecentlySearched,
}

/// Optional search URL filters applied to every keyword.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilterConfig {
    /// `new` or `used`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// `auction` or `fixed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_type: Option<String>,
    /// Lower price bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    /// Upper price bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
}

/// Search, retry and throttling behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of parallel workers
    pub concurrency_limit: usize,
    /// Attempts per keyword before it is marked failed
    pub max_attempts_per_keyword: u32,
    /// First retry delay
    pub backoff_base_ms: u64,
    /// Retry delay ceiling
    pub backoff_max_ms: u64,
    /// Growth factor between retries
    pub backoff_multiplier: f64,
    /// Upper bound of the uniform random jitter added to every wait
    pub jitter_ms: u64,
    /// Result pages fetched per keyword
    pub page_limit: u32,
    /// Pause between consecutive requests of one session
    pub page_delay_ms: u64,
    /// Per request navigation timeout
    pub request_timeout_secs: u64,
    /// Hard wall-clock limit for one keyword attempt
    pub attempt_timeout_secs: u64,
    /// Time in-flight keywords get to finish after cancellation
    pub cancel_grace_secs: u64,
    /// Batch-wide pause after a challenge
    pub challenge_pause_secs: u64,
    /// How long a worker waits for a remediation signal after a challenge
    pub challenge_wait_secs: u64,
    /// Window in which throttling signals are counted
    pub throttle_window_secs: u64,
    /// Distinct keywords signalling within the window that halve concurrency
    pub throttle_threshold: usize,
    /// Consecutive successes before concurrency grows back by one
    pub recovery_successes: u32,
    /// Processing order
    pub order: KeywordOrder,
    /// Categories served first under `category_first`
    pub priority_categories: Vec<String>,
    /// URL filters
    pub filters: SearchFilterConfig,
    /// Where page captures are written when a keyword hits a challenge or schema drift
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_dir: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 3,
            max_attempts_per_keyword: 3,
            backoff_base_ms: 2000,
            backoff_max_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_ms: 1500,
            page_limit: 2,
            page_delay_ms: 2000,
            request_timeout_secs: 30,
            attempt_timeout_secs: 180,
            cancel_grace_secs: 10,
            challenge_pause_secs: 120,
            challenge_wait_secs: 300,
            throttle_window_secs: 60,
            throttle_threshold: 2,
            recovery_successes: 10,
            order: KeywordOrder::Import,
            priority_categories: Vec::new(),
            filters: SearchFilterConfig::default(),
            capture_dir: None,
        }
    }
}

impl SearchConfig {
    /// Per request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Hard per-attempt timeout.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Cancellation grace period.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    /// Batch pause after a challenge.
    #[must_use]
    pub fn challenge_pause(&self) -> Duration {
        Duration::from_secs(self.challenge_pause_secs)
    }

    /// Remediation wait after a challenge.
    #[must_use]
    pub fn challenge_wait(&self) -> Duration {
        Duration::from_secs(self.challenge_wait_secs)
    }

    /// Throttling signal window.
    #[must_use]
    pub fn throttle_window(&self) -> Duration {
        Duration::from_secs(self.throttle_window_secs)
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Fixed user agent; a random one is chosen per session when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 800,
            user_agent: None,
        }
    }
}
