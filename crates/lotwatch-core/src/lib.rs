//! Lotwatch Core - Foundation crate for the lotwatch listing harvester.
//!
//! This crate provides shared identifiers, the failure taxonomy, error handling and
//! configuration management that every other lotwatch crate depends on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes and enums (`KeywordId`, `RunId`, `ItemId`, `FailureClass`)
//!
//! # Example
//!
//! ```rust
//! use lotwatch_core::{AppConfig, FailureClass};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! config.validate()?;
//! assert!(FailureClass::Transient.is_retryable());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrowserConfig, DatabaseConfig, GeneralConfig, KeywordOrder, MarketplaceConfig,
    SearchConfig, SearchFilterConfig, SelectorConfig,
};
pub use error::{ConfigError, ConfigResult, LotwatchError, Result};
pub use types::{
    FailureClass, ItemId, KeywordId, ListingType, OutcomeKind, ParseWarning, RunId,
    AUTH_RETRY_BUDGET,
};
