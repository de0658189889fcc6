//! Shared types used across lotwatch.
//!
//! This module defines the identifiers, the failure taxonomy and the small enums that
//! cross crate boundaries (scanner ⇄ database).

use crate::error::LotwatchError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Number of attempts granted to a keyword whose credentials were rejected.
///
/// Credential problems rarely resolve themselves, so this stays small regardless of the
/// configured per-keyword attempt budget.
pub const AUTH_RETRY_BUDGET: u32 = 2;

/// Identifier of a stored keyword.
///
/// Keyword ids are assigned by the database in import order, which is also the default
/// queue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordId(i64);

impl KeywordId {
    /// Wrap a raw database id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw database id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for KeywordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a search run (one batch execution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(i64);

impl RunId {
    /// Wrap a raw database id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw database id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Marketplace item identifier with validation.
///
/// Item ids are the numeric listing ids found in `/itm/<id>` URLs, 6-20 digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    /// Create a new `ItemId` from a string.
    ///
    /// # Errors
    /// Returns error if the id is not 6-20 ASCII digits.
    pub fn new(id: impl Into<String>) -> Result<Self, LotwatchError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), LotwatchError> {
        static ITEM_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = ITEM_REGEX.get_or_init(|| Regex::new(r"^[0-9]{6,20}$").expect("valid regex"));

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(LotwatchError::Validation(format!(
                "invalid item ID: must be 6-20 digits, got '{id}'"
            )))
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a failed keyword attempt.
///
/// Drives the retry decision in the orchestrator and is recorded with every terminal
/// failure in a run's error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network blip or timeout; retried with backoff
    Transient,
    /// Remote throttling signal; retried with elevated backoff
    RateLimited,
    /// Bot-detection response; retried only after remediation
    Challenge,
    /// Credentials missing or rejected
    AuthError,
    /// Expected page structure not found
    SchemaDrift,
    /// Non-retryable input or infrastructure failure
    Fatal,
    /// Aborted by batch cancellation; retryable in a later run
    Cancelled,
}

impl FailureClass {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::Challenge => "challenge",
            Self::AuthError => "auth_error",
            Self::SchemaDrift => "schema_drift",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the storage representation.
    pub fn parse(s: &str) -> Result<Self, LotwatchError> {
        match s {
            "transient" => Ok(Self::Transient),
            "rate_limited" => Ok(Self::RateLimited),
            "challenge" => Ok(Self::Challenge),
            "auth_error" => Ok(Self::AuthError),
            "schema_drift" => Ok(Self::SchemaDrift),
            "fatal" => Ok(Self::Fatal),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(LotwatchError::Validation(format!(
                "unknown failure class '{other}'"
            ))),
        }
    }

    /// Whether another attempt within the same run can help at all.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient | Self::RateLimited | Self::Challenge | Self::AuthError
        )
    }

    /// Total number of attempts allowed for a keyword failing with this class.
    #[must_use]
    pub fn attempt_budget(&self, max_attempts: u32) -> u32 {
        match self {
            Self::Transient | Self::RateLimited | Self::Challenge => max_attempts,
            Self::AuthError => max_attempts.min(AUTH_RETRY_BUDGET),
            Self::SchemaDrift | Self::Fatal | Self::Cancelled => 1,
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome kind of one keyword within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Results were collected and handed off
    Succeeded,
    /// Retry budget exhausted or non-retryable failure
    Failed,
    /// Aborted by batch cancellation
    Cancelled,
}

impl OutcomeKind {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the storage representation.
    pub fn parse(s: &str) -> Result<Self, LotwatchError> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(LotwatchError::Validation(format!(
                "unknown outcome kind '{other}'"
            ))),
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a listing is sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    /// Bidding auction
    Auction,
    /// Fixed price / Buy It Now
    FixedPrice,
    /// Could not be determined from the result card
    Unknown,
}

impl ListingType {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auction => "auction",
            Self::FixedPrice => "fixed_price",
            Self::Unknown => "unknown",
        }
    }

    /// Parse from the storage representation. Unrecognized values map to `Unknown`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "auction" => Self::Auction,
            "fixed_price" => Self::FixedPrice,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal problem found while reading one field of a listing.
///
/// The field is reported as unavailable and the record is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// Field name, e.g. `price`
    pub field: String,
    /// Raw text that failed to parse (truncated)
    pub raw: String,
    /// Why the value was rejected
    pub reason: String,
}

impl ParseWarning {
    /// Maximum number of raw characters kept in a warning.
    pub const RAW_LIMIT: usize = 120;

    /// Create a warning, truncating the raw text.
    pub fn new(field: impl Into<String>, raw: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            raw: raw.chars().take(Self::RAW_LIMIT).collect(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_valid() {
        for id in ["123456", "256789012345", "12345678901234567890"] {
            assert!(ItemId::new(id).is_ok(), "Failed for: {id}");
        }
    }

    #[test]
    fn test_item_id_invalid() {
        let too_long = "1".repeat(21);
        for id in ["", "12345", "12ab5678", "itm-123456", too_long.as_str()] {
            assert!(ItemId::new(id).is_err(), "Should fail for: {id}");
        }
    }

    #[test]
    fn test_failure_class_storage_names() {
        let all = [
            FailureClass::Transient,
            FailureClass::RateLimited,
            FailureClass::Challenge,
            FailureClass::AuthError,
            FailureClass::SchemaDrift,
            FailureClass::Fatal,
            FailureClass::Cancelled,
        ];
        for class in all {
            assert_eq!(FailureClass::parse(class.as_str()).expect("parse"), class);
            let json = serde_json::to_string(&class).expect("serialize failure class");
            assert_eq!(json, format!("\"{}\"", class.as_str()));
        }
        assert!(FailureClass::parse("bogus").is_err());
    }

    #[test]
    fn test_attempt_budgets() {
        assert_eq!(FailureClass::Transient.attempt_budget(5), 5);
        assert_eq!(FailureClass::RateLimited.attempt_budget(2), 2);
        assert_eq!(FailureClass::AuthError.attempt_budget(5), AUTH_RETRY_BUDGET);
        assert_eq!(FailureClass::AuthError.attempt_budget(1), 1);
        assert_eq!(FailureClass::SchemaDrift.attempt_budget(5), 1);
        assert_eq!(FailureClass::Fatal.attempt_budget(5), 1);
        assert!(!FailureClass::Fatal.is_retryable());
        assert!(!FailureClass::Cancelled.is_retryable());
    }

    #[test]
    fn test_listing_type_parse_unknown() {
        assert_eq!(ListingType::parse("auction"), ListingType::Auction);
        assert_eq!(ListingType::parse("classified"), ListingType::Unknown);
    }

    #[test]
    fn test_parse_warning_truncates_raw() {
        let raw = "x".repeat(500);
        let warning = ParseWarning::new("title", &raw, "too long");
        assert_eq!(warning.raw.len(), ParseWarning::RAW_LIMIT);
        assert_eq!(warning.field, "title");
    }
}
