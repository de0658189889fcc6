use lotwatch_browser::BrowserError;
use lotwatch_core::FailureClass;
use lotwatch_db::DatabaseError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while searching one keyword.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("rate limited: {detail}")]
    RateLimited { detail: String },

    #[error("bot challenge detected: {detail}")]
    Challenge { detail: String },

    #[error("credentials unavailable: {0}")]
    Credential(#[from] CredentialError),

    #[error("sign-in failed: {0}")]
    SignIn(String),

    #[error("page structure changed: {reason}")]
    SchemaDrift { reason: String },

    #[error("invalid keyword: {reason}")]
    InvalidKeyword { reason: String },

    #[error("invalid search url: {0}")]
    InvalidUrl(String),

    #[error("attempt exceeded {0:?}")]
    AttemptTimeout(Duration),

    #[error("no session available: {0}")]
    SessionUnavailable(String),

    #[error("cancelled")]
    Cancelled,

    #[error("extraction error: {0}")]
    Extract(ExtractError),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

impl SearchError {
    /// Map the error onto the retry taxonomy.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::RateLimited { .. } => FailureClass::RateLimited,
            Self::Challenge { .. } => FailureClass::Challenge,
            Self::Credential(_) | Self::SignIn(_) => FailureClass::AuthError,
            Self::SchemaDrift { .. } => FailureClass::SchemaDrift,
            Self::InvalidKeyword { .. } | Self::InvalidUrl(_) | Self::Database(_) => {
                FailureClass::Fatal
            }
            Self::Extract(e) => e.class(),
            Self::AttemptTimeout(_) | Self::SessionUnavailable(_) => FailureClass::Transient,
            Self::Cancelled => FailureClass::Cancelled,
            Self::Browser(e) => match e {
                BrowserError::AuthRejected(_) => FailureClass::AuthError,
                _ => FailureClass::Transient,
            },
        }
    }
}

impl From<ExtractError> for SearchError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::SchemaDrift { reason } => Self::SchemaDrift { reason },
            other => Self::Extract(other),
        }
    }
}

/// Errors raised by the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("page structure changed: {reason}")]
    SchemaDrift { reason: String },

    #[error("invalid selector for {name}: {reason}")]
    InvalidSelector { name: String, reason: String },
}

impl ExtractError {
    /// Map the error onto the retry taxonomy.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::SchemaDrift { .. } => FailureClass::SchemaDrift,
            Self::InvalidSelector { .. } => FailureClass::Fatal,
        }
    }
}

/// Errors raised by a credential provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("no credentials for service {service}")]
    Unavailable { service: String },
}

pub type Result<T> = std::result::Result<T, SearchError>;
