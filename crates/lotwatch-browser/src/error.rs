use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("navigation failed: {0}")]
    NavigationError(String),

    #[error("selector not found: {0}")]
    SelectorNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("sign-in rejected: {0}")]
    AuthRejected(String),

    #[error("browser session closed")]
    SessionClosed,
}

impl BrowserError {
    /// Whether retrying the request may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::AuthRejected(_) | Self::SelectorNotFound(_))
    }

    /// The session can no longer be used and must be replaced.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Self::SessionClosed | Self::ChromiumError(_))
    }
}
