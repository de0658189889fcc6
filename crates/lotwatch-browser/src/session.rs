use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fetched page as handed to extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPage {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status when the driver reports one
    pub status: Option<u16>,
    /// Serialized document
    pub html: String,
    /// When the page was captured
    pub captured_at: DateTime<Utc>,
}

impl RawPage {
    /// Page captured now, without a status code.
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: None,
            html: html.into(),
            captured_at: Utc::now(),
        }
    }

    /// Set the HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the capture time.
    #[must_use]
    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }
}

/// Where and how to sign in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInForm {
    /// Sign-in page
    pub url: String,
    /// Identity input
    pub identity_selector: String,
    /// Button between the identity and secret steps, if the form is two-step
    pub continue_selector: Option<String>,
    /// Secret input
    pub secret_selector: String,
    /// Submit button
    pub submit_selector: String,
}

/// One worker's handle on the marketplace.
///
/// Sessions are never shared between workers; each keeps its own sign-in state.
#[async_trait::async_trait]
pub trait MarketplaceSession: Send {
    /// Whether the session holds a signed-in context.
    fn is_authenticated(&self) -> bool;

    /// Sign in with the given identity and secret.
    async fn sign_in(&mut self, form: &SignInForm, identity: &str, secret: &str) -> Result<()>;

    /// Load a URL and return its document.
    async fn fetch(&mut self, url: &str) -> Result<RawPage>;

    /// PNG snapshot of what the session currently shows, for debugging a bad page.
    ///
    /// Sessions without a display return `None`.
    async fn capture(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Opens sessions for workers.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a fresh session.
    async fn open_session(&self) -> Result<Box<dyn MarketplaceSession>>;
}

/// Whether a URL points at a sign-in page (e.g. `https://signin.ebay.com/...` or `/signin/`).
pub fn is_sign_in_url(raw: &str) -> bool {
    let Ok(url) = url::Url::parse(raw) else {
        return false;
    };
    let host_is_signin = url
        .host_str()
        .is_some_and(|host| host.starts_with("signin."));
    host_is_signin || url.path().starts_with("/signin")
}
