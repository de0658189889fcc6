//! Browser sessions for marketplace search pages.
//!
//! A [`SessionFactory`] hands every search worker its own [`MarketplaceSession`]: one
//! browser page with its own fingerprint and sign-in state. The chromium-backed
//! [`BrowserEngine`] is the production factory; tests substitute scripted sessions.

pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod session;

pub use engine::{BrowserEngine, EngineSettings};
pub use error::{BrowserError, Result};
pub use fingerprint::FingerprintConfig;
pub use session::{is_sign_in_url, MarketplaceSession, RawPage, SessionFactory, SignInForm};
