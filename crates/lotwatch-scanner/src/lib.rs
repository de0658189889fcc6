//! Lotwatch Scanner - Keyword search orchestration.
//!
//! This crate runs batches of keyword searches against the marketplace. It coordinates browser
//! sessions, result extraction and outcome storage, and keeps going when individual keywords
//! fail: every keyword ends a batch with exactly one recorded outcome.
//!
//! # Features
//!
//! - Fixed worker pool, one browser session per worker
//! - Failure classification driving per-class retry budgets
//! - Exponential backoff with jitter, raised further for rate limits
//! - Adaptive concurrency that backs off when the site pushes back
//! - Challenge detection with a pause and an operator remediation signal
//! - Cooperative cancellation with a grace period for in-flight keywords
//!
//! # Example
//!
//! ```rust,ignore
//! use lotwatch_scanner::{EnvCredentialProvider, SearchOrchestrator};
//! use std::sync::Arc;
//!
//! let orchestrator = SearchOrchestrator::new(
//!     &config,
//!     Arc::new(database),
//!     Arc::new(browser_engine),
//!     Arc::new(EnvCredentialProvider::new("LOTWATCH_EBAY_USER", "LOTWATCH_EBAY_PASSWORD")),
//! )?;
//!
//! let report = orchestrator.run_batch(keywords, config.search.concurrency_limit).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod backoff;
pub mod credentials;
pub mod error;
#[allow(missing_docs)]
pub mod orchestrator;
#[allow(missing_docs)]
pub mod parser;
#[allow(missing_docs)]
pub mod queue;
pub mod remediation;
#[allow(missing_docs)]
pub mod session;
#[allow(missing_docs)]
pub mod throttle;
#[allow(missing_docs)]
pub mod url_builder;

// Re-export commonly used types
pub use backoff::{BackoffPolicy, RateController, RequestOutcome};
pub use credentials::{CredentialProvider, Credentials, EnvCredentialProvider};
pub use error::{CredentialError, ExtractError, Result, SearchError};
pub use orchestrator::{
    BatchReport, KeywordReport, KeywordState, RetryState, SearchOrchestrator,
};
pub use parser::{Extraction, ExtractionPipeline, Listing, PageSignal};
pub use queue::{KeywordQueue, QueueOrder, QueueState};
pub use remediation::RemediationHandle;
pub use session::{AttemptReport, SearchSession, SearchTarget, SessionSettings, SessionState};
pub use throttle::{AdaptiveThrottle, ThrottleSignal};
pub use url_builder::build_search_url;
