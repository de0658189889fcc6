//! One search attempt for one keyword.
//!
//! ```text
//! Idle -> Authenticating (login required and not signed in)
//!      -> Querying -> Paginating -> Extracting -> Succeeded
//!                                              \-> Failed(class)
//! ```
//!
//! Every request goes through the worker's [`RateController`]: the session waits for the slot it
//! hands out, then reports how the site answered. With a pause gate attached, requests also hold
//! off while the batch is paused after a challenge.

use crate::backoff::{ControllerSignal, RateController, RequestOutcome};
use crate::credentials::CredentialProvider;
use crate::error::{Result, SearchError};
use crate::parser::{ExtractionPipeline, PageInspection, PageSignal};
use crate::throttle::AdaptiveThrottle;
use crate::url_builder::{build_search_url, page_url};
use chrono::Utc;
use lotwatch_browser::{is_sign_in_url, MarketplaceSession, RawPage, SignInForm};
use lotwatch_core::{AppConfig, FailureClass, KeywordId, SearchFilterConfig};
use lotwatch_db::SearchResultRecord;
use std::path::{Path, PathBuf};

/// Where a search attempt is, or ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Authenticating,
    Querying,
    Paginating { page: u32 },
    Extracting,
    Succeeded,
    Failed(FailureClass),
}

/// The keyword being searched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTarget {
    pub keyword_id: KeywordId,
    pub keyword: String,
    pub category: Option<String>,
}

/// Per-run settings shared by every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub base_url: String,
    pub service_name: String,
    pub require_login: bool,
    pub sign_in: SignInForm,
    pub filters: SearchFilterConfig,
    /// Result pages fetched per keyword, at least 1
    pub page_limit: u32,
    /// Page captures on challenge or schema drift go here
    pub capture_dir: Option<PathBuf>,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let marketplace = &config.marketplace;
        let selectors = &marketplace.selectors;
        let continue_selector = Some(selectors.login_continue.trim().to_string())
            .filter(|selector| !selector.is_empty());

        Self {
            base_url: marketplace.base_url.clone(),
            service_name: marketplace.service_name.clone(),
            require_login: marketplace.require_login,
            sign_in: SignInForm {
                url: sign_in_url(&marketplace.base_url),
                identity_selector: selectors.login_identity.clone(),
                continue_selector,
                secret_selector: selectors.login_secret.clone(),
                submit_selector: selectors.login_submit.clone(),
            },
            filters: config.search.filters.clone(),
            page_limit: config.search.page_limit.max(1),
            capture_dir: config.search.capture_dir.clone(),
        }
    }
}

/// `https://www.ebay.com` becomes `https://signin.ebay.com/signin/`.
fn sign_in_url(base_url: &str) -> String {
    let fallback = format!("{}/signin/", base_url.trim_end_matches('/'));
    let Ok(mut url) = url::Url::parse(base_url) else {
        return fallback;
    };
    let Some(host) = url.host_str().map(str::to_string) else {
        return fallback;
    };
    let signin_host = format!("signin.{}", host.strip_prefix("www.").unwrap_or(&host));
    if url.set_host(Some(&signin_host)).is_err() {
        return fallback;
    }
    url.set_path("/signin/");
    url.into()
}

/// What one attempt produced.
#[derive(Debug)]
pub struct AttemptReport {
    /// States visited, in order
    pub transitions: Vec<SessionState>,
    /// Records from every page extracted before the attempt ended
    pub records: Vec<SearchResultRecord>,
    pub pages_fetched: u32,
    /// Cards skipped for lack of an item id
    pub skipped: usize,
    /// The controller asked for the batch to pause
    pub pause_requested: bool,
    /// Page capture written for this failure
    pub capture: Option<PathBuf>,
    pub error: Option<SearchError>,
}

impl AttemptReport {
    /// An attempt that ended before the session could run.
    #[must_use]
    pub fn failed(error: SearchError) -> Self {
        Self {
            transitions: vec![SessionState::Idle, SessionState::Failed(error.class())],
            records: Vec::new(),
            pages_fetched: 0,
            skipped: 0,
            pause_requested: false,
            capture: None,
            error: Some(error),
        }
    }

    /// Whether the attempt succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The last state entered.
    #[must_use]
    pub fn final_state(&self) -> SessionState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(SessionState::Idle)
    }
}

/// Drives one attempt over a worker's session handle.
pub struct SearchSession<'a> {
    handle: &'a mut dyn MarketplaceSession,
    pipeline: &'a ExtractionPipeline,
    controller: &'a mut RateController,
    credentials: &'a dyn CredentialProvider,
    settings: &'a SessionSettings,
    pause_gate: Option<&'a AdaptiveThrottle>,
    transitions: Vec<SessionState>,
    pages_fetched: u32,
    pause_requested: bool,
}

impl<'a> SearchSession<'a> {
    pub fn new(
        handle: &'a mut dyn MarketplaceSession,
        pipeline: &'a ExtractionPipeline,
        controller: &'a mut RateController,
        credentials: &'a dyn CredentialProvider,
        settings: &'a SessionSettings,
    ) -> Self {
        Self {
            handle,
            pipeline,
            controller,
            credentials,
            settings,
            pause_gate: None,
            transitions: Vec::new(),
            pages_fetched: 0,
            pause_requested: false,
        }
    }

    /// Hold every request while `throttle` has the batch paused.
    #[must_use]
    pub fn with_pause_gate(mut self, throttle: &'a AdaptiveThrottle) -> Self {
        self.pause_gate = Some(throttle);
        self
    }

    /// Run the attempt to a terminal state.
    pub async fn run(mut self, target: &SearchTarget) -> AttemptReport {
        self.enter(SessionState::Idle);

        let (records, skipped, error) = match self.collect_pages(target).await {
            Ok(pages) => {
                self.enter(SessionState::Extracting);
                self.extract_pages(&pages)
            }
            Err(e) => (Vec::new(), 0, Some(e)),
        };

        let mut capture = None;
        match &error {
            None => self.enter(SessionState::Succeeded),
            Some(e) => {
                let class = e.class();
                self.enter(SessionState::Failed(class));
                if matches!(class, FailureClass::Challenge | FailureClass::SchemaDrift) {
                    capture = self.capture_page(target, class).await;
                }
            }
        }

        AttemptReport {
            transitions: self.transitions,
            records,
            pages_fetched: self.pages_fetched,
            skipped,
            pause_requested: self.pause_requested,
            capture,
            error,
        }
    }

    /// Write what the handle shows to the capture directory, if one is configured.
    async fn capture_page(
        &mut self,
        target: &SearchTarget,
        class: FailureClass,
    ) -> Option<PathBuf> {
        let settings = self.settings;
        let dir = settings.capture_dir.as_deref()?;

        let png = match self.handle.capture().await {
            Ok(Some(png)) => png,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Could not capture page for '{}': {}", target.keyword, e);
                return None;
            }
        };

        let path = dir.join(format!(
            "{}-{}-{}.png",
            target.keyword_id,
            class,
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        ));
        match write_capture(dir, &path, &png).await {
            Ok(()) => {
                tracing::info!("Saved {} capture to {}", class, path.display());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("Could not write capture {}: {}", path.display(), e);
                None
            }
        }
    }

    fn enter(&mut self, state: SessionState) {
        tracing::trace!("session state -> {:?}", state);
        self.transitions.push(state);
    }

    async fn collect_pages(&mut self, target: &SearchTarget) -> Result<Vec<RawPage>> {
        if self.settings.require_login && !self.handle.is_authenticated() {
            self.enter(SessionState::Authenticating);
            self.authenticate().await?;
        }

        let text = target.keyword.trim();
        if text.is_empty() {
            return Err(SearchError::InvalidKeyword {
                reason: "empty keyword".to_string(),
            });
        }

        self.enter(SessionState::Querying);
        let search_url = build_search_url(
            &self.settings.base_url,
            text,
            target.category.as_deref(),
            &self.settings.filters,
        )?;
        let (first, inspection) = self.request(&search_url).await?;

        let last_page = inspection.page_count.min(self.settings.page_limit).max(1);
        let mut pages = vec![first];

        for page in 2..=last_page {
            self.enter(SessionState::Paginating { page });
            match self.request(&page_url(&search_url, page)?).await {
                Ok((raw, _)) => pages.push(raw),
                Err(e) if e.class() == FailureClass::Transient => {
                    tracing::warn!(
                        "Page {}/{} for '{}' failed ({}), keeping {} pages",
                        page,
                        last_page,
                        text,
                        e,
                        pages.len()
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(pages)
    }

    async fn authenticate(&mut self) -> Result<()> {
        let credentials = self
            .credentials
            .get_credentials(&self.settings.service_name)
            .await?;

        self.handle
            .sign_in(
                &self.settings.sign_in,
                &credentials.identity,
                &credentials.secret,
            )
            .await
            .map_err(|e| SearchError::SignIn(e.to_string()))
    }

    async fn request(&mut self, url: &str) -> Result<(RawPage, PageInspection)> {
        if let Some(gate) = self.pause_gate {
            gate.wait_out_pause().await;
        }

        let wait = self.controller.wait_before_next();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let page = match self.handle.fetch(url).await {
            Ok(page) => page,
            Err(e) => {
                self.report(RequestOutcome::TransientError);
                return Err(e.into());
            }
        };
        self.pages_fetched += 1;

        if is_sign_in_url(&page.url) {
            self.report(RequestOutcome::Success);
            return Err(SearchError::SignIn(format!(
                "redirected to sign-in at {}",
                page.url
            )));
        }

        let inspection = self.pipeline.inspect(&page);
        match inspection.signal {
            PageSignal::Content => {
                self.report(RequestOutcome::Success);
                tracing::debug!(
                    "Fetched {} ({} pages reported)",
                    page.url,
                    inspection.page_count
                );
                Ok((page, inspection))
            }
            PageSignal::RateLimited => {
                self.report(RequestOutcome::RateLimited);
                Err(SearchError::RateLimited {
                    detail: format!("rate limited at {}", page.url),
                })
            }
            PageSignal::Challenge => {
                self.report(RequestOutcome::Challenge);
                Err(SearchError::Challenge {
                    detail: format!("challenge served at {}", page.url),
                })
            }
        }
    }

    fn report(&mut self, outcome: RequestOutcome) {
        if self.controller.record_outcome(outcome) == ControllerSignal::PauseBatch {
            self.pause_requested = true;
        }
    }

    fn extract_pages(
        &self,
        pages: &[RawPage],
    ) -> (Vec<SearchResultRecord>, usize, Option<SearchError>) {
        let mut records = Vec::new();
        let mut skipped = 0;

        for (index, page) in pages.iter().enumerate() {
            match self.pipeline.extract(page) {
                Ok(extraction) => {
                    skipped += extraction.skipped;
                    records.extend(extraction.into_records());
                }
                Err(e) => {
                    tracing::warn!(
                        "Extraction stopped at page {}: {} ({} records kept)",
                        index + 1,
                        e,
                        records.len()
                    );
                    return (records, skipped, Some(e.into()));
                }
            }
        }

        (records, skipped, None)
    }
}

async fn write_capture(dir: &Path, path: &Path, png: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, png).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::credentials::Credentials;
    use crate::error::CredentialError;
    use lotwatch_browser::BrowserError;
    use lotwatch_core::SelectorConfig;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedHandle {
        authenticated: bool,
        sign_in_ok: bool,
        sign_ins: u32,
        fetched: Vec<String>,
        responses: VecDeque<std::result::Result<RawPage, BrowserError>>,
        snapshot: Option<Vec<u8>>,
        captures: u32,
    }

    impl ScriptedHandle {
        fn new(responses: Vec<std::result::Result<RawPage, BrowserError>>) -> Self {
            Self {
                authenticated: false,
                sign_in_ok: true,
                sign_ins: 0,
                fetched: Vec::new(),
                responses: responses.into(),
                snapshot: None,
                captures: 0,
            }
        }
    }

    #[async_trait::async_trait]
    impl MarketplaceSession for ScriptedHandle {
        fn is_authenticated(&self) -> bool {
            self.authenticated
        }

        async fn sign_in(
            &mut self,
            _form: &SignInForm,
            identity: &str,
            secret: &str,
        ) -> lotwatch_browser::Result<()> {
            self.sign_ins += 1;
            if self.sign_in_ok && identity == "buyer" && secret == "hunter2" {
                self.authenticated = true;
                Ok(())
            } else {
                Err(BrowserError::AuthRejected("bad password".to_string()))
            }
        }

        async fn fetch(&mut self, url: &str) -> lotwatch_browser::Result<RawPage> {
            self.fetched.push(url.to_string());
            self.responses
                .pop_front()
                .unwrap_or_else(|| Err(BrowserError::NavigationError("script exhausted".into())))
        }

        async fn capture(&mut self) -> lotwatch_browser::Result<Option<Vec<u8>>> {
            self.captures += 1;
            Ok(self.snapshot.clone())
        }
    }

    struct FixedCredentials(Option<Credentials>);

    #[async_trait::async_trait]
    impl CredentialProvider for FixedCredentials {
        async fn get_credentials(
            &self,
            service: &str,
        ) -> std::result::Result<Credentials, CredentialError> {
            self.0.clone().ok_or_else(|| CredentialError::Unavailable {
                service: service.to_string(),
            })
        }
    }

    fn results_page(ids: &[&str], pages: u32) -> RawPage {
        let cards: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<li class="s-item"><a class="s-item__link" href="https://www.ebay.com/itm/{id}">
                       <div class="s-item__title">Item {id}</div></a>
                       <span class="s-item__price">$10.00</span></li>"#
                )
            })
            .collect();
        let pagination: String = (1..=pages)
            .map(|p| format!(r#"<a class="pagination__item">{p}</a>"#))
            .collect();
        RawPage::new(
            "https://www.ebay.com/sch/i.html",
            format!(r#"<html><body><ul class="srp-results">{cards}</ul>{pagination}</body></html>"#),
        )
    }

    fn settings(page_limit: u32, require_login: bool) -> SessionSettings {
        let mut config = AppConfig::default();
        config.search.page_limit = page_limit;
        config.marketplace.require_login = require_login;
        SessionSettings::from_config(&config)
    }

    fn controller() -> RateController {
        RateController::new(BackoffPolicy {
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: Duration::ZERO,
            page_delay: Duration::ZERO,
        })
    }

    fn pipeline() -> ExtractionPipeline {
        ExtractionPipeline::new(&SelectorConfig::default(), "https://www.ebay.com")
            .expect("selectors")
    }

    fn target() -> SearchTarget {
        SearchTarget {
            keyword_id: KeywordId::new(1),
            keyword: "helios 44".to_string(),
            category: None,
        }
    }

    #[tokio::test]
    async fn test_single_page_success() {
        let mut handle = ScriptedHandle::new(vec![Ok(results_page(&["256700000001", "256700000002"], 1))]);
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let settings = settings(2, false);

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        assert!(report.is_success());
        assert_eq!(report.records.len(), 2);
        assert_eq!(
            report.transitions,
            vec![
                SessionState::Idle,
                SessionState::Querying,
                SessionState::Extracting,
                SessionState::Succeeded
            ]
        );
        assert_eq!(
            handle.fetched,
            vec!["https://www.ebay.com/sch/i.html?_nkw=helios+44"]
        );
    }

    #[tokio::test]
    async fn test_pagination_respects_page_limit() {
        let mut handle = ScriptedHandle::new(vec![
            Ok(results_page(&["256700000001"], 5)),
            Ok(results_page(&["256700000002"], 5)),
            Ok(results_page(&["256700000003"], 5)),
        ]);
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let settings = settings(2, false);

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        assert!(report.is_success());
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.records.len(), 2);
        assert!(report
            .transitions
            .contains(&SessionState::Paginating { page: 2 }));
        assert!(handle.fetched[1].ends_with("&_pgn=2"));
    }

    #[tokio::test]
    async fn test_transient_failure_on_later_page_keeps_earlier_pages() {
        let mut handle = ScriptedHandle::new(vec![
            Ok(results_page(&["256700000001"], 3)),
            Err(BrowserError::Timeout("page 2".to_string())),
        ]);
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let settings = settings(3, false);

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        assert!(report.is_success());
        assert_eq!(report.records.len(), 1);
        assert_eq!(handle.fetched.len(), 2);
    }

    #[tokio::test]
    async fn test_challenge_fails_attempt_and_requests_pause() {
        let challenge = RawPage::new(
            "https://www.ebay.com/sch/i.html",
            r#"<html><body><div class="g-recaptcha"></div></body></html>"#,
        );
        let mut handle = ScriptedHandle::new(vec![Ok(challenge)]);
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let settings = settings(2, false);

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        assert!(report.pause_requested);
        assert_eq!(
            report.final_state(),
            SessionState::Failed(FailureClass::Challenge)
        );
        assert!(controller.floor() > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_rate_limit_on_later_page_fails_attempt() {
        let throttled = RawPage::new(
            "https://www.ebay.com/sch/i.html",
            "<html><head><title>Too Many Requests</title></head></html>",
        );
        let mut handle = ScriptedHandle::new(vec![Ok(results_page(&["256700000001"], 2)), Ok(throttled)]);
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let settings = settings(2, false);

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        assert_eq!(
            report.final_state(),
            SessionState::Failed(FailureClass::RateLimited)
        );
        assert!(report.records.is_empty());
        assert_eq!(controller.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_schema_drift_keeps_earlier_pages() {
        let drifted = RawPage::new(
            "https://www.ebay.com/sch/i.html?_pgn=2",
            "<html><body><div class=\"redesigned\"></div></body></html>",
        );
        let mut handle = ScriptedHandle::new(vec![Ok(results_page(&["256700000001"], 2)), Ok(drifted)]);
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let settings = settings(2, false);

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        assert_eq!(
            report.final_state(),
            SessionState::Failed(FailureClass::SchemaDrift)
        );
        assert_eq!(report.records.len(), 1);
    }

    #[tokio::test]
    async fn test_login_when_required() {
        let mut handle = ScriptedHandle::new(vec![Ok(results_page(&["256700000001"], 1))]);
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(Some(Credentials::new("buyer", "hunter2")));
        let settings = settings(1, true);

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        assert!(report.is_success());
        assert_eq!(report.transitions[1], SessionState::Authenticating);
        assert_eq!(handle.sign_ins, 1);
        assert!(handle.authenticated);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_auth_error() {
        let mut handle = ScriptedHandle::new(vec![]);
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let settings = settings(1, true);

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        assert_eq!(
            report.final_state(),
            SessionState::Failed(FailureClass::AuthError)
        );
        assert!(handle.fetched.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_sign_in_is_auth_error() {
        let mut handle = ScriptedHandle::new(vec![]);
        handle.sign_in_ok = false;
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(Some(Credentials::new("buyer", "hunter2")));
        let settings = settings(1, true);

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        assert_eq!(
            report.final_state(),
            SessionState::Failed(FailureClass::AuthError)
        );
    }

    #[tokio::test]
    async fn test_empty_keyword_is_fatal() {
        let mut handle = ScriptedHandle::new(vec![]);
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let settings = settings(1, false);
        let blank = SearchTarget {
            keyword: "   ".to_string(),
            ..target()
        };

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&blank)
            .await;

        assert_eq!(report.final_state(), SessionState::Failed(FailureClass::Fatal));
    }

    #[tokio::test]
    async fn test_challenge_page_is_captured() {
        let dir = tempfile::tempdir().expect("temp dir");
        let challenge = RawPage::new(
            "https://www.ebay.com/sch/i.html",
            r#"<html><body><div id="px-captcha"></div></body></html>"#,
        );
        let mut handle = ScriptedHandle::new(vec![Ok(challenge)]);
        handle.snapshot = Some(b"\x89PNG fake".to_vec());
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let mut settings = settings(1, false);
        settings.capture_dir = Some(dir.path().join("captures"));

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        let path = report.capture.expect("capture written");
        assert!(path.starts_with(dir.path().join("captures")));
        let name = path.file_name().and_then(|n| n.to_str()).expect("file name");
        assert!(name.starts_with("1-challenge-"));
        assert!(name.ends_with(".png"));
        assert_eq!(std::fs::read(&path).expect("read capture"), b"\x89PNG fake");
    }

    #[tokio::test]
    async fn test_capture_needs_a_directory() {
        let drifted = RawPage::new(
            "https://www.ebay.com/sch/i.html",
            "<html><body><div class=\"redesigned\"></div></body></html>",
        );
        let mut handle = ScriptedHandle::new(vec![Ok(drifted)]);
        handle.snapshot = Some(b"png".to_vec());
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let settings = settings(1, false);

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        assert_eq!(
            report.final_state(),
            SessionState::Failed(FailureClass::SchemaDrift)
        );
        assert!(report.capture.is_none());
        assert_eq!(handle.captures, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_not_captured() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut handle =
            ScriptedHandle::new(vec![Err(BrowserError::Timeout("page 1".to_string()))]);
        handle.snapshot = Some(b"png".to_vec());
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let mut settings = settings(1, false);
        settings.capture_dir = Some(dir.path().to_path_buf());

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .run(&target())
            .await;

        assert!(report.capture.is_none());
        assert_eq!(handle.captures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_gate_holds_requests() {
        let throttle = AdaptiveThrottle::new(crate::throttle::ThrottleSettings {
            configured_limit: 2,
            window: Duration::from_secs(60),
            threshold: 2,
            challenge_pause: Duration::from_secs(30),
            recovery_successes: 3,
        });
        throttle.record_signal(KeywordId::new(9), crate::throttle::ThrottleSignal::Challenge);

        let mut handle = ScriptedHandle::new(vec![Ok(results_page(&["256700000001"], 1))]);
        let pipeline = pipeline();
        let mut controller = controller();
        let creds = FixedCredentials(None);
        let settings = settings(1, false);
        let started = tokio::time::Instant::now();

        let report = SearchSession::new(&mut handle, &pipeline, &mut controller, &creds, &settings)
            .with_pause_gate(&throttle)
            .run(&target())
            .await;

        assert!(report.is_success());
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(throttle.pause_remaining(), None);
    }

    #[test]
    fn test_sign_in_url() {
        assert_eq!(sign_in_url("https://www.ebay.com"), "https://signin.ebay.com/signin/");
        assert_eq!(sign_in_url("https://ebay.co.uk/"), "https://signin.ebay.co.uk/signin/");
    }
}
