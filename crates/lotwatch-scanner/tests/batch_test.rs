use lotwatch_browser::{BrowserError, MarketplaceSession, RawPage, SessionFactory, SignInForm};
use lotwatch_core::{AppConfig, FailureClass, KeywordId, OutcomeKind};
use lotwatch_db::keywords::{self, KeywordStatus, NewKeyword};
use lotwatch_db::search_results::{self, ResultFilter};
use lotwatch_db::search_runs::{self, RunStatus};
use lotwatch_db::{outcomes, Database, Keyword};
use lotwatch_scanner::{
    Credentials, CredentialError, CredentialProvider, KeywordState, RemediationHandle,
    SearchOrchestrator,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// What the fake site does for one request.
#[derive(Debug, Clone)]
enum Step {
    Results(Vec<u64>),
    /// Results with a pagination bar listing this many pages
    Paged(Vec<u64>, u32),
    /// A page that no longer has the results container
    Drift,
    RateLimited,
    Challenge,
    Broken,
    Hang,
}

/// Per-keyword scripts shared by every session the factory opens.
#[derive(Default)]
struct FakeMarket {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    opened: AtomicU32,
    requests: AtomicU32,
    /// Keyword and arrival time of every request
    log: Mutex<Vec<(String, Instant)>>,
    /// Sessions never hold a signed-in context
    signed_out: bool,
    /// Solves challenges as soon as they are served
    operator: Option<RemediationHandle>,
}

impl FakeMarket {
    fn script(self, keyword: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .insert(keyword.to_string(), steps.into());
        self
    }

    fn requests_for(&self, keyword: &str) -> Vec<Instant> {
        self.log
            .lock()
            .expect("log lock")
            .iter()
            .filter(|(k, _)| k == keyword)
            .map(|(_, at)| *at)
            .collect()
    }

    fn next_step(&self, url: &str) -> Step {
        let keyword = url::Url::parse(url)
            .ok()
            .and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "_nkw")
                    .map(|(_, v)| v.into_owned())
            })
            .unwrap_or_default();
        self.log
            .lock()
            .expect("log lock")
            .push((keyword.clone(), Instant::now()));
        self.scripts
            .lock()
            .expect("scripts lock")
            .get_mut(&keyword)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Broken)
    }
}

fn results_html(ids: &[u64], pages: u32) -> String {
    let cards: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<li class="s-item"><a class="s-item__link" href="https://www.ebay.com/itm/{id}">
                   <div class="s-item__title">Listing {id}</div></a>
                   <span class="s-item__price">$19.99</span></li>"#
            )
        })
        .collect();
    let pagination: String = (1..=pages)
        .map(|p| format!(r#"<a class="pagination__item">{p}</a>"#))
        .collect();
    format!(r#"<html><body><ul class="srp-results">{cards}</ul>{pagination}</body></html>"#)
}

struct FakeSession {
    market: Arc<FakeMarket>,
}

#[async_trait::async_trait]
impl MarketplaceSession for FakeSession {
    fn is_authenticated(&self) -> bool {
        !self.market.signed_out
    }

    async fn sign_in(
        &mut self,
        _form: &SignInForm,
        _identity: &str,
        _secret: &str,
    ) -> lotwatch_browser::Result<()> {
        Ok(())
    }

    async fn fetch(&mut self, url: &str) -> lotwatch_browser::Result<RawPage> {
        self.market.requests.fetch_add(1, Ordering::SeqCst);
        match self.market.next_step(url) {
            Step::Results(ids) => Ok(RawPage::new(url, results_html(&ids, 1))),
            Step::Paged(ids, pages) => Ok(RawPage::new(url, results_html(&ids, pages))),
            Step::Drift => Ok(RawPage::new(
                url,
                r#"<html><body><div class="srp-grid-v2"></div></body></html>"#,
            )),
            Step::RateLimited => Ok(RawPage::new(url, "<html><body>Too Many Requests</body></html>")
                .with_status(429)),
            Step::Challenge => {
                if let Some(operator) = &self.market.operator {
                    operator.signal();
                }
                Ok(RawPage::new(
                    url,
                    r#"<html><body><div id="px-captcha"></div></body></html>"#,
                ))
            }
            Step::Broken => Err(BrowserError::NavigationError("connection reset".to_string())),
            Step::Hang => std::future::pending().await,
        }
    }
}

struct FakeFactory {
    market: Arc<FakeMarket>,
}

#[async_trait::async_trait]
impl SessionFactory for FakeFactory {
    async fn open_session(&self) -> lotwatch_browser::Result<Box<dyn MarketplaceSession>> {
        self.market.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            market: Arc::clone(&self.market),
        }))
    }
}

struct NoCredentials;

#[async_trait::async_trait]
impl CredentialProvider for NoCredentials {
    async fn get_credentials(&self, service: &str) -> Result<Credentials, CredentialError> {
        Err(CredentialError::Unavailable {
            service: service.to_string(),
        })
    }
}

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.search.max_attempts_per_keyword = 3;
    config.search.backoff_base_ms = 1;
    config.search.backoff_max_ms = 5;
    config.search.jitter_ms = 0;
    config.search.page_delay_ms = 0;
    config.search.page_limit = 1;
    config.search.cancel_grace_secs = 0;
    config.search.challenge_pause_secs = 0;
    config.search.challenge_wait_secs = 2;
    config
}

async fn seeded_db(texts: &[&str]) -> (Arc<Database>, Vec<Keyword>) {
    let db = Database::in_memory().await.expect("open in-memory database");
    db.run_migrations().await.expect("run migrations");
    let imports: Vec<NewKeyword> = texts.iter().map(|t| NewKeyword::new(*t)).collect();
    keywords::upsert_keywords(db.pool(), &imports)
        .await
        .expect("import keywords");
    let active = keywords::get_keywords(db.pool(), Some(KeywordStatus::Active), None)
        .await
        .expect("load keywords");
    (Arc::new(db), active)
}

fn orchestrator(
    config: &AppConfig,
    db: &Arc<Database>,
    market: &Arc<FakeMarket>,
) -> SearchOrchestrator {
    SearchOrchestrator::new(
        config,
        Arc::clone(db),
        Arc::new(FakeFactory {
            market: Arc::clone(market),
        }),
        Arc::new(NoCredentials),
    )
    .expect("build orchestrator")
}

fn id_of(keywords: &[Keyword], text: &str) -> KeywordId {
    keywords
        .iter()
        .find(|k| k.keyword == text)
        .map(|k| k.id)
        .expect("keyword seeded")
}

#[tokio::test]
async fn test_all_keywords_succeed() {
    let (db, kws) = seeded_db(&["canon 50mm", "helios 44", "leica m6"]).await;
    let market = Arc::new(
        FakeMarket::default()
            .script(
                "canon 50mm",
                vec![Step::Results(vec![256_700_001_001, 256_700_001_002])],
            )
            .script("helios 44", vec![Step::Results(vec![256_700_002_001])])
            .script(
                "leica m6",
                vec![Step::Results(vec![
                    256_700_003_001,
                    256_700_003_002,
                    256_700_003_003,
                ])],
            ),
    );
    let orchestrator = orchestrator(&fast_config(), &db, &market);

    let report = orchestrator.run_batch(kws.clone(), 2).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.total, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(report.succeeded, 3);
    assert!(report.error_log.is_empty());
    assert!(market.opened.load(Ordering::SeqCst) <= 2);

    let run_id = report.run_id.expect("run created");
    let stored = search_results::query_results(
        db.pool(),
        &ResultFilter {
            run: Some(run_id),
            ..ResultFilter::default()
        },
    )
    .await
    .expect("query results");
    assert_eq!(stored.len(), 6);

    for keyword in &kws {
        let reloaded = keywords::get_by_id(db.pool(), keyword.id)
            .await
            .expect("reload keyword");
        assert!(reloaded.last_searched_at.is_some());
    }

    let run = search_runs::get_run(db.pool(), run_id).await.expect("get run");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.successful_keywords, 3);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (db, kws) = seeded_db(&["nikon fm2"]).await;
    let market = Arc::new(FakeMarket::default().script(
        "nikon fm2",
        vec![
            Step::Broken,
            Step::Broken,
            Step::Results(vec![256_700_004_001, 256_700_004_002]),
        ],
    ));
    let orchestrator = orchestrator(&fast_config(), &db, &market);

    let report = orchestrator.run_batch(kws.clone(), 1).await;

    assert_eq!(report.status, RunStatus::Completed);
    let line = report.keyword(id_of(&kws, "nikon fm2")).expect("keyword line");
    assert_eq!(line.state, KeywordState::Succeeded);
    assert_eq!(line.attempts, 3);
    assert_eq!(line.results_stored, 2);

    let recorded = outcomes::get_by_run(db.pool(), report.run_id.expect("run created"))
        .await
        .expect("load outcomes");
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].outcome, OutcomeKind::Succeeded);
    assert_eq!(recorded[0].attempts, 3);
}

#[tokio::test]
async fn test_rate_limit_exhausts_budget() {
    let (db, kws) = seeded_db(&["pentax k1000", "minolta x700"]).await;
    let market = Arc::new(
        FakeMarket::default()
            .script("pentax k1000", vec![Step::RateLimited, Step::RateLimited])
            .script("minolta x700", vec![Step::Results(vec![256_700_005_001])]),
    );
    let mut config = fast_config();
    config.search.max_attempts_per_keyword = 2;
    let orchestrator = orchestrator(&config, &db, &market);

    let report = orchestrator.run_batch(kws.clone(), 1).await;

    assert_eq!(report.status, RunStatus::PartiallyCompleted);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);

    let line = report.keyword(id_of(&kws, "pentax k1000")).expect("keyword line");
    assert_eq!(line.state, KeywordState::Failed(FailureClass::RateLimited));
    assert_eq!(line.attempts, 2);

    assert_eq!(report.error_log.len(), 1);
    assert_eq!(report.error_log[0].classification, FailureClass::RateLimited);
    assert_eq!(report.error_log[0].attempts, 2);

    let run = search_runs::get_run(db.pool(), report.run_id.expect("run created"))
        .await
        .expect("get run");
    assert_eq!(run.failed_keywords, 1);
    assert_eq!(run.error_log.len(), 1);
    assert_eq!(run.error_log[0].keyword, "pentax k1000");
}

#[tokio::test]
async fn test_every_keyword_failing_fails_the_run() {
    let (db, kws) = seeded_db(&["olympus om1", "yashica mat"]).await;
    let market = Arc::new(FakeMarket::default());
    let mut config = fast_config();
    config.search.max_attempts_per_keyword = 1;
    let orchestrator = orchestrator(&config, &db, &market);

    let report = orchestrator.run_batch(kws, 2).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed, 2);
    assert_eq!(report.processed, 2);
    assert!(report
        .error_log
        .iter()
        .all(|e| e.classification == FailureClass::Transient));
}

#[tokio::test]
async fn test_challenge_retried_after_remediation() {
    let (db, kws) = seeded_db(&["hasselblad 500cm"]).await;
    let operator = RemediationHandle::new();
    let market = Arc::new(
        FakeMarket {
            operator: Some(operator.clone()),
            ..FakeMarket::default()
        }
        .script(
            "hasselblad 500cm",
            vec![Step::Challenge, Step::Results(vec![256_700_006_001])],
        ),
    );
    let orchestrator =
        orchestrator(&fast_config(), &db, &market).with_remediation(operator);

    let report = orchestrator.run_batch(kws.clone(), 1).await;

    assert_eq!(report.status, RunStatus::Completed);
    let line = report
        .keyword(id_of(&kws, "hasselblad 500cm"))
        .expect("keyword line");
    assert_eq!(line.attempts, 2);
    assert_eq!(line.results_stored, 1);
}

#[tokio::test]
async fn test_unremediated_challenge_fails_keyword() {
    let (db, kws) = seeded_db(&["rolleiflex"]).await;
    let market = Arc::new(FakeMarket::default().script("rolleiflex", vec![Step::Challenge]));
    let mut config = fast_config();
    config.search.challenge_wait_secs = 0;
    let orchestrator = orchestrator(&config, &db, &market);

    let report = orchestrator.run_batch(kws.clone(), 1).await;

    assert_eq!(report.status, RunStatus::Failed);
    let line = report.keyword(id_of(&kws, "rolleiflex")).expect("keyword line");
    assert_eq!(line.state, KeywordState::Failed(FailureClass::Challenge));
    assert_eq!(line.attempts, 1);
    assert_eq!(market.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_leaves_unclaimed_keywords_pending() {
    let texts = ["lens a", "lens b", "lens c", "lens d", "lens e"];
    let (db, kws) = seeded_db(&texts).await;
    let market = texts
        .iter()
        .fold(FakeMarket::default(), |m, t| m.script(t, vec![Step::Hang]));
    let market = Arc::new(market);
    let orchestrator = orchestrator(&fast_config(), &db, &market);
    let token = orchestrator.cancellation_token();

    let (report, ()) = tokio::join!(orchestrator.run_batch(kws, 2), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    assert_eq!(report.status, RunStatus::PartiallyCompleted);
    assert_eq!(report.cancelled, 2);
    assert_eq!(report.pending, 3);
    assert_eq!(report.processed, 2);
    assert_eq!(report.succeeded, 0);
    assert!(report.processed <= report.total);

    let recorded = outcomes::get_by_run(db.pool(), report.run_id.expect("run created"))
        .await
        .expect("load outcomes");
    assert_eq!(recorded.len(), 2);
    assert!(recorded.iter().all(|o| o.outcome == OutcomeKind::Cancelled));

    // Cancelled keywords were not searched to completion
    for outcome in &recorded {
        let keyword = keywords::get_by_id(db.pool(), outcome.keyword_id)
            .await
            .expect("reload keyword");
        assert!(keyword.last_searched_at.is_none());
    }
}

#[tokio::test]
async fn test_unavailable_store_fails_before_any_work() {
    let (db, kws) = seeded_db(&["contax t2", "ricoh gr1"]).await;
    let market = Arc::new(FakeMarket::default());
    let orchestrator = orchestrator(&fast_config(), &db, &market);
    db.close().await;

    let report = orchestrator.run_batch(kws, 2).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.run_id, None);
    assert_eq!(report.total, 2);
    assert_eq!(report.pending, 2);
    assert_eq!(report.processed, 0);
    assert_eq!(report.error_log.len(), 1);
    assert_eq!(market.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_batch_completes() {
    let (db, _) = seeded_db(&[]).await;
    let market = Arc::new(FakeMarket::default());
    let orchestrator = orchestrator(&fast_config(), &db, &market);

    let report = orchestrator.run_batch(Vec::new(), 4).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.total, 0);
    assert!(report.run_id.is_some());
    assert_eq!(market.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_challenge_pause_holds_other_workers() {
    let (db, kws) = seeded_db(&["zeiss ikon", "mamiya rb67"]).await;
    let market = Arc::new(
        FakeMarket::default()
            .script("zeiss ikon", vec![Step::Challenge])
            .script(
                "mamiya rb67",
                vec![Step::Broken, Step::Results(vec![256_700_007_001])],
            ),
    );
    let mut config = fast_config();
    config.search.challenge_pause_secs = 1;
    config.search.challenge_wait_secs = 0;
    let orchestrator = orchestrator(&config, &db, &market);

    let report = orchestrator.run_batch(kws.clone(), 2).await;

    let challenged = report.keyword(id_of(&kws, "zeiss ikon")).expect("keyword line");
    assert_eq!(challenged.state, KeywordState::Failed(FailureClass::Challenge));
    let other = report.keyword(id_of(&kws, "mamiya rb67")).expect("keyword line");
    assert_eq!(other.state, KeywordState::Succeeded);
    assert_eq!(report.status, RunStatus::PartiallyCompleted);

    let challenge_at = market.requests_for("zeiss ikon")[0];
    let later: Vec<Instant> = market
        .requests_for("mamiya rb67")
        .into_iter()
        .filter(|at| *at > challenge_at)
        .collect();
    assert!(!later.is_empty());
    for at in later {
        assert!(at.duration_since(challenge_at) >= Duration::from_millis(990));
    }
}

#[tokio::test]
async fn test_auth_failure_stops_dispatch() {
    let (db, kws) = seeded_db(&["bronica sqa", "fuji gw690", "linhof technika"]).await;
    let market = Arc::new(FakeMarket {
        signed_out: true,
        ..FakeMarket::default()
    });
    let mut config = fast_config();
    config.marketplace.require_login = true;
    let orchestrator = orchestrator(&config, &db, &market);

    let report = orchestrator.run_batch(kws.clone(), 1).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed, 1);
    assert_eq!(report.pending, 2);
    assert_eq!(market.requests.load(Ordering::SeqCst), 0);

    let first = report.keyword(id_of(&kws, "bronica sqa")).expect("keyword line");
    assert_eq!(first.state, KeywordState::Failed(FailureClass::AuthError));
    assert_eq!(first.attempts, 2);

    let alert = report.auth_alert.as_deref().expect("auth alert raised");
    assert!(alert.contains("bronica sqa"));
    let batch_entries: Vec<_> = report
        .error_log
        .iter()
        .filter(|e| e.keyword_id.is_none())
        .collect();
    assert_eq!(batch_entries.len(), 1);
    assert_eq!(batch_entries[0].classification, FailureClass::AuthError);

    let run = search_runs::get_run(db.pool(), report.run_id.expect("run created"))
        .await
        .expect("get run");
    assert_eq!(run.error_log.len(), 2);
}

#[tokio::test]
async fn test_hung_attempt_times_out_as_transient() {
    let (db, kws) = seeded_db(&["voigtlander bessa"]).await;
    let market = Arc::new(FakeMarket::default().script("voigtlander bessa", vec![Step::Hang]));
    let mut config = fast_config();
    config.search.max_attempts_per_keyword = 1;
    config.search.attempt_timeout_secs = 1;
    let orchestrator = orchestrator(&config, &db, &market);

    let report = orchestrator.run_batch(kws.clone(), 1).await;

    assert_eq!(report.status, RunStatus::Failed);
    let line = report
        .keyword(id_of(&kws, "voigtlander bessa"))
        .expect("keyword line");
    assert_eq!(line.state, KeywordState::Failed(FailureClass::Transient));
    assert_eq!(line.attempts, 1);
    assert!(line
        .detail
        .as_deref()
        .is_some_and(|d| d.contains("attempt exceeded")));
}

#[tokio::test]
async fn test_schema_drift_keeps_earlier_pages() {
    let (db, kws) = seeded_db(&["canonet ql17"]).await;
    let market = Arc::new(FakeMarket::default().script(
        "canonet ql17",
        vec![
            Step::Paged(vec![256_700_008_001, 256_700_008_002], 2),
            Step::Drift,
        ],
    ));
    let mut config = fast_config();
    config.search.page_limit = 2;
    let orchestrator = orchestrator(&config, &db, &market);

    let report = orchestrator.run_batch(kws.clone(), 1).await;

    assert_eq!(report.status, RunStatus::Failed);
    let line = report.keyword(id_of(&kws, "canonet ql17")).expect("keyword line");
    assert_eq!(line.state, KeywordState::Failed(FailureClass::SchemaDrift));
    assert_eq!(line.attempts, 1);
    assert_eq!(line.results_stored, 2);
    assert_eq!(market.requests.load(Ordering::SeqCst), 2);

    let stored = search_results::query_results(
        db.pool(),
        &ResultFilter {
            run: report.run_id,
            ..ResultFilter::default()
        },
    )
    .await
    .expect("query results");
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn test_rate_limits_reduce_concurrency() {
    let texts = [
        "praktica mtl3",
        "zenit e",
        "kiev 88",
        "lubitel 166",
        "fed 5",
        "smena 8m",
    ];
    let (db, kws) = seeded_db(&texts).await;
    let market = Arc::new(
        FakeMarket::default()
            .script("praktica mtl3", vec![Step::RateLimited])
            .script("zenit e", vec![Step::RateLimited])
            .script("kiev 88", vec![Step::Results(vec![256_700_009_001])])
            .script("lubitel 166", vec![Step::Results(vec![256_700_009_002])])
            .script("fed 5", vec![Step::Results(vec![256_700_009_003])])
            .script("smena 8m", vec![Step::Results(vec![256_700_009_004])]),
    );
    let mut config = fast_config();
    config.search.max_attempts_per_keyword = 1;
    config.search.throttle_threshold = 2;
    config.search.recovery_successes = 50;
    let orchestrator = orchestrator(&config, &db, &market);

    let report = orchestrator.run_batch(kws, 4).await;

    assert_eq!(report.status, RunStatus::PartiallyCompleted);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 2);
    assert_eq!(report.pending, 0);
    assert_eq!(report.effective_concurrency, 2);
}
