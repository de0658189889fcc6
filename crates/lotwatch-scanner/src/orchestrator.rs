//! Search orchestrator for running keyword batches.
//!
//! This module provides the `SearchOrchestrator`, which runs a batch of keywords across a fixed
//! pool of workers. Each worker holds one marketplace session, claims keywords from the queue,
//! retries them by failure class, and records every terminal outcome in one transaction.
//!
//! A challenge pauses the whole batch: no claims, retries or requests until the pause ends. A
//! keyword that fails sign-in raises an auth alert and no further keywords are dispatched.

use crate::backoff::{BackoffPolicy, RateController, RequestOutcome};
use crate::credentials::CredentialProvider;
use crate::error::{Result, SearchError};
use crate::parser::ExtractionPipeline;
use crate::queue::{KeywordQueue, QueueOrder, QueueState, QueuedKeyword};
use crate::remediation::RemediationHandle;
use crate::session::{AttemptReport, SearchSession, SearchTarget, SessionSettings};
use crate::throttle::{AdaptiveThrottle, ThrottleSettings, ThrottleSignal};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use lotwatch_browser::{MarketplaceSession, SessionFactory};
use lotwatch_core::{AppConfig, FailureClass, KeywordId, OutcomeKind, RunId, SearchConfig};
use lotwatch_db::{
    outcomes, search_runs, Database, DatabaseError, ErrorLogEntry, Keyword, NewKeywordOutcome,
    RunStatus, SearchResultRecord,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Longest keyword accepted for searching.
pub const MAX_KEYWORD_LEN: usize = 300;

/// How often a parked worker rechecks the throttle.
const PARK_INTERVAL: Duration = Duration::from_secs(1);

/// Settings snapshot taken when the orchestrator is built.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub search: SearchConfig,
    pub session: SessionSettings,
    pub policy: BackoffPolicy,
    pub order: QueueOrder,
}

impl OrchestratorSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            search: config.search.clone(),
            session: SessionSettings::from_config(config),
            policy: BackoffPolicy::from_config(&config.search),
            order: QueueOrder::from_config(&config.search),
        }
    }
}

/// Retry bookkeeping for the keyword a worker is processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts started
    pub attempts: u32,
    /// Classification of the latest failure
    pub last_class: Option<FailureClass>,
    /// Earliest start of the next attempt
    pub next_eligible_at: Option<Instant>,
}

/// Where a keyword ended up in this batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "class", rename_all = "snake_case")]
pub enum KeywordState {
    /// Never claimed, or released unfinished
    Pending,
    Succeeded,
    Failed(FailureClass),
    Cancelled,
}

/// Per-keyword line of a batch report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordReport {
    pub keyword_id: KeywordId,
    pub keyword: String,
    pub state: KeywordState,
    pub attempts: u32,
    /// Rows actually inserted for this keyword
    pub results_stored: u64,
    pub detail: Option<String>,
}

/// Outcome of `run_batch`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    /// `None` when the run could not be created
    pub run_id: Option<RunId>,
    pub status: RunStatus,
    pub total: u32,
    /// Keywords with a recorded terminal outcome
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub pending: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error_log: Vec<ErrorLogEntry>,
    /// Set when sign-in failed and dispatch stopped
    pub auth_alert: Option<String>,
    /// Workers allowed to take keywords when the batch ended
    pub effective_concurrency: usize,
    /// One line per admitted keyword, in queue order
    pub keywords: Vec<KeywordReport>,
}

impl BatchReport {
    /// Report for a batch whose run could not be started.
    fn not_started(queue: &KeywordQueue, started_at: DateTime<Utc>, detail: String) -> Self {
        let keywords: Vec<KeywordReport> = queue
            .snapshot()
            .into_iter()
            .map(|(keyword, _)| pending_report(keyword))
            .collect();
        let total = count_u32(keywords.len());

        Self {
            run_id: None,
            status: RunStatus::Failed,
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            pending: total,
            started_at,
            finished_at: Utc::now(),
            error_log: vec![batch_error(detail)],
            auth_alert: None,
            effective_concurrency: 0,
            keywords,
        }
    }

    /// Look up one keyword's line.
    #[must_use]
    pub fn keyword(&self, id: KeywordId) -> Option<&KeywordReport> {
        self.keywords.iter().find(|k| k.keyword_id == id)
    }
}

fn pending_report(keyword: QueuedKeyword) -> KeywordReport {
    KeywordReport {
        keyword_id: keyword.id,
        keyword: keyword.keyword,
        state: KeywordState::Pending,
        attempts: 0,
        results_stored: 0,
        detail: None,
    }
}

fn batch_error(detail: String) -> ErrorLogEntry {
    ErrorLogEntry {
        keyword_id: None,
        keyword: String::new(),
        classification: FailureClass::Fatal,
        attempts: 0,
        detail,
        at: Utc::now(),
    }
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Why a keyword cannot be searched at all.
fn validate_keyword(text: &str) -> std::result::Result<(), String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty keyword".to_string());
    }
    if trimmed.chars().count() > MAX_KEYWORD_LEN {
        return Err(format!("longer than {MAX_KEYWORD_LEN} characters"));
    }
    Ok(())
}

/// A keyword's terminal outcome before it is persisted.
#[derive(Debug)]
struct Terminal {
    outcome: OutcomeKind,
    class: Option<FailureClass>,
    detail: Option<String>,
    records: Vec<SearchResultRecord>,
    retry: RetryState,
}

impl Terminal {
    fn succeeded(retry: RetryState, records: Vec<SearchResultRecord>) -> Self {
        Self {
            outcome: OutcomeKind::Succeeded,
            class: None,
            detail: None,
            records,
            retry,
        }
    }

    fn failed(retry: RetryState, error: &SearchError, records: Vec<SearchResultRecord>) -> Self {
        Self {
            outcome: OutcomeKind::Failed,
            class: Some(error.class()),
            detail: Some(error.to_string()),
            records,
            retry,
        }
    }

    fn cancelled(mut retry: RetryState, detail: impl Into<String>) -> Self {
        retry.last_class = Some(FailureClass::Cancelled);
        Self {
            outcome: OutcomeKind::Cancelled,
            class: Some(FailureClass::Cancelled),
            detail: Some(detail.into()),
            records: Vec::new(),
            retry,
        }
    }
}

/// How one attempt ended from the worker's side.
enum Attempt {
    /// The session ran to a terminal state, possibly inside the cancellation grace period
    Done {
        report: AttemptReport,
        after_cancel: bool,
    },
    /// Cancelled and the grace period ran out
    Interrupted,
}

/// State shared by the workers of one batch.
struct BatchContext<'q> {
    run_id: RunId,
    queue: &'q KeywordQueue,
    throttle: AdaptiveThrottle,
    /// Child of the orchestrator token; also fired on a batch-level fatal error
    cancel: CancellationToken,
    fatal: Mutex<Option<String>>,
    auth_alert: Mutex<Option<String>>,
    reports: Mutex<Vec<KeywordReport>>,
    error_log: Mutex<Vec<ErrorLogEntry>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BatchContext<'_> {
    fn fail_batch(&self, detail: String) {
        tracing::error!("Search run {} failed: {}", self.run_id, detail);
        let mut fatal = locked(&self.fatal);
        if fatal.is_none() {
            locked(&self.error_log).push(batch_error(detail.clone()));
            *fatal = Some(detail);
        }
        drop(fatal);
        self.cancel.cancel();
    }

    /// Stop dispatching after a sign-in failure. Keywords already claimed run to completion.
    fn raise_auth_alert(&self, keyword: &QueuedKeyword, detail: &str) {
        let mut alert = locked(&self.auth_alert);
        if alert.is_some() {
            return;
        }

        let message = format!("sign-in failed for '{}': {detail}", keyword.keyword);
        tracing::error!(
            "Search run {}: {}; no further keywords will be dispatched",
            self.run_id,
            message
        );
        locked(&self.error_log).push(ErrorLogEntry {
            keyword_id: None,
            keyword: String::new(),
            classification: FailureClass::AuthError,
            attempts: 0,
            detail: message.clone(),
            at: Utc::now(),
        });
        *alert = Some(message);
    }

    fn auth_alerted(&self) -> bool {
        locked(&self.auth_alert).is_some()
    }
}

/// Runs keyword batches against the marketplace.
pub struct SearchOrchestrator {
    /// Database for runs, outcomes and results
    db: Arc<Database>,
    /// Opens one session per worker
    sessions: Arc<dyn SessionFactory>,
    /// Consulted when sign-in is required
    credentials: Arc<dyn CredentialProvider>,
    /// Compiled extraction selectors
    pipeline: ExtractionPipeline,
    /// Configuration snapshot
    settings: OrchestratorSettings,
    /// External challenge remediation signal
    remediation: RemediationHandle,
    /// Cancels the running batch
    cancel: CancellationToken,
}

impl SearchOrchestrator {
    /// Create an orchestrator from a configuration snapshot.
    ///
    /// # Errors
    /// Returns `SearchError::Extract` if a configured selector does not compile.
    pub fn new(
        config: &AppConfig,
        db: Arc<Database>,
        sessions: Arc<dyn SessionFactory>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let pipeline =
            ExtractionPipeline::new(&config.marketplace.selectors, &config.marketplace.base_url)?;

        Ok(Self {
            db,
            sessions,
            credentials,
            pipeline,
            settings: OrchestratorSettings::from_config(config),
            remediation: RemediationHandle::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Share a remediation handle with an operator surface.
    #[must_use]
    pub fn with_remediation(mut self, handle: RemediationHandle) -> Self {
        self.remediation = handle;
        self
    }

    /// Token that cancels the running batch.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Handle for signalling challenge remediation.
    #[must_use]
    pub fn remediation_handle(&self) -> RemediationHandle {
        self.remediation.clone()
    }

    /// Run one batch of keywords with at most `concurrency_limit` workers.
    ///
    /// Only active keywords are admitted. Every admitted keyword ends the batch with exactly one
    /// recorded terminal outcome, or still pending if the batch was cancelled or failed before
    /// a worker reached it. This never returns an error: failures are in the report.
    pub async fn run_batch(
        &self,
        keywords: Vec<Keyword>,
        concurrency_limit: usize,
    ) -> BatchReport {
        let started_at = Utc::now();
        let queue = KeywordQueue::new(keywords, &self.settings.order);
        let total = count_u32(queue.len());
        let limit = concurrency_limit.max(1);

        let run_id = match search_runs::start_run(self.db.pool(), total).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Could not start search run: {}", e);
                return BatchReport::not_started(&queue, started_at, format!("start_run: {e}"));
            }
        };

        tracing::info!(
            "Search run {} started: {} keywords, {} workers",
            run_id,
            total,
            limit.min(queue.len())
        );

        let ctx = BatchContext {
            run_id,
            queue: &queue,
            throttle: AdaptiveThrottle::new(ThrottleSettings::from_config(
                &self.settings.search,
                limit,
            )),
            cancel: self.cancel.child_token(),
            fatal: Mutex::new(None),
            auth_alert: Mutex::new(None),
            reports: Mutex::new(Vec::new()),
            error_log: Mutex::new(Vec::new()),
        };

        let mut workers: FuturesUnordered<_> = (0..limit.min(queue.len()))
            .map(|index| self.worker(index, &ctx))
            .collect();
        while workers.next().await.is_some() {}
        drop(workers);

        self.finish(ctx, total, started_at).await
    }

    async fn finish(
        &self,
        ctx: BatchContext<'_>,
        total: u32,
        started_at: DateTime<Utc>,
    ) -> BatchReport {
        let run_id = ctx.run_id;
        let cancelled_by_caller = self.cancel.is_cancelled();
        let fatal = locked(&ctx.fatal).take();
        let auth_alert = locked(&ctx.auth_alert).take();
        let effective_concurrency = ctx.throttle.effective_limit();
        let recorded = std::mem::take(&mut *locked(&ctx.reports));
        let mut error_log = std::mem::take(&mut *locked(&ctx.error_log));

        let keywords: Vec<KeywordReport> = ctx
            .queue
            .snapshot()
            .into_iter()
            .map(|(keyword, state)| {
                recorded
                    .iter()
                    .find(|r| r.keyword_id == keyword.id)
                    .filter(|_| state != QueueState::Pending)
                    .cloned()
                    .unwrap_or_else(|| pending_report(keyword))
            })
            .collect();

        let tally = |wanted: fn(&KeywordState) -> bool| {
            count_u32(keywords.iter().filter(|k| wanted(&k.state)).count())
        };
        let succeeded = tally(|s| matches!(s, KeywordState::Succeeded));
        let failed = tally(|s| matches!(s, KeywordState::Failed(_)));
        let cancelled = tally(|s| matches!(s, KeywordState::Cancelled));
        let pending = tally(|s| matches!(s, KeywordState::Pending));

        let mut status = if fatal.is_some() {
            RunStatus::Failed
        } else if total == 0 || succeeded == total {
            RunStatus::Completed
        } else if cancelled_by_caller {
            RunStatus::PartiallyCompleted
        } else if succeeded == 0 {
            RunStatus::Failed
        } else {
            RunStatus::PartiallyCompleted
        };

        let mut processed = succeeded + failed + cancelled;
        match search_runs::finalize_run(self.db.pool(), run_id, status, &error_log).await {
            Ok(run) => processed = run.processed_keywords,
            Err(e) => {
                tracing::error!("Could not finalize search run {}: {}", run_id, e);
                error_log.push(batch_error(format!("finalize_run: {e}")));
                status = RunStatus::Failed;
            }
        }

        tracing::info!(
            "Search run {} finished {}: {} succeeded, {} failed, {} cancelled, {} pending",
            run_id,
            status.as_str(),
            succeeded,
            failed,
            cancelled,
            pending
        );

        BatchReport {
            run_id: Some(run_id),
            status,
            total,
            processed,
            succeeded,
            failed,
            cancelled,
            pending,
            started_at,
            finished_at: Utc::now(),
            error_log,
            auth_alert,
            effective_concurrency,
            keywords,
        }
    }

    /// One worker: claim, search with retries, persist, repeat.
    async fn worker(&self, index: usize, ctx: &BatchContext<'_>) {
        let mut handle: Option<Box<dyn MarketplaceSession>> = None;
        let mut controller = RateController::new(self.settings.policy);

        loop {
            if ctx.cancel.is_cancelled() || ctx.auth_alerted() {
                break;
            }

            if let Some(pause) = ctx.throttle.pause_remaining() {
                tracing::debug!("Worker {} paused for {:?}", index, pause);
                tokio::select! {
                    () = tokio::time::sleep(pause) => {}
                    () = ctx.cancel.cancelled() => break,
                }
                continue;
            }

            if !ctx.throttle.admits(index) {
                if ctx.queue.pending_count() == 0 {
                    break;
                }
                tokio::select! {
                    () = ctx.throttle.changed() => {}
                    () = tokio::time::sleep(PARK_INTERVAL) => {}
                    () = ctx.cancel.cancelled() => break,
                }
                continue;
            }

            let Some(claim) = ctx.queue.claim_next() else {
                break;
            };
            let keyword = claim.keyword().clone();

            let terminal = self
                .process_keyword(&keyword, &mut handle, &mut controller, ctx)
                .await;

            match self.persist(ctx, &keyword, terminal).await {
                Ok(outcome) => claim.mark_done(outcome),
                Err(e) => {
                    // The claim is released; the keyword stays pending
                    ctx.fail_batch(format!("recording outcome for '{}': {e}", keyword.keyword));
                    break;
                }
            }
        }

        tracing::debug!("Worker {} finished", index);
    }

    /// Retry loop for one keyword.
    #[tracing::instrument(skip_all, fields(keyword = %keyword.keyword, id = %keyword.id))]
    async fn process_keyword(
        &self,
        keyword: &QueuedKeyword,
        handle: &mut Option<Box<dyn MarketplaceSession>>,
        controller: &mut RateController,
        ctx: &BatchContext<'_>,
    ) -> Terminal {
        let mut retry = RetryState::default();
        let max_attempts = self.settings.search.max_attempts_per_keyword.max(1);

        if let Err(reason) = validate_keyword(&keyword.keyword) {
            let error = SearchError::InvalidKeyword { reason };
            retry.last_class = Some(error.class());
            tracing::error!("Keyword rejected: {}", error);
            return Terminal::failed(retry, &error, Vec::new());
        }

        let target = SearchTarget {
            keyword_id: keyword.id,
            keyword: keyword.keyword.trim().to_string(),
            category: keyword.category.clone(),
        };

        loop {
            if ctx.throttle.pause_remaining().is_some() {
                tokio::select! {
                    () = ctx.throttle.wait_out_pause() => {}
                    () = ctx.cancel.cancelled() => {
                        return Terminal::cancelled(retry, "cancelled during challenge pause");
                    }
                }
            }

            retry.attempts += 1;
            retry.next_eligible_at = None;
            let remediation_mark = self.remediation.generation();

            let (report, after_cancel) =
                match self.attempt(&target, handle, controller, ctx).await {
                    Attempt::Done {
                        report,
                        after_cancel,
                    } => (report, after_cancel),
                    Attempt::Interrupted => {
                        tracing::warn!("Attempt {} interrupted by cancellation", retry.attempts);
                        return Terminal::cancelled(retry, "cancelled during attempt");
                    }
                };

            let Some(error) = report.error else {
                tracing::info!(
                    "Collected {} listings over {} pages (attempt {})",
                    report.records.len(),
                    report.pages_fetched,
                    retry.attempts
                );
                return Terminal::succeeded(retry, report.records);
            };

            if let SearchError::Browser(e) = &error {
                if e.is_session_lost() {
                    tracing::warn!("Session lost ({}), reopening on next attempt", e);
                    *handle = None;
                }
            }

            let class = error.class();
            retry.last_class = Some(class);
            if class == FailureClass::RateLimited {
                ctx.throttle
                    .record_signal(keyword.id, ThrottleSignal::RateLimited);
            }
            if report.pause_requested || class == FailureClass::Challenge {
                ctx.throttle.record_signal(keyword.id, ThrottleSignal::Challenge);
            }

            if after_cancel {
                return if class.is_retryable() {
                    Terminal::cancelled(retry, format!("cancelled after: {error}"))
                } else {
                    Terminal::failed(retry, &error, report.records)
                };
            }

            let budget = class.attempt_budget(max_attempts);
            if !class.is_retryable() || retry.attempts >= budget {
                tracing::error!(
                    "Giving up after {} attempts ({}): {}",
                    retry.attempts,
                    class,
                    error
                );
                return Terminal::failed(retry, &error, report.records);
            }

            if class == FailureClass::Challenge {
                let wait = self.settings.search.challenge_wait();
                tracing::warn!("Challenge served, waiting up to {:?} for remediation", wait);
                let signal = self.remediation.wait_for_signal(remediation_mark, wait);
                let remediated = tokio::select! {
                    signalled = signal => signalled,
                    () = ctx.cancel.cancelled() => {
                        return Terminal::cancelled(retry, "cancelled awaiting remediation");
                    }
                };
                if !remediated {
                    tracing::error!("No remediation within {:?}", wait);
                    return Terminal::failed(retry, &error, report.records);
                }
            }

            let delay = controller.wait_before_next();
            retry.next_eligible_at = Some(Instant::now() + delay);
            tracing::warn!(
                "Attempt {}/{} failed ({}: {}), retrying in {:?}",
                retry.attempts,
                budget,
                class,
                error,
                delay
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancel.cancelled() => {
                    let detail = format!("cancelled during backoff after: {error}");
                    return Terminal::cancelled(retry, detail);
                }
            }
        }
    }

    /// One attempt under the attempt timeout and the batch cancellation token.
    async fn attempt(
        &self,
        target: &SearchTarget,
        handle: &mut Option<Box<dyn MarketplaceSession>>,
        controller: &mut RateController,
        ctx: &BatchContext<'_>,
    ) -> Attempt {
        if handle.is_none() {
            let opened = tokio::select! {
                opened = self.sessions.open_session() => opened,
                () = ctx.cancel.cancelled() => return Attempt::Interrupted,
            };
            match opened {
                Ok(session) => *handle = Some(session),
                Err(e) => {
                    tracing::error!("Could not open a session: {}", e);
                    controller.record_outcome(RequestOutcome::TransientError);
                    return Attempt::Done {
                        report: AttemptReport::failed(SearchError::SessionUnavailable(
                            e.to_string(),
                        )),
                        after_cancel: false,
                    };
                }
            }
        }
        let Some(session) = handle.as_deref_mut() else {
            return Attempt::Done {
                report: AttemptReport::failed(SearchError::SessionUnavailable(
                    "session missing".to_string(),
                )),
                after_cancel: false,
            };
        };

        let limit = self.settings.search.attempt_timeout();
        let search = SearchSession::new(
            session,
            &self.pipeline,
            controller,
            self.credentials.as_ref(),
            &self.settings.session,
        )
        .with_pause_gate(&ctx.throttle);
        let mut running = Box::pin(tokio::time::timeout(limit, search.run(target)));

        let finished = tokio::select! {
            result = &mut running => Some(result),
            () = ctx.cancel.cancelled() => None,
        };

        let (result, after_cancel) = match finished {
            Some(result) => (result, false),
            None => match tokio::time::timeout(self.settings.search.cancel_grace(), &mut running)
                .await
            {
                Ok(result) => (result, true),
                Err(_) => return Attempt::Interrupted,
            },
        };

        drop(running);

        let report = result.unwrap_or_else(|_| {
            tracing::warn!("Attempt exceeded {:?}", limit);
            // The request in flight never reported back
            controller.record_outcome(RequestOutcome::TransientError);
            AttemptReport::failed(SearchError::AttemptTimeout(limit))
        });
        Attempt::Done {
            report,
            after_cancel,
        }
    }

    /// Record the outcome in one transaction and update the batch report.
    async fn persist(
        &self,
        ctx: &BatchContext<'_>,
        keyword: &QueuedKeyword,
        terminal: Terminal,
    ) -> std::result::Result<OutcomeKind, DatabaseError> {
        let finished_at = Utc::now();
        let record = NewKeywordOutcome {
            run_id: ctx.run_id,
            keyword_id: keyword.id,
            outcome: terminal.outcome,
            classification: terminal.class,
            attempts: terminal.retry.attempts,
            detail: terminal.detail.clone(),
            results: terminal.records,
            finished_at,
        };

        let summary = outcomes::record_keyword_outcome(self.db.pool(), &record).await?;
        if summary.already_recorded {
            tracing::warn!("Outcome for '{}' was already recorded", keyword.keyword);
        }

        let state = match (terminal.outcome, terminal.class) {
            (OutcomeKind::Succeeded, _) => KeywordState::Succeeded,
            (OutcomeKind::Cancelled, _) => KeywordState::Cancelled,
            (OutcomeKind::Failed, class) => {
                KeywordState::Failed(class.unwrap_or(FailureClass::Fatal))
            }
        };

        match (state, terminal.class) {
            (KeywordState::Succeeded, _) => {
                ctx.throttle.record_success();
            }
            (_, Some(classification)) => {
                let detail = terminal.detail.clone().unwrap_or_default();
                if classification == FailureClass::AuthError {
                    ctx.raise_auth_alert(keyword, &detail);
                }
                locked(&ctx.error_log).push(ErrorLogEntry {
                    keyword_id: Some(keyword.id),
                    keyword: keyword.keyword.clone(),
                    classification,
                    attempts: terminal.retry.attempts,
                    detail,
                    at: finished_at,
                });
            }
            (_, None) => {}
        }

        locked(&ctx.reports).push(KeywordReport {
            keyword_id: keyword.id,
            keyword: keyword.keyword.clone(),
            state,
            attempts: terminal.retry.attempts,
            results_stored: summary.results_inserted,
            detail: terminal.detail,
        });

        Ok(terminal.outcome)
    }
}
