//! Lotwatch - runs one search batch over every active keyword.

use anyhow::Context;
use lotwatch_browser::{BrowserEngine, EngineSettings};
use lotwatch_core::AppConfig;
use lotwatch_db::{keywords, Database, KeywordStatus};
use lotwatch_scanner::{BatchReport, EnvCredentialProvider, SearchOrchestrator};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Initialize tracing subscriber for logging
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

fn log_report(report: &BatchReport) {
    info!(
        "Run {} {}: {}/{} processed, {} succeeded, {} failed, {} cancelled, {} pending in {}s \
         (concurrency {} at end)",
        report
            .run_id
            .map_or_else(|| "-".to_string(), |id| id.to_string()),
        report.status.as_str(),
        report.processed,
        report.total,
        report.succeeded,
        report.failed,
        report.cancelled,
        report.pending,
        (report.finished_at - report.started_at).num_seconds(),
        report.effective_concurrency
    );
    if let Some(alert) = &report.auth_alert {
        error!("Dispatch stopped: {}", alert);
    }
    for entry in &report.error_log {
        warn!(
            "  {} [{}] after {} attempts: {}",
            if entry.keyword.is_empty() { "<batch>" } else { entry.keyword.as_str() },
            entry.classification,
            entry.attempts,
            entry.detail
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load_with_env().context("loading configuration")?;
    init_tracing(&config.general.log_filter);
    config.validate().context("validating configuration")?;

    info!("Starting Lotwatch v{}", env!("CARGO_PKG_VERSION"));

    let db_path = config.database_path().context("resolving database path")?;
    let db = Database::open(&db_path, config.database.max_connections)
        .await
        .with_context(|| format!("opening database {}", db_path.display()))?;
    db.run_migrations().await.context("running migrations")?;
    let db = Arc::new(db);

    let active = keywords::get_keywords(db.pool(), Some(KeywordStatus::Active), None)
        .await
        .context("loading keywords")?;
    if active.is_empty() {
        info!("No active keywords, nothing to do");
        return Ok(());
    }

    let engine = BrowserEngine::launch(EngineSettings {
        headless: config.browser.headless,
        window_width: config.browser.window_width,
        window_height: config.browser.window_height,
        user_agent: config.browser.user_agent.clone(),
        request_timeout: config.search.request_timeout(),
    })
    .await
    .context("launching browser")?;

    let credentials = EnvCredentialProvider::new(
        config.marketplace.identity_env.clone(),
        config.marketplace.secret_env.clone(),
    );

    let engine = Arc::new(engine);
    let orchestrator = SearchOrchestrator::new(
        &config,
        Arc::clone(&db),
        Arc::clone(&engine) as Arc<dyn lotwatch_browser::SessionFactory>,
        Arc::new(credentials),
    )
    .context("building orchestrator")?;

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling batch");
                cancel.cancel();
            }
            Err(e) => error!("Could not listen for Ctrl-C: {}", e),
        }
    });

    let report = orchestrator
        .run_batch(active, config.search.concurrency_limit)
        .await;
    log_report(&report);
    drop(orchestrator);

    if let Ok(engine) = Arc::try_unwrap(engine) {
        if let Err(e) = engine.close().await {
            warn!("Browser did not shut down cleanly: {}", e);
        }
    }
    db.close().await;
    Ok(())
}
