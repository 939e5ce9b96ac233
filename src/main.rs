// =============================================================================
// main.rs - ONE MONTHLY SCAN, THEN EXIT
// =============================================================================
//
// Wire everything from the environment, scan the roster once, write the
// reports, log a summary. Ctrl+C stops new batches from starting; calls
// already in flight finish first.
//
// Exit code is non-zero whenever the run did not complete.
// =============================================================================

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use visibility_scan_engine::config::{Config, ReportBackend};
use visibility_scan_engine::corpus::QueryCorpus;
use visibility_scan_engine::executor::BatchExecutor;
use visibility_scan_engine::platforms::PlatformRegistry;
use visibility_scan_engine::reports::redis_store::RedisReportStore;
use visibility_scan_engine::reports::store::{FileReportStore, MemoryReportStore, ReportStore};
use visibility_scan_engine::roster::JsonFileRoster;
use visibility_scan_engine::ScanService;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.with_ansi(true).init();
    }
}

async fn build_store(config: &Config) -> Result<Arc<dyn ReportStore>> {
    let store: Arc<dyn ReportStore> = match config.report_backend {
        ReportBackend::File => Arc::new(FileReportStore::new(&config.report_dir)),
        ReportBackend::Memory => Arc::new(MemoryReportStore::new()),
        ReportBackend::Redis => Arc::new(
            RedisReportStore::connect(&config.redis_url, &config.redis_key_prefix)
                .await
                .context("failed to connect the Redis report store")?,
        ),
    };
    info!(backend = store.backend(), "Report store ready");
    Ok(store)
}

fn load_corpus(config: &Config) -> Result<QueryCorpus> {
    match &config.corpus_path {
        Some(path) => QueryCorpus::from_json_file(path),
        None => Ok(QueryCorpus::standard()),
    }
}

async fn run() -> Result<bool> {
    let config = Config::from_env();
    init_tracing(config.log_json);

    info!(
        roster = %config.roster_path.display(),
        batch_size = config.batch_size,
        queries_per_dealer = config.queries_per_dealer,
        platform_concurrency = config.platform_concurrency,
        "Visibility scan engine starting"
    );

    let registry = PlatformRegistry::from_config(&config).context("failed to build platform registry")?;
    let corpus = Arc::new(load_corpus(&config)?);
    let executor = BatchExecutor::new(config.executor_settings(), config.scoring_weights(), corpus);
    let store = build_store(&config).await?;
    let service = ScanService::new(registry, executor, store);
    let roster = JsonFileRoster::new(&config.roster_path);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => warn!("Shutdown signal received, no new batches will start"),
            Err(err) => error!(error = %err, "Signal listener error, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    let (run, failure) = service.run_from_roster(&roster, shutdown_rx).await;

    info!("═══════════════════════════════════════════════════════");
    info!("  {run}");
    for (platform, metrics) in &run.platform_metrics {
        info!(
            platform = %platform,
            attempted = metrics.calls_attempted,
            succeeded = metrics.calls_succeeded,
            failed = metrics.calls_failed,
            circuit_trips = metrics.circuit_trips,
            "Platform summary"
        );
    }
    for entry in run.rankings.iter().take(3) {
        info!(rank = entry.rank, dealer = %entry.dealer_name, average = entry.average_score, "Leaderboard");
    }
    if let Some(failure) = &failure {
        error!(kind = ?failure.kind(), error = %failure, "Run did not complete");
    }
    info!("═══════════════════════════════════════════════════════");

    Ok(run.success)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            // Tracing may not be up yet.
            eprintln!("visibility scan failed to start: {e:#}");
            ExitCode::FAILURE
        }
    }
}
