// =============================================================================
// scan.rs - RUN MONTHLY SCAN
// =============================================================================
//
// The one entry point. Drives a ScanRun through its phases:
//
//   PENDING -> COLLECTING -> AGGREGATING -> RANKING -> REPORTING -> COMPLETED
//        \__________\______________\___________\___________\______> FAILED
//
// Only run-level problems end in FAILED: no roster, no configured platform,
// cancellation, or a report store that won't take the reports. Individual
// call failures are already zero-score results by the time they get here.
//
// Each stage builds its output locally and hands it to the next by value.
// A failed run comes back together with the error that ended it.
// =============================================================================

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::aggregator::ScoringAggregator;
use crate::error::RunFatalError;
use crate::executor::BatchExecutor;
use crate::models::{Dealer, RunFailure, ScanPhase, ScanRun};
use crate::platforms::PlatformRegistry;
use crate::ranking;
use crate::reports::store::ReportStore;
use crate::reports::{ReportEmitter, ReportReader};
use crate::roster::DealerRoster;

pub struct ScanService {
    registry: PlatformRegistry,
    executor: BatchExecutor,
    emitter: ReportEmitter,
}

impl ScanService {
    pub fn new(registry: PlatformRegistry, executor: BatchExecutor, store: Arc<dyn ReportStore>) -> Self {
        Self {
            registry,
            executor,
            emitter: ReportEmitter::new(store),
        }
    }

    pub fn reader(&self) -> ReportReader {
        self.emitter.reader()
    }

    /// Load the roster, then scan it.
    pub async fn run_from_roster(
        &self,
        roster: &dyn DealerRoster,
        shutdown: watch::Receiver<bool>,
    ) -> (ScanRun, Option<RunFatalError>) {
        match roster.load().await {
            Ok(dealers) => self.run_monthly_scan(&dealers, shutdown).await,
            Err(e) => fail(
                ScanRun::pending(Utc::now(), 0),
                RunFatalError::RosterUnavailable(format!("{e:#}")),
            ),
        }
    }

    /// Scan every dealer on every configured platform and emit the reports.
    ///
    /// Always returns the run. When the run failed, the error that ended it
    /// comes alongside; the run's own `error` field carries the same failure
    /// in serializable form.
    pub async fn run_monthly_scan(
        &self,
        dealers: &[Dealer],
        mut shutdown: watch::Receiver<bool>,
    ) -> (ScanRun, Option<RunFatalError>) {
        let mut run = ScanRun::pending(Utc::now(), dealers.len());
        info!(run_id = %run.id, run_date = %run.run_date, dealers = dealers.len(), "Monthly scan starting");

        // =====================================================================
        // PLATFORMS
        // =====================================================================
        let availability = self.registry.availability();
        for skipped in &availability.unavailable {
            warn!(
                platform = %skipped.name,
                env_var = %skipped.credential_env,
                "Platform not configured, skipping it for this run"
            );
        }
        run.platforms_skipped = availability.unavailable.iter().map(|p| p.name.clone()).collect();
        run.platforms_scanned = availability
            .available
            .iter()
            .map(|p| p.name().to_string())
            .collect();

        if availability.available.is_empty() {
            let mut missing: Vec<String> = availability
                .unavailable
                .iter()
                .map(|p| p.credential_env.clone())
                .collect();
            missing.sort();
            missing.dedup();
            return fail(run, RunFatalError::NoPlatformsConfigured { missing });
        }

        // =====================================================================
        // COLLECTING
        // =====================================================================
        advance(&mut run, ScanPhase::Collecting);
        let collection = self
            .executor
            .collect(dealers, &availability.available, &mut shutdown)
            .await;
        run.results = collection.results;
        run.platform_metrics = collection.platform_metrics;

        if collection.cancelled {
            return fail(run, RunFatalError::Cancelled);
        }

        // =====================================================================
        // AGGREGATING
        // =====================================================================
        advance(&mut run, ScanPhase::Aggregating);
        let summaries = ScoringAggregator::aggregate(&run.results);
        let query_totals = ScoringAggregator::query_totals(&run.results);

        // =====================================================================
        // RANKING
        // =====================================================================
        advance(&mut run, ScanPhase::Ranking);
        let prior = match self.reader().latest_scan_run_before(run.run_date).await {
            Ok(prior) => prior,
            Err(e) => {
                warn!(error = %e, "Could not load the prior scan run, rank movement skipped");
                None
            }
        };
        if let Some(prior) = &prior {
            info!(prior_run = %prior.id, prior_date = %prior.run_date, "Comparing against prior run");
        }

        run.rankings = ranking::rank(&summaries);
        run.trends = ranking::build_trends(
            &run.rankings,
            &summaries,
            &query_totals,
            prior.as_ref().map(|p| p.rankings.as_slice()),
        );

        // =====================================================================
        // REPORTING
        // =====================================================================
        advance(&mut run, ScanPhase::Reporting);

        // What gets stored is the finished run.
        let mut completed = run.clone();
        completed.phase = ScanPhase::Completed;
        completed.success = true;
        completed.finished_at = Some(Utc::now());

        match self.emitter.emit(&completed, &summaries).await {
            Ok(_) => {
                info!(
                    run = %completed,
                    leader = completed.rankings.first().map(|e| e.dealer_name.as_str()).unwrap_or("-"),
                    "Monthly scan complete"
                );
                (completed, None)
            }
            Err(e) => fail(run, RunFatalError::Store(e)),
        }
    }
}

fn advance(run: &mut ScanRun, next: ScanPhase) {
    debug_assert!(run.phase.can_advance_to(next), "{} -> {}", run.phase, next);
    info!(run_id = %run.id, from = %run.phase, to = %next, "Scan phase");
    run.phase = next;
}

fn fail(mut run: ScanRun, err: RunFatalError) -> (ScanRun, Option<RunFatalError>) {
    error!(run_id = %run.id, phase = %run.phase, error = %err, "Monthly scan failed");
    run.phase = ScanPhase::Failed;
    run.success = false;
    run.error = Some(RunFailure::from(&err));
    run.finished_at = Some(Utc::now());
    (run, Some(err))
}
