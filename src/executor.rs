// =============================================================================
// executor.rs - THE BATCH EXECUTOR
// =============================================================================
//
// Turns (dealers x queries x platforms) into ScanResults without getting us
// banned by anyone.
//
//   roster ──chunks of B──> batch ──┬── lane "chatgpt" ── pool of K workers ──┐
//                                   ├── lane "claude"  ── pool of K workers ──┼──> crossbeam ──> results
//                                   └── lane "gemini"  ── pool of K workers ──┘
//                                   (pause between batches, cancellable)
//
// One lane per available platform, built once per run. A lane owns the
// platform's token bucket (call spacing), circuit breaker and counters, so
// two platforms never slow each other down and each platform is paced the
// same no matter how many workers its pool runs.
//
// Every call is wrapped in a timeout. Whatever happens to a call that was
// sent, exactly one ScanResult comes out of it. Failures become zero-score results and
// the batch carries on.
//
// Shutdown is checked before every call, after every batch and during the
// pause between batches. Calls already in flight are allowed to finish;
// nothing new starts once shutdown is requested.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::Sender;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::corpus::{build_prompt, QueryCorpus};
use crate::error::PlatformError;
use crate::mention_analyzer::{MentionMatcher, ScoringWeights};
use crate::metrics::{FailureLog, FailureLogPolicy, PlatformMetrics, PlatformMetricsSnapshot};
use crate::models::{Dealer, ScanResult};
use crate::platforms::PlatformAdapter;
use crate::rate_limiter::TokenBucket;

#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub batch_size: usize,
    pub queries_per_dealer: usize,
    pub batch_delay: Duration,
    /// Minimum spacing between calls to the same platform.
    pub call_delay: Duration,
    pub concurrency_per_platform: usize,
    pub call_timeout: Duration,
    pub keep_raw_responses: bool,
    pub breaker: BreakerSettings,
    pub failure_log: FailureLogPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            queries_per_dealer: 10,
            batch_delay: Duration::from_secs(2),
            call_delay: Duration::from_secs(1),
            concurrency_per_platform: 2,
            call_timeout: Duration::from_secs(30),
            keep_raw_responses: true,
            breaker: BreakerSettings::default(),
            failure_log: FailureLogPolicy::default(),
        }
    }
}

impl ExecutorSettings {
    /// No pacing at all. For tests and dry runs against local mocks.
    pub fn immediate() -> Self {
        Self {
            batch_delay: Duration::ZERO,
            call_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Split the roster into batches of at most `batch_size`. Order is kept.
pub fn partition(dealers: &[Dealer], batch_size: usize) -> Vec<&[Dealer]> {
    dealers.chunks(batch_size.max(1)).collect()
}

/// Everything the collection phase produced.
#[derive(Debug, Default)]
pub struct Collection {
    pub results: Vec<ScanResult>,
    pub platform_metrics: BTreeMap<String, PlatformMetricsSnapshot>,
    pub batches_completed: usize,
    /// Shutdown was requested before the last call went out.
    pub cancelled: bool,
}

/// One (dealer, query) unit of work, shared by every lane in a batch.
struct Job {
    dealer: Dealer,
    query: String,
    prompt: String,
    matcher: Arc<MentionMatcher>,
}

/// Per-platform state for one run.
struct Lane {
    adapter: Arc<dyn PlatformAdapter>,
    breaker: CircuitBreaker,
    bucket: TokenBucket,
    metrics: PlatformMetrics,
}

impl Lane {
    fn new(adapter: Arc<dyn PlatformAdapter>, settings: &ExecutorSettings) -> Self {
        let breaker = CircuitBreaker::new(
            adapter.name(),
            settings.breaker.failure_threshold,
            settings.breaker.reset_timeout,
            settings.breaker.success_threshold,
        );
        Self {
            breaker,
            bucket: TokenBucket::new(1, settings.call_delay),
            metrics: PlatformMetrics::new(settings.failure_log),
            adapter,
        }
    }

    fn name(&self) -> &str {
        self.adapter.name()
    }

    /// One call, one result. Never fails. `None` only when shutdown came
    /// before the call went out.
    async fn call(
        &self,
        job: &Job,
        settings: &ExecutorSettings,
        weights: &ScoringWeights,
        shutdown: &watch::Receiver<bool>,
    ) -> Option<ScanResult> {
        let platform = self.name();

        if *shutdown.borrow() {
            return None;
        }

        if !self.breaker.allow_request() {
            let err = PlatformError::CircuitOpen {
                platform: platform.to_string(),
            };
            self.log_failure(job, &err, 0);
            return Some(ScanResult::failed(&job.dealer, &job.query, platform, &err, 0));
        }

        self.bucket.acquire().await;
        if *shutdown.borrow() {
            debug!(platform = platform, dealer = %job.dealer.id, "Shutdown while paced, call not sent");
            return None;
        }

        let started = Instant::now();
        let outcome = match tokio::time::timeout(settings.call_timeout, self.adapter.query(&job.prompt)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PlatformError::Timeout {
                platform: platform.to_string(),
                timeout_secs: settings.call_timeout.as_secs(),
            }),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(text) => {
                self.breaker.record_success();
                let analysis = job.matcher.analyze(&text, weights);
                self.metrics.record_success(latency_ms, analysis.mention_count);

                debug!(
                    platform = platform,
                    dealer = %job.dealer.id,
                    query = %job.query,
                    mentions = analysis.mention_count,
                    score = analysis.visibility_score,
                    latency_ms = latency_ms,
                    "Call scored"
                );

                Some(ScanResult {
                    dealer_id: job.dealer.id.clone(),
                    dealer_name: job.dealer.name.clone(),
                    query: job.query.clone(),
                    platform: platform.to_string(),
                    mention_count: analysis.mention_count,
                    position: analysis.position,
                    visibility_score: analysis.visibility_score,
                    sentiment: analysis.sentiment,
                    timestamp: Utc::now(),
                    latency_ms,
                    raw_response_text: settings.keep_raw_responses.then_some(text),
                    error: None,
                })
            }
            Err(err) => {
                if err.trips_breaker() {
                    self.breaker.record_failure();
                }
                self.log_failure(job, &err, latency_ms);
                Some(ScanResult::failed(&job.dealer, &job.query, platform, &err, latency_ms))
            }
        }
    }

    fn log_failure(&self, job: &Job, err: &PlatformError, latency_ms: u64) {
        match self.metrics.record_failure(err, latency_ms) {
            FailureLog::Emit => warn!(
                platform = self.name(),
                dealer = %job.dealer.id,
                category = %err.category(),
                error = %err,
                "Platform call failed"
            ),
            FailureLog::EmitWithSuppressed(suppressed) => warn!(
                platform = self.name(),
                dealer = %job.dealer.id,
                category = %err.category(),
                error = %err,
                suppressed = suppressed,
                "Platform call failed (similar failures suppressed)"
            ),
            FailureLog::Suppress => debug!(
                platform = self.name(),
                dealer = %job.dealer.id,
                error = %err,
                "Platform call failed"
            ),
        }
    }
}

pub struct BatchExecutor {
    settings: Arc<ExecutorSettings>,
    weights: Arc<ScoringWeights>,
    corpus: Arc<QueryCorpus>,
}

impl BatchExecutor {
    pub fn new(settings: ExecutorSettings, weights: ScoringWeights, corpus: Arc<QueryCorpus>) -> Self {
        Self {
            settings: Arc::new(settings),
            weights: Arc::new(weights),
            corpus,
        }
    }

    /// Run every batch against every given platform.
    ///
    /// `platforms` should already be filtered to configured adapters.
    pub async fn collect(
        &self,
        dealers: &[Dealer],
        platforms: &[Arc<dyn PlatformAdapter>],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Collection {
        let lanes: Vec<Arc<Lane>> = platforms
            .iter()
            .map(|adapter| Arc::new(Lane::new(Arc::clone(adapter), &self.settings)))
            .collect();

        let batches = partition(dealers, self.settings.batch_size);
        let total_batches = batches.len();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<ScanResult>();
        let mut collection = Collection::default();

        info!(
            dealers = dealers.len(),
            batches = total_batches,
            platforms = lanes.len(),
            batch_size = self.settings.batch_size,
            queries_per_dealer = self.settings.queries_per_dealer,
            "Collection started"
        );

        for (index, batch) in batches.into_iter().enumerate() {
            if *shutdown.borrow() {
                warn!(batch = index + 1, of = total_batches, "Shutdown requested, not starting batch");
                collection.cancelled = true;
                break;
            }

            let batch_started = Instant::now();
            let jobs = Arc::new(self.jobs_for(batch));
            self.run_batch(&lanes, &jobs, &result_tx, shutdown).await;
            collection.results.extend(result_rx.try_iter());

            if *shutdown.borrow() {
                warn!(
                    batch = index + 1,
                    of = total_batches,
                    results = collection.results.len(),
                    "Shutdown requested mid-batch, in-flight calls finished"
                );
                collection.cancelled = true;
                break;
            }
            collection.batches_completed += 1;

            info!(
                batch = index + 1,
                of = total_batches,
                dealers = batch.len(),
                calls = jobs.len() * lanes.len(),
                results = collection.results.len(),
                elapsed_ms = batch_started.elapsed().as_millis() as u64,
                "Batch complete"
            );

            let is_last = index + 1 == total_batches;
            if !is_last && pause_or_cancel(self.settings.batch_delay, shutdown).await {
                warn!(batch = index + 1, of = total_batches, "Shutdown requested between batches");
                collection.cancelled = true;
                break;
            }
        }

        drop(result_tx);
        collection.results.extend(result_rx.try_iter());

        for lane in &lanes {
            let trips = lane.breaker.total_trips();
            collection
                .platform_metrics
                .insert(lane.name().to_string(), lane.metrics.snapshot(trips));
        }

        collection
    }

    fn jobs_for(&self, batch: &[Dealer]) -> Vec<Job> {
        let mut jobs = Vec::new();
        for dealer in batch {
            let matcher = Arc::new(MentionMatcher::for_dealer(dealer));
            for query in self.corpus.queries_for(dealer, self.settings.queries_per_dealer) {
                jobs.push(Job {
                    prompt: build_prompt(&query, dealer),
                    dealer: dealer.clone(),
                    query,
                    matcher: Arc::clone(&matcher),
                });
            }
        }
        jobs
    }

    /// Fan the batch out to every lane and wait for all of them. A lane
    /// stops taking jobs as soon as shutdown is requested.
    async fn run_batch(
        &self,
        lanes: &[Arc<Lane>],
        jobs: &Arc<Vec<Job>>,
        result_tx: &Sender<ScanResult>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let mut workers = JoinSet::new();

        for lane in lanes {
            let lane = Arc::clone(lane);
            let jobs = Arc::clone(jobs);
            let settings = Arc::clone(&self.settings);
            let weights = Arc::clone(&self.weights);
            let shutdown = shutdown.clone();
            let tx = result_tx.clone();

            workers.spawn(async move {
                let concurrency = settings.concurrency_per_platform.clamp(1, 4);
                let gate = shutdown.clone();
                stream::iter(0..jobs.len())
                    .take_while(move |_| futures::future::ready(!*gate.borrow()))
                    .map(|i| {
                        let lane = Arc::clone(&lane);
                        let jobs = Arc::clone(&jobs);
                        let settings = Arc::clone(&settings);
                        let weights = Arc::clone(&weights);
                        let shutdown = shutdown.clone();
                        async move { lane.call(&jobs[i], &settings, &weights, &shutdown).await }
                    })
                    .buffer_unordered(concurrency)
                    .filter_map(futures::future::ready)
                    .for_each(|result| {
                        if tx.send(result).is_err() {
                            error!(platform = lane.name(), "Result channel closed, dropping result");
                        }
                        futures::future::ready(())
                    })
                    .await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Platform worker pool aborted mid-batch");
            }
        }
    }
}

/// Sleep for `delay` unless shutdown is requested first. Returns true if it was.
async fn pause_or_cancel(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    if delay.is_zero() {
        return false;
    }

    let pause = tokio::time::sleep(delay);
    tokio::pin!(pause);

    loop {
        tokio::select! {
            _ = &mut pause => return false,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => return true,
                Ok(()) => continue,
                // Nobody can cancel us anymore; sit out the rest of the pause.
                Err(_) => {
                    (&mut pause).await;
                    return false;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::{MockPlatform, Reply};
    use crate::platforms::PlatformRegistry;

    fn dealers(n: usize) -> Vec<Dealer> {
        (1..=n)
            .map(|i| Dealer::new(format!("d{i}"), format!("Dealer Number{i}"), "Main St", format!("dealer{i}.com")))
            .collect()
    }

    fn executor(settings: ExecutorSettings) -> BatchExecutor {
        BatchExecutor::new(
            settings,
            ScoringWeights::default(),
            Arc::new(QueryCorpus::from_queries(["best dealer", "cheap trucks"])),
        )
    }

    fn two_queries() -> ExecutorSettings {
        ExecutorSettings {
            queries_per_dealer: 2,
            ..ExecutorSettings::immediate()
        }
    }

    #[test]
    fn test_partition_sizes() {
        for (n, b) in [(0, 20), (1, 20), (20, 20), (21, 20), (45, 20), (7, 1)] {
            let roster = dealers(n);
            let batches = partition(&roster, b);
            assert_eq!(batches.len(), n.div_ceil(b), "n={n} b={b}");
            assert!(batches.iter().all(|batch| batch.len() <= b));
            assert_eq!(batches.iter().map(|batch| batch.len()).sum::<usize>(), n);
        }
    }

    #[tokio::test]
    async fn test_every_combination_produces_one_result() {
        let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![
            Arc::new(MockPlatform::new("alpha", Reply::Echo)),
            Arc::new(MockPlatform::new("beta", Reply::Echo)),
        ];
        let (_tx, mut rx) = watch::channel(false);

        let collection = executor(two_queries()).collect(&dealers(3), &platforms, &mut rx).await;

        assert!(!collection.cancelled);
        assert_eq!(collection.results.len(), 12);
        assert!(collection.results.iter().all(|r| !r.is_error() && r.mention_count > 0));
        assert_eq!(collection.platform_metrics["alpha"].calls_succeeded, 6);
    }

    #[tokio::test]
    async fn test_unconfigured_platform_is_never_called() {
        let mut registry = PlatformRegistry::new();
        registry
            .register(Arc::new(MockPlatform::new("alpha", Reply::Echo)))
            .register(Arc::new(MockPlatform::unconfigured("beta")));
        let availability = registry.availability();
        let (_tx, mut rx) = watch::channel(false);

        let collection = executor(two_queries())
            .collect(&dealers(3), &availability.available, &mut rx)
            .await;

        assert_eq!(collection.results.len(), 6);
        assert!(collection.results.iter().all(|r| r.platform == "alpha"));
        assert!(!collection.platform_metrics.contains_key("beta"));
    }

    #[tokio::test]
    async fn test_failing_platform_is_isolated() {
        let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![
            Arc::new(MockPlatform::new("alpha", Reply::Echo)),
            Arc::new(MockPlatform::new(
                "beta",
                Reply::Fail(PlatformError::RateLimited { platform: "beta".into(), status: 429 }),
            )),
        ];
        let (_tx, mut rx) = watch::channel(false);

        let collection = executor(two_queries()).collect(&dealers(2), &platforms, &mut rx).await;

        assert_eq!(collection.results.len(), 8);
        let (failed, ok): (Vec<_>, Vec<_>) = collection.results.iter().partition(|r| r.is_error());
        assert_eq!(failed.len(), 4);
        assert!(failed.iter().all(|r| r.platform == "beta" && r.visibility_score == 0));
        assert!(ok.iter().all(|r| r.platform == "alpha" && r.visibility_score > 0));
        assert_eq!(collection.platform_metrics["beta"].transient_errors, 4);
    }

    #[tokio::test]
    async fn test_breaker_trips_and_short_circuits() {
        let failing = Arc::new(MockPlatform::new(
            "beta",
            Reply::Fail(PlatformError::Other { platform: "beta".into(), message: "503".into() }),
        ));
        let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![failing.clone()];
        let settings = ExecutorSettings {
            concurrency_per_platform: 1,
            breaker: BreakerSettings {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(600),
                success_threshold: 1,
            },
            ..two_queries()
        };
        let (_tx, mut rx) = watch::channel(false);

        let collection = executor(settings).collect(&dealers(3), &platforms, &mut rx).await;

        assert_eq!(collection.results.len(), 6);
        assert_eq!(failing.calls(), 2);
        let short_circuited = collection
            .results
            .iter()
            .filter(|r| r.error.as_ref().map(|e| e.kind.as_str()) == Some("circuit_open"))
            .count();
        assert_eq!(short_circuited, 4);
        assert_eq!(collection.platform_metrics["beta"].circuit_trips, 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let platforms: Vec<Arc<dyn PlatformAdapter>> =
            vec![Arc::new(MockPlatform::new("slow", Reply::Slow(Duration::from_secs(5))))];
        let settings = ExecutorSettings {
            queries_per_dealer: 1,
            call_timeout: Duration::from_millis(50),
            ..ExecutorSettings::immediate()
        };
        let (_tx, mut rx) = watch::channel(false);

        let collection = executor(settings).collect(&dealers(1), &platforms, &mut rx).await;

        assert_eq!(collection.results.len(), 1);
        let err = collection.results[0].error.as_ref().unwrap();
        assert_eq!(err.kind, "timeout");
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![Arc::new(MockPlatform::new("alpha", Reply::Echo))];
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let collection = executor(two_queries()).collect(&dealers(3), &platforms, &mut rx).await;

        assert!(collection.cancelled);
        assert!(collection.results.is_empty());
        assert_eq!(collection.batches_completed, 0);
    }

    #[tokio::test]
    async fn test_cancel_between_batches_keeps_finished_batch() {
        let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![Arc::new(MockPlatform::new("alpha", Reply::Echo))];
        let settings = ExecutorSettings {
            batch_size: 1,
            batch_delay: Duration::from_secs(30),
            ..two_queries()
        };
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });

        let collection = executor(settings).collect(&dealers(3), &platforms, &mut rx).await;

        assert!(collection.cancelled);
        assert_eq!(collection.batches_completed, 1);
        assert_eq!(collection.results.len(), 2);
        assert!(collection.results.iter().all(|r| r.dealer_id == "d1"));
    }

    #[tokio::test]
    async fn test_cancel_during_last_batch() {
        let platforms: Vec<Arc<dyn PlatformAdapter>> =
            vec![Arc::new(MockPlatform::new("slow", Reply::Slow(Duration::from_millis(300))))];
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let collection = executor(two_queries()).collect(&dealers(1), &platforms, &mut rx).await;

        assert!(collection.cancelled);
        assert_eq!(collection.batches_completed, 0);
        // Both calls were already in flight and get to finish.
        assert_eq!(collection.results.len(), 2);
    }

    #[tokio::test]
    async fn test_no_new_calls_after_cancel() {
        let slow = Arc::new(MockPlatform::new("slow", Reply::Slow(Duration::from_millis(300))));
        let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![slow.clone()];
        let settings = ExecutorSettings {
            concurrency_per_platform: 1,
            ..two_queries()
        };
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let collection = executor(settings).collect(&dealers(3), &platforms, &mut rx).await;

        assert!(collection.cancelled);
        assert_eq!(slow.calls(), 1);
        assert_eq!(collection.results.len(), 1);
        assert!(!collection.results[0].is_error());
        assert_eq!(collection.platform_metrics["slow"].calls_attempted, 1);
    }

    #[tokio::test]
    async fn test_raw_text_can_be_dropped() {
        let platforms: Vec<Arc<dyn PlatformAdapter>> = vec![Arc::new(MockPlatform::new("alpha", Reply::Echo))];
        let settings = ExecutorSettings {
            keep_raw_responses: false,
            ..two_queries()
        };
        let (_tx, mut rx) = watch::channel(false);

        let collection = executor(settings).collect(&dealers(1), &platforms, &mut rx).await;

        assert!(collection.results.iter().all(|r| r.raw_response_text.is_none()));
    }
}
