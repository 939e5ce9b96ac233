// =============================================================================
// reports/mod.rs - WHAT THE DASHBOARD READS
// =============================================================================
//
// Three artifacts per run date, plus the run itself:
//
//   leaderboard-<date>.json            every ranking, platform leaders, trends
//   customer-<dealerId>-<date>.json    one per dealer, with recommendations
//   public-dashboard-<date>.json       top 10 and per-platform stats
//   scan-run-<date>.json               the full ScanRun (audit, and the
//                                      prior period for the next run)
//
// Every artifact is a projection of the ScanRun and the canonical dealer
// summaries. No scoring happens here.
//
// Customer reports never carry raw error text. Failures only show up as
// success rates in the public snapshot and in the stored ScanRun.
// =============================================================================

pub mod redis_store;
pub mod store;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::aggregator::{PlatformTally, ScoringAggregator};
use crate::error::StoreError;
use crate::models::{
    DealerScoreSummary, PlatformLeader, QueryTrend, RankMovement, RankingEntry, ScanRun,
};
use crate::ranking::TOP_PERFORMERS;

use self::store::ReportStore;

pub const QUERY_INSIGHTS: usize = 10;
/// Dealers ranked below this get the generic visibility recommendation.
pub const RECOMMEND_BELOW_RANK: usize = 10;
pub const RECOMMEND_BELOW_AVERAGE: f64 = 50.0;

// =============================================================================
// KEYS
// =============================================================================

const LEADERBOARD: &str = "leaderboard-";
const PUBLIC_DASHBOARD: &str = "public-dashboard-";
const SCAN_RUN: &str = "scan-run-";

pub fn leaderboard_key(date: NaiveDate) -> String {
    format!("{LEADERBOARD}{date}.json")
}

pub fn public_dashboard_key(date: NaiveDate) -> String {
    format!("{PUBLIC_DASHBOARD}{date}.json")
}

pub fn scan_run_key(date: NaiveDate) -> String {
    format!("{SCAN_RUN}{date}.json")
}

fn customer_prefix(dealer_id: &str) -> String {
    format!("customer-{}-", encode_id(dealer_id))
}

pub fn customer_key(dealer_id: &str, date: NaiveDate) -> String {
    format!("{}{date}.json", customer_prefix(dealer_id))
}

/// Dealer ids end up in file names. Every byte outside `[A-Za-z0-9_]` is
/// written as `%XX`, so two different ids never share a key.
fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// The date of `key` if it is exactly `<prefix><YYYY-MM-DD>.json`.
fn key_date(key: &str, prefix: &str) -> Option<NaiveDate> {
    let stamp = key.strip_prefix(prefix)?.strip_suffix(".json")?;
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}

// =============================================================================
// ARTIFACTS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub run_id: String,
    pub run_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub period: String,
    pub rankings: Vec<RankingEntry>,
    pub top_performers: Vec<RankingEntry>,
    pub platform_leaders: BTreeMap<String, Vec<PlatformLeader>>,
    pub query_trends: Vec<QueryTrend>,
    pub biggest_gainers: Vec<RankMovement>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    PlatformPresence,
    OverallVisibility,
    DealerInformation,
    Reputation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub kind: RecommendationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomerReport {
    pub dealer_id: String,
    pub dealer_name: String,
    pub run_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub rank: Option<usize>,
    pub total_dealers: usize,
    pub average_score: f64,
    pub total_score: u64,
    pub query_count: u64,
    pub platform_breakdown: BTreeMap<String, u64>,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub total_queries: u64,
    pub successful_queries: u64,
    /// Percent, 0-100.
    pub success_rate: f64,
    pub average_visibility: f64,
}

impl From<PlatformTally> for PlatformStats {
    fn from(t: PlatformTally) -> Self {
        let (success_rate, average_visibility) = if t.total_queries > 0 {
            (
                t.successful_queries as f64 / t.total_queries as f64 * 100.0,
                t.total_score as f64 / t.total_queries as f64,
            )
        } else {
            (0.0, 0.0)
        };
        Self {
            total_queries: t.total_queries,
            successful_queries: t.successful_queries,
            success_rate,
            average_visibility,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicDashboard {
    pub run_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub total_dealers: usize,
    pub top_performers: Vec<RankingEntry>,
    pub platform_stats: BTreeMap<String, PlatformStats>,
    pub query_insights: Vec<QueryTrend>,
}

// =============================================================================
// PROJECTIONS
// =============================================================================

pub fn build_leaderboard(run: &ScanRun, generated_at: DateTime<Utc>) -> Leaderboard {
    Leaderboard {
        run_id: run.id.clone(),
        run_date: run.run_date,
        generated_at,
        period: "monthly".to_string(),
        rankings: run.rankings.clone(),
        top_performers: run.rankings.iter().take(TOP_PERFORMERS).cloned().collect(),
        platform_leaders: run.trends.platform_leaders.clone(),
        query_trends: run.trends.query_trends.clone(),
        biggest_gainers: run.trends.biggest_gainers.clone(),
    }
}

pub fn recommendations(summary: &DealerScoreSummary, rank: Option<usize>) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    if rank.is_some_and(|r| r > RECOMMEND_BELOW_RANK) {
        recs.push(Recommendation {
            kind: RecommendationKind::OverallVisibility,
            platform: None,
            message: "Focus on improving visibility in top-performing queries".to_string(),
        });
    }

    let weakest = summary
        .per_platform_totals
        .iter()
        .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
    if let Some((platform, _)) = weakest {
        recs.push(Recommendation {
            kind: RecommendationKind::PlatformPresence,
            platform: Some(platform.clone()),
            message: format!("Improve presence on {platform}"),
        });
    }

    if summary.average_score < RECOMMEND_BELOW_AVERAGE {
        recs.push(Recommendation {
            kind: RecommendationKind::DealerInformation,
            platform: None,
            message: "Consider optimizing dealer information and online presence".to_string(),
        });
    }

    if summary.negative_mentions > summary.positive_mentions {
        recs.push(Recommendation {
            kind: RecommendationKind::Reputation,
            platform: None,
            message: "AI answers describe the dealership negatively more often than positively; \
                      address the reviews and complaints they draw on"
                .to_string(),
        });
    }

    recs
}

pub fn build_customer_reports(
    run: &ScanRun,
    summaries: &BTreeMap<String, DealerScoreSummary>,
    generated_at: DateTime<Utc>,
) -> Vec<CustomerReport> {
    let ranks: BTreeMap<&str, usize> = run
        .rankings
        .iter()
        .map(|e| (e.dealer_id.as_str(), e.rank))
        .collect();

    summaries
        .values()
        .map(|summary| {
            let rank = ranks.get(summary.dealer_id.as_str()).copied();
            CustomerReport {
                dealer_id: summary.dealer_id.clone(),
                dealer_name: summary.dealer_name.clone(),
                run_date: run.run_date,
                generated_at,
                rank,
                total_dealers: run.rankings.len(),
                average_score: summary.average_score,
                total_score: summary.total_score,
                query_count: summary.query_count,
                platform_breakdown: summary.per_platform_totals.clone(),
                recommendations: recommendations(summary, rank),
            }
        })
        .collect()
}

pub fn build_public_dashboard(run: &ScanRun, generated_at: DateTime<Utc>) -> PublicDashboard {
    PublicDashboard {
        run_date: run.run_date,
        generated_at,
        total_dealers: run.rankings.len(),
        top_performers: run.rankings.iter().take(TOP_PERFORMERS).cloned().collect(),
        platform_stats: ScoringAggregator::platform_tallies(&run.results)
            .into_iter()
            .map(|(platform, tally)| (platform, PlatformStats::from(tally)))
            .collect(),
        query_insights: run.trends.query_trends.iter().take(QUERY_INSIGHTS).cloned().collect(),
    }
}

// =============================================================================
// EMITTER
// =============================================================================

/// Keys written by one emission.
#[derive(Debug, Clone, Default)]
pub struct EmittedReports {
    pub keys: Vec<String>,
}

pub struct ReportEmitter {
    store: Arc<dyn ReportStore>,
}

impl ReportEmitter {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }

    pub fn reader(&self) -> ReportReader {
        ReportReader::new(Arc::clone(&self.store))
    }

    /// Write every artifact for `run`. The ScanRun itself goes last, so a
    /// stored run always has its reports next to it.
    pub async fn emit(
        &self,
        run: &ScanRun,
        summaries: &BTreeMap<String, DealerScoreSummary>,
    ) -> Result<EmittedReports, StoreError> {
        let generated_at = Utc::now();
        let date = run.run_date;
        let mut emitted = EmittedReports::default();

        for report in build_customer_reports(run, summaries, generated_at) {
            let key = customer_key(&report.dealer_id, date);
            self.write(&key, &report).await?;
            emitted.keys.push(key);
        }

        let key = public_dashboard_key(date);
        self.write(&key, &build_public_dashboard(run, generated_at)).await?;
        emitted.keys.push(key);

        let key = leaderboard_key(date);
        self.write(&key, &build_leaderboard(run, generated_at)).await?;
        emitted.keys.push(key);

        let key = scan_run_key(date);
        self.write(&key, run).await?;
        emitted.keys.push(key);

        info!(
            backend = self.store.backend(),
            run_date = %date,
            documents = emitted.keys.len(),
            "Reports emitted"
        );
        Ok(emitted)
    }

    async fn write<T: Serialize>(&self, key: &str, doc: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(doc)?;
        self.store.put(key, &json).await?;
        debug!(key = %key, "Report stored");
        Ok(())
    }
}

// =============================================================================
// READER
// =============================================================================

/// The read contract the dashboard API consumes.
#[derive(Clone)]
pub struct ReportReader {
    store: Arc<dyn ReportStore>,
}

impl ReportReader {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }

    /// Newest `<prefix><date>.json` key, optionally strictly before `before`.
    async fn latest_key(
        &self,
        prefix: &str,
        before: Option<NaiveDate>,
    ) -> Result<Option<String>, StoreError> {
        let keys = self.store.list_keys(prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key_date(&key, prefix).map(|date| (date, key)))
            .filter(|(date, _)| before.map_or(true, |cutoff| *date < cutoff))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, key)| key))
    }

    async fn load_latest<T: for<'de> Deserialize<'de>>(
        &self,
        prefix: &str,
        before: Option<NaiveDate>,
    ) -> Result<Option<T>, StoreError> {
        let Some(key) = self.latest_key(prefix, before).await? else {
            return Ok(None);
        };
        match self.store.get(&key).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    pub async fn get_latest_leaderboard(&self) -> Result<Leaderboard, StoreError> {
        self.load_latest(LEADERBOARD, None)
            .await?
            .ok_or_else(|| StoreError::NotFound("leaderboard".to_string()))
    }

    pub async fn get_customer_report(&self, dealer_id: &str) -> Result<CustomerReport, StoreError> {
        self.load_latest(&customer_prefix(dealer_id), None)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("customer report for {dealer_id}")))
    }

    pub async fn get_public_snapshot(&self) -> Result<PublicDashboard, StoreError> {
        self.load_latest(PUBLIC_DASHBOARD, None)
            .await?
            .ok_or_else(|| StoreError::NotFound("public dashboard".to_string()))
    }

    /// The most recent stored run dated strictly before `date`.
    pub async fn latest_scan_run_before(&self, date: NaiveDate) -> Result<Option<ScanRun>, StoreError> {
        self.load_latest(SCAN_RUN, Some(date)).await
    }
}
