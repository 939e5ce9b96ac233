// =============================================================================
// models.rs - THE DATA THAT FLOWS THROUGH A SCAN
// =============================================================================
//
// Leaves first: a Dealer goes in, a ScanResult comes out of every single
// (dealer x query x platform) call, and everything after that is derived:
// summaries, rankings, trends, and finally the ScanRun that wraps it all.
//
// Every derived type is built once per stage and handed to the next stage by
// value. Nothing here is mutated after it leaves the stage that made it.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{ErrorCategory, PlatformError, RunFailureKind, RunFatalError};
use crate::metrics::PlatformMetricsSnapshot;

/// A city/state pair. Queries are market-specific, dealers live in a market.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Market {
    pub city: String,
    pub state: String,
}

impl Market {
    pub fn new(city: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            state: state.into(),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.city, self.state)
    }
}

/// A dealership from the external roster. Immutable for the duration of a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dealer {
    pub id: String,
    pub name: String,
    pub address: String,
    pub website: String,
    #[serde(default)]
    pub market: Option<Market>,
}

impl Dealer {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        website: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            website: website.into(),
            market: None,
        }
    }

    pub fn with_market(mut self, market: Market) -> Self {
        self.market = Some(market);
        self
    }

    /// The bare, lowercased host of the dealer's website, without `www.`.
    ///
    /// Roster websites come in every shape imaginable ("acme.com",
    /// "https://www.acme.com/", "www.acme.com/new-cars"), so a missing scheme
    /// is patched in before parsing.
    pub fn website_host(&self) -> Option<String> {
        let raw = self.website.trim();
        if raw.is_empty() {
            return None;
        }
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };
        let parsed = url::Url::parse(&with_scheme).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }
}

/// How a platform talked about the dealer in the sentences that mention it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

/// Why a call produced a zero-score result. Audit material only; customer
/// reports never show it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallError {
    pub kind: String,
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&PlatformError> for CallError {
    fn from(err: &PlatformError) -> Self {
        Self {
            kind: err.kind().to_string(),
            category: err.category(),
            message: err.to_string(),
        }
    }
}

/// One (dealer x query x platform) call. The unit of truth for everything
/// downstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub dealer_id: String,
    pub dealer_name: String,
    pub query: String,
    pub platform: String,
    pub mention_count: u32,
    /// Percentile (0-100) of the first name mention within the response.
    pub position: Option<u32>,
    /// 0-100.
    pub visibility_score: u32,
    #[serde(default)]
    pub sentiment: Sentiment,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallError>,
}

impl ScanResult {
    /// A zero-score result for a call that failed. Failed calls still count.
    pub fn failed(
        dealer: &Dealer,
        query: &str,
        platform: &str,
        err: &PlatformError,
        latency_ms: u64,
    ) -> Self {
        Self {
            dealer_id: dealer.id.clone(),
            dealer_name: dealer.name.clone(),
            query: query.to_string(),
            platform: platform.to_string(),
            mention_count: 0,
            position: None,
            visibility_score: 0,
            sentiment: Sentiment::Neutral,
            timestamp: Utc::now(),
            latency_ms,
            raw_response_text: None,
            error: Some(CallError::from(err)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-dealer rollup of every result in a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DealerScoreSummary {
    pub dealer_id: String,
    pub dealer_name: String,
    pub per_platform_totals: BTreeMap<String, u64>,
    pub total_score: u64,
    pub query_count: u64,
    /// `total_score / query_count`, or 0 when there were no queries.
    pub average_score: f64,
    pub failed_queries: u64,
    pub positive_mentions: u64,
    pub negative_mentions: u64,
}

impl DealerScoreSummary {
    /// Confidence in the average: 0 with no data points, 1 once every
    /// query produced an answer. Failed queries drag it down.
    pub fn confidence(&self) -> f64 {
        if self.query_count == 0 {
            return 0.0;
        }
        (self.query_count - self.failed_queries) as f64 / self.query_count as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    /// 1-based.
    pub rank: usize,
    pub dealer_id: String,
    pub dealer_name: String,
    pub average_score: f64,
    pub total_score: u64,
    pub per_platform_totals: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformLeader {
    pub dealer_id: String,
    pub dealer_name: String,
    pub score: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryTrend {
    pub query: String,
    pub score: u64,
}

/// Rank change between the prior period and this one. Positive delta means
/// the dealer climbed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankMovement {
    pub dealer_id: String,
    pub dealer_name: String,
    pub previous_rank: usize,
    pub current_rank: usize,
    pub delta: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrendReport {
    pub top_performers: Vec<RankingEntry>,
    pub platform_leaders: BTreeMap<String, Vec<PlatformLeader>>,
    pub query_trends: Vec<QueryTrend>,
    /// Empty unless a prior run was supplied.
    pub biggest_gainers: Vec<RankMovement>,
}

/// Lifecycle of a ScanRun.
///
/// `Pending -> Collecting -> Aggregating -> Ranking -> Reporting -> Completed`,
/// or `Failed` from anywhere outside the per-call isolation boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Pending,
    Collecting,
    Aggregating,
    Ranking,
    Reporting,
    Completed,
    Failed,
}

impl ScanPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanPhase::Completed | ScanPhase::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: ScanPhase) -> bool {
        use ScanPhase::*;
        match (self, next) {
            (Pending, Collecting)
            | (Collecting, Aggregating)
            | (Aggregating, Ranking)
            | (Ranking, Reporting)
            | (Reporting, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanPhase::Pending => "PENDING",
            ScanPhase::Collecting => "COLLECTING",
            ScanPhase::Aggregating => "AGGREGATING",
            ScanPhase::Ranking => "RANKING",
            ScanPhase::Reporting => "REPORTING",
            ScanPhase::Completed => "COMPLETED",
            ScanPhase::Failed => "FAILED",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    pub kind: RunFailureKind,
    pub message: String,
}

impl From<&RunFatalError> for RunFailure {
    fn from(err: &RunFatalError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One invocation of the monthly scan. Never mutated after emission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanRun {
    pub id: String,
    pub run_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: ScanPhase,
    pub dealer_count: usize,
    pub platforms_scanned: Vec<String>,
    pub platforms_skipped: Vec<String>,
    pub results: Vec<ScanResult>,
    pub rankings: Vec<RankingEntry>,
    pub trends: TrendReport,
    #[serde(default)]
    pub platform_metrics: BTreeMap<String, PlatformMetricsSnapshot>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
}

impl ScanRun {
    pub fn pending(started_at: DateTime<Utc>, dealer_count: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_date: started_at.date_naive(),
            started_at,
            finished_at: None,
            phase: ScanPhase::Pending,
            dealer_count,
            platforms_scanned: Vec::new(),
            platforms_skipped: Vec::new(),
            results: Vec::new(),
            rankings: Vec::new(),
            trends: TrendReport::default(),
            platform_metrics: BTreeMap::new(),
            success: false,
            error: None,
        }
    }

    pub fn failed_queries(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }
}

impl fmt::Display for ScanRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} on {}: {} dealers, {} results ({} failed), {} platforms",
            self.id,
            self.phase,
            self.run_date,
            self.dealer_count,
            self.results.len(),
            self.failed_queries(),
            self.platforms_scanned.len()
        )
    }
}
