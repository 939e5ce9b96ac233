// =============================================================================
// ranking.rs - WHO'S WINNING, WHERE, AND WHO'S CLIMBING
// =============================================================================
//
// Ranking order is a total order:
//
//   1. average score, descending
//   2. total score, descending
//   3. dealer id, ascending
//
// so two runs over the same summaries always produce the same leaderboard,
// whatever order the summaries came in.
//
// Trends are derived from the summaries and the per-query totals. Rank
// movement needs a prior run; without one the gainers list stays empty.
// =============================================================================

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::models::{
    DealerScoreSummary, PlatformLeader, QueryTrend, RankMovement, RankingEntry, TrendReport,
};

pub const TOP_PERFORMERS: usize = 10;
pub const PLATFORM_LEADERS: usize = 5;
pub const QUERY_TRENDS: usize = 20;
pub const BIGGEST_GAINERS: usize = 5;

fn leaderboard_order(a: &DealerScoreSummary, b: &DealerScoreSummary) -> Ordering {
    b.average_score
        .total_cmp(&a.average_score)
        .then_with(|| b.total_score.cmp(&a.total_score))
        .then_with(|| a.dealer_id.cmp(&b.dealer_id))
}

/// 1-based leaderboard.
pub fn rank(summaries: &BTreeMap<String, DealerScoreSummary>) -> Vec<RankingEntry> {
    let mut ordered: Vec<&DealerScoreSummary> = summaries.values().collect();
    ordered.sort_by(|a, b| leaderboard_order(a, b));

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, s)| RankingEntry {
            rank: i + 1,
            dealer_id: s.dealer_id.clone(),
            dealer_name: s.dealer_name.clone(),
            average_score: s.average_score,
            total_score: s.total_score,
            per_platform_totals: s.per_platform_totals.clone(),
        })
        .collect()
}

/// Per platform, the top `limit` dealers by that platform's summed score.
pub fn platform_leaders(
    summaries: &BTreeMap<String, DealerScoreSummary>,
    limit: usize,
) -> BTreeMap<String, Vec<PlatformLeader>> {
    let mut leaders: BTreeMap<String, Vec<PlatformLeader>> = BTreeMap::new();

    for summary in summaries.values() {
        for (platform, score) in &summary.per_platform_totals {
            leaders.entry(platform.clone()).or_default().push(PlatformLeader {
                dealer_id: summary.dealer_id.clone(),
                dealer_name: summary.dealer_name.clone(),
                score: *score,
            });
        }
    }

    for board in leaders.values_mut() {
        board.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.dealer_id.cmp(&b.dealer_id)));
        board.truncate(limit);
    }
    leaders
}

/// The top `limit` queries by summed visibility.
pub fn query_trends(query_totals: &BTreeMap<String, u64>, limit: usize) -> Vec<QueryTrend> {
    let mut trends: Vec<QueryTrend> = query_totals
        .iter()
        .map(|(query, score)| QueryTrend {
            query: query.clone(),
            score: *score,
        })
        .collect();
    trends.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.query.cmp(&b.query)));
    trends.truncate(limit);
    trends
}

/// Rank movement for every dealer ranked in both runs, biggest climb first.
/// Empty without a prior run.
pub fn biggest_gainers(
    current: &[RankingEntry],
    prior: Option<&[RankingEntry]>,
    limit: usize,
) -> Vec<RankMovement> {
    let Some(prior) = prior else {
        return Vec::new();
    };

    let previous: HashMap<&str, usize> = prior
        .iter()
        .map(|entry| (entry.dealer_id.as_str(), entry.rank))
        .collect();

    let mut movements: Vec<RankMovement> = current
        .iter()
        .filter_map(|entry| {
            let previous_rank = *previous.get(entry.dealer_id.as_str())?;
            Some(RankMovement {
                dealer_id: entry.dealer_id.clone(),
                dealer_name: entry.dealer_name.clone(),
                previous_rank,
                current_rank: entry.rank,
                delta: previous_rank as i64 - entry.rank as i64,
            })
        })
        .collect();

    movements.sort_by(|a, b| b.delta.cmp(&a.delta).then_with(|| a.dealer_id.cmp(&b.dealer_id)));
    movements.truncate(limit);
    movements
}

pub fn build_trends(
    rankings: &[RankingEntry],
    summaries: &BTreeMap<String, DealerScoreSummary>,
    query_totals: &BTreeMap<String, u64>,
    prior: Option<&[RankingEntry]>,
) -> TrendReport {
    TrendReport {
        top_performers: rankings.iter().take(TOP_PERFORMERS).cloned().collect(),
        platform_leaders: platform_leaders(summaries, PLATFORM_LEADERS),
        query_trends: query_trends(query_totals, QUERY_TRENDS),
        biggest_gainers: biggest_gainers(rankings, prior, BIGGEST_GAINERS),
    }
}
