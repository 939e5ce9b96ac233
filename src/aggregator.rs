// =============================================================================
// aggregator.rs - ONE CANONICAL SUMMARY PER DEALER
// =============================================================================
//
// Every report view is a projection of what this module builds, so there is
// exactly one place where scores are added up.
//
// Results arrive in whatever order the platform workers finished. The fold
// is commutative and works on integers, so rayon can split the input any
// way it likes and the answer is bit-for-bit the same as a sequential pass.
// The average is only computed once, after the merge.
// =============================================================================

use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::models::{DealerScoreSummary, ScanResult, Sentiment};

pub struct ScoringAggregator;

/// Raw per-platform counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformTally {
    pub total_queries: u64,
    /// Calls that produced an answer, whether or not it mentioned the dealer.
    pub successful_queries: u64,
    pub total_score: u64,
}

impl ScoringAggregator {
    /// `dealer_id -> summary`. Failed calls count as zero-score data points.
    pub fn aggregate(results: &[ScanResult]) -> BTreeMap<String, DealerScoreSummary> {
        let mut summaries = results
            .par_iter()
            .fold(BTreeMap::new, |mut acc: BTreeMap<String, DealerScoreSummary>, result| {
                let summary = acc
                    .entry(result.dealer_id.clone())
                    .or_insert_with(|| DealerScoreSummary {
                        dealer_id: result.dealer_id.clone(),
                        dealer_name: result.dealer_name.clone(),
                        ..Default::default()
                    });
                accumulate(summary, result);
                acc
            })
            .reduce(BTreeMap::new, merge_maps);

        for summary in summaries.values_mut() {
            summary.average_score = if summary.query_count > 0 {
                summary.total_score as f64 / summary.query_count as f64
            } else {
                0.0
            };
        }
        summaries
    }

    /// Summed visibility per query string, across every dealer and platform.
    pub fn query_totals(results: &[ScanResult]) -> BTreeMap<String, u64> {
        results
            .par_iter()
            .fold(BTreeMap::new, |mut acc: BTreeMap<String, u64>, result| {
                *acc.entry(result.query.clone()).or_insert(0) += u64::from(result.visibility_score);
                acc
            })
            .reduce(BTreeMap::new, |mut left, right| {
                for (query, score) in right {
                    *left.entry(query).or_insert(0) += score;
                }
                left
            })
    }

    pub fn platform_tallies(results: &[ScanResult]) -> BTreeMap<String, PlatformTally> {
        results
            .par_iter()
            .fold(BTreeMap::new, |mut acc: BTreeMap<String, PlatformTally>, result| {
                let tally = acc.entry(result.platform.clone()).or_default();
                tally.total_queries += 1;
                if !result.is_error() {
                    tally.successful_queries += 1;
                }
                tally.total_score += u64::from(result.visibility_score);
                acc
            })
            .reduce(BTreeMap::new, |mut left, right| {
                for (platform, theirs) in right {
                    let ours = left.entry(platform).or_default();
                    ours.total_queries += theirs.total_queries;
                    ours.successful_queries += theirs.successful_queries;
                    ours.total_score += theirs.total_score;
                }
                left
            })
    }
}

fn accumulate(summary: &mut DealerScoreSummary, result: &ScanResult) {
    let score = u64::from(result.visibility_score);
    *summary
        .per_platform_totals
        .entry(result.platform.clone())
        .or_insert(0) += score;
    summary.total_score += score;
    summary.query_count += 1;

    if result.is_error() {
        summary.failed_queries += 1;
    } else if result.mention_count > 0 {
        match result.sentiment {
            Sentiment::Positive => summary.positive_mentions += 1,
            Sentiment::Negative => summary.negative_mentions += 1,
            Sentiment::Neutral => {}
        }
    }
}

fn merge_maps(
    mut left: BTreeMap<String, DealerScoreSummary>,
    right: BTreeMap<String, DealerScoreSummary>,
) -> BTreeMap<String, DealerScoreSummary> {
    for (dealer_id, theirs) in right {
        match left.get_mut(&dealer_id) {
            Some(ours) => {
                for (platform, score) in theirs.per_platform_totals {
                    *ours.per_platform_totals.entry(platform).or_insert(0) += score;
                }
                ours.total_score += theirs.total_score;
                ours.query_count += theirs.query_count;
                ours.failed_queries += theirs.failed_queries;
                ours.positive_mentions += theirs.positive_mentions;
                ours.negative_mentions += theirs.negative_mentions;
            }
            None => {
                left.insert(dealer_id, theirs);
            }
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::models::Dealer;
    use chrono::Utc;

    fn result(dealer: &str, platform: &str, query: &str, score: u32) -> ScanResult {
        ScanResult {
            dealer_id: dealer.to_string(),
            dealer_name: format!("{dealer} Motors"),
            query: query.to_string(),
            platform: platform.to_string(),
            mention_count: if score > 0 { 1 } else { 0 },
            position: None,
            visibility_score: score,
            sentiment: Sentiment::Neutral,
            timestamp: Utc::now(),
            latency_ms: 0,
            raw_response_text: None,
            error: None,
        }
    }

    fn sample() -> Vec<ScanResult> {
        let mut results = Vec::new();
        for (i, dealer) in ["a", "b", "c", "d"].iter().enumerate() {
            for (j, platform) in ["chatgpt", "claude", "gemini"].iter().enumerate() {
                for (k, query) in ["q1", "q2", "q3"].iter().enumerate() {
                    let score = ((i * 31 + j * 17 + k * 7) % 101) as u32;
                    results.push(result(dealer, platform, query, score));
                }
            }
        }
        results
    }

    #[test]
    fn test_average_is_total_over_count() {
        let summaries = ScoringAggregator::aggregate(&[
            result("a", "chatgpt", "q1", 40),
            result("a", "claude", "q1", 20),
            result("a", "claude", "q2", 0),
        ]);
        let a = &summaries["a"];
        assert_eq!(a.total_score, 60);
        assert_eq!(a.query_count, 3);
        assert_eq!(a.average_score, 20.0);
        assert_eq!(a.per_platform_totals["claude"], 20);
    }

    #[test]
    fn test_failed_calls_count_as_zero() {
        let dealer = Dealer::new("a", "a Motors", "", "");
        let err = PlatformError::Timeout { platform: "claude".into(), timeout_secs: 30 };
        let summaries = ScoringAggregator::aggregate(&[
            result("a", "chatgpt", "q1", 50),
            ScanResult::failed(&dealer, "q1", "claude", &err, 30_000),
        ]);
        let a = &summaries["a"];
        assert_eq!(a.query_count, 2);
        assert_eq!(a.failed_queries, 1);
        assert_eq!(a.average_score, 25.0);
        assert_eq!(a.per_platform_totals["claude"], 0);
        assert_eq!(a.confidence(), 0.5);

        let tallies = ScoringAggregator::platform_tallies(&[
            result("a", "chatgpt", "q1", 50),
            ScanResult::failed(&dealer, "q1", "claude", &err, 30_000),
        ]);
        assert_eq!(
            tallies["claude"],
            PlatformTally { total_queries: 1, successful_queries: 0, total_score: 0 }
        );
        assert_eq!(tallies["chatgpt"].total_score, 50);
    }

    #[test]
    fn test_order_independent() {
        let forward = sample();
        let mut reversed = forward.clone();
        reversed.reverse();
        let mut interleaved: Vec<ScanResult> = forward.iter().step_by(2).cloned().collect();
        interleaved.extend(forward.iter().skip(1).step_by(2).cloned());

        let expected = ScoringAggregator::aggregate(&forward);
        assert_eq!(ScoringAggregator::aggregate(&reversed), expected);
        assert_eq!(ScoringAggregator::aggregate(&interleaved), expected);
        assert_eq!(
            ScoringAggregator::query_totals(&reversed),
            ScoringAggregator::query_totals(&forward)
        );

        let expected_ranks = crate::ranking::rank(&expected);
        assert_eq!(expected_ranks.len(), 4);
        assert_eq!(crate::ranking::rank(&ScoringAggregator::aggregate(&reversed)), expected_ranks);
        assert_eq!(crate::ranking::rank(&ScoringAggregator::aggregate(&interleaved)), expected_ranks);
    }

    #[test]
    fn test_sentiment_counts() {
        let mut happy = result("a", "chatgpt", "q1", 30);
        happy.sentiment = Sentiment::Positive;
        let mut grumpy = result("a", "claude", "q1", 30);
        grumpy.sentiment = Sentiment::Negative;
        let mut grumpy_again = grumpy.clone();
        grumpy_again.query = "q2".into();

        let summaries = ScoringAggregator::aggregate(&[happy, grumpy, grumpy_again]);
        assert_eq!(summaries["a"].positive_mentions, 1);
        assert_eq!(summaries["a"].negative_mentions, 2);
    }

    #[test]
    fn test_empty_input() {
        assert!(ScoringAggregator::aggregate(&[]).is_empty());
        assert!(ScoringAggregator::query_totals(&[]).is_empty());
    }
}
