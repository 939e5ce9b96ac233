// =============================================================================
// mention_analyzer.rs - DID THE ROBOT MENTION OUR DEALER?
// =============================================================================
//
// Given the text a platform returned and the dealer we asked about, work out:
//
// - how many times the dealer's name or website host shows up (ASCII
//   case-insensitive, each pattern counted on its own),
// - where the first name mention sits, as a percentage of the text,
// - a 0-100 visibility score,
// - the tone of the sentences that mention the dealer.
//
// Matching runs on Aho-Corasick automata built once per dealer per scan,
// so the byte offsets they report are offsets into the original text.
//
// Whatever the weights, the score keeps four properties: it never drops when
// mentions go up, it never rises when the first mention moves later, it stays
// in [0, 100], and zero mentions always means zero.
// =============================================================================

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::models::{Dealer, Sentiment};

static POSITIVE_KEYWORDS: &[&str] = &[
    "excellent",
    "great",
    "best",
    "top",
    "recommended",
    "outstanding",
    "professional",
    "friendly",
    "helpful",
    "quality",
    "reliable",
    "trusted",
];

static NEGATIVE_KEYWORDS: &[&str] = &[
    "poor",
    "bad",
    "worst",
    "avoid",
    "terrible",
    "unprofessional",
    "rude",
    "dishonest",
    "overpriced",
    "scam",
];

static POSITIVE_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(POSITIVE_KEYWORDS)
        .expect("Failed to build positive sentiment automaton")
});

static NEGATIVE_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(NEGATIVE_KEYWORDS)
        .expect("Failed to build negative sentiment automaton")
});

/// Responses longer than `min_chars` characters earn `bonus` points.
/// Tiers stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthBonusTier {
    pub min_chars: usize,
    pub bonus: u32,
}

/// Weights for the visibility formula:
///
/// ```text
/// score = min(100, mentions * mention_weight
///                  + max(0, position_bonus_max - position / position_bucket_width)
///                  + sum(tier.bonus for tier where chars > tier.min_chars))
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub mention_weight: u32,
    pub position_bonus_max: u32,
    pub position_bucket_width: u32,
    pub length_bonus_tiers: Vec<LengthBonusTier>,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            mention_weight: 10,
            position_bonus_max: 20,
            position_bucket_width: 5,
            length_bonus_tiers: vec![
                LengthBonusTier { min_chars: 500, bonus: 5 },
                LengthBonusTier { min_chars: 1000, bonus: 5 },
            ],
        }
    }
}

pub const MAX_SCORE: u32 = 100;

/// What the analyzer made of one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionAnalysis {
    pub mention_count: u32,
    pub position: Option<u32>,
    pub visibility_score: u32,
    pub sentiment: Sentiment,
}

/// Pattern matchers for one dealer.
pub struct MentionMatcher {
    name: Option<AhoCorasick>,
    host: Option<AhoCorasick>,
}

impl MentionMatcher {
    pub fn for_dealer(dealer: &Dealer) -> Self {
        Self {
            name: build_matcher(dealer.name.trim()),
            host: dealer.website_host().as_deref().and_then(build_matcher),
        }
    }

    /// Analyze one response text.
    pub fn analyze(&self, text: &str, weights: &ScoringWeights) -> MentionAnalysis {
        let name_hits = count(self.name.as_ref(), text);
        let host_hits = count(self.host.as_ref(), text);
        let mention_count = name_hits.saturating_add(host_hits);

        let position = self.first_name_position(text);
        let text_chars = text.chars().count();
        let visibility_score = visibility_score(mention_count, position, text_chars, weights);
        let sentiment = self.sentiment(text);

        debug!(
            name_hits = name_hits,
            host_hits = host_hits,
            position = ?position,
            text_chars = text_chars,
            visibility_score = visibility_score,
            "Mention analysis complete"
        );

        MentionAnalysis {
            mention_count,
            position,
            visibility_score,
            sentiment,
        }
    }

    /// Percentage (0-100) of the first name occurrence, measured in
    /// characters. `None` when the name never appears.
    fn first_name_position(&self, text: &str) -> Option<u32> {
        let matcher = self.name.as_ref()?;
        let first = matcher.find(text)?;
        let total_chars = text.chars().count();
        if total_chars == 0 {
            return None;
        }
        let offset_chars = text[..first.start()].chars().count();
        let pct = (offset_chars as f64 / total_chars as f64 * 100.0).round();
        Some((pct as u32).min(100))
    }

    /// Tone of the sentences that name the dealer. Ties are neutral.
    fn sentiment(&self, text: &str) -> Sentiment {
        let Some(matcher) = self.name.as_ref() else {
            return Sentiment::Neutral;
        };

        let mut positive = 0usize;
        let mut negative = 0usize;
        for sentence in text.split(['.', '!', '?']) {
            if !matcher.is_match(sentence) {
                continue;
            }
            positive += POSITIVE_AUTOMATON.find_iter(sentence).count();
            negative += NEGATIVE_AUTOMATON.find_iter(sentence).count();
        }

        match positive.cmp(&negative) {
            std::cmp::Ordering::Greater => Sentiment::Positive,
            std::cmp::Ordering::Less => Sentiment::Negative,
            std::cmp::Ordering::Equal => Sentiment::Neutral,
        }
    }
}

/// The visibility formula. See [`ScoringWeights`].
pub fn visibility_score(
    mention_count: u32,
    position: Option<u32>,
    text_chars: usize,
    weights: &ScoringWeights,
) -> u32 {
    if mention_count == 0 {
        return 0;
    }

    let mention_points = mention_count.saturating_mul(weights.mention_weight);

    let position_points = match position {
        Some(pct) => {
            let bucket = pct.min(100) / weights.position_bucket_width.max(1);
            weights.position_bonus_max.saturating_sub(bucket)
        }
        None => 0,
    };

    let length_points: u32 = weights
        .length_bonus_tiers
        .iter()
        .filter(|tier| text_chars > tier.min_chars)
        .map(|tier| tier.bonus)
        .sum();

    mention_points
        .saturating_add(position_points)
        .saturating_add(length_points)
        .min(MAX_SCORE)
}

fn build_matcher(pattern: &str) -> Option<AhoCorasick> {
    if pattern.is_empty() {
        return None;
    }
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build([pattern])
        .ok()
}

fn count(matcher: Option<&AhoCorasick>, text: &str) -> u32 {
    matcher
        .map(|m| m.find_iter(text).count() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> Dealer {
        Dealer::new("acme", "Acme Motors", "1 Main St", "https://www.acmemotors.com")
    }

    /// `len` chars of filler with `insert` placed at char offset `at`.
    fn text_with(insert: &str, at: usize, len: usize) -> String {
        let mut text = "x".repeat(at);
        text.push_str(insert);
        while text.chars().count() < len {
            text.push('x');
        }
        text
    }

    #[test]
    fn test_acme_at_ten_percent_of_1200_chars() {
        let text = text_with(" Acme Motors ", 120, 1200);
        let analysis = MentionMatcher::for_dealer(&acme()).analyze(&text, &ScoringWeights::default());
        assert_eq!(analysis.mention_count, 1);
        assert_eq!(analysis.position, Some(10));
        // 10 (mention) + 18 (position) + 10 (length)
        assert_eq!(analysis.visibility_score, 38);
    }

    #[test]
    fn test_zero_mentions_scores_zero() {
        let text = "word ".repeat(400);
        let analysis = MentionMatcher::for_dealer(&acme()).analyze(&text, &ScoringWeights::default());
        assert_eq!(analysis.mention_count, 0);
        assert_eq!(analysis.position, None);
        assert_eq!(analysis.visibility_score, 0);
    }

    #[test]
    fn test_case_insensitive_name_and_host() {
        let text = "ACME MOTORS is great. Visit AcmeMotors.com or acme motors on Main.";
        let analysis = MentionMatcher::for_dealer(&acme()).analyze(text, &ScoringWeights::default());
        assert_eq!(analysis.mention_count, 3);
        assert_eq!(analysis.position, Some(0));
    }

    #[test]
    fn test_website_only_mention_has_no_position() {
        let text = "You could check acmemotors.com for inventory.";
        let analysis = MentionMatcher::for_dealer(&acme()).analyze(text, &ScoringWeights::default());
        assert_eq!(analysis.mention_count, 1);
        assert_eq!(analysis.position, None);
        assert_eq!(analysis.visibility_score, 10);
    }

    #[test]
    fn test_score_is_monotonic_in_mentions() {
        let weights = ScoringWeights::default();
        let mut previous = 0;
        for mentions in 0..20 {
            let score = visibility_score(mentions, Some(40), 800, &weights);
            assert!(score >= previous);
            assert!(score <= MAX_SCORE);
            previous = score;
        }
    }

    #[test]
    fn test_score_never_rises_with_later_position() {
        let weights = ScoringWeights::default();
        let mut previous = u32::MAX;
        for position in 0..=100 {
            let score = visibility_score(1, Some(position), 300, &weights);
            assert!(score <= previous);
            previous = score;
        }
    }

    #[test]
    fn test_score_caps_at_100() {
        assert_eq!(visibility_score(50, Some(0), 5000, &ScoringWeights::default()), 100);
    }

    #[test]
    fn test_sentiment_from_mentioning_sentences_only() {
        let matcher = MentionMatcher::for_dealer(&acme());
        let weights = ScoringWeights::default();

        let positive = matcher.analyze(
            "Acme Motors is trusted and friendly. Other dealers are terrible.",
            &weights,
        );
        assert_eq!(positive.sentiment, Sentiment::Positive);

        let negative = matcher.analyze("Avoid Acme Motors, the staff is rude.", &weights);
        assert_eq!(negative.sentiment, Sentiment::Negative);

        let absent = matcher.analyze("The best dealers are elsewhere.", &weights);
        assert_eq!(absent.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn test_empty_dealer_name_never_matches() {
        let dealer = Dealer::new("blank", "  ", "", "");
        let analysis = MentionMatcher::for_dealer(&dealer).analyze("anything at all", &ScoringWeights::default());
        assert_eq!(analysis.mention_count, 0);
        assert_eq!(analysis.visibility_score, 0);
    }
}
