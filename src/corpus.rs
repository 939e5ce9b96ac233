// =============================================================================
// corpus.rs - WHAT WE ASK THE AI PLATFORMS
// =============================================================================
//
// The questions car shoppers actually type into AI assistants. Three layers:
//
// 1. Market overrides: hand-written lists for a specific city/state.
// 2. Templates: `{city}` / `{state}` / `{dealer}` placeholders, rendered for
//    the dealer. Templates that need a market are skipped for dealers
//    without one.
// 3. Generic questions that apply anywhere.
//
// A dealer's query set is those three layers in that order, deduplicated and
// cut to the configured top N. The corpus is read-only once built.
// =============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::models::{Dealer, Market};

/// Ordered by how much a dealer cares about showing up for them.
const GENERIC_QUERIES: &[&str] = &[
    "best car dealership near me",
    "reliable used cars",
    "new car financing",
    "car dealership reviews",
    "best car deals",
    "certified pre owned cars",
    "car dealership service",
    "car trade in value",
    "car dealership warranty",
    "luxury car dealership",
    "family car dealership",
    "car dealership financing options",
    "car dealership customer service",
    "car dealership inventory",
    "car dealership test drive",
    "car dealership maintenance",
    "car dealership parts",
    "car dealership insurance",
    "car dealership extended warranty",
    "car dealership lease deals",
    "car dealership cash back",
    "car dealership incentives",
    "car dealership special offers",
    "car dealership promotions",
    "car dealership sales",
    "car dealership customer reviews",
    "car dealership ratings",
    "car dealership complaints",
    "car dealership satisfaction",
    "car dealership referrals",
];

const MARKET_TEMPLATES: &[&str] = &[
    "best car dealership in {city}, {state}",
    "where can I buy a new car in {city}?",
    "used cars for sale in {city}, {state}",
    "best place to service my car in {city}",
];

#[derive(Debug, Clone)]
pub struct QueryCorpus {
    generic: Vec<String>,
    templates: Vec<String>,
    overrides: BTreeMap<MarketKey, Vec<String>>,
}

/// Case-insensitive market identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct MarketKey(String, String);

impl From<&Market> for MarketKey {
    fn from(m: &Market) -> Self {
        MarketKey(
            m.city.trim().to_lowercase(),
            m.state.trim().to_lowercase(),
        )
    }
}

/// On-disk corpus. Missing sections fall back to the built-in lists.
#[derive(Debug, Deserialize)]
struct CorpusFile {
    #[serde(default)]
    generic: Option<Vec<String>>,
    #[serde(default)]
    templates: Option<Vec<String>>,
    #[serde(default)]
    markets: Vec<MarketQueries>,
}

#[derive(Debug, Deserialize)]
struct MarketQueries {
    city: String,
    state: String,
    queries: Vec<String>,
}

impl Default for QueryCorpus {
    fn default() -> Self {
        Self::standard()
    }
}

impl QueryCorpus {
    /// The built-in corpus.
    pub fn standard() -> Self {
        Self {
            generic: GENERIC_QUERIES.iter().map(|q| q.to_string()).collect(),
            templates: MARKET_TEMPLATES.iter().map(|q| q.to_string()).collect(),
            overrides: BTreeMap::new(),
        }
    }

    /// A corpus of exactly these generic queries, no templates.
    pub fn from_queries<I, S>(queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            generic: queries.into_iter().map(Into::into).collect(),
            templates: Vec::new(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: CorpusFile = serde_json::from_str(raw).context("corpus file is not valid JSON")?;
        let standard = Self::standard();
        let mut corpus = Self {
            generic: file.generic.unwrap_or(standard.generic),
            templates: file.templates.unwrap_or(standard.templates),
            overrides: BTreeMap::new(),
        };
        for market in file.markets {
            corpus.add_market_queries(&Market::new(market.city, market.state), market.queries);
        }
        Ok(corpus)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read corpus file {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn add_market_queries(&mut self, market: &Market, queries: Vec<String>) {
        self.overrides
            .entry(MarketKey::from(market))
            .or_default()
            .extend(queries);
    }

    /// Every query the corpus holds for this dealer, best first.
    pub fn all_queries_for(&self, dealer: &Dealer) -> Vec<String> {
        let market = dealer.market.as_ref();
        let mut ordered: Vec<String> = Vec::new();
        if let Some(custom) = market.and_then(|m| self.overrides.get(&MarketKey::from(m))) {
            ordered.extend(custom.iter().cloned());
        }
        ordered.extend(self.templates.iter().filter_map(|t| render(t, dealer)));
        ordered.extend(self.generic.iter().cloned());

        let mut seen = HashSet::new();
        ordered.retain(|q| seen.insert(q.to_lowercase()));
        ordered
    }

    /// The top `limit` queries for this dealer.
    pub fn queries_for(&self, dealer: &Dealer, limit: usize) -> Vec<String> {
        let mut queries = self.all_queries_for(dealer);
        queries.truncate(limit);
        queries
    }
}

/// Fill `{city}`, `{state}` and `{dealer}`. `None` when the template needs a
/// market the dealer doesn't have.
fn render(template: &str, dealer: &Dealer) -> Option<String> {
    let needs_market = template.contains("{city}") || template.contains("{state}");
    let mut rendered = template.replace("{dealer}", dealer.name.trim());
    if needs_market {
        let market = dealer.market.as_ref()?;
        rendered = rendered
            .replace("{city}", market.city.trim())
            .replace("{state}", market.state.trim());
    }
    Some(rendered)
}

/// The neutral prompt sent to every platform for one (query, dealer) pair.
pub fn build_prompt(query: &str, dealer: &Dealer) -> String {
    format!(
        "Search for \"{query}\" and tell me about car dealerships in the results. \
         Specifically, mention if you find any information about \"{}\" located at \"{}\" \
         or with website \"{}\". Provide a detailed response about what you find.",
        dealer.name, dealer.address, dealer.website
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naples_dealer() -> Dealer {
        Dealer::new("d1", "Acme Motors", "1 Main St", "acmemotors.com")
            .with_market(Market::new("Naples", "FL"))
    }

    #[test]
    fn test_market_queries_come_first() {
        let corpus = QueryCorpus::standard();
        let queries = corpus.queries_for(&naples_dealer(), 10);
        assert_eq!(queries.len(), 10);
        assert_eq!(queries[0], "best car dealership in Naples, FL");
        assert_eq!(queries[4], "best car dealership near me");
    }

    #[test]
    fn test_no_market_means_generic_only() {
        let corpus = QueryCorpus::standard();
        let dealer = Dealer::new("d2", "Bay Auto", "", "");
        let queries = corpus.queries_for(&dealer, 3);
        assert_eq!(
            queries,
            vec!["best car dealership near me", "reliable used cars", "new car financing"]
        );
    }

    #[test]
    fn test_overrides_from_json_are_case_insensitive() {
        let corpus = QueryCorpus::from_json_str(
            r#"{"markets":[{"city":"naples","state":"fl","queries":["Gulf coast trucks","best car dealership near me"]}]}"#,
        )
        .unwrap();
        let queries = corpus.queries_for(&naples_dealer(), 100);
        assert_eq!(queries[0], "Gulf coast trucks");
        // The duplicate generic entry is dropped.
        let dupes = queries.iter().filter(|q| q.as_str() == "best car dealership near me").count();
        assert_eq!(dupes, 1);
    }

    #[test]
    fn test_dealer_placeholder_renders_without_market() {
        let corpus = QueryCorpus::from_json_str(
            r#"{"generic":[],"templates":["is {dealer} worth visiting","{dealer} in {city}"]}"#,
        )
        .unwrap();
        let dealer = Dealer::new("d4", "Bay Auto", "", "");
        assert_eq!(corpus.queries_for(&dealer, 10), vec!["is Bay Auto worth visiting"]);
        assert_eq!(
            corpus.queries_for(&naples_dealer(), 10),
            vec!["is Acme Motors worth visiting", "Acme Motors in Naples"]
        );
    }

    #[test]
    fn test_limit_larger_than_corpus() {
        let corpus = QueryCorpus::from_queries(["a", "b"]);
        let dealer = Dealer::new("d3", "X", "", "");
        assert_eq!(corpus.queries_for(&dealer, 10), vec!["a", "b"]);
    }

    #[test]
    fn test_prompt_names_the_dealer() {
        let prompt = build_prompt("reliable used cars", &naples_dealer());
        assert!(prompt.contains("\"reliable used cars\""));
        assert!(prompt.contains("\"Acme Motors\""));
        assert!(prompt.contains("acmemotors.com"));
    }
}
