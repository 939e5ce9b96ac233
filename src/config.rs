// =============================================================================
// config.rs - EVERY KNOB THE SCAN HAS
// =============================================================================
//
// All values come from environment variables with defaults that work out of
// the box. The five platform secrets use their vendors' conventional names;
// everything else is namespaced with VISIBILITY_SCAN_.
//
// The pacing defaults (batches of 20, 2s between batches, 1s between calls)
// and the scoring weights are hand-tuned, not derived. They are knobs so they
// can be recalibrated without a release.
// =============================================================================

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::executor::{BreakerSettings, ExecutorSettings};
use crate::metrics::FailureLogPolicy;
use crate::mention_analyzer::{LengthBonusTier, ScoringWeights};

/// Where reports go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportBackend {
    /// One JSON file per artifact in `report_dir`.
    File,
    /// Kept in process memory; handy for dry runs.
    Memory,
    /// Redis string keys plus a sorted-set index by date.
    Redis,
}

impl ReportBackend {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => ReportBackend::Memory,
            "redis" => ReportBackend::Redis,
            _ => ReportBackend::File,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // PLATFORM SECRETS
    // Absent (or empty) key == platform disabled for the run.
    // =========================================================================
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub perplexity_api_key: Option<String>,
    pub xai_api_key: Option<String>,

    // =========================================================================
    // PLATFORM ENDPOINTS AND MODELS
    // Model ids and token limits are configuration, not structure.
    // =========================================================================
    pub openai_endpoint: String,
    pub openai_model: String,
    pub anthropic_endpoint: String,
    pub anthropic_model: String,
    /// Base URL; the model and `:generateContent` are appended per call.
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub perplexity_endpoint: String,
    pub perplexity_model: String,
    pub xai_endpoint: String,
    pub xai_model: String,
    pub max_tokens: u32,

    // =========================================================================
    // PACING
    // =========================================================================
    pub batch_size: usize,
    pub queries_per_dealer: usize,
    pub batch_delay: Duration,
    pub call_delay: Duration,
    /// Worker pool size per platform, clamped to 1..=4.
    pub platform_concurrency: usize,
    pub call_timeout: Duration,

    // =========================================================================
    // CIRCUIT BREAKER
    // =========================================================================
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_reset_timeout: Duration,
    pub circuit_breaker_success_threshold: u32,

    // =========================================================================
    // FAILURE LOG THROTTLING
    // The first `failure_log_burst` failures per platform are logged, then
    // only every `failure_log_every`-th.
    // =========================================================================
    pub failure_log_burst: u64,
    pub failure_log_every: u64,

    // =========================================================================
    // SCORING
    // =========================================================================
    pub mention_weight: u32,
    pub position_bonus_max: u32,
    pub position_bucket_width: u32,
    pub length_bonus_tiers: Vec<LengthBonusTier>,

    // =========================================================================
    // INPUTS AND OUTPUTS
    // =========================================================================
    pub roster_path: PathBuf,
    pub corpus_path: Option<PathBuf>,
    pub report_backend: ReportBackend,
    pub report_dir: PathBuf,
    pub redis_url: String,
    pub redis_key_prefix: String,
    pub keep_raw_responses: bool,
    pub log_json: bool,
}

impl Config {
    /// Load configuration from the environment (and a `.env` file, if there
    /// is one).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Config {
            openai_api_key: secret("OPENAI_API_KEY"),
            anthropic_api_key: secret("ANTHROPIC_API_KEY"),
            google_api_key: secret("GOOGLE_API_KEY"),
            perplexity_api_key: secret("PERPLEXITY_API_KEY"),
            xai_api_key: secret("XAI_API_KEY"),

            openai_endpoint: env_or_default(
                "VISIBILITY_SCAN_OPENAI_ENDPOINT",
                "https://api.openai.com/v1/chat/completions",
            ),
            openai_model: env_or_default("VISIBILITY_SCAN_OPENAI_MODEL", "gpt-4"),
            anthropic_endpoint: env_or_default(
                "VISIBILITY_SCAN_ANTHROPIC_ENDPOINT",
                "https://api.anthropic.com/v1/messages",
            ),
            anthropic_model: env_or_default(
                "VISIBILITY_SCAN_ANTHROPIC_MODEL",
                "claude-3-sonnet-20240229",
            ),
            gemini_base_url: env_or_default(
                "VISIBILITY_SCAN_GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta/models",
            ),
            gemini_model: env_or_default("VISIBILITY_SCAN_GEMINI_MODEL", "gemini-pro"),
            perplexity_endpoint: env_or_default(
                "VISIBILITY_SCAN_PERPLEXITY_ENDPOINT",
                "https://api.perplexity.ai/chat/completions",
            ),
            perplexity_model: env_or_default(
                "VISIBILITY_SCAN_PERPLEXITY_MODEL",
                "llama-3.1-sonar-large-128k-online",
            ),
            xai_endpoint: env_or_default(
                "VISIBILITY_SCAN_XAI_ENDPOINT",
                "https://api.x.ai/v1/chat/completions",
            ),
            xai_model: env_or_default("VISIBILITY_SCAN_XAI_MODEL", "grok-beta"),
            max_tokens: env_or_default("VISIBILITY_SCAN_MAX_TOKENS", "1000")
                .parse().unwrap_or(1000),

            batch_size: env_or_default("VISIBILITY_SCAN_BATCH_SIZE", "20")
                .parse().unwrap_or(20),
            queries_per_dealer: env_or_default("VISIBILITY_SCAN_QUERIES_PER_DEALER", "10")
                .parse().unwrap_or(10),
            batch_delay: Duration::from_millis(
                env_or_default("VISIBILITY_SCAN_BATCH_DELAY_MS", "2000").parse().unwrap_or(2000)
            ),
            call_delay: Duration::from_millis(
                env_or_default("VISIBILITY_SCAN_CALL_DELAY_MS", "1000").parse().unwrap_or(1000)
            ),
            platform_concurrency: env_or_default("VISIBILITY_SCAN_PLATFORM_CONCURRENCY", "2")
                .parse::<usize>().unwrap_or(2).clamp(1, 4),
            call_timeout: Duration::from_secs(
                env_or_default("VISIBILITY_SCAN_CALL_TIMEOUT_SECS", "30").parse().unwrap_or(30)
            ),

            circuit_breaker_failure_threshold: env_or_default(
                "VISIBILITY_SCAN_CB_FAILURE_THRESHOLD", "5"
            ).parse().unwrap_or(5),
            circuit_breaker_reset_timeout: Duration::from_secs(
                env_or_default("VISIBILITY_SCAN_CB_RESET_TIMEOUT_SECS", "60").parse().unwrap_or(60)
            ),
            circuit_breaker_success_threshold: env_or_default(
                "VISIBILITY_SCAN_CB_SUCCESS_THRESHOLD", "2"
            ).parse().unwrap_or(2),

            failure_log_burst: env_or_default("VISIBILITY_SCAN_FAILURE_LOG_BURST", "3")
                .parse().unwrap_or(3),
            failure_log_every: env_or_default("VISIBILITY_SCAN_FAILURE_LOG_EVERY", "25")
                .parse().unwrap_or(25),

            mention_weight: env_or_default("VISIBILITY_SCAN_MENTION_WEIGHT", "10")
                .parse().unwrap_or(10),
            position_bonus_max: env_or_default("VISIBILITY_SCAN_POSITION_BONUS_MAX", "20")
                .parse().unwrap_or(20),
            position_bucket_width: env_or_default("VISIBILITY_SCAN_POSITION_BUCKET_WIDTH", "5")
                .parse().unwrap_or(5),
            length_bonus_tiers: parse_length_tiers(&env_or_default(
                "VISIBILITY_SCAN_LENGTH_BONUS_TIERS",
                "500:5,1000:5",
            )),

            roster_path: PathBuf::from(env_or_default(
                "VISIBILITY_SCAN_ROSTER_PATH",
                "dealers.json",
            )),
            corpus_path: env::var("VISIBILITY_SCAN_CORPUS_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            report_backend: ReportBackend::parse(&env_or_default(
                "VISIBILITY_SCAN_REPORT_BACKEND",
                "file",
            )),
            report_dir: PathBuf::from(env_or_default("VISIBILITY_SCAN_REPORT_DIR", "reports")),
            redis_url: env_or_default("VISIBILITY_SCAN_REDIS_URL", "redis://127.0.0.1:6379"),
            redis_key_prefix: env_or_default("VISIBILITY_SCAN_REDIS_KEY_PREFIX", "visibility"),
            keep_raw_responses: env_flag("VISIBILITY_SCAN_KEEP_RAW_RESPONSES", true),
            log_json: env_flag("VISIBILITY_SCAN_LOG_JSON", false),
        }
    }

    /// The pacing/concurrency slice of the config, as the executor sees it.
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            batch_size: self.batch_size.max(1),
            queries_per_dealer: self.queries_per_dealer,
            batch_delay: self.batch_delay,
            call_delay: self.call_delay,
            concurrency_per_platform: self.platform_concurrency.clamp(1, 4),
            call_timeout: self.call_timeout,
            keep_raw_responses: self.keep_raw_responses,
            breaker: BreakerSettings {
                failure_threshold: self.circuit_breaker_failure_threshold,
                reset_timeout: self.circuit_breaker_reset_timeout,
                success_threshold: self.circuit_breaker_success_threshold,
            },
            failure_log: FailureLogPolicy {
                burst: self.failure_log_burst,
                every: self.failure_log_every,
            },
        }
    }

    pub fn scoring_weights(&self) -> ScoringWeights {
        ScoringWeights {
            mention_weight: self.mention_weight,
            position_bonus_max: self.position_bonus_max,
            position_bucket_width: self.position_bucket_width.max(1),
            length_bonus_tiers: self.length_bonus_tiers.clone(),
        }
    }
}

/// `"500:5,1000:5"` -> two tiers. Malformed entries are dropped.
pub fn parse_length_tiers(raw: &str) -> Vec<LengthBonusTier> {
    let mut tiers: Vec<LengthBonusTier> = raw
        .split(',')
        .filter_map(|entry| {
            let (min_len, bonus) = entry.trim().split_once(':')?;
            Some(LengthBonusTier {
                min_chars: min_len.trim().parse().ok()?,
                bonus: bonus.trim().parse().ok()?,
            })
        })
        .collect();
    tiers.sort_by_key(|t| t.min_chars);
    tiers
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn secret(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
