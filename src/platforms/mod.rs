// =============================================================================
// platforms/mod.rs - THE AI ANSWER ENGINES WE INTERROGATE
// =============================================================================
//
// Every provider sits behind one trait. Request building and response
// parsing live entirely inside the adapter; nothing else in the crate ever
// sees a provider payload.
//
// Adapters are registered into a name -> adapter map at startup. Adding a
// provider is "implement PlatformAdapter and register it".
//
// Registered out of the box:
//
//   chatgpt     OpenAI chat completions      OPENAI_API_KEY
//   perplexity  OpenAI-style completions     PERPLEXITY_API_KEY
//   grok        OpenAI-style completions     XAI_API_KEY
//   claude      Anthropic messages           ANTHROPIC_API_KEY
//   gemini      Gemini generateContent       GOOGLE_API_KEY
//   sge         Gemini generateContent       GOOGLE_API_KEY
// =============================================================================

pub mod anthropic;
pub mod chat_completions;
pub mod gemini;
pub mod http;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::error::PlatformError;

use self::anthropic::AnthropicMessages;
use self::chat_completions::ChatCompletions;
use self::gemini::GeminiGenerateContent;
use self::http::{HttpPlatform, PlatformEndpoint};

/// Uniform interface to one external AI answer provider.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Platform name used in results and reports ("chatgpt", "claude", ...).
    fn name(&self) -> &str;

    /// Provider family ("openai", "anthropic", "google", ...).
    fn api_identifier(&self) -> &str;

    /// Environment variable holding the credential.
    fn credential_env(&self) -> &str;

    /// Whether credentials are present. Must not touch the network.
    fn is_configured(&self) -> bool;

    /// Send the prompt and return the answer text. Bounded by a timeout.
    async fn query(&self, prompt: &str) -> Result<String, PlatformError>;
}

/// A platform left out of the run, and the key that would bring it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnavailablePlatform {
    pub name: String,
    pub credential_env: String,
}

pub struct Availability {
    pub available: Vec<Arc<dyn PlatformAdapter>>,
    pub unavailable: Vec<UnavailablePlatform>,
}

/// Name -> adapter lookup, built once at process start.
#[derive(Default, Clone)]
pub struct PlatformRegistry {
    adapters: BTreeMap<String, Arc<dyn PlatformAdapter>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an adapter under its own name.
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) -> &mut Self {
        self.adapters.insert(adapter.name().to_string(), adapter);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Split registered platforms by whether they have credentials.
    pub fn availability(&self) -> Availability {
        let mut available = Vec::new();
        let mut unavailable = Vec::new();
        for adapter in self.adapters.values() {
            if adapter.is_configured() {
                available.push(Arc::clone(adapter));
            } else {
                unavailable.push(UnavailablePlatform {
                    name: adapter.name().to_string(),
                    credential_env: adapter.credential_env().to_string(),
                });
            }
        }
        Availability { available, unavailable }
    }

    /// The six stock platforms, wired from config.
    pub fn from_config(config: &Config) -> Result<Self, PlatformError> {
        let http = build_http_client(config.call_timeout)?;
        let timeout = config.call_timeout;
        let max_tokens = config.max_tokens;

        let mut registry = Self::new();

        registry.register(Arc::new(HttpPlatform::new(
            PlatformEndpoint {
                name: "chatgpt",
                api_identifier: "openai",
                credential_env: "OPENAI_API_KEY",
                url: config.openai_endpoint.clone(),
                model: config.openai_model.clone(),
                max_tokens,
                timeout,
            },
            config.openai_api_key.clone(),
            ChatCompletions,
            http.clone(),
        )));

        registry.register(Arc::new(HttpPlatform::new(
            PlatformEndpoint {
                name: "perplexity",
                api_identifier: "perplexity",
                credential_env: "PERPLEXITY_API_KEY",
                url: config.perplexity_endpoint.clone(),
                model: config.perplexity_model.clone(),
                max_tokens,
                timeout,
            },
            config.perplexity_api_key.clone(),
            ChatCompletions,
            http.clone(),
        )));

        registry.register(Arc::new(HttpPlatform::new(
            PlatformEndpoint {
                name: "grok",
                api_identifier: "xai",
                credential_env: "XAI_API_KEY",
                url: config.xai_endpoint.clone(),
                model: config.xai_model.clone(),
                max_tokens,
                timeout,
            },
            config.xai_api_key.clone(),
            ChatCompletions,
            http.clone(),
        )));

        registry.register(Arc::new(HttpPlatform::new(
            PlatformEndpoint {
                name: "claude",
                api_identifier: "anthropic",
                credential_env: "ANTHROPIC_API_KEY",
                url: config.anthropic_endpoint.clone(),
                model: config.anthropic_model.clone(),
                max_tokens,
                timeout,
            },
            config.anthropic_api_key.clone(),
            AnthropicMessages,
            http.clone(),
        )));

        // gemini and sge hit the same API with the same key; they are scored
        // as separate platforms.
        for name in ["gemini", "sge"] {
            registry.register(Arc::new(HttpPlatform::new(
                PlatformEndpoint {
                    name,
                    api_identifier: "google",
                    credential_env: "GOOGLE_API_KEY",
                    url: GeminiGenerateContent::endpoint(&config.gemini_base_url, &config.gemini_model),
                    model: config.gemini_model.clone(),
                    max_tokens,
                    timeout,
                },
                config.google_api_key.clone(),
                GeminiGenerateContent,
                http.clone(),
            )));
        }

        info!(platforms = ?registry.names(), "Platform registry built");
        Ok(registry)
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, PlatformError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent("VisibilityScanEngine/0.1 (dealer-visibility-scan)")
        .build()
        .map_err(|e| PlatformError::Other {
            platform: "*".to_string(),
            message: format!("failed to build HTTP client: {e}"),
        })
}
