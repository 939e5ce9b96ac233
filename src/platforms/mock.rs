// Scripted adapters for tests. Never registered outside `cfg(test)`.

use async_trait::async_trait;
use portable_atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::PlatformAdapter;
use crate::error::PlatformError;

#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with this exact text.
    Text(String),
    /// Answer with the prompt itself, so every dealer named in it is mentioned.
    Echo,
    /// Fail every call with this error.
    Fail(PlatformError),
    /// Sleep this long, then echo.
    Slow(Duration),
}

pub struct MockPlatform {
    name: &'static str,
    configured: bool,
    reply: Reply,
    calls: AtomicUsize,
}

impl MockPlatform {
    pub fn new(name: &'static str, reply: Reply) -> Self {
        Self {
            name,
            configured: true,
            reply,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unconfigured(name: &'static str) -> Self {
        Self {
            configured: false,
            ..Self::new(name, Reply::Echo)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PlatformAdapter for MockPlatform {
    fn name(&self) -> &str {
        self.name
    }

    fn api_identifier(&self) -> &str {
        "mock"
    }

    fn credential_env(&self) -> &str {
        "MOCK_API_KEY"
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn query(&self, prompt: &str) -> Result<String, PlatformError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match &self.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Echo => Ok(prompt.to_string()),
            Reply::Fail(err) => Err(err.clone()),
            Reply::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(prompt.to_string())
            }
        }
    }
}
