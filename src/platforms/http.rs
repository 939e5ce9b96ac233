// =============================================================================
// platforms/http.rs - ONE HTTPS POST PER QUESTION
// =============================================================================
//
// The generic half of every stock adapter: credential check, POST with a
// timeout, status-code triage. The provider-specific half (payload shape,
// auth headers, where the answer text hides in the response) is a
// `WireFormat`.
//
// Status triage:
//   401 / 403        -> AuthMissing (the key is there but the provider rejects it)
//   429              -> RateLimited
//   other non-2xx    -> Other
//   client timeout   -> Timeout
//   2xx, wrong shape -> Unparseable
// =============================================================================

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, HeaderValue};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::PlatformAdapter;
use crate::error::PlatformError;

/// Provider-specific request/response handling.
pub trait WireFormat: Send + Sync {
    type Request: Serialize + Send + Sync;

    fn build_request(&self, prompt: &str, model: &str, max_tokens: u32) -> Self::Request;

    /// Auth headers for this provider. Content-Type is added by the caller.
    fn auth_headers(&self, api_key: &str) -> Result<HeaderMap, String>;

    /// Pull the answer text out of a successful response body.
    fn extract_text(&self, body: &str) -> Result<String, String>;
}

/// Static description of one platform registration.
#[derive(Debug, Clone)]
pub struct PlatformEndpoint {
    pub name: &'static str,
    pub api_identifier: &'static str,
    pub credential_env: &'static str,
    pub url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

pub struct HttpPlatform<F: WireFormat> {
    endpoint: PlatformEndpoint,
    api_key: Option<String>,
    format: F,
    http: reqwest::Client,
}

impl<F: WireFormat> HttpPlatform<F> {
    pub fn new(
        endpoint: PlatformEndpoint,
        api_key: Option<String>,
        format: F,
        http: reqwest::Client,
    ) -> Self {
        Self {
            endpoint,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            format,
            http,
        }
    }

    fn headers(&self, api_key: &str) -> Result<HeaderMap, PlatformError> {
        let mut headers = self.format.auth_headers(api_key).map_err(|reason| {
            PlatformError::Other {
                platform: self.endpoint.name.to_string(),
                message: format!("invalid credential header: {reason}"),
            }
        })?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn classify_status(&self, status: u16, body: &str) -> PlatformError {
        let platform = self.endpoint.name.to_string();
        match status {
            401 | 403 => PlatformError::AuthMissing {
                platform,
                env_var: self.endpoint.credential_env.to_string(),
            },
            429 => PlatformError::RateLimited { platform, status },
            _ => PlatformError::Other {
                platform,
                message: format!("HTTP {status}: {}", truncate(body, 200)),
            },
        }
    }

    fn classify_transport(&self, err: reqwest::Error) -> PlatformError {
        if err.is_timeout() {
            PlatformError::Timeout {
                platform: self.endpoint.name.to_string(),
                timeout_secs: self.endpoint.timeout.as_secs(),
            }
        } else {
            PlatformError::Other {
                platform: self.endpoint.name.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl<F: WireFormat> PlatformAdapter for HttpPlatform<F> {
    fn name(&self) -> &str {
        self.endpoint.name
    }

    fn api_identifier(&self) -> &str {
        self.endpoint.api_identifier
    }

    fn credential_env(&self) -> &str {
        self.endpoint.credential_env
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn query(&self, prompt: &str) -> Result<String, PlatformError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| PlatformError::AuthMissing {
            platform: self.endpoint.name.to_string(),
            env_var: self.endpoint.credential_env.to_string(),
        })?;

        let request = self
            .format
            .build_request(prompt, &self.endpoint.model, self.endpoint.max_tokens);

        debug!(platform = self.endpoint.name, model = %self.endpoint.model, "Platform request");

        let response = self
            .http
            .post(&self.endpoint.url)
            .headers(self.headers(api_key)?)
            .timeout(self.endpoint.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify_transport(e))?;

        if !status.is_success() {
            return Err(self.classify_status(status.as_u16(), &body));
        }

        let text = self
            .format
            .extract_text(&body)
            .map_err(|reason| PlatformError::Unparseable {
                platform: self.endpoint.name.to_string(),
                reason,
            })?;

        if text.trim().is_empty() {
            return Err(PlatformError::Unparseable {
                platform: self.endpoint.name.to_string(),
                reason: "response contained no text".to_string(),
            });
        }

        Ok(text)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::chat_completions::ChatCompletions;
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn platform_at(url: &str, api_key: Option<&str>, timeout: Duration) -> HttpPlatform<ChatCompletions> {
        HttpPlatform::new(
            PlatformEndpoint {
                name: "chatgpt",
                api_identifier: "openai",
                credential_env: "OPENAI_API_KEY",
                url: url.to_string(),
                model: "gpt-4".to_string(),
                max_tokens: 1000,
                timeout,
            },
            api_key.map(str::to_string),
            ChatCompletions,
            reqwest::Client::builder().no_proxy().build().unwrap(),
        )
    }

    fn platform(api_key: Option<&str>) -> HttpPlatform<ChatCompletions> {
        platform_at("http://127.0.0.1:9/never", api_key, Duration::from_secs(1))
    }

    /// Read one request: headers, then `content-length` bytes of body.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// A one-shot HTTP server that answers the first request with a canned
    /// response after `delay`. Returns the URL to post to.
    async fn serve_once(status: &'static str, body: &'static str, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            assert!(request.starts_with("POST /v1/chat/completions"), "{request}");
            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/v1/chat/completions")
    }

    async fn ask(status: &'static str, body: &'static str) -> Result<String, PlatformError> {
        let url = serve_once(status, body, Duration::ZERO).await;
        platform_at(&url, Some("sk-test"), Duration::from_secs(5)).query("best dealer?").await
    }

    #[test]
    fn test_blank_key_is_not_configured() {
        assert!(!platform(None).is_configured());
        assert!(!platform(Some("   ")).is_configured());
        assert!(platform(Some("sk-test")).is_configured());
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let err = platform(None).query("hello").await.unwrap_err();
        assert_eq!(
            err,
            PlatformError::AuthMissing {
                platform: "chatgpt".into(),
                env_var: "OPENAI_API_KEY".into()
            }
        );
    }

    #[test]
    fn test_status_triage() {
        let p = platform(Some("sk-test"));
        assert!(matches!(p.classify_status(401, ""), PlatformError::AuthMissing { .. }));
        assert!(matches!(p.classify_status(429, ""), PlatformError::RateLimited { status: 429, .. }));
        assert!(matches!(p.classify_status(500, "boom"), PlatformError::Other { .. }));
    }

    #[tokio::test]
    async fn test_answer_text_comes_back() {
        let text = ask(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"Acme Motors is a solid pick."}}]}"#,
        )
        .await
        .unwrap();
        assert_eq!(text, "Acme Motors is a solid pick.");
    }

    #[tokio::test]
    async fn test_429_is_rate_limited() {
        let err = ask("429 Too Many Requests", r#"{"error":"slow down"}"#).await.unwrap_err();
        assert_eq!(err, PlatformError::RateLimited { platform: "chatgpt".into(), status: 429 });
    }

    #[tokio::test]
    async fn test_401_is_auth_missing() {
        let err = ask("401 Unauthorized", r#"{"error":"bad key"}"#).await.unwrap_err();
        assert!(matches!(err, PlatformError::AuthMissing { .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_other() {
        let err = ask("503 Service Unavailable", "overloaded").await.unwrap_err();
        match err {
            PlatformError::Other { message, .. } => assert!(message.contains("HTTP 503"), "{message}"),
            other => panic!("expected Other, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_success_is_unparseable() {
        let err = ask("200 OK", "<html>maintenance</html>").await.unwrap_err();
        assert!(matches!(err, PlatformError::Unparseable { .. }));
        assert_eq!(err.category(), crate::error::ErrorCategory::Parse);
    }

    #[tokio::test]
    async fn test_blank_answer_is_unparseable() {
        let err = ask("200 OK", r#"{"choices":[{"message":{"role":"assistant","content":"   "}}]}"#)
            .await
            .unwrap_err();
        match err {
            PlatformError::Unparseable { reason, .. } => assert_eq!(reason, "response contained no text"),
            other => panic!("expected Unparseable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let url = serve_once("200 OK", r#"{"choices":[]}"#, Duration::from_secs(5)).await;
        let err = platform_at(&url, Some("sk-test"), Duration::from_millis(200))
            .query("best dealer?")
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Timeout { .. }), "{err:?}");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
        assert_eq!(truncate("short", 50), "short");
    }
}
