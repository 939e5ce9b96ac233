// Anthropic `/v1/messages`.

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::chat_completions::ChatMessage;
use super::http::WireFormat;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicMessages;

impl WireFormat for AnthropicMessages {
    type Request = MessagesRequest;

    fn build_request(&self, prompt: &str, model: &str, max_tokens: u32) -> MessagesRequest {
        MessagesRequest {
            model: model.to_string(),
            max_tokens,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        }
    }

    fn auth_headers(&self, api_key: &str) -> Result<HeaderMap, String> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key).map_err(|e| e.to_string())?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        Ok(headers)
    }

    fn extract_text(&self, body: &str) -> Result<String, String> {
        let response: MessagesResponse = serde_json::from_str(body).map_err(|e| e.to_string())?;
        response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| "no text block in content".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let req = AnthropicMessages.build_request("q", "claude-3-sonnet-20240229", 1000);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "claude-3-sonnet-20240229");
        assert_eq!(json["max_tokens"], 1000);
        assert_eq!(json["messages"][0]["content"], "q");
    }

    #[test]
    fn test_extract_first_text_block() {
        let body = r#"{"content":[{"type":"tool_use","id":"t","name":"n","input":{}},{"type":"text","text":"Acme Motors is nearby."}],"stop_reason":"end_turn"}"#;
        assert_eq!(AnthropicMessages.extract_text(body).unwrap(), "Acme Motors is nearby.");
    }

    #[test]
    fn test_headers() {
        let headers = AnthropicMessages.auth_headers("key-1").unwrap();
        assert_eq!(headers["x-api-key"], "key-1");
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
    }
}
