// Google Gemini `models/{model}:generateContent`.

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::http::WireFormat;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiGenerateContent;

impl GeminiGenerateContent {
    pub fn endpoint(base_url: &str, model: &str) -> String {
        format!("{}/{}:generateContent", base_url.trim_end_matches('/'), model)
    }
}

impl WireFormat for GeminiGenerateContent {
    type Request = GenerateContentRequest;

    fn build_request(&self, prompt: &str, _model: &str, max_tokens: u32) -> GenerateContentRequest {
        // The model is part of the URL, not the body.
        GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: max_tokens,
            },
        }
    }

    fn auth_headers(&self, api_key: &str) -> Result<HeaderMap, String> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key).map_err(|e| e.to_string())?,
        );
        Ok(headers)
    }

    fn extract_text(&self, body: &str) -> Result<String, String> {
        let response: GenerateContentResponse =
            serde_json::from_str(body).map_err(|e| e.to_string())?;
        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|content| content.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| "no candidates[0].content.parts[].text in response".to_string())
    }
}
