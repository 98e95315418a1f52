//! OpenRouter chat-completions client for moment selection.
//!
//! One capability: send a prompt, get back a JSON-mode completion as text.
//! Response parsing and validation live in the selector; this client only
//! handles transport and the usual markdown-fence noise.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// OpenRouter API client.
#[derive(Clone)]
pub struct OpenRouterClient {
    api_key: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OpenRouterClient {
    /// Create a client against the public OpenRouter endpoint.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> PipelineResult<Self> {
        Self::with_base_url(api_key, "https://openrouter.ai/api/v1", timeout)
    }

    /// Create a client against a custom base URL (tests, proxies).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::config(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Request a JSON-mode completion and return the raw content text.
    pub async fn complete_json(&self, model: &str, prompt: &str) -> PipelineResult<String> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        debug!(model = %model, prompt_chars = prompt.len(), "Calling LLM");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::selection(format!("LLM request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::selection(format!(
                "LLM API returned {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::selection(format!("LLM response unreadable: {}", e)))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| PipelineError::selection("LLM returned no choices"))?;

        Ok(strip_markdown_fences(content).to_string())
    }
}

/// Strip ```json fences some models wrap around JSON-mode output.
pub fn strip_markdown_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_strip_markdown_fences() {
        assert_eq!(strip_markdown_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_markdown_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_markdown_fences("```\n[]\n```"), "[]");
    }

    #[tokio::test]
    async fn test_complete_json_happy_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "```json\n{\"clips\": []}\n```"}}]
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url(
            "test-key",
            server.uri(),
            Duration::from_secs(5),
        )
        .unwrap();

        let content = client.complete_json("test/model", "prompt").await.unwrap();
        assert_eq!(content, "{\"clips\": []}");
    }

    #[tokio::test]
    async fn test_complete_json_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url(
            "test-key",
            server.uri(),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = client.complete_json("test/model", "prompt").await.unwrap_err();
        assert!(matches!(err, PipelineError::Selection(_)));
        assert!(err.to_string().contains("429"));
    }
}
