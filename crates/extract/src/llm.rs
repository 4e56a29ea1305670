use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-haiku-4-5";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "llama3";
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Sends one prompt to a language model and returns its free-text answer.
///
/// One call, one attempt: callers decide what a failure means.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String>;

    /// Short label for logs
    fn name(&self) -> &str;
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

// ---------------------------------------------------------------------------
// Anthropic Messages API
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AnthropicClient {
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    pub fn new(
        base_url: String,
        model: String,
        api_key: String,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            max_tokens,
            client: build_http_client(timeout)?,
        })
    }
}

#[async_trait]
impl ModelInvoker for AnthropicClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, prompt_bytes = prompt.len(), "Sending Anthropic request");

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Anthropic")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic request failed: {} {}", status, body);
        }

        let messages_response: MessagesResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        first_text_block(messages_response)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

fn first_text_block(response: MessagesResponse) -> Result<String> {
    response
        .content
        .into_iter()
        .find(|block| block.block_type == "text")
        .and_then(|block| block.text)
        .context("Anthropic response contained no text block")
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: build_http_client(timeout)?,
        })
    }
}

#[async_trait]
impl ModelInvoker for OllamaClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(model = %self.model, prompt_bytes = prompt.len(), "Sending Ollama request");

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_messages_request_body() {
        let request = MessagesRequest {
            model: "claude-haiku-4-5",
            max_tokens: 4000,
            messages: vec![RequestMessage {
                role: "user",
                content: "Analyze this",
            }],
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "claude-haiku-4-5",
                "max_tokens": 4000,
                "messages": [{"role": "user", "content": "Analyze this"}]
            })
        );
    }

    #[test]
    fn test_first_text_block_skips_other_blocks() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "{\"segments\": []}"}
            ]
        }))
        .unwrap();

        assert_eq!(first_text_block(response).unwrap(), "{\"segments\": []}");
    }

    #[test]
    fn test_response_without_text_is_an_error() {
        let response: MessagesResponse =
            serde_json::from_value(json!({"content": []})).unwrap();
        assert!(first_text_block(response).is_err());
    }

    #[test]
    fn test_clients_trim_trailing_slash() {
        let client = OllamaClient::new(
            "http://localhost:11434/".to_string(),
            OLLAMA_DEFAULT_MODEL.to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.name(), "ollama");
    }
}
