//! OpenAI-compatible chat client.
//!
//! Talks to any chat-completions endpoint (a LiteLLM proxy, OpenRouter, or a
//! vendor API with a compatible surface). Model selection is per-request.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::LlmError;

/// Default request timeout for LLM calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier to use for generation.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0). Higher values = more random.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a new generation request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Unique identifier for this response.
    #[serde(default)]
    pub id: String,
    /// Model that generated this response.
    #[serde(default)]
    pub model: String,
    /// Generated choices/completions.
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    #[serde(default)]
    pub usage: Usage,
}

impl GenerationResponse {
    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// The generated message.
    pub message: Message,
    /// Why generation stopped (e.g., "stop", "length").
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens used.
    #[serde(default)]
    pub total_tokens: u32,
}

/// Abstraction over LLM transports.
///
/// Agents depend on this trait rather than a concrete client so tests can
/// inject canned responses.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generates a completion for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// HTTP client for OpenAI-compatible chat-completions endpoints.
pub struct LlmClient {
    client: Client,
    api_base: String,
    api_key: String,
}

impl LlmClient {
    /// Creates a new client for the given endpoint.
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    /// Creates a client from `LLM_API_BASE` and `LLM_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingApiBase` or `LlmError::MissingApiKey` if the
    /// corresponding environment variable is unset.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("LLM_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("LLM_API_KEY").map_err(|_| LlmError::MissingApiKey)?;
        Ok(Self::new(api_base, api_key))
    }

    /// Returns the configured API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                code: status.as_u16(),
                message: body,
            });
        }

        let parsed: GenerationResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        if parsed.choices.is_empty() {
            return Err(LlmError::EmptyResponse {
                model: request.model,
            });
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("a").role, "system");
        assert_eq!(Message::user("b").role, "user");
        assert_eq!(Message::assistant("c").role, "assistant");
    }

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::new("gemini-2.0-flash", vec![Message::user("hi")])
            .with_temperature(0.2)
            .with_max_tokens(512);

        assert_eq!(request.model, "gemini-2.0-flash");
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(512));
    }

    #[test]
    fn test_request_serialization_skips_unset() {
        let request = GenerationRequest::new("m", vec![Message::user("q")]);
        let json = serde_json::to_string(&request).expect("serialization should work");
        assert!(!json.contains("temperature"));
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn test_response_first_content() {
        let response = GenerationResponse {
            id: "r1".to_string(),
            model: "m".to_string(),
            choices: vec![Choice {
                message: Message::assistant("hello"),
                finish_reason: Some("stop".to_string()),
            }],
            usage: Usage::default(),
        };

        assert_eq!(response.first_content(), Some("hello"));
    }

    #[test]
    fn test_response_deserializes_minimal_payload() {
        let payload = r#"{"choices": [{"message": {"role": "assistant", "content": "ok"}}]}"#;
        let parsed: GenerationResponse =
            serde_json::from_str(payload).expect("minimal payload should parse");
        assert_eq!(parsed.first_content(), Some("ok"));
        assert_eq!(parsed.usage.total_tokens, 0);
    }
}
