//! HTTP client for OpenAI-compatible chat endpoints.
//!
//! All supported providers are reached through their OpenAI-compatible chat
//! surface, so a single request/response shape covers openai, anthropic,
//! openrouter and google. HTTP failures are mapped onto the provider error
//! sub-kinds the classifier understands.

use crate::credentials::ApiKey;
use crate::error::AiProviderError;
use crate::resolver::Provider;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request timeout for chat calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl ChatMessage {
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

/// A chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier to use.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Create a new chat request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
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

/// A chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Unique identifier for this response.
    pub id: String,
    /// Model that generated the response.
    pub model: String,
    /// Generated choices.
    pub choices: Vec<ChatChoice>,
    /// Token usage statistics.
    #[serde(default)]
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    /// Index of this choice in the response.
    pub index: u32,
    /// Generated message.
    pub message: ChatMessage,
    /// Reason the generation stopped (e.g., "stop", "length").
    #[serde(default)]
    pub finish_reason: String,
}

/// Token usage statistics for a chat call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Number of tokens generated.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens used.
    #[serde(default)]
    pub total_tokens: u32,
}

/// Error response body from an OpenAI-compatible API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail inside an API error response.
#[derive(Debug, Deserialize)]
#[allow(dead_code)] // Fields kept for complete API error deserialization
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
}

/// Returns the chat API base URL for a provider.
pub fn api_base_for(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "https://api.openai.com/v1",
        Provider::Anthropic => "https://api.anthropic.com/v1",
        Provider::OpenRouter => "https://openrouter.ai/api/v1",
        Provider::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
    }
}

/// Client bound to one provider and credential.
pub struct ProviderClient {
    /// Provider this client talks to.
    provider: Provider,
    /// Base URL for the API.
    api_base: String,
    /// Credential used for authentication.
    api_key: ApiKey,
    /// HTTP client for making API requests.
    http_client: Client,
}

impl ProviderClient {
    /// Create a client for a provider using its standard API base.
    pub fn new(provider: Provider, api_key: ApiKey) -> Self {
        Self {
            provider,
            api_base: api_base_for(provider).to_string(),
            api_key,
            http_client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Override the API base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Get the provider this client talks to.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Issue a chat completion request.
    ///
    /// HTTP status codes are mapped onto provider error sub-kinds: 429 is
    /// rate limiting, 401 and 403 are authentication, any other non-success
    /// status is a generic provider error. Transport failures are network
    /// errors and undecodable bodies are invalid responses.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AiProviderError> {
        let url = format!("{}/chat/completions", self.api_base);

        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose()),
            );

        if self.provider == Provider::OpenRouter {
            http_request = http_request
                .header("HTTP-Referer", "https://taskforge.local")
                .header("X-Title", "taskforge");
        }

        let http_response = http_request
            .json(&request)
            .send()
            .await
            .map_err(|e| AiProviderError::Network {
                detail: e.to_string(),
            })?;

        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = match serde_json::from_str::<ApiErrorResponse>(&error_text) {
                Ok(parsed) => parsed.error.message,
                Err(_) => error_text,
            };

            return Err(match status_code {
                429 => AiProviderError::RateLimited {
                    provider: self.provider.to_string(),
                    detail: message,
                },
                401 | 403 => AiProviderError::Auth {
                    provider: self.provider.to_string(),
                    detail: message,
                },
                _ => AiProviderError::Provider {
                    provider: self.provider.to_string(),
                    detail: format!("HTTP {status_code}: {message}"),
                },
            });
        }

        http_response
            .json()
            .await
            .map_err(|e| AiProviderError::InvalidResponse {
                detail: format!("Failed to parse chat response: {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let system = ChatMessage::system("You plan work.");
        assert_eq!(system.role, "system");
        assert_eq!(system.content, "You plan work.");

        let user = ChatMessage::user("Hello");
        assert_eq!(user.role, "user");

        let assistant = ChatMessage::assistant("Hi there!");
        assert_eq!(assistant.role, "assistant");
    }

    #[test]
    fn test_chat_request_builder() {
        let request = ChatRequest::new("gpt-4o", vec![ChatMessage::user("test")])
            .with_temperature(0.2)
            .with_max_tokens(2000);

        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(2000));
    }

    #[test]
    fn test_chat_request_skips_unset_fields() {
        let request = ChatRequest::new("gpt-4o", vec![ChatMessage::user("test")]);
        let json = serde_json::to_string(&request).expect("serialization should succeed");

        assert!(json.contains("\"model\":\"gpt-4o\""));
        assert!(!json.contains("temperature"));
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn test_first_content() {
        let response = ChatResponse {
            id: "resp-1".to_string(),
            model: "gpt-4o".to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::assistant("Done."),
                finish_reason: "stop".to_string(),
            }],
            usage: TokenUsage::default(),
        };
        assert_eq!(response.first_content(), Some("Done."));

        let empty = ChatResponse {
            id: "resp-2".to_string(),
            model: "gpt-4o".to_string(),
            choices: vec![],
            usage: TokenUsage::default(),
        };
        assert_eq!(empty.first_content(), None);
    }

    #[test]
    fn test_api_base_per_provider() {
        assert_eq!(api_base_for(Provider::OpenAi), "https://api.openai.com/v1");
        assert_eq!(
            api_base_for(Provider::OpenRouter),
            "https://openrouter.ai/api/v1"
        );
    }

    #[tokio::test]
    async fn test_chat_connection_error_is_network() {
        // Port with no listener, so the request itself fails.
        let client = ProviderClient::new(Provider::OpenAi, ApiKey::new("sk-test"))
            .with_api_base("http://localhost:65535");

        let result = client
            .chat(ChatRequest::new("gpt-4o", vec![ChatMessage::user("hi")]))
            .await;

        assert!(matches!(result, Err(AiProviderError::Network { .. })));
    }
}
