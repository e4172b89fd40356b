//! LLM client abstraction.
//!
//! Provides a unified interface over text-generation providers. Every
//! pipeline caller treats the LLM as optional: extraction, conflict
//! labeling, and synthesis all carry a rule-based fallback, so no
//! pipeline step fails outright because the model runtime is down.
//!
//! # Supported Providers
//!
//! | Provider | Client | Environment Variables |
//! |----------|--------|----------------------|
//! | Anthropic | [`AnthropicClient`] | `ANTHROPIC_API_KEY` |
//! | Ollama | [`OllamaClient`] | `OLLAMA_HOST`, `OLLAMA_MODEL` |

mod anthropic;
mod ollama;
mod retry;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use retry::{RetryPolicy, RetryingLlm};

use crate::Result;
use std::time::Duration;

/// A structured text-generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The prompt text.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token cap.
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// Default sampling temperature.
    pub const DEFAULT_TEMPERATURE: f32 = 0.3;

    /// Default output token cap.
    pub const DEFAULT_MAX_TOKENS: u32 = 1024;

    /// Builds a request with default temperature and token cap.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: Self::DEFAULT_TEMPERATURE,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the output token cap.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Trait for LLM providers.
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given request.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DependencyUnavailable`] when the provider
    /// cannot be reached or times out.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Generates a completion for a bare prompt with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    fn complete(&self, prompt: &str) -> Result<String> {
        self.generate(&GenerationRequest::new(prompt))
    }
}

/// HTTP client configuration for LLM providers.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Loads HTTP configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(timeout_ms) = std::env::var("DOCTRINE_LLM_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.timeout_ms = timeout_ms;
        }
        if let Some(connect_timeout_ms) = std::env::var("DOCTRINE_LLM_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.connect_timeout_ms = connect_timeout_ms;
        }
        self
    }
}

/// Builds a blocking HTTP client for LLM requests with configured timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }
    builder.build().unwrap_or_else(|err| {
        tracing::warn!("failed to build LLM HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Builds the configured provider, wrapped in the retry policy.
///
/// Returns `None` for the `none` provider (and unknown names): the
/// pipeline then runs entirely on its rule-based paths.
#[must_use]
pub fn provider_from_config(
    config: &crate::config::DoctrineConfig,
) -> Option<std::sync::Arc<dyn LlmProvider>> {
    let mut http = LlmHttpConfig::from_env();
    if let Some(timeout_ms) = config.llm.timeout_ms {
        http.timeout_ms = timeout_ms;
    }

    let inner: Box<dyn LlmProvider> = match config.llm.provider.as_str() {
        "anthropic" => {
            let mut client = AnthropicClient::new().with_http_config(http);
            if let Some(key) = config.resolved_api_key() {
                client = client.with_api_key(key);
            }
            if let Some(model) = &config.llm.model {
                client = client.with_model(model.clone());
            }
            Box::new(client)
        },
        "ollama" => {
            let mut client = OllamaClient::new();
            if let Some(model) = &config.llm.model {
                client = client.with_model(model.clone());
            }
            Box::new(client)
        },
        other => {
            if other != "none" {
                tracing::warn!("unknown LLM provider '{other}', running without an LLM");
            }
            return None;
        },
    };

    let policy = RetryPolicy {
        max_retries: config.llm.max_retries.unwrap_or(2),
        initial_backoff_ms: config.llm.retry_backoff_ms.unwrap_or(100),
    };
    Some(std::sync::Arc::new(RetryingLlm::new(inner, policy)))
}

/// Extracts JSON from an LLM response, tolerating markdown fences and
/// surrounding prose.
///
/// Handles, in order: ` ```json ` blocks, bare ` ``` ` blocks, a raw
/// object (first `{` to last `}`), and a raw array (first `[` to last
/// `]`). Falls back to the trimmed input.
#[must_use]
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let inner = &trimmed[start + 7..];
        if let Some(end) = inner.find("```") {
            return inner[..end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let inner = &trimmed[start + 3..];
        let content_start = inner.find(['{', '[']).unwrap_or(0);
        if let Some(end) = inner[content_start..].find("```") {
            return inner[content_start..content_start + end].trim();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_raw() {
        assert_eq!(
            extract_json_from_response(r#"{"answer": "3"}"#),
            r#"{"answer": "3"}"#
        );
    }

    #[test]
    fn test_extract_json_fenced() {
        let response = "```json\n{\"answer\": \"3\"}\n```";
        assert_eq!(extract_json_from_response(response), r#"{"answer": "3"}"#);
    }

    #[test]
    fn test_extract_json_with_prose() {
        let response = "Here you go: {\"answer\": \"3\"} -- done";
        assert_eq!(extract_json_from_response(response), r#"{"answer": "3"}"#);
    }

    #[test]
    fn test_extract_json_array() {
        let response = "Claims:\n[{\"subject\": \"service\"}]";
        assert_eq!(
            extract_json_from_response(response),
            r#"[{"subject": "service"}]"#
        );
    }

    #[test]
    fn test_request_builder() {
        let req = GenerationRequest::new("hello")
            .with_temperature(0.0)
            .with_max_tokens(16);
        assert_eq!(req.prompt, "hello");
        assert!(req.temperature.abs() < f32::EPSILON);
        assert_eq!(req.max_tokens, 16);
    }

    #[test]
    fn test_default_temperature() {
        let req = GenerationRequest::new("x");
        assert!((req.temperature - 0.3).abs() < f32::EPSILON);
    }
}
