//! Ollama client for local models.

use super::{GenerationRequest, LlmHttpConfig, LlmProvider, build_http_client};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Ollama LLM client.
pub struct OllamaClient {
    /// Host URL, e.g. `http://localhost:11434`.
    host: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    /// Default host.
    pub const DEFAULT_HOST: &'static str = "http://localhost:11434";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "llama3.2";

    /// Creates a new Ollama client configured from the environment.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: std::env::var("OLLAMA_HOST").unwrap_or_else(|_| Self::DEFAULT_HOST.to_string()),
            model: std::env::var("OLLAMA_MODEL")
                .unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string()),
            client: build_http_client(LlmHttpConfig::from_env()),
        }
    }

    /// Sets the host URL.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn unavailable(cause: impl std::fmt::Display) -> Error {
        Error::DependencyUnavailable {
            dependency: "llm".to_string(),
            cause: cause.to_string(),
        }
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvider for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = GenerateRequest {
            model: self.model.clone(),
            prompt: request.prompt.clone(),
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.host))
            .json(&body)
            .send()
            .map_err(Self::unavailable)?;

        if !response.status().is_success() {
            return Err(Self::unavailable(format!(
                "API returned status: {}",
                response.status()
            )));
        }

        let response: GenerateResponse = response.json().map_err(Self::unavailable)?;
        Ok(response.response)
    }
}

/// Request to the generate API.
#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

/// Sampling options.
#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

/// Response from the generate API.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}
