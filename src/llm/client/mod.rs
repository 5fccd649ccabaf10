//! Analysis service client for error log classification.
//!
//! Supports Ollama and OpenAI-compatible APIs. Each call is retried with a
//! fixed delay on transport errors and non-success statuses; a reply that
//! does not carry the expected fields fails immediately.

mod config;
mod prompts;
mod response;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{AnalysisResult, ErrorLog};

pub use config::{LlmConfig, LlmProvider};
pub use response::parse_analysis;

/// Errors that can occur during a single analysis request.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Failed to connect to the analysis service
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request timed out")]
    Timeout,
    /// Service answered with a non-success status
    #[error("API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },
    /// Reply did not match the expected contract
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("analysis is disabled")]
    Disabled,
}

impl LlmError {
    /// Transport failures and error statuses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout | Self::Api { .. })
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Connection(e.to_string())
        }
    }
}

/// A failed analysis and how many service attempts it consumed.
#[derive(Debug, Clone, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct AnalysisFailure {
    #[source]
    pub error: LlmError,
    pub attempts: u32,
}

/// Classifies a single error log.
#[async_trait]
pub trait LogAnalyzer: Send + Sync {
    async fn analyze(&self, log: &ErrorLog) -> Result<AnalysisResult, AnalysisFailure>;
}

/// HTTP analysis client.
pub struct LlmClient {
    config: LlmConfig,
    client: Client,
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama API response format.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// OpenAI chat completions request format.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl LlmClient {
    /// Create a new client with the given configuration.
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::Connection(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Check if the analysis service is reachable.
    pub async fn is_available(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let request = match self.config.provider {
            LlmProvider::Ollama => self
                .client
                .get(format!("{}/api/tags", self.config.base_url())),
            LlmProvider::OpenAI => self.authorized(
                self.client
                    .get(format!("{}/v1/models", self.config.base_url())),
            ),
        };
        match request.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Render the prompt for one log.
    pub fn build_prompt(&self, log: &ErrorLog) -> String {
        self.config
            .get_prompt()
            .replace("{timestamp}", &log.timestamp.to_rfc3339())
            .replace("{source}", &log.source)
            .replace("{message}", &log.message)
            .replace("{stack_trace}", self.truncate_content(&log.stack_trace))
    }

    /// Truncate content to configured maximum (UTF-8 safe).
    fn truncate_content<'a>(&self, text: &'a str) -> &'a str {
        if text.len() <= self.config.max_content_chars {
            return text;
        }
        let mut end = self.config.max_content_chars;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key {
            Some(ref key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// One request/response exchange, no retries.
    async fn analyze_once(&self, log: &ErrorLog) -> Result<AnalysisResult, LlmError> {
        let prompt = self.build_prompt(log);
        let text = match self.config.provider {
            LlmProvider::Ollama => self.call_ollama(&prompt).await?,
            LlmProvider::OpenAI => self.call_openai(&prompt).await?,
        };
        parse_analysis(&text)
    }

    async fn call_ollama(&self, prompt: &str) -> Result<String, LlmError> {
        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.config.base_url());
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let ollama_resp: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(ollama_resp.response)
    }

    async fn call_openai(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let resp = self
            .authorized(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))
    }
}

#[async_trait]
impl LogAnalyzer for LlmClient {
    async fn analyze(&self, log: &ErrorLog) -> Result<AnalysisResult, AnalysisFailure> {
        if !self.config.enabled {
            return Err(AnalysisFailure {
                error: LlmError::Disabled,
                attempts: 0,
            });
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.analyze_once(log).await {
                Ok(result) => {
                    debug!(id = %log.id, attempt, severity = %result.severity, "Analyzed log");
                    return Ok(result);
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    warn!(
                        id = %log.id,
                        attempt,
                        max_attempts,
                        error = %error,
                        "Analysis attempt failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                Err(error) => {
                    return Err(AnalysisFailure {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}
