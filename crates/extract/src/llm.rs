use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Errors from the LLM collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM communication error: {0}")]
    Communication(String),

    #[error("LLM rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("LLM authentication failed: {0}")]
    Unauthorized(String),

    #[error("LLM request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// True when the service itself is unreachable or refusing work, as
    /// opposed to answering with something unusable.
    pub fn is_external_service(&self) -> bool {
        !matches!(self, LlmError::InvalidResponse(_))
    }

    /// Transient failures only; a 4xx or a malformed answer is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Communication(_) | LlmError::RateLimited(_) => true,
            LlmError::Status { status, .. } => *status >= 500,
            LlmError::Unauthorized(_) | LlmError::InvalidResponse(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Short task name, used for logging and by test doubles
    pub task: String,
    pub prompt: String,
    pub schema: Option<serde_json::Value>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(task: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            prompt: prompt.into(),
            schema: None,
            temperature: 0.2,
            max_tokens: 4000,
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// The LLM collaborator. Implementations own their retry behaviour.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Complete a request and decode the structured answer.
pub async fn complete_json<T: DeserializeOwned>(
    llm: &dyn LlmClient,
    request: &CompletionRequest,
) -> Result<T, LlmError> {
    let text = llm.complete(request).await?;
    parse_json(&text)
}

/// Parse model output as JSON, tolerating a surrounding markdown fence.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim()).map_err(|e| LlmError::InvalidResponse(e.to_string()))
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a serde_json::Value>, // JSON schema for structured output
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> anyhow::Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn generate(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);

        let body = OllamaRequest {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            format: request.schema.as_ref(),
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Communication(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => LlmError::RateLimited(text),
                401 | 403 => LlmError::Unauthorized(text),
                code => LlmError::Status { status: code, body: text },
            });
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse Ollama response: {}", e)))?;

        Ok(ollama_response.response)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.retry
            .run(&request.task, LlmError::is_retryable, || self.generate(request))
            .await
    }
}
