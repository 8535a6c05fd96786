//! Anthropic messages API client
//!
//! Each completion is a fresh single-turn request; no history is carried between calls.

use crate::auth::resolve_api_key;
use crate::circuit_breaker::CircuitBreaker;
use crate::provider::TextGenerator;
use crate::retry::{send_with_retry, RetryPolicy};
use crate::types::{AnthropicMessage, AnthropicRequest, AnthropicResponse, Model};
use async_trait::async_trait;
use scrapegen_core::config::LlmConfig;
use scrapegen_core::{Result, ScrapegenError};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// Shared by every client in the process
static CIRCUIT_BREAKER: OnceLock<Arc<CircuitBreaker>> = OnceLock::new();

fn shared_breaker() -> Arc<CircuitBreaker> {
    CIRCUIT_BREAKER
        .get_or_init(|| Arc::new(CircuitBreaker::default()))
        .clone()
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: usize,
    timeout: Duration,
    api_key_env: String,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl AnthropicClient {
    pub fn new(model: impl AsRef<str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
            model: Model::resolve(model.as_ref()),
            max_tokens: 8000,
            timeout: Duration::from_secs(120),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            retry: RetryPolicy::default(),
            breaker: shared_breaker(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(&config.model)
            .with_max_tokens(config.max_tokens)
            .with_timeout(config.request_timeout())
            .with_api_key_env(&config.api_key_env)
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_api_key_env(mut self, env_var: impl Into<String>) -> Self {
        self.api_key_env = env_var.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Use a private breaker instead of the process-wide one
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let api_key = resolve_api_key(&self.api_key_env)?;
        let url = format!("{}/v1/messages", self.base_url);
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let body = send_with_retry(
            &self.retry,
            &self.breaker,
            "anthropic",
            ScrapegenError::Llm,
            || {
                self.http
                    .post(&url)
                    .header("x-api-key", &api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("content-type", "application/json")
                    .json(&request)
            },
        )
        .await?;

        let response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| ScrapegenError::Llm(format!("Failed to parse response: {}", e)))?;

        let text: String = response
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .map(|block| block.text.as_str())
            .collect();
        if text.is_empty() {
            return Err(ScrapegenError::Llm("No text content in response".to_string()));
        }

        match &response.usage {
            Some(usage) => tracing::info!(
                "Completion received ({} chars, {} input tokens, {} output tokens)",
                text.len(),
                usage.input_tokens,
                usage.output_tokens
            ),
            None => tracing::info!("Completion received ({} chars)", text.len()),
        }
        Ok(text)
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new(Model::default().api_name())
    }
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        tracing::debug!("Completion request with {} prompt chars", prompt.len());
        match tokio::time::timeout(self.timeout, self.request(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ScrapegenError::Timeout {
                operation: "text completion".to_string(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
