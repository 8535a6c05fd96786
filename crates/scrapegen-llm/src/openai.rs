//! OpenAI embeddings client

use crate::auth::resolve_api_key;
use crate::circuit_breaker::CircuitBreaker;
use crate::provider::Embedder;
use crate::retry::{send_with_retry, RetryPolicy};
use crate::types::{EmbeddingRequest, EmbeddingResponse};
use async_trait::async_trait;
use scrapegen_core::config::EmbeddingConfig;
use scrapegen_core::{Result, ScrapegenError};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const OPENAI_API_URL: &str = "https://api.openai.com";

static CIRCUIT_BREAKER: OnceLock<Arc<CircuitBreaker>> = OnceLock::new();

fn shared_breaker() -> Arc<CircuitBreaker> {
    CIRCUIT_BREAKER
        .get_or_init(|| Arc::new(CircuitBreaker::default()))
        .clone()
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key_env: String,
    batch_size: usize,
    timeout: Duration,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl OpenAiEmbedder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: OPENAI_API_URL.to_string(),
            model: model.into(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 64,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            breaker: shared_breaker(),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(&config.model)
            .with_api_key_env(&config.api_key_env)
            .with_batch_size(config.batch_size)
            .with_timeout(config.request_timeout())
    }

    pub fn with_api_key_env(mut self, env_var: impl Into<String>) -> Self {
        self.api_key_env = env_var.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
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

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    async fn embed_batch(&self, api_key: &str, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            input: batch,
        };

        let call = send_with_retry(
            &self.retry,
            &self.breaker,
            "openai",
            ScrapegenError::Embedding,
            || self.http.post(&url).bearer_auth(api_key).json(&request),
        );
        let body = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ScrapegenError::Timeout {
                operation: "embedding".to_string(),
                seconds: self.timeout.as_secs(),
            })??;

        let mut response: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| ScrapegenError::Embedding(format!("Failed to parse response: {}", e)))?;
        if response.data.len() != batch.len() {
            return Err(ScrapegenError::Embedding(format!(
                "Expected {} embeddings, got {}",
                batch.len(),
                response.data.len()
            )));
        }
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ScrapegenError::Embedding("Empty embedding response".to_string()))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let api_key = resolve_api_key(&self.api_key_env)?;
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(&api_key, batch).await?);
        }
        tracing::debug!("Embedded {} texts with {}", texts.len(), self.model);
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::test_server::{serve, Canned};

    #[tokio::test]
    async fn test_embed_many_batches_and_orders() {
        std::env::set_var("SCRAPEGEN_TEST_OPENAI_OK", "sk-test");
        let (base, bodies) = serve(vec![
            Canned::json(
                200,
                r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#,
            ),
            Canned::json(200, r#"{"data":[{"index":0,"embedding":[0.5,0.5]}]}"#),
        ])
        .await;

        let embedder = OpenAiEmbedder::new("text-embedding-3-small")
            .with_base_url(base)
            .with_api_key_env("SCRAPEGEN_TEST_OPENAI_OK")
            .with_batch_size(2)
            .with_retry(RetryPolicy::immediate(0))
            .with_breaker(Arc::new(CircuitBreaker::default()));

        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let vectors = embedder.embed_many(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]);
        assert_eq!(bodies.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_from_config_applies_timeout() {
        let config = EmbeddingConfig {
            batch_size: 8,
            request_timeout_secs: 7,
            ..EmbeddingConfig::default()
        };
        let embedder = OpenAiEmbedder::from_config(&config);
        assert_eq!(embedder.timeout, Duration::from_secs(7));
        assert_eq!(embedder.batch_size, 8);
        assert_eq!(embedder.model, "text-embedding-3-small");
    }

    #[tokio::test]
    async fn test_empty_input_skips_network() {
        let embedder = OpenAiEmbedder::new("m").with_api_key_env("SCRAPEGEN_TEST_OPENAI_UNSET");
        assert!(embedder.embed_many(&[]).await.unwrap().is_empty());
    }
}
