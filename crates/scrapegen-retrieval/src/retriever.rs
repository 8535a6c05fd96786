//! Query embedding plus similarity search, and snippet rendering

use crate::index::{RetrievalHit, VectorIndex};
use scrapegen_core::fail_open::fail_open_with_retries;
use scrapegen_core::{Result, ScrapegenError};
use scrapegen_llm::Embedder;
use std::sync::Arc;
use std::time::Duration;

/// Embeds queries and searches one collection
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    timeout: Duration,
    attempts: usize,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
            timeout: Duration::from_secs(60),
            attempts: 1,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Lookups [`Retriever::retrieve`] makes before giving up; at least one
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embed `query` and return the `k` nearest snippets
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let lookup = async {
            let vector = self.embedder.embed(query).await?;
            self.index.search(&self.collection, &vector, k).await
        };
        tokio::time::timeout(self.timeout, lookup)
            .await
            .map_err(|_| ScrapegenError::Timeout {
                operation: "retrieval".to_string(),
                seconds: self.timeout.as_secs(),
            })?
    }

    /// Like [`Retriever::search`], retried; a lookup that keeps failing yields no hits
    pub async fn retrieve(&self, query: &str, k: usize) -> Vec<RetrievalHit> {
        let hits = fail_open_with_retries("retrieval", || self.search(query, k), self.attempts)
            .await
            .unwrap_or_default();
        tracing::debug!("Retrieved {} snippets (k={})", hits.len(), k);
        hits
    }
}

/// Render hits under a header naming the query; empty when there are no hits
pub fn render_snippets(query: &str, hits: &[RetrievalHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }
    let body: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    format!(
        "*Documentation retrieved for query: '{}'*\n{}",
        query,
        body.join("\n\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::DocumentationCorpus;
    use crate::memory::InMemoryVectorIndex;
    use async_trait::async_trait;
    use scrapegen_llm::HashEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BrokenEmbedder;

    /// Fails the first `failures` calls, then embeds like [`HashEmbedder`]
    struct FlakyEmbedder {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(ScrapegenError::Embedding("connection reset".to_string()));
            }
            HashEmbedder::new(64).embed(text).await
        }
    }

    struct StalledEmbedder;

    #[async_trait]
    impl Embedder for StalledEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![1.0])
        }
    }

    async fn indexed_docs() -> Arc<InMemoryVectorIndex> {
        let index = Arc::new(InMemoryVectorIndex::new());
        DocumentationCorpus::from_texts("docs", ["Dataset push_data exports json"])
            .build(&HashEmbedder::new(64), index.as_ref())
            .await
            .unwrap();
        index
    }

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(ScrapegenError::Embedding("quota exceeded".to_string()))
        }
    }

    #[tokio::test]
    async fn test_retrieve_from_corpus() {
        let embedder = Arc::new(HashEmbedder::new(64));
        let index = Arc::new(InMemoryVectorIndex::new());
        DocumentationCorpus::from_texts(
            "docs",
            ["BeautifulSoupCrawler parses html", "Dataset push_data exports json"],
        )
        .build(embedder.as_ref(), index.as_ref())
        .await
        .unwrap();

        let retriever = Retriever::new(embedder, index, "docs");
        let hits = retriever.retrieve("how to push_data to dataset", 1).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "Dataset push_data exports json");
    }

    #[tokio::test]
    async fn test_retrieve_fails_open() {
        let retriever = Retriever::new(
            Arc::new(BrokenEmbedder),
            Arc::new(InMemoryVectorIndex::new()),
            "docs",
        );
        assert!(retriever.search("anything", 3).await.is_err());
        assert!(retriever.retrieve("anything", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_retries_before_failing_open() {
        let index = indexed_docs().await;

        let flaky = Arc::new(FlakyEmbedder {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let once = Retriever::new(flaky, index.clone(), "docs");
        assert!(once.retrieve("push_data", 1).await.is_empty());

        let flaky = Arc::new(FlakyEmbedder {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let twice = Retriever::new(flaky.clone(), index, "docs").with_attempts(2);
        assert_eq!(twice.retrieve("push_data", 1).await.len(), 1);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lookup_timeout_is_configurable() {
        let retriever = Retriever::new(Arc::new(StalledEmbedder), indexed_docs().await, "docs")
            .with_timeout(Duration::from_millis(50));
        let started = std::time::Instant::now();
        let err = retriever.search("anything", 1).await.unwrap_err();
        assert!(matches!(err, ScrapegenError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(retriever.retrieve("anything", 1).await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_k_skips_embedding() {
        let retriever = Retriever::new(
            Arc::new(BrokenEmbedder),
            Arc::new(InMemoryVectorIndex::new()),
            "docs",
        );
        assert!(retriever.search("anything", 0).await.unwrap().is_empty());
    }

    #[test]
    fn test_render_snippets() {
        assert_eq!(render_snippets("q", &[]), "");
        let hits = vec![
            RetrievalHit {
                id: 1,
                text: "first".to_string(),
                score: 0.9,
            },
            RetrievalHit {
                id: 2,
                text: "second".to_string(),
                score: 0.5,
            },
        ];
        assert_eq!(
            render_snippets("selectors", &hits),
            "*Documentation retrieved for query: 'selectors'*\nfirst\n\nsecond"
        );
    }
}
