//! Vector index contract

use async_trait::async_trait;
use scrapegen_core::Result;
use serde::{Deserialize, Serialize};

/// One stored point: an embedding plus the snippet text it was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: u64,
    pub vector: Vec<f32>,
    pub text: String,
}

/// A similarity match, consumed only as prompt context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub id: u64,
    pub text: String,
    pub score: f32,
}

/// Point store addressed by collection name
///
/// `search` on an empty or missing collection returns no hits rather than an error.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Drop the collection if present and create it empty
    async fn recreate_collection(&self, collection: &str, dimensions: Option<usize>) -> Result<()>;

    /// Insert or replace points by id
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;

    /// The `limit` nearest points by cosine similarity, highest first
    async fn search(&self, collection: &str, query: &[f32], limit: usize)
        -> Result<Vec<RetrievalHit>>;

    /// Replace the whole collection with `points`
    async fn replace_collection(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let dimensions = points.first().map(|p| p.vector.len());
        self.recreate_collection(collection, dimensions).await?;
        if points.is_empty() {
            return Ok(());
        }
        self.upsert(collection, points).await
    }
}

/// Cosine similarity; 0.0 when either side has zero norm or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}
