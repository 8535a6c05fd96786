//! In-process vector index
//!
//! Collections are immutable snapshots behind `Arc`; writers build a new snapshot
//! outside the lock and swap it in, so a search sees either the old or the new
//! collection, never a half-filled one.

use crate::index::{cosine_similarity, RetrievalHit, VectorIndex, VectorPoint};
use async_trait::async_trait;
use scrapegen_core::{Result, ScrapegenError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct Collection {
    dimensions: Option<usize>,
    points: BTreeMap<u64, VectorPoint>,
}

impl Collection {
    fn insert_all(&mut self, points: Vec<VectorPoint>) -> Result<()> {
        for point in points {
            match self.dimensions {
                Some(dims) if dims != point.vector.len() => {
                    return Err(ScrapegenError::Retrieval(format!(
                        "Point {} has {} dimensions, collection expects {}",
                        point.id,
                        point.vector.len(),
                        dims
                    )));
                }
                Some(_) => {}
                None => self.dimensions = Some(point.vector.len()),
            }
            self.points.insert(point.id, point);
        }
        Ok(())
    }
}

/// Brute-force cosine index held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryVectorIndex {
    collections: Arc<RwLock<HashMap<String, Arc<Collection>>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn point_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn recreate_collection(&self, collection: &str, dimensions: Option<usize>) -> Result<()> {
        let fresh = Arc::new(Collection {
            dimensions,
            points: BTreeMap::new(),
        });
        self.collections
            .write()
            .await
            .insert(collection.to_string(), fresh);
        tracing::debug!("Recreated collection {}", collection);
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let mut guard = self.collections.write().await;
        let mut next = guard
            .get(collection)
            .map(|c| c.as_ref().clone())
            .unwrap_or_default();
        next.insert_all(points)?;
        guard.insert(collection.to_string(), Arc::new(next));
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievalHit>> {
        let snapshot = match self.collections.read().await.get(collection) {
            Some(c) => Arc::clone(c),
            None => {
                tracing::debug!("Search on missing collection {}", collection);
                return Ok(Vec::new());
            }
        };

        if limit == 0 || query.iter().all(|x| *x == 0.0) {
            return Ok(Vec::new());
        }

        let mut scored: Vec<RetrievalHit> = snapshot
            .points
            .values()
            .filter(|p| p.vector.len() == query.len())
            .map(|p| RetrievalHit {
                id: p.id,
                text: p.text.clone(),
                score: cosine_similarity(query, &p.vector),
            })
            .collect();

        // Highest score first, lower id wins ties
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn replace_collection(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let mut next = Collection::default();
        next.insert_all(points)?;
        let count = next.points.len();
        self.collections
            .write()
            .await
            .insert(collection.to_string(), Arc::new(next));
        tracing::info!("Swapped in collection {} with {} points", collection, count);
        Ok(())
    }
}
