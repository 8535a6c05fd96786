//! Qdrant REST backend
//!
//! Points are stored with integer ids and a `{"text": ...}` payload, cosine distance.
//!
//! A rebuild through [`VectorIndex::replace_collection`] never touches what
//! readers see until it is complete: points go into a fresh physical collection
//! `<name>_<uuid>`, then one alias request repoints `<name>` at it and the old
//! physical collection is dropped.

use crate::index::{RetrievalHit, VectorIndex, VectorPoint};
use async_trait::async_trait;
use scrapegen_core::{Result, ScrapegenError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct QdrantIndex {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct AliasesResponse {
    result: AliasList,
}

#[derive(Debug, Deserialize)]
struct AliasList {
    #[serde(default)]
    aliases: Vec<AliasDescription>,
}

#[derive(Debug, Deserialize)]
struct AliasDescription {
    alias_name: String,
    collection_name: String,
}

/// What a collection name currently resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTarget {
    Alias(String),
    Collection,
    Absent,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

impl QdrantIndex {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .timeout(self.timeout);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapegenError::Timeout {
                    operation: format!("qdrant {}", what),
                    seconds: self.timeout.as_secs(),
                }
            } else {
                ScrapegenError::Retrieval(format!("qdrant {} failed: {}", what, e))
            }
        })
    }

    async fn resolve(&self, name: &str) -> Result<NameTarget> {
        let response = self
            .send(self.request(reqwest::Method::GET, "/aliases"), "list aliases")
            .await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScrapegenError::Retrieval(format!("qdrant aliases body: {}", e)))?;
        if !status.is_success() {
            return Err(ScrapegenError::Retrieval(format!(
                "qdrant list aliases returned {}: {}",
                status, body
            )));
        }
        let aliases: AliasesResponse = serde_json::from_str(&body)
            .map_err(|e| ScrapegenError::Retrieval(format!("Bad qdrant aliases response: {}", e)))?;
        if let Some(alias) = aliases.result.aliases.into_iter().find(|a| a.alias_name == name) {
            return Ok(NameTarget::Alias(alias.collection_name));
        }

        let path = format!("/collections/{}", name);
        let response = self
            .send(self.request(reqwest::Method::GET, &path), "get collection")
            .await?;
        match response.status().as_u16() {
            404 => Ok(NameTarget::Absent),
            _ => {
                Self::expect_success(response, "get collection").await?;
                Ok(NameTarget::Collection)
            }
        }
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        let path = format!("/collections/{}", name);
        let response = self
            .send(
                self.request(reqwest::Method::PUT, &path)
                    .json(&create_collection_body(dimensions)),
                "create collection",
            )
            .await?;
        Self::expect_success(response, "create collection").await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let path = format!("/collections/{}", name);
        let response = self
            .send(self.request(reqwest::Method::DELETE, &path), "delete collection")
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        Self::expect_success(response, "delete collection").await
    }

    async fn update_aliases(&self, body: &Value) -> Result<()> {
        let response = self
            .send(
                self.request(reqwest::Method::POST, "/collections/aliases").json(body),
                "update aliases",
            )
            .await?;
        Self::expect_success(response, "update aliases").await
    }

    async fn expect_success(response: reqwest::Response, what: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ScrapegenError::Retrieval(format!(
            "qdrant {} returned {}: {}",
            what, status, body
        )))
    }
}

/// One atomic alias update: drop the old alias (if any) and point it at `target`
pub(crate) fn swap_alias_body(alias: &str, target: &str, had_alias: bool) -> Value {
    let mut actions = Vec::new();
    if had_alias {
        actions.push(json!({ "delete_alias": { "alias_name": alias } }));
    }
    actions.push(json!({ "create_alias": { "collection_name": target, "alias_name": alias } }));
    json!({ "actions": actions })
}

pub(crate) fn physical_name(collection: &str) -> String {
    format!("{}_{}", collection, uuid::Uuid::new_v4().simple())
}

pub(crate) fn create_collection_body(dimensions: usize) -> Value {
    json!({ "vectors": { "size": dimensions, "distance": "Cosine" } })
}

pub(crate) fn upsert_body(points: &[VectorPoint]) -> Value {
    let points: Vec<Value> = points
        .iter()
        .map(|p| json!({ "id": p.id, "vector": p.vector, "payload": { "text": p.text } }))
        .collect();
    json!({ "points": points })
}

pub(crate) fn search_body(query: &[f32], limit: usize) -> Value {
    json!({ "vector": query, "limit": limit, "with_payload": true })
}

fn parse_search_response(body: &str) -> Result<Vec<RetrievalHit>> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| ScrapegenError::Retrieval(format!("Bad qdrant search response: {}", e)))?;
    Ok(response
        .result
        .into_iter()
        .map(|p| RetrievalHit {
            id: p.id.as_u64().unwrap_or(0),
            text: p
                .payload
                .as_ref()
                .and_then(|payload| payload.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            score: p.score,
        })
        .collect())
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    /// Non-atomic: readers see a missing, then empty collection. Rebuilds go
    /// through `replace_collection` instead.
    async fn recreate_collection(&self, collection: &str, dimensions: Option<usize>) -> Result<()> {
        match self.resolve(collection).await? {
            NameTarget::Alias(target) => {
                self.update_aliases(&json!({
                    "actions": [{ "delete_alias": { "alias_name": collection } }]
                }))
                .await?;
                self.delete_collection(&target).await?;
            }
            NameTarget::Collection => self.delete_collection(collection).await?,
            NameTarget::Absent => {}
        }

        // Without a known dimension the collection stays absent; searches return nothing
        let Some(dimensions) = dimensions else {
            tracing::warn!("Collection {} dropped with no points to recreate", collection);
            return Ok(());
        };

        self.create_collection(collection, dimensions).await?;
        tracing::info!("Recreated qdrant collection {} ({} dims)", collection, dimensions);
        Ok(())
    }

    async fn replace_collection(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let previous = self.resolve(collection).await?;

        let Some(dimensions) = points.first().map(|p| p.vector.len()) else {
            // Nothing to serve: drop the name in one step, then the data behind it
            match previous {
                NameTarget::Alias(target) => {
                    self.update_aliases(&json!({
                        "actions": [{ "delete_alias": { "alias_name": collection } }]
                    }))
                    .await?;
                    self.delete_collection(&target).await?;
                }
                NameTarget::Collection => self.delete_collection(collection).await?,
                NameTarget::Absent => {}
            }
            tracing::warn!("Collection {} replaced with no points", collection);
            return Ok(());
        };

        let physical = physical_name(collection);
        self.create_collection(&physical, dimensions).await?;
        let count = points.len();
        if let Err(e) = self.upsert(&physical, points).await {
            if let Err(cleanup) = self.delete_collection(&physical).await {
                tracing::warn!("Failed to drop partial collection {}: {}", physical, cleanup);
            }
            return Err(e);
        }

        if previous == NameTarget::Collection {
            // An alias cannot share its name with a collection; one-time migration
            tracing::warn!(
                "Replacing plain collection {} with an alias; it is briefly absent",
                collection
            );
            self.delete_collection(collection).await?;
        }
        let had_alias = matches!(previous, NameTarget::Alias(_));
        self.update_aliases(&swap_alias_body(collection, &physical, had_alias))
            .await?;
        tracing::info!("Collection {} now serves {} ({} points)", collection, physical, count);

        if let NameTarget::Alias(old) = previous {
            if let Err(e) = self.delete_collection(&old).await {
                tracing::warn!("Failed to drop superseded collection {}: {}", old, e);
            }
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let path = format!("/collections/{}/points?wait=true", collection);
        let response = self
            .send(
                self.request(reqwest::Method::PUT, &path).json(&upsert_body(&points)),
                "upsert",
            )
            .await?;
        Self::expect_success(response, "upsert").await?;
        tracing::debug!("Upserted {} points into {}", points.len(), collection);
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievalHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let path = format!("/collections/{}/points/search", collection);
        let response = self
            .send(
                self.request(reqwest::Method::POST, &path)
                    .json(&search_body(query, limit)),
                "search",
            )
            .await?;

        if response.status().as_u16() == 404 {
            tracing::debug!("Search on missing qdrant collection {}", collection);
            return Ok(Vec::new());
        }
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScrapegenError::Retrieval(format!("qdrant search body: {}", e)))?;
        if !status.is_success() {
            return Err(ScrapegenError::Retrieval(format!(
                "qdrant search returned {}: {}",
                status, body
            )));
        }
        parse_search_response(&body)
    }
}
