//! Scripted provider doubles for tests and offline runs

use crate::provider::{Embedder, TextGenerator};
use async_trait::async_trait;
use scrapegen_core::{Result, ScrapegenError};
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

/// One scripted completion outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
}

#[derive(Debug, Default)]
struct Route {
    marker: Option<String>,
    replies: VecDeque<ScriptedReply>,
}

impl Route {
    /// Pop the next reply; the last one repeats forever
    fn next(&mut self) -> Option<ScriptedReply> {
        if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    routes: Vec<Route>,
    fallback: Route,
    prompts: Vec<String>,
}

/// Text generator answering from scripted queues
///
/// Routes are matched by a marker substring of the prompt, in registration order;
/// unmatched prompts use the fallback queue. Every prompt is recorded. Clones share
/// the same script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue replies for prompts without a matching route
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .fallback
            .replies
            .extend(replies.into_iter().map(|r| ScriptedReply::Text(r.into())));
        self
    }

    /// Queue replies for prompts containing `marker`
    pub fn on<I, S>(self, marker: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies = replies
            .into_iter()
            .map(|r| ScriptedReply::Text(r.into()))
            .collect();
        self.on_replies(marker, replies)
    }

    /// Queue mixed successes and failures for prompts containing `marker`
    pub fn on_replies(self, marker: &str, replies: Vec<ScriptedReply>) -> Self {
        {
            let mut script = self.lock();
            match script
                .routes
                .iter_mut()
                .find(|r| r.marker.as_deref() == Some(marker))
            {
                Some(route) => route.replies.extend(replies),
                None => script.routes.push(Route {
                    marker: Some(marker.to_string()),
                    replies: replies.into(),
                }),
            }
        }
        self
    }

    /// Every prompt seen so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    /// Prompts that contained `marker`
    pub fn prompts_containing(&self, marker: &str) -> Vec<String> {
        self.lock()
            .prompts
            .iter()
            .filter(|p| p.contains(marker))
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.lock().prompts.len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut script = self.lock();
        script.prompts.push(prompt.to_string());

        let routed = script
            .routes
            .iter_mut()
            .find(|r| r.marker.as_deref().is_some_and(|m| prompt.contains(m)))
            .and_then(Route::next);
        let reply = match routed {
            Some(reply) => Some(reply),
            None => script.fallback.next(),
        };

        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(message)) => Err(ScrapegenError::Llm(message)),
            None => Err(ScrapegenError::Llm(format!(
                "No scripted reply for prompt starting {:?}",
                prompt.chars().take(60).collect::<String>()
            ))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Deterministic bag-of-words embedder
///
/// Lowercased alphanumeric tokens are hashed into `dimensions` buckets, so texts
/// sharing words score higher under cosine similarity. Text with no tokens maps to
/// the zero vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }
}
