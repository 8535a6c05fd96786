//! Fail-open helpers for graceful degradation
//!
//! Retrieval and query rewriting only enrich prompts; when they fail the repair loop
//! continues without them. Use these wrappers there.
//!
//! Never fail open on:
//! - Code synthesis (the loop has nothing to run without it)
//! - Sandbox execution (its result decides the stage)
//! - Validation verdicts

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run an enrichment step, logging and swallowing its error
///
/// ```no_run
/// use scrapegen_core::fail_open::fail_open;
/// use scrapegen_core::Result;
///
/// async fn search_docs() -> Result<Vec<String>> {
///     Ok(vec![])
/// }
///
/// async fn example() {
///     let hits = fail_open("doc_search", || search_docs()).await.unwrap_or_default();
///     assert!(hits.is_empty());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Like [`fail_open`], retrying with a linear backoff of `100ms * attempt`
pub async fn fail_open_with_retries<F, Fut, T>(
    operation_name: &str,
    mut f: F,
    max_retries: usize,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=max_retries {
        match f().await {
            Ok(val) => return Some(val),
            Err(e) if attempt == max_retries => {
                warn!(
                    "{} failed after {} attempts (fail-open): {}",
                    operation_name, max_retries, e
                );
            }
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation_name, attempt, max_retries, e
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempt as u64))
                    .await;
            }
        }
    }
    None
}
