//! Turn task context or a stage failure into a short documentation query

use scrapegen_core::Stage;
use scrapegen_llm::TextGenerator;
use std::sync::Arc;

const MAX_QUERY_CHARS: usize = 300;

/// Query rewriting through the text generator, with a deterministic fallback
///
/// A failed or unusable completion never stops the loop: the fallback query is
/// derived from the error text (or the task for the initial query).
#[derive(Clone)]
pub struct QueryRewriter {
    generator: Arc<dyn TextGenerator>,
    max_chars: usize,
}

impl QueryRewriter {
    /// Present in every rewrite prompt
    pub const PROMPT_MARKER: &'static str = "You write search queries for a vector database";

    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            max_chars: MAX_QUERY_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(16);
        self
    }

    /// Query for the first synthesis, from task, schema and page analysis
    pub async fn initial_query(&self, task: &str, schema: &str, html_analysis: &str) -> String {
        let prompt = format!(
            "{}\nof Python web-scraping library documentation (Crawlee).\n\n\
             Context:\n- task:\n{}\n- page analysis:\n{}\n- output schema:\n{}\n\n\
             Write one concise technical search query (one or two sentences) that retrieves \
             documentation or code examples for writing this scraper. Reply with the query only.",
            Self::PROMPT_MARKER,
            task,
            html_analysis,
            schema
        );
        let fallback = || truncate_chars(first_line(task), self.max_chars);
        self.rewrite(&prompt, fallback).await
    }

    /// Query for a failing stage, from page analysis and that stage's error text
    pub async fn error_query(&self, stage: Stage, html_analysis: &str, error: &str) -> String {
        let prompt = format!(
            "{}\nof Python web-scraping library documentation (Crawlee).\n\n\
             Context:\n- page analysis:\n{}\n- {} error:\n{}\n\n\
             Write one concise technical search query (one or two sentences) that retrieves \
             documentation or code examples to fix this error. Reply with the query only.",
            Self::PROMPT_MARKER,
            html_analysis,
            stage,
            error
        );
        let fallback = || fallback_error_query(stage, error, self.max_chars);
        self.rewrite(&prompt, fallback).await
    }

    async fn rewrite(&self, prompt: &str, fallback: impl FnOnce() -> String) -> String {
        match self.generator.complete(prompt).await {
            Ok(raw) => match normalize_query(&raw, self.max_chars) {
                Some(query) => {
                    tracing::debug!("Rewritten query: {}", query);
                    query
                }
                None => {
                    tracing::warn!("Query rewrite returned nothing usable; using fallback");
                    fallback()
                }
            },
            Err(e) => {
                tracing::warn!("Query rewrite failed ({}); using fallback", e);
                fallback()
            }
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Deterministic query from a stage error: the last non-empty line, which holds
/// the exception in a traceback
pub(crate) fn fallback_error_query(stage: Stage, error: &str, max_chars: usize) -> String {
    let line = error
        .lines()
        .map(str::trim)
        .rev()
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if line.is_empty() {
        return format!("Crawlee Python {} error", stage);
    }
    truncate_chars(&format!("Crawlee Python {} error: {}", stage, line), max_chars)
}

/// Reduce a completion to a single-line query; `None` when nothing remains
pub(crate) fn normalize_query(raw: &str, max_chars: usize) -> Option<String> {
    let joined = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("```"))
        .collect::<Vec<_>>()
        .join(" ");

    let mut query = joined.trim();
    for prefix in ["query:", "search query:"] {
        if let Some(head) = query.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                query = query[prefix.len()..].trim_start();
            }
        }
    }
    let query = query.trim_matches(|c| c == '"' || c == '\'' || c == '`').trim();
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        None
    } else {
        Some(truncate_chars(&collapsed, max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapegen_llm::{ScriptedGenerator, ScriptedReply};

    #[test]
    fn test_normalize_query() {
        assert_eq!(
            normalize_query("```\nQuery: \"PlaywrightCrawler   wait for selector\"\n```", 300),
            Some("PlaywrightCrawler wait for selector".to_string())
        );
        assert_eq!(normalize_query("  \n```\n```", 300), None);
        assert_eq!(normalize_query("abcdefgh", 4), Some("abcd".to_string()));
    }

    #[test]
    fn test_fallback_uses_last_error_line() {
        let error = "Traceback (most recent call last):\n  File \"x.py\", line 3\nAttributeError: 'NoneType' object has no attribute 'text'\n";
        assert_eq!(
            fallback_error_query(Stage::Execution, error, 300),
            "Crawlee Python execution error: AttributeError: 'NoneType' object has no attribute 'text'"
        );
        assert_eq!(
            fallback_error_query(Stage::Validation, "  ", 300),
            "Crawlee Python validation error"
        );
    }

    #[tokio::test]
    async fn test_error_query_uses_generator() {
        let generator = ScriptedGenerator::new().with_replies(["crawlee request handler context"]);
        let rewriter = QueryRewriter::new(Arc::new(generator.clone()));
        let query = rewriter
            .error_query(Stage::Execution, "table rows", "KeyError: 'price'")
            .await;
        assert_eq!(query, "crawlee request handler context");

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains(QueryRewriter::PROMPT_MARKER));
        assert!(prompt.contains("KeyError: 'price'"));
        assert!(prompt.contains("table rows"));
    }

    #[tokio::test]
    async fn test_rewrite_failure_falls_back() {
        let generator = ScriptedGenerator::new()
            .on_replies("", vec![ScriptedReply::Fail("503".to_string())]);
        let rewriter = QueryRewriter::new(Arc::new(generator));
        let query = rewriter
            .error_query(Stage::Execution, "analysis", "line 1\nTimeoutError: page load")
            .await;
        assert_eq!(query, "Crawlee Python execution error: TimeoutError: page load");

        let initial = rewriter
            .initial_query("Scrape product names\nand prices", "{}", "grid")
            .await;
        assert_eq!(initial, "Scrape product names");
    }

    #[tokio::test]
    async fn test_blank_completion_falls_back() {
        let generator = ScriptedGenerator::new().with_replies(["   "]);
        let rewriter = QueryRewriter::new(Arc::new(generator));
        let query = rewriter.error_query(Stage::Semantic, "", "prices differ").await;
        assert_eq!(query, "Crawlee Python semantic error: prices differ");
    }
}
