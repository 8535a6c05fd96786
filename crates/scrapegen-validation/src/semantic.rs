//! Comparison of produced data against a reference result

use scrapegen_core::{Result, ScrapegenError};
use scrapegen_llm::TextGenerator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Outcome of a semantic comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticVerdict {
    pub are_semantically_equivalent: bool,
    #[serde(default)]
    pub differences: Vec<String>,
    #[serde(default)]
    pub explanation: String,
}

impl SemanticVerdict {
    pub fn equal() -> Self {
        Self {
            are_semantically_equivalent: true,
            differences: Vec::new(),
            explanation: "The generated result and reference result are exactly equal."
                .to_string(),
        }
    }

    /// A judge reply that could not be read counts as a difference
    pub fn unreadable(reason: impl std::fmt::Display) -> Self {
        Self {
            are_semantically_equivalent: false,
            differences: Vec::new(),
            explanation: format!(
                "The comparison against the reference result was inconclusive: {}",
                reason
            ),
        }
    }

    /// Diagnostics for the repair loop; empty when equivalent
    pub fn error_lines(&self) -> Vec<String> {
        if self.are_semantically_equivalent {
            return Vec::new();
        }
        if !self.differences.is_empty() {
            return self.differences.clone();
        }
        if self.explanation.trim().is_empty() {
            vec!["Result differs from the reference result".to_string()]
        } else {
            vec![self.explanation.clone()]
        }
    }
}

fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start <= end).then(|| &text[start..=end])
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_lines(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Parse a judge response, tolerating fences, prose around the object and
/// stringly-typed fields
pub fn parse_verdict(response: &str) -> Result<SemanticVerdict> {
    let clean = strip_markdown_fences(response);
    let fragment = extract_json_object(clean).ok_or_else(|| {
        ScrapegenError::Llm(format!("No JSON object in comparison response: {}", clean))
    })?;
    let value: Value = serde_json::from_str(fragment)?;

    let equivalent = value
        .get("are_semantically_equivalent")
        .and_then(as_bool)
        .ok_or_else(|| {
            ScrapegenError::Llm("Comparison response lacks are_semantically_equivalent".to_string())
        })?;

    Ok(SemanticVerdict {
        are_semantically_equivalent: equivalent,
        differences: as_lines(value.get("differences")),
        explanation: value
            .get("explanation")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Exact comparison first, then a text-generation judge
#[derive(Clone)]
pub struct SemanticComparator {
    generator: Arc<dyn TextGenerator>,
}

impl SemanticComparator {
    /// Present in every judge prompt
    pub const PROMPT_MARKER: &'static str = "You compare two web-scraping results";

    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn compare(&self, generated: &Value, reference: &Value) -> Result<SemanticVerdict> {
        if generated == reference {
            tracing::debug!("Generated result equals reference exactly");
            return Ok(SemanticVerdict::equal());
        }

        let prompt = format!(
            "{} for semantic equivalence.\n\n\
             Generated result:\n{}\n\nReference result:\n{}\n\n\
             Ignore formatting differences such as whitespace, key order or number \
             formatting. Report missing, extra or different values.\n\
             Reply with a JSON object only:\n\
             {{\"are_semantically_equivalent\": true|false, \"differences\": [\"...\"], \
             \"explanation\": \"...\"}}",
            Self::PROMPT_MARKER,
            serde_json::to_string_pretty(generated)?,
            serde_json::to_string_pretty(reference)?,
        );

        let response = self.generator.complete(&prompt).await?;
        let verdict = match parse_verdict(&response) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!("Unreadable comparison verdict: {}", e);
                SemanticVerdict::unreadable(e)
            }
        };
        tracing::info!(
            "Semantic comparison: equivalent={}, {} differences",
            verdict.are_semantically_equivalent,
            verdict.differences.len()
        );
        Ok(verdict)
    }
}
