//! Core type definitions for the repair loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::schema::OutputSchema;

/// Repair stage, in the order the controller visits them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Syntax,
    Execution,
    Validation,
    Semantic,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 4] = [
        Stage::Syntax,
        Stage::Execution,
        Stage::Validation,
        Stage::Semantic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Execution => "execution",
            Self::Validation => "validation",
            Self::Semantic => "semantic",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "syntax" => Ok(Self::Syntax),
            "execution" => Ok(Self::Execution),
            "validation" => Ok(Self::Validation),
            "semantic" => Ok(Self::Semantic),
            _ => Err(format!("Invalid stage: {}", s)),
        }
    }
}

/// Diagnostics per stage
///
/// A stage's list is overwritten on failure and cleared on success, never appended to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageErrors {
    #[serde(default)]
    pub syntax: Vec<String>,
    #[serde(default)]
    pub execution: Vec<String>,
    #[serde(default)]
    pub validation: Vec<String>,
    #[serde(default)]
    pub semantic: Vec<String>,
}

impl StageErrors {
    pub fn get(&self, stage: Stage) -> &[String] {
        match stage {
            Stage::Syntax => &self.syntax,
            Stage::Execution => &self.execution,
            Stage::Validation => &self.validation,
            Stage::Semantic => &self.semantic,
        }
    }

    fn slot(&mut self, stage: Stage) -> &mut Vec<String> {
        match stage {
            Stage::Syntax => &mut self.syntax,
            Stage::Execution => &mut self.execution,
            Stage::Validation => &mut self.validation,
            Stage::Semantic => &mut self.semantic,
        }
    }

    /// Replace a stage's diagnostics
    pub fn set(&mut self, stage: Stage, errors: Vec<String>) {
        *self.slot(stage) = errors;
    }

    pub fn clear(&mut self, stage: Stage) {
        self.slot(stage).clear();
    }

    /// Make `stage` the only stage reporting errors
    pub fn fail_only(&mut self, stage: Stage, errors: Vec<String>) {
        for other in Stage::ALL {
            if other != stage {
                self.clear(other);
            }
        }
        self.set(stage, errors);
    }

    pub fn is_empty(&self) -> bool {
        Stage::ALL.iter().all(|s| self.get(*s).is_empty())
    }

    /// The earliest stage that still reports errors
    pub fn failing_stage(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| !self.get(*s).is_empty())
    }

    /// Number of stages with a non-empty list
    pub fn failing_count(&self) -> usize {
        Stage::ALL.iter().filter(|s| !self.get(**s).is_empty()).count()
    }

    /// Join a stage's diagnostics for prompt interpolation
    pub fn joined(&self, stage: Stage) -> String {
        self.get(stage).join("\n")
    }
}

impl std::fmt::Display for StageErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("no errors");
        }
        let mut first = true;
        for stage in Stage::ALL {
            let errors = self.get(stage);
            if errors.is_empty() {
                continue;
            }
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}: {}", stage, errors.join(" | "))?;
        }
        Ok(())
    }
}

/// Page excerpt characters kept when no other bound is configured
pub const DEFAULT_MAX_HTML_CHARS: usize = 20_000;

/// Page context supplied by the upstream HTML collaborators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlContext {
    /// Reduced HTML excerpt of the target page
    pub excerpt: String,
    /// Structured description of salient selectors and layout
    pub analysis: String,
}

impl HtmlContext {
    /// Build a context, truncating the excerpt to `max_chars` on a char boundary
    pub fn bounded(excerpt: &str, analysis: impl Into<String>, max_chars: usize) -> Self {
        let excerpt = match excerpt.char_indices().nth(max_chars) {
            Some((idx, _)) => excerpt[..idx].to_string(),
            None => excerpt.to_string(),
        };
        Self {
            excerpt,
            analysis: analysis.into(),
        }
    }
}

/// Captured output of the most recent successful sandbox run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Combined stdout/stderr with status lines removed
    pub output: String,
    /// Output artifact written by the program, if any
    pub artifact: Option<PathBuf>,
    /// Working directory the program ran in
    pub workdir: PathBuf,
}

/// Everything the upstream collaborators hand to the repair loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationInputs {
    pub task_description: String,
    #[serde(default)]
    pub refined_task: String,
    pub schema: OutputSchema,
    #[serde(default)]
    pub html_excerpt: String,
    #[serde(default)]
    pub html_analysis: String,
    #[serde(default)]
    pub reference_result: Option<serde_json::Value>,
}

/// The single mutable record threaded through the repair loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationState {
    pub task_description: String,
    pub refined_task: String,
    pub schema: OutputSchema,
    pub html_context: HtmlContext,
    /// Current candidate program; replaced wholesale on every regeneration
    pub generated_code: String,
    pub execution_result: Option<ExecutionResult>,
    pub reference_result: Option<serde_json::Value>,
    pub errors: StageErrors,
    /// Completed outer iterations
    pub iteration: usize,
    pub started_at: DateTime<Utc>,
}

impl GenerationState {
    pub fn new(
        task_description: impl Into<String>,
        refined_task: impl Into<String>,
        schema: OutputSchema,
        html_context: HtmlContext,
    ) -> Self {
        Self {
            task_description: task_description.into(),
            refined_task: refined_task.into(),
            schema,
            html_context,
            generated_code: String::new(),
            execution_result: None,
            reference_result: None,
            errors: StageErrors::default(),
            iteration: 0,
            started_at: Utc::now(),
        }
    }

    pub fn with_reference(mut self, reference: serde_json::Value) -> Self {
        self.reference_result = Some(reference);
        self
    }

    /// Advance the outer iteration counter; it never goes backwards
    pub fn complete_iteration(&mut self) -> usize {
        self.iteration += 1;
        self.iteration
    }

    pub fn is_successful(&self) -> bool {
        !self.generated_code.is_empty() && self.errors.is_empty()
    }
}

impl GenerationInputs {
    /// Start a run, keeping at most `max_html_chars` of the page excerpt
    pub fn into_state(self, max_html_chars: usize) -> GenerationState {
        let html_context =
            HtmlContext::bounded(&self.html_excerpt, self.html_analysis, max_html_chars);
        let mut state = GenerationState::new(
            self.task_description,
            self.refined_task,
            self.schema,
            html_context,
        );
        state.reference_result = self.reference_result;
        state
    }
}

impl From<GenerationInputs> for GenerationState {
    fn from(inputs: GenerationInputs) -> Self {
        inputs.into_state(DEFAULT_MAX_HTML_CHARS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_from_str() {
        assert_eq!("syntax".parse::<Stage>().unwrap(), Stage::Syntax);
        assert_eq!("EXECUTION".parse::<Stage>().unwrap(), Stage::Execution);
        assert!("compile".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stage_errors_overwrite_not_append() {
        let mut errors = StageErrors::default();
        errors.set(Stage::Execution, vec!["first".into()]);
        errors.set(Stage::Execution, vec!["second".into()]);
        assert_eq!(errors.get(Stage::Execution), ["second".to_string()]);
    }

    #[test]
    fn test_fail_only_keeps_single_owner() {
        let mut errors = StageErrors::default();
        errors.set(Stage::Syntax, vec!["bad indent".into()]);
        errors.fail_only(Stage::Execution, vec!["exit 1".into()]);
        assert_eq!(errors.failing_count(), 1);
        assert_eq!(errors.failing_stage(), Some(Stage::Execution));
    }

    #[test]
    fn test_stage_errors_display() {
        let mut errors = StageErrors::default();
        assert_eq!(errors.to_string(), "no errors");
        errors.set(Stage::Validation, vec!["a".into(), "b".into()]);
        assert_eq!(errors.to_string(), "validation: a | b");
    }

    #[test]
    fn test_html_context_bounded() {
        let ctx = HtmlContext::bounded("<div>héllo</div>", "a div", 7);
        assert_eq!(ctx.excerpt, "<div>hé");
        let ctx = HtmlContext::bounded("<p/>", "p", 100);
        assert_eq!(ctx.excerpt, "<p/>");
    }

    #[test]
    fn test_inputs_excerpt_is_bounded() {
        let inputs: GenerationInputs = serde_json::from_value(serde_json::json!({
            "task_description": "Scrape prices",
            "schema": {"type": "string"},
            "html_excerpt": "<ul>".repeat(DEFAULT_MAX_HTML_CHARS),
            "html_analysis": "a list",
            "reference_result": ["9.99"]
        }))
        .unwrap();

        let state = inputs.clone().into_state(10);
        assert_eq!(state.html_context.excerpt, "<ul><ul><u");
        assert_eq!(state.html_context.analysis, "a list");
        assert_eq!(state.reference_result, Some(serde_json::json!(["9.99"])));

        let state = GenerationState::from(inputs);
        assert_eq!(
            state.html_context.excerpt.chars().count(),
            DEFAULT_MAX_HTML_CHARS
        );
    }

    #[test]
    fn test_iteration_only_increases() {
        let schema: OutputSchema = serde_json::from_str(r#"{"type":"string"}"#).unwrap();
        let mut state = GenerationState::new("t", "r", schema, HtmlContext::default());
        assert_eq!(state.complete_iteration(), 1);
        assert_eq!(state.complete_iteration(), 2);
        assert_eq!(state.iteration, 2);
    }
}
