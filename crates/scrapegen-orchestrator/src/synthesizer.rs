//! One text-generation call per program

use crate::extract::extract_code;
use crate::prompt::{format_analysis_prompt, format_prompt, PromptContext};
use scrapegen_core::{Result, ScrapegenError};
use scrapegen_llm::TextGenerator;
use std::sync::Arc;
use tracing::debug;

/// Turns prompt contexts into programs and error analyses
///
/// Holds no run state; callers decide what to do with the result.
#[derive(Clone)]
pub struct CodeSynthesizer {
    generator: Arc<dyn TextGenerator>,
}

impl CodeSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Generate a program for `ctx`
    pub async fn synthesize(&self, ctx: &PromptContext) -> Result<String> {
        let prompt = format_prompt(ctx);
        debug!(
            "Synthesis prompt: {} chars via {}",
            prompt.len(),
            self.generator.name()
        );

        let raw = self.generator.complete(&prompt).await?;
        let code = extract_code(&raw);
        if code.is_empty() {
            return Err(ScrapegenError::Llm(
                "completion contained no program".to_string(),
            ));
        }
        debug!("Synthesized program: {} chars", code.len());
        Ok(code)
    }

    /// Ask for an explanation of the current stage errors
    pub async fn analyze(&self, ctx: &PromptContext) -> Result<String> {
        let prompt = format_analysis_prompt(ctx);
        debug!("Analysis prompt: {} chars", prompt.len());
        let analysis = self.generator.complete(&prompt).await?;
        Ok(analysis.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{ANALYSIS_MARKER, SYNTHESIS_MARKER};
    use scrapegen_core::{FieldSchema, GenerationState, HtmlContext, Stage};
    use scrapegen_llm::ScriptedGenerator;

    fn state() -> GenerationState {
        GenerationState::new(
            "Scrape titles",
            "",
            FieldSchema::array(FieldSchema::string()),
            HtmlContext::default(),
        )
    }

    #[tokio::test]
    async fn test_synthesize_extracts_code() {
        let generator = ScriptedGenerator::new()
            .on(SYNTHESIS_MARKER, ["Here:\n```python\nprint('titles')\n```\nDone."]);
        let synth = CodeSynthesizer::new(Arc::new(generator.clone()));

        let code = synth.synthesize(&PromptContext::initial(&state())).await.unwrap();
        assert_eq!(code, "print('titles')");
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_completion_is_an_error() {
        let generator = ScriptedGenerator::new().with_replies(["```python\n```"]);
        let synth = CodeSynthesizer::new(Arc::new(generator));
        let err = synth
            .synthesize(&PromptContext::initial(&state()))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapegenError::Llm(_)));
    }

    #[tokio::test]
    async fn test_analyze_uses_analysis_prompt() {
        let generator = ScriptedGenerator::new().on(ANALYSIS_MARKER, ["  The loop never awaits.  "]);
        let synth = CodeSynthesizer::new(Arc::new(generator.clone()));
        let ctx = PromptContext::repair(Stage::Execution, &state());

        assert_eq!(synth.analyze(&ctx).await.unwrap(), "The loop never awaits.");
        assert_eq!(generator.prompts_containing(ANALYSIS_MARKER).len(), 1);
    }
}
