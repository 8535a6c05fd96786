//! Prompt contexts and formatting
//!
//! Each synthesis or analysis call is described by a [`PromptContext`]: the task
//! fields every prompt carries plus the optional pieces a stage adds (previous
//! program, errors, retrieved snippets, error analysis). Formatting is pure.

use scrapegen_core::{GenerationState, Stage};
use scrapegen_sandbox::{OUTPUT_ENV_VAR, STATUS_PREFIX};

/// Header of every synthesis prompt
pub const SYNTHESIS_MARKER: &str = "# SCRAPER SYNTHESIS";

/// Header of every error-analysis prompt
pub const ANALYSIS_MARKER: &str = "# FAILURE ANALYSIS";

/// Everything one prompt may contain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    /// `None` for the initial synthesis
    pub stage: Option<Stage>,
    pub task: String,
    pub refined_task: Option<String>,
    /// Simplified schema rendering
    pub schema: String,
    pub html_excerpt: Option<String>,
    pub html_analysis: Option<String>,
    pub previous_code: Option<String>,
    pub errors: Vec<String>,
    /// Rendered snippet block, header included
    pub snippets: Option<String>,
    pub error_analysis: Option<String>,
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl PromptContext {
    /// Context for the first program
    pub fn initial(state: &GenerationState) -> Self {
        Self {
            stage: None,
            task: state.task_description.clone(),
            refined_task: non_empty(&state.refined_task),
            schema: state.schema.render_simplified(),
            html_excerpt: non_empty(&state.html_context.excerpt),
            html_analysis: non_empty(&state.html_context.analysis),
            ..Self::default()
        }
    }

    /// Context for repairing the current program after `stage` failed
    pub fn repair(stage: Stage, state: &GenerationState) -> Self {
        Self {
            stage: Some(stage),
            previous_code: non_empty(&state.generated_code),
            errors: state.errors.get(stage).to_vec(),
            ..Self::initial(state)
        }
    }

    pub fn with_snippets(mut self, snippets: impl Into<String>) -> Self {
        self.snippets = non_empty(&snippets.into());
        self
    }

    pub fn with_analysis(mut self, analysis: impl Into<String>) -> Self {
        self.error_analysis = non_empty(&analysis.into());
        self
    }
}

fn section(prompt: &mut String, title: &str, body: &str) {
    prompt.push_str(&format!("## {}\n\n", title));
    prompt.push_str(body.trim_end());
    prompt.push_str("\n\n");
}

fn code_section(prompt: &mut String, title: &str, code: &str) {
    prompt.push_str(&format!("## {}\n\n```python\n", title));
    prompt.push_str(code.trim_end());
    prompt.push_str("\n```\n\n");
}

fn push_task(prompt: &mut String, ctx: &PromptContext) {
    section(prompt, "TASK", &ctx.task);
    if let Some(refined) = &ctx.refined_task {
        section(prompt, "REFINED TASK", refined);
    }
    prompt.push_str("## OUTPUT SCHEMA\n\n```json\n");
    prompt.push_str(ctx.schema.trim_end());
    prompt.push_str("\n```\n\n");
    if let Some(analysis) = &ctx.html_analysis {
        section(prompt, "PAGE ANALYSIS", analysis);
    }
}

fn push_errors(prompt: &mut String, stage: Stage, errors: &[String]) {
    prompt.push_str(&format!("## {} ERRORS\n\n", stage.as_str().to_uppercase()));
    if errors.is_empty() {
        prompt.push_str("(no diagnostics captured)\n\n");
        return;
    }
    for error in errors {
        prompt.push_str(&format!("- {}\n", error.trim_end().replace('\n', "\n  ")));
    }
    prompt.push('\n');
}

fn stage_focus(stage: Stage) -> &'static str {
    match stage {
        Stage::Syntax => {
            "The program above does not parse. Fix the syntax errors without changing \
             what the program does."
        }
        Stage::Execution => {
            "The program above failed when run. Fix the cause of the failure shown in \
             the output."
        }
        Stage::Validation => {
            "The program ran, but its output does not match the output schema. Make \
             every record conform to the schema exactly."
        }
        Stage::Semantic => {
            "The program ran, but its output differs in meaning from the expected \
             result. Fix the extraction so the listed differences disappear."
        }
    }
}

/// Rules the generated program must follow to be checked by the sandbox
pub fn program_contract() -> String {
    format!(
        "- Write a complete, runnable Python program using the Crawlee library.\n\
         - Write the extracted data as JSON to the file path given in the `{env}` environment variable.\n\
         - If the program catches an error it cannot recover from, print one line \
         `{prefix} {{\"status\": \"error\", \"message\": \"<what went wrong>\"}}` and exit.\n\
         - Do not print that line on success.\n\
         - Reply with the program in a single ```python fenced block.\n",
        env = OUTPUT_ENV_VAR,
        prefix = STATUS_PREFIX
    )
}

/// Render a synthesis prompt
pub fn format_prompt(ctx: &PromptContext) -> String {
    let mut prompt = String::new();

    match ctx.stage {
        None => prompt.push_str(&format!("{} - initial program\n\n", SYNTHESIS_MARKER)),
        Some(stage) => prompt.push_str(&format!("{} - {} repair\n\n", SYNTHESIS_MARKER, stage)),
    }

    push_task(&mut prompt, ctx);

    if let Some(excerpt) = &ctx.html_excerpt {
        prompt.push_str("## HTML EXCERPT\n\n```html\n");
        prompt.push_str(excerpt.trim_end());
        prompt.push_str("\n```\n\n");
    }

    if let Some(stage) = ctx.stage {
        if let Some(code) = &ctx.previous_code {
            code_section(&mut prompt, "CURRENT PROGRAM", code);
        }
        push_errors(&mut prompt, stage, &ctx.errors);
    }

    if let Some(snippets) = &ctx.snippets {
        section(&mut prompt, "DOCUMENTATION", snippets);
    }

    if let Some(analysis) = &ctx.error_analysis {
        section(&mut prompt, "ERROR ANALYSIS", analysis);
    }

    prompt.push_str("## INSTRUCTIONS\n\n");
    if let Some(stage) = ctx.stage {
        prompt.push_str(stage_focus(stage));
        prompt.push_str(" Return the whole corrected program.\n\n");
    } else {
        prompt.push_str("Write a scraper that performs the task and emits data matching the output schema.\n\n");
    }
    prompt.push_str(&program_contract());

    prompt
}

/// Render the analysis prompt asked before a non-syntax regeneration
pub fn format_analysis_prompt(ctx: &PromptContext) -> String {
    let stage = ctx.stage.unwrap_or(Stage::Execution);
    let mut prompt = String::new();

    prompt.push_str(&format!("{} - {} stage\n\n", ANALYSIS_MARKER, stage));
    push_task(&mut prompt, ctx);

    if let Some(code) = &ctx.previous_code {
        code_section(&mut prompt, "CURRENT PROGRAM", code);
    }
    push_errors(&mut prompt, stage, &ctx.errors);

    if let Some(snippets) = &ctx.snippets {
        section(&mut prompt, "DOCUMENTATION", snippets);
    }

    prompt.push_str("## INSTRUCTIONS\n\n");
    prompt.push_str(
        "Explain in a few sentences what causes these errors and what must change in \
         the program to fix them. Do not write the program.\n",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapegen_core::{FieldSchema, HtmlContext};

    fn state() -> GenerationState {
        let schema = FieldSchema::array(FieldSchema::object([
            ("name", FieldSchema::string()),
            ("price", FieldSchema::number()),
        ]));
        let mut state = GenerationState::new(
            "Scrape product names and prices",
            "",
            schema,
            HtmlContext {
                excerpt: "<li class=\"product\">Widget <b>9.99</b></li>".to_string(),
                analysis: "Products are li.product elements".to_string(),
            },
        );
        state.generated_code = "print('hi')".to_string();
        state
    }

    #[test]
    fn test_initial_prompt_sections() {
        let prompt = format_prompt(&PromptContext::initial(&state()));
        assert!(prompt.starts_with(SYNTHESIS_MARKER));
        assert!(prompt.contains("## TASK\n\nScrape product names and prices"));
        assert!(prompt.contains("\"price\": \"number\""));
        assert!(prompt.contains("## HTML EXCERPT"));
        assert!(prompt.contains("li.product"));
        assert!(prompt.contains(OUTPUT_ENV_VAR));
        assert!(prompt.contains(STATUS_PREFIX));
        // Blank refined task is omitted, and there is no program yet
        assert!(!prompt.contains("REFINED TASK"));
        assert!(!prompt.contains("CURRENT PROGRAM"));
    }

    #[test]
    fn test_repair_prompt_includes_errors_snippets_analysis_in_order() {
        let mut state = state();
        state
            .errors
            .set(Stage::Execution, vec!["Traceback\nKeyError: 'price'".to_string()]);
        let ctx = PromptContext::repair(Stage::Execution, &state)
            .with_snippets("*Documentation retrieved for query: 'q'*\nsnippet")
            .with_analysis("The selector is wrong");
        let prompt = format_prompt(&ctx);

        assert!(prompt.contains("execution repair"));
        assert!(prompt.contains("```python\nprint('hi')\n```"));
        assert!(prompt.contains("## EXECUTION ERRORS\n\n- Traceback\n  KeyError: 'price'"));

        let docs = prompt.find("## DOCUMENTATION").unwrap();
        let analysis = prompt.find("## ERROR ANALYSIS").unwrap();
        assert!(docs < analysis);
    }

    #[test]
    fn test_empty_snippets_are_dropped() {
        let ctx = PromptContext::repair(Stage::Syntax, &state()).with_snippets("");
        assert_eq!(ctx.snippets, None);
        assert!(!format_prompt(&ctx).contains("## DOCUMENTATION"));
    }

    #[test]
    fn test_analysis_prompt_marker() {
        let ctx = PromptContext::repair(Stage::Validation, &state());
        let prompt = format_analysis_prompt(&ctx);
        assert!(prompt.starts_with(ANALYSIS_MARKER));
        assert!(prompt.contains("validation stage"));
        assert!(!prompt.contains(SYNTHESIS_MARKER));
    }
}
