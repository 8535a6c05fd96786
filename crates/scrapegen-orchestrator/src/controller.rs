//! Repair-loop controller
//!
//! Drives [`crate::state_machine`] against real collaborators. Each action the
//! machine emits is performed here, and its result becomes the next event. All
//! network and process access goes through injected traits, so every transition
//! can be exercised with the scripted doubles.

use crate::prompt::PromptContext;
use crate::state_machine::{transition, Action, Event, Limits, State};
use crate::synthesizer::CodeSynthesizer;
use scrapegen_core::config::{RetrievalConfig, RetryBudgets, StageSwitches};
use scrapegen_core::fail_open::fail_open;
use scrapegen_core::{GenerationState, Result, ScrapegenConfig, ScrapegenError, Stage};
use scrapegen_llm::{Embedder, TextGenerator};
use scrapegen_retrieval::{render_snippets, QueryRewriter, Retriever, VectorIndex};
use scrapegen_sandbox::{CodeExecutor, ExecutionOutcome, SyntaxChecker};
use scrapegen_validation::{SchemaValidator, SemanticComparator};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings the controller runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub budgets: RetryBudgets,
    pub stages: StageSwitches,
    pub retrieval: RetrievalConfig,
    pub execution_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_config(&ScrapegenConfig::default())
    }
}

impl ControllerConfig {
    pub fn from_config(config: &ScrapegenConfig) -> Self {
        Self {
            budgets: config.budgets,
            stages: config.stages,
            retrieval: config.retrieval.clone(),
            execution_timeout: config.sandbox.timeout(),
        }
    }

    /// Limits for one run; semantic checking needs a reference result
    fn limits_for(&self, state: &GenerationState) -> Limits {
        let mut switches = self.stages;
        if switches.semantic_enabled && state.reference_result.is_none() {
            info!("No reference result; semantic stage skipped");
            switches.semantic_enabled = false;
        }
        Limits {
            budgets: self.budgets,
            switches,
        }
    }
}

/// Per-run scratch the controller keeps between actions
#[derive(Default)]
struct RunScratch {
    last_outcome: Option<ExecutionOutcome>,
    /// Program that produced `last_outcome`
    executed_code: Option<String>,
}

/// Runs synthesis and the staged repair loop on a [`GenerationState`]
///
/// Stateless across runs: the same controller may serve many states, one
/// `run` per state.
pub struct RepairController {
    synthesizer: CodeSynthesizer,
    rewriter: QueryRewriter,
    retriever: Retriever,
    executor: Arc<dyn CodeExecutor>,
    syntax: Arc<dyn SyntaxChecker>,
    validator: SchemaValidator,
    comparator: SemanticComparator,
    config: ControllerConfig,
}

impl RepairController {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        executor: Arc<dyn CodeExecutor>,
        syntax: Arc<dyn SyntaxChecker>,
        config: ControllerConfig,
    ) -> Self {
        let retriever = Retriever::new(embedder, index, config.retrieval.collection.clone())
            .with_timeout(config.retrieval.timeout())
            .with_attempts(config.retrieval.attempts);
        let rewriter =
            QueryRewriter::new(generator.clone()).with_max_chars(config.retrieval.max_query_chars);
        let validator = if config.stages.strict_validation {
            SchemaValidator::new().deny_unknown_fields()
        } else {
            SchemaValidator::new()
        };
        Self {
            synthesizer: CodeSynthesizer::new(generator.clone()),
            rewriter,
            retriever,
            executor,
            syntax,
            validator,
            comparator: SemanticComparator::new(generator),
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run the loop to completion, returning the working program
    pub async fn generate(&self, state: &mut GenerationState) -> Result<String> {
        self.run(state).await?;
        Ok(state.generated_code.clone())
    }

    /// Synthesize once, then repair until every enabled stage passes
    ///
    /// On success `state.errors` is empty. When the outer budget runs out the
    /// error is [`ScrapegenError::RepairExhausted`] and `state` keeps the last
    /// program and diagnostics.
    pub async fn run(&self, state: &mut GenerationState) -> Result<()> {
        let limits = self.config.limits_for(state);
        let mut scratch = RunScratch::default();

        info!("Starting generation: {}", state.task_description);
        self.initial_synthesis(state).await?;

        let (mut machine, mut actions) =
            transition(State::InitialSynthesis, Event::InitialCodeReady, &limits);

        loop {
            let mut next = None;
            for action in actions {
                next = self.perform(action, state, &mut scratch, &limits).await?;
            }

            match &machine {
                State::Done { passes } => {
                    info!("Working program after {} iteration(s)", passes);
                    return Ok(());
                }
                State::Failed { passes, reason } => {
                    warn!("Repair failed: {}", reason);
                    return Err(ScrapegenError::RepairExhausted {
                        iterations: *passes,
                        errors: state.errors.clone(),
                    });
                }
                _ => {}
            }

            let event = next.unwrap_or_else(|| Event::Error {
                message: format!("No event produced in state {:?}", machine),
            });
            (machine, actions) = transition(machine, event, &limits);
        }
    }

    async fn perform(
        &self,
        action: Action,
        state: &mut GenerationState,
        scratch: &mut RunScratch,
        limits: &Limits,
    ) -> Result<Option<Event>> {
        match action {
            Action::BeginPass { pass } => {
                info!("=== Iteration {} of {} ===", pass, limits.budgets.overall);
                Ok(None)
            }
            Action::RunCheck { stage } => self.run_check(stage, state, scratch).await.map(Some),
            Action::RecordErrors { stage, errors } => {
                warn!("{} check failed: {}", stage, errors.join(" | "));
                state.errors.fail_only(stage, errors);
                Ok(None)
            }
            Action::ClearErrors { stage } => {
                state.errors.clear(stage);
                Ok(None)
            }
            Action::Regenerate { stage } => {
                self.regenerate(stage, state).await?;
                Ok(Some(Event::Regenerated))
            }
            Action::RecheckSyntax => {
                let issues = self.syntax.check(&state.generated_code).await?;
                if issues.is_empty() {
                    Ok(Some(Event::SyntaxRecheckPassed))
                } else {
                    info!("Regenerated program does not parse; back to syntax stage");
                    Ok(Some(Event::SyntaxRecheckFailed { errors: issues }))
                }
            }
            Action::CompletePass { pass } => {
                state.complete_iteration();
                debug!("Iteration {} complete: {}", pass, state.errors);
                Ok(None)
            }
        }
    }

    async fn initial_synthesis(&self, state: &mut GenerationState) -> Result<()> {
        let schema = state.schema.render_simplified();
        let query = self
            .rewriter
            .initial_query(&state.task_description, &schema, &state.html_context.analysis)
            .await;
        let hits = self
            .retriever
            .retrieve(&query, self.config.retrieval.initial_k)
            .await;

        let ctx = PromptContext::initial(state).with_snippets(render_snippets(&query, &hits));
        state.generated_code = self.synthesizer.synthesize(&ctx).await?;
        info!("Initial program synthesized ({} chars)", state.generated_code.len());
        Ok(())
    }

    async fn run_check(
        &self,
        stage: Stage,
        state: &mut GenerationState,
        scratch: &mut RunScratch,
    ) -> Result<Event> {
        info!("Checking {}", stage);

        let stale = scratch.executed_code.as_deref() != Some(state.generated_code.as_str());
        if matches!(stage, Stage::Validation | Stage::Semantic) && stale {
            info!("Running regenerated program before the {} check", stage);
            let errors = self.execute(state, scratch).await?;
            if !errors.is_empty() {
                return Ok(Event::ExecutionRegressed { errors });
            }
        }

        let errors = match stage {
            Stage::Syntax => self.syntax.check(&state.generated_code).await?,
            Stage::Execution => self.execute(state, scratch).await?,
            Stage::Validation => match self.load_output(scratch).await {
                Ok(data) => self.validator.validate(&data, &state.schema).violations,
                Err(message) => vec![message],
            },
            Stage::Semantic => match (self.load_output(scratch).await, &state.reference_result) {
                (Ok(data), Some(reference)) => {
                    self.comparator.compare(&data, reference).await?.error_lines()
                }
                (Ok(_), None) => Vec::new(),
                (Err(message), _) => vec![message],
            },
        };

        if errors.is_empty() {
            info!("{} check passed", stage);
            Ok(Event::CheckPassed)
        } else {
            Ok(Event::CheckFailed { errors })
        }
    }

    /// Run the current program; errors are empty on success
    async fn execute(
        &self,
        state: &mut GenerationState,
        scratch: &mut RunScratch,
    ) -> Result<Vec<String>> {
        let outcome = self
            .executor
            .run(&state.generated_code, self.config.execution_timeout)
            .await?;
        let errors = if outcome.is_success() {
            let previous = state.execution_result.replace(outcome.to_execution_result());
            if let Some(previous) = previous.filter(|p| p.workdir != outcome.workdir) {
                // Only the latest successful run's output is ever read again
                fail_open("discard previous run", || {
                    self.executor.discard_run(&previous.workdir)
                })
                .await;
            }
            Vec::new()
        } else {
            vec![outcome.failure_message()]
        };
        scratch.last_outcome = Some(outcome);
        scratch.executed_code = Some(state.generated_code.clone());
        Ok(errors)
    }

    /// Data written by the last successful run; `Err` carries a diagnostic for the program
    async fn load_output(&self, scratch: &RunScratch) -> std::result::Result<Value, String> {
        let Some(outcome) = &scratch.last_outcome else {
            return Err("No execution output available.".to_string());
        };
        match self.executor.load_output(outcome).await {
            Ok(Some(data)) => Ok(data),
            Ok(None) => Err(format!(
                "The program produced no output data. Write the extracted data as JSON to the path in ${}.",
                scrapegen_sandbox::OUTPUT_ENV_VAR
            )),
            Err(e) => Err(format!("Could not read the program's output data: {}", e)),
        }
    }

    async fn regenerate(&self, stage: Stage, state: &mut GenerationState) -> Result<()> {
        info!("Regenerating after {} failure", stage);
        let mut ctx = PromptContext::repair(stage, state);

        if stage != Stage::Syntax {
            let error_text = state.errors.joined(stage);
            let query = self
                .rewriter
                .error_query(stage, &state.html_context.analysis, &error_text)
                .await;
            let hits = self
                .retriever
                .retrieve(&query, self.config.retrieval.k_for_stage(stage))
                .await;
            ctx = ctx.with_snippets(render_snippets(&query, &hits));

            match self.synthesizer.analyze(&ctx).await {
                Ok(analysis) => ctx = ctx.with_analysis(analysis),
                Err(e) => warn!("Error analysis failed ({}); regenerating without it", e),
            }
        }

        state.generated_code = self.synthesizer.synthesize(&ctx).await?;
        Ok(())
    }
}
