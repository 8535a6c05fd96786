//! Pure state machine for the repair loop
//!
//! No async, no I/O: `transition(state, event, limits) -> (state, actions)`.
//! The controller performs the actions and feeds the result back as the next event.
//! At most one action per transition produces an event, and it is always last.
//!
//! Mutation contract for the actions:
//! - `RecordErrors` makes the stage the only one with errors (overwrite, never append)
//! - `ClearErrors` empties one stage's list
//! - `Regenerate` replaces the program wholesale
//! - `CompletePass` increments the outer iteration counter
//!
//! Validation and semantic checks run a regenerated program again before
//! checking its data. If that run fails, the errors move to the execution stage
//! and the pass ends, like a failed syntax re-check.
//!
//! Invalid transitions go to `Failed`; this module never panics.

use scrapegen_core::config::{RetryBudgets, StageSwitches};
use scrapegen_core::Stage;

/// Budgets and stage switches the machine consults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    pub budgets: RetryBudgets,
    pub switches: StageSwitches,
}

impl Limits {
    /// The enabled stage after `stage`, if any
    pub fn next_stage(&self, stage: Stage) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .skip_while(|s| *s != stage)
            .skip(1)
            .find(|s| self.switches.is_enabled(*s))
    }
}

/// Controller state
///
/// `pass` is the 1-based outer iteration in progress; `attempt` counts the checks
/// already made in the current stage during this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    InitialSynthesis,
    SyntaxCheck { pass: usize, attempt: usize },
    ExecutionCheck { pass: usize, attempt: usize },
    ValidationCheck { pass: usize, attempt: usize },
    SemanticCheck { pass: usize, attempt: usize },
    Done { passes: usize },
    Failed { passes: usize, reason: String },
}

impl State {
    pub fn check(stage: Stage, pass: usize, attempt: usize) -> Self {
        match stage {
            Stage::Syntax => State::SyntaxCheck { pass, attempt },
            Stage::Execution => State::ExecutionCheck { pass, attempt },
            Stage::Validation => State::ValidationCheck { pass, attempt },
            Stage::Semantic => State::SemanticCheck { pass, attempt },
        }
    }

    /// `(stage, pass, attempt)` for check states
    pub fn position(&self) -> Option<(Stage, usize, usize)> {
        match *self {
            State::SyntaxCheck { pass, attempt } => Some((Stage::Syntax, pass, attempt)),
            State::ExecutionCheck { pass, attempt } => Some((Stage::Execution, pass, attempt)),
            State::ValidationCheck { pass, attempt } => Some((Stage::Validation, pass, attempt)),
            State::SemanticCheck { pass, attempt } => Some((Stage::Semantic, pass, attempt)),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done { .. } | State::Failed { .. })
    }
}

/// Results of performed actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The first program has been synthesized
    InitialCodeReady,
    CheckPassed,
    CheckFailed { errors: Vec<String> },
    /// The current stage's regeneration finished
    Regenerated,
    SyntaxRecheckPassed,
    SyntaxRecheckFailed { errors: Vec<String> },
    /// A program regenerated by a data stage failed when run again
    ExecutionRegressed { errors: Vec<String> },
    /// Unrecoverable problem reported by the controller
    Error { message: String },
}

/// Side effects for the controller to perform, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    BeginPass { pass: usize },
    RunCheck { stage: Stage },
    RecordErrors { stage: Stage, errors: Vec<String> },
    ClearErrors { stage: Stage },
    Regenerate { stage: Stage },
    RecheckSyntax,
    CompletePass { pass: usize },
}

/// Start of a pass: syntax is always checked first
fn begin_pass(pass: usize) -> (State, Vec<Action>) {
    (
        State::check(Stage::Syntax, pass, 0),
        vec![
            Action::BeginPass { pass },
            Action::RunCheck {
                stage: Stage::Syntax,
            },
        ],
    )
}

/// End a pass that still has errors: start another, or fail when the budget is spent
fn end_failed_pass(
    pass: usize,
    stage: Stage,
    limits: &Limits,
    mut actions: Vec<Action>,
) -> (State, Vec<Action>) {
    actions.push(Action::CompletePass { pass });
    if pass < limits.budgets.overall {
        let (state, more) = begin_pass(pass + 1);
        actions.extend(more);
        (state, actions)
    } else {
        (
            State::Failed {
                passes: pass,
                reason: format!(
                    "{} stage still failing after {} outer iterations",
                    stage, pass
                ),
            },
            actions,
        )
    }
}

/// Pure state transition function
pub fn transition(state: State, event: Event, limits: &Limits) -> (State, Vec<Action>) {
    if let Event::Error { message } = &event {
        if !state.is_terminal() {
            let passes = state.position().map(|(_, pass, _)| pass - 1).unwrap_or(0);
            return (
                State::Failed {
                    passes,
                    reason: message.clone(),
                },
                vec![],
            );
        }
    }

    match (state, event) {
        (State::InitialSynthesis, Event::InitialCodeReady) => begin_pass(1),

        (state, Event::CheckPassed) if state.position().is_some() => {
            let Some((stage, pass, _)) = state.position() else {
                return invalid(state, Event::CheckPassed);
            };
            let mut actions = vec![Action::ClearErrors { stage }];
            match limits.next_stage(stage) {
                Some(next) => {
                    actions.push(Action::RunCheck { stage: next });
                    (State::check(next, pass, 0), actions)
                }
                None => {
                    actions.push(Action::CompletePass { pass });
                    (State::Done { passes: pass }, actions)
                }
            }
        }

        (state, Event::CheckFailed { errors }) if state.position().is_some() => {
            let Some((stage, pass, attempt)) = state.position() else {
                return invalid(state, Event::CheckFailed { errors });
            };
            let used = attempt + 1;
            let actions = vec![Action::RecordErrors { stage, errors }];
            let stage_has_budget = used < limits.budgets.for_stage(stage);
            let more_passes = pass < limits.budgets.overall;

            if stage_has_budget || more_passes {
                let mut actions = actions;
                actions.push(Action::Regenerate { stage });
                (State::check(stage, pass, used), actions)
            } else {
                // Nothing would ever check a regenerated program
                end_failed_pass(pass, stage, limits, actions)
            }
        }

        (state, Event::Regenerated) if state.position().is_some() => {
            let Some((stage, pass, attempt)) = state.position() else {
                return invalid(state, Event::Regenerated);
            };
            if attempt < limits.budgets.for_stage(stage) {
                let action = if stage != Stage::Syntax
                    && limits.switches.recheck_syntax_after_regeneration
                {
                    Action::RecheckSyntax
                } else {
                    Action::RunCheck { stage }
                };
                (State::check(stage, pass, attempt), vec![action])
            } else {
                end_failed_pass(pass, stage, limits, vec![])
            }
        }

        (state, Event::SyntaxRecheckPassed) if state.position().is_some() => {
            let Some((stage, pass, attempt)) = state.position() else {
                return invalid(state, Event::SyntaxRecheckPassed);
            };
            (
                State::check(stage, pass, attempt),
                vec![Action::RunCheck { stage }],
            )
        }

        (state, Event::SyntaxRecheckFailed { errors }) if state.position().is_some() => {
            let Some((_, pass, _)) = state.position() else {
                return invalid(state, Event::SyntaxRecheckFailed { errors });
            };
            let actions = vec![Action::RecordErrors {
                stage: Stage::Syntax,
                errors,
            }];
            end_failed_pass(pass, Stage::Syntax, limits, actions)
        }

        (state, Event::ExecutionRegressed { errors })
            if matches!(
                state,
                State::ValidationCheck { .. } | State::SemanticCheck { .. }
            ) =>
        {
            let Some((_, pass, _)) = state.position() else {
                return invalid(state, Event::ExecutionRegressed { errors });
            };
            let actions = vec![Action::RecordErrors {
                stage: Stage::Execution,
                errors,
            }];
            end_failed_pass(pass, Stage::Execution, limits, actions)
        }

        (state, event) => invalid(state, event),
    }
}

fn invalid(state: State, event: Event) -> (State, Vec<Action>) {
    let passes = match &state {
        State::Done { passes } | State::Failed { passes, .. } => *passes,
        other => other.position().map(|(_, pass, _)| pass - 1).unwrap_or(0),
    };
    (
        State::Failed {
            passes,
            reason: format!(
                "Invalid state transition: {:?} cannot handle event {:?}",
                state, event
            ),
        },
        vec![],
    )
}
