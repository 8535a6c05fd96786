//! # scrapegen-orchestrator
//!
//! Generates a scraper program and repairs it until it works.
//!
//! ## Flow
//!
//! 1. **Initial synthesis**: rewrite the task into a documentation query, retrieve
//!    snippets, synthesize the first program
//! 2. **Syntax**: parse; on failure regenerate from the parser message alone
//! 3. **Execution**: run in the sandbox; on failure retrieve, analyze, regenerate
//! 4. **Validation** (optional): check the output data against the schema
//! 5. **Semantic** (optional): compare the output with a reference result
//!
//! A stage that exhausts its budget ends the outer iteration; the next one starts
//! again at syntax with the latest program. The transitions live in
//! [`state_machine`], the side effects in [`RepairController`].

mod controller;
mod extract;
mod persist;
pub mod prompt;
pub mod state_machine;
mod synthesizer;

pub use controller::{ControllerConfig, RepairController};
pub use extract::extract_code;
pub use persist::{code_path, load_state, save_code, save_state, DEFAULT_CODE_FILE};
pub use prompt::{format_prompt, PromptContext, ANALYSIS_MARKER, SYNTHESIS_MARKER};
pub use state_machine::{transition, Action, Event, Limits, State};
pub use synthesizer::CodeSynthesizer;
