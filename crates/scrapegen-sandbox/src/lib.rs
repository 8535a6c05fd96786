//! # scrapegen-sandbox
//!
//! Runs generated programs and decides whether a run succeeded.
//!
//! A run writes the program to an ephemeral script inside a fresh working
//! directory, launches the configured interpreter on it with a wall-clock timeout,
//! and captures stdout and stderr interleaved into one buffer. Success means exit
//! code 0 with no in-band failure report (see [`status`]).

pub mod artifact;
mod executor;
mod mock;
pub mod status;
mod syntax;

pub use artifact::load_artifact;
pub use executor::{CodeExecutor, ExecutionOutcome, SandboxExecutor, OUTPUT_ENV_VAR};
pub use mock::MockExecutor;
pub use status::{RunStatus, StatusPayload, STATUS_PREFIX};
pub use syntax::{PythonSyntaxChecker, SyntaxChecker, TreeSitterSyntaxChecker};
