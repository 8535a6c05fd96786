//! # scrapegen-core
//!
//! Shared vocabulary for the scrapegen repair loop.
//!
//! A scraping program is synthesized from a task description, an output schema and
//! an analysis of the target page, then driven through staged checks:
//!
//! - **syntax**: the program parses
//! - **execution**: the program runs to completion in the sandbox
//! - **validation**: the emitted data conforms to the schema
//! - **semantic**: the emitted data matches a reference result
//!
//! Each failing stage feeds its diagnostics back into regeneration. This crate holds
//! the state record, the per-stage error ledger, the schema descriptor and config.

mod error;
mod types;

pub mod config;
pub mod fail_open;
pub mod schema;

pub use config::ScrapegenConfig;
pub use error::{Result, ScrapegenError};
pub use schema::{FieldKind, FieldSchema, OutputSchema};
pub use types::*;
