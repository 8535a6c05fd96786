//! # scrapegen-validation
//!
//! Checks on the data a scraper produced:
//!
//! - [`SchemaValidator`]: structural conformance to the declared output schema
//! - [`SemanticComparator`]: agreement with a known-good reference result

mod schema;
mod semantic;

pub use schema::{validate, SchemaValidator, ValidationReport};
pub use semantic::{parse_verdict, SemanticComparator, SemanticVerdict};
