//! Structural validation against [`OutputSchema`]
//!
//! The schema is rendered to JSON Schema and checked with `jsonschema`. Every
//! error is reported, prefixed with a `$`-path into the checked value
//! (`$[1].price`).

use jsonschema::JSONSchema;
use scrapegen_core::OutputSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// All violations found in one value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Validator over the JSON Schema form of an [`OutputSchema`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator {
    /// Reject object keys the schema does not declare
    pub deny_unknown_fields: bool,
}

/// `/0/price` -> `$[0].price`
fn dollar_path(pointer: &str) -> String {
    let mut path = String::from("$");
    for segment in pointer.split('/').filter(|s| !s.is_empty()) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if segment.parse::<usize>().is_ok() {
            path.push('[');
            path.push_str(&segment);
            path.push(']');
        } else {
            path.push('.');
            path.push_str(&segment);
        }
    }
    path
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_unknown_fields(mut self) -> Self {
        self.deny_unknown_fields = true;
        self
    }

    /// The JSON Schema this validator checks against
    pub fn json_schema(&self, schema: &OutputSchema) -> Value {
        schema.to_json_schema(self.deny_unknown_fields)
    }

    pub fn validate(&self, value: &Value, schema: &OutputSchema) -> ValidationReport {
        let rendered = self.json_schema(schema);
        let compiled = match JSONSchema::options().compile(&rendered) {
            Ok(compiled) => compiled,
            Err(e) => {
                return ValidationReport {
                    violations: vec![format!("$: schema does not compile: {}", e)],
                }
            }
        };

        let violations: Vec<String> = match compiled.validate(value) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| format!("{}: {}", dollar_path(&e.instance_path.to_string()), e))
                .collect(),
        };
        if !violations.is_empty() {
            tracing::debug!("Validation found {} violations", violations.len());
        }
        ValidationReport { violations }
    }
}

/// Validate with default settings; `ok` iff `violations` is empty
pub fn validate(value: &Value, schema: &OutputSchema) -> (bool, Vec<String>) {
    let report = SchemaValidator::default().validate(value, schema);
    (report.is_ok(), report.violations)
}
