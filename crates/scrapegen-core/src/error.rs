//! Unified error types for scrapegen

use crate::types::StageErrors;
use thiserror::Error;

/// Unified error type for all scrapegen operations
#[derive(Error, Debug)]
pub enum ScrapegenError {
    // Text generation errors
    #[error("Text generation failed: {0}")]
    Llm(String),

    #[error("API limit reached: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Retrieval errors
    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Vector index error: {0}")]
    Retrieval(String),

    // Sandbox errors
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Syntax checker error: {0}")]
    Syntax(String),

    // Schema errors
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// The outer iteration budget ran out while a stage still reported errors
    #[error("Max iterations ({iterations}) reached without obtaining working code: {errors}")]
    RepairExhausted {
        iterations: usize,
        errors: StageErrors,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl ScrapegenError {
    /// Errors raised by remote services rather than by the generated program
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Llm(_)
                | Self::ApiLimit(_)
                | Self::Auth(_)
                | Self::Embedding(_)
                | Self::Retrieval(_)
                | Self::Timeout { .. }
        )
    }
}

/// Result type alias using ScrapegenError
pub type Result<T> = std::result::Result<T, ScrapegenError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stage;

    #[test]
    fn test_repair_exhausted_display_carries_errors() {
        let mut errors = StageErrors::default();
        errors.set(Stage::Execution, vec!["Traceback: boom".to_string()]);
        let err = ScrapegenError::RepairExhausted {
            iterations: 1,
            errors,
        };
        let text = err.to_string();
        assert!(text.contains("Max iterations (1)"));
        assert!(text.contains("execution"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(ScrapegenError::Llm("down".into()).is_infrastructure());
        assert!(ScrapegenError::Timeout {
            operation: "complete".into(),
            seconds: 5
        }
        .is_infrastructure());
        assert!(!ScrapegenError::Sandbox("spawn".into()).is_infrastructure());
    }
}
