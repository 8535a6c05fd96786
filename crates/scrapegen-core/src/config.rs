//! Configuration management for scrapegen
//!
//! Retry budgets, retrieval depths, stage switches, sandbox and provider settings.
//! Loaded from `.scrapegen/config.toml` in the project root, or defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, ScrapegenError, Stage};

/// Project-level scrapegen configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapegenConfig {
    #[serde(default)]
    pub budgets: RetryBudgets,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub stages: StageSwitches,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Maximum attempts per stage, plus the outer iteration budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudgets {
    #[serde(default = "default_overall")]
    pub overall: usize,
    #[serde(default = "default_stage_budget")]
    pub syntax: usize,
    #[serde(default = "default_stage_budget")]
    pub execution: usize,
    #[serde(default = "default_stage_budget")]
    pub validation: usize,
    #[serde(default = "default_stage_budget")]
    pub semantic: usize,
}

impl RetryBudgets {
    pub fn for_stage(&self, stage: Stage) -> usize {
        match stage {
            Stage::Syntax => self.syntax,
            Stage::Execution => self.execution,
            Stage::Validation => self.validation,
            Stage::Semantic => self.semantic,
        }
    }
}

/// Snippet counts per retrieval query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_initial_k")]
    pub initial_k: usize,
    #[serde(default = "default_execution_k")]
    pub execution_k: usize,
    #[serde(default = "default_validation_k")]
    pub validation_k: usize,
    #[serde(default = "default_validation_k")]
    pub semantic_k: usize,
    /// Bound on one embed-plus-search lookup
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
    /// Lookups tried before a query goes without snippets
    #[serde(default = "default_retrieval_attempts")]
    pub attempts: usize,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

impl RetrievalConfig {
    /// Snippet count for a stage's error query; syntax never retrieves
    pub fn k_for_stage(&self, stage: Stage) -> usize {
        match stage {
            Stage::Syntax => 0,
            Stage::Execution => self.execution_k,
            Stage::Validation => self.validation_k,
            Stage::Semantic => self.semantic_k,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which optional stages run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSwitches {
    #[serde(default)]
    pub validation_enabled: bool,
    #[serde(default)]
    pub semantic_enabled: bool,
    /// Re-parse every program regenerated by a later stage before running it again
    #[serde(default)]
    pub recheck_syntax_after_regeneration: bool,
    /// Validation also rejects object keys the schema does not declare
    #[serde(default)]
    pub strict_validation: bool,
}

impl StageSwitches {
    pub fn is_enabled(&self, stage: Stage) -> bool {
        match stage {
            Stage::Syntax | Stage::Execution => true,
            Stage::Validation => self.validation_enabled,
            Stage::Semantic => self.semantic_enabled,
        }
    }
}

/// How an exit-0 run can still report failure in its own output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MarkerPolicy {
    /// Line-anchored structured status lines (see the sandbox crate)
    StatusLine,
    /// Legacy: any occurrence of the substring marks failure
    Substring(String),
    /// Exit code alone decides
    None,
}

impl Default for MarkerPolicy {
    fn default() -> Self {
        Self::StatusLine
    }
}

/// Subprocess sandbox settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter command; the script path is appended as the last argument
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,
    #[serde(default = "default_script_suffix")]
    pub script_suffix: String,
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default)]
    pub marker: MarkerPolicy,
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Text-generation provider settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    /// Page excerpt characters kept for prompts
    #[serde(default = "default_max_html_chars")]
    pub max_html_chars: usize,
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_batch")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub request_timeout_secs: u64,
}

impl EmbeddingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Default value providers
fn default_overall() -> usize {
    10
}

fn default_stage_budget() -> usize {
    3
}

fn default_collection() -> String {
    "vectorial_collection".to_string()
}

fn default_initial_k() -> usize {
    2
}

fn default_execution_k() -> usize {
    12
}

fn default_validation_k() -> usize {
    4
}

fn default_retrieval_timeout() -> u64 {
    60
}

fn default_retrieval_attempts() -> usize {
    2
}

fn default_max_query_chars() -> usize {
    300
}

fn default_interpreter() -> Vec<String> {
    vec!["python3".to_string()]
}

fn default_script_suffix() -> String {
    ".py".to_string()
}

fn default_sandbox_timeout() -> u64 {
    60
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".scrapegen/artifacts")
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_max_tokens() -> usize {
    8000
}

fn default_request_timeout() -> u64 {
    120
}

fn default_llm_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_html_chars() -> usize {
    crate::types::DEFAULT_MAX_HTML_CHARS
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embedding_batch() -> usize {
    64
}

fn default_embedding_timeout() -> u64 {
    60
}

impl ScrapegenConfig {
    /// Load configuration from `.scrapegen/config.toml` or use defaults
    pub fn load_or_default(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".scrapegen/config.toml");

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            ScrapegenError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.check()?;
        Ok(config)
    }

    /// Write default configuration to `.scrapegen/config.toml`
    pub fn write_default(project_root: &Path) -> Result<PathBuf> {
        let config_dir = project_root.join(".scrapegen");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| ScrapegenError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject settings the controller cannot run with
    pub fn check(&self) -> Result<()> {
        if self.budgets.overall == 0 {
            return Err(ScrapegenError::Config(
                "budgets.overall must be at least 1".to_string(),
            ));
        }
        for stage in Stage::ALL {
            if self.stages.is_enabled(stage) && self.budgets.for_stage(stage) == 0 {
                return Err(ScrapegenError::Config(format!(
                    "budgets.{} must be at least 1 while the stage is enabled",
                    stage
                )));
            }
        }
        if self.retrieval.attempts == 0 {
            return Err(ScrapegenError::Config(
                "retrieval.attempts must be at least 1".to_string(),
            ));
        }
        if self.sandbox.interpreter.is_empty() {
            return Err(ScrapegenError::Config(
                "sandbox.interpreter must name a program".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self {
            overall: default_overall(),
            syntax: default_stage_budget(),
            execution: default_stage_budget(),
            validation: default_stage_budget(),
            semantic: default_stage_budget(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            initial_k: default_initial_k(),
            execution_k: default_execution_k(),
            validation_k: default_validation_k(),
            semantic_k: default_validation_k(),
            timeout_secs: default_retrieval_timeout(),
            attempts: default_retrieval_attempts(),
            max_query_chars: default_max_query_chars(),
        }
    }
}

impl Default for StageSwitches {
    fn default() -> Self {
        Self {
            validation_enabled: false,
            semantic_enabled: false,
            recheck_syntax_after_regeneration: false,
            strict_validation: false,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script_suffix: default_script_suffix(),
            timeout_secs: default_sandbox_timeout(),
            artifact_dir: default_artifact_dir(),
            max_output_bytes: default_max_output_bytes(),
            marker: MarkerPolicy::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
            api_key_env: default_llm_key_env(),
            max_html_chars: default_max_html_chars(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            api_key_env: default_embedding_key_env(),
            batch_size: default_embedding_batch(),
            request_timeout_secs: default_embedding_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_reference_budgets() {
        let config = ScrapegenConfig::default();
        assert_eq!(config.budgets.overall, 10);
        assert_eq!(config.budgets.for_stage(Stage::Execution), 3);
        assert_eq!(config.retrieval.initial_k, 2);
        assert_eq!(config.retrieval.k_for_stage(Stage::Execution), 12);
        assert_eq!(config.retrieval.k_for_stage(Stage::Syntax), 0);
        assert!(!config.stages.is_enabled(Stage::Validation));
        assert!(config.stages.is_enabled(Stage::Execution));
        assert_eq!(config.retrieval.timeout(), Duration::from_secs(60));
        assert_eq!(config.embedding.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.llm.max_html_chars, crate::types::DEFAULT_MAX_HTML_CHARS);
    }

    #[test]
    fn test_load_missing_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ScrapegenConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, ScrapegenConfig::default());
    }

    #[test]
    fn test_write_then_load_default() {
        let dir = TempDir::new().unwrap();
        let path = ScrapegenConfig::write_default(dir.path()).unwrap();
        assert!(path.exists());
        let config = ScrapegenConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, ScrapegenConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".scrapegen")).unwrap();
        std::fs::write(
            dir.path().join(".scrapegen/config.toml"),
            r#"
[budgets]
overall = 2

[stages]
validation_enabled = true

[retrieval]
timeout_secs = 5
max_query_chars = 120

[embedding]
request_timeout_secs = 15

[llm]
max_html_chars = 4000

[sandbox]
interpreter = ["sh"]
script_suffix = ".sh"
marker = { kind = "substring", value = "ERROR" }
"#,
        )
        .unwrap();

        let config = ScrapegenConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.budgets.overall, 2);
        assert_eq!(config.budgets.syntax, 3);
        assert!(config.stages.validation_enabled);
        assert_eq!(config.sandbox.interpreter, vec!["sh".to_string()]);
        assert_eq!(
            config.sandbox.marker,
            MarkerPolicy::Substring("ERROR".to_string())
        );
        assert_eq!(config.sandbox.timeout_secs, 60);
        assert_eq!(config.retrieval.timeout(), Duration::from_secs(5));
        assert_eq!(config.retrieval.attempts, 2);
        assert_eq!(config.retrieval.max_query_chars, 120);
        assert_eq!(config.embedding.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.llm.max_html_chars, 4000);
        assert!(!config.stages.strict_validation);
    }

    #[test]
    fn test_check_rejects_zero_budgets() {
        let mut config = ScrapegenConfig::default();
        config.budgets.overall = 0;
        assert!(config.check().is_err());

        let mut config = ScrapegenConfig::default();
        config.budgets.validation = 0;
        assert!(config.check().is_ok());
        config.stages.validation_enabled = true;
        assert!(config.check().is_err());

        let mut config = ScrapegenConfig::default();
        config.retrieval.attempts = 0;
        assert!(config.check().is_err());
    }
}
