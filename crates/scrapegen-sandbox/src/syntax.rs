//! Parse-only syntax checking of generated programs
//!
//! The configured interpreter is the authority: the program is piped to
//! `ast.parse`, which rejects everything CPython rejects (indentation errors,
//! Python 2 statements). When the interpreter cannot be run, tree-sitter gives
//! a best-effort answer instead.

use async_trait::async_trait;
use scrapegen_core::config::SandboxConfig;
use scrapegen_core::{Result, ScrapegenError};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};
use tree_sitter::{Node, Parser};

const MAX_REPORTED: usize = 5;

/// Exit code the parse script uses for "does not parse"
const REJECTED_EXIT: i32 = 3;

const PARSE_SCRIPT: &str = r#"import ast, sys
try:
    ast.parse(sys.stdin.buffer.read(), "<generated>")
except SyntaxError as e:
    print("line %s, column %s: %s: %s" % (e.lineno, e.offset, type(e).__name__, e.msg))
    sys.exit(3)
except ValueError as e:
    print("invalid source: %s" % e)
    sys.exit(3)
"#;

/// Checks that a program parses; `Ok(vec![])` means it does
#[async_trait]
pub trait SyntaxChecker: Send + Sync {
    async fn check(&self, code: &str) -> Result<Vec<String>>;
}

/// Python syntax checker running `ast.parse` in the sandbox interpreter
#[derive(Debug, Clone)]
pub struct PythonSyntaxChecker {
    interpreter: Vec<String>,
    timeout: Duration,
}

impl Default for PythonSyntaxChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl PythonSyntaxChecker {
    pub fn new() -> Self {
        Self {
            interpreter: vec!["python3".to_string()],
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new().with_interpreter(config.interpreter.clone())
    }

    pub fn with_interpreter(mut self, interpreter: Vec<String>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `Ok(issues)` from the interpreter, `Err` when it could not give a verdict
    #[instrument(skip(self, code), fields(bytes = code.len()))]
    async fn interpreter_check(&self, code: &str) -> Result<Vec<String>> {
        let (program, args) = self
            .interpreter
            .split_first()
            .ok_or_else(|| ScrapegenError::Syntax("No interpreter configured".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .arg("-c")
            .arg(PARSE_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ScrapegenError::Syntax(format!("Failed to launch {:?}: {}", self.interpreter, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(code.as_bytes()).await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ScrapegenError::Timeout {
                operation: "syntax check".to_string(),
                seconds: self.timeout.as_secs(),
            })??;

        match output.status.code() {
            Some(0) => Ok(Vec::new()),
            Some(REJECTED_EXIT) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let issues: Vec<String> = stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                if issues.is_empty() {
                    Ok(vec!["invalid syntax".to_string()])
                } else {
                    Ok(issues)
                }
            }
            other => Err(ScrapegenError::Syntax(format!(
                "Parser exited with {:?}: {}",
                other,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

#[async_trait]
impl SyntaxChecker for PythonSyntaxChecker {
    async fn check(&self, code: &str) -> Result<Vec<String>> {
        if code.trim().is_empty() {
            return Ok(vec!["program is empty".to_string()]);
        }

        let issues = match self.interpreter_check(code).await {
            Ok(issues) => issues,
            Err(e) => {
                warn!("Interpreter syntax check unavailable ({}); using tree-sitter", e);
                tree_sitter_issues(code)?
            }
        };
        if !issues.is_empty() {
            debug!("Syntax check found {} issues", issues.len());
        }
        Ok(issues)
    }
}

/// Error-tolerant parse with tree-sitter
///
/// Catches unbalanced brackets and malformed statements with line and column,
/// but accepts some programs CPython rejects.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSitterSyntaxChecker;

#[async_trait]
impl SyntaxChecker for TreeSitterSyntaxChecker {
    async fn check(&self, code: &str) -> Result<Vec<String>> {
        if code.trim().is_empty() {
            return Ok(vec!["program is empty".to_string()]);
        }
        tree_sitter_issues(code)
    }
}

fn snippet(node: Node<'_>, source: &[u8]) -> String {
    let text = node.utf8_text(source).unwrap_or("").trim();
    let first_line = text.lines().next().unwrap_or("");
    first_line.chars().take(40).collect()
}

fn collect_issues(node: Node<'_>, source: &[u8], issues: &mut Vec<String>) {
    if issues.len() >= MAX_REPORTED {
        return;
    }
    let pos = node.start_position();
    if node.is_missing() {
        issues.push(format!(
            "line {}, column {}: missing `{}`",
            pos.row + 1,
            pos.column + 1,
            node.kind()
        ));
        return;
    }
    if node.is_error() {
        let text = snippet(node, source);
        issues.push(if text.is_empty() {
            format!("line {}, column {}: invalid syntax", pos.row + 1, pos.column + 1)
        } else {
            format!(
                "line {}, column {}: invalid syntax near `{}`",
                pos.row + 1,
                pos.column + 1,
                text
            )
        });
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() || child.is_missing() {
            collect_issues(child, source, issues);
        }
    }
}

fn tree_sitter_issues(code: &str) -> Result<Vec<String>> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| ScrapegenError::Syntax(format!("Failed to load Python grammar: {}", e)))?;
    let tree = parser
        .parse(code, None)
        .ok_or_else(|| ScrapegenError::Syntax("Parser returned no tree".to_string()))?;

    let root = tree.root_node();
    if !root.has_error() {
        return Ok(Vec::new());
    }

    let mut issues = Vec::new();
    collect_issues(root, code.as_bytes(), &mut issues);
    if issues.is_empty() {
        issues.push("invalid syntax".to_string());
    }
    Ok(issues)
}
