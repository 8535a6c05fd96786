//! Subprocess execution of generated programs

use crate::artifact::load_artifact;
use crate::status::scan_output;
use async_trait::async_trait;
use scrapegen_core::config::{MarkerPolicy, SandboxConfig};
use scrapegen_core::{ExecutionResult, Result, ScrapegenError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Environment variable holding the path the program should write its JSON output to
pub const OUTPUT_ENV_VAR: &str = "SCRAPEGEN_OUTPUT";

const ARTIFACT_FILE: &str = "output.json";

/// Everything observed about one sandbox run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// `None` when the process was killed or terminated by a signal
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr, status lines removed
    pub combined_output: String,
    pub timed_out: bool,
    /// In-band failure reported by the program itself
    pub reported_failure: Option<String>,
    /// Output artifact, when the program wrote one
    pub artifact: Option<PathBuf>,
    /// Removed again when the run failed
    pub workdir: PathBuf,
    /// Where the ephemeral script lived; removed by the time the outcome exists
    pub script_path: PathBuf,
    pub duration_ms: u64,
    pub timeout_ms: u64,
}

/// `2s`, or `250ms` below a whole second
fn format_timeout(ms: u64) -> String {
    if ms >= 1000 && ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

impl ExecutionOutcome {
    /// Exit 0, no timeout, no in-band failure
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0) && self.reported_failure.is_none()
    }

    /// Diagnostic text for a failed run, fed back into regeneration
    pub fn failure_message(&self) -> String {
        let output = self.combined_output.trim();
        let headline = if self.timed_out {
            format!("Execution timed out after {}.", format_timeout(self.timeout_ms))
        } else if let Some(reported) = &self.reported_failure {
            format!("Program reported an error: {}", reported)
        } else {
            match self.exit_code {
                Some(code) => format!("Program exited with code {}.", code),
                None => "Program was terminated by a signal.".to_string(),
            }
        };
        if output.is_empty() {
            headline
        } else {
            format!("{}\n{}", headline, output)
        }
    }

    pub fn to_execution_result(&self) -> ExecutionResult {
        ExecutionResult {
            output: self.combined_output.clone(),
            artifact: self.artifact.clone(),
            workdir: self.workdir.clone(),
        }
    }
}

/// Runs a program to completion (allows mocking in tests)
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn run(&self, code: &str, timeout: Duration) -> Result<ExecutionOutcome>;

    /// Structured data the run produced, if any
    async fn load_output(&self, outcome: &ExecutionOutcome) -> Result<Option<Value>> {
        load_artifact(outcome)
    }

    /// Release the working directory of a run nothing refers to any more
    async fn discard_run(&self, _workdir: &Path) -> Result<()> {
        Ok(())
    }
}

/// Interpreter subprocess sandbox
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    interpreter: Vec<String>,
    script_suffix: String,
    runs_dir: PathBuf,
    max_output_bytes: usize,
    marker: MarkerPolicy,
}

impl SandboxExecutor {
    pub fn new(interpreter: Vec<String>, runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter,
            script_suffix: ".py".to_string(),
            runs_dir: runs_dir.into(),
            max_output_bytes: 64 * 1024,
            marker: MarkerPolicy::default(),
        }
    }

    pub fn from_config(config: &SandboxConfig, project_root: &Path) -> Self {
        Self::new(
            config.interpreter.clone(),
            project_root.join(&config.artifact_dir),
        )
        .with_script_suffix(&config.script_suffix)
        .with_max_output_bytes(config.max_output_bytes)
        .with_marker(config.marker.clone())
    }

    pub fn with_script_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.script_suffix = suffix.into();
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max.max(1);
        self
    }

    pub fn with_marker(mut self, marker: MarkerPolicy) -> Self {
        self.marker = marker;
        self
    }

    fn command(&self, script: &Path) -> Result<Command> {
        let (program, args) = self
            .interpreter
            .split_first()
            .ok_or_else(|| ScrapegenError::Sandbox("No interpreter configured".to_string()))?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(script);
        Ok(cmd)
    }

    /// Read the capture file, keeping the tail when it exceeds the cap
    fn read_capture(&self, capture: &mut std::fs::File) -> Result<String> {
        let len = capture.seek(SeekFrom::End(0))?;
        let cap = self.max_output_bytes as u64;
        let skipped = len.saturating_sub(cap);
        capture.seek(SeekFrom::Start(skipped))?;
        let mut bytes = Vec::new();
        capture.read_to_end(&mut bytes)?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if skipped > 0 {
            Ok(format!("[... {} bytes truncated ...]\n{}", skipped, text))
        } else {
            Ok(text)
        }
    }
}

#[async_trait]
impl CodeExecutor for SandboxExecutor {
    #[instrument(skip(self, code), fields(bytes = code.len()))]
    async fn run(&self, code: &str, timeout: Duration) -> Result<ExecutionOutcome> {
        let workdir = self.runs_dir.join(format!("run-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&workdir)?;
        let artifact_path = workdir.join(ARTIFACT_FILE);

        // Deleted when dropped, on every path out of this function
        let mut script = tempfile::Builder::new()
            .prefix("scrapegen-")
            .suffix(&self.script_suffix)
            .tempfile_in(&workdir)?;
        script.write_all(code.as_bytes())?;
        script.flush()?;
        let script_path = script.path().to_path_buf();

        // One file for both streams keeps their interleaving
        let mut capture = tempfile::tempfile()?;
        let stdout = capture.try_clone()?;
        let stderr = capture.try_clone()?;

        let mut cmd = self.command(&script_path)?;
        cmd.current_dir(&workdir)
            .env(OUTPUT_ENV_VAR, &artifact_path)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        debug!("Launching {:?} in {}", self.interpreter, workdir.display());
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            ScrapegenError::Sandbox(format!("Failed to launch {:?}: {}", self.interpreter, e))
        })?;

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (status?.code(), false),
            Err(_) => {
                warn!("Program exceeded {:?}; killing it", timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed-out program: {}", e);
                }
                (None, true)
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        drop(script);

        let raw = self.read_capture(&mut capture)?;
        let scan = scan_output(&raw, &self.marker);
        let artifact = artifact_path.is_file().then_some(artifact_path);

        let mut outcome = ExecutionOutcome {
            exit_code,
            combined_output: scan.output,
            timed_out,
            reported_failure: scan.failure,
            artifact,
            workdir,
            script_path,
            duration_ms,
            timeout_ms: timeout.as_millis() as u64,
        };

        if outcome.is_success() {
            info!("Program succeeded in {}ms", duration_ms);
        } else {
            info!(
                "Program failed (exit {:?}, timed out: {}, reported: {})",
                outcome.exit_code,
                outcome.timed_out,
                outcome.reported_failure.is_some()
            );
            // Everything a failed run left behind is already in combined_output
            outcome.artifact = None;
            if let Err(e) = self.discard_run(&outcome.workdir).await {
                warn!("Could not remove {}: {}", outcome.workdir.display(), e);
            }
        }
        Ok(outcome)
    }

    async fn discard_run(&self, workdir: &Path) -> Result<()> {
        if !workdir.starts_with(&self.runs_dir) {
            warn!("Not removing {} outside {}", workdir.display(), self.runs_dir.display());
            return Ok(());
        }
        match tokio::fs::remove_dir_all(workdir).await {
            Ok(()) => {
                debug!("Removed run directory {}", workdir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell_sandbox(dir: &TempDir) -> SandboxExecutor {
        SandboxExecutor::new(vec!["sh".to_string()], dir.path().join("runs"))
            .with_script_suffix(".sh")
    }

    #[tokio::test]
    async fn test_exit_zero_without_marker_is_success() {
        let dir = TempDir::new().unwrap();
        let outcome = shell_sandbox(&dir)
            .run("echo out\necho err 1>&2\n", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.combined_output.contains("out"));
        assert!(outcome.combined_output.contains("err"));
        assert!(!outcome.script_path.exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = TempDir::new().unwrap();
        let outcome = shell_sandbox(&dir)
            .run("echo 'Traceback: boom'\nexit 3\n", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!outcome.is_success());
        assert_eq!(outcome.exit_code, Some(3));
        let message = outcome.failure_message();
        assert!(message.starts_with("Program exited with code 3."));
        assert!(message.contains("Traceback: boom"));
        assert!(!outcome.workdir.exists());
    }

    #[tokio::test]
    async fn test_successful_run_keeps_workdir_until_discarded() {
        let dir = TempDir::new().unwrap();
        let sandbox = shell_sandbox(&dir);
        let outcome = sandbox
            .run("echo '[1]' > \"$SCRAPEGEN_OUTPUT\"\n", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert!(outcome.workdir.is_dir());

        sandbox.discard_run(&outcome.workdir).await.unwrap();
        assert!(!outcome.workdir.exists());
        // Already gone is fine
        sandbox.discard_run(&outcome.workdir).await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_ignores_foreign_paths() {
        let dir = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        shell_sandbox(&dir).discard_run(elsewhere.path()).await.unwrap();
        assert!(elsewhere.path().is_dir());
    }

    #[test]
    fn test_timeout_formatting() {
        assert_eq!(format_timeout(1000), "1s");
        assert_eq!(format_timeout(60_000), "60s");
        assert_eq!(format_timeout(1500), "1.5s");
        assert_eq!(format_timeout(250), "250ms");
    }

    #[tokio::test]
    async fn test_timeout_kills_and_removes_script() {
        let dir = TempDir::new().unwrap();
        let started = Instant::now();
        let outcome = shell_sandbox(&dir)
            .run("echo begin\nsleep 30\n", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.is_success());
        assert!(!outcome.script_path.exists());
        assert!(!outcome.workdir.exists());
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(outcome.failure_message().starts_with("Execution timed out after 1s."));
    }

    #[tokio::test]
    async fn test_status_line_failure_with_exit_zero() {
        let dir = TempDir::new().unwrap();
        let code = format!(
            "echo working\necho '{} {{\"status\":\"error\",\"message\":\"no rows\"}}'\nexit 0\n",
            crate::status::STATUS_PREFIX
        );
        let outcome = shell_sandbox(&dir)
            .run(&code, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.is_success());
        assert_eq!(outcome.reported_failure.as_deref(), Some("no rows"));
        assert!(!outcome.combined_output.contains("scrapegen-status"));
    }

    #[tokio::test]
    async fn test_legacy_substring_marker() {
        let dir = TempDir::new().unwrap();
        let sandbox = shell_sandbox(&dir).with_marker(MarkerPolicy::Substring("ERROR".to_string()));
        let outcome = sandbox
            .run("echo 'ERROR: caught'\n", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_artifact_written_through_env() {
        let dir = TempDir::new().unwrap();
        let sandbox = shell_sandbox(&dir);
        let outcome = sandbox
            .run(
                "echo '[{\"name\":\"a\",\"price\":1.5}]' > \"$SCRAPEGEN_OUTPUT\"\n",
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert!(outcome.artifact.is_some());
        let value = sandbox.load_output(&outcome).await.unwrap().unwrap();
        assert_eq!(value[0]["price"], 1.5);
    }

    #[tokio::test]
    async fn test_output_truncated_to_tail() {
        let dir = TempDir::new().unwrap();
        let sandbox = shell_sandbox(&dir).with_max_output_bytes(16);
        let outcome = sandbox
            .run("echo 0123456789abcdefghij\necho LAST\n", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(outcome.combined_output.starts_with("[... "));
        assert!(outcome.combined_output.contains("LAST"));
    }

    #[tokio::test]
    async fn test_sub_second_timeout_reported_in_ms() {
        let dir = TempDir::new().unwrap();
        let outcome = shell_sandbox(&dir)
            .run("sleep 30\n", Duration::from_millis(300))
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert!(outcome.failure_message().starts_with("Execution timed out after 300ms."));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_sandbox_error() {
        let dir = TempDir::new().unwrap();
        let sandbox = SandboxExecutor::new(
            vec!["scrapegen-no-such-interpreter".to_string()],
            dir.path(),
        );
        let err = sandbox.run("x", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ScrapegenError::Sandbox(_)));
    }
}
