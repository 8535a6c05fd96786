//! Scripted executor for tests

use crate::executor::{CodeExecutor, ExecutionOutcome};
use async_trait::async_trait;
use scrapegen_core::Result;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct ScriptedRun {
    outcome: ExecutionOutcome,
    data: Option<Value>,
}

#[derive(Debug, Default)]
struct Script {
    runs: VecDeque<ScriptedRun>,
    executed: Vec<String>,
    discarded: Vec<PathBuf>,
    last_data: Option<Value>,
}

/// Executor answering from a queue of outcomes; the last one repeats
///
/// `load_output` returns the data scripted for the most recent run. Clones share
/// the queue and the record of executed programs.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    script: Arc<Mutex<Script>>,
}

fn outcome(exit_code: Option<i32>, output: &str, timed_out: bool) -> ExecutionOutcome {
    ExecutionOutcome {
        exit_code,
        combined_output: output.to_string(),
        timed_out,
        reported_failure: None,
        artifact: None,
        workdir: PathBuf::from("/mock/run-0"),
        script_path: PathBuf::from("/mock/run-0/script.py"),
        duration_ms: 0,
        timeout_ms: 0,
    }
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(self, outcome: ExecutionOutcome, data: Option<Value>) -> Self {
        self.lock().runs.push_back(ScriptedRun { outcome, data });
        self
    }

    /// Queue a successful run producing `data`
    pub fn then_success(self, output: &str, data: Option<Value>) -> Self {
        self.push(outcome(Some(0), output, false), data)
    }

    /// Queue a run exiting with `code`
    pub fn then_failure(self, code: i32, output: &str) -> Self {
        self.push(outcome(Some(code), output, false), None)
    }

    /// Queue a timed-out run
    pub fn then_timeout(self) -> Self {
        self.push(outcome(None, "", true), None)
    }

    /// Queue an exit-0 run that reported its own failure in-band
    pub fn then_reported_failure(self, message: &str) -> Self {
        let mut run = outcome(Some(0), "", false);
        run.reported_failure = Some(message.to_string());
        self.push(run, None)
    }

    /// Programs run so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn run_count(&self) -> usize {
        self.lock().executed.len()
    }

    /// Run directories released so far, in order
    pub fn discarded(&self) -> Vec<PathBuf> {
        self.lock().discarded.clone()
    }

    fn next_run(&self, code: &str) -> Option<ScriptedRun> {
        let mut script = self.lock();
        script.executed.push(code.to_string());
        let run = if script.runs.len() > 1 {
            script.runs.pop_front()
        } else {
            script.runs.front().cloned()
        };
        script.last_data = run.as_ref().and_then(|r| r.data.clone());
        run
    }
}

#[async_trait]
impl CodeExecutor for MockExecutor {
    async fn run(&self, code: &str, timeout: Duration) -> Result<ExecutionOutcome> {
        let mut run = match self.next_run(code) {
            Some(run) => run.outcome,
            None => outcome(Some(0), "", false),
        };
        // Numbered like the real sandbox's per-run directories
        let n = self.run_count();
        run.workdir = PathBuf::from(format!("/mock/run-{}", n));
        run.script_path = run.workdir.join("script.py");
        run.timeout_ms = timeout.as_millis() as u64;
        Ok(run)
    }

    async fn load_output(&self, _outcome: &ExecutionOutcome) -> Result<Option<Value>> {
        Ok(self.lock().last_data.clone())
    }

    async fn discard_run(&self, workdir: &Path) -> Result<()> {
        self.lock().discarded.push(workdir.to_path_buf());
        Ok(())
    }
}
