//! Locating the data a run produced
//!
//! Lookup order:
//! 1. the file the program wrote at `$SCRAPEGEN_OUTPUT`
//! 2. a Crawlee dataset at `storage/datasets/default/*.json` in the run's working
//!    directory (`__metadata__.json` skipped); one item yields the item itself,
//!    several yield an array in file-name order
//! 3. the captured output, when it is a JSON document on its own

use crate::executor::ExecutionOutcome;
use scrapegen_core::{Result, ScrapegenError};
use serde_json::Value;
use std::path::{Path, PathBuf};

const DATASET_DIR: &str = "storage/datasets/default";
const DATASET_METADATA: &str = "__metadata__.json";

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        ScrapegenError::Sandbox(format!("Invalid JSON in {}: {}", path.display(), e))
    })
}

/// Read a Crawlee-style dataset directory; `None` when it has no items
pub fn load_dataset_dir(dir: &Path) -> Result<Option<Value>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension().and_then(|e| e.to_str()) == Some("json")
                && p.file_name().and_then(|n| n.to_str()) != Some(DATASET_METADATA)
        })
        .collect();
    files.sort();

    let mut items = files
        .iter()
        .map(|p| read_json(p))
        .collect::<Result<Vec<_>>>()?;
    Ok(match items.len() {
        0 => None,
        1 => items.pop(),
        _ => Some(Value::Array(items)),
    })
}

/// Load the structured output of a run, following the lookup order above
pub fn load_artifact(outcome: &ExecutionOutcome) -> Result<Option<Value>> {
    if let Some(path) = &outcome.artifact {
        if path.is_file() {
            return read_json(path).map(Some);
        }
    }

    if let Some(value) = load_dataset_dir(&outcome.workdir.join(DATASET_DIR))? {
        return Ok(Some(value));
    }

    let trimmed = outcome.combined_output.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn outcome_in(dir: &Path, output: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            exit_code: Some(0),
            combined_output: output.to_string(),
            timed_out: false,
            reported_failure: None,
            artifact: None,
            workdir: dir.to_path_buf(),
            script_path: dir.join("gone.py"),
            duration_ms: 1,
            timeout_ms: 60_000,
        }
    }

    #[test]
    fn test_dataset_single_item_is_unwrapped() {
        let dir = TempDir::new().unwrap();
        let dataset = dir.path().join(DATASET_DIR);
        std::fs::create_dir_all(&dataset).unwrap();
        std::fs::write(dataset.join("000000001.json"), r#"{"name":"a","price":1}"#).unwrap();
        std::fs::write(dataset.join(DATASET_METADATA), r#"{"id":"default"}"#).unwrap();

        let value = load_artifact(&outcome_in(dir.path(), "")).unwrap().unwrap();
        assert_eq!(value, json!({"name": "a", "price": 1}));
    }

    #[test]
    fn test_dataset_many_items_in_order() {
        let dir = TempDir::new().unwrap();
        let dataset = dir.path().join(DATASET_DIR);
        std::fs::create_dir_all(&dataset).unwrap();
        std::fs::write(dataset.join("000000002.json"), r#"{"n":2}"#).unwrap();
        std::fs::write(dataset.join("000000001.json"), r#"{"n":1}"#).unwrap();

        let value = load_artifact(&outcome_in(dir.path(), "")).unwrap().unwrap();
        assert_eq!(value, json!([{"n": 1}, {"n": 2}]));
    }

    #[test]
    fn test_artifact_file_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.json");
        std::fs::write(&path, r#"[1,2]"#).unwrap();
        let mut outcome = outcome_in(dir.path(), r#"{"ignored":true}"#);
        outcome.artifact = Some(path);
        assert_eq!(load_artifact(&outcome).unwrap(), Some(json!([1, 2])));
    }

    #[test]
    fn test_output_fallback_and_nothing() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            load_artifact(&outcome_in(dir.path(), " [{\"a\":1}]\n")).unwrap(),
            Some(json!([{"a": 1}]))
        );
        assert_eq!(
            load_artifact(&outcome_in(dir.path(), "scraped 2 rows")).unwrap(),
            None
        );
    }

    #[test]
    fn test_invalid_artifact_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.json");
        std::fs::write(&path, "not json").unwrap();
        let mut outcome = outcome_in(dir.path(), "");
        outcome.artifact = Some(path);
        assert!(load_artifact(&outcome).is_err());
    }
}
