//! Saving run state and generated programs

use scrapegen_core::{GenerationState, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// File name used when none is given
pub const DEFAULT_CODE_FILE: &str = "extracted_data.py";

/// Write the state as pretty JSON, creating parent directories
pub async fn save_state(path: &Path, state: &GenerationState) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, serde_json::to_string_pretty(state)?).await?;
    info!("Saved run state to {}", path.display());
    Ok(())
}

pub async fn load_state(path: &Path) -> Result<GenerationState> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Where a program named `name` lands; `.py` is appended when missing
pub fn code_path(dir: &Path, name: Option<&str>) -> PathBuf {
    let name = name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(DEFAULT_CODE_FILE);
    if name.ends_with(".py") {
        dir.join(name)
    } else {
        dir.join(format!("{}.py", name))
    }
}

/// Save the program and return its path
pub async fn save_code(dir: &Path, name: Option<&str>, code: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let path = code_path(dir, name);
    fs::write(&path, code).await?;
    info!("Saved program to {}", path.display());
    Ok(path)
}
