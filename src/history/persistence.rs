//! On-disk history document
//!
//! The whole document is rewritten on every mutation. Writes go to a sibling
//! temp file that is then renamed over the target, so readers never observe a
//! half-written document.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::constants::paths;
use crate::types::HistoryData;

/// Per-user history file location
pub fn default_path() -> PathBuf {
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(paths::APP_DIR);
    path.push(paths::HISTORY_FILENAME);
    path
}

/// Load the history document; any failure yields an empty history
pub fn load(path: &Path) -> HistoryData {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No history file found, starting empty");
            return HistoryData::default();
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to read history file, starting empty");
            return HistoryData::default();
        }
    };

    match serde_json::from_str::<HistoryData>(&contents) {
        Ok(data) => {
            info!(
                path = %path.display(),
                items = data.items.len(),
                groups = data.groups.len(),
                "Loaded clipboard history"
            );
            data
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Malformed history file, starting empty");
            HistoryData::default()
        }
    }
}

/// Overwrite the history document atomically
pub fn save(path: &Path, data: &HistoryData) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .context(format!("Failed to create data directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(data).context("Failed to serialize history to JSON")?;

    let tmp = temp_path(path);
    fs::write(&tmp, json).context(format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).context(format!(
        "Failed to move {} over {}",
        tmp.display(),
        path.display()
    ))?;

    debug!(path = %path.display(), items = data.items.len(), "Saved clipboard history");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| paths::HISTORY_FILENAME.into());
    name.push(".tmp");
    path.with_file_name(name)
}
