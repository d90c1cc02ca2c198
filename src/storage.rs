//! Local history of successful generations.
//!
//! History is a small JSON array, most recent first, capped at [`HISTORY_LIMIT`].
//! A missing or unreadable file is treated as empty history.

use crate::model::GenerationResult;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const HISTORY_LIMIT: usize = 5;
const HISTORY_FILE: &str = "history.json";

/// Default history location: `<data_local_dir>/genstudio/history.json`.
pub fn default_history_path() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("no local data directory for this platform")?;
    Ok(base.join("genstudio").join(HISTORY_FILE))
}

/// Resolve an explicit override or fall back to the default location.
pub fn history_path(override_path: Option<&Path>) -> Result<PathBuf> {
    match override_path {
        Some(p) => Ok(p.to_path_buf()),
        None => default_history_path(),
    }
}

pub fn load_history(path: &Path) -> Vec<GenerationResult> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read history");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<GenerationResult>>(&raw) {
        Ok(mut entries) => {
            entries.truncate(HISTORY_LIMIT);
            entries
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt history file");
            Vec::new()
        }
    }
}

pub fn save_history(path: &Path, entries: &[GenerationResult]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let kept = &entries[..entries.len().min(HISTORY_LIMIT)];
    let json = serde_json::to_string_pretty(kept)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Put `result` at the front, drop any older copy with the same id, keep the newest entries.
pub fn push_recent(entries: &mut Vec<GenerationResult>, result: GenerationResult) {
    entries.retain(|e| e.id != result.id);
    entries.insert(0, result);
    entries.truncate(HISTORY_LIMIT);
}

/// Load, prepend `result`, save. Returns the updated history.
pub fn record_success(path: &Path, result: &GenerationResult) -> Result<Vec<GenerationResult>> {
    let mut entries = load_history(path);
    push_recent(&mut entries, result.clone());
    save_history(path, &entries)?;
    Ok(entries)
}

pub fn find_entry<'a>(entries: &'a [GenerationResult], id: &str) -> Option<&'a GenerationResult> {
    entries.iter().find(|e| e.id == id)
}

/// Export a single result as pretty JSON.
pub fn export_json(path: &Path, result: &GenerationResult) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(result)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
