//! Atomic record rewrites.
//!
//! Lock records are rewritten in place when their held flag changes. Other
//! processes read those files at any time, so a rewrite goes through a temp
//! file in the same directory, is synced, and is renamed over the target.
//! Readers see either the old record or the new one, never a torn write.

use crate::error::{LockError, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Atomically replace `path` with `content`.
pub(super) fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(path)?;

    if let Err(e) = write_and_sync(&temp_path, content) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        LockError::PersistenceFailure(format!(
            "failed to replace '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Temp file next to the target. The random suffix keeps concurrent writers
/// from different processes off each other's temp files.
fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            LockError::PersistenceFailure(format!("invalid record path '{}'", target.display()))
        })?;

    let suffix = Uuid::new_v4().simple().to_string();
    Ok(parent.join(format!(".{}.{}.tmp", filename, &suffix[..8])))
}

fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| {
        LockError::PersistenceFailure(format!(
            "failed to create temporary file '{}': {}",
            path.display(),
            e
        ))
    })?;

    file.write_all(content).map_err(|e| {
        LockError::PersistenceFailure(format!("failed to write temporary file: {}", e))
    })?;

    file.sync_all().map_err(|e| {
        LockError::PersistenceFailure(format!("failed to sync temporary file to disk: {}", e))
    })
}
