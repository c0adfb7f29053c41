use crate::errors::ProbeError;
use std::fs;
use std::path::{Path, PathBuf};

/// Deletes the oldest `*.{extension}` files in `dir` until their combined
/// size fits `budget_bytes`. The active log `keep` is never deleted.
pub fn enforce_total_budget(
    dir: &Path,
    extension: &str,
    keep: &Path,
    budget_bytes: u64,
) -> Result<Vec<PathBuf>, ProbeError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| ProbeError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(extension))
        .collect::<Vec<_>>();

    files.sort_by_key(|path| fs::metadata(path).ok().and_then(|m| m.modified().ok()));

    let mut total = files
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();

    let mut deleted = Vec::new();
    for path in files.into_iter().filter(|path| path != keep) {
        if total <= budget_bytes {
            break;
        }
        let len = fs::metadata(&path)
            .map_err(|e| ProbeError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| ProbeError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}
