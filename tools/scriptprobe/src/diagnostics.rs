use crate::runtime::FileSystem;
use crate::screen_checks::head_chars;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTail {
    Missing(PathBuf),
    Empty(PathBuf),
    Lines {
        path: PathBuf,
        total: usize,
        shown: Vec<String>,
    },
}

impl LogTail {
    pub fn render(&self) -> Vec<String> {
        match self {
            Self::Missing(path) => vec![format!("log file not found at {}", path.display())],
            Self::Empty(_) => vec!["  (empty log file)".to_string()],
            Self::Lines { total, shown, .. } => {
                let mut out = Vec::with_capacity(shown.len() + 1);
                if *total > shown.len() {
                    out.push(format!("(showing last {} of {total} lines)", shown.len()));
                }
                out.extend(shown.iter().map(|line| format!("  {line}")));
                out
            }
        }
    }
}

/// Last `max_lines` lines of the log at `path`, ignoring surrounding blank space.
pub fn read_log_tail(fs: &dyn FileSystem, path: &Path, max_lines: usize) -> LogTail {
    if !fs.exists(path) {
        return LogTail::Missing(path.to_path_buf());
    }
    let contents = match fs.read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return LogTail::Missing(path.to_path_buf()),
    };
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return LogTail::Empty(path.to_path_buf());
    }
    let lines = trimmed.lines().collect::<Vec<_>>();
    let skip = lines.len().saturating_sub(max_lines);
    LogTail::Lines {
        path: path.to_path_buf(),
        total: lines.len(),
        shown: lines[skip..].iter().map(|line| line.to_string()).collect(),
    }
}

pub fn stderr_excerpt(stderr: &str, max_chars: usize) -> Option<String> {
    if stderr.trim().is_empty() {
        return None;
    }
    Some(head_chars(stderr, max_chars).to_string())
}
