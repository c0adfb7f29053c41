//! Serializable transcript entries. A transcript is a JSONL file where each
//! line is one `RecordEntry` object.

use crate::errors::ProbeError;
use crate::protocol::{Command, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;

const LARGE_CONTENT_THRESHOLD: usize = 64 * 1024; // 64 KB

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartRecord {
    pub protocol_version: u32,
    pub target: String,
    pub args: Vec<String>,
    pub timestamp_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub seq: u64,
    pub timestamp_ns: u64,
    pub duration_ns: u64,
    pub command: Command,
    /// `None` when the exchange failed before a response was decoded.
    pub response: Option<Response>,
    #[serde(default)]
    pub content_truncated: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEndRecord {
    pub commands_sent: u64,
    pub responses_received: u64,
    pub timestamp_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordEntry {
    SessionStart(SessionStartRecord),
    Exchange(ExchangeRecord),
    SessionEnd(SessionEndRecord),
}

/// Copy of `response` fit for the transcript. Screen or buffer content over
/// 64 KB is replaced by `<hash:sha256:XXXXXXXXXXXXXXXX>`.
pub fn recordable_response(response: &Response) -> (Response, bool) {
    match response {
        Response::Screen {
            width,
            height,
            content,
        } if content.len() > LARGE_CONTENT_THRESHOLD => (
            Response::Screen {
                width: *width,
                height: *height,
                content: content_digest(content),
            },
            true,
        ),
        Response::Buffer { content } if content.len() > LARGE_CONTENT_THRESHOLD => (
            Response::Buffer {
                content: content_digest(content),
            },
            true,
        ),
        other => (other.clone(), false),
    }
}

fn content_digest(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(content.as_bytes());
    // first 8 bytes, 16 hex chars
    let prefix = hash[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    format!("<hash:sha256:{prefix}>")
}

/// Parse a transcript file back into entries.
pub fn load_transcript(path: &Path) -> Result<Vec<RecordEntry>, ProbeError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ProbeError::Io(e.to_string()))?;
    let mut entries = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: RecordEntry = serde_json::from_str(line)
            .map_err(|e| ProbeError::Protocol(format!("transcript line {}: {e}", idx + 1)))?;
        entries.push(entry);
    }
    Ok(entries)
}
