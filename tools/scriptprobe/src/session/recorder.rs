use crate::errors::ProbeError;
use crate::protocol::{Command, Response, PROTOCOL_VERSION};
use crate::session::recording::{
    recordable_response, ExchangeRecord, RecordEntry, SessionEndRecord, SessionStartRecord,
};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Appends transcript entries to a JSONL file, one per exchange.
pub struct SessionRecorder {
    file: File,
    next_seq: u64,
}

impl SessionRecorder {
    /// Create (truncating) the transcript at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ProbeError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ProbeError::Io(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| ProbeError::Io(format!("{}: {e}", path.display())))?;
        Ok(Self { file, next_seq: 1 })
    }

    pub fn start(&mut self, target: &str, args: &[String]) -> Result<(), ProbeError> {
        self.emit(&RecordEntry::SessionStart(SessionStartRecord {
            protocol_version: PROTOCOL_VERSION,
            target: target.to_string(),
            args: args.to_vec(),
            timestamp_ns: timestamp_ns(),
        }))
    }

    pub fn exchange(
        &mut self,
        command: &Command,
        outcome: Result<&Response, &ProbeError>,
        duration_ns: u64,
    ) -> Result<(), ProbeError> {
        let (response, content_truncated, error) = match outcome {
            Ok(response) => {
                let (recorded, truncated) = recordable_response(response);
                (Some(recorded), truncated, None)
            }
            Err(err) => (None, false, Some(err.to_string())),
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.emit(&RecordEntry::Exchange(ExchangeRecord {
            seq,
            timestamp_ns: timestamp_ns(),
            duration_ns,
            command: command.clone(),
            response,
            content_truncated,
            error,
        }))
    }

    pub fn finish(&mut self, commands_sent: u64, responses_received: u64) -> Result<(), ProbeError> {
        self.emit(&RecordEntry::SessionEnd(SessionEndRecord {
            commands_sent,
            responses_received,
            timestamp_ns: timestamp_ns(),
        }))
    }

    fn emit(&mut self, entry: &RecordEntry) -> Result<(), ProbeError> {
        let line = serde_json::to_string(entry).map_err(|e| ProbeError::Io(e.to_string()))?;
        writeln!(self.file, "{line}").map_err(|e| ProbeError::Io(e.to_string()))?;
        self.file.flush().map_err(|e| ProbeError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::SessionRecorder;
    use crate::errors::ProbeError;
    use crate::protocol::{Command, Response};
    use crate::session::recording::{load_transcript, RecordEntry};

    #[test]
    fn recorder_writes_start_exchanges_and_end() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.jsonl");
        let mut recorder = SessionRecorder::create(&path).expect("create");
        recorder
            .start("/bin/editor", &["--script-mode".to_string()])
            .expect("start");
        recorder
            .exchange(
                &Command::Render,
                Ok(&Response::Screen {
                    width: 10,
                    height: 2,
                    content: "hi".to_string(),
                }),
                5,
            )
            .expect("exchange");
        recorder
            .exchange(
                &Command::GetBuffer,
                Err(&ProbeError::Protocol("stream closed".to_string())),
                9,
            )
            .expect("failed exchange");
        recorder.finish(2, 1).expect("finish");

        let entries = load_transcript(&path).expect("load");
        assert_eq!(entries.len(), 4);
        assert!(matches!(entries[0], RecordEntry::SessionStart(_)));
        let RecordEntry::Exchange(first) = &entries[1] else {
            panic!("expected exchange, got {:?}", entries[1]);
        };
        assert_eq!(first.seq, 1);
        assert_eq!(first.command, Command::Render);
        let RecordEntry::Exchange(second) = &entries[2] else {
            panic!("expected exchange, got {:?}", entries[2]);
        };
        assert_eq!(second.seq, 2);
        assert!(second.response.is_none());
        assert!(second
            .error
            .as_deref()
            .is_some_and(|e| e.contains("stream closed")));
        assert!(matches!(entries[3], RecordEntry::SessionEnd(_)));
    }

    #[test]
    fn create_makes_missing_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("runs/today/session.jsonl");
        let mut recorder = SessionRecorder::create(&path).expect("create");
        recorder.finish(0, 0).expect("finish");
        let entries = load_transcript(&path).expect("load");
        assert!(matches!(entries.as_slice(), [RecordEntry::SessionEnd(_)]));
    }
}
