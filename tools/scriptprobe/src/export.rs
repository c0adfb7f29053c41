use crate::channel::CommandChannel;
use crate::errors::ProbeError;
use crate::logging::log_event;
use crate::protocol::{Command, Response};
use crate::runtime::FileSystem;
use serde_json::json;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedTest {
    pub test_name: String,
    pub code: String,
    pub length: usize,
    pub session_commands: usize,
}

/// Ask the target to turn the session into a test named `test_name`.
///
/// The code is opaque. Only its shape and declared byte length are checked.
pub fn export(channel: &mut CommandChannel, test_name: &str) -> Result<ExportedTest, ProbeError> {
    let response = channel.request(Command::ExportTest {
        test_name: test_name.to_string(),
    })?;
    let (code, length) = match response {
        Response::TestCode { code, length } => (code, length),
        Response::Error { message } => {
            return Err(ProbeError::Protocol(format!(
                "export_test rejected by target: {message}"
            )))
        }
        other => {
            return Err(ProbeError::Protocol(format!(
                "export_test answered with `{}`",
                other.name()
            )))
        }
    };
    if length != code.len() {
        return Err(ProbeError::Protocol(format!(
            "exported test declares length {length} but carries {} bytes",
            code.len()
        )));
    }
    let session = channel.take_session();
    log_event(
        "info",
        "test_exported",
        json!({
            "test_name": test_name,
            "length": length,
            "session_commands": session.len(),
        }),
    );
    Ok(ExportedTest {
        test_name: test_name.to_string(),
        code,
        length,
        session_commands: session.len(),
    })
}

pub fn write_export(
    fs: &dyn FileSystem,
    path: &Path,
    exported: &ExportedTest,
) -> Result<(), ProbeError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs.create_dir_all(parent)?;
    }
    fs.write_string(path, &exported.code)
}

#[cfg(test)]
mod tests {
    use super::{export, write_export};
    use crate::channel::{response_line, CommandChannel, FakeTransport};
    use crate::protocol::{Command, Response};
    use crate::runtime::FakeFileSystem;
    use std::path::Path;
    use std::time::Duration;

    fn channel_answering(response: Response) -> CommandChannel {
        let ready = Response::Ok {
            message: "ready".to_string(),
        };
        let mut ch = CommandChannel::new(
            Box::new(FakeTransport::with_responder(&ready, move |command| {
                match command {
                    Command::ExportTest { .. } => vec![response_line(&response)],
                    _ => vec![response_line(&Response::Ok {
                        message: String::new(),
                    })],
                }
            })),
            Duration::from_secs(1),
        );
        ch.read_ready().expect("ready");
        ch
    }

    #[test]
    fn export_checks_declared_byte_length() {
        let code = "#[test]\nfn t() { /* ü */ }\n".to_string();
        let mut ch = channel_answering(Response::TestCode {
            length: code.len(),
            code: code.clone(),
        });
        ch.request(Command::key("Down")).expect("key");
        let exported = export(&mut ch, "test_lsp_integration").expect("export");
        assert_eq!(exported.code, code);
        assert_eq!(exported.session_commands, 2);
        assert!(ch.session().is_empty());
    }

    #[test]
    fn length_mismatch_is_a_protocol_error() {
        let mut ch = channel_answering(Response::TestCode {
            code: "fn t() {}".to_string(),
            length: 3,
        });
        let err = export(&mut ch, "t").expect_err("mismatch");
        assert!(format!("{err}").starts_with("protocol error"));
    }

    #[test]
    fn wrong_shape_is_a_protocol_error() {
        let mut ch = channel_answering(Response::Buffer {
            content: "nope".to_string(),
        });
        let err = export(&mut ch, "t").expect_err("shape");
        assert!(format!("{err}").contains("answered with `buffer`"));
    }

    #[test]
    fn write_export_creates_parent_dirs() {
        let fs = FakeFileSystem::default();
        let exported = super::ExportedTest {
            test_name: "t".to_string(),
            code: "fn t() {}".to_string(),
            length: 9,
            session_commands: 1,
        };
        write_export(&fs, Path::new("/out/tests/t.rs"), &exported).expect("write");
        assert_eq!(fs.file(Path::new("/out/tests/t.rs")).as_deref(), Some("fn t() {}"));
        assert!(fs.dirs().contains(&Path::new("/out/tests").to_path_buf()));
    }
}
