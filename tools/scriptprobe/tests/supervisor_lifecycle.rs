#![cfg(unix)]

use scriptprobe::errors::ProbeError;
use scriptprobe::protocol::{Command, Response};
use scriptprobe::session::recorder::SessionRecorder;
use scriptprobe::session::recording::{load_transcript, RecordEntry};
use scriptprobe::supervisor::{with_target, LaunchSpec, SupervisorSettings};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const READY: &str = r#"printf '%s\n' '{"type":"ok","message":"ready"}'"#;

fn write_exec(path: &Path, contents: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, contents).expect("write script");
    let mut perms = std::fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("chmod");
}

fn target(dir: &TempDir, body: &str) -> LaunchSpec {
    let executable: PathBuf = dir.path().join("target.sh");
    write_exec(&executable, &format!("#!/bin/sh\n{body}\n"));
    LaunchSpec {
        executable,
        args: vec!["doc.rs".to_string()],
        working_dir: dir.path().to_path_buf(),
        env: vec![("PROBE_MARKER".to_string(), "set".to_string())],
    }
}

fn settings(quit_grace_ms: u64) -> SupervisorSettings {
    SupervisorSettings {
        response_timeout: Duration::from_secs(5),
        quit_grace: Duration::from_millis(quit_grace_ms),
    }
}

#[test]
fn cooperative_target_exits_on_quit() {
    let dir = TempDir::new().expect("tempdir");
    let spec = target(
        &dir,
        &format!(
            "{READY}\nwhile IFS= read -r line; do\n  case \"$line\" in\n    *quit*) printf '%s\\n' '{{\"type\":\"ok\",\"message\":\"bye\"}}'; exit 0 ;;\n    *) printf '%s\\n' '{{\"type\":\"screen\",\"width\":80,\"height\":24,\"content\":\"'\"$PROBE_MARKER\"'\"}}' ;;\n  esac\ndone"
        ),
    );
    let run = with_target(&spec, &settings(2_000), None, |channel, ready| {
        assert_eq!(ready, "ready");
        let first = channel.request(Command::Render)?;
        let second = channel.request(Command::Render)?;
        Ok((first, second))
    })
    .expect("launch");

    let (first, _) = run.outcome.expect("body");
    assert_eq!(
        first,
        Response::Screen {
            width: 80,
            height: 24,
            content: "set".to_string()
        }
    );
    assert!(run.termination.quit_acknowledged);
    assert!(!run.termination.forced);
    assert_eq!(run.termination.exit_code, Some(0));
    assert_eq!(run.commands_sent, 3);
    assert_eq!(run.commands_sent, run.responses_received);
}

#[test]
fn target_ignoring_quit_is_killed_after_grace() {
    let dir = TempDir::new().expect("tempdir");
    let spec = target(&dir, &format!("{READY}\nread -r line\nexec sleep 30"));
    let started = Instant::now();
    let run = with_target(&spec, &settings(300), None, |_, _| Ok(())).expect("launch");

    assert!(run.outcome.is_ok());
    assert!(run.termination.forced);
    assert!(!run.termination.quit_acknowledged);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn early_exit_is_fatal_and_keeps_stderr() {
    let dir = TempDir::new().expect("tempdir");
    let spec = target(&dir, "echo 'cannot open terminal' >&2\nexit 3");
    let run = with_target(&spec, &settings(500), None, |_, _| Ok(())).expect("launch");

    let err = run.outcome.expect_err("no readiness");
    assert!(matches!(err, ProbeError::Process(_)), "{err}");
    assert!(err.to_string().contains("exited unexpectedly"), "{err}");
    assert!(run.ready_message.is_none());
    assert!(run.termination.stderr.contains("cannot open terminal"));
    assert_eq!(run.termination.exit_code, Some(3));
    assert!(!run.termination.forced);
}

#[test]
fn background_child_holding_pipes_dies_with_the_target() {
    let dir = TempDir::new().expect("tempdir");
    let spec = target(&dir, &format!("{READY}\nsleep 30 &\nread -r line\nexec sleep 30"));
    let started = Instant::now();
    let run = with_target(&spec, &settings(300), None, |_, _| Ok(())).expect("launch");

    assert!(run.termination.forced);
    assert!(run.termination.undrained.is_empty(), "{:?}", run.termination.undrained);
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
}

#[test]
fn straggler_left_after_clean_exit_is_reaped() {
    let dir = TempDir::new().expect("tempdir");
    let spec = target(&dir, &format!("{READY}\nsleep 30 &\nread -r line\nexit 0"));
    let started = Instant::now();
    let run = with_target(&spec, &settings(300), None, |_, _| Ok(())).expect("launch");

    assert!(!run.termination.forced);
    assert_eq!(run.termination.exit_code, Some(0));
    assert!(run.termination.undrained.is_empty(), "{:?}", run.termination.undrained);
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
}

#[cfg(target_os = "linux")]
#[test]
fn pipes_held_by_another_session_are_reported_not_awaited() {
    if !Path::new("/usr/bin/setsid").exists() && !Path::new("/bin/setsid").exists() {
        return;
    }
    let dir = TempDir::new().expect("tempdir");
    let spec = target(&dir, &format!("{READY}\nsetsid sleep 30 &\nread -r line\nexit 0"));
    let started = Instant::now();
    let run = with_target(&spec, &settings(300), None, |_, _| Ok(())).expect("launch");

    assert!(!run.termination.forced);
    assert_eq!(
        run.termination.undrained,
        vec!["stdout".to_string(), "stderr".to_string()]
    );
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
}

#[test]
fn output_after_quit_is_drained() {
    let dir = TempDir::new().expect("tempdir");
    let spec = target(
        &dir,
        &format!(
            "{READY}\nread -r line\nprintf '%s\\n' '{{\"type\":\"ok\",\"message\":\"bye\"}}'\necho 'late line'\nexit 0"
        ),
    );
    let run = with_target(&spec, &settings(2_000), None, |_, _| Ok(())).expect("launch");
    assert!(run.termination.quit_acknowledged);
    assert_eq!(run.termination.trailing_stdout, vec!["late line".to_string()]);
}

#[test]
fn missing_executable_never_spawns() {
    let dir = TempDir::new().expect("tempdir");
    let spec = LaunchSpec {
        executable: dir.path().join("absent"),
        args: Vec::new(),
        working_dir: dir.path().to_path_buf(),
        env: Vec::new(),
    };
    let err = with_target(&spec, &settings(100), None, |_, _| Ok(()))
        .err()
        .expect("launch failure");
    assert!(matches!(err, ProbeError::Launch(_)));
}

#[test]
fn transcript_records_every_exchange() {
    let dir = TempDir::new().expect("tempdir");
    let spec = target(
        &dir,
        &format!(
            "{READY}\nwhile IFS= read -r line; do\n  case \"$line\" in\n    *quit*) exit 0 ;;\n    *) printf '%s\\n' '{{\"type\":\"ok\",\"message\":\"\"}}' ;;\n  esac\ndone"
        ),
    );
    let path = dir.path().join("transcript.jsonl");
    let recorder = SessionRecorder::create(&path).expect("recorder");
    let run = with_target(&spec, &settings(2_000), Some(recorder), |channel, _| {
        channel.request(Command::key("Down"))?;
        channel.request(Command::type_text("abc"))?;
        Ok(())
    })
    .expect("launch");
    run.outcome.expect("body");

    let entries = load_transcript(&path).expect("load");
    assert!(matches!(entries.first(), Some(RecordEntry::SessionStart(_))));
    let exchanges = entries
        .iter()
        .filter(|entry| matches!(entry, RecordEntry::Exchange(_)))
        .count();
    assert_eq!(exchanges, 2);
    match entries.last() {
        Some(RecordEntry::SessionEnd(end)) => {
            assert_eq!(end.commands_sent, 3);
            assert_eq!(end.responses_received, 2);
        }
        other => panic!("expected session_end, got {other:?}"),
    }
}
