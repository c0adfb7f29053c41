use crate::channel::{CommandChannel, LineTransport};
use crate::errors::ProbeError;
use crate::logging::log_event;
use crate::session::recorder::SessionRecorder;
use serde_json::json;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const EXIT_SETTLE_POLLS: u32 = 10;
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn for_editor(
        executable: &Path,
        document: &Path,
        width: u16,
        height: u16,
        working_dir: &Path,
        env: Vec<(String, String)>,
    ) -> Self {
        Self {
            executable: executable.to_path_buf(),
            args: vec![
                "--script-mode".to_string(),
                "--script-width".to_string(),
                width.to_string(),
                "--script-height".to_string(),
                height.to_string(),
                document.display().to_string(),
            ],
            working_dir: working_dir.to_path_buf(),
            env,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub response_timeout: Duration,
    pub quit_grace: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationReport {
    pub exit_code: Option<i32>,
    pub quit_acknowledged: bool,
    pub forced: bool,
    pub stderr: String,
    pub trailing_stdout: Vec<String>,
    /// Streams whose pipe was still held open by a leftover process when
    /// teardown gave up waiting on it.
    pub undrained: Vec<String>,
}

pub struct TargetProcess {
    transport: ChildTransport,
    guard: ProcessGuard,
}

impl TargetProcess {
    pub fn split(self) -> (ChildTransport, ProcessGuard) {
        (self.transport, self.guard)
    }
}

pub fn launch(spec: &LaunchSpec) -> Result<TargetProcess, ProbeError> {
    if !spec.executable.is_file() {
        return Err(ProbeError::Launch(format!(
            "executable not found at {}",
            spec.executable.display()
        )));
    }
    let mut command = std::process::Command::new(&spec.executable);
    command
        .args(&spec.args)
        .current_dir(&spec.working_dir)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group so teardown can reach the language server and any
    // other descendants that inherited the pipes.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let mut child = command
        .spawn()
        .map_err(|e| ProbeError::Launch(format!("{}: {e}", spec.executable.display())))?;

    let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
        (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
        _ => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProbeError::Launch("child stdio was not captured".to_string()));
        }
    };

    let (done_tx, drains_done) = mpsc::channel();
    let (tx, rx) = mpsc::channel();
    let stdout_done = done_tx.clone();
    let stdout_thread = std::thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let failed = line.is_err();
            if tx.send(line.map_err(|e| e.to_string())).is_err() || failed {
                break;
            }
        }
        let _ = stdout_done.send(Stream::Stdout);
    });

    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&stderr_buf);
    let stderr_thread = std::thread::spawn(move || {
        let mut stderr = stderr;
        let mut chunk = [0u8; 4096];
        loop {
            match stderr.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
            }
        }
        let _ = done_tx.send(Stream::Stderr);
    });

    log_event(
        "info",
        "target_launched",
        json!({
            "pid": child.id(),
            "executable": spec.executable.display().to_string(),
            "args": spec.args,
            "cwd": spec.working_dir.display().to_string(),
        }),
    );

    Ok(TargetProcess {
        transport: ChildTransport {
            stdin: Some(stdin),
            lines: rx,
        },
        guard: ProcessGuard {
            child,
            stdout_thread: Some(stdout_thread),
            stderr_thread: Some(stderr_thread),
            stderr: stderr_buf,
            drains_done,
            terminated: false,
        },
    })
}

pub struct ChildTransport {
    stdin: Option<ChildStdin>,
    lines: Receiver<Result<String, String>>,
}

impl LineTransport for ChildTransport {
    fn write_line(&mut self, line: &str) -> Result<(), ProbeError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ProbeError::Process("target stdin already closed".to_string()))?;
        let mut message = String::with_capacity(line.len() + 1);
        message.push_str(line);
        message.push('\n');
        stdin
            .write_all(message.as_bytes())
            .and_then(|()| stdin.flush())
            .map_err(|e| ProbeError::Process(format!("write to target failed: {e}")))
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, ProbeError> {
        match self.lines.recv_timeout(timeout) {
            Ok(Ok(line)) => Ok(Some(line)),
            Ok(Err(err)) => Err(ProbeError::Process(format!("read from target failed: {err}"))),
            Err(RecvTimeoutError::Timeout) => Err(ProbeError::Protocol(format!(
                "no complete message from target within {}ms",
                timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn close(&mut self) {
        self.stdin = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Owns the child and its drain threads. Dropping an unterminated guard
/// kills the child's process group.
pub struct ProcessGuard {
    child: Child,
    stdout_thread: Option<JoinHandle<()>>,
    stderr_thread: Option<JoinHandle<()>>,
    stderr: Arc<Mutex<Vec<u8>>>,
    drains_done: Receiver<Stream>,
    terminated: bool,
}

impl ProcessGuard {
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub fn stderr_snapshot(&self) -> String {
        String::from_utf8_lossy(&self.stderr.lock().unwrap_or_else(PoisonError::into_inner))
            .to_string()
    }

    /// Rewrites a channel failure as a process error when the cause is that
    /// the child has already exited.
    pub fn explain(&mut self, error: ProbeError) -> ProbeError {
        let detail = match error {
            ProbeError::Protocol(detail) => detail,
            other => return other,
        };
        // Stdout can reach end of stream a moment before the exit is
        // observable, so give the child a short window to be reaped.
        for _ in 0..EXIT_SETTLE_POLLS {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    return ProbeError::Process(format!(
                        "target exited unexpectedly ({status}): {detail}"
                    ));
                }
                Ok(None) => std::thread::sleep(EXIT_POLL_INTERVAL),
                Err(_) => break,
            }
        }
        ProbeError::Protocol(detail)
    }

    pub fn terminate(mut self, channel: &mut CommandChannel, grace: Duration) -> TerminationReport {
        let deadline = Instant::now() + grace;
        let mut quit_acknowledged = false;
        if channel.is_usable() && self.is_running() {
            match channel.quit(grace) {
                Ok(_) => quit_acknowledged = true,
                Err(err) => log_event("warn", "quit_failed", json!({ "error": err.to_string() })),
            }
        }
        channel.close();

        let mut exit_code = self.wait_until(deadline);
        let forced = exit_code.is_none();
        if forced {
            log_event("warn", "target_killed", json!({ "pid": self.child.id() }));
            self.kill_group();
            let _ = self.child.kill();
            exit_code = self.child.wait().ok().map(|status| status.code().unwrap_or(-1));
        } else {
            // The editor is gone; anything left in its group is a straggler.
            self.kill_group();
        }
        let undrained = self.join_drains(DRAIN_GRACE);
        if !undrained.is_empty() {
            log_event("warn", "pipes_held_open", json!({ "streams": undrained }));
        }
        let trailing_stdout = drain_channel(channel);
        self.terminated = true;

        let report = TerminationReport {
            exit_code,
            quit_acknowledged,
            forced,
            stderr: self.stderr_snapshot(),
            trailing_stdout,
            undrained,
        };
        log_event(
            "info",
            "target_terminated",
            json!({
                "exit_code": report.exit_code,
                "forced": report.forced,
                "quit_acknowledged": report.quit_acknowledged,
                "stderr_bytes": report.stderr.len(),
            }),
        );
        report
    }

    fn wait_until(&mut self, deadline: Instant) -> Option<i32> {
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Some(status.code().unwrap_or(-1)),
                Ok(None) if Instant::now() < deadline => std::thread::sleep(EXIT_POLL_INTERVAL),
                _ => return None,
            }
        }
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let Ok(pgid) = i32::try_from(self.child.id()) else {
            return;
        };
        // ESRCH just means the group is already empty.
        let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}

    /// Joins the drain threads that finish within `grace`. Threads whose
    /// pipe is still held open are left detached and named in the result.
    fn join_drains(&mut self, grace: Duration) -> Vec<String> {
        let deadline = Instant::now() + grace;
        let mut pending = Vec::new();
        if self.stdout_thread.is_some() {
            pending.push(Stream::Stdout);
        }
        if self.stderr_thread.is_some() {
            pending.push(Stream::Stderr);
        }
        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.drains_done.recv_timeout(remaining) {
                Ok(stream) => pending.retain(|p| *p != stream),
                Err(_) => break,
            }
        }
        for (stream, slot) in [
            (Stream::Stdout, &mut self.stdout_thread),
            (Stream::Stderr, &mut self.stderr_thread),
        ] {
            if let Some(handle) = slot.take() {
                if !pending.contains(&stream) {
                    let _ = handle.join();
                }
            }
        }
        pending.iter().map(|s| s.as_str().to_string()).collect()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        self.kill_group();
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = self.join_drains(DRAIN_GRACE);
        self.terminated = true;
    }
}

fn drain_channel(channel: &mut CommandChannel) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(Some(line)) = channel.read_stray_line() {
        lines.push(line);
    }
    lines
}

pub struct TargetRun<T> {
    pub ready_message: Option<String>,
    pub outcome: Result<T, ProbeError>,
    pub termination: TerminationReport,
    pub commands_sent: u64,
    pub responses_received: u64,
}

/// Launch the target, read its readiness message, run `body`, and always
/// terminate the child before returning. Only a launch failure returns
/// `Err`; everything after is reported inside [`TargetRun`].
pub fn with_target<T>(
    spec: &LaunchSpec,
    settings: &SupervisorSettings,
    recorder: Option<SessionRecorder>,
    body: impl FnOnce(&mut CommandChannel, &str) -> Result<T, ProbeError>,
) -> Result<TargetRun<T>, ProbeError> {
    let (transport, mut guard) = launch(spec)?.split();
    let mut channel = CommandChannel::new(Box::new(transport), settings.response_timeout);
    if let Some(mut recorder) = recorder {
        let _ = recorder.start(&spec.executable.display().to_string(), &spec.args);
        channel = channel.with_recorder(recorder);
    }

    let mut ready_message = None;
    let outcome = match channel.read_ready() {
        Ok(message) => {
            ready_message = Some(message.clone());
            body(&mut channel, &message)
        }
        Err(err) => Err(err),
    }
    .map_err(|err| guard.explain(err));

    let termination = guard.terminate(&mut channel, settings.quit_grace);
    Ok(TargetRun {
        ready_message,
        outcome,
        termination,
        commands_sent: channel.sent(),
        responses_received: channel.received(),
    })
}
