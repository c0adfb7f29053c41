use crate::errors::ProbeError;
use crate::logging::log_event;
use crate::protocol::{decode_response, encode_command, Command, Response};
use crate::session::recorder::SessionRecorder;
use crate::session::Session;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Slack on top of a `wait_for`'s own `timeout + poll_interval` bound for
/// the reply to cross the pipe.
const WAIT_FOR_TRANSPORT_MARGIN: Duration = Duration::from_secs(1);

pub trait LineTransport: Send {
    fn write_line(&mut self, line: &str) -> Result<(), ProbeError>;
    /// Next line without its terminator, `Ok(None)` once the stream has ended.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, ProbeError>;
    fn close(&mut self) {}
}

/// Strict request/response channel over a [`LineTransport`].
///
/// At most one command is outstanding. Every command sent is appended to the
/// [`Session`] and, when a recorder is attached, to the transcript.
pub struct CommandChannel {
    transport: Box<dyn LineTransport>,
    response_timeout: Duration,
    outstanding: Option<(Command, Instant)>,
    ready: bool,
    sent: u64,
    received: u64,
    session: Session,
    recorder: Option<SessionRecorder>,
    failure: Option<String>,
}

impl CommandChannel {
    pub fn new(transport: Box<dyn LineTransport>, response_timeout: Duration) -> Self {
        Self {
            transport,
            response_timeout,
            outstanding: None,
            ready: false,
            sent: 0,
            received: 0,
            session: Session::default(),
            recorder: None,
            failure: None,
        }
    }

    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn take_session(&mut self) -> Session {
        std::mem::take(&mut self.session)
    }

    pub fn is_usable(&self) -> bool {
        self.failure.is_none()
    }

    /// Read the unsolicited readiness notification the target emits before
    /// accepting commands.
    pub fn read_ready(&mut self) -> Result<String, ProbeError> {
        if self.ready || self.sent > 0 {
            return Err(ProbeError::Protocol(
                "readiness message must be read before the first command".to_string(),
            ));
        }
        let deadline = Instant::now() + self.response_timeout;
        let response = self
            .next_line(deadline, "readiness message")
            .and_then(|line| decode_response(&line))
            .map_err(|e| self.fail(e))?;
        match response {
            Response::Ok { message } => {
                self.ready = true;
                log_event("info", "target_ready", json!({ "message": message }));
                Ok(message)
            }
            Response::Error { message } => Err(self.fail(ProbeError::Process(format!(
                "target reported a startup error: {message}"
            )))),
            other => Err(self.fail(ProbeError::Protocol(format!(
                "expected readiness `ok` message, got `{}`",
                other.name()
            )))),
        }
    }

    pub fn send(&mut self, command: &Command) -> Result<(), ProbeError> {
        if let Some(reason) = &self.failure {
            return Err(ProbeError::Protocol(format!(
                "channel unusable after earlier failure: {reason}"
            )));
        }
        if let Some((pending, _)) = &self.outstanding {
            return Err(ProbeError::Protocol(format!(
                "`{}` sent while the response to `{}` is outstanding",
                command.name(),
                pending.name()
            )));
        }
        let line = encode_command(command)?;
        self.transport
            .write_line(&line)
            .map_err(|e| self.fail(e))?;
        self.sent += 1;
        self.session.record(command.clone());
        self.outstanding = Some((command.clone(), Instant::now()));
        log_event("debug", "command_sent", json!({ "seq": self.sent, "command": command }));
        Ok(())
    }

    pub fn receive(&mut self) -> Result<Response, ProbeError> {
        let Some((command, sent_at)) = self.outstanding.clone() else {
            return Err(ProbeError::Protocol(
                "receive called with no outstanding command".to_string(),
            ));
        };
        let deadline = sent_at + self.response_budget(&command);
        let outcome = self
            .next_line(deadline, command.name())
            .and_then(|line| decode_response(&line));
        let elapsed_ns = sent_at.elapsed().as_nanos() as u64;
        if let Some(recorder) = self.recorder.as_mut() {
            let _ = recorder.exchange(&command, outcome.as_ref(), elapsed_ns);
        }
        let response = outcome.map_err(|e| self.fail(e))?;
        self.outstanding = None;
        self.received += 1;
        if !command.accepts(&response) {
            log_event(
                "warn",
                "unexpected_response_shape",
                json!({ "command": command.name(), "response": response.name() }),
            );
        }
        log_event(
            "debug",
            "response_received",
            json!({ "seq": self.received, "response": response.name() }),
        );
        Ok(response)
    }

    pub fn request(&mut self, command: Command) -> Result<Response, ProbeError> {
        self.send(&command)?;
        self.receive()
    }

    /// Ask the target to quit. The target may answer or simply close its
    /// output; both count as acknowledged.
    pub fn quit(&mut self, grace: Duration) -> Result<Option<Response>, ProbeError> {
        self.send(&Command::Quit)?;
        let deadline = Instant::now() + grace;
        let outcome = match self.read_line_until(deadline) {
            Ok(Some(line)) => decode_response(&line).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        };
        self.outstanding = None;
        if let Ok(Some(_)) = &outcome {
            self.received += 1;
        }
        if let Some(recorder) = self.recorder.as_mut() {
            match &outcome {
                Ok(Some(response)) => {
                    let _ = recorder.exchange(&Command::Quit, Ok(response), 0);
                }
                Ok(None) => {}
                Err(err) => {
                    let _ = recorder.exchange(&Command::Quit, Err(err), 0);
                }
            }
        }
        outcome
    }

    pub fn read_stray_line(&mut self) -> Result<Option<String>, ProbeError> {
        self.transport.read_line(Duration::ZERO)
    }

    pub fn close(&mut self) {
        self.transport.close();
        if let Some(recorder) = self.recorder.as_mut() {
            let _ = recorder.finish(self.sent, self.received);
        }
        self.recorder = None;
    }

    fn response_budget(&self, command: &Command) -> Duration {
        match command {
            Command::WaitFor {
                timeout_ms,
                poll_interval_ms,
                ..
            } => {
                self.response_timeout.min(WAIT_FOR_TRANSPORT_MARGIN)
                    + Duration::from_millis(timeout_ms.saturating_add(*poll_interval_ms))
            }
            _ => self.response_timeout,
        }
    }

    fn next_line(&mut self, deadline: Instant, awaiting: &str) -> Result<String, ProbeError> {
        match self.read_line_until(deadline)? {
            Some(line) => Ok(line),
            None => Err(ProbeError::Protocol(format!(
                "target closed its output before sending {awaiting}"
            ))),
        }
    }

    fn read_line_until(&mut self, deadline: Instant) -> Result<Option<String>, ProbeError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.read_line(remaining)? {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }

    fn fail(&mut self, error: ProbeError) -> ProbeError {
        if error.is_channel_fatal() && self.failure.is_none() {
            self.failure = Some(error.to_string());
            log_event("error", "channel_failed", json!({ "error": error.to_string() }));
        }
        error
    }
}

pub type Responder = Box<dyn FnMut(&Command) -> Vec<String> + Send>;

#[derive(Clone, Default)]
pub struct TransportLog {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl TransportLog {
    pub fn lines(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-memory target: queued output lines plus an optional responder that
/// reacts to each command written.
pub struct FakeTransport {
    outgoing: VecDeque<String>,
    responder: Option<Responder>,
    log: TransportLog,
}

impl FakeTransport {
    pub fn scripted<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outgoing: lines.into_iter().map(Into::into).collect(),
            responder: None,
            log: TransportLog::default(),
        }
    }

    pub fn with_responder(
        ready: &Response,
        responder: impl FnMut(&Command) -> Vec<String> + Send + 'static,
    ) -> Self {
        Self {
            outgoing: VecDeque::from([response_line(ready)]),
            responder: Some(Box::new(responder)),
            log: TransportLog::default(),
        }
    }

    pub fn log(&self) -> TransportLog {
        self.log.clone()
    }
}

impl LineTransport for FakeTransport {
    fn write_line(&mut self, line: &str) -> Result<(), ProbeError> {
        if self.log.is_closed() {
            return Err(ProbeError::Process("write after close".to_string()));
        }
        self.log
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        if let Some(responder) = self.responder.as_mut() {
            let command: Command = serde_json::from_str(line)
                .map_err(|e| ProbeError::Protocol(format!("fake target cannot parse: {e}")))?;
            self.outgoing.extend(responder(&command));
        }
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>, ProbeError> {
        Ok(self.outgoing.pop_front())
    }

    fn close(&mut self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }
}

pub fn response_line(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_default()
}
