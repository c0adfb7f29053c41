use crate::channel::CommandChannel;
use crate::config::{ReadinessConfig, ScenariosConfig};
use crate::errors::ProbeError;
use crate::logging::log_event;
use crate::poller;
use crate::protocol::{
    Command, Condition, Modifier, Response, KEY_DOWN, KEY_END, KEY_ENTER, KEY_ESCAPE, KEY_SPACE,
};
use crate::runtime::Clock;
use crate::screen_checks::{
    filter_bindings, head_chars, mentions_error, shows_completion_candidates, shows_diagnostics,
    shows_subsystem_status, status_bar, subsystem_status_line, tail_chars, BINDING_KEYWORDS,
};
use crate::types::ScenarioKind;
use serde_json::json;
use std::time::Duration;

const BUFFER_PREVIEW_CHARS: usize = 100;
const SCREEN_TAIL_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioResult {
    pub kind: ScenarioKind,
    pub passed: bool,
    pub detail: String,
}

impl ScenarioResult {
    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessReport {
    pub met: bool,
    pub elapsed_ms: u64,
    /// Subsystem status line, captured when the wait timed out with an
    /// error on screen.
    pub status_line: Option<String>,
}

/// Failed verdicts for scenarios a fatal error kept from running.
pub fn not_run(kinds: &[ScenarioKind], cause: &ProbeError) -> Vec<ScenarioResult> {
    kinds
        .iter()
        .map(|&kind| ScenarioResult {
            kind,
            passed: false,
            detail: format!("not run: {cause}"),
        })
        .collect()
}

pub struct ScenarioDriver<'a> {
    channel: &'a mut CommandChannel,
    clock: &'a dyn Clock,
    readiness: &'a ReadinessConfig,
    settings: &'a ScenariosConfig,
}

impl<'a> ScenarioDriver<'a> {
    pub fn new(
        channel: &'a mut CommandChannel,
        clock: &'a dyn Clock,
        readiness: &'a ReadinessConfig,
        settings: &'a ScenariosConfig,
    ) -> Self {
        Self {
            channel,
            clock,
            readiness,
            settings,
        }
    }

    /// Wait for the language server to report it is ready. A timeout is
    /// followed by one render to look for a startup error.
    pub fn wait_for_ready(&mut self) -> Result<ReadinessReport, ProbeError> {
        let condition = Condition::screen_contains(self.readiness.text.clone());
        let outcome = poller::wait(
            self.channel,
            self.clock,
            &condition,
            self.readiness.timeout_ms,
            self.readiness.poll_interval_ms,
            self.readiness.locus,
        )?;

        let mut status_line = None;
        if !outcome.met {
            if let Some(screen) = self.render()? {
                if mentions_error(&screen) {
                    status_line = subsystem_status_line(&screen).map(str::to_string);
                }
            }
        }
        log_event(
            if outcome.met { "info" } else { "warn" },
            "subsystem_readiness",
            json!({
                "met": outcome.met,
                "elapsed_ms": outcome.elapsed_ms,
                "status_line": status_line,
            }),
        );
        Ok(ReadinessReport {
            met: outcome.met,
            elapsed_ms: outcome.elapsed_ms,
            status_line,
        })
    }

    /// Run `selected` in fixed order, appending each verdict to `results`
    /// as soon as it is known. On a fatal error every scenario that did not
    /// finish is still recorded as failed before the error is returned.
    pub fn run_all(
        &mut self,
        selected: &[ScenarioKind],
        subsystem_ready: bool,
        results: &mut Vec<ScenarioResult>,
    ) -> Result<(), ProbeError> {
        let order = ScenarioKind::ALL
            .into_iter()
            .filter(|kind| selected.contains(kind))
            .collect::<Vec<_>>();
        for (index, kind) in order.iter().copied().enumerate() {
            let result = match self.run(kind, subsystem_ready) {
                Ok(result) => result,
                Err(err) => {
                    results.push(ScenarioResult {
                        kind,
                        passed: false,
                        detail: format!("aborted: {err}"),
                    });
                    results.extend(not_run(&order[index + 1..], &err));
                    return Err(err);
                }
            };
            log_event(
                "info",
                "scenario_result",
                json!({
                    "scenario": result.name(),
                    "passed": result.passed,
                    "detail": result.detail,
                }),
            );
            results.push(result);
        }
        Ok(())
    }

    pub fn run(
        &mut self,
        kind: ScenarioKind,
        subsystem_ready: bool,
    ) -> Result<ScenarioResult, ProbeError> {
        match kind {
            ScenarioKind::Status => self.status(),
            ScenarioKind::Keybindings => self.keybindings(),
            ScenarioKind::Completion if !subsystem_ready => Ok(ScenarioResult {
                kind,
                passed: false,
                detail: "subsystem not ready".to_string(),
            }),
            ScenarioKind::Completion => self.completion(),
            ScenarioKind::Diagnostics => self.diagnostics(),
        }
    }

    fn status(&mut self) -> Result<ScenarioResult, ProbeError> {
        let screen = self.render()?.unwrap_or_default();
        Ok(ScenarioResult {
            kind: ScenarioKind::Status,
            passed: shows_subsystem_status(&screen),
            detail: status_bar(&screen).unwrap_or("(empty screen)").to_string(),
        })
    }

    fn keybindings(&mut self) -> Result<ScenarioResult, ProbeError> {
        let bindings = match self.channel.request(Command::GetKeybindings)? {
            Response::Keybindings { bindings } => bindings,
            other => {
                return Ok(ScenarioResult {
                    kind: ScenarioKind::Keybindings,
                    passed: false,
                    detail: unexpected(&other),
                })
            }
        };
        let related = filter_bindings(&bindings, &BINDING_KEYWORDS);
        let shown = related
            .iter()
            .take(self.settings.binding_display_limit)
            .map(|binding| format!("{} -> {}", binding.key, binding.action))
            .collect::<Vec<_>>();
        Ok(ScenarioResult {
            kind: ScenarioKind::Keybindings,
            passed: true,
            detail: format!(
                "{} bindings, {} language-server related: [{}]",
                bindings.len(),
                related.len(),
                shown.join(", ")
            ),
        })
    }

    fn completion(&mut self) -> Result<ScenarioResult, ProbeError> {
        if let Response::Screen { width, height, .. } = self.channel.request(Command::Render)? {
            log_event(
                "debug",
                "completion_screen_size",
                json!({ "width": width, "height": height }),
            );
        }

        for _ in 0..self.settings.cursor_down_count {
            self.input(Command::key(KEY_DOWN))?;
        }
        self.input(Command::key(KEY_END))?;
        self.input(Command::key(KEY_ENTER))?;
        self.input(Command::type_text(self.settings.completion_trigger.clone()))?;
        self.input(Command::key_with(KEY_SPACE, &[Modifier::Ctrl]))?;

        self.settle(self.settings.completion_settle_ms);
        let screen = self.render()?.unwrap_or_default();
        let passed = shows_completion_candidates(&screen);

        self.input(Command::key(KEY_ESCAPE))?;
        let buffer = match self.channel.request(Command::GetBuffer)? {
            Response::Buffer { content } => head_chars(&content, BUFFER_PREVIEW_CHARS).to_string(),
            other => unexpected(&other),
        };

        let verdict = if passed {
            "completion candidates visible"
        } else {
            "no completion candidates on screen"
        };
        Ok(ScenarioResult {
            kind: ScenarioKind::Completion,
            passed,
            detail: format!("{verdict}; buffer: {buffer:?}"),
        })
    }

    fn diagnostics(&mut self) -> Result<ScenarioResult, ProbeError> {
        self.input(Command::key_with(KEY_END, &[Modifier::Ctrl]))?;
        self.input(Command::key(KEY_ENTER))?;
        self.input(Command::type_text(self.settings.broken_snippet.clone()))?;

        if let Some(screen) = self.render()? {
            log_event(
                "debug",
                "diagnostics_screen_before_settle",
                json!({ "tail": tail_chars(&screen, SCREEN_TAIL_CHARS) }),
            );
        }
        self.settle(self.settings.diagnostics_settle_ms);
        let screen = self.render()?.unwrap_or_default();
        Ok(ScenarioResult {
            kind: ScenarioKind::Diagnostics,
            passed: shows_diagnostics(&screen),
            detail: status_bar(&screen).unwrap_or("(empty screen)").to_string(),
        })
    }

    fn render(&mut self) -> Result<Option<String>, ProbeError> {
        match self.channel.request(Command::Render)? {
            Response::Screen { content, .. } => Ok(Some(content)),
            other => {
                log_event("warn", "render_failed", json!({ "response": unexpected(&other) }));
                Ok(None)
            }
        }
    }

    /// Send an input command. A rejected input is logged and left for the
    /// scenario's verdict to reflect.
    fn input(&mut self, command: Command) -> Result<(), ProbeError> {
        let name = command.name();
        if let Response::Error { message } = self.channel.request(command)? {
            log_event(
                "warn",
                "input_rejected",
                json!({ "command": name, "message": message }),
            );
        }
        Ok(())
    }

    fn settle(&self, millis: u64) {
        self.clock.sleep(Duration::from_millis(millis));
    }
}

fn unexpected(response: &Response) -> String {
    match response {
        Response::Error { message } => format!("target error: {message}"),
        other => format!("unexpected `{}` response", other.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::{not_run, ScenarioDriver, ScenarioResult};
    use crate::errors::ProbeError;
    use crate::channel::{response_line, CommandChannel, FakeTransport, TransportLog};
    use crate::config::AppConfig;
    use crate::protocol::{Binding, Command, Modifier, Response};
    use crate::runtime::FakeClock;
    use crate::types::ScenarioKind;
    use std::time::Duration;

    fn ok() -> Response {
        Response::Ok {
            message: String::new(),
        }
    }

    fn screen(content: &str) -> Response {
        Response::Screen {
            width: 120,
            height: 40,
            content: content.to_string(),
        }
    }

    fn healthy_editor() -> (FakeTransport, TransportLog) {
        let mut popup = false;
        let mut broken = false;
        let transport = FakeTransport::with_responder(&ok(), move |command| {
            let response = match command {
                Command::Render if popup => screen("numbers.\n  len()\n  push()\nLSP: ready"),
                Command::Render if broken => screen("fn broken()\nE:1 W:0 | LSP: ready"),
                Command::Render => screen("fn main() {}\nmain.rs | LSP: ready"),
                Command::KeyPress { code, modifiers } => {
                    popup = code == "space" && modifiers.contains(&Modifier::Ctrl);
                    ok()
                }
                Command::TypeText { text } => {
                    broken |= text.contains("broken");
                    ok()
                }
                Command::GetKeybindings => Response::Keybindings {
                    bindings: vec![
                        Binding {
                            key: "C-space".to_string(),
                            action: "lsp_completion".to_string(),
                        },
                        Binding {
                            key: "C-s".to_string(),
                            action: "save".to_string(),
                        },
                    ],
                },
                Command::GetBuffer => Response::Buffer {
                    content: "fn main() {\n    numbers.\n}".to_string(),
                },
                _ => ok(),
            };
            vec![response_line(&response)]
        });
        let log = transport.log();
        (transport, log)
    }

    fn run(
        transport: FakeTransport,
        clock: &FakeClock,
        selected: &[ScenarioKind],
    ) -> (Result<(), crate::errors::ProbeError>, Vec<ScenarioResult>, bool) {
        let cfg = AppConfig::default();
        let mut channel = CommandChannel::new(Box::new(transport), Duration::from_secs(1));
        channel.read_ready().expect("ready");
        let mut driver = ScenarioDriver::new(&mut channel, clock, &cfg.readiness, &cfg.scenarios);
        let readiness = driver.wait_for_ready().expect("readiness");
        let mut results = Vec::new();
        let outcome = driver.run_all(selected, readiness.met, &mut results);
        (outcome, results, readiness.met)
    }

    #[test]
    fn healthy_editor_passes_every_scenario() {
        let clock = FakeClock::new();
        let (transport, _log) = healthy_editor();
        let (outcome, results, ready) = run(transport, &clock, &ScenarioKind::ALL);
        outcome.expect("run");
        assert!(ready);
        let names = results.iter().map(ScenarioResult::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["lsp_status", "keybindings", "completion", "diagnostics"]);
        assert!(results.iter().all(|r| r.passed), "{results:?}");
        assert!(results[1].detail.contains("1 language-server related"));
        assert!(results[2].detail.contains("numbers."));
    }

    #[test]
    fn settle_delays_use_the_injected_clock() {
        let clock = FakeClock::new();
        let (transport, _log) = healthy_editor();
        let (outcome, _, _) = run(
            transport,
            &clock,
            &[ScenarioKind::Completion, ScenarioKind::Diagnostics],
        );
        outcome.expect("run");
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(2000), Duration::from_millis(3000)]
        );
    }

    #[test]
    fn completion_is_skipped_when_subsystem_never_becomes_ready() {
        let clock = FakeClock::new();
        let transport = FakeTransport::with_responder(&ok(), |command| {
            let response = match command {
                Command::WaitFor { .. } => Response::Error {
                    message: "timed out".to_string(),
                },
                Command::Render => screen("main.rs\nLSP error: rust-analyzer not found"),
                _ => ok(),
            };
            vec![response_line(&response)]
        });
        let log = transport.log();
        let (outcome, results, ready) = run(transport, &clock, &[ScenarioKind::Completion]);
        outcome.expect("run");
        assert!(!ready);
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert_eq!(results[0].detail, "subsystem not ready");
        assert!(!log
            .commands()
            .iter()
            .any(|c| matches!(c, Command::TypeText { .. })));
    }

    #[test]
    fn failing_scenario_does_not_stop_the_next_one() {
        let clock = FakeClock::new();
        let transport = FakeTransport::with_responder(&ok(), |command| {
            let response = match command {
                Command::Render => screen("plain text editor"),
                Command::GetKeybindings => Response::Error {
                    message: "not supported".to_string(),
                },
                _ => ok(),
            };
            vec![response_line(&response)]
        });
        let (outcome, results, _) = run(
            transport,
            &clock,
            &[ScenarioKind::Status, ScenarioKind::Keybindings, ScenarioKind::Diagnostics],
        );
        outcome.expect("run");
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !r.passed));
        assert_eq!(results[1].detail, "target error: not supported");
    }

    #[test]
    fn fatal_error_keeps_earlier_verdicts_and_fails_the_rest() {
        let clock = FakeClock::new();
        let transport = FakeTransport::with_responder(&ok(), |command| match command {
            Command::GetKeybindings => Vec::new(),
            Command::Render => vec![response_line(&screen("LSP: ready"))],
            _ => vec![response_line(&ok())],
        });
        let (outcome, results, _) = run(transport, &clock, &ScenarioKind::ALL);
        let err = outcome.expect_err("eof");
        assert!(err.is_channel_fatal());
        let kinds = results.iter().map(|r| r.kind).collect::<Vec<_>>();
        assert_eq!(kinds, ScenarioKind::ALL.to_vec());
        assert!(results[1..].iter().all(|r| !r.passed));
        assert!(results[1].detail.starts_with("aborted: "), "{}", results[1].detail);
        assert!(results[2].detail.starts_with("not run: "));
        assert!(results[3].detail.starts_with("not run: "));
    }

    #[test]
    fn not_run_names_the_cause() {
        let err = ProbeError::Process("target exited".to_string());
        let results = not_run(&[ScenarioKind::Completion], &err);
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert_eq!(results[0].detail, format!("not run: {err}"));
    }
}
