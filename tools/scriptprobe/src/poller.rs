//! Bounded waiting on eventually-true conditions.
//!
//! Timing contract shared by both loci:
//! - the first check runs immediately;
//! - consecutive checks start at least one interval apart;
//! - the last check starts before `timeout + interval`, so a wait never
//!   outlives its timeout by more than one interval.
//!
//! A timeout is not an error. Callers get `met == false` and decide what a
//! fallback inspection should look like.

use crate::channel::CommandChannel;
use crate::errors::ProbeError;
use crate::logging::log_event;
use crate::protocol::{Command, Condition, Response};
use crate::runtime::Clock;
use crate::types::PollLocus;
use serde_json::json;
use std::time::Duration;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    pub met: bool,
    pub elapsed_ms: u64,
    /// Message from the target's reply, or the last screen line seen.
    pub detail: Option<String>,
}

/// Run `check` until it returns true or `timeout` elapses.
pub fn poll_until(
    clock: &dyn Clock,
    timeout: Duration,
    interval: Duration,
    mut check: impl FnMut() -> Result<bool, ProbeError>,
) -> Result<WaitOutcome, ProbeError> {
    let interval = interval.max(MIN_INTERVAL);
    let start = clock.now();
    loop {
        let check_started = clock.now();
        if check()? {
            return Ok(WaitOutcome {
                met: true,
                elapsed_ms: millis(clock.now().duration_since(start)),
                detail: None,
            });
        }
        let now = clock.now();
        if now.duration_since(start) >= timeout {
            return Ok(WaitOutcome {
                met: false,
                elapsed_ms: millis(now.duration_since(start)),
                detail: None,
            });
        }
        let next_check = check_started + interval;
        clock.sleep(next_check.saturating_duration_since(now));
    }
}

/// Wait for `condition` on the target's screen.
///
/// With [`PollLocus::Target`] the whole wait is one `wait_for` request and
/// the target does the polling; with [`PollLocus::Harness`] the harness
/// renders at `poll_interval_ms` cadence and evaluates the condition itself.
pub fn wait(
    channel: &mut CommandChannel,
    clock: &dyn Clock,
    condition: &Condition,
    timeout_ms: u64,
    poll_interval_ms: u64,
    locus: PollLocus,
) -> Result<WaitOutcome, ProbeError> {
    let outcome = match locus {
        PollLocus::Target => {
            let start = clock.now();
            let response = channel.request(Command::WaitFor {
                condition: condition.clone(),
                timeout_ms,
                poll_interval_ms,
            })?;
            let (met, detail) = match response {
                Response::Ok { message } => (true, Some(message)),
                Response::Error { message } => (false, Some(message)),
                other => {
                    return Err(ProbeError::Protocol(format!(
                        "wait_for answered with `{}`",
                        other.name()
                    )))
                }
            };
            WaitOutcome {
                met,
                elapsed_ms: millis(clock.now().duration_since(start)),
                detail,
            }
        }
        PollLocus::Harness => {
            let mut last_line = None;
            let mut outcome = poll_until(
                clock,
                Duration::from_millis(timeout_ms),
                Duration::from_millis(poll_interval_ms),
                || {
                    let response = channel.request(Command::Render)?;
                    let Some(screen) = response.screen_content() else {
                        return Ok(false);
                    };
                    last_line = screen.lines().last().map(str::to_string);
                    Ok(condition.is_met(screen))
                },
            )?;
            outcome.detail = last_line;
            outcome
        }
    };
    log_event(
        "info",
        "wait_outcome",
        json!({
            "condition": condition,
            "locus": locus.as_str(),
            "met": outcome.met,
            "elapsed_ms": outcome.elapsed_ms,
        }),
    );
    Ok(outcome)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
