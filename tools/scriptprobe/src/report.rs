use crate::diagnostics::LogTail;
use crate::export::ExportedTest;
use crate::preflight::SubsystemProbe;
use crate::scenario::{ReadinessReport, ScenarioResult};
use crate::screen_checks::head_chars;
use crate::supervisor::TerminationReport;
use std::path::PathBuf;

/// Everything observed during one probe run, successful or not.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub subsystem: Option<SubsystemProbe>,
    pub project_root: Option<PathBuf>,
    pub ready_message: Option<String>,
    pub readiness: Option<ReadinessReport>,
    pub results: Vec<ScenarioResult>,
    pub export: Option<ExportedTest>,
    pub export_path: Option<PathBuf>,
    pub termination: Option<TerminationReport>,
    pub fatal: Option<String>,
    pub log_tail: Option<LogTail>,
    pub stderr_excerpt: Option<String>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }
}

pub fn render_report(report: &RunReport, preview_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    match &report.subsystem {
        Some(SubsystemProbe::Available(version)) => out.push(format!("rust-analyzer: {version}")),
        Some(SubsystemProbe::Unavailable(reason)) => out.push(format!(
            "WARNING: {reason}. Language server scenarios may fail."
        )),
        None => {}
    }
    if let Some(root) = &report.project_root {
        out.push(format!("project: {}", root.display()));
    }
    if let Some(message) = &report.ready_message {
        out.push(format!("editor ready: {message}"));
    }
    if let Some(readiness) = &report.readiness {
        if readiness.met {
            out.push(format!(
                "language server ready after {}ms",
                readiness.elapsed_ms
            ));
        } else {
            if let Some(line) = &readiness.status_line {
                out.push(format!("LSP error detected: {line}"));
            }
            out.push("WARNING: language server did not fully initialize within timeout".to_string());
        }
    }

    if let Some(export) = &report.export {
        out.push(String::new());
        out.push("=== Exported Test ===".to_string());
        out.push(format!(
            "Generated test code ({} chars, {} commands):",
            export.length, export.session_commands
        ));
        let preview = head_chars(&export.code, preview_chars);
        if preview.len() < export.code.len() {
            out.push(format!("{preview}..."));
        } else {
            out.push(preview.to_string());
        }
        if let Some(path) = &report.export_path {
            out.push(format!("written to {}", path.display()));
        }
    }

    out.push(String::new());
    out.push("=== Test Summary ===".to_string());
    for result in &report.results {
        let status = if result.passed { "PASS" } else { "SKIP/FAIL" };
        out.push(format!("  {}: {status}", result.name()));
        if !result.detail.is_empty() {
            out.push(format!("      {}", result.detail));
        }
    }
    out.push(format!(
        "  {}/{} passed",
        report.passed(),
        report.results.len()
    ));
    if let Some(fatal) = &report.fatal {
        out.push(format!("  run aborted: {fatal}"));
    }

    if let Some(termination) = &report.termination {
        let exit = termination
            .exit_code
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        if termination.forced {
            out.push(format!("editor ignored quit and was killed (exit: {exit})"));
        } else {
            out.push(format!("editor exited (exit: {exit})"));
        }
        for line in &termination.trailing_stdout {
            out.push(format!("  trailing output: {line}"));
        }
        if !termination.undrained.is_empty() {
            out.push(format!(
                "  still held open by a leftover process: {}",
                termination.undrained.join(", ")
            ));
        }
    }

    if let Some(tail) = &report.log_tail {
        out.push(String::new());
        out.push("=== rust-analyzer Logs ===".to_string());
        out.extend(tail.render());
    }
    if let Some(stderr) = &report.stderr_excerpt {
        out.push(String::new());
        out.push("=== Editor Stderr ===".to_string());
        out.push(stderr.clone());
    }
    out
}
