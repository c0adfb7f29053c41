pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod export;
pub mod log_retention;
pub mod logging;
pub mod poller;
pub mod preflight;
pub mod protocol;
pub mod report;
pub mod runtime;
pub mod scaffold;
pub mod scenario;
pub mod screen_checks;
pub mod session;
pub mod supervisor;
pub mod types;

use clap::{error::ErrorKind, CommandFactory, Parser};
use config::{load_config, AppConfig, CliOverrides};
use errors::ProbeError;
use logging::{clear_run_logger, init_run_logger, log_event};
use preflight::{build_target, probe_subsystem, resolve_binary};
use report::{render_report, RunReport};
use runtime::ProductionRuntime;
use scaffold::prepare_project;
use scenario::{not_run, ScenarioDriver};
use serde_json::json;
use session::recorder::SessionRecorder;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use supervisor::{with_target, LaunchSpec, SupervisorSettings};
use types::{PollLocus, ScenarioKind};

#[derive(Debug, Clone, Parser)]
#[command(name = "scriptprobe", version)]
#[command(about = "Drive an editor's script-control mode through language server scenarios")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Editor binary to launch.
    #[arg(long)]
    pub binary: Option<PathBuf>,
    /// Editor checkout; the binary is looked up under `target/`.
    #[arg(long)]
    pub repo: Option<PathBuf>,
    /// Run `cargo build --release` in `--repo` before launching.
    #[arg(long, default_value_t = false)]
    pub build: bool,
    #[arg(long)]
    pub width: Option<u16>,
    #[arg(long)]
    pub height: Option<u16>,
    /// Restrict the run to these scenarios. Repeatable.
    #[arg(long = "scenario", value_enum)]
    pub scenarios: Vec<ScenarioKind>,
    #[arg(long, value_enum)]
    pub poll_locus: Option<PollLocus>,
    #[arg(long)]
    pub export_name: Option<String>,
    /// Write the exported test source here.
    #[arg(long)]
    pub export_out: Option<PathBuf>,
    /// Write a JSONL transcript of every exchange here.
    #[arg(long)]
    pub record: Option<PathBuf>,
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    /// Use this directory as the project instead of a temporary one.
    #[arg(long)]
    pub project_dir: Option<PathBuf>,
}

pub fn run() -> Result<i32, ProbeError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = std::env::vars_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| ProbeError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &env, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[OsString],
    env: &[(OsString, OsString)],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, ProbeError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(ProbeError::Cli(error.to_string())),
        },
    };

    let overrides = overrides_from_cli(&cli, cwd);
    let cfg = load_config(&overrides, runtime.file_system.as_ref())?;

    if let Some(path) = &cfg.logging.path {
        init_run_logger(path)?;
    }
    let outcome = probe(&cfg, &env_to_map(env), runtime);
    log_event(
        "info",
        "run_finished",
        json!({ "ok": outcome.is_ok() }),
    );
    clear_run_logger();
    outcome.map(|()| 0)
}

fn probe(
    cfg: &AppConfig,
    env: &HashMap<String, String>,
    runtime: &ProductionRuntime,
) -> Result<(), ProbeError> {
    let fs = runtime.file_system.as_ref();
    let mut report = RunReport::default();

    if !cfg.subsystem.probe_program.is_empty() {
        report.subsystem = Some(probe_subsystem(
            runtime.process_runner.as_ref(),
            &cfg.subsystem.probe_program,
        ));
    }
    build_target(runtime.process_runner.as_ref(), &cfg.target)?;
    let binary = resolve_binary(fs, &cfg.target)?;

    // Dropping the temp dir removes the scratch project, so it lives until return.
    let mut _scratch = None;
    let root = match &cfg.target.project_dir {
        Some(dir) => dir.clone(),
        None => {
            let dir = tempfile::Builder::new()
                .prefix("scriptprobe-")
                .tempdir()
                .map_err(|e| ProbeError::Io(e.to_string()))?;
            let path = dir.path().to_path_buf();
            _scratch = Some(dir);
            path
        }
    };
    let project = prepare_project(fs, &root, &cfg.subsystem.log_file_name)?;
    report.project_root = Some(project.root.clone());

    let spec = LaunchSpec::for_editor(
        &binary,
        &project.document,
        cfg.target.width,
        cfg.target.height,
        &project.root,
        launch_env(cfg, env, &project.subsystem_log),
    );
    let settings = SupervisorSettings {
        response_timeout: Duration::from_millis(cfg.channel.response_timeout_ms),
        quit_grace: Duration::from_millis(cfg.channel.quit_grace_ms),
    };
    let recorder = match &cfg.logging.transcript_path {
        Some(path) => Some(SessionRecorder::create(path)?),
        None => None,
    };

    let run = with_target(&spec, &settings, recorder, |channel, _ready| {
        let selected = cfg.scenarios.selected();
        {
            let mut driver = ScenarioDriver::new(
                channel,
                runtime.clock.as_ref(),
                &cfg.readiness,
                &cfg.scenarios,
            );
            let readiness = driver.wait_for_ready()?;
            let ready = readiness.met;
            report.readiness = Some(readiness);
            driver.run_all(&selected, ready, &mut report.results)?;
        }
        let exported = export::export(channel, &cfg.export.test_name)?;
        if let Some(path) = &cfg.export.output_path {
            export::write_export(fs, path, &exported)?;
            report.export_path = Some(path.clone());
        }
        report.export = Some(exported);
        Ok(())
    })?;

    if let Err(err) = &run.outcome {
        if report.results.is_empty() {
            report.results = not_run(&cfg.scenarios.selected(), err);
        }
    }
    report.ready_message = run.ready_message;
    report.stderr_excerpt =
        diagnostics::stderr_excerpt(&run.termination.stderr, cfg.logging.stderr_excerpt_chars);
    report.termination = Some(run.termination);
    report.log_tail = Some(diagnostics::read_log_tail(
        fs,
        &project.subsystem_log,
        cfg.subsystem.log_tail_lines,
    ));
    if let Err(err) = &run.outcome {
        report.fatal = Some(err.to_string());
    }
    log_event(
        "info",
        "run_summary",
        json!({
            "commands_sent": run.commands_sent,
            "responses_received": run.responses_received,
            "passed": report.passed(),
            "scenarios": report.results.len(),
        }),
    );

    for line in render_report(&report, cfg.export.preview_chars) {
        runtime.terminal.write_line(&line)?;
    }
    run.outcome
}

fn overrides_from_cli(cli: &Cli, cwd: &Path) -> CliOverrides {
    let absolute = |path: &Option<PathBuf>| path.as_ref().map(|p| cwd.join(p));
    CliOverrides {
        config_path: absolute(&cli.config),
        binary: absolute(&cli.binary),
        repo: absolute(&cli.repo),
        build: cli.build,
        width: cli.width,
        height: cli.height,
        scenarios: cli.scenarios.clone(),
        poll_locus: cli.poll_locus,
        export_name: cli.export_name.clone(),
        export_out: absolute(&cli.export_out),
        record: absolute(&cli.record),
        log_file: absolute(&cli.log_file),
        project_dir: absolute(&cli.project_dir),
    }
}

/// Language server verbosity and log location. A verbosity already set in
/// the caller's environment is kept.
fn launch_env(
    cfg: &AppConfig,
    env: &HashMap<String, String>,
    log_file: &Path,
) -> Vec<(String, String)> {
    let level = env
        .get(&cfg.subsystem.log_level_env)
        .cloned()
        .unwrap_or_else(|| cfg.subsystem.log_level.clone());
    vec![
        (cfg.subsystem.log_level_env.clone(), level),
        (cfg.subsystem.log_file_env.clone(), log_file.display().to_string()),
    ]
}

pub fn render_help() -> String {
    let mut cmd = Cli::command();
    let mut buffer = Vec::new();
    if cmd.write_long_help(&mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn env_to_map(env: &[(OsString, OsString)]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (key, value) in env {
        if let (Some(key), Some(value)) = (key.to_str(), value.to_str()) {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::{env_to_map, launch_env, overrides_from_cli, render_help, Cli};
    use crate::config::AppConfig;
    use crate::types::ScenarioKind;
    use clap::Parser;
    use std::ffi::OsString;
    use std::path::Path;

    #[test]
    fn help_lists_every_flag() {
        let help = render_help();
        for flag in [
            "--binary",
            "--repo",
            "--build",
            "--scenario",
            "--poll-locus",
            "--export-out",
            "--record",
            "--project-dir",
        ] {
            assert!(help.contains(flag), "missing {flag}");
        }
    }

    #[test]
    fn relative_paths_resolve_against_cwd() {
        let cli = Cli::try_parse_from([
            "scriptprobe",
            "--binary",
            "bin/fresh",
            "--record",
            "/abs/t.jsonl",
            "--scenario",
            "completion",
            "--scenario",
            "status",
        ])
        .expect("parse");
        let overrides = overrides_from_cli(&cli, Path::new("/work"));
        assert_eq!(overrides.binary.as_deref(), Some(Path::new("/work/bin/fresh")));
        assert_eq!(overrides.record.as_deref(), Some(Path::new("/abs/t.jsonl")));
        assert_eq!(
            overrides.scenarios,
            vec![ScenarioKind::Completion, ScenarioKind::Status]
        );
    }

    #[test]
    fn caller_log_level_is_kept() {
        let cfg = AppConfig::default();
        let env = env_to_map(&[(OsString::from("RA_LOG"), OsString::from("debug"))]);
        let vars = launch_env(&cfg, &env, Path::new("/p/rust-analyzer.log"));
        assert_eq!(
            vars,
            vec![
                ("RA_LOG".to_string(), "debug".to_string()),
                ("RA_LOG_FILE".to_string(), "/p/rust-analyzer.log".to_string()),
            ]
        );
        let defaults = launch_env(&cfg, &env_to_map(&[]), Path::new("/p/ra.log"));
        assert_eq!(defaults[0], ("RA_LOG".to_string(), "info".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn summary_goes_to_the_terminal_seam() {
        use crate::runtime::{
            FakeClock, FakeFileSystem, FakeProcessRunner, FakeTerminal, FileSystem,
            ProductionRuntime,
        };
        use std::os::unix::fs::PermissionsExt;
        use std::sync::Arc;

        let dir = tempfile::tempdir().expect("tempdir");
        let editor = dir.path().join("fresh");
        std::fs::write(&editor, include_str!("../tests/fixtures/fake-editor.sh")).expect("write");
        let mut perms = std::fs::metadata(&editor).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&editor, perms).expect("chmod");

        let fs = FakeFileSystem::with_file(&editor, "");
        fs.write_string(
            Path::new("/probe.toml"),
            include_str!("../tests/fixtures/configs/fast.toml"),
        )
        .expect("config");
        let terminal = FakeTerminal::default();
        let clock = FakeClock::new();
        let runtime = ProductionRuntime {
            clock: Arc::new(clock.clone()),
            file_system: Arc::new(fs.clone()),
            process_runner: Arc::new(FakeProcessRunner::default()),
            terminal: Arc::new(terminal.clone()),
        };
        let args = [
            "scriptprobe",
            "--config",
            "/probe.toml",
            "--binary",
            editor.to_str().expect("utf8 path"),
            "--project-dir",
            dir.path().to_str().expect("utf8 path"),
            "--scenario",
            "completion",
        ]
        .map(OsString::from);

        let code = super::run_with_runtime(&args, &[], dir.path(), &runtime).expect("run");
        assert_eq!(code, 0);
        let lines = terminal.written_lines();
        assert!(lines.contains(&"  completion: PASS".to_string()), "{lines:?}");
        assert!(!lines.iter().any(|l| l.starts_with("  lsp_status")));
        assert!(fs.file(&dir.path().join("src/main.rs")).is_some());
        assert_eq!(clock.sleeps(), vec![std::time::Duration::from_millis(10)]);
    }
}
