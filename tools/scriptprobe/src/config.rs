use crate::errors::ProbeError;
use crate::runtime::FileSystem;
use crate::types::{PollLocus, ScenarioKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_BROKEN_SNIPPET: &str = "\nfn broken() -> i32 {\n    \"not an int\"\n}";

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub binary: Option<PathBuf>,
    pub repo: Option<PathBuf>,
    pub build: bool,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub scenarios: Vec<ScenarioKind>,
    pub poll_locus: Option<PollLocus>,
    pub export_name: Option<String>,
    pub export_out: Option<PathBuf>,
    pub record: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub project_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub target: TargetConfig,
    pub channel: ChannelConfig,
    pub readiness: ReadinessConfig,
    pub scenarios: ScenariosConfig,
    pub subsystem: SubsystemConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    pub binary: Option<PathBuf>,
    pub binary_name: String,
    pub repo: Option<PathBuf>,
    pub build: bool,
    pub build_args: Vec<String>,
    pub width: u16,
    pub height: u16,
    pub project_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    pub response_timeout_ms: u64,
    pub quit_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub text: String,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub locus: PollLocus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenariosConfig {
    pub enabled: Vec<ScenarioKind>,
    pub cursor_down_count: u32,
    pub completion_trigger: String,
    pub completion_settle_ms: u64,
    pub diagnostics_settle_ms: u64,
    pub broken_snippet: String,
    pub binding_display_limit: usize,
}

impl ScenariosConfig {
    pub fn selected(&self) -> Vec<ScenarioKind> {
        ScenarioKind::ALL
            .into_iter()
            .filter(|kind| self.enabled.contains(kind))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubsystemConfig {
    /// Program probed for `--version` before launch. Empty disables the probe.
    pub probe_program: String,
    pub log_level_env: String,
    pub log_level: String,
    pub log_file_env: String,
    pub log_file_name: String,
    pub log_tail_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportConfig {
    pub test_name: String,
    pub output_path: Option<PathBuf>,
    pub preview_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub transcript_path: Option<PathBuf>,
    pub stderr_excerpt_chars: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target: TargetConfig {
                binary: None,
                binary_name: "fresh".to_string(),
                repo: None,
                build: false,
                build_args: vec!["build".to_string(), "--release".to_string()],
                width: 120,
                height: 40,
                project_dir: None,
            },
            channel: ChannelConfig {
                response_timeout_ms: 10_000,
                quit_grace_ms: 5_000,
            },
            readiness: ReadinessConfig {
                text: "ready".to_string(),
                timeout_ms: 30_000,
                poll_interval_ms: 500,
                locus: PollLocus::Target,
            },
            scenarios: ScenariosConfig {
                enabled: ScenarioKind::ALL.to_vec(),
                cursor_down_count: 5,
                completion_trigger: "    numbers.".to_string(),
                completion_settle_ms: 2_000,
                diagnostics_settle_ms: 3_000,
                broken_snippet: DEFAULT_BROKEN_SNIPPET.to_string(),
                binding_display_limit: 5,
            },
            subsystem: SubsystemConfig {
                probe_program: "rust-analyzer".to_string(),
                log_level_env: "RA_LOG".to_string(),
                log_level: "info".to_string(),
                log_file_env: "RA_LOG_FILE".to_string(),
                log_file_name: "rust-analyzer.log".to_string(),
                log_tail_lines: 50,
            },
            export: ExportConfig {
                test_name: "test_lsp_integration".to_string(),
                output_path: None,
                preview_chars: 500,
            },
            logging: LoggingConfig {
                path: None,
                transcript_path: None,
                stderr_excerpt_chars: 2_000,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    target: Option<PartialTargetConfig>,
    channel: Option<PartialChannelConfig>,
    readiness: Option<PartialReadinessConfig>,
    scenarios: Option<PartialScenariosConfig>,
    subsystem: Option<PartialSubsystemConfig>,
    export: Option<PartialExportConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialTargetConfig {
    binary: Option<PathBuf>,
    binary_name: Option<String>,
    repo: Option<PathBuf>,
    build: Option<bool>,
    build_args: Option<Vec<String>>,
    width: Option<u16>,
    height: Option<u16>,
    project_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialChannelConfig {
    response_timeout_ms: Option<u64>,
    quit_grace_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialReadinessConfig {
    text: Option<String>,
    timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    locus: Option<PollLocus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialScenariosConfig {
    enabled: Option<Vec<ScenarioKind>>,
    cursor_down_count: Option<u32>,
    completion_trigger: Option<String>,
    completion_settle_ms: Option<u64>,
    diagnostics_settle_ms: Option<u64>,
    broken_snippet: Option<String>,
    binding_display_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSubsystemConfig {
    probe_program: Option<String>,
    log_level_env: Option<String>,
    log_level: Option<String>,
    log_file_env: Option<String>,
    log_file_name: Option<String>,
    log_tail_lines: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialExportConfig {
    test_name: Option<String>,
    output_path: Option<PathBuf>,
    preview_chars: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    transcript_path: Option<PathBuf>,
    stderr_excerpt_chars: Option<usize>,
}

pub fn load_config(overrides: &CliOverrides, fs: &dyn FileSystem) -> Result<AppConfig, ProbeError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| ProbeError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(target) = partial.target {
        if target.binary.is_some() {
            cfg.target.binary = target.binary;
        }
        if let Some(value) = target.binary_name {
            cfg.target.binary_name = value;
        }
        if target.repo.is_some() {
            cfg.target.repo = target.repo;
        }
        if let Some(value) = target.build {
            cfg.target.build = value;
        }
        if let Some(value) = target.build_args {
            cfg.target.build_args = value;
        }
        if let Some(value) = target.width {
            cfg.target.width = value;
        }
        if let Some(value) = target.height {
            cfg.target.height = value;
        }
        if target.project_dir.is_some() {
            cfg.target.project_dir = target.project_dir;
        }
    }

    if let Some(channel) = partial.channel {
        if let Some(value) = channel.response_timeout_ms {
            cfg.channel.response_timeout_ms = value;
        }
        if let Some(value) = channel.quit_grace_ms {
            cfg.channel.quit_grace_ms = value;
        }
    }

    if let Some(readiness) = partial.readiness {
        if let Some(value) = readiness.text {
            cfg.readiness.text = value;
        }
        if let Some(value) = readiness.timeout_ms {
            cfg.readiness.timeout_ms = value;
        }
        if let Some(value) = readiness.poll_interval_ms {
            cfg.readiness.poll_interval_ms = value;
        }
        if let Some(value) = readiness.locus {
            cfg.readiness.locus = value;
        }
    }

    if let Some(scenarios) = partial.scenarios {
        if let Some(value) = scenarios.enabled {
            cfg.scenarios.enabled = value;
        }
        if let Some(value) = scenarios.cursor_down_count {
            cfg.scenarios.cursor_down_count = value;
        }
        if let Some(value) = scenarios.completion_trigger {
            cfg.scenarios.completion_trigger = value;
        }
        if let Some(value) = scenarios.completion_settle_ms {
            cfg.scenarios.completion_settle_ms = value;
        }
        if let Some(value) = scenarios.diagnostics_settle_ms {
            cfg.scenarios.diagnostics_settle_ms = value;
        }
        if let Some(value) = scenarios.broken_snippet {
            cfg.scenarios.broken_snippet = value;
        }
        if let Some(value) = scenarios.binding_display_limit {
            cfg.scenarios.binding_display_limit = value;
        }
    }

    if let Some(subsystem) = partial.subsystem {
        if let Some(value) = subsystem.probe_program {
            cfg.subsystem.probe_program = value;
        }
        if let Some(value) = subsystem.log_level_env {
            cfg.subsystem.log_level_env = value;
        }
        if let Some(value) = subsystem.log_level {
            cfg.subsystem.log_level = value;
        }
        if let Some(value) = subsystem.log_file_env {
            cfg.subsystem.log_file_env = value;
        }
        if let Some(value) = subsystem.log_file_name {
            cfg.subsystem.log_file_name = value;
        }
        if let Some(value) = subsystem.log_tail_lines {
            cfg.subsystem.log_tail_lines = value;
        }
    }

    if let Some(export) = partial.export {
        if let Some(value) = export.test_name {
            cfg.export.test_name = value;
        }
        if export.output_path.is_some() {
            cfg.export.output_path = export.output_path;
        }
        if let Some(value) = export.preview_chars {
            cfg.export.preview_chars = value;
        }
    }

    if let Some(logging) = partial.logging {
        if logging.path.is_some() {
            cfg.logging.path = logging.path;
        }
        if logging.transcript_path.is_some() {
            cfg.logging.transcript_path = logging.transcript_path;
        }
        if let Some(value) = logging.stderr_excerpt_chars {
            cfg.logging.stderr_excerpt_chars = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(binary) = &overrides.binary {
        cfg.target.binary = Some(binary.clone());
    }
    if let Some(repo) = &overrides.repo {
        cfg.target.repo = Some(repo.clone());
    }
    if overrides.build {
        cfg.target.build = true;
    }
    if let Some(width) = overrides.width {
        cfg.target.width = width;
    }
    if let Some(height) = overrides.height {
        cfg.target.height = height;
    }
    if let Some(dir) = &overrides.project_dir {
        cfg.target.project_dir = Some(dir.clone());
    }
    if !overrides.scenarios.is_empty() {
        cfg.scenarios.enabled = overrides.scenarios.clone();
    }
    if let Some(locus) = overrides.poll_locus {
        cfg.readiness.locus = locus;
    }
    if let Some(name) = &overrides.export_name {
        cfg.export.test_name = name.clone();
    }
    if let Some(path) = &overrides.export_out {
        cfg.export.output_path = Some(path.clone());
    }
    if let Some(path) = &overrides.record {
        cfg.logging.transcript_path = Some(path.clone());
    }
    if let Some(path) = &overrides.log_file {
        cfg.logging.path = Some(path.clone());
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), ProbeError> {
    if cfg.target.width == 0 || cfg.target.height == 0 {
        return Err(ProbeError::InvalidConfig(
            "target.width and target.height must be greater than zero".to_string(),
        ));
    }
    if cfg.target.binary.is_none() && cfg.target.binary_name.trim().is_empty() {
        return Err(ProbeError::InvalidConfig(
            "target.binary_name is required when target.binary is not set".to_string(),
        ));
    }
    if cfg.target.build && cfg.target.repo.is_none() {
        return Err(ProbeError::InvalidConfig(
            "target.build requires target.repo".to_string(),
        ));
    }
    if cfg.channel.response_timeout_ms == 0 {
        return Err(ProbeError::InvalidConfig(
            "channel.response_timeout_ms must be greater than zero".to_string(),
        ));
    }
    if cfg.readiness.text.is_empty() {
        return Err(ProbeError::InvalidConfig(
            "readiness.text must not be empty".to_string(),
        ));
    }
    if cfg.readiness.poll_interval_ms == 0 {
        return Err(ProbeError::InvalidConfig(
            "readiness.poll_interval_ms must be greater than zero".to_string(),
        ));
    }
    if cfg.scenarios.enabled.is_empty() {
        return Err(ProbeError::InvalidConfig(
            "scenarios.enabled must name at least one scenario".to_string(),
        ));
    }
    let name = cfg.export.test_name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ProbeError::InvalidConfig(format!(
            "export.test_name `{}` must be a non-empty identifier",
            cfg.export.test_name
        )));
    }
    Ok(())
}
