use crate::config::TargetConfig;
use crate::errors::ProbeError;
use crate::logging::log_event;
use crate::runtime::{FileSystem, ProcessRequest, ProcessRunner};
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubsystemProbe {
    Available(String),
    Unavailable(String),
}

/// Build the editor with cargo inside `target.repo` when `target.build` is set.
pub fn build_target(runner: &dyn ProcessRunner, target: &TargetConfig) -> Result<(), ProbeError> {
    if !target.build {
        return Ok(());
    }
    let Some(repo) = &target.repo else {
        return Err(ProbeError::Build("no repository to build in".to_string()));
    };
    let output = runner.run(ProcessRequest {
        program: "cargo".to_string(),
        args: target.build_args.clone(),
        cwd: Some(repo.clone()),
    })?;
    log_event(
        "info",
        "target_build",
        json!({ "repo": repo.display().to_string(), "exit_code": output.exit_code }),
    );
    if output.exit_code != 0 {
        return Err(ProbeError::Build(format!(
            "cargo {} exited with {}: {}",
            target.build_args.join(" "),
            output.exit_code,
            output.stderr.trim()
        )));
    }
    Ok(())
}

pub fn resolve_binary(fs: &dyn FileSystem, target: &TargetConfig) -> Result<PathBuf, ProbeError> {
    if let Some(binary) = &target.binary {
        if fs.exists(binary) {
            return Ok(binary.clone());
        }
        return Err(ProbeError::Launch(format!(
            "editor binary not found at {}",
            binary.display()
        )));
    }
    let Some(repo) = &target.repo else {
        return Err(ProbeError::Launch(
            "no editor binary configured; pass --binary or --repo".to_string(),
        ));
    };
    let candidates = ["debug", "release"].map(|profile| {
        repo.join("target")
            .join(profile)
            .join(&target.binary_name)
    });
    for candidate in &candidates {
        if fs.exists(candidate) {
            return Ok(candidate.clone());
        }
    }
    Err(ProbeError::Launch(format!(
        "editor binary not found at {}",
        candidates[1].display()
    )))
}

/// Ask the language server for its version. Never fatal.
pub fn probe_subsystem(runner: &dyn ProcessRunner, program: &str) -> SubsystemProbe {
    let probe = match runner.run(ProcessRequest {
        program: program.to_string(),
        args: vec!["--version".to_string()],
        cwd: None,
    }) {
        Ok(output) if output.exit_code == 0 => SubsystemProbe::Available(output.stdout.trim().to_string()),
        Ok(output) => SubsystemProbe::Unavailable(format!(
            "{program} --version exited with {}",
            output.exit_code
        )),
        Err(err) => SubsystemProbe::Unavailable(format!("{program} not found in PATH ({err})")),
    };
    match &probe {
        SubsystemProbe::Available(version) => {
            log_event("info", "subsystem_probe", json!({ "version": version }))
        }
        SubsystemProbe::Unavailable(reason) => {
            log_event("warn", "subsystem_probe", json!({ "unavailable": reason }))
        }
    }
    probe
}
