//! Startup checks module for the recast daemon
//!
//! Provides preflight checks run before the first sweep:
//! - Every configured external tool resolves to an executable file
//! - Missing segment roots and detection profile are reported, not fatal

use crate::config::Config;
use crate::record::Segment;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{role} tool not available: {program}; is it installed and in PATH?")]
    ToolUnavailable { role: &'static str, program: String },
}

/// Resolve a program the way the process spawner would.
///
/// Names containing a path separator are taken as paths (relative to the
/// working directory); bare names are looked up on `PATH`.
pub fn locate_program(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Check that every configured tool can be spawned.
pub fn check_tools_available(cfg: &Config) -> Result<(), StartupError> {
    let tools = [
        ("probe", &cfg.tools.probe),
        ("detector", &cfg.tools.detector),
        ("transcoder", &cfg.tools.transcoder),
    ];
    for (role, program) in tools {
        match locate_program(program) {
            Some(path) => info!(role, path = %path.display(), "tool found"),
            None => {
                return Err(StartupError::ToolUnavailable {
                    role,
                    program: program.clone(),
                })
            }
        }
    }
    Ok(())
}

/// Warn about configured paths that do not exist yet.
///
/// Returns the segments whose source root is missing; sweeps skip them
/// until they appear.
pub fn report_missing_paths(cfg: &Config) -> Vec<Segment> {
    if !cfg.tools.detector_ini.is_file() {
        warn!(path = %cfg.tools.detector_ini.display(), "detection profile not found, commercial detection will likely fail");
    }
    Segment::from_library(&cfg.library)
        .into_iter()
        .filter(|segment| !segment.source_root.is_dir())
        .inspect(|segment| {
            warn!(segment = %segment.name, root = %segment.source_root.display(), "segment root does not exist")
        })
        .collect()
}

/// Run all startup checks in order
///
/// 1. Tool availability (fatal)
/// 2. Missing segment roots and profile (warnings)
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    check_tools_available(cfg)?;
    let missing = report_missing_paths(cfg);
    let configured = cfg.library.segments.len();
    if missing.len() == configured {
        warn!(segments = configured, "no segment root exists yet, sweeps will find nothing");
    } else {
        info!(ready = configured - missing.len(), missing = missing.len(), "segment roots checked");
    }
    Ok(())
}
