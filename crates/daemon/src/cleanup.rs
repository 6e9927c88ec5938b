//! Cleanup of per-recording artifacts and whole-segment maintenance.
//!
//! Every deletion is attempted on its own; one failure is logged and
//! reported but never stops the rest.

use crate::record::{ConversionRecord, EDL_EXT, LOGO_EXT, LOG_EXT, TEXT_EXT};
use crate::scan::is_hidden_artifact;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
#[error("failed to remove {}: {source}", .path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    File,
    /// Directory removed with everything in it.
    Tree,
}

/// One path to delete once a record has been relocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

impl Artifact {
    fn file(path: PathBuf) -> Self {
        Self {
            path,
            kind: ArtifactKind::File,
        }
    }
}

/// Everything the pipeline leaves next to a recording.
///
/// The sidecar comes first: once it is gone the scanner no longer sees the
/// recording, so an interrupted cleanup only strands inert files.
pub fn record_artifacts(record: &ConversionRecord) -> Vec<Artifact> {
    vec![
        Artifact::file(record.sidecar_path.clone()),
        Artifact::file(record.original_path.clone()),
        Artifact::file(record.output_path.clone()),
        Artifact::file(record.artifact(EDL_EXT)),
        Artifact::file(record.artifact(LOG_EXT)),
        Artifact::file(record.artifact(TEXT_EXT)),
        Artifact::file(record.artifact(LOGO_EXT)),
        Artifact {
            path: record.scratch_dir(),
            kind: ArtifactKind::Tree,
        },
    ]
}

/// Result of a best-effort cleanup pass.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub absent: usize,
    pub failures: Vec<CleanupError>,
}

impl CleanupReport {
    fn record(&mut self, path: &Path, result: io::Result<()>) {
        match result {
            Ok(()) => {
                debug!(path = %path.display(), "removed");
                self.removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.absent += 1,
            Err(source) => {
                let error = CleanupError {
                    path: path.to_path_buf(),
                    source,
                };
                warn!(error = %error, "cleanup step failed");
                self.failures.push(error);
            }
        }
    }
}

/// Delete every transient artifact of a relocated record.
pub async fn cleanup_record(record: &ConversionRecord) -> CleanupReport {
    let mut report = CleanupReport::default();
    for artifact in record_artifacts(record) {
        let result = match artifact.kind {
            ArtifactKind::File => tokio::fs::remove_file(&artifact.path).await,
            ArtifactKind::Tree => tokio::fs::remove_dir_all(&artifact.path).await,
        };
        report.record(&artifact.path, result);
    }
    report
}

fn readable(entry: walkdir::Result<DirEntry>) -> Option<DirEntry> {
    entry
        .map_err(|e| warn!(error = %e, "skipping unreadable library entry"))
        .ok()
}

/// Delete `._` artifact files anywhere below `root`.
pub fn purge_hidden_artifacts(root: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();
    for entry in WalkDir::new(root).min_depth(1).into_iter().filter_map(readable) {
        if !entry.file_type().is_file() {
            continue;
        }
        let hidden = entry
            .file_name()
            .to_str()
            .map(is_hidden_artifact)
            .unwrap_or(false);
        if hidden {
            report.record(entry.path(), fs::remove_file(entry.path()));
        }
    }
    report
}

/// Delete directories below `root` that are empty, deepest first.
///
/// `root` itself is kept even when it ends up empty.
pub fn purge_empty_dirs(root: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();
    let walker = WalkDir::new(root).min_depth(1).contents_first(true);
    for entry in walker.into_iter().filter_map(readable) {
        if !entry.file_type().is_dir() {
            continue;
        }
        let is_empty = match fs::read_dir(entry.path()) {
            Ok(mut children) => children.next().is_none(),
            Err(_) => false,
        };
        if is_empty {
            report.record(entry.path(), fs::remove_dir(entry.path()));
        }
    }
    report
}

/// Segment maintenance: hidden artifacts first, then empty directories.
pub fn maintain_segment(root: &Path) -> MaintenanceReport {
    let artifacts = purge_hidden_artifacts(root);
    let dirs = purge_empty_dirs(root);
    MaintenanceReport {
        hidden_removed: artifacts.removed,
        dirs_removed: dirs.removed,
        failures: artifacts.failures.len() + dirs.failures.len(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub hidden_removed: usize,
    pub dirs_removed: usize,
    pub failures: usize,
}
