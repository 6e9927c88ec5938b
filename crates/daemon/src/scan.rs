//! Scanner module for discovering unprocessed recordings in a segment.
//!
//! Walks a segment's source tree depth-first and lazily yields the sidecar
//! file of every recording still waiting to be converted. A recording drops
//! out of the scan once cleanup has removed its sidecar, which is what makes
//! re-running a sweep after a crash safe.

use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Sidecar suffixes recognised by the scanner.
pub const SIDECAR_SUFFIXES: &[&str] = &[".mpg.txt", ".ts.txt"];

/// Prefix of resource-fork droppings left behind by network file copies.
pub const HIDDEN_ARTIFACT_PREFIX: &str = "._";

/// Checks if a file name is one of those hidden artifacts.
pub fn is_hidden_artifact(name: &str) -> bool {
    name.starts_with(HIDDEN_ARTIFACT_PREFIX)
}

/// Checks if a file name is a recording sidecar worth processing.
pub fn is_sidecar_name(name: &str) -> bool {
    !is_hidden_artifact(name) && SIDECAR_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Lazy, depth-first sequence of sidecar paths under one root.
///
/// Entries within a directory are visited in file-name order so repeated
/// scans of an unchanged tree yield the same sequence. Memory use is bounded
/// by tree depth.
pub struct SidecarScan {
    inner: walkdir::IntoIter,
}

impl Iterator for SidecarScan {
    type Item = PathBuf;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable library entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Some(name) = entry.file_name().to_str() else {
                continue;
            };

            if is_sidecar_name(name) {
                return Some(entry.into_path());
            }
        }
    }
}

/// Starts a scan of `root`.
pub fn scan_segment(root: &Path) -> SidecarScan {
    SidecarScan {
        inner: WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter(),
    }
}
