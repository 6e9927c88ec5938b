//! Relocator module for publishing transcoded outputs into the destination library.
//!
//! The output is copied under a temporary `.partial` name next to its final
//! destination and renamed into place, so an interrupted copy never leaves a
//! truncated file where the media server would pick it up.

use crate::record::ConversionRecord;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors that can occur while relocating an output.
#[derive(Debug, Error)]
pub enum RelocationError {
    /// Failed to create the destination directory tree.
    #[error("Failed to create {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to copy the output file into the destination tree.
    #[error("Failed to copy {} to {}: {source}", .from.display(), .to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to move the finished copy into its final name.
    #[error("Failed to publish {}: {source}", .path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Temporary name used while a copy is in flight.
///
/// For example: `/plex/tv/ep1.mp4` -> `/plex/tv/ep1.mp4.partial`
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut partial: OsString = destination.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}

/// Copy `output` to `destination`, creating parent directories as needed.
///
/// Re-running over an existing destination replaces it. On failure the
/// source file is left untouched and any partial copy is removed.
pub async fn publish(output: &Path, destination_dir: &Path, destination: &Path) -> Result<u64, RelocationError> {
    fs::create_dir_all(destination_dir)
        .await
        .map_err(|source| RelocationError::CreateDir {
            path: destination_dir.to_path_buf(),
            source,
        })?;

    let partial = partial_path(destination);
    let bytes = match fs::copy(output, &partial).await {
        Ok(bytes) => bytes,
        Err(source) => {
            let _ = fs::remove_file(&partial).await;
            return Err(RelocationError::Copy {
                from: output.to_path_buf(),
                to: destination.to_path_buf(),
                source,
            });
        }
    };

    if let Err(source) = fs::rename(&partial, destination).await {
        let _ = fs::remove_file(&partial).await;
        return Err(RelocationError::Publish {
            path: destination.to_path_buf(),
            source,
        });
    }

    Ok(bytes)
}

/// Relocate a record's transcoded output into its mirrored destination.
pub async fn relocate(record: &ConversionRecord) -> Result<u64, RelocationError> {
    publish(&record.output_path, &record.destination_dir, &record.destination_path).await
}
