//! Conversion records and the path deriver.
//!
//! Every path the pipeline touches for a recording is computed here from the
//! sidecar path and its segment. Derivation does no I/O, so re-running it
//! after a crash yields exactly the same record.

use crate::metadata::RecordingMetadata;
use recast_config::LibraryConfig;
use serde::Serialize;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Suffix appended to a recording's filename to name its sidecar.
pub const SIDECAR_SUFFIX: &str = ".txt";
/// Program-stream recording extension.
pub const PROGRAM_STREAM_EXT: &str = ".mpg";
/// Transport-stream recording extension.
pub const TRANSPORT_STREAM_EXT: &str = ".ts";
/// Container extension of every transcoded output.
pub const OUTPUT_EXT: &str = ".mp4";

/// Sibling artifacts addressed off the base path.
pub const EDL_EXT: &str = ".edl";
pub const LOG_EXT: &str = ".log";
pub const TEXT_EXT: &str = ".txt";
pub const LOGO_EXT: &str = ".logo.txt";
/// Scratch directory suffix used by the transcode wrapper.
pub const SCRATCH_DIR_SUFFIX: &str = "_ffmpeg";

/// Sidecar file rejected before it enters the pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedPathError {
    #[error("not valid UTF-8: {}", .0.display())]
    NonUtf8(PathBuf),

    #[error("missing '.txt' sidecar suffix: {}", .0.display())]
    MissingSidecarSuffix(PathBuf),

    #[error("recording is neither .mpg nor .ts: {}", .0.display())]
    UnknownMediaSuffix(PathBuf),

    #[error("recording has an empty base name: {}", .0.display())]
    EmptyBaseName(PathBuf),

    #[error("{} is not under segment root {}", .path.display(), .root.display())]
    OutsideSegment { path: PathBuf, root: PathBuf },
}

/// One named subtree of the source library and its destination mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub name: String,
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
}

impl Segment {
    pub fn new(name: impl Into<String>, library_root: &Path, destination_library: &Path) -> Self {
        let name = name.into();
        Self {
            source_root: library_root.join(&name),
            destination_root: destination_library.join(&name),
            name,
        }
    }

    /// All configured segments, in configured order.
    pub fn from_library(library: &LibraryConfig) -> Vec<Segment> {
        library
            .segments
            .iter()
            .map(|name| Segment::new(name.as_str(), &library.source_root, &library.destination_root))
            .collect()
    }
}

/// The unit of work for one recording.
///
/// Identity is `original_path`. All fields except `metadata` and `frames`
/// are a pure function of the sidecar path and segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionRecord {
    pub segment: String,
    /// Directory holding the recording and all its artifacts.
    pub source_dir: PathBuf,
    /// Recording filename, e.g. `Ep1.mpg`.
    pub original_filename: String,
    /// Recording filename without media extension, e.g. `Ep1`.
    pub base_name: String,
    pub is_transport_stream: bool,
    pub original_path: PathBuf,
    /// `source_dir/base_name`; sibling artifacts hang off this.
    pub base_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub output_path: PathBuf,
    /// `source_dir` relative to the segment root.
    pub relative_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub destination_path: PathBuf,
    pub metadata: RecordingMetadata,
    /// Total video frames, set by the frame counter.
    pub frames: Option<u64>,
    /// Running time in seconds, when the frame counter could report it.
    pub duration_secs: Option<f64>,
}

impl ConversionRecord {
    /// `base_path` with `suffix` appended, e.g. `artifact(".edl")`.
    pub fn artifact(&self, suffix: &str) -> PathBuf {
        let mut path: OsString = self.base_path.as_os_str().to_owned();
        path.push(suffix);
        PathBuf::from(path)
    }

    pub fn edl_path(&self) -> PathBuf {
        self.artifact(EDL_EXT)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.artifact(SCRATCH_DIR_SUFFIX)
    }

    /// Name of the directory the recording sits in, if it has one.
    pub fn parent_dir_name(&self) -> Option<&str> {
        self.source_dir.file_name().and_then(|n| n.to_str())
    }

    /// Write the record as one line of JSON.
    pub fn write_json_line<W: Write>(&self, out: &mut W) -> io::Result<()> {
        serde_json::to_writer(&mut *out, self)?;
        writeln!(out)
    }
}

/// Derive a complete record (no metadata yet) from a discovered sidecar.
pub fn derive_record(sidecar: &Path, segment: &Segment) -> Result<ConversionRecord, MalformedPathError> {
    let sidecar_name = sidecar
        .file_name()
        .ok_or_else(|| MalformedPathError::MissingSidecarSuffix(sidecar.to_path_buf()))?
        .to_str()
        .ok_or_else(|| MalformedPathError::NonUtf8(sidecar.to_path_buf()))?;

    let original_filename = sidecar_name
        .strip_suffix(SIDECAR_SUFFIX)
        .ok_or_else(|| MalformedPathError::MissingSidecarSuffix(sidecar.to_path_buf()))?;

    let (base_name, is_transport_stream) =
        if let Some(base) = original_filename.strip_suffix(TRANSPORT_STREAM_EXT) {
            (base, true)
        } else if let Some(base) = original_filename.strip_suffix(PROGRAM_STREAM_EXT) {
            (base, false)
        } else {
            return Err(MalformedPathError::UnknownMediaSuffix(sidecar.to_path_buf()));
        };

    if base_name.is_empty() {
        return Err(MalformedPathError::EmptyBaseName(sidecar.to_path_buf()));
    }

    let source_dir = sidecar.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    let relative_dir = source_dir
        .strip_prefix(&segment.source_root)
        .map_err(|_| MalformedPathError::OutsideSegment {
            path: sidecar.to_path_buf(),
            root: segment.source_root.clone(),
        })?
        .to_path_buf();

    let output_filename = format!("{}{}", base_name, OUTPUT_EXT);
    let destination_dir = if relative_dir.as_os_str().is_empty() {
        segment.destination_root.clone()
    } else {
        segment.destination_root.join(&relative_dir)
    };

    Ok(ConversionRecord {
        segment: segment.name.clone(),
        original_path: source_dir.join(original_filename),
        base_path: source_dir.join(base_name),
        output_path: source_dir.join(&output_filename),
        sidecar_path: sidecar.to_path_buf(),
        destination_path: destination_dir.join(&output_filename),
        destination_dir,
        relative_dir,
        original_filename: original_filename.to_string(),
        base_name: base_name.to_string(),
        is_transport_stream,
        source_dir,
        metadata: RecordingMetadata::default(),
        frames: None,
        duration_secs: None,
    })
}
