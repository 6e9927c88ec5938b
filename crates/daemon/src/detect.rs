//! Commercial detection and edit-list handling.
//!
//! Detection is best-effort: a detector that fails, or writes an edit list
//! that cannot be trusted, only means the recording is transcoded uncut.

use crate::progress::ProgressTracker;
use crate::record::ConversionRecord;
use crate::tool::{OutputStream, ToolInvocation, ToolRunner};
use recast_config::ToolsConfig;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Share of the recording a lone removal row must span to be degenerate.
pub const DEGENERATE_MIN_COVERAGE: f64 = 0.9;

/// Latest start, as a share of the recording, for a degenerate row.
pub const DEGENERATE_MAX_LEAD: f64 = 0.05;

/// Action column of an edit-list row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdlAction {
    Cut,
    Mute,
    SceneMarker,
    CommercialBreak,
}

impl EdlAction {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Cut),
            1 => Some(Self::Mute),
            2 => Some(Self::SceneMarker),
            3 => Some(Self::CommercialBreak),
            _ => None,
        }
    }

    /// Whether the span is removed from the output.
    pub fn removes_content(self) -> bool {
        matches!(self, Self::Cut | Self::CommercialBreak)
    }
}

/// One `start end action` row, times in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdlEntry {
    pub start: f64,
    pub end: f64,
    pub action: EdlAction,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditListError {
    #[error("line {line}: expected 3 columns, found {found}")]
    ColumnCount { line: usize, found: usize },

    #[error("line {line}: bad value {value:?}")]
    BadValue { line: usize, value: String },
}

/// Parsed edit list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditList {
    pub entries: Vec<EdlEntry>,
}

impl EditList {
    pub fn parse(text: &str) -> Result<Self, EditListError> {
        let mut entries = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let cols: Vec<&str> = raw.split_whitespace().collect();
            if cols.is_empty() {
                continue;
            }
            if cols.len() != 3 {
                return Err(EditListError::ColumnCount {
                    line,
                    found: cols.len(),
                });
            }
            let bad = |value: &str| EditListError::BadValue {
                line,
                value: value.to_string(),
            };
            let start: f64 = cols[0].parse().map_err(|_| bad(cols[0]))?;
            let end: f64 = cols[1].parse().map_err(|_| bad(cols[1]))?;
            let action = cols[2]
                .parse::<u8>()
                .ok()
                .and_then(EdlAction::from_code)
                .ok_or_else(|| bad(cols[2]))?;
            entries.push(EdlEntry { start, end, action });
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A lone removal row that starts at the beginning and runs for nearly
    /// the whole recording means the detector found no programme boundary
    /// and flagged everything as a commercial.
    ///
    /// Without a known duration nothing is degenerate.
    pub fn is_degenerate(&self, duration_secs: Option<f64>) -> bool {
        let [only] = self.entries.as_slice() else {
            return false;
        };
        let Some(duration) = duration_secs.filter(|d| *d > 0.0) else {
            return false;
        };
        only.action.removes_content()
            && only.start <= duration * DEGENERATE_MAX_LEAD
            && only.end - only.start >= duration * DEGENERATE_MIN_COVERAGE
    }
}

/// What the detector stage produced for a record.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// Usable edit list on disk.
    EditList { path: PathBuf, cuts: usize },
    /// Detector ran but left nothing to cut.
    NoEditList,
    /// Degenerate edit list, deleted.
    Discarded,
    /// Detector could not run or exited non-zero.
    DetectorFailed,
}

impl DetectionOutcome {
    /// Edit list to hand to the transcoder, if any.
    pub fn edl_path(&self) -> Option<&Path> {
        match self {
            Self::EditList { path, .. } => Some(path),
            _ => None,
        }
    }
}

fn frame_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+) frames").expect("frame pattern is valid"))
}

/// Frame index reported on a detector progress line.
pub fn parse_frame_progress(line: &str) -> Option<u64> {
    frame_pattern()
        .captures(line)
        .and_then(|caps| caps[1].parse().ok())
}

/// Feed one detector output line into the progress tracker.
pub fn track_detector_line(tracker: &mut ProgressTracker, line: &str) {
    if let Some(frame) = parse_frame_progress(line) {
        tracker.update(frame as f64);
    }
}

pub fn build_detector_invocation(
    program: &str,
    profile: &Path,
    record: &ConversionRecord,
) -> ToolInvocation {
    ToolInvocation::new(program, OutputStream::Stderr)
        .arg("-q")
        .arg("--ini")
        .arg(profile)
        .arg(&record.original_path)
}

/// Run the detector against the original recording and vet its edit list.
///
/// Exit codes listed in `tools.detector_success_codes` count as success;
/// comskip exits with 1 when it found commercials.
pub async fn detect_commercials(
    runner: &dyn ToolRunner,
    tools: &ToolsConfig,
    record: &ConversionRecord,
) -> DetectionOutcome {
    let invocation = build_detector_invocation(&tools.detector, &tools.detector_ini, record);
    let total = record.frames.unwrap_or(0) as f64;
    let mut tracker = ProgressTracker::new("detect", record.base_name.as_str(), total);

    let result = runner
        .run(&invocation, &mut |line: &str| track_detector_line(&mut tracker, line))
        .await;

    match result {
        Ok(exit) if exit.code.is_some_and(|c| tools.detector_success_codes.contains(&c)) => {}
        Ok(exit) => {
            warn!(recording = %record.base_name, %exit, "commercial detection failed, continuing without cuts");
            return DetectionOutcome::DetectorFailed;
        }
        Err(e) => {
            warn!(recording = %record.base_name, error = %e, "commercial detector could not run, continuing without cuts");
            return DetectionOutcome::DetectorFailed;
        }
    }

    vet_edit_list(&record.edl_path(), record.duration_secs).await
}

/// Read the edit list at `path` and apply the degenerate-result rule
/// against a recording of `duration_secs`.
pub async fn vet_edit_list(path: &Path, duration_secs: Option<f64>) -> DetectionOutcome {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no edit list written");
            return DetectionOutcome::NoEditList;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "edit list unreadable, ignoring it");
            return DetectionOutcome::NoEditList;
        }
    };

    let list = match EditList::parse(&text) {
        Ok(list) => list,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "edit list malformed, ignoring it");
            return DetectionOutcome::NoEditList;
        }
    };

    if list.is_empty() {
        return DetectionOutcome::NoEditList;
    }

    if list.is_degenerate(duration_secs) {
        warn!(path = %path.display(), "detector flagged the whole recording, discarding edit list");
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "failed to delete degenerate edit list");
        }
        return DetectionOutcome::Discarded;
    }

    info!(path = %path.display(), cuts = list.entries.len(), "edit list accepted");
    DetectionOutcome::EditList {
        path: path.to_path_buf(),
        cuts: list.entries.len(),
    }
}
