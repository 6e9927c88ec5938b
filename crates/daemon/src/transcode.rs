//! Transcoder module.
//!
//! Builds the transcode wrapper command line from the record's metadata, the
//! configured quality profile and the optional edit list, then runs it while
//! tracking its percentage output.

use crate::progress::ProgressTracker;
use crate::record::ConversionRecord;
use crate::tool::{OutputStream, ToolExit, ToolInvocation, ToolRunner};
use recast_config::TranscodeConfig;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Fixed technical tags written on every output.
const FIXED_TAGS: &[(&str, &str)] = &[("hd_video", "2"), ("media_type", "10")];

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to run transcoder: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcoder failed with {0}")]
    Failed(ToolExit),
}

/// Metadata tags for a record, in command-line order.
///
/// Tags whose source field is unset are left out rather than written empty.
pub fn build_metadata_tags(record: &ConversionRecord) -> Vec<(&'static str, String)> {
    let meta = &record.metadata;
    let mut tags: Vec<(&'static str, String)> = Vec::new();
    let mut push = |key: &'static str, value: Option<&String>| {
        if let Some(value) = value {
            tags.push((key, value.clone()));
        }
    };

    push("title", meta.episode_title.as_ref());
    push("artist", meta.series_title.as_ref());
    push("album_artist", meta.series_title.as_ref());
    let album = match (&meta.series_title, &meta.season) {
        (Some(series), Some(season)) => Some(format!("{}, Season {}", series, season)),
        (Some(series), None) => Some(series.clone()),
        _ => None,
    };
    push("album", album.as_ref());
    push("comment", meta.description.as_ref());
    push("description", meta.description.as_ref());
    push("track", meta.episode.as_ref());
    push("show", meta.series_title.as_ref());
    push("episode_id", meta.program_id.as_ref());
    push("network", meta.callsign.as_ref());

    tags.extend(FIXED_TAGS.iter().map(|(k, v)| (*k, v.to_string())));
    tags
}

/// Build the transcode command line.
pub fn build_transcode_invocation(
    program: &str,
    profile: &TranscodeConfig,
    record: &ConversionRecord,
    edit_list: Option<&Path>,
) -> ToolInvocation {
    let mut inv = ToolInvocation::new(program, OutputStream::Stdout)
        .arg("-i")
        .arg(&record.original_path)
        .args(["-vcodec", profile.video_codec.as_str()])
        .args(["-preset", profile.preset.as_str()]);

    for (key, value) in build_metadata_tags(record) {
        inv = inv.arg("-metadata").arg(format!("{}={}", key, value));
    }

    inv = inv
        .args(["-noAC3", "-noStereo"])
        .arg("-threads")
        .arg(profile.threads.to_string())
        .args(["-map", "0:a:0"])
        .args(["-c:a", profile.audio_codec.as_str()])
        .args(["-b:a", profile.audio_bitrate.as_str()])
        .arg("-ac")
        .arg(profile.audio_channels.to_string())
        .arg("-metadata:s:a:0")
        .arg(format!("language={}", profile.audio_language))
        .arg("-crf")
        .arg(profile.crf.to_string())
        .args(["-vf", profile.video_filter.as_str()]);

    if let Some(edl) = edit_list {
        inv = inv.arg("-edl").arg(edl);
    }

    inv.arg(&record.output_path)
}

fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([\d.]+) %").expect("percent pattern is valid"))
}

/// Percentage reported on a transcoder progress line.
pub fn parse_percent_progress(line: &str) -> Option<f64> {
    percent_pattern()
        .captures(line.trim())
        .and_then(|caps| caps[1].parse().ok())
}

/// Feed one transcoder output line into the progress tracker.
pub fn track_transcoder_line(tracker: &mut ProgressTracker, line: &str) {
    if let Some(percent) = parse_percent_progress(line) {
        tracker.update(percent);
    }
}

/// Transcode the record's original file into its output path.
pub async fn transcode(
    runner: &dyn ToolRunner,
    program: &str,
    profile: &TranscodeConfig,
    record: &ConversionRecord,
    edit_list: Option<&Path>,
) -> Result<(), TranscodeError> {
    let invocation = build_transcode_invocation(program, profile, record, edit_list);
    let mut tracker = ProgressTracker::new("transcode", record.base_name.as_str(), 100.0);

    let exit = runner
        .run(&invocation, &mut |line: &str| track_transcoder_line(&mut tracker, line))
        .await?;

    if !exit.success() {
        return Err(TranscodeError::Failed(exit));
    }
    Ok(())
}
