//! Frame counter backed by an external media probe.

use crate::record::ConversionRecord;
use crate::tool::{OutputStream, ToolExit, ToolInvocation, ToolRunner};
use thiserror::Error;

/// Probe output template: frame count, then duration in milliseconds.
const PROBE_TEMPLATE: &str = "--Output=Video;%FrameCount% %Duration%";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run probe: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe failed with {0}")]
    Failed(ToolExit),

    #[error("probe output is not a frame count: {0:?}")]
    Unparseable(String),
}

/// What the probe reported for a recording.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReport {
    pub frames: u64,
    /// Absent when the probe could not tell.
    pub duration_secs: Option<f64>,
}

/// Build the probe command for a recording.
pub fn build_probe_invocation(program: &str, record: &ConversionRecord) -> ToolInvocation {
    ToolInvocation::new(program, OutputStream::Stdout)
        .arg(PROBE_TEMPLATE)
        .arg(&record.original_path)
}

/// Parse the first non-empty output line.
///
/// The frame count is required; a missing or unreadable duration is not an
/// error.
pub fn parse_probe_output(lines: &[String]) -> Result<ProbeReport, ProbeError> {
    let first = lines
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let mut fields = first.split_whitespace();
    let frames = fields
        .next()
        .and_then(|f| f.parse::<u64>().ok())
        .ok_or_else(|| ProbeError::Unparseable(first.to_string()))?;
    let duration_secs = fields
        .next()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| ms / 1000.0);
    Ok(ProbeReport {
        frames,
        duration_secs,
    })
}

/// Count the frames of the record's original file and store the result,
/// along with the duration when the probe reports one.
pub async fn count_frames(
    runner: &dyn ToolRunner,
    program: &str,
    record: &mut ConversionRecord,
) -> Result<u64, ProbeError> {
    let invocation = build_probe_invocation(program, record);
    let mut lines = Vec::new();
    let exit = runner
        .run(&invocation, &mut |line: &str| lines.push(line.to_string()))
        .await?;

    if !exit.success() {
        return Err(ProbeError::Failed(exit));
    }

    let report = parse_probe_output(&lines)?;
    record.frames = Some(report.frames);
    record.duration_secs = report.duration_secs;
    Ok(report.frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{derive_record, Segment};
    use crate::tool::scripted::{ScriptedRunner, ScriptedTool};
    use std::path::Path;

    fn record() -> ConversionRecord {
        let seg = Segment::new("tv/", Path::new("/src/"), Path::new("/plex/"));
        derive_record(Path::new("/src/tv/Ep1.mpg.txt"), &seg).unwrap()
    }

    #[test]
    fn test_probe_invocation() {
        let inv = build_probe_invocation("mediainfo", &record());
        assert_eq!(inv.program, "mediainfo");
        assert_eq!(
            inv.args_lossy(),
            vec!["--Output=Video;%FrameCount% %Duration%", "/src/tv/Ep1.mpg"]
        );
        assert_eq!(inv.watch, OutputStream::Stdout);
    }

    #[test]
    fn test_parse_probe_output() {
        let lines = vec!["  ".to_string(), " 107892 3600000 ".to_string()];
        let report = parse_probe_output(&lines).unwrap();
        assert_eq!(report.frames, 107892);
        assert_eq!(report.duration_secs, Some(3600.0));

        let report = parse_probe_output(&["53946".to_string()]).unwrap();
        assert_eq!(report.frames, 53946);
        assert_eq!(report.duration_secs, None);

        let report = parse_probe_output(&["53946 n/a".to_string()]).unwrap();
        assert_eq!(report.duration_secs, None);
    }

    #[test]
    fn test_parse_probe_output_requires_frame_count() {
        assert!(matches!(
            parse_probe_output(&["n/a".to_string()]),
            Err(ProbeError::Unparseable(s)) if s == "n/a"
        ));
        assert!(matches!(parse_probe_output(&[]), Err(ProbeError::Unparseable(_))));
    }

    #[tokio::test]
    async fn test_count_frames_stores_result() {
        let runner = ScriptedRunner::new()
            .with_tool("mediainfo", ScriptedTool::new().lines(&["53946 1800000"]));
        let mut rec = record();

        let frames = count_frames(&runner, "mediainfo", &mut rec).await.unwrap();
        assert_eq!(frames, 53946);
        assert_eq!(rec.frames, Some(53946));
        assert_eq!(rec.duration_secs, Some(1800.0));
    }

    #[tokio::test]
    async fn test_count_frames_fails_on_nonzero_exit() {
        let runner = ScriptedRunner::new()
            .with_tool("mediainfo", ScriptedTool::new().lines(&["123"]).exit(1));
        let mut rec = record();

        let err = count_frames(&runner, "mediainfo", &mut rec).await.unwrap_err();
        assert!(matches!(err, ProbeError::Failed(ToolExit { code: Some(1) })));
        assert_eq!(rec.frames, None);
    }

    #[tokio::test]
    async fn test_count_frames_fails_when_probe_missing() {
        let runner = ScriptedRunner::new();
        let mut rec = record();

        let err = count_frames(&runner, "mediainfo", &mut rec).await.unwrap_err();
        assert!(matches!(err, ProbeError::Io(_)));
    }
}
