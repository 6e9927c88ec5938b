//! Per-recording conversion pipeline and segment sweeps.
//!
//! One record is carried through every stage before the next one starts.
//! A fatal stage error abandons the record and leaves its files in place;
//! the next sweep rediscovers it from scratch.

use crate::cleanup::{cleanup_record, maintain_segment, MaintenanceReport};
use crate::detect::{detect_commercials, DetectionOutcome};
use crate::metadata::{extract_metadata, MetadataParseError};
use crate::probe::{count_frames, ProbeError};
use crate::record::{derive_record, ConversionRecord, MalformedPathError, Segment};
use crate::relocate::{relocate, RelocationError};
use crate::scan::scan_segment;
use crate::tool::{ProcessRunner, ToolRunner};
use crate::transcode::{transcode, TranscodeError};
use recast_config::Config;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};

/// Furthest stage a record has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordState {
    Discovered,
    MetadataParsed,
    FrameCounted,
    CommercialsDetected,
    Transcoded,
    Relocated,
    CleanedUp,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordState::Discovered => write!(f, "discovered"),
            RecordState::MetadataParsed => write!(f, "metadata_parsed"),
            RecordState::FrameCounted => write!(f, "frame_counted"),
            RecordState::CommercialsDetected => write!(f, "commercials_detected"),
            RecordState::Transcoded => write!(f, "transcoded"),
            RecordState::Relocated => write!(f, "relocated"),
            RecordState::CleanedUp => write!(f, "cleaned_up"),
        }
    }
}

/// Stage failures that abandon a record.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Metadata extraction failed: {0}")]
    Metadata(#[from] MetadataParseError),

    #[error("Frame count failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("Transcode failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Relocation failed: {0}")]
    Relocation(#[from] RelocationError),
}

/// How one record left the pipeline.
#[derive(Debug)]
pub enum RecordOutcome {
    /// Relocated and cleaned up. Cleanup failures are not fatal.
    Completed {
        record: Box<ConversionRecord>,
        detection: DetectionOutcome,
        cleanup_failures: usize,
    },
    /// Stopped after `reached`; files are left for the next sweep.
    Abandoned {
        reached: RecordState,
        error: PipelineError,
    },
}

/// Counts for one segment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentReport {
    pub segment: String,
    pub discovered: usize,
    pub completed: usize,
    pub abandoned: usize,
    /// Sidecars whose names could not be turned into a record.
    pub rejected: usize,
    pub missing_root: bool,
    pub maintenance: MaintenanceReport,
}

/// Counts for one full sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub segments: Vec<SegmentReport>,
}

impl SweepReport {
    pub fn discovered(&self) -> usize {
        self.segments.iter().map(|s| s.discovered).sum()
    }

    pub fn completed(&self) -> usize {
        self.segments.iter().map(|s| s.completed).sum()
    }

    pub fn abandoned(&self) -> usize {
        self.segments.iter().map(|s| s.abandoned).sum()
    }

    pub fn rejected(&self) -> usize {
        self.segments.iter().map(|s| s.rejected).sum()
    }
}

/// The conversion pipeline, bound to a configuration and a tool runner.
pub struct Pipeline {
    config: Config,
    runner: Arc<dyn ToolRunner>,
}

impl Pipeline {
    pub fn new(config: Config, runner: Arc<dyn ToolRunner>) -> Self {
        Self { config, runner }
    }

    /// Pipeline that spawns the real external tools.
    pub fn with_process_runner(config: Config) -> Self {
        Self::new(config, Arc::new(ProcessRunner))
    }

    /// Configured segments, in sweep order.
    pub fn segments(&self) -> Vec<Segment> {
        Segment::from_library(&self.config.library)
    }

    /// Segment for `name`, whether or not it is configured.
    pub fn segment(&self, name: &str) -> Segment {
        let library = &self.config.library;
        Segment::new(name, &library.source_root, &library.destination_root)
    }

    /// Carry one discovered sidecar through every stage.
    ///
    /// Returns `Err` only when the sidecar name cannot be turned into a
    /// record; stage failures come back as [`RecordOutcome::Abandoned`].
    pub async fn process_record(
        &self,
        segment: &Segment,
        sidecar: &Path,
    ) -> Result<RecordOutcome, MalformedPathError> {
        let mut record = derive_record(sidecar, segment)?;
        let mut reached = RecordState::Discovered;
        info!(state = %reached, "processing recording");

        match self.drive(&mut record, &mut reached).await {
            Ok((detection, cleanup_failures)) => Ok(RecordOutcome::Completed {
                record: Box::new(record),
                detection,
                cleanup_failures,
            }),
            Err(error) => {
                error!(state = %reached, error = %error, "abandoning recording until next sweep");
                Ok(RecordOutcome::Abandoned { reached, error })
            }
        }
    }

    async fn drive(
        &self,
        record: &mut ConversionRecord,
        reached: &mut RecordState,
    ) -> Result<(DetectionOutcome, usize), PipelineError> {
        let tools = &self.config.tools;
        let runner = self.runner.as_ref();

        if is_published(record).await {
            info!(destination = %record.destination_path.display(), "already relocated, finishing cleanup");
            advance(reached, RecordState::Relocated);
            let failures = finish_record(record, reached).await;
            return Ok((DetectionOutcome::NoEditList, failures));
        }

        extract_metadata(record).await?;
        advance(reached, RecordState::MetadataParsed);

        let frames = count_frames(runner, &tools.probe, record).await?;
        advance(reached, RecordState::FrameCounted);
        info!(frames, "frame count");

        let detection = detect_commercials(runner, tools, record).await;
        advance(reached, RecordState::CommercialsDetected);

        transcode(
            runner,
            &tools.transcoder,
            &self.config.transcode,
            record,
            detection.edl_path(),
        )
        .await?;
        advance(reached, RecordState::Transcoded);

        let bytes = relocate(record).await?;
        advance(reached, RecordState::Relocated);
        info!(destination = %record.destination_path.display(), bytes, "relocated");

        let failures = finish_record(record, reached).await;
        Ok((detection, failures))
    }

    /// Process every recording in a segment, then run maintenance on it.
    pub async fn run_segment(&self, segment: &Segment) -> SegmentReport {
        let mut report = SegmentReport {
            segment: segment.name.clone(),
            ..Default::default()
        };

        if !segment.source_root.is_dir() {
            warn!(segment = %segment.name, root = %segment.source_root.display(), "segment root missing, skipping");
            report.missing_root = true;
            return report;
        }

        for sidecar in scan_segment(&segment.source_root) {
            report.discovered += 1;
            let span = info_span!(
                "record",
                segment = %segment.name,
                recording = %sidecar.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
            );
            match self.process_record(segment, &sidecar).instrument(span).await {
                Ok(RecordOutcome::Completed { .. }) => report.completed += 1,
                Ok(RecordOutcome::Abandoned { .. }) => report.abandoned += 1,
                Err(e) => {
                    warn!(segment = %segment.name, error = %e, "rejecting sidecar");
                    report.rejected += 1;
                }
            }
        }

        let root = segment.source_root.clone();
        match tokio::task::spawn_blocking(move || maintain_segment(&root)).await {
            Ok(maintenance) => report.maintenance = maintenance,
            Err(e) => warn!(segment = %segment.name, error = %e, "segment maintenance aborted"),
        }

        info!(
            segment = %segment.name,
            discovered = report.discovered,
            completed = report.completed,
            abandoned = report.abandoned,
            rejected = report.rejected,
            "segment done"
        );
        report
    }

    /// One pass over every configured segment, in configured order.
    pub async fn run_sweep(&self) -> SweepReport {
        let mut sweep = SweepReport::default();
        for segment in self.segments() {
            sweep.segments.push(self.run_segment(&segment).await);
        }
        sweep
    }

    /// Discover a segment's recordings and read their metadata without
    /// running any tool or touching the filesystem.
    pub async fn inspect_segment(&self, segment: &Segment) -> Vec<ConversionRecord> {
        let mut records = Vec::new();
        for sidecar in scan_segment(&segment.source_root) {
            let mut record = match derive_record(&sidecar, segment) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "rejecting sidecar");
                    continue;
                }
            };
            if let Err(e) = extract_metadata(&mut record).await {
                warn!(error = %e, "skipping unreadable sidecar");
                continue;
            }
            records.push(record);
        }
        records
    }
}

/// A record whose original is gone but whose output already sits at its
/// destination was interrupted during cleanup.
async fn is_published(record: &ConversionRecord) -> bool {
    let original = tokio::fs::try_exists(&record.original_path).await.unwrap_or(true);
    let published = tokio::fs::try_exists(&record.destination_path).await.unwrap_or(false);
    !original && published
}

async fn finish_record(record: &ConversionRecord, reached: &mut RecordState) -> usize {
    let cleanup = cleanup_record(record).await;
    advance(reached, RecordState::CleanedUp);
    info!(
        removed = cleanup.removed,
        failures = cleanup.failures.len(),
        "cleaned up"
    );
    cleanup.failures.len()
}

fn advance(reached: &mut RecordState, next: RecordState) {
    debug_assert!(next > *reached, "record states only move forward");
    *reached = next;
    info!(state = %next, "stage complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::scripted::{ScriptedRunner, ScriptedTool};
    use crate::tool::ToolInvocation;
    use recast_config::{LibraryConfig, ToolsConfig, TranscodeConfig};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> Config {
        Config {
            library: LibraryConfig {
                source_root: root.join("src"),
                destination_root: root.join("plex"),
                segments: vec!["tv/".to_string(), "kids/".to_string()],
                idle_interval_secs: 1,
            },
            tools: ToolsConfig {
                probe: "mediainfo".to_string(),
                detector: "comskip".to_string(),
                detector_ini: PathBuf::from("comskip.ini"),
                transcoder: "ffmpeg".to_string(),
                ..ToolsConfig::default()
            },
            transcode: TranscodeConfig::default(),
        }
    }

    fn write_output(inv: &ToolInvocation) {
        let out = inv.args.last().expect("output path is last");
        fs::write(out, b"encoded").unwrap();
    }

    fn healthy_runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .with_tool("mediainfo", ScriptedTool::new().lines(&["1000"]))
            .with_tool("comskip", ScriptedTool::new().lines(&["500 frames", "1000 frames"]))
            .with_tool(
                "ffmpeg",
                ScriptedTool::new().lines(&["50 %", "100 %"]).effect(write_output),
            )
    }

    fn add_recording(sidecar: &Path, metadata: &str) {
        fs::create_dir_all(sidecar.parent().unwrap()).unwrap();
        fs::write(sidecar, metadata).unwrap();
        let name = sidecar.file_name().unwrap().to_str().unwrap();
        let media = sidecar.with_file_name(name.strip_suffix(".txt").unwrap());
        fs::write(media, b"raw recording").unwrap();
    }

    fn pipeline(temp: &TempDir, runner: Arc<ScriptedRunner>) -> Pipeline {
        Pipeline::new(test_config(temp.path()), runner)
    }

    #[tokio::test]
    async fn test_sweep_converts_and_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        add_recording(&src.join("tv/Nova/Nova S01E02.mpg.txt"), "seriesTitle : Nova\n");
        add_recording(&src.join("kids/season1/ep1.ts.txt"), "seriesTitle : Cartoons\n");
        let runner = Arc::new(healthy_runner());
        let pipeline = pipeline(&temp, runner.clone());

        let first = pipeline.run_sweep().await;

        assert_eq!(first.discovered(), 2);
        assert_eq!(first.completed(), 2);
        assert_eq!(first.abandoned(), 0);
        assert_eq!(first.segments[0].segment, "tv/");
        assert_eq!(first.segments[1].segment, "kids/");
        let plex = temp.path().join("plex");
        assert_eq!(fs::read(plex.join("tv/Nova/Nova S01E02.mp4")).unwrap(), b"encoded");
        assert_eq!(fs::read(plex.join("kids/season1/ep1.mp4")).unwrap(), b"encoded");
        assert!(!src.join("tv/Nova/Nova S01E02.mpg").exists());
        assert!(!src.join("tv/Nova/Nova S01E02.mp4").exists());
        // Emptied recording directories are swept away, segment roots stay
        assert!(!src.join("tv/Nova").exists());
        assert!(src.join("tv").exists());

        let calls_after_first = runner.invocations().len();
        let second = pipeline.run_sweep().await;

        assert_eq!(second.discovered(), 0);
        assert_eq!(runner.invocations().len(), calls_after_first);
    }

    #[tokio::test]
    async fn test_probe_failure_abandons_and_preserves_files() {
        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join("src/tv/Ep1.mpg.txt");
        add_recording(&sidecar, "seriesTitle : Show\n");
        let runner = Arc::new(
            ScriptedRunner::new()
                .with_tool("mediainfo", ScriptedTool::new().exit(1))
                .with_tool("ffmpeg", ScriptedTool::new().effect(write_output)),
        );
        let pipeline = pipeline(&temp, runner.clone());
        let segment = pipeline.segment("tv/");

        let outcome = pipeline.process_record(&segment, &sidecar).await.unwrap();

        match outcome {
            RecordOutcome::Abandoned { reached, error } => {
                assert_eq!(reached, RecordState::MetadataParsed);
                assert!(matches!(error, PipelineError::Probe(_)));
            }
            other => panic!("expected abandonment, got {:?}", other),
        }
        assert_eq!(runner.calls_to("ffmpeg"), 0);
        assert!(sidecar.exists());
        assert!(temp.path().join("src/tv/Ep1.mpg").exists());
    }

    #[tokio::test]
    async fn test_transcode_failure_abandons_record_not_segment() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        add_recording(&src.join("tv/A.mpg.txt"), "seriesTitle : A\n");
        add_recording(&src.join("tv/B.mpg.txt"), "seriesTitle : B\n");
        let runner = Arc::new(
            ScriptedRunner::new()
                .with_tool("mediainfo", ScriptedTool::new().lines(&["10"]))
                .with_tool("comskip", ScriptedTool::new())
                .with_tool("ffmpeg", ScriptedTool::new().exit(1)),
        );
        let pipeline = pipeline(&temp, runner.clone());

        let report = pipeline.run_segment(&pipeline.segment("tv/")).await;

        assert_eq!(report.discovered, 2);
        assert_eq!(report.abandoned, 2);
        assert_eq!(runner.calls_to("ffmpeg"), 2);
        assert!(src.join("tv/A.mpg.txt").exists());
        assert!(src.join("tv/B.mpg").exists());
        assert!(!temp.path().join("plex/tv/A.mp4").exists());
    }

    #[tokio::test]
    async fn test_degenerate_edit_list_transcodes_without_cuts() {
        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join("src/tv/Game.ts.txt");
        add_recording(&sidecar, "seriesTitle : Game\n");
        let edl = temp.path().join("src/tv/Game.edl");
        let runner = Arc::new(
            ScriptedRunner::new()
                .with_tool("mediainfo", ScriptedTool::new().lines(&["1000 7200000"]))
                .with_tool(
                    "comskip",
                    ScriptedTool::new().effect(move |_| fs::write(&edl, "0\t7200\t3\n").unwrap()),
                )
                .with_tool("ffmpeg", ScriptedTool::new().effect(write_output)),
        );
        let pipeline = pipeline(&temp, runner.clone());
        let segment = pipeline.segment("tv/");

        let outcome = pipeline.process_record(&segment, &sidecar).await.unwrap();

        assert!(matches!(
            outcome,
            RecordOutcome::Completed {
                detection: DetectionOutcome::Discarded,
                cleanup_failures: 0,
                ..
            }
        ));
        let ffmpeg = runner
            .invocations()
            .into_iter()
            .find(|inv| inv.program == "ffmpeg")
            .unwrap();
        assert!(!ffmpeg.args_lossy().iter().any(|a| a == "-edl"));
    }

    #[tokio::test]
    async fn test_accepted_edit_list_is_passed_to_transcoder() {
        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join("src/tv/Show.mpg.txt");
        add_recording(&sidecar, "seriesTitle : Show\n");
        let edl = temp.path().join("src/tv/Show.edl");
        let edl_for_tool = edl.clone();
        let runner = Arc::new(
            ScriptedRunner::new()
                .with_tool("mediainfo", ScriptedTool::new().lines(&["1000"]))
                .with_tool(
                    "comskip",
                    ScriptedTool::new().effect(move |_| {
                        fs::write(&edl_for_tool, "60\t240\t0\n900\t1080\t0\n").unwrap()
                    }),
                )
                .with_tool("ffmpeg", ScriptedTool::new().effect(write_output)),
        );
        let pipeline = pipeline(&temp, runner.clone());

        let report = pipeline.run_segment(&pipeline.segment("tv/")).await;

        assert_eq!(report.completed, 1);
        let ffmpeg = runner
            .invocations()
            .into_iter()
            .find(|inv| inv.program == "ffmpeg")
            .unwrap();
        let args = ffmpeg.args_lossy();
        let pos = args.iter().position(|a| a == "-edl").unwrap();
        assert_eq!(PathBuf::from(&args[pos + 1]), edl);
        // Cleanup removes the edit list with the other artifacts
        assert!(!edl.exists());
    }

    #[tokio::test]
    async fn test_restart_after_transcode_rederives_and_completes() {
        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join("src/tv/season2/Ep5.mpg.txt");
        add_recording(&sidecar, "seriesTitle : Show\n");
        // Left behind by a run killed between transcode and relocation
        fs::write(temp.path().join("src/tv/season2/Ep5.mp4"), b"half-written").unwrap();
        fs::create_dir_all(temp.path().join("plex/tv/season2")).unwrap();
        fs::write(temp.path().join("plex/tv/season2/Ep5.mp4.partial"), b"trunc").unwrap();

        let runner = Arc::new(healthy_runner());
        let pipeline = pipeline(&temp, runner.clone());
        let segment = pipeline.segment("tv/");
        let before = derive_record(&sidecar, &segment).unwrap();

        let outcome = pipeline.process_record(&segment, &sidecar).await.unwrap();

        match outcome {
            RecordOutcome::Completed { record, .. } => {
                assert_eq!(record.destination_path, before.destination_path);
                assert_eq!(record.base_path, before.base_path);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        let dest = temp.path().join("plex/tv/season2/Ep5.mp4");
        assert_eq!(fs::read(&dest).unwrap(), b"encoded");
        assert!(!temp.path().join("plex/tv/season2/Ep5.mp4.partial").exists());
        assert_eq!(runner.calls_to("ffmpeg"), 1);
    }

    #[tokio::test]
    async fn test_relocation_failure_abandons_and_preserves_files() {
        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join("src/tv/Ep3.mpg.txt");
        add_recording(&sidecar, "seriesTitle : Show\n");
        // A plain file where the destination library should be
        fs::write(temp.path().join("plex"), b"not a directory").unwrap();
        let runner = Arc::new(healthy_runner());
        let pipeline = pipeline(&temp, runner.clone());
        let segment = pipeline.segment("tv/");

        let outcome = pipeline.process_record(&segment, &sidecar).await.unwrap();

        match outcome {
            RecordOutcome::Abandoned { reached, error } => {
                assert_eq!(reached, RecordState::Transcoded);
                assert!(matches!(error, PipelineError::Relocation(_)));
            }
            other => panic!("expected abandonment, got {:?}", other),
        }
        assert!(sidecar.exists());
        assert!(temp.path().join("src/tv/Ep3.mpg").exists());
        assert!(temp.path().join("src/tv/Ep3.mp4").exists());
    }

    #[tokio::test]
    async fn test_interrupted_cleanup_is_finished_without_tools() {
        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join("src/tv/Ep4.mpg.txt");
        add_recording(&sidecar, "seriesTitle : Show\n");
        // Killed after relocation, once cleanup had removed the original
        fs::remove_file(temp.path().join("src/tv/Ep4.mpg")).unwrap();
        fs::write(temp.path().join("src/tv/Ep4.mp4"), b"encoded").unwrap();
        fs::create_dir_all(temp.path().join("plex/tv")).unwrap();
        fs::write(temp.path().join("plex/tv/Ep4.mp4"), b"encoded").unwrap();
        let runner = Arc::new(healthy_runner());
        let pipeline = pipeline(&temp, runner.clone());

        let report = pipeline.run_segment(&pipeline.segment("tv/")).await;

        assert_eq!(report.completed, 1);
        assert!(runner.invocations().is_empty());
        assert!(!sidecar.exists());
        assert!(!temp.path().join("src/tv/Ep4.mp4").exists());
        assert_eq!(fs::read(temp.path().join("plex/tv/Ep4.mp4")).unwrap(), b"encoded");
    }

    #[tokio::test]
    async fn test_malformed_sidecar_is_rejected_without_stopping_segment() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("tv")).unwrap();
        fs::write(src.join("tv/.mpg.txt"), "seriesTitle : Nameless\n").unwrap();
        add_recording(&src.join("tv/Real.mpg.txt"), "seriesTitle : Real\n");
        let pipeline = pipeline(&temp, Arc::new(healthy_runner()));

        let report = pipeline.run_segment(&pipeline.segment("tv/")).await;

        assert_eq!(report.discovered, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.completed, 1);
        assert!(src.join("tv/.mpg.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_segment_root_is_skipped() {
        let temp = TempDir::new().unwrap();
        add_recording(&temp.path().join("src/kids/ep1.mpg.txt"), "seriesTitle : K\n");
        let pipeline = pipeline(&temp, Arc::new(healthy_runner()));

        let sweep = pipeline.run_sweep().await;

        assert!(sweep.segments[0].missing_root);
        assert_eq!(sweep.segments[1].completed, 1);
    }

    #[tokio::test]
    async fn test_inspect_reads_metadata_only() {
        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join("src/tv/2021/Special.mpg.txt");
        add_recording(&sidecar, "seriesTitle : Specials\nepisodeTitle : Holiday\n");
        let runner = Arc::new(healthy_runner());
        let pipeline = pipeline(&temp, runner.clone());

        let records = pipeline.inspect_segment(&pipeline.segment("tv/")).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata.series_title.as_deref(), Some("Specials"));
        assert_eq!(records[0].metadata.season.as_deref(), Some("2021"));
        assert_eq!(records[0].metadata.episode.as_deref(), Some("Special"));
        assert_eq!(records[0].frames, None);
        assert!(runner.invocations().is_empty());
        assert!(sidecar.exists());
        assert!(!temp.path().join("plex").exists());
    }

    #[test]
    fn test_record_state_order_and_display() {
        assert!(RecordState::Discovered < RecordState::MetadataParsed);
        assert!(RecordState::Relocated < RecordState::CleanedUp);
        assert_eq!(RecordState::CommercialsDetected.to_string(), "commercials_detected");
    }
}
