//! Recast daemon
//!
//! Background service that finds finished recordings in a source library,
//! strips commercials, transcodes them and publishes the result into a
//! mirrored destination library.

pub mod cleanup;
pub mod daemon;
pub mod detect;
pub mod metadata;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod record;
pub mod relocate;
pub mod scan;
pub mod startup;
pub mod tool;
pub mod transcode;

pub use recast_config as config;
pub use recast_config::Config;
pub use cleanup::{cleanup_record, maintain_segment, CleanupError, CleanupReport, MaintenanceReport};
pub use daemon::{Daemon, DaemonError};
pub use detect::{detect_commercials, DetectionOutcome, EditList, EditListError};
pub use metadata::{extract_metadata, MetadataParseError, RecordingMetadata};
pub use pipeline::{Pipeline, PipelineError, RecordOutcome, RecordState, SegmentReport, SweepReport};
pub use probe::{count_frames, ProbeError};
pub use progress::ProgressTracker;
pub use record::{derive_record, ConversionRecord, MalformedPathError, Segment};
pub use relocate::{relocate, RelocationError};
pub use scan::scan_segment;
pub use startup::{check_tools_available, locate_program, run_startup_checks, StartupError};
pub use tool::{OutputStream, ProcessRunner, ToolExit, ToolInvocation, ToolRunner};
pub use transcode::{transcode, TranscodeError};
