//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration parsed but describes an unusable library
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Source and destination library layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    /// Root of the recordings tree; every segment lives directly beneath it
    pub source_root: PathBuf,
    /// Root of the media-server library mirrored from `source_root`
    pub destination_root: PathBuf,
    /// Segment names, processed in this order on every sweep
    pub segments: Vec<String>,
    /// Seconds to idle between two full sweeps (default 60)
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
}

fn default_idle_interval_secs() -> u64 {
    60
}

impl LibraryConfig {
    /// Idle interval between sweeps as a `Duration`
    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }
}

/// External collaborator programs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// Frame-count probe
    #[serde(default = "default_probe")]
    pub probe: String,
    /// Commercial detector
    #[serde(default = "default_detector")]
    pub detector: String,
    /// Detection profile handed to the detector
    #[serde(default = "default_detector_ini")]
    pub detector_ini: PathBuf,
    /// Edit-list aware transcode wrapper
    #[serde(default = "default_transcoder")]
    pub transcoder: String,
    /// Detector exit codes that still mean an edit list was produced
    #[serde(default = "default_detector_success_codes")]
    pub detector_success_codes: Vec<i32>,
}

fn default_probe() -> String {
    "mediainfo".to_string()
}

fn default_detector() -> String {
    "comskip".to_string()
}

fn default_detector_ini() -> PathBuf {
    PathBuf::from("./comskip.ini")
}

fn default_transcoder() -> String {
    "./ffmpeg_edl_ac3.sh".to_string()
}

/// comskip exits with 1 when commercials were found
fn default_detector_success_codes() -> Vec<i32> {
    vec![0, 1]
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            probe: default_probe(),
            detector: default_detector(),
            detector_ini: default_detector_ini(),
            transcoder: default_transcoder(),
            detector_success_codes: default_detector_success_codes(),
        }
    }
}

/// Codec and quality profile used for every transcode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscodeConfig {
    pub video_codec: String,
    pub preset: String,
    /// Constant rate factor (lower is better quality)
    pub crf: u32,
    /// Video filter chain, deinterlace by default
    pub video_filter: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub audio_channels: u32,
    /// Language tag written onto the first audio stream
    pub audio_language: String,
    pub threads: u32,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx265".to_string(),
            preset: "fast".to_string(),
            crf: 19,
            video_filter: "yadif".to_string(),
            audio_codec: "libfdk_aac".to_string(),
            audio_bitrate: "768k".to_string(),
            audio_channels: 6,
            audio_language: "eng".to_string(),
            threads: 16,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub library: LibraryConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - RECAST_SOURCE_ROOT -> library.source_root
    /// - RECAST_DESTINATION_ROOT -> library.destination_root
    /// - RECAST_SEGMENTS -> library.segments (comma-separated)
    /// - RECAST_IDLE_INTERVAL_SECS -> library.idle_interval_secs
    /// - RECAST_DETECTOR_INI -> tools.detector_ini
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RECAST_SOURCE_ROOT") {
            if !val.is_empty() {
                self.library.source_root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("RECAST_DESTINATION_ROOT") {
            if !val.is_empty() {
                self.library.destination_root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("RECAST_SEGMENTS") {
            let segments: Vec<String> = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !segments.is_empty() {
                self.library.segments = segments;
            }
        }

        if let Ok(val) = env::var("RECAST_IDLE_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.library.idle_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("RECAST_DETECTOR_INI") {
            if !val.is_empty() {
                self.tools.detector_ini = PathBuf::from(val);
            }
        }
    }

    /// Check that the library layout is usable
    ///
    /// Segments must be relative, free of `..`, unique, and at least one must
    /// be configured. The idle interval must be at least one second.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let segments = &self.library.segments;
        if segments.is_empty() {
            return Err(ConfigError::Invalid(
                "library.segments must name at least one segment".to_string(),
            ));
        }

        for (idx, segment) in segments.iter().enumerate() {
            let path = Path::new(segment);
            if segment.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "segment #{} is blank",
                    idx + 1
                )));
            }
            if path.is_absolute() || path.has_root() {
                return Err(ConfigError::Invalid(format!(
                    "segment '{}' must be relative to library.source_root",
                    segment
                )));
            }
            if path.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(ConfigError::Invalid(format!(
                    "segment '{}' must not contain '..'",
                    segment
                )));
            }
            if segments[..idx].iter().any(|other| Path::new(other) == path) {
                return Err(ConfigError::Invalid(format!(
                    "segment '{}' is listed more than once",
                    segment
                )));
            }
        }

        if self.library.idle_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "library.idle_interval_secs must be at least 1".to_string(),
            ));
        }

        if self.tools.detector_success_codes.is_empty() {
            return Err(ConfigError::Invalid(
                "tools.detector_success_codes must list at least one exit code".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
