//! Metadata extractor for recording sidecar files.
//!
//! Sidecars are plain text, one `key : value` pair per line. Season and
//! episode are not part of the sidecar and are derived from the filename,
//! falling back to the directory layout.

use crate::record::ConversionRecord;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Delimiter between key and value on a sidecar line.
pub const FIELD_DELIMITER: &str = " : ";

#[derive(Debug, Error)]
#[error("failed to read sidecar {}: {source}", .path.display())]
pub struct MetadataParseError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Descriptive metadata attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordingMetadata {
    pub series_title: Option<String>,
    pub episode_title: Option<String>,
    pub description: Option<String>,
    pub program_id: Option<String>,
    pub callsign: Option<String>,
    pub season: Option<String>,
    pub episode: Option<String>,
    /// Sidecar keys with no dedicated field.
    pub extra: BTreeMap<String, String>,
}

impl RecordingMetadata {
    /// Merge parsed sidecar fields. Later keys win over earlier ones.
    pub fn merge_fields<I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in fields {
            match key.as_str() {
                "seriesTitle" => self.series_title = Some(value),
                "episodeTitle" => self.episode_title = Some(value),
                "description" => self.description = Some(value),
                "programId" => self.program_id = Some(value),
                "callsign" => self.callsign = Some(value),
                _ => {
                    self.extra.insert(key, value);
                }
            }
        }
    }
}

/// Split sidecar text into key/value pairs, skipping malformed lines.
pub fn parse_sidecar(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let (key, value) = line.split_once(FIELD_DELIMITER)?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn season_episode_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\bS(\d+)E(\d+)\b").expect("season/episode pattern is valid"))
}

/// Season and episode tokens for a recording.
///
/// An `SxxEyy` marker in the base name wins. Otherwise the parent directory
/// name is the season (often a year) and the base name is the episode.
pub fn derive_season_episode(record: &ConversionRecord) -> (Option<String>, Option<String>) {
    if let Some(caps) = season_episode_pattern().captures(&record.base_name) {
        let season = caps[1].parse::<u64>().ok();
        let episode = caps[2].parse::<u64>().ok();
        if let (Some(season), Some(episode)) = (season, episode) {
            return (Some(season.to_string()), Some(episode.to_string()));
        }
    }

    match record.parent_dir_name() {
        Some(dir) if !dir.is_empty() => (Some(dir.to_string()), Some(record.base_name.clone())),
        _ => (None, None),
    }
}

/// Read the record's sidecar and populate its metadata.
pub async fn extract_metadata(record: &mut ConversionRecord) -> Result<(), MetadataParseError> {
    let text = tokio::fs::read_to_string(&record.sidecar_path)
        .await
        .map_err(|source| MetadataParseError {
            path: record.sidecar_path.clone(),
            source,
        })?;

    record.metadata.merge_fields(parse_sidecar(&text));

    let (season, episode) = derive_season_episode(record);
    record.metadata.season = season;
    record.metadata.episode = episode;
    Ok(())
}
