use serde::{Deserialize, Serialize};

/// The source kind a session was created from (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Torrent,
    Url,
}

/// Media extensions the Source Adapter treats as playable (spec.md §4.4).
pub const PLAYABLE_EXTENSIONS: [&str; 6] = ["mp4", "mkv", "webm", "mov", "avi", "flv"];

/// Side-file extensions scanned for subtitle candidates (spec.md §4.4).
pub const SUBTITLE_EXTENSIONS: [&str; 7] = ["srt", "vtt", "ass", "ssa", "sub", "sbv", "json"];

pub fn is_playable_extension(ext: &str) -> bool {
    PLAYABLE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

pub fn is_subtitle_extension(ext: &str) -> bool {
    SUBTITLE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// The selected playable file once the source has resolved (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub length_bytes: u64,
    /// Hint about the video codec, when known (e.g. probed or inferred
    /// from the torrent's metadata); drives copy-mux vs baseline-encode
    /// selection in the Transcoder Scheduler (spec.md §4.5).
    pub codec_hint: Option<String>,
    /// True if the container is MP4 (informs copy-mux eligibility).
    pub is_mp4_container: bool,
}

/// A subtitle side-file discovered in the torrent's file list, before
/// extraction (spec.md §3, §4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleDetected {
    pub name: String,
    pub ext: String,
    pub size: u64,
    pub language: String,
}

/// A subtitle side-file that has been streamed out of the source and
/// written into the session folder (spec.md §3, §4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleExtracted {
    pub name: String,
    pub path: String,
    pub language: String,
    pub ext: String,
    pub size: u64,
}

/// Probed media metadata (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_seconds: f64,
    pub duration_formatted: String,
}

/// Formats a duration in seconds as `HH:MM:SS`, the shape the status
/// snapshot and seek responses both expose (spec.md §6, scenario 2).
pub fn format_duration(total_seconds: f64) -> String {
    let total = total_seconds.max(0.0).round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_zero() {
        assert_eq!(format_duration(0.0), "00:00:00");
    }

    #[test]
    fn formats_sub_hour() {
        assert_eq!(format_duration(16.0), "00:00:16");
    }

    #[test]
    fn formats_with_hours() {
        assert_eq!(format_duration(3725.0), "01:02:05");
    }

    #[test]
    fn playable_extension_is_case_insensitive() {
        assert!(is_playable_extension("MP4"));
        assert!(is_playable_extension("mkv"));
        assert!(!is_playable_extension("txt"));
    }
}
