//! Environment configuration for the streaming gateway (SPEC_FULL.md §6).
//!
//! Modeled on the teacher's `env::var(...).unwrap_or_else(...).parse()`
//! shape (`crates/api-server/src/config.rs` and `src/config.rs`),
//! repurposed for this system's variables instead of the teacher's
//! database/TMDB settings.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub min_segment_seconds: u32,
    pub max_segment_seconds: u32,
    pub target_streams_per_segment: u32,
    pub max_stream_storage_bytes: u64,
    pub keep_segments: usize,
    /// `None` means "computed by the Tuning Policy"; `Some` is an
    /// explicit override that wins over the computed value.
    pub max_concurrent_ffmpeg: Option<usize>,
    pub ffmpeg_threads: Option<usize>,
    pub segment_monitor_interval_ms: u64,
    pub resource_watch_interval_ms: u64,
    pub session_root: PathBuf,
    pub idle_timeout_minutes: i64,
    pub ffmpeg_binary: String,
    pub ffprobe_binary: String,
    pub ytdlp_binary: String,
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!("warning: invalid {key}={raw:?}, using default");
            default
        }),
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.parse().ok())
}

impl Config {
    /// Loads configuration from the process environment, loading a
    /// `.env` file first if one is present (teacher's
    /// `dotenv::dotenv().ok()` convenience, retained for local dev).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            port: parse_env("PORT", 3000),
            min_segment_seconds: parse_env("MIN_SEGMENT_SECONDS", 4),
            max_segment_seconds: parse_env("MAX_SEGMENT_SECONDS", 10),
            target_streams_per_segment: parse_env("TARGET_STREAMS_PER_SEGMENT", 10),
            max_stream_storage_bytes: parse_env("MAX_STREAM_STORAGE_BYTES", 2_000_000_000),
            keep_segments: parse_env("KEEP_SEGMENTS", 5),
            max_concurrent_ffmpeg: parse_env_opt("MAX_CONCURRENT_FFMPEG"),
            ffmpeg_threads: parse_env_opt("FFMPEG_THREADS"),
            segment_monitor_interval_ms: parse_env("SEGMENT_MONITOR_INTERVAL_MS", 5000),
            resource_watch_interval_ms: parse_env("RESOURCE_WATCH_INTERVAL_MS", 15000),
            session_root: env::var("SESSION_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
            idle_timeout_minutes: parse_env("IDLE_TIMEOUT_MINUTES", 30),
            ffmpeg_binary: env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_binary: env::var("FFPROBE_BIN").unwrap_or_else(|_| "ffprobe".to_string()),
            ytdlp_binary: env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_to_default_when_unset() {
        env::remove_var("DOES_NOT_EXIST_XYZ");
        assert_eq!(parse_env::<u32>("DOES_NOT_EXIST_XYZ", 7), 7);
    }

    #[test]
    fn parse_env_opt_is_none_when_unset() {
        env::remove_var("ALSO_DOES_NOT_EXIST_XYZ");
        assert_eq!(parse_env_opt::<usize>("ALSO_DOES_NOT_EXIST_XYZ"), None);
    }
}
