//! Media prober adapter (spec.md §1): an `ffprobe`-equivalent
//! subprocess returning duration and a video codec hint.

use async_trait::async_trait;
use domain::{format_duration, DomainError, MediaInfo, MediaProber};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::warn;

pub struct FfprobeMediaProber {
    binary: String,
}

impl FfprobeMediaProber {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for FfprobeMediaProber {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl MediaProber for FfprobeMediaProber {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, DomainError> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DomainError::ExternalToolMissing(format!("{}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::ExternalToolFailed(format!(
                "ffprobe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let duration_seconds: f64 = raw.trim().parse().map_err(|_| {
            DomainError::ExternalToolFailed(format!("unparsable ffprobe duration: {raw:?}"))
        })?;

        Ok(MediaInfo {
            duration_seconds,
            duration_formatted: format_duration(duration_seconds),
        })
    }

    async fn probe_video_codec(&self, path: &Path) -> Result<Option<String>, DomainError> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=codec_name",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DomainError::ExternalToolMissing(format!("{}: {e}", self.binary)))?;

        if !output.status.success() {
            warn!(status = %output.status, "ffprobe codec probe failed, treating as unknown");
            return Ok(None);
        }

        let codec = String::from_utf8_lossy(&output.stdout).trim().to_lowercase();
        if codec.is_empty() {
            Ok(None)
        } else {
            Ok(Some(codec))
        }
    }
}
