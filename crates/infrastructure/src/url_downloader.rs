//! URL downloader adapter (C4 URL variant, spec.md §4.4): a
//! `yt-dlp`-equivalent subprocess that stages a complete file into the
//! session folder.

use async_trait::async_trait;
use domain::{DomainError, UrlDownloader};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

pub struct YtDlpDownloader {
    binary: String,
}

impl YtDlpDownloader {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl UrlDownloader for YtDlpDownloader {
    async fn download(&self, url: &str, dest_dir: &Path) -> Result<(), DomainError> {
        let output_template = dest_dir.join("%(title)s.%(ext)s");

        info!(url, dir = %dest_dir.display(), "starting URL download");

        let output = Command::new(&self.binary)
            .args([
                "-f",
                "best",
                "-o",
                &output_template.to_string_lossy(),
                url,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DomainError::ExternalToolMissing(format!("{}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(%stderr, "yt-dlp exited non-zero");
            return Err(DomainError::ExternalToolFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.lines().last().unwrap_or("").trim()
            )));
        }

        Ok(())
    }
}
