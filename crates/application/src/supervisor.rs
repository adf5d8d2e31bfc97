//! Output Supervisor (C6): readiness polling, rolling-window disk
//! retention, and the seek operations HTTP handlers call into.

use crate::registry::SessionRegistry;
use domain::{seek_by_time, seek_to_segment, seek_window_range, DomainError, SeekOutcome, SeekWindowEntry, SessionState};
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    pub max_storage_bytes: u64,
    pub keep_segments: usize,
    pub readiness_interval: Duration,
    pub retention_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_storage_bytes: 2_000_000_000,
            keep_segments: 5,
            readiness_interval: Duration::from_secs(1),
            retention_interval: Duration::from_secs(15),
        }
    }
}

fn segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^segment_(\d+)\.ts$").unwrap())
}

pub struct OutputSupervisor {
    registry: Arc<SessionRegistry>,
    config: RetentionConfig,
}

impl OutputSupervisor {
    pub fn new(registry: Arc<SessionRegistry>, config: RetentionConfig) -> Arc<Self> {
        Arc::new(Self { registry, config })
    }

    /// Spawns the readiness-poll and retention-loop background tasks
    /// for one session. Readiness polling stops once `Ready` (or the
    /// session closes first); retention runs for the session's full
    /// lifetime.
    pub fn spawn_for_session(self: &Arc<Self>, session_id: String) {
        let this = self.clone();
        let readiness_id = session_id.clone();
        tokio::spawn(async move { this.readiness_loop(readiness_id).await });

        let this = self.clone();
        tokio::spawn(async move { this.retention_loop(session_id).await });
    }

    async fn readiness_loop(self: Arc<Self>, session_id: String) {
        loop {
            tokio::time::sleep(self.config.readiness_interval).await;

            let folder = match self.registry.get(&session_id) {
                Ok(record) => {
                    let guard = record.read();
                    if matches!(guard.state, SessionState::Ready | SessionState::Failed | SessionState::Closed) {
                        return;
                    }
                    guard.folder.clone()
                }
                Err(_) => return,
            };

            match poll_readiness_once(&folder).await {
                Ok(Some(total_segments)) => {
                    if let Err(e) = self.registry.update(&session_id, |r| {
                        r.total_segments_observed = r.total_segments_observed.max(total_segments);
                        r.transition_to(SessionState::Ready)
                    }) {
                        debug!(session_id = %session_id, error = %e, "readiness transition rejected");
                    } else {
                        return;
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "readiness poll failed, will retry");
                }
            }
        }
    }

    async fn retention_loop(self: Arc<Self>, session_id: String) {
        loop {
            tokio::time::sleep(self.config.retention_interval).await;

            let folder = match self.registry.get(&session_id) {
                Ok(record) => {
                    let guard = record.read();
                    if guard.state == SessionState::Closed {
                        return;
                    }
                    guard.folder.clone()
                }
                Err(_) => return,
            };

            if let Err(e) =
                run_retention_pass(&folder, self.config.max_storage_bytes, self.config.keep_segments).await
            {
                warn!(session_id = %session_id, error = %e, "retention pass failed, will retry");
            }
        }
    }

    pub fn seek(&self, session_id: &str, time: Option<f64>, segment: Option<u64>) -> Result<SeekOutcome, DomainError> {
        let record = self.registry.get(session_id)?;
        let (segment_duration, total_segments) = {
            let guard = record.read();
            (guard.segment_duration_seconds.unwrap_or(4), guard.total_segments_observed)
        };

        let outcome = match (time, segment) {
            (Some(t), _) => seek_by_time(t, segment_duration, total_segments)?,
            (None, Some(s)) => seek_to_segment(s, segment_duration, total_segments)?,
            (None, None) => return Err(DomainError::BadRequest("either time or segment is required".into())),
        };

        self.registry.update(session_id, |r| {
            r.current_segment = outcome.current_segment;
            r.playback_position_seconds = outcome.playback_position_seconds;
            Ok(())
        })?;

        Ok(outcome)
    }

    pub async fn seek_info(
        &self,
        session_id: &str,
    ) -> Result<(SeekOutcome, Option<u32>, u64, Vec<SeekWindowEntry>), DomainError> {
        let record = self.registry.get(session_id)?;
        let (current_segment, playback_position_seconds, segment_duration, total_segments, folder) = {
            let guard = record.read();
            (
                guard.current_segment,
                guard.playback_position_seconds,
                guard.segment_duration_seconds,
                guard.total_segments_observed,
                guard.folder.clone(),
            )
        };

        let window = seek_window_range(current_segment, total_segments);
        let mut entries = Vec::with_capacity(window.len());
        for segment in window {
            let path = folder.join(format!("segment_{segment:03}.ts"));
            let available = tokio::fs::metadata(&path).await.is_ok();
            entries.push(SeekWindowEntry { segment, available });
        }

        Ok((
            SeekOutcome { current_segment, playback_position_seconds },
            segment_duration,
            total_segments,
            entries,
        ))
    }
}

/// One readiness check: `Ok(Some(n))` if ready with `n` segments
/// observed, `Ok(None)` if not yet ready, `Err` on a transient I/O
/// failure the caller should log and retry.
async fn poll_readiness_once(folder: &Path) -> Result<Option<u64>, DomainError> {
    let playlist = folder.join("playlist.m3u8");
    let playlist_meta = match tokio::fs::metadata(&playlist).await {
        Ok(meta) => meta,
        Err(_) => return Ok(None),
    };

    if playlist_meta.len() <= 100 {
        return Ok(None);
    }

    let mut segment_count: u64 = 0;
    let mut entries = tokio::fs::read_dir(folder)
        .await
        .map_err(|e| DomainError::StorageError(e.to_string()))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DomainError::StorageError(e.to_string()))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if segment_regex().is_match(&name) {
            segment_count += 1;
        }
    }

    if segment_count == 0 {
        return Ok(None);
    }

    Ok(Some(segment_count))
}

struct FileEntry {
    path: std::path::PathBuf,
    name: String,
    size: u64,
    modified: std::time::SystemTime,
}

/// Rolling-window retention: if the directory's total size exceeds
/// `max_storage_bytes`, delete oldest-first among unprotected segments,
/// then oldest-first among other files, one at a time, re-checking
/// total size after each deletion. `playlist.m3u8` is never deleted,
/// and the newest `keep_segments` segments are always protected.
pub async fn run_retention_pass(
    folder: &Path,
    max_storage_bytes: u64,
    keep_segments: usize,
) -> Result<(), DomainError> {
    let mut entries = tokio::fs::read_dir(folder)
        .await
        .map_err(|e| DomainError::StorageError(e.to_string()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DomainError::StorageError(e.to_string()))?
    {
        let meta = match entry.metadata().await {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        files.push(FileEntry { path: entry.path(), name, size: meta.len(), modified });
    }

    let mut total: u64 = files.iter().map(|f| f.size).sum();
    if total <= max_storage_bytes {
        return Ok(());
    }

    let (mut segments, mut others): (Vec<_>, Vec<_>) =
        files.into_iter().partition(|f| segment_regex().is_match(&f.name));

    segments.sort_by_key(|f| f.modified);
    others.retain(|f| f.name != "playlist.m3u8");
    others.sort_by_key(|f| f.modified);

    let protected_count = keep_segments.min(segments.len());
    let protected_from = segments.len() - protected_count;
    let unprotected_segments: Vec<_> = segments.drain(..protected_from).collect();

    for file in unprotected_segments.into_iter().chain(others.into_iter()) {
        if total <= max_storage_bytes {
            break;
        }
        if tokio::fs::remove_file(&file.path).await.is_ok() {
            total = total.saturating_sub(file.size);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    async fn write_file(dir: &Path, name: &str, size: usize) {
        let mut f = tokio::fs::File::create(dir.join(name)).await.unwrap();
        f.write_all(&vec![0u8; size]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn readiness_requires_playlist_over_100_bytes_and_a_segment() {
        let dir = tempdir().unwrap();
        assert_eq!(poll_readiness_once(dir.path()).await.unwrap(), None);

        write_file(dir.path(), "playlist.m3u8", 50).await;
        assert_eq!(poll_readiness_once(dir.path()).await.unwrap(), None);

        write_file(dir.path(), "playlist.m3u8", 150).await;
        assert_eq!(poll_readiness_once(dir.path()).await.unwrap(), None);

        write_file(dir.path(), "segment_000.ts", 10).await;
        assert_eq!(poll_readiness_once(dir.path()).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn retention_never_deletes_playlist_when_it_is_the_only_file() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "playlist.m3u8", 1_000_000).await;
        run_retention_pass(dir.path(), 100, 5).await.unwrap();
        assert!(dir.path().join("playlist.m3u8").exists());
    }

    #[tokio::test]
    async fn retention_keeps_newest_segments_and_playlist() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "playlist.m3u8", 200).await;
        for i in 0..10u32 {
            write_file(dir.path(), &format!("segment_{i:03}.ts"), 1_000_000).await;
        }

        run_retention_pass(dir.path(), 3_500_000, 3).await.unwrap();

        assert!(dir.path().join("playlist.m3u8").exists());
        for i in 7..10u32 {
            assert!(dir.path().join(format!("segment_{i:03}.ts")).exists(), "segment {i} should survive");
        }
        for i in 0..5u32 {
            assert!(!dir.path().join(format!("segment_{i:03}.ts")).exists(), "segment {i} should be evicted");
        }
    }

    #[tokio::test]
    async fn retention_is_noop_under_budget() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "playlist.m3u8", 200).await;
        write_file(dir.path(), "segment_000.ts", 100).await;
        run_retention_pass(dir.path(), 1_000_000, 5).await.unwrap();
        assert!(dir.path().join("segment_000.ts").exists());
    }
}
