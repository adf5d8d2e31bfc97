//! Source Adapter (C4): resolves a session's source — torrent magnet
//! or remote URL — into a playable `SourceFile`, detecting and
//! extracting subtitle side-files along the way.

use crate::registry::SessionRegistry;
use dashmap::DashMap;
use domain::{
    is_playable_extension, DomainError, MediaInfo, MediaProber, SessionState, SourceFile,
    SourceKind, TorrentEngine, TorrentHandle, UrlDownloader,
};
use infrastructure::subtitle_extractor;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Resolves sources and, for torrent sessions, keeps the live
/// `TorrentHandle` around so later byte-range reads and transcoder
/// input construction can reach the swarm directly.
pub struct SourceAdapter {
    registry: Arc<SessionRegistry>,
    torrent_engine: Arc<dyn TorrentEngine>,
    url_downloader: Arc<dyn UrlDownloader>,
    media_prober: Arc<dyn MediaProber>,
    handles: DashMap<String, Arc<dyn TorrentHandle>>,
    selected_index: DashMap<String, usize>,
}

impl SourceAdapter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        torrent_engine: Arc<dyn TorrentEngine>,
        url_downloader: Arc<dyn UrlDownloader>,
        media_prober: Arc<dyn MediaProber>,
    ) -> Self {
        Self {
            registry,
            torrent_engine,
            url_downloader,
            media_prober,
            handles: DashMap::new(),
            selected_index: DashMap::new(),
        }
    }

    pub fn torrent_handle(&self, session_id: &str) -> Option<Arc<dyn TorrentHandle>> {
        self.handles.get(session_id).map(|h| h.clone())
    }

    /// The index of the torrent file selected as `source_file`, needed
    /// to open the right stream at transcode time.
    pub fn selected_file_index(&self, session_id: &str) -> Option<usize> {
        self.selected_index.get(session_id).map(|i| *i)
    }

    pub fn forget(&self, session_id: &str) {
        self.handles.remove(session_id);
        self.selected_index.remove(session_id);
    }

    /// Resolves `magnet` for `session_id`, mutating the session record
    /// and transitioning `Pending→Resolving→Queued` (or `→Failed`).
    pub async fn resolve_torrent(&self, session_id: &str, magnet: &str) -> Result<(), DomainError> {
        self.registry
            .update(session_id, |r| r.transition_to(SessionState::Resolving))?;

        let handle: Arc<dyn TorrentHandle> = match self.torrent_engine.add_magnet(magnet).await {
            Ok(h) => Arc::from(h),
            Err(e) => {
                self.registry.update(session_id, |r| r.fail(e.clone()))?;
                return Err(e);
            }
        };

        let files = handle.files();
        let selected = files.iter().find(|f| {
            Path::new(&f.name)
                .extension()
                .and_then(|e| e.to_str())
                .map(is_playable_extension)
                .unwrap_or(false)
        });

        let Some(selected) = selected.cloned() else {
            self.registry
                .update(session_id, |r| r.fail(DomainError::NoPlayableFile))?;
            return Err(DomainError::NoPlayableFile);
        };

        let ext = Path::new(&selected.name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let source_file = SourceFile {
            name: selected.name.clone(),
            length_bytes: selected.length,
            codec_hint: None,
            is_mp4_container: ext == "mp4",
        };

        let detected = subtitle_extractor::detect_subtitles(&files);
        let detected_only: Vec<_> = detected.iter().map(|(_, d)| d.clone()).collect();

        let folder = {
            let record = self.registry.get(session_id)?;
            record.read().folder.clone()
        };

        self.registry.update(session_id, |r| {
            r.source_file = Some(source_file);
            r.subtitles_detected = detected_only;
            r.torrent_name = Some(handle.name());
            r.torrent_hash = Some(handle.info_hash());
            r.transition_to(SessionState::Queued)
        })?;

        self.handles.insert(session_id.to_string(), handle.clone());
        self.selected_index.insert(session_id.to_string(), selected.index);

        if !detected.is_empty() {
            let registry = self.registry.clone();
            let session_id = session_id.to_string();
            let handle = handle.clone();
            tokio::spawn(async move {
                let extracted = subtitle_extractor::extract_all(handle.as_ref(), &folder, &detected).await;
                if let Err(e) = registry.update(&session_id, |r| {
                    r.subtitles_extracted = extracted;
                    Ok(())
                }) {
                    warn!(session_id = %session_id, error = %e, "failed to record extracted subtitles");
                }
            });
        }

        info!(session_id, file = %handle.name(), "torrent source resolved");
        Ok(())
    }

    /// Resolves `url` for `session_id` by staging a complete file via
    /// the URL downloader, then scanning `folder` for the first
    /// playable extension.
    pub async fn resolve_url(&self, session_id: &str, url: &str) -> Result<(), DomainError> {
        self.registry
            .update(session_id, |r| r.transition_to(SessionState::Resolving))?;

        let folder = {
            let record = self.registry.get(session_id)?;
            record.read().folder.clone()
        };

        if let Err(e) = self.url_downloader.download(url, &folder).await {
            self.registry.update(session_id, |r| r.fail(e.clone()))?;
            return Err(e);
        }

        let mut entries = tokio::fs::read_dir(&folder)
            .await
            .map_err(|e| DomainError::StorageError(e.to_string()))?;

        let mut found: Option<(String, u64)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DomainError::StorageError(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_playable = Path::new(&name)
                .extension()
                .and_then(|e| e.to_str())
                .map(is_playable_extension)
                .unwrap_or(false);
            if is_playable {
                let len = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                found = Some((name, len));
                break;
            }
        }

        let Some((name, length_bytes)) = found else {
            self.registry
                .update(session_id, |r| r.fail(DomainError::NoPlayableFile))?;
            return Err(DomainError::NoPlayableFile);
        };

        let ext = Path::new(&name).extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
        let file_path = folder.join(&name);

        let media_info: Option<MediaInfo> = self.media_prober.probe(&file_path).await.ok();
        let codec_hint = self.media_prober.probe_video_codec(&file_path).await.ok().flatten();

        let source_file = SourceFile {
            name: name.clone(),
            length_bytes,
            codec_hint,
            is_mp4_container: ext == "mp4",
        };

        self.registry.update(session_id, |r| {
            r.source_file = Some(source_file);
            r.media_info = media_info;
            r.transition_to(SessionState::Queued)
        })?;

        info!(session_id, file = %name, "url source resolved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::{ByteStream, TorrentFileEntry, TorrentStats};
    use tempfile::tempdir;

    struct NoFilesTorrentEngine;

    #[async_trait]
    impl TorrentEngine for NoFilesTorrentEngine {
        async fn add_magnet(&self, _magnet: &str) -> Result<Box<dyn TorrentHandle>, DomainError> {
            Ok(Box::new(EmptyHandle))
        }
    }

    struct EmptyHandle;

    #[async_trait]
    impl TorrentHandle for EmptyHandle {
        fn name(&self) -> String {
            "empty".into()
        }
        fn info_hash(&self) -> String {
            "deadbeef".into()
        }
        fn files(&self) -> Vec<TorrentFileEntry> {
            vec![TorrentFileEntry { index: 0, name: "readme.txt".into(), length: 10 }]
        }
        async fn stats(&self) -> TorrentStats {
            TorrentStats::default()
        }
        async fn open_range(&self, _i: usize, _s: u64, _e: Option<u64>) -> Result<ByteStream, DomainError> {
            unimplemented!()
        }
        async fn extract_to_file(&self, _i: usize, _d: &Path) -> Result<(), DomainError> {
            Ok(())
        }
    }

    struct StubDownloader;

    #[async_trait]
    impl UrlDownloader for StubDownloader {
        async fn download(&self, _url: &str, _dest: &Path) -> Result<(), DomainError> {
            Ok(())
        }
    }

    struct StubProber;

    #[async_trait]
    impl MediaProber for StubProber {
        async fn probe(&self, _path: &Path) -> Result<MediaInfo, DomainError> {
            Ok(MediaInfo { duration_seconds: 0.0, duration_formatted: "00:00:00".into() })
        }
        async fn probe_video_codec(&self, _path: &Path) -> Result<Option<String>, DomainError> {
            Ok(None)
        }
    }

    fn adapter_with_empty_torrent(registry: Arc<SessionRegistry>) -> SourceAdapter {
        SourceAdapter::new(
            registry,
            Arc::new(NoFilesTorrentEngine),
            Arc::new(StubDownloader),
            Arc::new(StubProber),
        )
    }

    #[tokio::test]
    async fn torrent_with_no_playable_file_fails_session() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new(dir.path().to_path_buf()));
        let adapter = adapter_with_empty_torrent(registry.clone());
        let id = registry.create(SourceKind::Torrent).await.unwrap();

        let result = adapter.resolve_torrent(&id, "magnet:?xt=urn:btih:AAAA").await;
        assert!(matches!(result, Err(DomainError::NoPlayableFile)));

        let snap = registry.snapshot(&id).unwrap();
        assert_eq!(snap.error.as_deref(), Some("NoPlayableFile: no file with a supported media extension in source"));
    }

    #[tokio::test]
    async fn url_with_no_playable_file_fails_session() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new(dir.path().to_path_buf()));
        let adapter = SourceAdapter::new(
            registry.clone(),
            Arc::new(NoFilesTorrentEngine),
            Arc::new(StubDownloader),
            Arc::new(StubProber),
        );
        let id = registry.create(SourceKind::Url).await.unwrap();

        let result = adapter.resolve_url(&id, "https://example.com/video").await;
        assert!(matches!(result, Err(DomainError::NoPlayableFile)));
    }
}
