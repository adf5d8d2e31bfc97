//! `StreamGateway`: the single facade wiring C1–C6 together, the
//! direct descendant of the teacher's `TorrentApp`. `crates/api-server`
//! talks only to this type.

use crate::registry::{SessionRegistry, SessionSnapshot};
use crate::scheduler::{JobFactory, TranscoderScheduler};
use crate::source_adapter::SourceAdapter;
use crate::supervisor::{OutputSupervisor, RetentionConfig};
use domain::policy::{self, PolicyLimits, TuningDecision};
use domain::{
    ByteStream, DomainError, MediaProber, ResourceProbe, ResourceReading, SeekOutcome, SeekWindowEntry,
    SourceKind, SubtitleDetected, SubtitleExtracted, TorrentEngine, TorrentHandle, TranscodeInput,
    TranscodeJobSpec, TranscodeMode, TranscoderProcess, UrlDownloader,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct GatewayConfig {
    pub session_root: PathBuf,
    pub policy_limits: PolicyLimits,
    pub retention: RetentionConfig,
    pub idle_timeout: chrono::Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            session_root: std::env::temp_dir(),
            policy_limits: PolicyLimits::default(),
            retention: RetentionConfig::default(),
            idle_timeout: chrono::Duration::minutes(30),
        }
    }
}

pub struct StreamGateway {
    pub registry: Arc<SessionRegistry>,
    source_adapter: Arc<SourceAdapter>,
    scheduler: Arc<TranscoderScheduler>,
    supervisor: Arc<OutputSupervisor>,
    resource_probe: Arc<dyn ResourceProbe>,
    policy_limits: PolicyLimits,
    idle_timeout: chrono::Duration,
}

/// `GET /resources` response payload (SPEC_FULL.md §6: also reports
/// `queue_len` alongside `active_count`/`max_concurrent` so external
/// observers can assert FIFO saturation behavior).
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesView {
    pub memory_mb: u64,
    pub cpu_count: usize,
    pub active_count: usize,
    pub queue_len: usize,
    pub tuning: TuningDecision,
}

impl StreamGateway {
    pub fn new(
        config: GatewayConfig,
        torrent_engine: Arc<dyn TorrentEngine>,
        url_downloader: Arc<dyn UrlDownloader>,
        media_prober: Arc<dyn MediaProber>,
        transcoder: Arc<dyn TranscoderProcess>,
        resource_probe: Arc<dyn ResourceProbe>,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(config.session_root));
        let source_adapter = Arc::new(SourceAdapter::new(
            registry.clone(),
            torrent_engine,
            url_downloader,
            media_prober,
        ));
        let scheduler = TranscoderScheduler::new(
            registry.clone(),
            transcoder,
            resource_probe.clone(),
            config.policy_limits,
        );
        let supervisor = OutputSupervisor::new(registry.clone(), config.retention);

        Arc::new(Self {
            registry,
            source_adapter,
            scheduler,
            supervisor,
            resource_probe,
            policy_limits: config.policy_limits,
            idle_timeout: config.idle_timeout,
        })
    }

    pub async fn create_torrent_stream(self: &Arc<Self>, magnet: &str) -> Result<String, DomainError> {
        let id = self.registry.create(SourceKind::Torrent).await?;
        self.spawn_torrent_pipeline(id.clone(), magnet.to_string());
        Ok(id)
    }

    pub async fn create_url_stream(self: &Arc<Self>, url: &str) -> Result<String, DomainError> {
        let id = self.registry.create(SourceKind::Url).await?;
        self.spawn_url_pipeline(id.clone(), url.to_string());
        Ok(id)
    }

    fn spawn_torrent_pipeline(self: &Arc<Self>, session_id: String, magnet: String) {
        let this = self.clone();
        tokio::spawn(async move {
            if this.source_adapter.resolve_torrent(&session_id, &magnet).await.is_err() {
                return;
            }
            this.supervisor.spawn_for_session(session_id.clone());
            this.submit_transcode_job(session_id);
        });
    }

    fn spawn_url_pipeline(self: &Arc<Self>, session_id: String, url: String) {
        let this = self.clone();
        tokio::spawn(async move {
            if this.source_adapter.resolve_url(&session_id, &url).await.is_err() {
                return;
            }
            this.supervisor.spawn_for_session(session_id.clone());
            this.submit_transcode_job(session_id);
        });
    }

    fn submit_transcode_job(self: &Arc<Self>, session_id: String) {
        let Some((source_file, folder)) = self.registry.get(&session_id).ok().map(|record| {
            let guard = record.read();
            (guard.source_file.clone(), guard.folder.clone())
        }) else {
            return;
        };
        let Some(source_file) = source_file else { return };

        let source_adapter = self.source_adapter.clone();
        let registry = self.registry.clone();
        let policy_limits = self.policy_limits;
        let resource_probe = self.resource_probe.clone();
        let scheduler = self.scheduler.clone();
        let sid = session_id.clone();

        let factory: JobFactory = Box::new(move || {
            Box::pin(async move {
                let reading = resource_probe.probe().await;
                let active_sessions = registry.live_count();
                let tuning = policy::tune(reading.memory_mb, reading.cpu_count, active_sessions, policy_limits);

                let segment_duration = {
                    let record = registry.get(&sid)?;
                    record.read().segment_duration_seconds.unwrap_or(policy_limits.min_segment_seconds)
                };
                registry.update(&sid, |r| r.set_segment_duration(segment_duration))?;

                let copy_mux_eligible = source_file.is_mp4_container
                    || source_file.codec_hint.as_deref().map(|c| c.contains("h264")).unwrap_or(false);
                let mode = if copy_mux_eligible { TranscodeMode::CopyMux } else { TranscodeMode::BaselineEncode };

                let input = match (source_adapter.torrent_handle(&sid), source_adapter.selected_file_index(&sid)) {
                    (Some(handle), Some(index)) => {
                        let stream = handle.open_range(index, 0, None).await?;
                        TranscodeInput::Stdin(stream)
                    }
                    _ => TranscodeInput::FilePath(folder.join(&source_file.name)),
                };

                Ok(TranscodeJobSpec {
                    input,
                    output_dir: folder,
                    segment_duration_seconds: segment_duration,
                    thread_count: tuning.threads_per_transcoder,
                    mode,
                })
            })
        });

        scheduler.submit(session_id, factory);
    }

    pub fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, DomainError> {
        self.registry.touch(session_id)?;
        self.registry.snapshot(session_id)
    }

    pub fn seek(&self, session_id: &str, time: Option<f64>, segment: Option<u64>) -> Result<SeekOutcome, DomainError> {
        self.supervisor.seek(session_id, time, segment)
    }

    pub async fn seek_info(
        &self,
        session_id: &str,
    ) -> Result<(SeekOutcome, Option<u32>, u64, Vec<SeekWindowEntry>), DomainError> {
        self.supervisor.seek_info(session_id).await
    }

    pub fn torrent_handle(&self, session_id: &str) -> Option<Arc<dyn TorrentHandle>> {
        self.source_adapter.torrent_handle(session_id)
    }

    pub async fn resources(&self) -> ResourcesView {
        let reading = self.resource_probe.probe().await;
        let active_sessions = self.registry.live_count();
        let tuning = policy::tune(reading.memory_mb, reading.cpu_count, active_sessions, self.policy_limits);
        ResourcesView {
            memory_mb: reading.memory_mb,
            cpu_count: reading.cpu_count,
            active_count: self.scheduler.active_count(),
            queue_len: self.scheduler.queue_len(),
            tuning,
        }
    }

    /// The selected source file's total length, for `Range` header
    /// validation before `open_source_range` is called.
    pub fn source_length(&self, session_id: &str) -> Result<u64, DomainError> {
        let record = self.registry.get(session_id)?;
        let guard = record.read();
        guard
            .source_file
            .as_ref()
            .map(|f| f.length_bytes)
            .ok_or_else(|| DomainError::NotFound(format!("session {session_id} has no source file yet")))
    }

    /// Direct byte-range read of a session's selected source file
    /// (`GET /stream/:id`, spec.md §6): the live torrent byte-stream for
    /// torrent sessions, or the staged file on disk for URL sessions.
    /// Returns the stream plus the source's total length in bytes.
    pub async fn open_source_range(
        &self,
        session_id: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<(ByteStream, u64), DomainError> {
        let record = self.registry.get(session_id)?;
        let (source_file, folder) = {
            let guard = record.read();
            (guard.source_file.clone(), guard.folder.clone())
        };
        let source_file =
            source_file.ok_or_else(|| DomainError::NotFound(format!("session {session_id} has no source file yet")))?;

        if let (Some(handle), Some(index)) =
            (self.source_adapter.torrent_handle(session_id), self.source_adapter.selected_file_index(session_id))
        {
            let stream = handle.open_range(index, start, end).await?;
            return Ok((stream, source_file.length_bytes));
        }

        let path = folder.join(&source_file.name);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| DomainError::StorageError(format!("opening source file: {e}")))?;
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        if start > 0 {
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|e| DomainError::StorageError(format!("seeking source file: {e}")))?;
        }
        let stream: ByteStream = match end {
            Some(end) => Box::pin(file.take(end - start + 1)),
            None => Box::pin(file),
        };
        Ok((stream, source_file.length_bytes))
    }

    /// `GET /subtitles-list/:id` payload: detected, extracted, and the
    /// set of languages this system's detector can recognize (spec.md
    /// §6, Glossary).
    pub fn subtitles_list(
        &self,
        session_id: &str,
    ) -> Result<(Vec<SubtitleDetected>, Vec<SubtitleExtracted>), DomainError> {
        let record = self.registry.get(session_id)?;
        let guard = record.read();
        Ok((guard.subtitles_detected.clone(), guard.subtitles_extracted.clone()))
    }

    /// Resolves `filename` against a session's folder for
    /// `GET /subtitles/:id/:filename`, rejecting any path that would
    /// escape the session folder (invariant 2, `AccessDenied`).
    pub fn resolve_subtitle_path(&self, session_id: &str, filename: &str) -> Result<PathBuf, DomainError> {
        let record = self.registry.get(session_id)?;
        let folder = record.read().folder.clone();
        let candidate = folder.join(filename);

        let folder_prefix = folder
            .canonicalize()
            .map_err(|e| DomainError::StorageError(format!("resolving session folder: {e}")))?;
        let resolved = candidate
            .canonicalize()
            .map_err(|_| DomainError::NotFound(format!("no such subtitle file: {filename}")))?;

        if !resolved.starts_with(&folder_prefix) {
            return Err(DomainError::AccessDenied(format!("{filename} escapes session folder")));
        }
        Ok(resolved)
    }

    /// Resolves a path under `GET /hls/:id/*` against a session's
    /// folder with the same escape check as subtitles (invariant 2).
    pub fn resolve_hls_path(&self, session_id: &str, relative: &str) -> Result<PathBuf, DomainError> {
        self.resolve_subtitle_path(session_id, relative)
    }

    pub async fn close(&self, session_id: &str) -> Result<(), DomainError> {
        self.scheduler.kill_session(session_id).await;
        self.source_adapter.forget(session_id);
        self.registry.close(session_id).await
    }

    /// Background reaper: closes any session whose `last_seen` exceeds
    /// `idle_timeout`, run once per sweep on a 1-minute cadence by the
    /// caller (`api-server`'s startup task).
    pub async fn reap_idle_sessions(self: &Arc<Self>) {
        for id in self.registry.live_ids() {
            let idle = match self.registry.idle_for(&id) {
                Ok(d) => d,
                Err(_) => continue,
            };
            if idle > self.idle_timeout {
                info!(session_id = %id, "closing idle session");
                if let Err(e) = self.close(&id).await {
                    warn!(session_id = %id, error = %e, "idle reaper failed to close session");
                }
            }
        }
    }

    pub fn spawn_idle_reaper(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                this.reap_idle_sessions().await;
            }
        });
    }
}
