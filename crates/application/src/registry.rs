//! Session Registry (C3): a concurrent id→record map plus the
//! point-in-time snapshot assembled for `GET /status/:id`.

use dashmap::DashMap;
use domain::{DomainError, SessionRecord, SessionState, SourceKind};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<RwLock<SessionRecord>>>,
    base_dir: PathBuf,
}

impl SessionRegistry {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { sessions: DashMap::new(), base_dir }
    }

    fn new_id() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }

    /// Allocates an id, creates `folder`, inserts a `Pending` record.
    pub async fn create(&self, source_kind: SourceKind) -> Result<String, DomainError> {
        let id = Self::new_id();
        let folder = self.base_dir.join(&id);
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| DomainError::StorageError(format!("creating session folder: {e}")))?;

        let record = SessionRecord::new(id.clone(), source_kind, folder);
        self.sessions.insert(id.clone(), Arc::new(RwLock::new(record)));
        info!(session_id = %id, "session created");
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Arc<RwLock<SessionRecord>>, DomainError> {
        self.sessions
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| DomainError::NotFound(format!("no session {id}")))
    }

    /// Applies `mutator` under the record's exclusive lock.
    pub fn update<F>(&self, id: &str, mutator: F) -> Result<(), DomainError>
    where
        F: FnOnce(&mut SessionRecord) -> Result<(), DomainError>,
    {
        let record = self.get(id)?;
        let mut guard = record.write();
        mutator(&mut guard)
    }

    /// `*→Closed`, always legal. Best-effort folder removal; failures
    /// are logged, not propagated, since teardown must not get stuck.
    pub async fn close(&self, id: &str) -> Result<(), DomainError> {
        let record = self.get(id)?;
        let folder = {
            let mut guard = record.write();
            guard.transition_to(SessionState::Closed)?;
            guard.folder.clone()
        };
        if let Err(e) = tokio::fs::remove_dir_all(&folder).await {
            warn!(session_id = %id, error = %e, "failed to remove session folder on close");
        }
        Ok(())
    }

    pub fn snapshot(&self, id: &str) -> Result<SessionSnapshot, DomainError> {
        let record = self.get(id)?;
        let guard = record.read();
        Ok(SessionSnapshot::from(&*guard))
    }

    /// Ids of sessions not yet torn down, for the scheduler's live-load
    /// input and the idle-timeout reaper.
    pub fn live_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|e| !matches!(e.value().read().state, SessionState::Closed))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|e| !matches!(e.value().read().state, SessionState::Closed))
            .count()
    }

    pub fn touch(&self, id: &str) -> Result<(), DomainError> {
        self.update(id, |r| {
            r.touch();
            Ok(())
        })
    }

    pub fn idle_for(&self, id: &str) -> Result<chrono::Duration, DomainError> {
        let record = self.get(id)?;
        Ok(record.read().idle_for())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekControl {
    pub current_position: f64,
    pub current_segment: u64,
    pub total_segments: u64,
    pub segment_duration: Option<u32>,
    pub support_range_requests: bool,
    pub can_seek: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfoView {
    pub duration: f64,
    pub duration_formatted: String,
}

/// The point-in-time view assembled for `GET /status/:id` (spec.md §6's
/// status snapshot field list).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub ready: bool,
    pub folder: String,
    pub file: Option<String>,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub elapsed_seconds: f64,
    pub torrent_name: Option<String>,
    pub torrent_hash: Option<String>,
    pub num_peers: Option<u32>,
    pub progress: f64,
    pub download_speed: Option<u64>,
    pub ratio: Option<f64>,
    pub hls_ready_at: Option<chrono::DateTime<chrono::Utc>>,
    pub media_info: Option<MediaInfoView>,
    pub available_subtitles: Vec<domain::SubtitleDetected>,
    pub extracted_subtitles: Vec<domain::SubtitleExtracted>,
    pub seek_control: SeekControl,
}

impl From<&SessionRecord> for SessionSnapshot {
    fn from(r: &SessionRecord) -> Self {
        let elapsed_seconds = (chrono::Utc::now() - r.created_at).num_milliseconds() as f64 / 1000.0;
        Self {
            ready: r.is_ready(),
            folder: r.folder.to_string_lossy().into_owned(),
            file: r.source_file.as_ref().map(|f| f.name.clone()),
            error: r.error.as_ref().map(|e| format!("{}: {}", e.kind(), e)),
            created_at: r.created_at,
            elapsed_seconds: elapsed_seconds.max(0.0),
            torrent_name: r.torrent_name.clone(),
            torrent_hash: r.torrent_hash.clone(),
            num_peers: r.num_peers,
            progress: round2(r.progress),
            download_speed: r.download_speed,
            ratio: r.ratio,
            hls_ready_at: r.hls_ready_at,
            media_info: r.media_info.as_ref().map(|m| MediaInfoView {
                duration: m.duration_seconds,
                duration_formatted: m.duration_formatted.clone(),
            }),
            available_subtitles: r.subtitles_detected.clone(),
            extracted_subtitles: r.subtitles_extracted.clone(),
            seek_control: SeekControl {
                current_position: r.playback_position_seconds,
                current_segment: r.current_segment,
                total_segments: r.total_segments_observed,
                segment_duration: r.segment_duration_seconds,
                support_range_requests: r.source_file.is_some(),
                can_seek: r.total_segments_observed > 0,
            },
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_allocates_8_char_id_and_folder() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf());
        let id = registry.create(SourceKind::Torrent).await.unwrap();
        assert_eq!(id.len(), 8);
        assert!(dir.path().join(&id).is_dir());
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf());
        assert!(matches!(registry.get("deadbeef"), Err(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_enforces_legal_transitions() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf());
        let id = registry.create(SourceKind::Url).await.unwrap();
        let result = registry.update(&id, |r| r.transition_to(SessionState::Ready));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn close_is_legal_from_any_state() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf());
        let id = registry.create(SourceKind::Url).await.unwrap();
        registry.close(&id).await.unwrap();
        let snap = registry.snapshot(&id).unwrap();
        assert!(!snap.ready);
    }

    #[tokio::test]
    async fn live_count_excludes_closed_sessions() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf());
        let a = registry.create(SourceKind::Url).await.unwrap();
        let _b = registry.create(SourceKind::Url).await.unwrap();
        assert_eq!(registry.live_count(), 2);
        registry.close(&a).await.unwrap();
        assert_eq!(registry.live_count(), 1);
    }
}
