use crate::entities::source::{MediaInfo, SourceFile, SubtitleDetected, SubtitleExtracted};
use crate::entities::SourceKind;
use crate::errors::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Session lifecycle state (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Resolving,
    Queued,
    Transcoding,
    Ready,
    Failed,
    Closed,
}

/// Checks whether `from -> to` is one of the transitions spec.md §4.3
/// declares legal. Any other transition is a programmer error: callers
/// should treat a `false` result as a bug, not a retryable condition.
pub fn is_legal_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    if to == Closed {
        return true;
    }
    matches!(
        (from, to),
        (Pending, Resolving)
            | (Resolving, Queued)
            | (Resolving, Failed)
            | (Queued, Transcoding)
            | (Queued, Failed)
            | (Transcoding, Ready)
            | (Transcoding, Failed)
            | (Ready, Ready)
    )
}

/// One client-submitted stream, from creation to teardown (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub source_kind: SourceKind,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub folder: PathBuf,

    pub source_file: Option<SourceFile>,
    pub subtitles_detected: Vec<SubtitleDetected>,
    pub subtitles_extracted: Vec<SubtitleExtracted>,
    pub media_info: Option<MediaInfo>,

    /// Immutable once set (invariant 5): fixed at transcode spawn time
    /// from the Tuning Policy's recommendation at that instant.
    pub segment_duration_seconds: Option<u32>,
    pub total_segments_observed: u64,

    pub playback_position_seconds: f64,
    pub current_segment: u64,

    pub error: Option<DomainError>,
    pub hls_ready_at: Option<DateTime<Utc>>,

    // Torrent/URL provenance surfaced in the status snapshot (§6).
    pub torrent_name: Option<String>,
    pub torrent_hash: Option<String>,
    pub num_peers: Option<u32>,
    pub progress: f64,
    pub download_speed: Option<u64>,
    pub ratio: Option<f64>,

    /// Bumped on every `GET /status/:id` observation; backs the idle
    /// teardown reaper (SPEC_FULL.md §9 Open Questions).
    pub last_seen: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(id: String, source_kind: SourceKind, folder: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_kind,
            state: SessionState::Pending,
            created_at: now,
            folder,
            source_file: None,
            subtitles_detected: Vec::new(),
            subtitles_extracted: Vec::new(),
            media_info: None,
            segment_duration_seconds: None,
            total_segments_observed: 0,
            playback_position_seconds: 0.0,
            current_segment: 0,
            error: None,
            hls_ready_at: None,
            torrent_name: None,
            torrent_hash: None,
            num_peers: None,
            progress: 0.0,
            download_speed: None,
            ratio: None,
            last_seen: now,
        }
    }

    /// Applies a state transition, enforcing the legal-transition table
    /// and the `error`/`Failed` co-invariant (spec.md §3, §4.3).
    pub fn transition_to(&mut self, to: SessionState) -> Result<(), DomainError> {
        if !is_legal_transition(self.state, to) {
            return Err(DomainError::InvalidTransition(format!(
                "{:?} -> {:?} is not a legal session transition",
                self.state, to
            )));
        }
        self.state = to;
        if to == SessionState::Ready && self.hls_ready_at.is_none() {
            self.hls_ready_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Records a terminal error and transitions to `Failed`.
    pub fn fail(&mut self, err: DomainError) -> Result<(), DomainError> {
        self.transition_to(SessionState::Failed)?;
        self.error = Some(err);
        Ok(())
    }

    /// Sets the segment duration once. Subsequent calls with a
    /// different value are rejected (invariant 5); the same value is
    /// accepted idempotently.
    pub fn set_segment_duration(&mut self, seconds: u32) -> Result<(), DomainError> {
        match self.segment_duration_seconds {
            None => {
                self.segment_duration_seconds = Some(seconds);
                Ok(())
            }
            Some(existing) if existing == seconds => Ok(()),
            Some(existing) => Err(DomainError::InvalidTransition(format!(
                "segment_duration_seconds is immutable once set (was {existing}, attempted {seconds})"
            ))),
        }
    }

    /// Readiness condition (spec.md §4.6, §8 invariant 3):
    /// `state == Ready` implies `source_file` set and ≥1 segment.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    pub fn idle_for(&self) -> chrono::Duration {
        Utc::now() - self.last_seen
    }
}

/// Result of a seek operation (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekOutcome {
    pub current_segment: u64,
    pub playback_position_seconds: f64,
}

/// `POST /seek/:id {time}` (spec.md §4.6, §8 scenario 2).
pub fn seek_by_time(
    time_seconds: f64,
    segment_duration_seconds: u32,
    total_segments_observed: u64,
) -> Result<SeekOutcome, DomainError> {
    if time_seconds < 0.0 {
        return Err(DomainError::BadRequest("time must be non-negative".into()));
    }
    let segment = (time_seconds / segment_duration_seconds as f64).floor() as u64;
    seek_to_segment(segment, segment_duration_seconds, total_segments_observed)
}

/// `POST /seek/:id {segment}` (spec.md §4.6).
pub fn seek_to_segment(
    segment: u64,
    segment_duration_seconds: u32,
    total_segments_observed: u64,
) -> Result<SeekOutcome, DomainError> {
    if total_segments_observed > 0 && segment >= total_segments_observed {
        return Err(DomainError::OutOfRange(format!(
            "invalid segment {segment}, valid range: 0-{}",
            total_segments_observed - 1
        )));
    }
    Ok(SeekOutcome {
        current_segment: segment,
        playback_position_seconds: segment as f64 * segment_duration_seconds as f64,
    })
}

/// One entry in the `GET /seek-info/:id` segment window (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeekWindowEntry {
    pub segment: u64,
    pub available: bool,
}

/// Computes the (up to 20) segment indices centred on `current_segment`
/// for the seek-info window, clamped to `[0, total_segments)`.
pub fn seek_window_range(current_segment: u64, total_segments_observed: u64) -> Vec<u64> {
    const WINDOW: u64 = 20;
    if total_segments_observed == 0 {
        return Vec::new();
    }
    let half = WINDOW / 2;
    let tentative_start = current_segment.saturating_sub(half);
    let end = (tentative_start + WINDOW).min(total_segments_observed);
    let start = end.saturating_sub(WINDOW);
    (start..end).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_resolving_is_legal() {
        assert!(is_legal_transition(SessionState::Pending, SessionState::Resolving));
    }

    #[test]
    fn pending_to_ready_is_illegal() {
        assert!(!is_legal_transition(SessionState::Pending, SessionState::Ready));
    }

    #[test]
    fn ready_is_sticky_against_transcoding() {
        assert!(!is_legal_transition(SessionState::Ready, SessionState::Transcoding));
    }

    #[test]
    fn ready_to_ready_is_idempotent() {
        assert!(is_legal_transition(SessionState::Ready, SessionState::Ready));
    }

    #[test]
    fn any_state_can_close() {
        for s in [
            SessionState::Pending,
            SessionState::Resolving,
            SessionState::Queued,
            SessionState::Transcoding,
            SessionState::Ready,
            SessionState::Failed,
        ] {
            assert!(is_legal_transition(s, SessionState::Closed));
        }
    }

    #[test]
    fn fail_sets_error_and_state() {
        let mut rec = SessionRecord::new(
            "abcd1234".into(),
            SourceKind::Torrent,
            PathBuf::from("/tmp/abcd1234"),
        );
        rec.transition_to(SessionState::Resolving).unwrap();
        rec.transition_to(SessionState::Queued).unwrap();
        rec.fail(DomainError::NoPlayableFile).unwrap();
        assert_eq!(rec.state, SessionState::Failed);
        assert_eq!(rec.error, Some(DomainError::NoPlayableFile));
    }

    #[test]
    fn segment_duration_immutable_once_set() {
        let mut rec = SessionRecord::new(
            "abcd1234".into(),
            SourceKind::Torrent,
            PathBuf::from("/tmp/abcd1234"),
        );
        rec.set_segment_duration(4).unwrap();
        rec.set_segment_duration(4).unwrap(); // idempotent
        assert!(rec.set_segment_duration(8).is_err());
        assert_eq!(rec.segment_duration_seconds, Some(4));
    }

    #[test]
    fn seek_by_time_matches_scenario_2() {
        let outcome = seek_by_time(17.0, 4, 100).unwrap();
        assert_eq!(outcome.current_segment, 4);
        assert_eq!(outcome.playback_position_seconds, 16.0);
    }

    #[test]
    fn seek_out_of_range_matches_scenario_3() {
        let err = seek_to_segment(999, 4, 100).unwrap_err();
        assert_eq!(
            err,
            DomainError::OutOfRange("invalid segment 999, valid range: 0-99".into())
        );
    }

    #[test]
    fn seek_permissive_when_no_segments_yet() {
        assert!(seek_to_segment(5, 4, 0).is_ok());
    }

    #[test]
    fn seek_window_centers_and_clamps() {
        let w = seek_window_range(50, 100);
        assert_eq!(w.len(), 20);
        assert!(w.contains(&50));

        let w_start = seek_window_range(2, 100);
        assert_eq!(w_start[0], 0);

        let w_end = seek_window_range(98, 100);
        assert_eq!(*w_end.last().unwrap(), 99);

        let w_small = seek_window_range(1, 3);
        assert_eq!(w_small, vec![0, 1, 2]);
    }
}
