//! Collaborator interfaces (spec.md §1, §9 Design Notes).
//!
//! These are the seams at which the torrent engine, URL downloader,
//! media prober, transcoder and resource probe — all out of scope per
//! spec.md §1 — plug in. `crates/infrastructure` provides the
//! concrete adapters; `crates/application` depends only on these
//! traits, never on a specific backend.

use crate::entities::MediaInfo;
use crate::errors::DomainError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncRead;

/// One file inside a resolved torrent (spec.md §4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFileEntry {
    pub index: usize,
    pub name: String,
    pub length: u64,
}

/// Live swarm statistics surfaced in the status snapshot (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TorrentStats {
    pub num_peers: u32,
    pub progress_percent: f64,
    pub download_speed_bps: u64,
    pub ratio: f64,
}

/// A byte stream that can be opened at an arbitrary range without
/// staging the whole file first (spec.md §4.4: "must not stage the
/// whole file on disk before transcoding").
pub type ByteStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// A resolved torrent: its file list plus the ability to read any one
/// of them as a live byte stream (spec.md §1's assumed
/// `Torrent{files[], on(...), File.createReadStream(range?)}`).
#[async_trait]
pub trait TorrentHandle: Send + Sync {
    fn name(&self) -> String;
    fn info_hash(&self) -> String;
    fn files(&self) -> Vec<TorrentFileEntry>;
    async fn stats(&self) -> TorrentStats;

    /// Opens `file_index` for reading starting at `start`, to `end`
    /// (inclusive) or EOF if `None`. Must stream directly from the
    /// swarm; must not require the file to be complete on disk.
    async fn open_range(
        &self,
        file_index: usize,
        start: u64,
        end: Option<u64>,
    ) -> Result<ByteStream, DomainError>;

    /// Streams the entirety of `file_index` into `dest`, used for
    /// subtitle extraction (spec.md §4.4). Failures here are logged
    /// by the caller, never fatal to the session.
    async fn extract_to_file(&self, file_index: usize, dest: &Path) -> Result<(), DomainError>;
}

/// The torrent protocol engine collaborator (spec.md §1).
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    async fn add_magnet(&self, magnet: &str) -> Result<Box<dyn TorrentHandle>, DomainError>;
}

/// The `yt-dlp`-equivalent URL downloader collaborator (spec.md §4.4).
/// Unlike the torrent variant this one stages a complete file.
#[async_trait]
pub trait UrlDownloader: Send + Sync {
    /// Downloads `url` into `dest_dir`, following spec.md §4.4's
    /// `[-f, best, -o, <folder>/%(title)s.%(ext)s, <url>]` shape.
    /// Returns `Ok(())` on exit code 0; scanning `dest_dir` for the
    /// resulting playable file is the caller's job.
    async fn download(&self, url: &str, dest_dir: &Path) -> Result<(), DomainError>;
}

/// The `ffprobe`-equivalent media prober collaborator (spec.md §1).
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, DomainError>;
    /// Best-effort video codec hint (e.g. `"h264"`), used to decide
    /// copy-mux eligibility (spec.md §4.5). `Ok(None)` if undetected.
    async fn probe_video_codec(&self, path: &Path) -> Result<Option<String>, DomainError>;
}

/// Which HLS production mode the Transcoder Scheduler selected
/// (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeMode {
    CopyMux,
    BaselineEncode,
}

/// Where the transcoder reads its input from (spec.md §4.4/§4.5: a
/// live torrent byte-stream piped to stdin, or a staged file path).
pub enum TranscodeInput {
    Stdin(ByteStream),
    FilePath(PathBuf),
}

/// Parameters for one transcoder invocation (spec.md §4.5).
pub struct TranscodeJobSpec {
    pub input: TranscodeInput,
    pub output_dir: PathBuf,
    pub segment_duration_seconds: u32,
    pub thread_count: usize,
    pub mode: TranscodeMode,
}

/// Terminal outcome of a transcoder subprocess, delivered exactly once
/// (spec.md §9 Design Notes: `started()`, `failed(err)`, `finished()`
/// collapse here to the two terminal edges the scheduler needs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Finished,
    Failed(String),
}

/// A running transcoder subprocess (spec.md §4.5, §9).
#[async_trait]
pub trait TranscoderHandle: Send + Sync {
    /// Waits for the subprocess to exit. Must be safe to call exactly
    /// once; the scheduler releases a concurrency slot when this
    /// resolves.
    async fn wait(&mut self) -> TranscodeOutcome;
    /// Kills the subprocess if still alive (spec.md §5 teardown).
    async fn kill(&mut self);
}

/// Spawns transcoder subprocesses (the `ffmpeg`-equivalent collaborator,
/// spec.md §1).
#[async_trait]
pub trait TranscoderProcess: Send + Sync {
    async fn spawn(&self, spec: TranscodeJobSpec) -> Result<Box<dyn TranscoderHandle>, DomainError>;
}

/// A single resource reading from the Resource Probe (C1, spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceReading {
    pub memory_mb: u64,
    pub cpu_count: usize,
}

/// The Resource Probe collaborator (spec.md §4.1): detects container
/// CPU/memory limits, re-probed on a fixed interval by the caller.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn probe(&self) -> ResourceReading;
}
