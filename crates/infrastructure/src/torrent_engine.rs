//! Torrent protocol engine adapter (C4 torrent variant, spec.md §4.4),
//! backed by `librqbit` — the closest published crate to spec.md §1's
//! assumed `AddMagnet → Torrent{files[], on(...), createReadStream}`
//! collaborator. Grounded on the pack's `librqbit`/`librqbit_core`
//! streaming retrievals and on `other_examples` magnet-streaming
//! integrations (`miru`, `magnolia`, `ciel`).

use async_trait::async_trait;
use domain::{ByteStream, DomainError, TorrentEngine, TorrentFileEntry, TorrentHandle, TorrentStats};
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, Api, ManagedTorrent, Session, SessionOptions};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{info, warn};

/// Wraps a `librqbit::Session` as the process-wide torrent engine.
pub struct LibrqbitTorrentEngine {
    session: Arc<Session>,
    api: Api,
}

impl LibrqbitTorrentEngine {
    pub async fn new(download_dir: PathBuf) -> Result<Self, DomainError> {
        tokio::fs::create_dir_all(&download_dir)
            .await
            .map_err(|e| DomainError::StorageError(e.to_string()))?;

        let opts = SessionOptions {
            disable_dht: false,
            disable_dht_persistence: true,
            enable_upnp_port_forwarding: false,
            ..Default::default()
        };

        let session = Session::new_with_opts(download_dir, opts)
            .await
            .map_err(|e| DomainError::TorrentError(e.to_string()))?;
        let api = Api::new(session.clone(), None);

        Ok(Self { session, api })
    }

    async fn wait_for_metadata(handle: &Arc<ManagedTorrent>) -> Result<(), DomainError> {
        let timeout = Duration::from_secs(60);
        let start = std::time::Instant::now();
        loop {
            if handle.stats().total_bytes > 0 {
                return Ok(());
            }
            if start.elapsed() > timeout {
                return Err(DomainError::TorrentError(
                    "timed out waiting for torrent metadata".into(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

#[async_trait]
impl TorrentEngine for LibrqbitTorrentEngine {
    async fn add_magnet(&self, magnet: &str) -> Result<Box<dyn TorrentHandle>, DomainError> {
        let add_torrent = AddTorrent::from_url(magnet);
        let opts = AddTorrentOptions { overwrite: true, ..Default::default() };

        let response = self
            .session
            .add_torrent(add_torrent, Some(opts))
            .await
            .map_err(|e| DomainError::TorrentError(e.to_string()))?;

        let (torrent_id, handle) = match response {
            AddTorrentResponse::Added(id, handle) => (id, handle),
            AddTorrentResponse::AlreadyManaged(id, handle) => (id, handle),
            AddTorrentResponse::ListOnly(_) => {
                return Err(DomainError::TorrentError(
                    "torrent was added in list-only mode".into(),
                ));
            }
        };

        Self::wait_for_metadata(&handle).await?;

        let details = self
            .api
            .api_torrent_details(torrent_id.into())
            .map_err(|e| DomainError::TorrentError(e.to_string()))?;

        let name = details
            .name
            .clone()
            .unwrap_or_else(|| format!("torrent-{torrent_id}"));
        let info_hash = details.info_hash.clone();

        let files = details
            .files
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, f)| TorrentFileEntry { index, name: f.name, length: f.length })
            .collect();

        info!(torrent_id, name, "torrent metadata resolved");

        Ok(Box::new(LibrqbitTorrentHandle {
            torrent_id,
            handle,
            api: self.api.clone(),
            name,
            info_hash,
            files,
        }))
    }
}

struct LibrqbitTorrentHandle {
    torrent_id: usize,
    handle: Arc<ManagedTorrent>,
    api: Api,
    name: String,
    info_hash: String,
    files: Vec<TorrentFileEntry>,
}

#[async_trait]
impl TorrentHandle for LibrqbitTorrentHandle {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn info_hash(&self) -> String {
        self.info_hash.clone()
    }

    fn files(&self) -> Vec<TorrentFileEntry> {
        self.files.clone()
    }

    async fn stats(&self) -> TorrentStats {
        let details = match self.api.api_torrent_details(self.torrent_id.into()) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "failed to read torrent stats");
                return TorrentStats::default();
            }
        };

        let Some(stats) = details.stats else {
            return TorrentStats::default();
        };

        let progress_percent = if stats.total_bytes > 0 {
            (stats.progress_bytes as f64 / stats.total_bytes as f64) * 100.0
        } else {
            0.0
        };

        let (download_speed_bps, num_peers) = stats
            .live
            .as_ref()
            .map(|l| ((l.download_speed.mbps * 125_000.0) as u64, l.snapshot.peer_stats.live as u32))
            .unwrap_or((0, 0));

        TorrentStats {
            num_peers,
            progress_percent,
            download_speed_bps,
            ratio: if stats.progress_bytes > 0 {
                stats.uploaded_bytes as f64 / stats.progress_bytes as f64
            } else {
                0.0
            },
        }
    }

    async fn open_range(
        &self,
        file_index: usize,
        start: u64,
        end: Option<u64>,
    ) -> Result<ByteStream, DomainError> {
        let mut stream = self
            .handle
            .stream(file_index)
            .map_err(|e| DomainError::TorrentError(format!("failed to open file stream: {e}")))?;

        if start > 0 {
            stream
                .seek(SeekFrom::Start(start))
                .await
                .map_err(|e| DomainError::TorrentError(format!("seek failed: {e}")))?;
        }

        let boxed: ByteStream = match end {
            Some(end) => Box::pin(stream.take(end - start + 1)),
            None => Box::pin(stream),
        };
        Ok(boxed)
    }

    async fn extract_to_file(&self, file_index: usize, dest: &Path) -> Result<(), DomainError> {
        let mut stream = self
            .handle
            .stream(file_index)
            .map_err(|e| DomainError::TorrentError(format!("failed to open file stream: {e}")))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| DomainError::StorageError(e.to_string()))?;

        tokio::io::copy(&mut stream, &mut file)
            .await
            .map_err(|e| DomainError::TorrentError(format!("extraction failed: {e}")))?;

        Ok(())
    }
}
