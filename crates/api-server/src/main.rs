//! HTTP surface for the streaming gateway (spec.md §6). Thin by
//! design: every handler here does argument parsing, calls into
//! `StreamGateway`, and translates the result to the wire shape. All
//! state-owning logic lives in `crates/application`.

use application::{GatewayConfig, RetentionConfig, StreamGateway};
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use domain::policy::PolicyLimits;
use domain::DomainError;
use infrastructure::{
    CgroupResourceProbe, FfmpegTranscoderProcess, FfprobeMediaProber, LibrqbitTorrentEngine, YtDlpDownloader,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod handlers;

use handlers::*;

#[derive(Clone)]
struct AppState {
    gateway: Arc<StreamGateway>,
    config: Arc<config::Config>,
    started_at: Instant,
    ffmpeg_available: Arc<AtomicBool>,
    ffprobe_available: Arc<AtomicBool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("api_server=debug,application=debug,infrastructure=debug,tower_http=debug")
        .init();

    let cfg = config::Config::from_env();
    info!(port = cfg.port, session_root = %cfg.session_root.display(), "starting streaming gateway");

    let ffmpeg_available = Arc::new(AtomicBool::new(check_tool(&cfg.ffmpeg_binary, "-version").await));
    let ffprobe_available = Arc::new(AtomicBool::new(check_tool(&cfg.ffprobe_binary, "-version").await));
    if !ffmpeg_available.load(Ordering::Relaxed) {
        warn!(binary = %cfg.ffmpeg_binary, "ffmpeg not found on PATH; affected sessions will fail with ffmpeg_missing");
    }
    if !ffprobe_available.load(Ordering::Relaxed) {
        warn!(binary = %cfg.ffprobe_binary, "ffprobe not found on PATH");
    }

    let torrent_engine = LibrqbitTorrentEngine::new(cfg.session_root.join("_torrent-cache")).await?;
    let torrent_engine: Arc<dyn domain::TorrentEngine> = Arc::new(torrent_engine);
    let url_downloader: Arc<dyn domain::UrlDownloader> = Arc::new(YtDlpDownloader::new(cfg.ytdlp_binary.clone()));
    let media_prober: Arc<dyn domain::MediaProber> = Arc::new(FfprobeMediaProber::new(cfg.ffprobe_binary.clone()));
    let transcoder: Arc<dyn domain::TranscoderProcess> =
        Arc::new(FfmpegTranscoderProcess::new(cfg.ffmpeg_binary.clone()));
    let resource_probe: Arc<dyn domain::ResourceProbe> =
        Arc::new(CgroupResourceProbe::new(Duration::from_millis(cfg.resource_watch_interval_ms)));

    let gateway_config = GatewayConfig {
        session_root: cfg.session_root.clone(),
        policy_limits: PolicyLimits {
            min_segment_seconds: cfg.min_segment_seconds,
            max_segment_seconds: cfg.max_segment_seconds,
            target_streams_per_segment: cfg.target_streams_per_segment,
            max_concurrent_override: cfg.max_concurrent_ffmpeg,
            threads_per_transcoder_override: cfg.ffmpeg_threads,
        },
        retention: RetentionConfig {
            max_storage_bytes: cfg.max_stream_storage_bytes,
            keep_segments: cfg.keep_segments,
            readiness_interval: Duration::from_millis(cfg.segment_monitor_interval_ms.min(1000)),
            retention_interval: Duration::from_secs(15),
        },
        idle_timeout: chrono::Duration::minutes(cfg.idle_timeout_minutes),
    };

    let gateway = StreamGateway::new(
        gateway_config,
        torrent_engine,
        url_downloader,
        media_prober,
        transcoder,
        resource_probe,
    );
    gateway.spawn_idle_reaper();

    let state = AppState {
        gateway,
        config: Arc::new(cfg.clone()),
        started_at: Instant::now(),
        ffmpeg_available,
        ffprobe_available,
    };

    let app = Router::new()
        .route("/stream", post(create_torrent_stream))
        .route("/stream-yt", post(create_url_stream))
        .route("/status/:id", get(get_status))
        .route("/hls/:id/*file", get(get_hls_file))
        .route("/stream/:id", get(get_stream_range))
        .route("/stream/:id", delete(close_stream))
        .route("/seek/:id", post(post_seek))
        .route("/seek-info/:id", get(get_seek_info))
        .route("/subtitles-list/:id", get(get_subtitles_list))
        .route("/subtitles/:id/:filename", get(get_subtitle_file))
        .route("/health", get(get_health))
        .route("/resources", get(get_resources))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(cfg.bind_address()).await?;
    info!(address = %cfg.bind_address(), "streaming gateway listening");

    let shutdown = shutdown_signal();
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("streaming gateway shut down cleanly");
    Ok(())
}

async fn check_tool(binary: &str, probe_arg: &str) -> bool {
    tokio::process::Command::new(binary)
        .arg(probe_arg)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .is_ok()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining in-flight requests");
}

/// Generic JSON envelope the teacher's api-server wraps every handler
/// response in (`ApiResponse<T>{success, data, message}`).
#[derive(Serialize)]
pub(crate) struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { success: true, data: Some(data), message: None }
    }

    pub fn error(message: impl Into<String>) -> ApiResponse<T> {
        ApiResponse { success: false, data: None, message: Some(message.into()) }
    }
}

/// Translates a [`DomainError`] to its HTTP status (spec.md §7) and the
/// `ApiResponse` envelope every JSON handler uses for failures.
impl IntoResponse for DomainError {
    fn into_response(self) -> Response {
        let status = match &self {
            DomainError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DomainError::NoPlayableFile => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::ExternalToolMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DomainError::ExternalToolFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DomainError::TranscoderError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::TorrentError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::OutOfRange(_) => StatusCode::BAD_REQUEST,
            DomainError::AccessDenied(_) => StatusCode::FORBIDDEN,
            DomainError::InvalidTransition(_) => StatusCode::CONFLICT,
        };
        let body = Json(ApiResponse::<()>::error(self.to_string()));
        (status, body).into_response()
    }
}

pub(crate) fn stream_urls(base: &str, id: &str) -> StreamUrls {
    StreamUrls {
        stream_id: id.to_string(),
        hls_url: format!("{base}/hls/{id}/playlist.m3u8"),
        mp4_url: format!("{base}/stream/{id}"),
        status_url: format!("{base}/status/{id}"),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StreamUrls {
    pub stream_id: String,
    pub hls_url: String,
    pub mp4_url: String,
    pub status_url: String,
}

pub(crate) fn file_content_type(name: &str) -> &'static str {
    if name.ends_with(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else if name.ends_with(".ts") {
        "video/mp2t"
    } else {
        "application/octet-stream"
    }
}

pub(crate) async fn serve_file_response(path: std::path::PathBuf, content_type: &'static str) -> Response {
    match tokio::fs::File::open(&path).await {
        Ok(file) => {
            let stream = ReaderStream::new(file);
            let body = Body::from_stream(stream);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .body(body)
                .unwrap()
        }
        Err(_) => DomainError::NotFound(format!("{}", path.display())).into_response(),
    }
}
