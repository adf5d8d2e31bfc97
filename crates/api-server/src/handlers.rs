//! Route handlers for the streaming gateway's HTTP surface (spec.md §6).

use crate::{file_content_type, serve_file_response, stream_urls, ApiResponse, AppState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use domain::{format_duration, language::SUPPORTED_LANGUAGES, DomainError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::Ordering;
use tokio_util::io::ReaderStream;
use tracing::warn;

#[derive(Deserialize)]
pub(crate) struct TorrentRequest {
    magnet: String,
}

pub(crate) async fn create_torrent_stream(
    State(state): State<AppState>,
    Json(req): Json<TorrentRequest>,
) -> Response {
    if req.magnet.trim().is_empty() {
        return DomainError::BadRequest("magnet is required".into()).into_response();
    }
    match state.gateway.create_torrent_stream(&req.magnet).await {
        Ok(id) => {
            let base = format!("http://localhost:{}", state.config.port);
            Json(ApiResponse::success(stream_urls(&base, &id))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub(crate) struct UrlRequest {
    url: String,
}

pub(crate) async fn create_url_stream(State(state): State<AppState>, Json(req): Json<UrlRequest>) -> Response {
    if req.url.trim().is_empty() {
        return DomainError::BadRequest("url is required".into()).into_response();
    }
    match state.gateway.create_url_stream(&req.url).await {
        Ok(id) => {
            let base = format!("http://localhost:{}", state.config.port);
            Json(ApiResponse::success(stream_urls(&base, &id))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn get_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.gateway.snapshot(&id) {
        Ok(snapshot) => Json(ApiResponse::success(snapshot)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn get_hls_file(
    State(state): State<AppState>,
    Path((id, file)): Path<(String, String)>,
) -> Response {
    match state.gateway.resolve_hls_path(&id, &file) {
        Ok(path) => serve_file_response(path, file_content_type(&file)).await,
        Err(e) => e.into_response(),
    }
}

pub(crate) async fn get_subtitle_file(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
) -> Response {
    match state.gateway.resolve_subtitle_path(&id, &filename) {
        Ok(path) => match tokio::fs::File::open(&path).await {
            Ok(file) => {
                let stream = ReaderStream::new(file);
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                    .body(Body::from_stream(stream))
                    .unwrap()
            }
            Err(_) => DomainError::NotFound(filename).into_response(),
        },
        Err(e) => e.into_response(),
    }
}

/// `GET /stream/:id`: direct byte-range serving of the selected source
/// file (spec.md §6 byte-range semantics).
pub(crate) async fn get_stream_range(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let size = match state.gateway.source_length(&id) {
        Ok(size) => size,
        Err(e) => return e.into_response(),
    };

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok()).and_then(|v| parse_range(v, size));

    let ready = state.gateway.snapshot(&id).map(|s| s.ready).unwrap_or(false);
    let subtitle_count = state.gateway.subtitles_list(&id).map(|(_, extracted)| extracted.len()).unwrap_or(0);

    let (status, start, end) = match range {
        None => (StatusCode::OK, 0, size.saturating_sub(1)),
        Some(Err(())) => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::empty())
                .unwrap();
        }
        Some(Ok((start, end))) => (StatusCode::PARTIAL_CONTENT, start, end),
    };

    let (stream, _total) = match state.gateway.open_source_range(&id, start, Some(end)).await {
        Ok(pair) => pair,
        Err(e) => return e.into_response(),
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, end - start + 1)
        .header("X-Stream-Ready", ready.to_string())
        .header("X-Subtitle-Count", subtitle_count.to_string());

    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"));
    }

    builder.body(Body::from_stream(ReaderStream::new(stream))).unwrap()
}

/// Parses a `Range: bytes=start-end` header against `size` (spec.md
/// §6). `None` = unparsable or absent (caller serves the full body);
/// `Some(Err(()))` = a well-formed but unsatisfiable range (416);
/// `Some(Ok((start, end)))` = a valid, inclusive byte range.
fn parse_range(value: &str, size: u64) -> Option<Result<(u64, u64), ()>> {
    let value = value.strip_prefix("bytes=")?;
    let (start_s, end_s) = value.split_once('-')?;
    let start: u64 = start_s.parse().ok()?;
    let end: u64 = if end_s.is_empty() { size.saturating_sub(1) } else { end_s.parse().ok()? };

    if size == 0 || start >= size || end >= size || start > end {
        Some(Err(()))
    } else {
        Some(Ok((start, end)))
    }
}

pub(crate) async fn close_stream(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.gateway.close(&id).await {
        Ok(()) => Json(ApiResponse::success(json!({"closed": true}))).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub(crate) struct SeekRequest {
    time: Option<f64>,
    segment: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SeekResponse {
    success: bool,
    current_segment: u64,
    playback_position: f64,
    playback_position_formatted: String,
    message: String,
}

pub(crate) async fn post_seek(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SeekRequest>,
) -> Response {
    match state.gateway.seek(&id, req.time, req.segment) {
        Ok(outcome) => Json(SeekResponse {
            success: true,
            current_segment: outcome.current_segment,
            playback_position: outcome.playback_position_seconds,
            playback_position_formatted: format_duration(outcome.playback_position_seconds),
            message: "seek successful".into(),
        })
        .into_response(),
        Err(DomainError::OutOfRange(msg)) | Err(DomainError::BadRequest(msg)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SeekInfoWindowEntry {
    segment: u64,
    available: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SeekInfoResponse {
    current_position: f64,
    current_segment: u64,
    segment_duration: Option<u32>,
    total_segments: u64,
    window: Vec<SeekInfoWindowEntry>,
}

pub(crate) async fn get_seek_info(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.gateway.seek_info(&id).await {
        Ok((outcome, segment_duration, total_segments, window)) => Json(ApiResponse::success(SeekInfoResponse {
            current_position: outcome.playback_position_seconds,
            current_segment: outcome.current_segment,
            segment_duration,
            total_segments,
            window: window.into_iter().map(|w| SeekInfoWindowEntry { segment: w.segment, available: w.available }).collect(),
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubtitlesListResponse {
    available: Vec<domain::SubtitleDetected>,
    extracted: Vec<domain::SubtitleExtracted>,
    language_supported: Vec<&'static str>,
}

pub(crate) async fn get_subtitles_list(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.gateway.subtitles_list(&id) {
        Ok((available, extracted)) => Json(ApiResponse::success(SubtitlesListResponse {
            available,
            extracted,
            language_supported: SUPPORTED_LANGUAGES.to_vec(),
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime: u64,
    ffmpeg: bool,
    ffprobe: bool,
    active_streams: usize,
    features: Vec<&'static str>,
}

pub(crate) async fn get_health(State(state): State<AppState>) -> Response {
    let ffmpeg = state.ffmpeg_available.load(Ordering::Relaxed);
    let ffprobe = state.ffprobe_available.load(Ordering::Relaxed);
    if !ffmpeg {
        warn!("health check: ffmpeg unavailable");
    }
    Json(ApiResponse::success(HealthResponse {
        status: "ok",
        uptime: state.started_at.elapsed().as_secs(),
        ffmpeg,
        ffprobe,
        active_streams: state.gateway.registry.live_count(),
        features: vec!["torrent", "url", "hls", "byte-range", "subtitles", "seek"],
    }))
    .into_response()
}

pub(crate) async fn get_resources(State(state): State<AppState>) -> Response {
    Json(ApiResponse::success(state.gateway.resources().await)).into_response()
}
