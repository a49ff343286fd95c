//! Playback endpoints
//!
//! The streaming surface the decision engine's URLs point at: raw part
//! delivery, remux with mid-stream seek, DASH with the authoritative
//! `X-Dash-Start-Time-Ms` start, keyframe queries, trickplay thumbnails
//! and subtitle conversion.

use std::process::Stdio;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::media::subtitles;
use crate::model::capability::CapabilityProfile;
use crate::playback::engine::DecideInput;
use crate::playback::seek::dash_start_time_ms;

use super::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/playback/session", post(open_session))
        .route("/api/v1/playback/decide", post(decide))
        .route("/api/v1/playback/part/{part_id}/file", get(serve_file))
        // "remux-seek.mp4" and friends arrive as one path segment; the
        // container is split off in the handler.
        .route("/api/v1/playback/part/{part_id}/{remux_spec}", get(remux_seek))
        .route("/api/v1/playback/part/{part_id}/dash/manifest.mpd", get(dash_manifest))
        .route("/api/v1/playback/part/{part_id}/dash-seek/manifest.mpd", get(dash_seek))
        .route("/api/v1/playback/part/{part_id}/keyframe", get(keyframe))
        .route("/api/v1/playback/part/{part_id}/trickplay", get(trickplay_index))
        .route("/api/v1/playback/part/{part_id}/trickplay/{index}", get(trickplay_one))
        .route("/api/v1/playback/part/{part_id}/subtitle/{stream}", get(subtitle))
        .route("/api/v1/playback/generator", post(create_generator))
        .route("/api/v1/playback/generator/{public_id}/chunk", get(generator_chunk))
        .route("/api/v1/playback/generator/{public_id}/jump", post(generator_jump))
}

/// Error envelope: playback refusals carry a message instead of a plan.
fn refusal(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn load_part(
    state: &AppState,
    part_id: Uuid,
) -> Result<crate::model::MediaPart, Response> {
    match state.db.media().get_part(part_id).await {
        Ok(Some(part)) => Ok(part),
        Ok(None) => Err(refusal(StatusCode::NOT_FOUND, "media part not found")),
        Err(e) => {
            warn!(part_id = %part_id, error = %e, "Part lookup failed");
            Err(refusal(StatusCode::INTERNAL_SERVER_ERROR, "store error"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenSessionRequest {
    user_session: String,
    capability_profile: CapabilityProfile,
}

async fn open_session(
    State(state): State<AppState>,
    Json(request): Json<OpenSessionRequest>,
) -> Response {
    match state
        .sessions
        .open_session(&request.user_session, &request.capability_profile)
        .await
    {
        Ok(session) => Json(serde_json::json!({
            "sessionId": session.id,
            "expiresAt": session.expires_at.to_string(),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Session open failed");
            refusal(StatusCode::INTERNAL_SERVER_ERROR, "session open failed")
        }
    }
}

async fn decide(State(state): State<AppState>, Json(input): Json<DecideInput>) -> Response {
    match state.sessions.decide(input).await {
        Ok(output) => Json(output).into_response(),
        Err(e) => {
            debug!(error = %e, "Playback decision refused");
            refusal(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateGeneratorRequest {
    session_id: Uuid,
    seed: crate::model::PlaylistSeed,
    #[serde(default)]
    shuffle: bool,
    #[serde(default)]
    repeat: bool,
    chunk_size: Option<i64>,
}

async fn create_generator(
    State(state): State<AppState>,
    Json(request): Json<CreateGeneratorRequest>,
) -> Response {
    match state
        .playlists
        .create(
            request.session_id,
            request.seed,
            request.shuffle,
            request.repeat,
            request.chunk_size,
        )
        .await
    {
        Ok(generator) => Json(serde_json::json!({
            "generatorId": generator.public_id,
            "totalCount": generator.total_count,
            "chunkSize": generator.chunk_size,
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Generator create failed");
            refusal(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChunkQuery {
    #[serde(default)]
    start: i64,
    #[serde(default = "default_chunk_limit")]
    limit: i64,
}

fn default_chunk_limit() -> i64 {
    20
}

async fn generator_chunk(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
    Query(query): Query<ChunkQuery>,
) -> Response {
    match state.playlists.chunk(&public_id, query.start, query.limit).await {
        Ok(chunk) => Json(serde_json::json!({
            "generatorId": chunk.generator_id,
            "totalCount": chunk.total_count,
            "items": chunk.items,
        }))
        .into_response(),
        Err(e) => refusal(StatusCode::NOT_FOUND, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct JumpRequest {
    index: i64,
}

async fn generator_jump(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
    Json(request): Json<JumpRequest>,
) -> Response {
    match state.playlists.jump_to(&public_id, request.index).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => refusal(StatusCode::NOT_FOUND, e.to_string()),
    }
}

async fn serve_file(State(state): State<AppState>, Path(part_id): Path<Uuid>) -> Response {
    let part = match load_part(&state, part_id).await {
        Ok(part) => part,
        Err(response) => return response,
    };
    let file = match tokio::fs::File::open(&part.file_path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %part.file_path, error = %e, "Part file unreadable");
            return refusal(StatusCode::NOT_FOUND, "file missing on disk");
        }
    };
    let mime = mime_guess::from_path(&part.file_path).first_or_octet_stream();
    (
        [(header::CONTENT_TYPE, mime.to_string())],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct SeekQuery {
    #[serde(rename = "seekMs", default)]
    seek_ms: i64,
}

/// Remux the part into the requested container, starting at (or just
/// before) the requested millisecond. `-c copy` keeps elementary streams
/// untouched; only the wrapper changes.
async fn remux_seek(
    State(state): State<AppState>,
    Path((part_id, remux_spec)): Path<(Uuid, String)>,
    Query(query): Query<SeekQuery>,
) -> Response {
    let Some(container) = remux_spec.strip_prefix("remux-seek.").map(str::to_string) else {
        return refusal(StatusCode::NOT_FOUND, "unknown playback endpoint");
    };

    let part = match load_part(&state, part_id).await {
        Ok(part) => part,
        Err(response) => return response,
    };

    let format = match container.as_str() {
        "mp4" => "mp4",
        "mkv" => "matroska",
        "webm" => "webm",
        "ts" => "mpegts",
        other => {
            return refusal(StatusCode::BAD_REQUEST, format!("unsupported container '{other}'"))
        }
    };

    let mut cmd = Command::new(&state.config.ffmpeg_path);
    if query.seek_ms > 0 {
        cmd.args(["-ss", &format!("{:.3}", query.seek_ms as f64 / 1000.0)]);
    }
    cmd.args(["-i", &part.file_path])
        .args(["-c", "copy"])
        .args(["-movflags", "frag_keyframe+empty_moov"])
        .args(["-f", format, "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, "Remux spawn failed");
            return refusal(StatusCode::INTERNAL_SERVER_ERROR, "remux failed");
        }
    };
    let Some(stdout) = child.stdout.take() else {
        return refusal(StatusCode::INTERNAL_SERVER_ERROR, "remux failed");
    };

    // The child lives as long as the response body is being read.
    tokio::spawn(async move {
        let _ = child.wait().await;
    });

    let mime = mime_guess::from_ext(&container).first_or_octet_stream();
    (
        [(header::CONTENT_TYPE, mime.to_string())],
        Body::from_stream(ReaderStream::new(stdout)),
    )
        .into_response()
}

async fn dash_manifest(State(state): State<AppState>, Path(part_id): Path<Uuid>) -> Response {
    serve_dash(state, part_id, None).await
}

/// DASH reload for a seek overshoot. The server rounds the requested start
/// down to a segment boundary and reports the authoritative value in
/// `X-Dash-Start-Time-Ms`.
async fn dash_seek(
    State(state): State<AppState>,
    Path(part_id): Path<Uuid>,
    Query(query): Query<SeekQuery>,
) -> Response {
    serve_dash(state, part_id, Some(query.seek_ms)).await
}

async fn serve_dash(state: AppState, part_id: Uuid, seek_ms: Option<i64>) -> Response {
    let part = match load_part(&state, part_id).await {
        Ok(part) => part,
        Err(response) => return response,
    };

    // The decision engine starts jobs tied to a session; a manifest fetch
    // for an unknown job gets its own session-less encode window via the
    // session the decision recorded. Here we look the active job up by its
    // output manifest.
    let session_id = match active_session_for_part(&state, part_id).await {
        Some(id) => id,
        None => return refusal(StatusCode::CONFLICT, "no active playback session for part"),
    };

    let start_ms = seek_ms.map(dash_start_time_ms);
    let config = state.decision_config.clone();
    let profile = match state.db.playback_sessions().capability_profile(session_id).await {
        Ok(Some(profile)) => profile,
        _ => return refusal(StatusCode::CONFLICT, "session has no capability profile"),
    };
    let decision = crate::playback::decision::decide_part(&part, &profile, &config);
    // A remux-capable part can still be DASH-requested after a seek; fall
    // back to a plain h264/aac target.
    let encode_target = decision.target.unwrap_or(crate::model::TranscodeTarget {
        video_codec: "h264".to_string(),
        audio_codec: "aac".to_string(),
        video_bitrate: None,
        audio_bitrate: None,
        max_width: None,
        max_height: None,
        audio_channels: None,
        hardware_accel: state.config.use_hardware_acceleration,
        tone_mapping: state.config.enable_tone_mapping,
    });

    let job = match state
        .supervisor
        .start(session_id, part.clone(), encode_target, start_ms)
        .await
    {
        Ok(job) => job,
        Err(e) => {
            warn!(part_id = %part_id, error = %e, "Transcode start failed");
            return refusal(StatusCode::INTERNAL_SERVER_ERROR, "transcode failed to start");
        }
    };

    // FFmpeg needs a moment to write the first manifest.
    let manifest_path = std::path::Path::new(&job.output_dir).join("manifest.mpd");
    let manifest = wait_for_file(&manifest_path, Duration::from_secs(10)).await;
    let Some(manifest) = manifest else {
        return refusal(StatusCode::GATEWAY_TIMEOUT, "manifest not ready");
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/dash+xml"),
    );
    if let Some(start) = start_ms {
        if let Ok(value) = axum::http::HeaderValue::from_str(&start.to_string()) {
            headers.insert("X-Dash-Start-Time-Ms", value);
        }
    }
    (headers, manifest).into_response()
}

async fn active_session_for_part(state: &AppState, part_id: Uuid) -> Option<Uuid> {
    let row = sqlx::query_scalar::<_, String>(
        "SELECT id FROM playback_sessions WHERE current_media_part_id = $1 \
         ORDER BY last_heartbeat_at DESC LIMIT 1",
    )
    .bind(part_id.to_string())
    .fetch_optional(state.db.pool())
    .await
    .ok()
    .flatten()?;
    Uuid::parse_str(&row).ok()
}

async fn wait_for_file(path: &std::path::Path, timeout: Duration) -> Option<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(bytes) = tokio::fs::read(path).await {
            if !bytes.is_empty() {
                return Some(bytes);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[derive(Debug, Deserialize)]
struct KeyframeQuery {
    #[serde(rename = "targetMs")]
    target_ms: i64,
}

/// Nearest keyframe at or before the target, per part metadata.
async fn keyframe(
    State(state): State<AppState>,
    Path(part_id): Path<Uuid>,
    Query(query): Query<KeyframeQuery>,
) -> Response {
    let part = match load_part(&state, part_id).await {
        Ok(part) => part,
        Err(response) => return response,
    };
    match state
        .seek
        .seek_to_keyframe(part_id, &part.file_path, query.target_ms)
        .await
    {
        Ok(seek_time_ms) => Json(serde_json::json!({ "seekTimeMs": seek_time_ms })).into_response(),
        Err(e) => {
            warn!(part_id = %part_id, error = %e, "Keyframe query failed");
            refusal(StatusCode::INTERNAL_SERVER_ERROR, "keyframe query failed")
        }
    }
}

async fn trickplay_owner(state: &AppState, part_id: Uuid) -> Option<(Uuid, u32)> {
    let part = state.db.media().get_part(part_id).await.ok().flatten()?;
    let row = sqlx::query_scalar::<_, String>(
        "SELECT metadata_item_id FROM media_items WHERE id = $1",
    )
    .bind(part.media_item_id.to_string())
    .fetch_optional(state.db.pool())
    .await
    .ok()
    .flatten()?;
    let item_id = Uuid::parse_str(&row).ok()?;
    Some((item_id, part.part_index.max(0) as u32))
}

async fn trickplay_index(State(state): State<AppState>, Path(part_id): Path<Uuid>) -> Response {
    let Some((item_id, part_index)) = trickplay_owner(&state, part_id).await else {
        return refusal(StatusCode::NOT_FOUND, "part not found");
    };
    let path = state.bif.index_path(item_id, part_index);
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(_) => refusal(StatusCode::NOT_FOUND, "no trickplay index"),
    }
}

async fn trickplay_one(
    State(state): State<AppState>,
    Path((part_id, index)): Path<(Uuid, usize)>,
) -> Response {
    let Some((item_id, part_index)) = trickplay_owner(&state, part_id).await else {
        return refusal(StatusCode::NOT_FOUND, "part not found");
    };
    match state.bif.read_one(item_id, part_index, index).await {
        Ok(frame) => ([(header::CONTENT_TYPE, "image/jpeg")], frame.image).into_response(),
        Err(e) => refusal(StatusCode::NOT_FOUND, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct SubtitleQuery {
    #[serde(default = "default_subtitle_format")]
    format: String,
    #[serde(rename = "startTicks")]
    start_ticks: Option<i64>,
    #[serde(rename = "endTicks")]
    end_ticks: Option<i64>,
}

fn default_subtitle_format() -> String {
    "vtt".to_string()
}

/// Convert an embedded subtitle stream, extracting through FFmpeg when the
/// source is image-based or inside the container.
async fn subtitle(
    State(state): State<AppState>,
    Path((part_id, stream_index)): Path<(Uuid, usize)>,
    Query(query): Query<SubtitleQuery>,
) -> Response {
    let part = match load_part(&state, part_id).await {
        Ok(part) => part,
        Err(response) => return response,
    };

    let subtitle_streams: Vec<_> = part.subtitle_streams().collect();
    let Some(stream) = subtitle_streams.get(stream_index) else {
        return refusal(StatusCode::NOT_FOUND, "subtitle stream not found");
    };

    if subtitles::requires_ffmpeg_extraction(&stream.codec) {
        // Image subtitles are not convertible in text form; extract the
        // stream as-is and let the client render it.
        return match subtitles::extract::extract_subtitle_raw(
            &state.config.ffmpeg_path,
            &part.file_path,
            stream_index,
            &stream.codec,
        )
        .await
        {
            Ok(bytes) => {
                ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
            }
            Err(e) => {
                warn!(part_id = %part_id, stream = stream_index, error = %e,
                    "Image subtitle extract failed");
                refusal(StatusCode::INTERNAL_SERVER_ERROR, "subtitle extraction failed")
            }
        };
    }

    let target_codec = "srt";
    let text = match subtitles::extract::extract_subtitle_stream(
        &state.config.ffmpeg_path,
        &part.file_path,
        stream_index,
        target_codec,
    )
    .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!(part_id = %part_id, stream = stream_index, error = %e, "Subtitle extract failed");
            return refusal(StatusCode::INTERNAL_SERVER_ERROR, "subtitle extraction failed");
        }
    };

    match subtitles::convert(&text, target_codec, &query.format, query.start_ticks, query.end_ticks)
    {
        Ok(converted) => {
            let mime = match query.format.as_str() {
                "vtt" | "webvtt" => "text/vtt",
                _ => "text/plain",
            };
            ([(header::CONTENT_TYPE, mime)], converted).into_response()
        }
        Err(e) => refusal(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}
