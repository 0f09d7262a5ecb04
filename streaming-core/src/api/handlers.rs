//! HTTP handlers: chunked upload (C3), streaming (C9), grant tokens (C8).

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use streaming_common::db::VisibilityStatus;

use crate::error::{Result, StreamingError, TokenInvalidReason};
use crate::state::AppContext;
use crate::stream_manager::StreamResponse;

pub async fn health_check() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct InitUploadRequest {
    pub upload_id: String,
    pub filename: String,
    #[allow(dead_code)]
    pub file_size: i64,
    pub visibility_status: Option<String>,
    pub creator_id: i64,
    #[serde(default)]
    pub is_team_member: bool,
}

#[derive(Debug, Serialize)]
pub struct InitUploadResponse {
    pub track_id: String,
    pub upload_id: String,
}

pub async fn init_upload(
    State(ctx): State<AppContext>,
    Path(album_id): Path<String>,
    Json(body): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>> {
    let visibility = body
        .visibility_status
        .as_deref()
        .and_then(VisibilityStatus::parse)
        .unwrap_or(VisibilityStatus::Visible);

    let track_id = ctx
        .upload_coordinator
        .init_upload(
            &body.upload_id,
            &album_id,
            &body.filename,
            body.creator_id,
            body.is_team_member,
            visibility,
        )
        .await?;

    Ok(Json(InitUploadResponse {
        track_id,
        upload_id: body.upload_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct UploadChunkResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
}

/// `upload-chunk`: multipart form `{uploadId, chunkIndex, totalChunks, chunk}`.
pub async fn upload_chunk(
    State(ctx): State<AppContext>,
    Path(album_id): Path<String>,
    mut form: Multipart,
) -> Result<Json<UploadChunkResponse>> {
    let mut upload_id = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut chunk_bytes = None;

    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| StreamingError::BadInput(format!("invalid multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "uploadId" => {
                upload_id = Some(field.text().await.map_err(|e| StreamingError::BadInput(e.to_string()))?);
            }
            "chunkIndex" => {
                let text = field.text().await.map_err(|e| StreamingError::BadInput(e.to_string()))?;
                chunk_index = Some(text.parse::<u32>().map_err(|_| {
                    StreamingError::BadInput("chunkIndex must be an integer".to_string())
                })?);
            }
            "totalChunks" => {
                let text = field.text().await.map_err(|e| StreamingError::BadInput(e.to_string()))?;
                total_chunks = Some(text.parse::<u32>().map_err(|_| {
                    StreamingError::BadInput("totalChunks must be an integer".to_string())
                })?);
            }
            "chunk" => {
                chunk_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| StreamingError::BadInput(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let upload_id = upload_id.ok_or_else(|| StreamingError::BadInput("missing uploadId".to_string()))?;
    let chunk_index =
        chunk_index.ok_or_else(|| StreamingError::BadInput("missing chunkIndex".to_string()))?;
    let total_chunks =
        total_chunks.ok_or_else(|| StreamingError::BadInput("missing totalChunks".to_string()))?;
    let chunk_bytes = chunk_bytes.ok_or_else(|| StreamingError::BadInput("missing chunk".to_string()))?;

    let complete = ctx
        .upload_coordinator
        .upload_chunk(&upload_id, chunk_index, total_chunks, &album_id, &chunk_bytes)
        .await?;

    Ok(Json(UploadChunkResponse {
        message: if complete { "chunks complete".to_string() } else { "chunk received".to_string() },
        cancelled: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FinalizeUploadRequest {
    pub upload_id: String,
    pub track_id: String,
}

pub async fn finalize_upload(
    State(ctx): State<AppContext>,
    Path(_album_id): Path<String>,
    Json(body): Json<FinalizeUploadRequest>,
) -> Result<Json<streaming_common::db::Track>> {
    ctx.upload_coordinator
        .finalize_upload(&body.upload_id, &body.track_id)
        .await?;

    let track = crate::db::tracks::find(&ctx.db, &body.track_id).await?;
    Ok(Json(track))
}

#[derive(Debug, Deserialize)]
pub struct CancelUploadRequest {
    pub upload_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelUploadResponse {
    pub message: String,
    pub cancelled: bool,
}

pub async fn cancel_upload(
    State(ctx): State<AppContext>,
    Path(_album_id): Path<String>,
    Json(body): Json<CancelUploadRequest>,
) -> Result<Json<CancelUploadResponse>> {
    ctx.upload_coordinator.cancel_upload(&body.upload_id).await?;
    Ok(Json(CancelUploadResponse {
        message: "upload cancelled".to_string(),
        cancelled: true,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

fn content_type_for(filename: &str) -> &'static str {
    if filename.ends_with(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else if filename.ends_with(".ts") {
        "video/mp2t"
    } else {
        "application/octet-stream"
    }
}

/// Validate the grant token for a (track, voice) pair against the track's
/// current content_version. Absent a token, the request is rejected — every
/// segment fetch must be authorized (spec §4.8).
fn require_token(
    ctx: &AppContext,
    token: Option<&str>,
    track: &streaming_common::db::Track,
    voice: Option<&str>,
) -> Result<()> {
    let token = token.ok_or(StreamingError::TokenInvalid {
        reason: TokenInvalidReason::Malformed,
    })?;
    ctx.authorizer
        .validate(token, &track.id, voice, track.content_version)
        .map_err(|reason| StreamingError::TokenInvalid { reason })?;
    Ok(())
}

fn busy_response(retry_after_secs: u64, voice: Option<&str>) -> Response {
    let mut response = StatusCode::ACCEPTED.into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from_str(&retry_after_secs.to_string()).unwrap());
    if let Some(v) = voice {
        if let Ok(value) = HeaderValue::from_str(v) {
            response.headers_mut().insert("X-Voice-ID", value);
        }
    }
    response
}

async fn serve_path(path: std::path::PathBuf, filename: &str) -> Result<Response> {
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StreamingError::NotFound(format!("{} not found", path.display()))
        } else {
            StreamingError::Io(e)
        }
    })?;
    Ok((
        [(header::CONTENT_TYPE, content_type_for(filename))],
        bytes,
    )
        .into_response())
}

async fn resolve_ready(
    ctx: &AppContext,
    track_id: &str,
    voice: Option<&str>,
    token: Option<&str>,
) -> Result<std::path::PathBuf> {
    let track = crate::db::tracks::find(&ctx.db, track_id).await?;
    require_token(ctx, token, &track, voice)?;

    match ctx.stream_manager.get_stream_response(&track, voice, false).await? {
        // `playlist_path` is `{base}/default/playlist.m3u8`; callers need `{base}`.
        StreamResponse::Ready { playlist_path } => Ok(playlist_path
            .parent()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or(playlist_path)),
        StreamResponse::Busy { .. } => Err(StreamingError::Busy {
            reason: "preparation in progress".to_string(),
            retry_after_secs: 5,
        }),
    }
}

pub async fn get_master_playlist(
    State(ctx): State<AppContext>,
    Path(track_id): Path<String>,
    Query(q): Query<StreamQuery>,
) -> Response {
    get_file(&ctx, &track_id, None, "master.m3u8", q.token.as_deref()).await
}

pub async fn get_default_file(
    State(ctx): State<AppContext>,
    Path((track_id, filename)): Path<(String, String)>,
    Query(q): Query<StreamQuery>,
) -> Response {
    get_file(&ctx, &track_id, None, &filename, q.token.as_deref()).await
}

pub async fn get_voice_master_playlist(
    State(ctx): State<AppContext>,
    Path((track_id, voice_id)): Path<(String, String)>,
    Query(q): Query<StreamQuery>,
) -> Response {
    get_file(&ctx, &track_id, Some(&voice_id), "master.m3u8", q.token.as_deref()).await
}

pub async fn get_voice_file(
    State(ctx): State<AppContext>,
    Path((track_id, voice_id, filename)): Path<(String, String, String)>,
    Query(q): Query<StreamQuery>,
) -> Response {
    if let Some(index) = segment_index(&filename) {
        ctx.voice_cache.access_tracker.record_access(&track_id, &voice_id, index).await;
    }
    get_file(&ctx, &track_id, Some(&voice_id), &filename, q.token.as_deref()).await
}

/// Parse `segment_00042.ts` into its numeric index, for eviction bookkeeping.
fn segment_index(filename: &str) -> Option<u32> {
    filename.strip_prefix("segment_")?.strip_suffix(".ts")?.parse().ok()
}

async fn get_file(
    ctx: &AppContext,
    track_id: &str,
    voice: Option<&str>,
    filename: &str,
    token: Option<&str>,
) -> Response {
    match resolve_ready(ctx, track_id, voice, token).await {
        Ok(base_dir) => {
            let path = if filename == "master.m3u8" {
                base_dir.join(filename)
            } else {
                base_dir.join("default").join(filename)
            };
            match serve_path(path, filename).await {
                Ok(resp) => resp,
                Err(e) => e.into_response(),
            }
        }
        Err(StreamingError::Busy { retry_after_secs, .. }) => busy_response(retry_after_secs, voice),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
pub enum ProgressResponseBody {
    #[serde(rename = "complete")]
    Complete { total_duration: f64 },
    #[serde(rename = "in_progress")]
    InProgress { percent: f64 },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "not_found")]
    NotFound,
}

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub voice: Option<String>,
}

pub async fn get_progress(
    State(ctx): State<AppContext>,
    Path(track_id): Path<String>,
    Query(q): Query<ProgressQuery>,
) -> Result<Json<ProgressResponseBody>> {
    use crate::stream_manager::ProgressReport;

    let report = ctx
        .stream_manager
        .get_segment_progress(&track_id, q.voice.as_deref())
        .await?;

    Ok(Json(match report {
        ProgressReport::Complete { total_duration } => ProgressResponseBody::Complete { total_duration },
        ProgressReport::InProgress { percent } => ProgressResponseBody::InProgress { percent },
        ProgressReport::Error { message } => ProgressResponseBody::Error { message },
        ProgressReport::NotFound => ProgressResponseBody::NotFound,
    }))
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub session_id: String,
    pub track_id: String,
    pub voice_id: Option<String>,
    pub user_id: i64,
    pub is_creator: bool,
    pub is_team: bool,
    pub is_kofi: bool,
    #[serde(default)]
    pub tier_amount_cents: i64,
    #[serde(default)]
    pub has_donations: bool,
    #[serde(default)]
    pub donation_amount_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub token: String,
}

/// Mints a grant token after a positive result from the unified access
/// evaluator (spec §4.8).
pub async fn issue_grant(
    State(ctx): State<AppContext>,
    Json(body): Json<GrantRequest>,
) -> Result<Json<GrantResponse>> {
    use crate::auth::{AccessEvaluator, TierData, User};

    let track = crate::db::tracks::find(&ctx.db, &body.track_id).await?;
    let album = crate::db::albums::find(&ctx.db, &track.album_id).await?;

    let user = User {
        id: body.user_id,
        is_creator: body.is_creator,
        is_team: body.is_team,
        is_kofi: body.is_kofi,
        tier: TierData {
            tier_amount_cents: body.tier_amount_cents,
            has_donations: body.has_donations,
            donation_amount_cents: body.donation_amount_cents,
        },
    };

    AccessEvaluator::evaluate(&user, album.tier_restrictions().as_ref())
        .map_err(StreamingError::TierDenied)?;

    let token = ctx
        .authorizer
        .issue(
            &body.session_id,
            &body.track_id,
            body.voice_id.as_deref(),
            track.content_version,
            body.user_id,
        )
        .await;

    Ok(Json(GrantResponse { token }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTierRestrictionsRequest {
    pub is_restricted: bool,
    #[serde(default)]
    pub minimum_tier_amount_cents: i64,
    #[serde(default)]
    pub minimum_tier_name: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateTierRestrictionsResponse {
    pub updated_track_ids: Vec<String>,
}

/// Changes an album's tier restrictions and enforces invariant 3: every
/// track in the album gets `content_version += 1` and its cached grants
/// are dropped (spec §4.8 "Invalidation").
pub async fn update_tier_restrictions(
    State(ctx): State<AppContext>,
    Path(album_id): Path<String>,
    Json(body): Json<UpdateTierRestrictionsRequest>,
) -> Result<Json<UpdateTierRestrictionsResponse>> {
    let updated_track_ids = crate::db::albums::update_tier_restrictions(
        &ctx.db,
        &ctx.authorizer,
        &album_id,
        body.is_restricted,
        body.minimum_tier_amount_cents,
        &body.minimum_tier_name,
    )
    .await?;

    Ok(Json(UpdateTierRestrictionsResponse { updated_track_ids }))
}
