//! HTTP API for vidsplit
//!
//! JSON endpoints for uploads, split/merge jobs, stats, output downloads and
//! platform fetches. Errors are rendered as `{"error": "<message>"}`.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::error;

use crate::library::{Download, DownloadBody, LibraryError, MediaLibrary};
use crate::models::{Job, SocialDownload, Stats, Video};
use crate::orchestrator::{JobOrchestrator, SubmitError};
use crate::segments::SegmentError;
use crate::social::FetchError;
use crate::store::{RecordStore, StoreError};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub library: Arc<MediaLibrary>,
}

/// Error returned by a handler, rendered as a JSON body
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<LibraryError> for ApiError {
    fn from(e: LibraryError) -> Self {
        match e {
            LibraryError::VideoNotFound(_) | LibraryError::FileNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            LibraryError::Fetch(FetchError::Io(_))
            | LibraryError::Store(_)
            | LibraryError::Io(_) => ApiError::Internal(e.to_string()),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::VideoNotFound(_) => ApiError::NotFound("Video not found".to_string()),
            SubmitError::Store(e) => e.into(),
            SubmitError::InvalidSegment(_) | SubmitError::TooFewVideos => {
                ApiError::BadRequest(e.to_string())
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Body of an accepted split or merge request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: String,
    #[serde(flatten)]
    pub job: Job,
}

impl From<Job> for JobAccepted {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id.clone(),
            job,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SplitRequest {
    video_id: Option<String>,
    segment_duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeRequest {
    video_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct FetchRequest {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DownloadQuery {
    delete: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupQuery {
    reset_stats: Option<String>,
}

/// Query flags are true only when spelled `true`, in any case.
fn flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Whole seconds from a client-supplied segment duration.
fn segment_seconds(value: Option<f64>) -> ApiResult<u32> {
    match value {
        Some(v) if v.is_finite() && v >= 1.0 => Ok(v.trunc().min(u32::MAX as f64) as u32),
        Some(_) => Err(ApiError::BadRequest(SegmentError::TooShort.to_string())),
        None => Err(ApiError::BadRequest(
            "segmentDuration must be a positive integer".to_string(),
        )),
    }
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "flv" => "video/x-flv",
        "wmv" => "video/x-ms-wmv",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Attachment header value with characters that would break quoting replaced.
fn attachment(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

fn file_response(download: Download) -> Response {
    let (body, len) = match download.body {
        DownloadBody::File { file, len } => (Body::from_stream(ReaderStream::new(file)), len),
        DownloadBody::Bytes(bytes) => {
            let len = bytes.len() as u64;
            (Body::from(bytes), len)
        }
    };
    (
        [
            (header::CONTENT_TYPE, content_type_for(&download.filename).to_string()),
            (header::CONTENT_DISPOSITION, attachment(&download.filename)),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        body,
    )
        .into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_videos(State(state): State<AppState>) -> ApiResult<Json<Vec<Video>>> {
    Ok(Json(state.library.list_videos()?))
}

async fn upload_video(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<Video>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("video") {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        if original_name.trim().is_empty() {
            return Err(ApiError::BadRequest("No file selected".to_string()));
        }
        let reader = StreamReader::new(field.map_err(io::Error::other));
        tokio::pin!(reader);
        let video = state.library.store_upload(&original_name, reader).await?;
        return Ok(Json(video));
    }
    Err(LibraryError::NoFile.into())
}

async fn delete_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.library.delete_video(&id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn download_video(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    Ok(file_response(state.library.open_video(&id).await?))
}

async fn split_video(
    State(state): State<AppState>,
    payload: Result<Json<SplitRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let Json(req) = payload?;
    let video_id = req
        .video_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("videoId is required".to_string()))?;
    let segment_duration = segment_seconds(req.segment_duration)?;

    let handle = state.orchestrator.submit_split(&video_id, segment_duration)?;
    Ok((StatusCode::ACCEPTED, Json(handle.job.into())))
}

async fn merge_videos(
    State(state): State<AppState>,
    payload: Result<Json<MergeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let Json(req) = payload?;
    let video_ids = req
        .video_ids
        .ok_or_else(|| ApiError::BadRequest("videoIds must be a list".to_string()))?;

    let handle = state.orchestrator.submit_merge(&video_ids)?;
    Ok((StatusCode::ACCEPTED, Json(handle.job.into())))
}

async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<Job>>> {
    Ok(Json(state.store.list_jobs()?))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Job>> {
    state
        .store
        .get_job(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))
}

async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<Stats>> {
    Ok(Json(state.store.stats()?))
}

async fn download_output(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let delete_after = flag(query.delete.as_deref());
    Ok(file_response(
        state.library.open_output(&filename, delete_after).await?,
    ))
}

async fn fetch_social(
    State(state): State<AppState>,
    payload: Result<Json<FetchRequest>, JsonRejection>,
) -> ApiResult<Json<SocialDownload>> {
    let Json(req) = payload?;
    let url = req.url.unwrap_or_default();
    Ok(Json(state.library.fetch_social(&url).await?))
}

async fn list_downloads(State(state): State<AppState>) -> ApiResult<Json<Vec<SocialDownload>>> {
    Ok(Json(state.library.list_downloads()?))
}

async fn cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let report = state
        .library
        .cleanup(flag(query.reset_stats.as_deref()))
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Cleanup completed",
        "filesRemoved": report.files_removed,
        "statsReset": report.stats_reset,
    })))
}

/// Creates the axum Router with every API endpoint
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/videos", get(list_videos))
        .route(
            "/api/videos/upload",
            // size is enforced while streaming to disk
            post(upload_video).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/videos/split", post(split_video))
        .route("/api/videos/merge", post(merge_videos))
        .route("/api/videos/:id", delete(delete_video))
        .route("/api/videos/:id/download", get(download_video))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/stats", get(get_stats))
        .route("/api/download/:filename", get(download_output))
        .route("/api/social/download", post(fetch_social))
        .route("/api/tiktok/download", post(fetch_social))
        .route("/api/social/downloads", get(list_downloads))
        .route("/api/cleanup", post(cleanup))
        .with_state(state)
}
