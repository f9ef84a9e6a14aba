//! HTTP request handlers
//!
//! Implements handlers for the upload, download, progress and status
//! endpoints.

use axum::{
    extract::{Multipart, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::archive::build_archive;
use crate::batch::{process_batch, AudioItem, BatchProgress, CancelSignal};
use crate::error::{EqualizerError, ItemFailure};
use crate::state::{AppState, StoredArchive};

/// Media types accepted as MP3 uploads
const MP3_MEDIA_TYPES: &[&str] = &["audio/mpeg", "audio/mp3"];

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    NotFound(String),
    TotalFailure(Vec<ItemFailure>),
    EngineUnavailable(String),
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failures: Option<Vec<ItemFailure>>,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, detail, failures) = match self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            HttpError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            HttpError::TotalFailure(failures) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("All {} files failed to process", failures.len()),
                Some(failures),
            ),
            HttpError::EngineUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            HttpError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
        };

        (status, Json(ErrorBody { detail, failures })).into_response()
    }
}

impl From<EqualizerError> for HttpError {
    fn from(err: EqualizerError) -> Self {
        match err {
            EqualizerError::EmptyBatch => HttpError::BadRequest("No files uploaded".to_string()),
            EqualizerError::TotalFailure { failures } => HttpError::TotalFailure(failures),
            EqualizerError::EngineLoad(e) => HttpError::EngineUnavailable(e.to_string()),
            _ => HttpError::InternalError(format!("Error processing files: {}", err)),
        }
    }
}

/// Check an upload is an MP3 by declared type or file extension.
pub fn validate_mp3(name: &str, media_type: Option<&str>) -> Result<(), HttpError> {
    let type_ok = media_type
        .map(|t| MP3_MEDIA_TYPES.contains(&t.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    let ext_ok = name.to_ascii_lowercase().ends_with(".mp3");
    if type_ok || ext_ok {
        Ok(())
    } else {
        Err(HttpError::BadRequest(format!("File {} is not an MP3 file", name)))
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Vec<AudioItem>, HttpError> {
    let mut items = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HttpError::BadRequest(format!("Invalid upload: {}", e)))?
    {
        // Plain form fields carry no file
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let media_type = field.content_type().map(str::to_string);
        validate_mp3(&name, media_type.as_deref())?;

        let data = field
            .bytes()
            .await
            .map_err(|e| HttpError::BadRequest(format!("Failed to read {}: {}", name, e)))?;
        items.push(AudioItem::new(
            name,
            data,
            media_type.unwrap_or_else(|| "audio/mpeg".to_string()),
        ));
    }
    Ok(items)
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub processed_count: usize,
    pub failed_count: usize,
    pub failures: Vec<ItemFailure>,
    pub download_url: &'static str,
}

/// Upload endpoint
/// POST /upload-mp3s
pub async fn upload_mp3s(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, HttpError> {
    let items = read_upload(multipart).await?;
    if items.is_empty() {
        return Err(HttpError::BadRequest("No files uploaded".to_string()));
    }

    // The batch task outlives this request; dropping the request only
    // cancels the batch between items.
    let cancel = CancelSignal::new();
    let _cancel_on_drop = cancel.cancel_on_drop();
    tokio::spawn(run_upload(state, items, cancel))
        .await
        .map_err(|e| HttpError::InternalError(format!("Batch task failed: {}", e)))?
}

async fn run_upload(
    state: Arc<AppState>,
    items: Vec<AudioItem>,
    cancel: CancelSignal,
) -> Result<Json<UploadResponse>, HttpError> {
    let _batch = state.batch_lock.lock().await;
    tracing::info!(files = items.len(), "Upload accepted");

    // Whatever this batch ends with, the previous archive no longer applies
    if let Some(previous) = state.clear_archive() {
        tracing::debug!(age_secs = previous.age_secs(), "Discarded previous archive");
    }
    state.set_progress(BatchProgress::new(items.len()));
    let observer_state = state.clone();
    let observer = move |progress: BatchProgress| observer_state.set_progress(progress);

    let report = process_batch(&state.engine, &items, &observer, &cancel).await?;
    if report.cancelled {
        tracing::info!(
            completed = report.progress.completed,
            total = report.progress.total,
            "Upload abandoned, no archive stored"
        );
        return Err(HttpError::InternalError("Batch cancelled".to_string()));
    }

    let outcomes = report.outcomes.clone();
    let archive = tokio::task::spawn_blocking(move || build_archive(&outcomes))
        .await
        .map_err(|e| HttpError::InternalError(format!("Archive task failed: {}", e)))??;

    let processed = report.processed_count();
    let failed = report.failed_count();
    state.store_archive(StoredArchive::new(archive, processed, failed));

    Ok(Json(UploadResponse {
        message: format!("Successfully processed {} MP3 files", processed),
        processed_count: processed,
        failed_count: failed,
        failures: report.failures(),
        download_url: "/download-processed",
    }))
}

/// Archive download endpoint
/// GET /download-processed
pub async fn download_processed(State(state): State<Arc<AppState>>) -> Result<Response, HttpError> {
    let archive = state.last_archive().ok_or_else(|| {
        HttpError::NotFound("No processed files available for download".to_string())
    })?;
    tracing::debug!(
        bytes = archive.data.len(),
        processed = archive.processed,
        age_secs = archive.age_secs(),
        "Serving archive"
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        state.config.upload.archive_name
    );
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|e| HttpError::InternalError(e.to_string()))?,
    );

    Ok((headers, archive.data).into_response())
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
    pub complete: bool,
}

/// Batch progress endpoint
/// GET /progress
pub async fn progress(State(state): State<Arc<AppState>>) -> Json<ProgressResponse> {
    let progress = state.progress();
    Json(ProgressResponse {
        completed: progress.completed,
        total: progress.total,
        percent: progress.percent(),
        complete: progress.total > 0 && progress.is_complete(),
    })
}

/// Root endpoint
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "MP3 Equalizer API" }))
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "engine_loaded": state.engine.is_loaded(),
    }))
}

/// Version endpoint
pub async fn version_check() -> &'static str {
    concat!("mp3-equalizer v", env!("CARGO_PKG_VERSION"))
}
