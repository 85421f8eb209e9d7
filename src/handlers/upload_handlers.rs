//! HTTP handlers for chunked uploads.
//!
//! `start` and `complete` take JSON bodies; chunks arrive as multipart forms
//! carrying `upload_id`, `chunk_number` and the `chunk` bytes.

use crate::{
    errors::AppError,
    middleware::auth::Principal,
    models::{stored_file::StoredFile, upload_session::UploadStatus},
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StartUploadReq {
    pub filename: String,
    pub total_chunks: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartUploadResp {
    pub upload_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CompleteUploadReq {
    pub upload_id: String,
    pub filename: String,
}

/// POST `/upload/start`
pub async fn start_upload(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<StartUploadReq>,
) -> Result<Json<StartUploadResp>, AppError> {
    let session = state
        .uploads
        .start(principal.id(), &req.filename, req.total_chunks)
        .await?;
    Ok(Json(StartUploadResp {
        upload_id: session.id,
    }))
}

/// POST `/upload/chunk` — multipart with `upload_id`, `chunk_number`, `chunk`.
pub async fn upload_chunk(
    State(state): State<AppState>,
    principal: Principal,
    mut multipart: Multipart,
) -> Result<StatusCode, AppError> {
    let mut upload_id: Option<String> = None;
    let mut chunk_number: Option<u64> = None;
    let mut chunk: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "upload_id" => upload_id = Some(field.text().await?.trim().to_string()),
            "chunk_number" => {
                let text = field.text().await?;
                chunk_number = Some(text.trim().parse().map_err(|e| {
                    AppError::bad_request(format!("invalid chunk_number `{}`: {}", text, e))
                })?);
            }
            "chunk" => chunk = Some(field.bytes().await?),
            _ => warn!("Unknown chunk upload field: {}", name),
        }
    }

    let upload_id = upload_id.ok_or_else(|| AppError::bad_request("missing upload_id"))?;
    let chunk_number = chunk_number.ok_or_else(|| AppError::bad_request("missing chunk_number"))?;
    let chunk = chunk.ok_or_else(|| AppError::bad_request("missing chunk"))?;

    state
        .uploads
        .chunk(principal.id(), &upload_id, chunk_number, chunk)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/upload/complete`
pub async fn complete_upload(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<CompleteUploadReq>,
) -> Result<Json<StoredFile>, AppError> {
    let file = state
        .uploads
        .complete(principal.id(), &req.upload_id, &req.filename)
        .await?;
    Ok(Json(file))
}

/// GET `/upload/{upload_id}`
pub async fn upload_status(
    State(state): State<AppState>,
    principal: Principal,
    Path(upload_id): Path<String>,
) -> Result<Json<UploadStatus>, AppError> {
    let status = state.uploads.status(principal.id(), &upload_id).await?;
    Ok(Json(status))
}

/// DELETE `/upload/{upload_id}`
pub async fn abort_upload(
    State(state): State<AppState>,
    principal: Principal,
    Path(upload_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.uploads.abort(principal.id(), &upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
