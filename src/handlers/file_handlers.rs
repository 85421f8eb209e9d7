//! HTTP handlers for single-shot uploads and stored file access.

use crate::{
    errors::AppError,
    middleware::auth::Principal,
    models::stored_file::StoredFile,
    state::AppState,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub source_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListFilesResp {
    pub files: Vec<StoredFile>,
    pub next_cursor: Option<String>,
}

/// POST `/upload` — multipart `file` plus optional `source_url`.
///
/// `source_url` may also be passed as a query parameter; the form field wins.
pub async fn upload_file(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<StoredFile>, AppError> {
    let mut file: Option<(String, Bytes)> = None;
    let mut source_url = query.source_url;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("file field has no filename"))?;
                file = Some((filename, field.bytes().await?));
            }
            "source_url" => source_url = Some(field.text().await?),
            _ => warn!("Unknown upload field: {}", name),
        }
    }

    let (filename, content) = file.ok_or_else(|| AppError::bad_request("missing file"))?;
    let stored = state
        .files
        .upload(
            principal.id(),
            &filename,
            content,
            source_url.as_deref().unwrap_or(""),
        )
        .await?;
    Ok(Json(stored))
}

/// GET `/files` — the caller's files, newest first, `?limit=&cursor=`.
pub async fn list_files(
    State(state): State<AppState>,
    principal: Principal,
    Query(q): Query<ListFilesQuery>,
) -> Result<Json<ListFilesResp>, AppError> {
    let before_seq = q.cursor.as_deref().map(decode_cursor).transpose()?;
    let page = state
        .files
        .list(
            principal.id(),
            q.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            before_seq,
        )
        .await?;

    Ok(Json(ListFilesResp {
        files: page.files,
        next_cursor: page.next_seq.map(encode_cursor),
    }))
}

/// GET `/files/{id}`
pub async fn get_file(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<StoredFile>, AppError> {
    Ok(Json(state.files.get(principal.id(), id).await?))
}

/// GET `/files/{id}/content` — stream the stored bytes.
pub async fn get_file_content(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (meta, stream) = state.files.open_content(principal.id(), id).await?;

    let mut response = Response::new(Body::from_stream(stream));
    set_file_headers(response.headers_mut(), &meta);
    Ok(response)
}

fn set_file_headers(headers: &mut HeaderMap, meta: &StoredFile) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size.max(0)));

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.created_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

fn encode_cursor(seq: i64) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(seq.to_string())
}

fn decode_cursor(cursor: &str) -> Result<i64, AppError> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| AppError::bad_request(format!("invalid cursor `{}`", cursor)))
}
