//! Defines routes for uploads and stored files.
//!
//! ## Structure
//! - **Chunked upload**
//!   - `POST   /upload/start`       — open a session
//!   - `POST   /upload/chunk`       — multipart chunk
//!   - `POST   /upload/complete`    — assemble and store
//!   - `GET    /upload/{upload_id}` — session status
//!   - `DELETE /upload/{upload_id}` — abort
//!
//! - **Files**
//!   - `POST   /upload`             — single-shot multipart upload
//!   - `GET    /files`              — list own files
//!   - `GET    /files/{id}`         — metadata
//!   - `GET    /files/{id}/content` — stream bytes

use crate::{
    handlers::{
        file_handlers::{get_file, get_file_content, list_files, upload_file},
        health_handlers::{healthz, readyz},
        upload_handlers::{
            abort_upload, complete_upload, start_upload, upload_chunk, upload_status,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. `max_body_bytes` caps every request body, which is
/// what bounds chunk and single-shot upload sizes.
pub fn routes(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // chunked upload
        .route("/upload/start", post(start_upload))
        .route("/upload/chunk", post(upload_chunk))
        .route("/upload/complete", post(complete_upload))
        .route("/upload/{upload_id}", get(upload_status).delete(abort_upload))
        // single-shot upload and file access
        .route("/upload", post(upload_file))
        .route("/files", get(list_files))
        .route("/files/{id}", get(get_file))
        .route("/files/{id}/content", get(get_file_content))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_pool,
        handlers::upload_handlers::StartUploadResp,
        models::stored_file::StoredFile,
        services::{
            file_service::FileService, object_storage::MemoryObjectStorage,
            scratch_store::{DiskScratchStore, MemoryScratchStore, ScratchStore},
            upload_service::UploadService,
        },
    };
    use axum::{
        body::{Body, Bytes, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use std::{path::PathBuf, sync::Arc};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "upload-test-boundary";
    const USER: &str = "user-1";

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a [u8]),
    }

    async fn app() -> Router {
        build_app(Arc::new(MemoryScratchStore::new()), None).await
    }

    async fn build_app(scratch: Arc<dyn ScratchStore>, scratch_dir: Option<PathBuf>) -> Router {
        let files = FileService::new(
            Arc::new(test_pool().await),
            Arc::new(MemoryObjectStorage::new()),
        );
        let uploads = UploadService::new(files.clone(), scratch, None);
        let state = AppState {
            files,
            uploads,
            scratch_dir,
        };
        routes(1024 * 1024).with_state(state)
    }

    fn multipart_request(uri: &str, user: &str, parts: &[Part]) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                            name, value
                        )
                        .as_bytes(),
                    );
                }
                Part::File(name, filename, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n",
                            name, filename
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                    body.extend_from_slice(b"\r\n");
                }
            }
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("x-user-id", user)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(method: Method, uri: &str, user: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", user)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str, user: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-user-id", user)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, header::HeaderMap, Bytes) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, body)
    }

    async fn start(app: &Router, filename: &str) -> String {
        let (status, _, body) = send(
            app,
            json_request(
                Method::POST,
                "/upload/start",
                USER,
                json!({ "filename": filename, "total_chunks": 2 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let resp: StartUploadResp = serde_json::from_slice(&body).unwrap();
        resp.upload_id.to_string()
    }

    async fn send_chunk(app: &Router, upload_id: &str, n: &str, data: &[u8]) -> StatusCode {
        send(
            app,
            multipart_request(
                "/upload/chunk",
                USER,
                &[
                    Part::Text("upload_id", upload_id),
                    Part::Text("chunk_number", n),
                    Part::File("chunk", "blob", data),
                ],
            ),
        )
        .await
        .0
    }

    #[tokio::test]
    async fn chunked_upload_end_to_end() {
        let app = app().await;
        let upload_id = start(&app, "report.pdf").await;

        assert_eq!(send_chunk(&app, &upload_id, "1", b"World").await, StatusCode::NO_CONTENT);
        assert_eq!(send_chunk(&app, &upload_id, "0", b"Hello ").await, StatusCode::NO_CONTENT);

        let (status, _, body) = send(
            &app,
            json_request(
                Method::POST,
                "/upload/complete",
                USER,
                json!({ "upload_id": upload_id, "filename": "report.pdf" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let file: StoredFile = serde_json::from_slice(&body).unwrap();
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.size, 11);
        assert_eq!(file.mime_type, "application/pdf");

        let (status, headers, body) =
            send(&app, get_request(&format!("/files/{}/content", file.id), USER)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"Hello World");
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(headers[header::CONTENT_LENGTH], "11");

        let (status, _, _) = send(&app, get_request(&format!("/upload/{}", upload_id), USER)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_upload_id_is_not_found() {
        let app = app().await;
        let missing = uuid::Uuid::new_v4().to_string();

        assert_eq!(send_chunk(&app, &missing, "0", b"x").await, StatusCode::NOT_FOUND);

        let (status, _, body) = send(
            &app,
            json_request(
                Method::POST,
                "/upload/complete",
                USER,
                json!({ "upload_id": missing, "filename": "a.txt" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["status"], 404);

        let (_, _, body) = send(&app, get_request("/files", USER)).await;
        let listing: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(listing["files"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn bad_filename_on_complete_is_bad_request() {
        let app = app().await;
        let upload_id = start(&app, "a.txt").await;
        send_chunk(&app, &upload_id, "0", b"x").await;

        let (status, _, _) = send(
            &app,
            json_request(
                Method::POST,
                "/upload/complete",
                USER,
                json!({ "upload_id": upload_id, "filename": "../a.txt" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = send(&app, get_request(&format!("/upload/{}", upload_id), USER)).await;
        assert_eq!(status, StatusCode::OK);
        let session: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(session["received_chunks"], json!([0]));
    }

    #[tokio::test]
    async fn malformed_chunk_request_is_bad_request() {
        let app = app().await;
        let upload_id = start(&app, "a.txt").await;

        let (status, _, _) = send(
            &app,
            multipart_request(
                "/upload/chunk",
                USER,
                &[
                    Part::Text("upload_id", &upload_id),
                    Part::Text("chunk_number", "-1"),
                    Part::File("chunk", "blob", b"x"),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &app,
            multipart_request("/upload/chunk", USER, &[Part::Text("upload_id", &upload_id)]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn requests_without_principal_are_rejected() {
        let app = app().await;
        let req = Request::builder()
            .method(Method::POST)
            .uri("/upload/start")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "filename": "a.txt" }).to_string()))
            .unwrap();

        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn sessions_are_invisible_to_other_users() {
        let app = app().await;
        let upload_id = start(&app, "a.txt").await;

        let (status, _, _) =
            send(&app, get_request(&format!("/upload/{}", upload_id), "someone-else")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn abort_removes_session() {
        let app = app().await;
        let upload_id = start(&app, "a.txt").await;

        let req = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/upload/{}", upload_id))
            .header("x-user-id", USER)
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::NO_CONTENT);
        assert_eq!(send_chunk(&app, &upload_id, "0", b"x").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn single_shot_upload_and_listing() {
        let app = app().await;

        let (status, _, body) = send(
            &app,
            multipart_request(
                "/upload",
                USER,
                &[
                    Part::File("file", "notes.MD", b"# notes"),
                    Part::Text("source_url", "https://example.com/notes"),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let file: StoredFile = serde_json::from_slice(&body).unwrap();
        assert_eq!(file.extension, "md");
        assert_eq!(file.mime_type, "text/markdown");
        assert_eq!(file.source_url, "https://example.com/notes");

        let (status, _, body) = send(&app, get_request(&format!("/files/{}", file.id), USER)).await;
        assert_eq!(status, StatusCode::OK);
        let fetched: StoredFile = serde_json::from_slice(&body).unwrap();
        assert_eq!(fetched.key, file.key);

        let (_, _, body) = send(&app, get_request("/files?limit=10", USER)).await;
        let listing: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(listing["files"].as_array().unwrap().len(), 1);
        assert!(listing["next_cursor"].is_null());

        let (status, _, _) = send(&app, get_request("/files?cursor=%21%21", USER)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn single_shot_upload_rejects_bad_names() {
        let app = app().await;

        let (status, _, _) = send(
            &app,
            multipart_request("/upload", USER, &[Part::File("file", "a|b.txt", b"x")]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_endpoints_report_ok() {
        let app = app().await;

        let (status, _, _) = send(&app, get_request("/healthz", USER)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) = send(&app, get_request("/readyz", USER)).await;
        assert_eq!(status, StatusCode::OK);
        let ready: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(ready["checks"]["sqlite"]["ok"], true);
        assert!(ready["checks"]["scratch_disk"].is_null());
    }

    #[tokio::test]
    async fn readiness_probes_disk_scratch_directory() {
        let dir = TempDir::new().unwrap();
        let app = build_app(
            Arc::new(DiskScratchStore::new(dir.path())),
            Some(dir.path().to_path_buf()),
        )
        .await;

        let (status, _, body) = send(&app, get_request("/readyz", USER)).await;
        assert_eq!(status, StatusCode::OK);
        let ready: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(ready["checks"]["scratch_disk"]["ok"], true);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());

        let missing = dir.path().join("gone");
        let app = build_app(Arc::new(DiskScratchStore::new(&missing)), Some(missing)).await;
        let (status, _, body) = send(&app, get_request("/readyz", USER)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let ready: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(ready["checks"]["scratch_disk"]["ok"], false);
    }

    #[tokio::test]
    async fn principal_that_cannot_form_a_storage_key_is_rejected() {
        let app = app().await;

        let (status, _, _) = send(
            &app,
            multipart_request("/upload", "john..doe", &[Part::File("file", "a.txt", b"a")]),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, body) = send(
            &app,
            multipart_request("/upload", "john.doe", &[Part::File("file", "a.txt", b"a")]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let file: StoredFile = serde_json::from_slice(&body).unwrap();
        assert!(file.key.starts_with("upload_files/john.doe/"));
    }
}
