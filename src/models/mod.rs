//! Data models for stored files and in-progress uploads.
//!
//! `StoredFile` maps to the `upload_files` table via `sqlx::FromRow`;
//! both models serialize as JSON via `serde`.

pub mod stored_file;
pub mod upload_session;
