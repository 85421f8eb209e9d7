//! Represents a finished upload whose bytes live in durable object storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata record for one durably persisted file.
///
/// Rows are written once, by a completed chunked upload or by a single-shot
/// upload, and never updated afterwards. The content bytes are not part of
/// the record; they are addressed through `key` in the object store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct StoredFile {
    /// Insertion sequence, used as the pagination cursor.
    #[serde(skip)]
    pub seq: i64,

    /// Generated identifier.
    pub id: Uuid,

    /// Label of the object storage backend holding the bytes (e.g. "local").
    pub storage_type: String,

    /// Object storage key, `upload_files/{owner}/{uuid}.{ext}`.
    pub key: String,

    /// Original filename after validation and truncation.
    pub name: String,

    /// Size in bytes.
    pub size: i64,

    /// Lowercased extension without the dot; empty when the name has none.
    pub extension: String,

    /// MIME type inferred from the extension.
    pub mime_type: String,

    /// Owning principal.
    pub created_by: String,

    /// Free-form origin annotation supplied by the uploader.
    pub source_url: String,

    /// MD5 of the content, hex encoded.
    pub etag: String,

    pub created_at: DateTime<Utc>,
}
