//! Represents an in-progress chunked upload.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Immutable description of a chunked upload session.
///
/// The chunk payloads themselves are held by the scratch store, keyed by
/// `id`; this struct only carries what the session was started with.
#[derive(Serialize, Clone, Debug)]
pub struct UploadSession {
    /// Upload identifier returned to the client.
    pub id: Uuid,

    /// Filename announced at start. `complete` takes the authoritative name.
    pub filename: String,

    /// Principal that started the session.
    pub owner_id: String,

    /// Client-declared chunk count. Informational only.
    pub total_chunks: Option<u64>,

    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(owner_id: &str, filename: &str, total_chunks: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            owner_id: owner_id.to_string(),
            total_chunks,
            created_at: Utc::now(),
        }
    }
}

/// Snapshot of a session returned by the status endpoint.
#[derive(Serialize, Debug)]
pub struct UploadStatus {
    pub upload_id: Uuid,
    pub filename: String,
    pub total_chunks: Option<u64>,
    /// Chunk numbers received so far, ascending.
    pub received_chunks: Vec<u64>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}
