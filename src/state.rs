use crate::services::{file_service::FileService, upload_service::UploadService};
use std::path::PathBuf;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub files: FileService,
    pub uploads: UploadService,
    /// Scratch directory probed by the readiness check. `None` when chunks
    /// are kept in memory.
    pub scratch_dir: Option<PathBuf>,
}
