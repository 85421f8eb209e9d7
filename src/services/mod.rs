//! Upload domain services.
//!
//! `UploadService` drives chunked uploads on top of a `ScratchStore`;
//! both it and the single-shot path persist through `FileService`, which
//! writes bytes to an `ObjectStorage` backend and metadata to SQLite.

pub mod error;
pub mod file_service;
pub mod mime;
pub mod object_storage;
pub mod scratch_store;
pub mod upload_service;
