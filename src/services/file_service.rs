//! The persistence path shared by single-shot uploads and
//! completed chunked uploads: filename validation, MIME inference, storage
//! key generation, the durable write and the `upload_files` metadata row.

use crate::{
    models::stored_file::StoredFile,
    services::{
        error::{ServiceError, ServiceResult},
        mime,
        object_storage::{ByteStream, ObjectStorage, StorageError},
    },
};
use bytes::Bytes;
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{path::Path, sync::Arc};
use tracing::{info, warn};
use uuid::Uuid;

pub const MAX_FILENAME_CHARS: usize = 200;
pub const KEY_PREFIX: &str = "upload_files";
const FORBIDDEN_FILENAME_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
const MAX_PAGE_SIZE: usize = 100;

const STORED_FILE_COLUMNS: &str = "seq, id, storage_type, key, name, size, extension, mime_type, \
     created_by, source_url, etag, created_at";

/// A filename that passed validation, with its derived extension.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFilename {
    pub name: String,
    /// Lowercased, without the dot. Empty when the name has no extension.
    pub extension: String,
}

/// Validate and normalize a client-supplied filename.
///
/// Names containing path-control characters are rejected. Names longer than
/// `MAX_FILENAME_CHARS` keep their extension and lose the tail of the stem.
pub fn normalize_filename(filename: &str) -> ServiceResult<NormalizedFilename> {
    if filename.trim().is_empty() {
        return Err(ServiceError::InvalidFilename(
            "filename must not be empty".into(),
        ));
    }
    if let Some(c) = filename
        .chars()
        .find(|c| FORBIDDEN_FILENAME_CHARS.contains(c))
    {
        return Err(ServiceError::InvalidFilename(format!(
            "filename contains invalid character `{}`",
            c
        )));
    }

    let raw_extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");

    Ok(NormalizedFilename {
        name: truncate_filename(filename, raw_extension),
        extension: raw_extension.to_lowercase(),
    })
}

fn truncate_filename(filename: &str, extension: &str) -> String {
    if filename.chars().count() <= MAX_FILENAME_CHARS {
        return filename.to_string();
    }

    let ext_chars = extension.chars().count();
    if ext_chars == 0 || ext_chars + 1 >= MAX_FILENAME_CHARS {
        return filename.chars().take(MAX_FILENAME_CHARS).collect();
    }

    let stem = &filename[..filename.len() - extension.len() - 1];
    let mut truncated: String = stem
        .chars()
        .take(MAX_FILENAME_CHARS - ext_chars - 1)
        .collect();
    truncated.push('.');
    truncated.push_str(extension);
    truncated
}

/// Build `upload_files/{owner}/{uuid}[.ext]`.
pub fn storage_key(owner_id: &str, extension: &str) -> String {
    let mut key = format!("{}/{}/{}", KEY_PREFIX, owner_id, Uuid::new_v4());
    if !extension.is_empty() {
        key.push('.');
        key.push_str(extension);
    }
    key
}

/// One page of an owner's files, newest first.
#[derive(Debug)]
pub struct FilePage {
    pub files: Vec<StoredFile>,
    /// Sequence to pass back as `before_seq` for the next page.
    pub next_seq: Option<i64>,
}

#[derive(Clone)]
pub struct FileService {
    db: Arc<SqlitePool>,
    storage: Arc<dyn ObjectStorage>,
}

impl FileService {
    pub fn new(db: Arc<SqlitePool>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { db, storage }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    /// Single-shot upload: validate the name and persist `content` as is.
    pub async fn upload(
        &self,
        owner_id: &str,
        filename: &str,
        content: Bytes,
        source_url: &str,
    ) -> ServiceResult<StoredFile> {
        let filename = normalize_filename(filename)?;
        self.persist(owner_id, filename, content, source_url).await
    }

    /// Write `content` to object storage and record it.
    ///
    /// If the metadata insert fails the freshly written object is removed
    /// again, best effort.
    pub async fn persist(
        &self,
        owner_id: &str,
        filename: NormalizedFilename,
        content: Bytes,
        source_url: &str,
    ) -> ServiceResult<StoredFile> {
        let (category, mime_type) = mime::classify(&filename.extension);
        let size = content.len() as i64;
        let etag = format!("{:x}", md5::compute(&content));
        let key = storage_key(owner_id, &filename.extension);

        self.storage.save(&key, content).await?;

        let insert_result = sqlx::query_as::<_, StoredFile>(&format!(
            "INSERT INTO upload_files (
                id, storage_type, key, name, size, extension, mime_type,
                created_by, source_url, etag, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {}",
            STORED_FILE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(self.storage.backend_name())
        .bind(&key)
        .bind(&filename.name)
        .bind(size)
        .bind(&filename.extension)
        .bind(mime_type)
        .bind(owner_id)
        .bind(source_url)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(file) => {
                info!(
                    file_id = %file.id,
                    key = %file.key,
                    size = file.size,
                    category = ?category,
                    "stored file"
                );
                Ok(file)
            }
            Err(err) => {
                if let Err(cleanup) = self.storage.delete(&key).await {
                    warn!(key = %key, error = %cleanup, "failed to remove orphaned object");
                }
                Err(ServiceError::Sqlx(err))
            }
        }
    }

    /// Fetch a file record owned by `owner_id`.
    pub async fn get(&self, owner_id: &str, id: Uuid) -> ServiceResult<StoredFile> {
        sqlx::query_as::<_, StoredFile>(&format!(
            "SELECT {} FROM upload_files WHERE id = ? AND created_by = ?",
            STORED_FILE_COLUMNS
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ServiceError::FileNotFound(id.to_string()),
            other => ServiceError::Sqlx(other),
        })
    }

    /// Metadata plus a byte stream over the stored content.
    pub async fn open_content(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> ServiceResult<(StoredFile, ByteStream)> {
        let file = self.get(owner_id, id).await?;
        if !self.storage.exists(&file.key).await? {
            return Err(ServiceError::FileNotFound(id.to_string()));
        }
        let stream = self
            .storage
            .load_stream(&file.key)
            .await
            .map_err(|err| match err {
                StorageError::NotFound(_) => ServiceError::FileNotFound(id.to_string()),
                other => ServiceError::Storage(other),
            })?;
        Ok((file, stream))
    }

    /// List an owner's files newest first, keyset-paginated on `seq`.
    pub async fn list(
        &self,
        owner_id: &str,
        limit: usize,
        before_seq: Option<i64>,
    ) -> ServiceResult<FilePage> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let fetch_limit = limit + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM upload_files WHERE created_by = ",
            STORED_FILE_COLUMNS
        ));
        builder.push_bind(owner_id);
        if let Some(seq) = before_seq {
            builder.push(" AND seq < ");
            builder.push_bind(seq);
        }
        builder.push(" ORDER BY seq DESC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut files: Vec<StoredFile> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut next_seq = None;
        if files.len() == fetch_limit {
            files.pop();
            next_seq = files.last().map(|f| f.seq);
        }

        Ok(FilePage { files, next_seq })
    }
}
