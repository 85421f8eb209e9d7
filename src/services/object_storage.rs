//! src/services/object_storage.rs
//!
//! Durable object storage for finished uploads. Two backends sit behind the
//! `ObjectStorage` trait: a local filesystem tree rooted at `root/{key}` and
//! an in-memory map. The upload path only ever calls `save`; the remaining
//! operations serve content downloads and cleanup.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::{
    collections::BTreeMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::RwLock,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const TMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Key/value store for finished file payloads.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Short label recorded on every stored file (e.g. "local").
    fn backend_name(&self) -> &'static str;

    /// Write `data` under `key`, replacing any previous object.
    async fn save(&self, key: &str, data: Bytes) -> StorageResult<()>;

    async fn load(&self, key: &str) -> StorageResult<Bytes>;

    /// Open an object for streaming out.
    async fn load_stream(&self, key: &str) -> StorageResult<ByteStream>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Remove an object. Missing objects are not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List keys starting with `prefix`, sorted.
    async fn scan(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or oversized keys, keys that begin with `/` or contain
/// `..`, and keys carrying control characters or backslashes.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Objects stored as plain files beneath `root`.
#[derive(Clone, Debug)]
pub struct LocalObjectStorage {
    root: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn map_not_found(key: &str, err: io::Error) -> StorageError {
        if err.kind() == ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(err)
        }
    }

    /// Recursively remove empty directories up to the storage root.
    ///
    /// Stops at the first non-empty or missing directory, at the root, or on
    /// any unexpected I/O error.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    /// Write to a temporary sibling, fsync, then rename into place so a
    /// reader never sees a partial object.
    async fn save(&self, key: &str, data: Bytes) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));

        let write_result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        debug!(key, size = data.len(), "saved object");
        Ok(())
    }

    async fn load(&self, key: &str) -> StorageResult<Bytes> {
        ensure_key_safe(key)?;
        let data = fs::read(self.object_path(key))
            .await
            .map_err(|err| Self::map_not_found(key, err))?;
        Ok(Bytes::from(data))
    }

    async fn load_stream(&self, key: &str) -> StorageResult<ByteStream> {
        ensure_key_safe(key)?;
        let file = File::open(self.object_path(key))
            .await
            .map_err(|err| Self::map_not_found(key, err))?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        ensure_key_safe(key)?;
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// Objects held in process memory. Contents vanish with the process.
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, key: &str, data: Bytes) -> StorageResult<()> {
        ensure_key_safe(key)?;
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn load(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn load_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let data = self.load(key).await?;
        Ok(futures::stream::once(async move { Ok(data) }).boxed())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
