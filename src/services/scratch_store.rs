//! Temporary per-session chunk storage used between `start` and `complete`.
//!
//! Each upload owns one scratch area keyed by its id. Chunk numbers are the
//! entry names; listing returns them in whatever order the backend yields
//! and callers are responsible for ordering.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::PathBuf,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::RwLock,
};
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait ScratchStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Allocate an empty area for `upload_id`.
    async fn create_area(&self, upload_id: Uuid) -> io::Result<()>;

    /// Store `content` as chunk `chunk_number`, replacing any previous value.
    async fn write_chunk(&self, upload_id: Uuid, chunk_number: u64, content: Bytes)
    -> io::Result<()>;

    /// Chunk numbers present in the area, unordered.
    async fn chunk_numbers(&self, upload_id: Uuid) -> io::Result<Vec<u64>>;

    async fn read_chunk(&self, upload_id: Uuid, chunk_number: u64) -> io::Result<Bytes>;

    /// Delete the area and everything in it. Succeeds if it is already gone.
    async fn remove_area(&self, upload_id: Uuid) -> io::Result<()>;
}

/// One directory per upload under `base_path`, one file per chunk.
#[derive(Clone, Debug)]
pub struct DiskScratchStore {
    base_path: PathBuf,
}

impl DiskScratchStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn area_path(&self, upload_id: Uuid) -> PathBuf {
        self.base_path.join(upload_id.to_string())
    }
}

#[async_trait]
impl ScratchStore for DiskScratchStore {
    fn backend_name(&self) -> &'static str {
        "disk"
    }

    async fn create_area(&self, upload_id: Uuid) -> io::Result<()> {
        fs::create_dir_all(self.area_path(upload_id)).await
    }

    /// Writes go through a temp file and a rename, so concurrent readers of
    /// the same chunk see either the old or the new content.
    async fn write_chunk(
        &self,
        upload_id: Uuid,
        chunk_number: u64,
        content: Bytes,
    ) -> io::Result<()> {
        let area = self.area_path(upload_id);
        let final_path = area.join(chunk_number.to_string());
        let tmp_path = area.join(format!(".tmp-{}-{}", chunk_number, Uuid::new_v4()));

        let write_result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&content).await?;
            file.flush().await
        }
        .await;
        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        debug!(%upload_id, chunk_number, size = content.len(), "wrote chunk to disk");
        Ok(())
    }

    async fn chunk_numbers(&self, upload_id: Uuid) -> io::Result<Vec<u64>> {
        let mut entries = fs::read_dir(self.area_path(upload_id)).await?;
        let mut numbers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            // Temp files and anything else not named by a number are ignored.
            if let Some(n) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                numbers.push(n);
            }
        }
        Ok(numbers)
    }

    async fn read_chunk(&self, upload_id: Uuid, chunk_number: u64) -> io::Result<Bytes> {
        let path = self.area_path(upload_id).join(chunk_number.to_string());
        Ok(Bytes::from(fs::read(path).await?))
    }

    async fn remove_area(&self, upload_id: Uuid) -> io::Result<()> {
        match fs::remove_dir_all(self.area_path(upload_id)).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Scratch areas kept in process memory.
#[derive(Default)]
pub struct MemoryScratchStore {
    areas: RwLock<HashMap<Uuid, HashMap<u64, Bytes>>>,
}

impl MemoryScratchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn missing_area(upload_id: Uuid) -> io::Error {
        io::Error::new(
            ErrorKind::NotFound,
            format!("scratch area {} does not exist", upload_id),
        )
    }
}

#[async_trait]
impl ScratchStore for MemoryScratchStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_area(&self, upload_id: Uuid) -> io::Result<()> {
        self.areas.write().await.entry(upload_id).or_default();
        Ok(())
    }

    async fn write_chunk(
        &self,
        upload_id: Uuid,
        chunk_number: u64,
        content: Bytes,
    ) -> io::Result<()> {
        let mut areas = self.areas.write().await;
        let area = areas
            .get_mut(&upload_id)
            .ok_or_else(|| Self::missing_area(upload_id))?;
        area.insert(chunk_number, content);
        Ok(())
    }

    async fn chunk_numbers(&self, upload_id: Uuid) -> io::Result<Vec<u64>> {
        let areas = self.areas.read().await;
        let area = areas
            .get(&upload_id)
            .ok_or_else(|| Self::missing_area(upload_id))?;
        Ok(area.keys().copied().collect())
    }

    async fn read_chunk(&self, upload_id: Uuid, chunk_number: u64) -> io::Result<Bytes> {
        let areas = self.areas.read().await;
        areas
            .get(&upload_id)
            .and_then(|area| area.get(&chunk_number))
            .cloned()
            .ok_or_else(|| {
                io::Error::new(
                    ErrorKind::NotFound,
                    format!("chunk {} missing from {}", chunk_number, upload_id),
                )
            })
    }

    async fn remove_area(&self, upload_id: Uuid) -> io::Result<()> {
        self.areas.write().await.remove(&upload_id);
        Ok(())
    }
}
