//! Chunked upload sessions.
//!
//! A client calls `start` for an upload id, sends numbered chunks in any
//! order with `chunk`, then calls `complete`, which concatenates the chunks
//! in ascending numeric order and hands the result to `FileService`.
//!
//! Every session carries its own mutex. `chunk`, `complete`, `abort` and the
//! reaper all take it, so a session is never assembled while a chunk write
//! or a second completion is in flight. Scratch data is only removed after
//! the durable write succeeded.

use crate::{
    models::{
        stored_file::StoredFile,
        upload_session::{UploadSession, UploadStatus},
    },
    services::{
        error::{ServiceError, ServiceResult},
        file_service::{FileService, normalize_filename},
        scratch_store::ScratchStore,
    },
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

struct SessionHandle {
    session: UploadSession,
    state: Mutex<SessionState>,
}

struct SessionState {
    last_activity: DateTime<Utc>,
    /// Set once the session is completed, aborted or reaped.
    closed: bool,
}

#[derive(Clone)]
pub struct UploadService {
    inner: Arc<UploadServiceInner>,
}

struct UploadServiceInner {
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
    scratch: Arc<dyn ScratchStore>,
    files: FileService,
    /// Idle time after which a session is reaped. `None` keeps sessions forever.
    session_ttl: Option<Duration>,
}

impl UploadService {
    pub fn new(
        files: FileService,
        scratch: Arc<dyn ScratchStore>,
        session_ttl: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(UploadServiceInner {
                sessions: RwLock::new(HashMap::new()),
                scratch,
                files,
                session_ttl,
            }),
        }
    }

    /// Open a session and allocate its scratch area.
    pub async fn start(
        &self,
        owner_id: &str,
        filename: &str,
        total_chunks: Option<u64>,
    ) -> ServiceResult<UploadSession> {
        let session = UploadSession::new(owner_id, filename, total_chunks);
        self.inner.scratch.create_area(session.id).await?;

        let handle = Arc::new(SessionHandle {
            session: session.clone(),
            state: Mutex::new(SessionState {
                last_activity: session.created_at,
                closed: false,
            }),
        });
        self.inner
            .sessions
            .write()
            .await
            .insert(session.id, handle);

        info!(
            upload_id = %session.id,
            filename = %session.filename,
            total_chunks = ?session.total_chunks,
            scratch = self.inner.scratch.backend_name(),
            "started chunked upload"
        );
        Ok(session)
    }

    /// Store one chunk. Re-sending a chunk number replaces its content.
    pub async fn chunk(
        &self,
        owner_id: &str,
        upload_id: &str,
        chunk_number: u64,
        content: Bytes,
    ) -> ServiceResult<()> {
        let handle = self.lookup(owner_id, upload_id).await?;
        let mut state = handle.state.lock().await;
        if state.closed {
            return Err(ServiceError::SessionNotFound(upload_id.to_string()));
        }

        let size = content.len();
        self.inner
            .scratch
            .write_chunk(handle.session.id, chunk_number, content)
            .await?;
        state.last_activity = Utc::now();

        debug!(upload_id = %handle.session.id, chunk_number, size, "received chunk");
        Ok(())
    }

    /// Assemble the received chunks and persist them as one file.
    ///
    /// The filename is validated before anything is read or written. On any
    /// failure the session and its chunks are left in place for a retry.
    pub async fn complete(
        &self,
        owner_id: &str,
        upload_id: &str,
        filename: &str,
    ) -> ServiceResult<StoredFile> {
        let handle = self.lookup(owner_id, upload_id).await?;
        let mut state = handle.state.lock().await;
        if state.closed {
            return Err(ServiceError::SessionNotFound(upload_id.to_string()));
        }

        let filename = normalize_filename(filename)?;
        let id = handle.session.id;
        let (content, chunk_count) = self.assemble(id).await?;

        if let Some(expected) = handle.session.total_chunks {
            if expected != chunk_count as u64 {
                warn!(
                    upload_id = %id,
                    expected,
                    received = chunk_count,
                    "chunk count differs from announced total"
                );
            }
        }

        let stored = self
            .inner
            .files
            .persist(owner_id, filename, content, "")
            .await?;

        state.closed = true;
        if let Err(err) = self.discard(id).await {
            warn!(upload_id = %id, error = %err, "failed to remove scratch area after completion");
        }

        info!(
            upload_id = %id,
            file_id = %stored.id,
            chunks = chunk_count,
            size = stored.size,
            "completed chunked upload"
        );
        Ok(stored)
    }

    /// Session metadata and the chunk numbers received so far.
    pub async fn status(&self, owner_id: &str, upload_id: &str) -> ServiceResult<UploadStatus> {
        let handle = self.lookup(owner_id, upload_id).await?;
        let state = handle.state.lock().await;
        if state.closed {
            return Err(ServiceError::SessionNotFound(upload_id.to_string()));
        }

        let mut received_chunks = self.inner.scratch.chunk_numbers(handle.session.id).await?;
        received_chunks.sort_unstable();

        Ok(UploadStatus {
            upload_id: handle.session.id,
            filename: handle.session.filename.clone(),
            total_chunks: handle.session.total_chunks,
            received_chunks,
            created_at: handle.session.created_at,
            last_activity: state.last_activity,
        })
    }

    /// Drop a session and everything it received.
    pub async fn abort(&self, owner_id: &str, upload_id: &str) -> ServiceResult<()> {
        let handle = self.lookup(owner_id, upload_id).await?;
        let mut state = handle.state.lock().await;
        if state.closed {
            return Err(ServiceError::SessionNotFound(upload_id.to_string()));
        }

        state.closed = true;
        self.discard(handle.session.id).await?;

        info!(upload_id = %handle.session.id, "aborted chunked upload");
        Ok(())
    }

    /// Remove sessions idle for longer than the configured TTL.
    ///
    /// Sessions whose lock is held are skipped; they are in use.
    pub async fn reap_expired(&self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.inner.session_ttl else {
            return 0;
        };

        let candidates: Vec<Arc<SessionHandle>> =
            self.inner.sessions.read().await.values().cloned().collect();

        let mut reaped = 0;
        for handle in candidates {
            let Ok(mut state) = handle.state.try_lock() else {
                continue;
            };
            if state.closed || now - state.last_activity < ttl {
                continue;
            }

            state.closed = true;
            let id = handle.session.id;
            if let Err(err) = self.discard(id).await {
                warn!(upload_id = %id, error = %err, "failed to remove expired scratch area");
            }
            debug!(upload_id = %id, filename = %handle.session.filename, "reaped expired upload");
            reaped += 1;
        }

        if reaped > 0 {
            info!(count = reaped, "reaped expired upload sessions");
        }
        reaped
    }

    /// Run `reap_expired` every `interval` until the runtime shuts down.
    pub fn spawn_reaper(self, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.reap_expired(Utc::now()).await;
            }
        })
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Resolve an upload id. Malformed ids and sessions owned by someone
    /// else are reported the same way as unknown ones.
    async fn lookup(&self, owner_id: &str, upload_id: &str) -> ServiceResult<Arc<SessionHandle>> {
        let not_found = || ServiceError::SessionNotFound(upload_id.to_string());
        let id = Uuid::parse_str(upload_id).map_err(|_| not_found())?;

        let sessions = self.inner.sessions.read().await;
        sessions
            .get(&id)
            .filter(|handle| handle.session.owner_id == owner_id)
            .cloned()
            .ok_or_else(not_found)
    }

    /// Concatenate all chunks of `id`, sorted by chunk number.
    async fn assemble(&self, id: Uuid) -> ServiceResult<(Bytes, usize)> {
        let mut numbers = self.inner.scratch.chunk_numbers(id).await?;
        numbers.sort_unstable();

        let mut buffer = BytesMut::new();
        for n in &numbers {
            let chunk = self.inner.scratch.read_chunk(id, *n).await?;
            buffer.extend_from_slice(&chunk);
        }
        Ok((buffer.freeze(), numbers.len()))
    }

    /// Forget the session and delete its scratch area.
    async fn discard(&self, id: Uuid) -> std::io::Result<()> {
        self.inner.sessions.write().await.remove(&id);
        self.inner.scratch.remove_area(id).await
    }
}
