use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, ScratchType, StorageType};
use services::{
    file_service::FileService,
    object_storage::{LocalObjectStorage, MemoryObjectStorage, ObjectStorage},
    scratch_store::{DiskScratchStore, MemoryScratchStore, ScratchStore},
    upload_service::UploadService,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting upload-service with config: {:?}", cfg);

    // --- Ensure storage directories exist ---
    for dir in [&cfg.storage_dir, &cfg.scratch_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize services ---
    let storage: Arc<dyn ObjectStorage> = match cfg.storage_type {
        StorageType::Local => Arc::new(LocalObjectStorage::new(&cfg.storage_dir)),
        StorageType::Memory => {
            tracing::warn!("Using in-memory object storage; files are lost on restart");
            Arc::new(MemoryObjectStorage::new())
        }
    };
    let scratch: Arc<dyn ScratchStore> = match cfg.scratch_type {
        ScratchType::Disk => Arc::new(DiskScratchStore::new(&cfg.scratch_dir)),
        ScratchType::Memory => Arc::new(MemoryScratchStore::new()),
    };

    let files = FileService::new(db.clone(), storage);
    let session_ttl = match cfg.session_ttl_secs {
        0 => None,
        // bounded by MAX_SESSION_TTL_SECS in AppConfig::resolve
        secs => Some(chrono::Duration::seconds(secs as i64)),
    };
    let uploads = UploadService::new(files.clone(), scratch, session_ttl);

    if session_ttl.is_some() {
        uploads
            .clone()
            .spawn_reaper(Duration::from_secs(cfg.reap_interval_secs));
        tracing::info!(
            ttl_secs = cfg.session_ttl_secs,
            interval_secs = cfg.reap_interval_secs,
            "Upload session reaper running"
        );
    } else {
        tracing::info!("Upload session reaper disabled; abandoned uploads are kept");
    }

    let state = AppState {
        files,
        uploads,
        scratch_dir: match cfg.scratch_type {
            ScratchType::Disk => Some(cfg.scratch_dir.clone().into()),
            ScratchType::Memory => None,
        },
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_body_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
