//! # Streaming Core
//!
//! Chunked-upload ingestion, per-track/voice HLS preparation, and
//! grant-token authorized playback for a multi-tenant audio-hosting
//! service.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod config;
mod db;
mod error;
mod hls;
mod lock;
mod metadata;
mod object_store;
mod reconcile;
mod state;
mod stream_manager;
mod upload;
mod voice_cache;
mod word_timing;

use crate::config::Config;
use crate::hls::PreparationManager;
use crate::lock::StatusLock;
use crate::metadata::MetadataExtractor;
use crate::object_store::FsObjectStore;
use crate::state::AppContext;
use crate::upload::{SqlxSessionStore, UploadCoordinator};
use crate::voice_cache::NeverPopular;

const WORKER_COUNT: usize = 4;

#[derive(Parser, Debug)]
#[command(name = "streaming-core")]
#[command(about = "Chunked-upload ingestion and grant-token authorized HLS streaming")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "streaming-core.toml")]
    config: PathBuf,

    /// Database path (overrides config file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// HTTP server port (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streaming_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true).with_file(true).with_line_number(true))
        .init();

    info!("Starting streaming-core");

    let args = Args::parse();
    info!("Configuration file: {:?}", args.config);

    let config = Config::load(&args.config, args.database, args.port).await?;
    let config = Arc::new(config);
    info!(
        database = %config.database_path.display(),
        port = config.port,
        segments_root = %config.segments_root.display(),
        "loaded configuration"
    );

    let db = streaming_common::db::init_database(&config.database_path).await?;
    info!("connected to database");

    let object_store: Arc<dyn crate::object_store::ObjectStore> = Arc::new(FsObjectStore::new(
        config.object_store_root.clone(),
        config.shared_tmp_root.clone(),
    ));

    let status_lock = Arc::new(StatusLock::new(
        db.clone(),
        config.segments_root.clone(),
        config.lock_timeout_minutes,
    ));

    let extractor = Arc::new(MetadataExtractor::new(config.ffprobe_path.clone()));

    let prep_manager = Arc::new(PreparationManager::new(
        WORKER_COUNT,
        config.segments_root.clone(),
        config.ffmpeg_path.clone(),
        config.hls_segment_seconds,
        db.clone(),
        object_store.clone(),
        status_lock.clone(),
        extractor.clone(),
    ));

    let sessions = Arc::new(SqlxSessionStore::new(db.clone()));
    let upload_coordinator = Arc::new(UploadCoordinator::new(
        sessions,
        db.clone(),
        object_store.clone(),
        status_lock.clone(),
        prep_manager.clone(),
        config.shared_tmp_root.join("chunks"),
    ));

    let ctx = AppContext::new(
        config.clone(),
        db.clone(),
        object_store,
        prep_manager,
        Arc::new(NeverPopular),
        status_lock,
        upload_coordinator.clone(),
    );

    let reconciler = reconcile::run_startup_reconcile(ctx.status_lock.clone(), upload_coordinator, db).await?;
    info!("startup reconciliation complete, reapers running");

    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::server::run(ctx).await {
            error!("API server error: {}", e);
        }
    });

    api_handle.await?;
    reconciler.stale_lock_reaper.abort();
    reconciler.upload_reaper.abort();

    info!("streaming-core shutting down");
    Ok(())
}
