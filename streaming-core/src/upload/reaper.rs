//! Periodic reaper for abandoned upload sessions and stuck tracks (spec §4.3).

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use sqlx::SqlitePool;
use tracing::{info, warn};

use super::UploadCoordinator;
use crate::error::Result;

const SESSION_MAX_AGE: ChronoDuration = ChronoDuration::minutes(30);
const STUCK_TRACK_AGE: ChronoDuration = ChronoDuration::minutes(30);

/// Sweep sessions older than 30 minutes or cancelled, removing their chunk
/// directories; separately sweep stuck uploading tracks.
pub async fn run_once(coordinator: &UploadCoordinator, db: &SqlitePool) -> Result<()> {
    reap_sessions(coordinator).await?;
    reap_stuck_tracks(coordinator, db).await?;
    Ok(())
}

async fn reap_sessions(coordinator: &UploadCoordinator) -> Result<()> {
    let sessions = coordinator
        .sessions
        .sessions_older_than(SESSION_MAX_AGE)
        .await
        .map_err(|e| crate::error::StreamingError::Other(anyhow::anyhow!(e)))?;

    for session in sessions {
        info!(upload_id = %session.upload_id, "reaping abandoned upload session");
        let dir = std::path::Path::new(&session.chunks_dir);
        if dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                warn!(upload_id = %session.upload_id, error = %e, "failed to remove chunks dir during reap");
            }
        }
        let _ = coordinator.sessions.delete(&session.upload_id).await;
    }
    Ok(())
}

async fn reap_stuck_tracks(coordinator: &UploadCoordinator, db: &SqlitePool) -> Result<()> {
    let cutoff = chrono::Utc::now() - STUCK_TRACK_AGE;
    let stuck: Vec<(String,)> = sqlx::query_as(
        "SELECT id FROM tracks WHERE upload_status = 'processing' AND duration_seconds = 0 \
         AND created_at < ? AND (updated_at < ? OR source_blob_path LIKE '%.tmp')",
    )
    .bind(cutoff)
    .bind(cutoff)
    .fetch_all(db)
    .await?;

    for (track_id,) in stuck {
        info!(track_id, "reaping stuck upload track");
        coordinator.comprehensive_cleanup(&track_id).await;
    }
    Ok(())
}

/// Spawn the periodic reaper loop as a background task.
pub fn spawn(coordinator: Arc<UploadCoordinator>, db: SqlitePool, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = run_once(&coordinator, &db).await {
                warn!(error = %e, "upload reaper pass failed");
            }
        }
    })
}
