//! Startup reconciler (C10)
//!
//! On boot: reconcile interrupted locks/statuses against on-disk HLS state,
//! sweep old upload sessions, then start the periodic reapers as observable
//! background task handles.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;
use crate::lock::StatusLock;
use crate::upload::{self, UploadCoordinator};

const STALE_LOCK_REAP_INTERVAL: Duration = Duration::from_secs(30 * 60);
const UPLOAD_REAP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const ABANDONED_SESSION_AGE: ChronoDuration = ChronoDuration::minutes(30);

/// Handles to the background tasks started at reconcile time, so they are
/// never orphaned (spec §9 "Fire-and-forget background tasks").
pub struct ReconcilerHandles {
    pub stale_lock_reaper: tokio::task::JoinHandle<()>,
    pub upload_reaper: tokio::task::JoinHandle<()>,
}

/// Run the full startup sequence and return handles to the reapers it
/// spawns.
pub async fn run_startup_reconcile(
    status_lock: Arc<StatusLock>,
    upload_coordinator: Arc<UploadCoordinator>,
    db: SqlitePool,
) -> Result<ReconcilerHandles> {
    info!("running startup reconciliation");
    status_lock.startup_reconcile().await?;

    let abandoned = upload_coordinator
        .sessions()
        .sessions_older_than(ABANDONED_SESSION_AGE)
        .await
        .map_err(|e| crate::error::StreamingError::Other(anyhow::anyhow!(e)))?;
    for session in abandoned {
        if let Some(track_id) = session.track_id {
            info!(track_id, "cleaning up track from abandoned upload session at startup");
            upload_coordinator.comprehensive_cleanup(&track_id).await;
        }
    }

    let stale_lock_reaper = {
        let status_lock = Arc::clone(&status_lock);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STALE_LOCK_REAP_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = status_lock.reap_stale_locks().await {
                    tracing::warn!(error = %e, "stale-lock reaper pass failed");
                }
            }
        })
    };

    let upload_reaper = upload::reaper::spawn(upload_coordinator, db, UPLOAD_REAP_INTERVAL);

    Ok(ReconcilerHandles {
        stale_lock_reaper,
        upload_reaper,
    })
}
