//! Status lock (C4)
//!
//! A DB-backed mutex with two flavors: a per-(track,voice) lock realized as
//! an upsert into `voice_generation_status`, and a full-track lock realized
//! as a conditional `UPDATE` on `tracks`. Both are scoped by the staleness
//! threshold: a lock older than that is semantically released and may be
//! taken over, demoting the prior owner to `failed`.

use std::path::Path;

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::error::Result;

/// Filesystem sync tolerance before validating HLS output (NFS/shared-volume).
const FS_SYNC_DELAY: Duration = Duration::from_secs(2);

pub struct StatusLock {
    db: SqlitePool,
    segments_root: std::path::PathBuf,
    staleness: ChronoDuration,
}

/// Outcome of releasing a lock, after HLS validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Complete,
    Failed,
}

impl StatusLock {
    pub fn new(db: SqlitePool, segments_root: impl Into<std::path::PathBuf>, staleness_minutes: i64) -> Self {
        Self {
            db,
            segments_root: segments_root.into(),
            staleness: ChronoDuration::minutes(staleness_minutes),
        }
    }

    fn stale_before(&self) -> chrono::DateTime<Utc> {
        Utc::now() - self.staleness
    }

    /// Acquire the per-(track,voice) lock (spec §4.4 "Voice lock").
    pub async fn try_lock_voice(&self, track_id: &str, voice_id: &str) -> Result<bool> {
        let now = Utc::now();
        let stale_before = self.stale_before();

        let existing: Option<(String, chrono::DateTime<Utc>)> = sqlx::query_as(
            "SELECT status, started_at FROM voice_generation_status WHERE track_id = ? AND voice_id = ?",
        )
        .bind(track_id)
        .bind(voice_id)
        .fetch_optional(&self.db)
        .await?;

        let takeover = match &existing {
            None => true,
            Some((status, started_at)) => {
                status != "generating" || *started_at < stale_before
            }
        };
        if !takeover {
            return Ok(false);
        }

        if let Some((status, started_at)) = &existing {
            if status == "generating" && *started_at < stale_before {
                warn!(track_id, voice_id, "taking over stale voice lock");
                sqlx::query(
                    "UPDATE voice_generation_status SET status = 'failed', completed_at = ?, \
                     error_message = 'Lock timeout' WHERE track_id = ? AND voice_id = ? AND status = 'generating'",
                )
                .bind(now)
                .bind(track_id)
                .bind(voice_id)
                .execute(&self.db)
                .await?;
            }
        }

        sqlx::query(
            "INSERT INTO voice_generation_status (track_id, voice_id, status, started_at, completed_at, error_message) \
             VALUES (?, ?, 'generating', ?, NULL, NULL) \
             ON CONFLICT(track_id, voice_id) DO UPDATE SET status = 'generating', started_at = excluded.started_at, \
             completed_at = NULL, error_message = NULL",
        )
        .bind(track_id)
        .bind(voice_id)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(true)
    }

    /// Release the voice lock; `complete` is downgraded to `failed` if HLS
    /// validation does not pass (spec §4.4 invariant 4).
    pub async fn unlock_voice(&self, track_id: &str, voice_id: &str, requested: ReleaseOutcome) -> Result<ReleaseOutcome> {
        let outcome = if requested == ReleaseOutcome::Complete {
            if self.validate_hls(track_id, Some(voice_id)).await? {
                ReleaseOutcome::Complete
            } else {
                warn!(track_id, voice_id, "HLS validation failed at unlock, demoting to failed");
                ReleaseOutcome::Failed
            }
        } else {
            ReleaseOutcome::Failed
        };

        let status = match outcome {
            ReleaseOutcome::Complete => "complete",
            ReleaseOutcome::Failed => "failed",
        };
        sqlx::query(
            "UPDATE voice_generation_status SET status = ?, completed_at = ? WHERE track_id = ? AND voice_id = ?",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(track_id)
        .bind(voice_id)
        .execute(&self.db)
        .await?;

        Ok(outcome)
    }

    /// Mark a voice lock failed with an explicit error (used on queuing
    /// failure before any work has started, spec §4.9).
    pub async fn fail_voice(&self, track_id: &str, voice_id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE voice_generation_status SET status = 'failed', completed_at = ?, error_message = ? \
             WHERE track_id = ? AND voice_id = ?",
        )
        .bind(Utc::now())
        .bind(error_message)
        .bind(track_id)
        .bind(voice_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Acquire the full-track lock (spec §4.4 "Full-track lock"): an atomic
    /// conditional `UPDATE` gated on the track being free, terminal, or
    /// stale.
    pub async fn try_lock_track(&self, track_id: &str, processing_type: &str) -> Result<bool> {
        let stale_before = self.stale_before();
        let now = Utc::now();

        let rows = sqlx::query(
            "UPDATE tracks SET status = 'generating', processing_voice = NULL, processing_locked_at = ?, \
             processing_type = ?, hls_ready = 0, updated_at = ? \
             WHERE id = ? AND ( \
                processing_voice IS NULL \
                OR status IN ('complete', 'failed') \
                OR processing_locked_at < ? \
             )",
        )
        .bind(now)
        .bind(processing_type)
        .bind(now)
        .bind(track_id)
        .bind(stale_before)
        .execute(&self.db)
        .await?;

        Ok(rows.rows_affected() > 0)
    }

    /// Release the full-track lock; `complete` is downgraded to `failed` if
    /// HLS validation does not pass.
    pub async fn unlock_track(&self, track_id: &str, requested: ReleaseOutcome) -> Result<ReleaseOutcome> {
        let outcome = if requested == ReleaseOutcome::Complete {
            if self.validate_hls(track_id, None).await? {
                ReleaseOutcome::Complete
            } else {
                warn!(track_id, "HLS validation failed at unlock, demoting to failed");
                ReleaseOutcome::Failed
            }
        } else {
            ReleaseOutcome::Failed
        };

        let status = match outcome {
            ReleaseOutcome::Complete => "complete",
            ReleaseOutcome::Failed => "failed",
        };
        let hls_ready = outcome == ReleaseOutcome::Complete;
        sqlx::query(
            "UPDATE tracks SET status = ?, hls_ready = ?, segmentation_status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(hls_ready)
        .bind(if hls_ready { "complete" } else { "incomplete" })
        .bind(Utc::now())
        .bind(track_id)
        .execute(&self.db)
        .await?;

        Ok(outcome)
    }

    /// HLS validation (invariant 4): wait out filesystem sync, then confirm
    /// master.m3u8, variant playlist, `#EXT-X-ENDLIST`, and that the
    /// `#EXTINF` count does not exceed the on-disk segment count.
    pub async fn validate_hls(&self, track_id: &str, voice_id: Option<&str>) -> Result<bool> {
        sleep(FS_SYNC_DELAY).await;
        let base = match voice_id {
            Some(v) => self.segments_root.join(track_id).join(format!("voice-{v}")),
            None => self.segments_root.join(track_id),
        };
        validate_hls_tree(&base).await
    }

    /// Startup reconciliation (spec §4.4, invoked by C10): sweep tracks and
    /// voice statuses left in a non-terminal state by a crash, and prune
    /// incomplete voice directories.
    pub async fn startup_reconcile(&self) -> Result<()> {
        let stuck_tracks: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM tracks WHERE status IN ('generating', 'segmenting')")
                .fetch_all(&self.db)
                .await?;

        for (track_id,) in stuck_tracks {
            let ok = self.validate_hls(&track_id, None).await.unwrap_or(false);
            let (status, hls_ready) = if ok { ("complete", true) } else { ("failed", false) };
            sqlx::query(
                "UPDATE tracks SET status = ?, hls_ready = ?, updated_at = ? WHERE id = ?",
            )
            .bind(status)
            .bind(hls_ready)
            .bind(Utc::now())
            .bind(&track_id)
            .execute(&self.db)
            .await?;
            info!(track_id, status, "reconciled track status at startup");
        }

        sqlx::query(
            "UPDATE voice_generation_status SET status = 'failed', completed_at = ?, \
             error_message = 'Server restarted during generation' WHERE status = 'generating'",
        )
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        self.prune_incomplete_voice_dirs().await?;
        Ok(())
    }

    async fn prune_incomplete_voice_dirs(&self) -> Result<()> {
        let mut tracks_dir = match tokio::fs::read_dir(&self.segments_root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(track_entry) = tracks_dir.next_entry().await? {
            if !track_entry.file_type().await?.is_dir() {
                continue;
            }
            let mut voice_dirs = match tokio::fs::read_dir(track_entry.path()).await {
                Ok(d) => d,
                Err(_) => continue,
            };
            while let Some(entry) = voice_dirs.next_entry().await? {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !name.starts_with("voice-") {
                    continue;
                }
                let master = entry.path().join("master.m3u8");
                if !master.exists() {
                    warn!(path = %entry.path().display(), "removing incomplete voice directory residue");
                    let _ = tokio::fs::remove_dir_all(entry.path()).await;
                }
            }
        }
        Ok(())
    }

    /// Periodic reaper (spec §4.4): every interval, demote any track whose
    /// lock has exceeded the staleness threshold.
    pub async fn reap_stale_locks(&self) -> Result<u64> {
        let stale_before = self.stale_before();
        let result = sqlx::query(
            "UPDATE tracks SET status = 'failed', updated_at = ? \
             WHERE status IN ('generating', 'segmenting') AND processing_locked_at < ?",
        )
        .bind(Utc::now())
        .bind(stale_before)
        .execute(&self.db)
        .await?;

        sqlx::query(
            "UPDATE voice_generation_status SET status = 'failed', completed_at = ?, \
             error_message = 'Lock timeout' WHERE status = 'generating' AND started_at < ?",
        )
        .bind(Utc::now())
        .bind(stale_before)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Parse a variant playlist and confirm invariant 4 against the segment
/// directory it references. Exposed for reuse by the stream manager (C9)
/// when it needs a non-blocking readiness check (no HLS validation sleep).
pub async fn validate_hls_tree(base: &Path) -> Result<bool> {
    let master = base.join("master.m3u8");
    let playlist = base.join("default").join("playlist.m3u8");
    if !master.exists() || !playlist.exists() {
        return Ok(false);
    }

    let contents = tokio::fs::read_to_string(&playlist).await?;
    if !contents.contains("#EXT-X-ENDLIST") {
        return Ok(false);
    }

    let extinf_count = contents.lines().filter(|l| l.starts_with("#EXTINF")).count();

    let segments_dir = base.join("default");
    let mut read_dir = tokio::fs::read_dir(&segments_dir).await?;
    let mut segment_count = 0usize;
    while let Some(entry) = read_dir.next_entry().await? {
        if entry.file_name().to_string_lossy().ends_with(".ts") {
            segment_count += 1;
        }
    }

    Ok(extinf_count <= segment_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn voice_lock_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = streaming_common::db::init_database(&dir.path().join("t.db")).await.unwrap();
        let lock = StatusLock::new(db, dir.path().join("segments"), 90);

        assert!(lock.try_lock_voice("t1", "alloy").await.unwrap());
        // A second concurrent attempt sees the fresh lock and is refused.
        assert!(!lock.try_lock_voice("t1", "alloy").await.unwrap());
    }

    #[tokio::test]
    async fn stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let db = streaming_common::db::init_database(&dir.path().join("t.db")).await.unwrap();
        let lock = StatusLock::new(db.clone(), dir.path().join("segments"), 90);

        assert!(lock.try_lock_voice("t1", "alloy").await.unwrap());
        // Force the started_at into the past to simulate staleness.
        sqlx::query("UPDATE voice_generation_status SET started_at = ? WHERE track_id = 't1'")
            .bind(Utc::now() - ChronoDuration::minutes(200))
            .execute(&db)
            .await
            .unwrap();

        assert!(lock.try_lock_voice("t1", "alloy").await.unwrap());
    }
}
