//! Stream manager (C9)
//!
//! The single facade the request layer consumes: resolves a (track, voice)
//! to playlist/segment metadata, triggering regeneration through C4/C5/C6
//! when needed. A process-local map of mutexes coalesces same-process
//! arrivals; the DB-backed status lock remains the cross-process source of
//! truth.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use streaming_common::db::Track;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Result, StreamingError};
use crate::hls::playlist::{self, PlaylistProgress};
use crate::hls::task::{PrepareTaskInfo, TaskStatus};
use crate::hls::PreparationManager;
use crate::lock::{validate_hls_tree, StatusLock};
use crate::voice_cache::{Admission, VoiceCache};

/// Outcome of `get_stream_response`.
#[derive(Debug, Clone)]
pub enum StreamResponse {
    Ready { playlist_path: std::path::PathBuf },
    Busy { retry_after_secs: u64 },
}

/// Outcome of `get_segment_progress`.
#[derive(Debug, Clone)]
pub enum ProgressReport {
    Complete { total_duration: f64 },
    InProgress { percent: f64 },
    Error { message: String },
    NotFound,
}

pub struct StreamManager {
    db: SqlitePool,
    segments_root: std::path::PathBuf,
    status_lock: Arc<StatusLock>,
    prep_manager: Arc<PreparationManager>,
    voice_cache: Arc<VoiceCache>,
    track_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StreamManager {
    pub fn new(
        db: SqlitePool,
        segments_root: impl Into<std::path::PathBuf>,
        status_lock: Arc<StatusLock>,
        prep_manager: Arc<PreparationManager>,
        voice_cache: Arc<VoiceCache>,
    ) -> Self {
        Self {
            db,
            segments_root: segments_root.into(),
            status_lock,
            prep_manager,
            voice_cache,
            track_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn per_track_lock(&self, track_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.track_locks.lock().await;
        locks.entry(track_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn base_dir(&self, track_id: &str, voice: Option<&str>) -> std::path::PathBuf {
        match voice {
            Some(v) => self.segments_root.join(track_id).join(format!("voice-{v}")),
            None => self.segments_root.join(track_id),
        }
    }

    /// Resolve a (track, voice) to playlist/segment metadata, or 202 with a
    /// retry hint while preparation runs (spec §4.9).
    pub async fn get_stream_response(
        &self,
        track: &Track,
        voice: Option<&str>,
        skip_lock_check: bool,
    ) -> Result<StreamResponse> {
        let per_track = self.per_track_lock(&track.id).await;
        let _guard = per_track.lock().await;

        let stream_id = match voice {
            Some(v) => format!("{}/{}", track.id, v),
            None => track.id.clone(),
        };

        if let Some(entry) = self.prep_manager.status_of(&stream_id).await {
            if !entry.status.is_terminal() {
                return Ok(StreamResponse::Busy { retry_after_secs: 5 });
            }
            if entry.status == TaskStatus::Error {
                return Err(StreamingError::TranscodeFailure(
                    entry.error_message.unwrap_or_else(|| "preparation failed".to_string()),
                ));
            }
        }

        let base = self.base_dir(&track.id, voice);
        if validate_hls_tree(&base).await? {
            return Ok(StreamResponse::Ready {
                playlist_path: base.join("default").join("playlist.m3u8"),
            });
        }

        self.trigger_regeneration(track, voice, skip_lock_check).await
    }

    async fn trigger_regeneration(
        &self,
        track: &Track,
        voice: Option<&str>,
        skip_lock_check: bool,
    ) -> Result<StreamResponse> {
        if let Some(voice_id) = voice {
            if !skip_lock_check {
                let admission = self.voice_cache.admit(&self.db, track, voice_id).await?;
                if let Admission::Denied { reason } = admission {
                    return Err(StreamingError::Conflict(reason));
                }
            }

            // `lock_acquired_here` only tracks whether *this call* did the
            // acquiring, for the synchronous queue-failure path below; by
            // the time a task reaches the worker the lock is always held,
            // so `task_info.lock_already_held` is always true (spec §4.5).
            let lock_acquired_here = if skip_lock_check {
                false
            } else {
                let acquired = self.status_lock.try_lock_voice(&track.id, voice_id).await?;
                if !acquired {
                    return Ok(StreamResponse::Busy { retry_after_secs: 5 });
                }
                true
            };

            let task_info = PrepareTaskInfo {
                track_id: track.id.clone(),
                filename: track.source_blob_path.clone(),
                voice: Some(voice_id.to_string()),
                lock_already_held: true,
                is_regeneration: track.hls_ready,
            };

            if let Err(e) = self.prep_manager.queue_preparation(task_info, track.source_blob_path.clone(), 2).await {
                if lock_acquired_here {
                    let _ = self.status_lock.unlock_voice(&track.id, voice_id, crate::lock::ReleaseOutcome::Failed).await;
                }
                self.status_lock.fail_voice(&track.id, voice_id, &e.to_string()).await?;
                return Err(e);
            }
        } else {
            let lock_acquired_here = if skip_lock_check {
                false
            } else {
                let acquired = self.status_lock.try_lock_track(&track.id, "regenerate").await?;
                if !acquired {
                    return Ok(StreamResponse::Busy { retry_after_secs: 5 });
                }
                true
            };

            let task_info = PrepareTaskInfo {
                track_id: track.id.clone(),
                filename: track.source_blob_path.clone(),
                voice: None,
                lock_already_held: true,
                is_regeneration: track.hls_ready,
            };

            if let Err(e) = self.prep_manager.queue_preparation(task_info, track.source_blob_path.clone(), 2).await {
                if lock_acquired_here {
                    let _ = self.status_lock.unlock_track(&track.id, crate::lock::ReleaseOutcome::Failed).await;
                }
                return Err(e);
            }
        }

        Ok(StreamResponse::Busy { retry_after_secs: 8 })
    }

    /// `get_segment_progress`: the in-memory task status if present,
    /// otherwise fall back to parsing the on-disk playlist.
    pub async fn get_segment_progress(&self, track_id: &str, voice: Option<&str>) -> Result<ProgressReport> {
        let stream_id = match voice {
            Some(v) => format!("{track_id}/{v}"),
            None => track_id.to_string(),
        };

        if let Some(entry) = self.prep_manager.status_of(&stream_id).await {
            return Ok(match entry.status {
                TaskStatus::Complete => ProgressReport::Complete { total_duration: entry.total_duration },
                TaskStatus::Error => ProgressReport::Error {
                    message: entry.error_message.unwrap_or_default(),
                },
                _ => ProgressReport::InProgress { percent: entry.progress_percent() },
            });
        }

        let base = self.base_dir(track_id, voice);
        let playlist_path = base.join("default").join("playlist.m3u8");
        let contents = match tokio::fs::read_to_string(&playlist_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ProgressReport::NotFound),
            Err(e) => return Err(e.into()),
        };

        let index = playlist::read_index(&base.join("index.json")).await?;
        let expected_total = index.map(|i| i.total_duration).unwrap_or(0.0);

        Ok(match playlist::parse_progress(&contents, expected_total) {
            PlaylistProgress::Complete { total_duration } => ProgressReport::Complete { total_duration },
            PlaylistProgress::InProgress { percent } => ProgressReport::InProgress { percent },
            PlaylistProgress::NotFound => ProgressReport::NotFound,
        })
    }

    /// `cleanup_stream`: delete the on-disk tree and clear DB-side caches.
    pub async fn cleanup_stream(&self, track_id: &str) -> Result<()> {
        let dir = self.segments_root.join(track_id);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        sqlx::query("DELETE FROM tts_word_timings WHERE track_id = ?")
            .bind(track_id)
            .execute(&self.db)
            .await?;
        self.prep_manager.clear_task(track_id).await;
        info!(track_id, "cleaned up stream assets");
        Ok(())
    }
}
