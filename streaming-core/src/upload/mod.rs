//! Chunked-upload coordinator (C3)
//!
//! State lives in the DB-backed session store so any frontend node can
//! serve a chunk for the same upload. `session.rs` is the store itself;
//! `reaper.rs` is the periodic sweep for abandoned sessions/tracks.

pub mod reaper;
pub mod session;

pub use session::{SessionStore, SqlxSessionStore, UploadError};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use streaming_common::db::{UploadSession, VisibilityStatus};
use tracing::info;

use crate::error::{Result, StreamingError};
use crate::hls::task::PrepareTaskInfo;
use crate::hls::PreparationManager;
use crate::lock::{ReleaseOutcome, StatusLock};
use crate::object_store::{DeletionReport, ObjectStore};

pub struct UploadCoordinator {
    sessions: Arc<dyn SessionStore>,
    db: SqlitePool,
    object_store: Arc<dyn ObjectStore>,
    status_lock: Arc<StatusLock>,
    prep_manager: Arc<PreparationManager>,
    chunks_root: PathBuf,
}

impl UploadCoordinator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        db: SqlitePool,
        object_store: Arc<dyn ObjectStore>,
        status_lock: Arc<StatusLock>,
        prep_manager: Arc<PreparationManager>,
        chunks_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sessions,
            db,
            object_store,
            status_lock,
            prep_manager,
            chunks_root: chunks_root.into(),
        }
    }

    /// `init-upload`: validate, allocate a track id and chunks dir, write an
    /// initialized session (spec §4.3).
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub async fn init_upload(
        &self,
        upload_id: &str,
        album_id: &str,
        filename: &str,
        creator_id: i64,
        is_team_member: bool,
        visibility: VisibilityStatus,
    ) -> Result<String> {
        if is_team_member && visibility == VisibilityStatus::HiddenFromAll {
            return Err(StreamingError::BadInput(
                "team users cannot select hidden_from_all visibility".to_string(),
            ));
        }

        let album_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM albums WHERE id = ?)")
            .bind(album_id)
            .fetch_one(&self.db)
            .await?;
        if !album_exists {
            return Err(StreamingError::NotFound(format!("album {album_id} not found")));
        }

        let track_id = uuid::Uuid::new_v4().to_string();
        let chunks_dir = self.chunks_root.join(upload_id);
        tokio::fs::create_dir_all(&chunks_dir).await?;

        self.sessions
            .create(UploadSession {
                upload_id: upload_id.to_string(),
                chunks_dir: chunks_dir.to_string_lossy().to_string(),
                total_chunks: 0,
                received_chunks: String::new(),
                filename: filename.to_string(),
                title: None,
                creator_id,
                album_id: album_id.to_string(),
                intended_visibility: visibility.as_str().to_string(),
                track_id: Some(track_id.clone()),
                status: "initialized".to_string(),
                last_updated: Utc::now(),
            })
            .await?;

        Ok(track_id)
    }

    /// `upload-chunk`: write the chunk by index and register it in the
    /// session's received bitmap. When the bitmap fills, materializes the
    /// Track row and immediately locks it.
    pub async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        total_chunks: u32,
        album_id: &str,
        chunk_bytes: &[u8],
    ) -> Result<bool> {
        let session = self
            .sessions
            .get(upload_id)
            .await?
            .ok_or_else(|| StreamingError::NotFound(format!("upload session {upload_id} not found")))?;

        if session.status() == streaming_common::db::UploadSessionStatus::Cancelled {
            return Err(StreamingError::Conflict("upload session was cancelled".to_string()));
        }
        if session.album_id != album_id {
            return Err(StreamingError::BadInput("album mismatch for upload session".to_string()));
        }

        let chunk_path = std::path::Path::new(&session.chunks_dir).join(format!("chunk_{chunk_index}"));
        tokio::fs::write(&chunk_path, chunk_bytes).await?;

        let mut received = session.received_indices();
        received.insert(chunk_index as i64);
        self.sessions
            .update_progress(upload_id, total_chunks as i64, &received)
            .await?;

        if received.len() as u32 == total_chunks {
            self.materialize_track(&session).await?;
        }

        Ok(received.len() as u32 == total_chunks)
    }

    async fn materialize_track(&self, session: &UploadSession) -> Result<()> {
        let Some(track_id) = &session.track_id else {
            return Err(StreamingError::Conflict("session has no track_id allocated".to_string()));
        };

        sqlx::query(
            "INSERT INTO tracks (id, owner_id, album_id, source_blob_path, variant_type, upload_status, \
             status, visibility_status) \
             VALUES (?, ?, ?, '', 'audio', 'processing', 'generating', ?)",
        )
        .bind(track_id)
        .bind(session.creator_id)
        .bind(&session.album_id)
        .bind(&session.intended_visibility)
        .execute(&self.db)
        .await?;

        let locked = self.status_lock.try_lock_track(track_id, "initial").await?;
        if !locked {
            sqlx::query("DELETE FROM tracks WHERE id = ?")
                .bind(track_id)
                .execute(&self.db)
                .await?;
            return Err(StreamingError::Conflict(format!(
                "could not acquire lock for newly materialized track {track_id}"
            )));
        }

        self.sessions.mark_chunks_complete(&session.upload_id).await?;
        Ok(())
    }

    /// `finalize-upload`: concatenate chunks in index order, upload via C1
    /// with the lock already held, and queue preparation.
    pub async fn finalize_upload(&self, upload_id: &str, track_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get(upload_id)
            .await?
            .ok_or_else(|| StreamingError::NotFound(format!("upload session {upload_id} not found")))?;
        if session.track_id.as_deref() != Some(track_id) {
            return Err(StreamingError::BadInput("track_id does not match session".to_string()));
        }

        let assembled = match self.concatenate_chunks(&session).await {
            Ok(path) => path,
            Err(e) => {
                self.comprehensive_cleanup(track_id).await;
                self.status_lock.unlock_track(track_id, ReleaseOutcome::Failed).await?;
                return Err(e);
            }
        };

        let blob_key = format!("tracks/{track_id}/source");
        if let Err(e) = self.object_store.upload(&assembled, &blob_key).await {
            let _ = tokio::fs::remove_file(&assembled).await;
            self.comprehensive_cleanup(track_id).await;
            self.status_lock.unlock_track(track_id, ReleaseOutcome::Failed).await?;
            return Err(e);
        }
        let _ = tokio::fs::remove_file(&assembled).await;

        sqlx::query("UPDATE tracks SET source_blob_path = ?, upload_status = 'complete' WHERE id = ?")
            .bind(&blob_key)
            .bind(track_id)
            .execute(&self.db)
            .await?;

        self.prep_manager
            .queue_preparation(
                PrepareTaskInfo {
                    track_id: track_id.to_string(),
                    filename: session.filename.clone(),
                    voice: None,
                    lock_already_held: true,
                    is_regeneration: false,
                },
                blob_key,
                1,
            )
            .await?;

        Ok(())
    }

    async fn concatenate_chunks(&self, session: &UploadSession) -> Result<PathBuf> {
        let mut indices: Vec<i64> = session.received_indices().into_iter().collect();
        indices.sort_unstable();
        if indices.len() as i64 != session.total_chunks {
            return Err(StreamingError::BadInput("not all chunks received".to_string()));
        }

        let dest = std::path::Path::new(&session.chunks_dir).join("assembled.bin");
        let mut out = tokio::fs::File::create(&dest).await?;
        for idx in indices {
            let chunk_path = std::path::Path::new(&session.chunks_dir).join(format!("chunk_{idx}"));
            let mut chunk = tokio::fs::File::open(&chunk_path).await?;
            tokio::io::copy(&mut chunk, &mut out).await?;
        }
        Ok(dest)
    }

    /// `cancel-upload`: mark cancelled and, if a Track was materialized,
    /// run comprehensive cleanup.
    pub async fn cancel_upload(&self, upload_id: &str) -> Result<()> {
        let session = self.sessions.get(upload_id).await?;
        self.sessions.mark_cancelled(upload_id).await?;

        if let Some(session) = session {
            if let Some(track_id) = session.track_id {
                self.comprehensive_cleanup(&track_id).await;
            }
        }
        Ok(())
    }

    /// Tear down everything associated with a track that failed or was
    /// abandoned mid-upload (spec §4.3 "Comprehensive cleanup"). Best-effort:
    /// failures are collected, never propagated.
    pub async fn comprehensive_cleanup(&self, track_id: &str) -> DeletionReport {
        let mut report = DeletionReport {
            deleted: Vec::new(),
            failed: Vec::new(),
        };

        let track: Option<(String,)> = sqlx::query_as("SELECT source_blob_path FROM tracks WHERE id = ?")
            .bind(track_id)
            .fetch_optional(&self.db)
            .await
            .unwrap_or(None);

        if let Some((blob_path,)) = track {
            if !blob_path.is_empty() && !blob_path.ends_with(".tmp") {
                match self.object_store.delete(&blob_path).await {
                    Ok(()) => report.deleted.push(blob_path),
                    Err(e) => report.failed.push((blob_path, e.to_string())),
                }
            }
        }

        let segments_dir = self.prep_manager.segments_dir(track_id);
        if segments_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&segments_dir).await {
                report.failed.push((segments_dir.display().to_string(), e.to_string()));
            } else {
                report.deleted.push(segments_dir.display().to_string());
            }
        }

        let _ = sqlx::query("DELETE FROM voice_generation_status WHERE track_id = ?")
            .bind(track_id)
            .execute(&self.db)
            .await;
        let _ = sqlx::query("DELETE FROM tts_word_timings WHERE track_id = ?")
            .bind(track_id)
            .execute(&self.db)
            .await;
        let _ = sqlx::query("DELETE FROM tts_voice_segments WHERE track_id = ?")
            .bind(track_id)
            .execute(&self.db)
            .await;
        let _ = sqlx::query("DELETE FROM tts_text_segments WHERE track_id = ?")
            .bind(track_id)
            .execute(&self.db)
            .await;
        let _ = sqlx::query("DELETE FROM tracks WHERE id = ?")
            .bind(track_id)
            .execute(&self.db)
            .await;

        info!(track_id, deleted = report.deleted.len(), failed = report.failed.len(), "ran comprehensive cleanup");
        report
    }
}
