//! The shared session store backing the chunked-upload coordinator.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use streaming_common::db::UploadSession;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Cross-node upload session storage (spec §4.3). Backed by the shared DB
/// so any frontend node can serve a chunk for the same upload.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: UploadSession) -> Result<(), UploadError>;
    async fn get(&self, upload_id: &str) -> Result<Option<UploadSession>, UploadError>;
    async fn update_progress(
        &self,
        upload_id: &str,
        total_chunks: i64,
        received: &HashSet<i64>,
    ) -> Result<(), UploadError>;
    async fn mark_chunks_complete(&self, upload_id: &str) -> Result<(), UploadError>;
    async fn mark_cancelled(&self, upload_id: &str) -> Result<(), UploadError>;
    async fn sessions_older_than(&self, age: chrono::Duration) -> Result<Vec<UploadSession>, UploadError>;
    async fn delete(&self, upload_id: &str) -> Result<(), UploadError>;
}

pub struct SqlxSessionStore {
    db: SqlitePool,
}

impl SqlxSessionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

fn encode_bitmap(received: &HashSet<i64>) -> String {
    let mut sorted: Vec<i64> = received.iter().copied().collect();
    sorted.sort_unstable();
    sorted.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",")
}

#[async_trait]
impl SessionStore for SqlxSessionStore {
    async fn create(&self, session: UploadSession) -> Result<(), UploadError> {
        sqlx::query(
            "INSERT INTO upload_sessions (upload_id, chunks_dir, total_chunks, received_chunks, filename, \
             title, creator_id, album_id, intended_visibility, track_id, status, last_updated) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.upload_id)
        .bind(&session.chunks_dir)
        .bind(session.total_chunks)
        .bind(&session.received_chunks)
        .bind(&session.filename)
        .bind(&session.title)
        .bind(session.creator_id)
        .bind(&session.album_id)
        .bind(&session.intended_visibility)
        .bind(&session.track_id)
        .bind(&session.status)
        .bind(session.last_updated)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get(&self, upload_id: &str) -> Result<Option<UploadSession>, UploadError> {
        let row = sqlx::query_as::<_, UploadSession>("SELECT * FROM upload_sessions WHERE upload_id = ?")
            .bind(upload_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    async fn update_progress(
        &self,
        upload_id: &str,
        total_chunks: i64,
        received: &HashSet<i64>,
    ) -> Result<(), UploadError> {
        sqlx::query(
            "UPDATE upload_sessions SET total_chunks = ?, received_chunks = ?, last_updated = ? WHERE upload_id = ?",
        )
        .bind(total_chunks)
        .bind(encode_bitmap(received))
        .bind(Utc::now())
        .bind(upload_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn mark_chunks_complete(&self, upload_id: &str) -> Result<(), UploadError> {
        sqlx::query("UPDATE upload_sessions SET status = 'chunks_complete', last_updated = ? WHERE upload_id = ?")
            .bind(Utc::now())
            .bind(upload_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn mark_cancelled(&self, upload_id: &str) -> Result<(), UploadError> {
        sqlx::query("UPDATE upload_sessions SET status = 'cancelled', last_updated = ? WHERE upload_id = ?")
            .bind(Utc::now())
            .bind(upload_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn sessions_older_than(&self, age: chrono::Duration) -> Result<Vec<UploadSession>, UploadError> {
        let cutoff = Utc::now() - age;
        let rows = sqlx::query_as::<_, UploadSession>(
            "SELECT * FROM upload_sessions WHERE last_updated < ? OR status = 'cancelled'",
        )
        .bind(cutoff)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn delete(&self, upload_id: &str) -> Result<(), UploadError> {
        sqlx::query("DELETE FROM upload_sessions WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
