//! Database initialization — creates the streaming-core schema on a SQLite pool.
//!
//! SQLite is chosen as the concrete datastore (spec §1 treats the relational
//! datastore as external, but this crate still owns table creation the way
//! the teacher's `wkmp-common::db::init` does for its own services).

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection and create tables if needed.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&db_url).await?;

    create_albums_table(&pool).await?;
    create_tracks_table(&pool).await?;
    create_voice_generation_status_table(&pool).await?;
    create_upload_sessions_table(&pool).await?;
    create_tts_text_segments_table(&pool).await?;
    create_tts_voice_segments_table(&pool).await?;
    create_tts_word_timings_table(&pool).await?;

    Ok(pool)
}

async fn create_albums_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS albums (
            id TEXT PRIMARY KEY,
            owner_id INTEGER NOT NULL,
            is_restricted INTEGER NOT NULL DEFAULT 0,
            minimum_tier_amount_cents INTEGER NOT NULL DEFAULT 0,
            minimum_tier_name TEXT NOT NULL DEFAULT '',
            tier_updated_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tracks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id TEXT PRIMARY KEY,
            owner_id INTEGER NOT NULL,
            album_id TEXT NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
            source_blob_path TEXT NOT NULL,
            variant_type TEXT NOT NULL CHECK (variant_type IN ('audio', 'tts')),
            duration_seconds REAL NOT NULL DEFAULT 0,
            codec TEXT,
            bitrate INTEGER,
            sample_rate INTEGER,
            channels INTEGER,
            content_version INTEGER NOT NULL DEFAULT 1,
            upload_status TEXT NOT NULL DEFAULT 'uploading'
                CHECK (upload_status IN ('uploading', 'processing', 'complete', 'failed')),
            processing_voice TEXT,
            processing_locked_at TIMESTAMP,
            processing_type TEXT,
            status TEXT NOT NULL DEFAULT 'generating'
                CHECK (status IN ('generating', 'segmenting', 'complete', 'failed')),
            hls_ready INTEGER NOT NULL DEFAULT 0,
            segmentation_status TEXT NOT NULL DEFAULT 'incomplete'
                CHECK (segmentation_status IN ('incomplete', 'complete')),
            default_voice TEXT,
            visibility_status TEXT NOT NULL DEFAULT 'visible'
                CHECK (visibility_status IN ('visible', 'hidden_from_users', 'hidden_from_all')),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tracks_album ON tracks(album_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_voice_generation_status_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS voice_generation_status (
            track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
            voice_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('generating', 'complete', 'failed')),
            started_at TIMESTAMP NOT NULL,
            completed_at TIMESTAMP,
            error_message TEXT,
            PRIMARY KEY (track_id, voice_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_upload_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_sessions (
            upload_id TEXT PRIMARY KEY,
            chunks_dir TEXT NOT NULL,
            total_chunks INTEGER NOT NULL,
            received_chunks TEXT NOT NULL DEFAULT '',
            filename TEXT NOT NULL,
            title TEXT,
            creator_id INTEGER NOT NULL,
            album_id TEXT NOT NULL,
            intended_visibility TEXT NOT NULL DEFAULT 'visible',
            track_id TEXT,
            status TEXT NOT NULL DEFAULT 'initialized'
                CHECK (status IN ('initialized', 'chunks_complete', 'cancelled')),
            last_updated TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tts_text_segments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tts_text_segments (
            track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
            segment_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            PRIMARY KEY (track_id, segment_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tts_voice_segments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tts_voice_segments (
            track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
            voice_id TEXT NOT NULL,
            segment_index INTEGER NOT NULL,
            actual_duration REAL NOT NULL DEFAULT 0,
            ready INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (track_id, voice_id, segment_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tts_word_timings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tts_word_timings (
            track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
            voice_id TEXT NOT NULL,
            segment_index INTEGER NOT NULL,
            word_index INTEGER NOT NULL,
            word TEXT NOT NULL,
            start REAL NOT NULL,
            end REAL NOT NULL,
            mapped_segment_index INTEGER,
            mapped_segment_offset REAL,
            PRIMARY KEY (track_id, voice_id, segment_index, word_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        for expected in [
            "albums",
            "tracks",
            "voice_generation_status",
            "upload_sessions",
            "tts_text_segments",
            "tts_voice_segments",
            "tts_word_timings",
        ] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }
}
