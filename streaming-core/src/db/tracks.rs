//! Track row queries.

use chrono::Utc;
use sqlx::SqlitePool;
use streaming_common::db::Track;

use crate::error::{Result, StreamingError};

pub async fn find(db: &SqlitePool, track_id: &str) -> Result<Track> {
    sqlx::query_as::<_, Track>("SELECT * FROM tracks WHERE id = ?")
        .bind(track_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| StreamingError::NotFound(format!("track {track_id} not found")))
}

pub async fn find_optional(db: &SqlitePool, track_id: &str) -> Result<Option<Track>> {
    Ok(sqlx::query_as::<_, Track>("SELECT * FROM tracks WHERE id = ?")
        .bind(track_id)
        .fetch_optional(db)
        .await?)
}

/// Bump `content_version` on a track (invariant 3: source/TTS content
/// changed, or album tier_restrictions changed).
pub async fn bump_content_version(db: &SqlitePool, track_id: &str) -> Result<i64> {
    sqlx::query("UPDATE tracks SET content_version = content_version + 1, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(track_id)
        .execute(db)
        .await?;

    let version: i64 = sqlx::query_scalar("SELECT content_version FROM tracks WHERE id = ?")
        .bind(track_id)
        .fetch_one(db)
        .await?;
    Ok(version)
}

/// Bump `content_version` on every track in an album (tier-restriction
/// change, spec §4.8 "Invalidation").
pub async fn bump_content_version_for_album(db: &SqlitePool, album_id: &str) -> Result<Vec<String>> {
    let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM tracks WHERE album_id = ?")
        .bind(album_id)
        .fetch_all(db)
        .await?;

    sqlx::query("UPDATE tracks SET content_version = content_version + 1, updated_at = ? WHERE album_id = ?")
        .bind(Utc::now())
        .bind(album_id)
        .execute(db)
        .await?;

    Ok(ids.into_iter().map(|(id,)| id).collect())
}

pub async fn set_default_voice(db: &SqlitePool, track_id: &str, voice_id: &str) -> Result<()> {
    sqlx::query("UPDATE tracks SET default_voice = ?, updated_at = ? WHERE id = ?")
        .bind(voice_id)
        .bind(Utc::now())
        .bind(track_id)
        .execute(db)
        .await?;
    Ok(())
}
