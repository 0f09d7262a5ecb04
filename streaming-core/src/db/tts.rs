//! TTS text/voice segment and word-timing queries.

use sqlx::SqlitePool;
use streaming_common::db::{TtsTextSegment, TtsVoiceSegment, TtsWordTiming};

use crate::error::Result;

pub async fn text_segments(db: &SqlitePool, track_id: &str) -> Result<Vec<TtsTextSegment>> {
    Ok(sqlx::query_as::<_, TtsTextSegment>(
        "SELECT * FROM tts_text_segments WHERE track_id = ? ORDER BY segment_index",
    )
    .bind(track_id)
    .fetch_all(db)
    .await?)
}

pub async fn voice_segments(db: &SqlitePool, track_id: &str, voice_id: &str) -> Result<Vec<TtsVoiceSegment>> {
    Ok(sqlx::query_as::<_, TtsVoiceSegment>(
        "SELECT * FROM tts_voice_segments WHERE track_id = ? AND voice_id = ? ORDER BY segment_index",
    )
    .bind(track_id)
    .bind(voice_id)
    .fetch_all(db)
    .await?)
}

/// Every voice id that has at least one voice-segment row for this track,
/// used by C1's `delete_all_tts_voices` when no richer metadata is
/// available.
pub async fn known_voice_ids(db: &SqlitePool, track_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT voice_id FROM tts_voice_segments WHERE track_id = ?")
            .bind(track_id)
            .fetch_all(db)
            .await?;
    Ok(rows.into_iter().map(|(v,)| v).collect())
}

pub async fn word_timings(db: &SqlitePool, track_id: &str, voice_id: &str) -> Result<Vec<TtsWordTiming>> {
    Ok(sqlx::query_as::<_, TtsWordTiming>(
        "SELECT * FROM tts_word_timings WHERE track_id = ? AND voice_id = ? ORDER BY segment_index, word_index",
    )
    .bind(track_id)
    .bind(voice_id)
    .fetch_all(db)
    .await?)
}
