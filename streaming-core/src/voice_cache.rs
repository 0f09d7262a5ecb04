//! Voice cache manager (C6)
//!
//! Admission gate invoked before acquiring a voice lock. Computes
//! `max_voices(track)` from an external popularity oracle, enumerates the
//! on-disk and in-flight voices, and either admits, evicts an inactive
//! non-default voice, or denies with a retryable message.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Result, StreamingError};

/// Contract for the external `popular_tracks_service` (spec §4.6). Out of
/// scope per spec §1; only the boolean contract is modeled here.
#[async_trait]
pub trait PopularityOracle: Send + Sync {
    async fn is_popular(&self, track_id: &str, creator_id: i64) -> bool;
}

/// Oracle that treats no track as popular; useful as a safe default and in
/// tests that don't care about the popularity dimension.
pub struct NeverPopular;

#[async_trait]
impl PopularityOracle for NeverPopular {
    async fn is_popular(&self, _track_id: &str, _creator_id: i64) -> bool {
        false
    }
}

const POPULAR_MAX_VOICES: usize = 5;
const DEFAULT_MAX_VOICES: usize = 3;
const ACCESS_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const ACCESS_ENTRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-(track, voice) access bookkeeping used to pick eviction candidates.
#[derive(Debug, Clone)]
struct AccessEntry {
    last_access: Instant,
    segment_count: u64,
    unique_segments: std::collections::HashSet<u32>,
}

/// Shared tracker recording segment-serve accesses per (track, voice),
/// consulted by the cache manager to find an inactive eviction candidate.
#[derive(Default)]
pub struct VoiceAccessTracker {
    entries: RwLock<HashMap<(String, String), AccessEntry>>,
}

impl VoiceAccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_access(&self, track_id: &str, voice_id: &str, segment_index: u32) {
        let mut entries = self.entries.write().await;
        let key = (track_id.to_string(), voice_id.to_string());
        let entry = entries.entry(key).or_insert_with(|| AccessEntry {
            last_access: Instant::now(),
            segment_count: 0,
            unique_segments: std::collections::HashSet::new(),
        });
        entry.last_access = Instant::now();
        entry.segment_count += 1;
        entry.unique_segments.insert(segment_index);
    }

    async fn is_inactive(&self, track_id: &str, voice_id: &str) -> bool {
        let entries = self.entries.read().await;
        match entries.get(&(track_id.to_string(), voice_id.to_string())) {
            Some(entry) => entry.last_access.elapsed() > ACCESS_IDLE_TIMEOUT,
            None => true,
        }
    }

    /// Drop entries whose TTL has expired; called periodically alongside
    /// the other reapers.
    pub async fn expire_old_entries(&self) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.last_access.elapsed() < ACCESS_ENTRY_TTL);
    }

    async fn clear(&self, track_id: &str, voice_id: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(&(track_id.to_string(), voice_id.to_string()));
    }
}

/// Result of an admission decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted,
    AdmittedAfterEviction { evicted_voice_id: String },
    Denied { reason: String },
}

pub struct VoiceCache {
    segments_root: PathBuf,
    popularity: Arc<dyn PopularityOracle>,
    pub access_tracker: Arc<VoiceAccessTracker>,
}

impl VoiceCache {
    pub fn new(segments_root: impl Into<PathBuf>, popularity: Arc<dyn PopularityOracle>) -> Self {
        Self {
            segments_root: segments_root.into(),
            popularity,
            access_tracker: Arc::new(VoiceAccessTracker::new()),
        }
    }

    pub async fn max_voices(&self, track_id: &str, creator_id: i64) -> usize {
        if self.popularity.is_popular(track_id, creator_id).await {
            POPULAR_MAX_VOICES
        } else {
            DEFAULT_MAX_VOICES
        }
    }

    /// On-disk `voice-*/` directories containing a valid `master.m3u8`.
    pub async fn completed_voices(&self, track_id: &str) -> Result<Vec<String>> {
        let track_dir = self.segments_root.join(track_id);
        let mut out = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&track_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(voice_id) = name.strip_prefix("voice-") else {
                continue;
            };
            if entry.path().join("master.m3u8").exists() {
                out.push(voice_id.to_string());
            }
        }
        Ok(out)
    }

    async fn inflight_voices(&self, db: &SqlitePool, track_id: &str) -> Result<Vec<String>> {
        let stale_before = Utc::now() - ChronoDuration::minutes(90);
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT voice_id FROM voice_generation_status \
             WHERE track_id = ? AND status = 'generating' AND started_at >= ?",
        )
        .bind(track_id)
        .bind(stale_before)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    /// Admission gate invoked before acquiring a voice lock (spec §4.6).
    pub async fn admit(
        &self,
        db: &SqlitePool,
        track: &streaming_common::db::Track,
        requested_voice: &str,
    ) -> Result<Admission> {
        let completed = self.completed_voices(&track.id).await?;
        if completed.iter().any(|v| v == requested_voice) {
            return Ok(Admission::Admitted);
        }

        let inflight = self.inflight_voices(db, &track.id).await?;
        let max = self.max_voices(&track.id, track.owner_id).await;

        if completed.len() + inflight.len() < max {
            return Ok(Admission::Admitted);
        }

        for candidate in &completed {
            if Some(candidate.as_str()) == track.default_voice.as_deref() {
                continue;
            }
            if self.access_tracker.is_inactive(&track.id, candidate).await {
                self.evict(&track.id, candidate).await?;
                return Ok(Admission::AdmittedAfterEviction {
                    evicted_voice_id: candidate.clone(),
                });
            }
        }

        Ok(Admission::Denied {
            reason: "voice cache full, retry later".to_string(),
        })
    }

    async fn evict(&self, track_id: &str, voice_id: &str) -> Result<()> {
        let dir = self.segments_root.join(track_id).join(format!("voice-{voice_id}"));
        info!(track_id, voice_id, "evicting voice from cache");
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await.map_err(|e| {
                StreamingError::StorageFailure(format!("failed to remove evicted voice dir: {e}"))
            })?;
        }
        self.access_tracker.clear(track_id, voice_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_fixture(default_voice: Option<&str>) -> streaming_common::db::Track {
        streaming_common::db::Track {
            id: "t1".into(),
            owner_id: 1,
            album_id: "a1".into(),
            source_blob_path: "src.mp3".into(),
            variant_type: "tts".into(),
            duration_seconds: 10.0,
            codec: None,
            bitrate: None,
            sample_rate: None,
            channels: None,
            content_version: 1,
            upload_status: "complete".into(),
            processing_voice: None,
            processing_locked_at: None,
            processing_type: None,
            status: "complete".into(),
            hls_ready: true,
            segmentation_status: "complete".into(),
            default_voice: default_voice.map(|s| s.to_string()),
            visibility_status: "visible".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn make_voice_dir(root: &std::path::Path, track_id: &str, voice_id: &str) {
        let dir = root.join(track_id).join(format!("voice-{voice_id}"));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("master.m3u8"), "#EXTM3U\n").await.unwrap();
    }

    #[tokio::test]
    async fn admits_when_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VoiceCache::new(dir.path(), Arc::new(NeverPopular));
        let db = streaming_common::db::init_database(&dir.path().join("t.db")).await.unwrap();
        let track = track_fixture(Some("v1"));

        make_voice_dir(dir.path(), "t1", "v1").await;
        let admission = cache.admit(&db, &track, "v2").await.unwrap();
        assert_eq!(admission, Admission::Admitted);
    }

    #[tokio::test]
    async fn evicts_inactive_non_default_voice_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VoiceCache::new(dir.path(), Arc::new(NeverPopular));
        let db = streaming_common::db::init_database(&dir.path().join("t.db")).await.unwrap();
        let track = track_fixture(Some("v1"));

        for v in ["v1", "v2", "v3"] {
            make_voice_dir(dir.path(), "t1", v).await;
        }

        let admission = cache.admit(&db, &track, "v4").await.unwrap();
        match admission {
            Admission::AdmittedAfterEviction { evicted_voice_id } => {
                assert_ne!(evicted_voice_id, "v1");
            }
            other => panic!("expected eviction, got {other:?}"),
        }
    }
}
