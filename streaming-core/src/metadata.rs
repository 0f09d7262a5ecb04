//! Duration/metadata extractor (C2)
//!
//! Probes audio files out-of-process via `ffprobe`, parsing its JSON output.
//! A per-path mutex prevents two concurrent probes of the same file from
//! racing (ffprobe itself is stateless, but a process pool has no reason to
//! spawn duplicates of the exact same work).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::{Result, StreamingError};

/// Probed audio properties (spec §4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMetadata {
    pub duration_seconds: f64,
    pub codec: Option<String>,
    pub format_name: Option<String>,
    pub bitrate: Option<i64>,
    pub sample_rate: Option<i64>,
    pub channels: Option<i64>,
    pub file_size: u64,
    pub extracted_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<i64>,
}

/// Extracts duration and format metadata from audio files, using ffprobe
/// (or an equivalent probe binary) invoked out-of-process.
pub struct MetadataExtractor {
    ffprobe_path: String,
    in_flight: Mutex<HashMap<std::path::PathBuf, Arc<Mutex<()>>>>,
}

impl MetadataExtractor {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    async fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut guard = self.in_flight.lock().await;
        guard
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Probe a local file for duration/codec/bitrate/sample-rate/channels.
    pub async fn probe(&self, path: &Path) -> Result<AudioMetadata> {
        let lock = self.path_lock(path).await;
        let _held = lock.lock().await;

        let file_size = tokio::fs::metadata(path).await?.len();

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| StreamingError::TranscodeFailure(format!("ffprobe spawn failed: {e}")))?;

        if !output.status.success() {
            return Err(StreamingError::TranscodeFailure(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout).map_err(|e| {
            StreamingError::TranscodeFailure(format!("failed to parse ffprobe output: {e}"))
        })?;

        let duration_seconds = parsed
            .format
            .duration
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        let bitrate = parsed.format.bit_rate.as_deref().and_then(|s| s.parse::<i64>().ok());

        let audio_stream = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"));

        Ok(AudioMetadata {
            duration_seconds,
            codec: audio_stream.and_then(|s| s.codec_name.clone()),
            format_name: parsed.format.format_name,
            bitrate,
            sample_rate: audio_stream.and_then(|s| s.sample_rate.as_deref()).and_then(|s| s.parse().ok()),
            channels: audio_stream.and_then(|s| s.channels),
            file_size,
            extracted_at: chrono::Utc::now(),
        })
    }

    /// Voice-aware duration: for TTS tracks, `SUM(actual_duration)` over that
    /// voice's ready segments; falls back to `Track.duration_seconds`
    /// otherwise (spec §4.2).
    pub async fn voice_aware_duration(
        &self,
        db: &SqlitePool,
        track: &streaming_common::db::Track,
        voice_id: Option<&str>,
    ) -> Result<f64> {
        if track.variant_type() != streaming_common::db::VariantType::Tts {
            return Ok(track.duration_seconds);
        }
        let Some(voice_id) = voice_id else {
            return Ok(track.duration_seconds);
        };

        let total: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(actual_duration) FROM tts_voice_segments \
             WHERE track_id = ? AND voice_id = ? AND ready = 1",
        )
        .bind(&track.id)
        .bind(voice_id)
        .fetch_one(db)
        .await?;

        Ok(total.unwrap_or(track.duration_seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_json() {
        let raw = r#"{
            "streams": [{"codec_type":"audio","codec_name":"mp3","sample_rate":"44100","channels":2}],
            "format": {"duration":"123.456","bit_rate":"128000","format_name":"mp3"}
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.format.duration.as_deref(), Some("123.456"));
        assert_eq!(parsed.streams[0].codec_name.as_deref(), Some("mp3"));
    }
}
