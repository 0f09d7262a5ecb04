//! Word-timing mapper (C7)
//!
//! Aligns a flat list of TTS word timings to the final measured HLS segment
//! boundaries. A word is assigned to the segment containing its midpoint;
//! a word starting beyond the last segment is clamped to it with a logged
//! warning. Also consolidates per-generation timing shards into a single
//! zstd-compressed blob once mapping is complete.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::Result;

/// One unmapped word timing, as produced by the TTS worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WordTiming {
    pub word_index: i64,
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Final measured segment boundary, as emitted by the HLS preparation
/// manager (C5) after segmentation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentBoundary {
    pub index: i64,
    pub start: f64,
    pub end: f64,
}

/// A word timing tagged with its resolved segment.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedWordTiming {
    pub word_index: i64,
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub segment_index: i64,
    pub segment_offset: f64,
}

/// Quality report exposed to callers of the mapping (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappingResult {
    pub mapped: usize,
    pub total: usize,
}

impl MappingResult {
    pub fn mapping_coverage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.mapped as f64 / self.total as f64) * 100.0
    }

    pub fn supports_precision_switching(&self) -> bool {
        self.mapping_coverage() > 80.0
    }
}

/// Map each word timing to the segment containing its midpoint, clamping
/// words beyond the last segment's end.
pub fn map_words(words: &[WordTiming], segments: &[SegmentBoundary]) -> (Vec<MappedWordTiming>, MappingResult) {
    let mut mapped_words = Vec::with_capacity(words.len());
    let mut mapped_count = 0usize;

    let Some(last_segment) = segments.iter().max_by(|a, b| a.index.cmp(&b.index)) else {
        return (
            mapped_words,
            MappingResult {
                mapped: 0,
                total: words.len(),
            },
        );
    };

    for w in words {
        let midpoint = (w.start + w.end) / 2.0;

        let found = segments
            .iter()
            .find(|s| midpoint >= s.start && midpoint < s.end)
            .copied();

        let segment = match found {
            Some(s) => s,
            None if w.start >= last_segment.end => {
                warn!(
                    word = %w.word,
                    word_start = w.start,
                    last_segment_end = last_segment.end,
                    "word timing beyond last segment, clamping"
                );
                *last_segment
            }
            None => {
                // Falls in a gap between segments (shouldn't normally
                // happen with contiguous segmentation) — clamp to the
                // nearest segment by start time.
                segments
                    .iter()
                    .min_by(|a, b| {
                        (a.start - midpoint).abs().partial_cmp(&(b.start - midpoint).abs()).unwrap()
                    })
                    .copied()
                    .unwrap_or(*last_segment)
            }
        };

        mapped_count += 1;
        mapped_words.push(MappedWordTiming {
            word_index: w.word_index,
            word: w.word.clone(),
            start: w.start,
            end: w.end,
            segment_index: segment.index,
            segment_offset: w.start - segment.start,
        });
    }

    (
        mapped_words,
        MappingResult {
            mapped: mapped_count,
            total: words.len(),
        },
    )
}

/// Run the mapping against the DB-persisted timings for one (track, voice)
/// and write the results back into `tts_word_timings`.
pub async fn map_and_persist(
    db: &SqlitePool,
    track_id: &str,
    voice_id: &str,
    segments: &[SegmentBoundary],
) -> Result<MappingResult> {
    let rows: Vec<(i64, String, f64, f64)> = sqlx::query_as(
        "SELECT word_index, word, start, end FROM tts_word_timings WHERE track_id = ? AND voice_id = ?",
    )
    .bind(track_id)
    .bind(voice_id)
    .fetch_all(db)
    .await?;

    let words: Vec<WordTiming> = rows
        .into_iter()
        .map(|(word_index, word, start, end)| WordTiming { word_index, word, start, end })
        .collect();

    let (mapped, result) = map_words(&words, segments);

    let mut tx = db.begin().await?;
    for m in &mapped {
        sqlx::query(
            "UPDATE tts_word_timings SET mapped_segment_index = ?, mapped_segment_offset = ? \
             WHERE track_id = ? AND voice_id = ? AND word_index = ?",
        )
        .bind(m.segment_index)
        .bind(m.segment_offset)
        .bind(track_id)
        .bind(voice_id)
        .bind(m.word_index)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(result)
}

/// Timing entry as stored in the consolidated blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConsolidatedTiming {
    word_index: i64,
    word: String,
    segment_index: i64,
    segment_offset: f64,
}

/// Consolidate the mapped timings for (track, voice) into a single
/// zstd-compressed JSON blob written to `timings.zst` under the voice's
/// segment directory (spec §4.7, §6 on-disk layout).
pub async fn consolidate_timings(
    db: &SqlitePool,
    track_id: &str,
    voice_id: &str,
    voice_dir: &std::path::Path,
) -> Result<()> {
    let rows: Vec<(i64, String, Option<i64>, Option<f64>)> = sqlx::query_as(
        "SELECT word_index, word, mapped_segment_index, mapped_segment_offset \
         FROM tts_word_timings WHERE track_id = ? AND voice_id = ? ORDER BY word_index",
    )
    .bind(track_id)
    .bind(voice_id)
    .fetch_all(db)
    .await?;

    let entries: Vec<ConsolidatedTiming> = rows
        .into_iter()
        .filter_map(|(word_index, word, segment_index, segment_offset)| {
            Some(ConsolidatedTiming {
                word_index,
                word,
                segment_index: segment_index?,
                segment_offset: segment_offset?,
            })
        })
        .collect();

    let json = serde_json::to_vec(&entries)?;
    let compressed = zstd::encode_all(std::io::Cursor::new(json), 0)
        .map_err(|e| crate::error::StreamingError::Other(anyhow::anyhow!("zstd encode failed: {e}")))?;

    tokio::fs::create_dir_all(voice_dir).await?;
    tokio::fs::write(voice_dir.join("timings.zst"), compressed).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments() -> Vec<SegmentBoundary> {
        vec![
            SegmentBoundary { index: 0, start: 0.0, end: 8.0 },
            SegmentBoundary { index: 1, start: 8.0, end: 16.0 },
            SegmentBoundary { index: 2, start: 16.0, end: 24.0 },
        ]
    }

    #[test]
    fn maps_words_within_a_single_segment() {
        let words = vec![WordTiming { word_index: 0, word: "hello".into(), start: 1.0, end: 1.5 }];
        let (mapped, result) = map_words(&words, &segments());
        assert_eq!(mapped[0].segment_index, 0);
        assert!((mapped[0].segment_offset - 1.0).abs() < 1e-9);
        assert_eq!(result.mapping_coverage(), 100.0);
        assert!(result.supports_precision_switching());
    }

    #[test]
    fn word_spanning_boundary_goes_to_midpoint_segment() {
        // Midpoint 8.5 falls in segment 1 even though the word starts in segment 0.
        let words = vec![WordTiming { word_index: 0, word: "cross".into(), start: 7.5, end: 9.5 }];
        let (mapped, _) = map_words(&words, &segments());
        assert_eq!(mapped[0].segment_index, 1);
    }

    #[test]
    fn word_beyond_last_segment_is_clamped() {
        let words = vec![WordTiming { word_index: 0, word: "late".into(), start: 30.0, end: 31.0 }];
        let (mapped, _) = map_words(&words, &segments());
        assert_eq!(mapped[0].segment_index, 2);
    }

    #[test]
    fn coverage_threshold_matches_precision_switching() {
        let high = MappingResult { mapped: 9, total: 10 };
        assert!(high.supports_precision_switching());
        let low = MappingResult { mapped: 8, total: 10 };
        assert!(!low.supports_precision_switching());
    }
}
