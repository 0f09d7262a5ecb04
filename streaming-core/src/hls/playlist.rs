//! HLS playlist/index generation and parsing.
//!
//! Writers used by the preparation worker; the parser is shared with the
//! stream manager's `get_segment_progress` fallback (spec §4.9).

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::word_timing::SegmentBoundary;

/// `index.json` sidecar written alongside the segments (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentIndex {
    pub durations: Vec<f64>,
    pub starts: Vec<f64>,
    pub total_duration: f64,
    pub measured: bool,
}

impl SegmentIndex {
    pub fn from_measured_durations(durations: Vec<f64>) -> Self {
        let mut starts = Vec::with_capacity(durations.len());
        let mut cursor = 0.0;
        for d in &durations {
            starts.push(cursor);
            cursor += d;
        }
        Self {
            total_duration: cursor,
            durations,
            starts,
            measured: true,
        }
    }

    pub fn boundaries(&self) -> Vec<SegmentBoundary> {
        self.durations
            .iter()
            .enumerate()
            .map(|(i, d)| SegmentBoundary {
                index: i as i64,
                start: self.starts[i],
                end: self.starts[i] + d,
            })
            .collect()
    }
}

/// Write `master.m3u8` referencing a single variant playlist directory.
pub fn master_playlist() -> String {
    "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-STREAM-INF:BANDWIDTH=128000\ndefault/playlist.m3u8\n".to_string()
}

/// Write a complete (VOD) variant playlist: one `#EXTINF` per segment plus
/// a trailing `#EXT-X-ENDLIST`.
pub fn variant_playlist(durations: &[f64], target_duration: u32) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:3\n");
    out.push_str(&format!("#EXT-X-TARGETDURATION:{target_duration}\n"));
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    for (i, d) in durations.iter().enumerate() {
        out.push_str(&format!("#EXTINF:{d:.6},\n"));
        out.push_str(&format!("segment_{i:05}.ts\n"));
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

/// Parsed state of an in-progress or complete variant playlist (spec §4.9
/// `get_segment_progress` fallback).
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistProgress {
    Complete { total_duration: f64 },
    InProgress { percent: f64 },
    NotFound,
}

/// Parse a variant playlist's text for progress reporting without needing
/// the in-memory task-status map (used when the process restarted and the
/// in-memory state is gone, but the on-disk playlist survived).
pub fn parse_progress(contents: &str, expected_total_duration: f64) -> PlaylistProgress {
    let sum: f64 = contents
        .lines()
        .filter_map(|l| l.strip_prefix("#EXTINF:"))
        .filter_map(|rest| rest.trim_end_matches(',').parse::<f64>().ok())
        .sum();

    if contents.contains("#EXT-X-ENDLIST") {
        PlaylistProgress::Complete { total_duration: sum }
    } else if expected_total_duration > 0.0 {
        let percent = (sum / expected_total_duration * 100.0).min(99.0);
        PlaylistProgress::InProgress { percent }
    } else {
        PlaylistProgress::NotFound
    }
}

pub async fn read_index(path: &std::path::Path) -> Result<Option<SegmentIndex>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn write_index(path: &std::path::Path, index: &SegmentIndex) -> Result<()> {
    let json = serde_json::to_vec_pretty(index)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_playlist_ends_with_endlist_and_matching_extinf_count() {
        let durations = vec![8.0, 8.0, 4.5];
        let playlist = variant_playlist(&durations, 8);
        assert!(playlist.trim_end().ends_with("#EXT-X-ENDLIST"));
        assert_eq!(playlist.matches("#EXTINF").count(), 3);
    }

    #[test]
    fn segment_index_computes_cumulative_starts() {
        let index = SegmentIndex::from_measured_durations(vec![8.0, 8.0, 4.0]);
        assert_eq!(index.starts, vec![0.0, 8.0, 16.0]);
        assert_eq!(index.total_duration, 20.0);
    }

    #[test]
    fn parse_progress_reports_complete() {
        let playlist = variant_playlist(&[8.0, 8.0], 8);
        match parse_progress(&playlist, 16.0) {
            PlaylistProgress::Complete { total_duration } => assert_eq!(total_duration, 16.0),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn parse_progress_caps_in_progress_at_99_percent() {
        let partial = "#EXTM3U\n#EXTINF:8.0,\nsegment_00000.ts\n";
        match parse_progress(partial, 8.0) {
            PlaylistProgress::InProgress { percent } => assert!(percent <= 99.0),
            other => panic!("expected InProgress, got {other:?}"),
        }
    }
}
