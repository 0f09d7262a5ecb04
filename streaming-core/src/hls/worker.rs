//! The preparation pipeline run by each worker permit (spec §4.5 steps 1-6).

use std::path::PathBuf;

use chrono::Utc;
use tokio::process::Command;
use tracing::{error, info, warn};

use super::playlist::{self, SegmentIndex};
use super::task::{PrepareTaskInfo, TaskStatus};
use super::PreparationManager;
use crate::error::StreamingError;
use crate::lock::ReleaseOutcome;
use crate::word_timing;

async fn set_status(manager: &PreparationManager, stream_id: &str, f: impl FnOnce(&mut super::TaskStatusEntry)) {
    let mut tasks = manager.tasks.write().await;
    if let Some(entry) = tasks.get_mut(stream_id) {
        f(entry);
    }
}

/// Run one preparation task to completion, releasing the lock and marking
/// the task terminal on every path (including failure).
pub async fn run(manager: &std::sync::Arc<PreparationManager>, task_info: PrepareTaskInfo, source_key: String) {
    let stream_id = task_info.stream_id();
    info!(stream_id, "preparation worker starting");

    set_status(manager, &stream_id, |e| e.status = TaskStatus::Processing).await;

    match run_inner(manager, &task_info, &source_key, &stream_id).await {
        Ok(()) => {
            set_status(manager, &stream_id, |e| e.status = TaskStatus::Complete).await;
        }
        Err(e) => {
            error!(stream_id, error = %e, "preparation failed");
            set_status(manager, &stream_id, |e2| {
                e2.status = TaskStatus::Error;
                e2.error_message = Some(e.to_string());
            })
            .await;

            // The caller always hands the worker an already-held lock
            // (spec §4.5: "lock_already_held=true tells the worker to
            // release the lock itself on finish rather than relying on a
            // caller"); the worker releases it here on every terminal path.
            if task_info.lock_already_held {
                match &task_info.voice {
                    Some(voice) => {
                        let _ = manager
                            .status_lock
                            .unlock_voice(&task_info.track_id, voice, ReleaseOutcome::Failed)
                            .await;
                    }
                    None => {
                        let _ = manager
                            .status_lock
                            .unlock_track(&task_info.track_id, ReleaseOutcome::Failed)
                            .await;
                    }
                }
            } else if let Some(voice) = &task_info.voice {
                let _ = manager.status_lock.fail_voice(&task_info.track_id, voice, &e.to_string()).await;
            }
        }
    }
}

async fn run_inner(
    manager: &PreparationManager,
    task_info: &PrepareTaskInfo,
    source_key: &str,
    stream_id: &str,
) -> crate::error::Result<()> {
    // Step 1: ensure source file locally.
    let local_source = manager.object_store.download_to_temp(source_key).await?;

    // Step 2: probe duration.
    let metadata = manager.extractor.probe(&local_source).await?;
    set_status(manager, stream_id, |e| e.total_duration = metadata.duration_seconds).await;

    let base_dir: PathBuf = match &task_info.voice {
        Some(voice) => manager.segments_root.join(&task_info.track_id).join(format!("voice-{voice}")),
        None => manager.segments_root.join(&task_info.track_id),
    };
    let variant_dir = base_dir.join("default");
    tokio::fs::create_dir_all(&variant_dir).await?;

    // Step 3: master.m3u8.
    tokio::fs::write(base_dir.join("master.m3u8"), playlist::master_playlist()).await?;

    set_status(manager, stream_id, |e| e.status = TaskStatus::CreatingSegments).await;

    // Step 4: segment with ffmpeg, hls_time = configured nominal length.
    let durations = run_ffmpeg_segmenter(
        &manager.ffmpeg_path,
        &local_source,
        &variant_dir,
        manager.hls_segment_seconds,
    )
    .await?;

    let playlist_text = playlist::variant_playlist(&durations, manager.hls_segment_seconds);
    tokio::fs::write(variant_dir.join("playlist.m3u8"), playlist_text).await?;

    let index = SegmentIndex::from_measured_durations(durations.clone());
    playlist::write_index(&base_dir.join("index.json"), &index).await?;

    set_status(manager, stream_id, |e| {
        e.segment_durations = durations.clone();
        e.current_duration = index.total_duration;
    })
    .await;

    // Step 5: word-timing mapping for TTS variants.
    if let Some(voice) = &task_info.voice {
        let boundaries = index.boundaries();
        let mapping = word_timing::map_and_persist(&manager.db, &task_info.track_id, voice, &boundaries).await?;
        word_timing::consolidate_timings(&manager.db, &task_info.track_id, voice, &base_dir).await?;
        set_status(manager, stream_id, |e| e.words_mapped = mapping.mapped as u64).await;
        if !mapping.supports_precision_switching() {
            warn!(
                stream_id,
                coverage = mapping.mapping_coverage(),
                "word-timing coverage below precision-switching threshold"
            );
        }
    }

    // Step 6: update Track columns and release the lock.
    sqlx::query(
        "UPDATE tracks SET duration_seconds = ?, updated_at = ? WHERE id = ?",
    )
    .bind(index.total_duration)
    .bind(Utc::now())
    .bind(&task_info.track_id)
    .execute(&manager.db)
    .await?;

    // Clean up the downloaded source regardless of outcome.
    let _ = tokio::fs::remove_file(&local_source).await;

    if task_info.lock_already_held {
        let outcome = match &task_info.voice {
            Some(voice) => manager.status_lock.unlock_voice(&task_info.track_id, voice, ReleaseOutcome::Complete).await?,
            None => manager.status_lock.unlock_track(&task_info.track_id, ReleaseOutcome::Complete).await?,
        };
        if outcome == ReleaseOutcome::Failed {
            return Err(StreamingError::TranscodeFailure(
                "HLS validation failed after segmentation".to_string(),
            ));
        }
    }

    Ok(())
}

/// Invoke ffmpeg with `hls_time`/`hls_playlist_type=vod`, then read back the
/// measured per-segment durations from its own segment files via ffprobe-free
/// accounting: ffmpeg's own `-hls_time` does not guarantee exact boundaries,
/// so callers treat the resulting `index.json` as authoritative, not the
/// requested segment length.
async fn run_ffmpeg_segmenter(
    ffmpeg_path: &str,
    source: &std::path::Path,
    out_dir: &std::path::Path,
    hls_time: u32,
) -> crate::error::Result<Vec<f64>> {
    let playlist_path = out_dir.join("playlist.m3u8.tmp");
    let segment_pattern = out_dir.join("segment_%05d.ts");

    let status = Command::new(ffmpeg_path)
        .args(["-y", "-i"])
        .arg(source)
        .args([
            "-c:a",
            "aac",
            "-f",
            "hls",
            "-hls_time",
            &hls_time.to_string(),
            "-hls_playlist_type",
            "vod",
            "-hls_segment_filename",
        ])
        .arg(&segment_pattern)
        .arg(&playlist_path)
        .status()
        .await
        .map_err(|e| StreamingError::TranscodeFailure(format!("ffmpeg spawn failed: {e}")))?;

    if !status.success() {
        return Err(StreamingError::TranscodeFailure(format!("ffmpeg exited with {status}")));
    }
    let _ = tokio::fs::remove_file(&playlist_path).await;

    measure_segment_durations(out_dir).await
}

/// Measure each emitted segment's duration via ffprobe (ffmpeg's own HLS
/// muxer does not report them back to the caller).
async fn measure_segment_durations(out_dir: &std::path::Path) -> crate::error::Result<Vec<f64>> {
    let mut entries = tokio::fs::read_dir(out_dir).await?;
    let mut segment_paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("segment_") && name.ends_with(".ts") {
            segment_paths.push(entry.path());
        }
    }
    segment_paths.sort();

    let mut durations = Vec::with_capacity(segment_paths.len());
    for path in segment_paths {
        let output = Command::new("ffprobe")
            .args(["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0"])
            .arg(&path)
            .output()
            .await
            .map_err(|e| StreamingError::TranscodeFailure(format!("ffprobe spawn failed: {e}")))?;
        let text = String::from_utf8_lossy(&output.stdout);
        let duration: f64 = text.trim().parse().unwrap_or(0.0);
        durations.push(duration);
    }
    Ok(durations)
}
