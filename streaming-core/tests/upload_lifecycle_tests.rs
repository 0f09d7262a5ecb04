//! Integration tests for the chunked-upload coordinator (C3) against a real
//! sqlite database and temp filesystem.

use std::sync::Arc;

use streaming_core::hls::PreparationManager;
use streaming_core::lock::StatusLock;
use streaming_core::metadata::MetadataExtractor;
use streaming_core::object_store::FsObjectStore;
use streaming_core::upload::{SqlxSessionStore, UploadCoordinator};
use streaming_common::db::VisibilityStatus;

struct Harness {
    _dir: tempfile::TempDir,
    coordinator: UploadCoordinator,
    db: sqlx::SqlitePool,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = streaming_common::db::init_database(&dir.path().join("t.db")).await.unwrap();

    sqlx::query("INSERT INTO albums (id, owner_id) VALUES ('album1', 1)")
        .execute(&db)
        .await
        .unwrap();

    let object_store = Arc::new(FsObjectStore::new(
        dir.path().join("blobs"),
        dir.path().join("tmp"),
    ));
    let status_lock = Arc::new(StatusLock::new(db.clone(), dir.path().join("segments"), 90));
    let extractor = Arc::new(MetadataExtractor::new("ffprobe"));
    let prep_manager = Arc::new(PreparationManager::new(
        1,
        dir.path().join("segments"),
        "ffmpeg",
        6,
        db.clone(),
        object_store.clone(),
        status_lock.clone(),
        extractor,
    ));
    let sessions = Arc::new(SqlxSessionStore::new(db.clone()));
    let coordinator = UploadCoordinator::new(
        sessions,
        db.clone(),
        object_store,
        status_lock,
        prep_manager,
        dir.path().join("chunks"),
    );

    Harness { _dir: dir, coordinator, db }
}

#[tokio::test]
async fn happy_path_upload_materializes_and_locks_track() {
    let h = harness().await;

    let track_id = h
        .coordinator
        .init_upload("up1", "album1", "song.mp3", 7, false, VisibilityStatus::Visible)
        .await
        .unwrap();

    for i in 0..3u32 {
        let done = h
            .coordinator
            .upload_chunk("up1", i, 3, "album1", format!("chunk-{i}").as_bytes())
            .await
            .unwrap();
        assert_eq!(done, i == 2);
    }

    let (status, processing_voice): (String, Option<String>) =
        sqlx::query_as("SELECT status, processing_voice FROM tracks WHERE id = ?")
            .bind(&track_id)
            .fetch_one(&h.db)
            .await
            .unwrap();
    assert_eq!(status, "generating");
    assert!(processing_voice.is_none(), "full-track lock leaves no voice set");

    h.coordinator.finalize_upload("up1", &track_id).await.unwrap();

    let (upload_status, blob_path): (String, String) =
        sqlx::query_as("SELECT upload_status, source_blob_path FROM tracks WHERE id = ?")
            .bind(&track_id)
            .fetch_one(&h.db)
            .await
            .unwrap();
    assert_eq!(upload_status, "complete");
    assert_eq!(blob_path, format!("tracks/{track_id}/source"));
}

#[tokio::test]
async fn out_of_order_chunks_still_complete() {
    let h = harness().await;
    let track_id = h
        .coordinator
        .init_upload("up2", "album1", "song.mp3", 7, false, VisibilityStatus::Visible)
        .await
        .unwrap();

    for i in [2u32, 0, 1] {
        h.coordinator
            .upload_chunk("up2", i, 3, "album1", format!("chunk-{i}").as_bytes())
            .await
            .unwrap();
    }

    let (status,): (String,) = sqlx::query_as("SELECT status FROM tracks WHERE id = ?")
        .bind(&track_id)
        .fetch_one(&h.db)
        .await
        .unwrap();
    assert_eq!(status, "generating", "track should be materialized regardless of chunk arrival order");
}

#[tokio::test]
async fn cancel_before_finalize_runs_comprehensive_cleanup() {
    let h = harness().await;
    let track_id = h
        .coordinator
        .init_upload("up3", "album1", "song.mp3", 7, false, VisibilityStatus::Visible)
        .await
        .unwrap();
    h.coordinator.upload_chunk("up3", 0, 1, "album1", b"chunk-0").await.unwrap();

    h.coordinator.cancel_upload("up3").await.unwrap();

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracks WHERE id = ?")
        .bind(&track_id)
        .fetch_one(&h.db)
        .await
        .unwrap();
    assert_eq!(remaining, 0, "cancellation should delete the materialized track row");
}

#[tokio::test]
async fn team_member_cannot_select_hidden_from_all() {
    let h = harness().await;
    let err = h
        .coordinator
        .init_upload("up4", "album1", "song.mp3", 7, true, VisibilityStatus::HiddenFromAll)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("hidden_from_all"));
}

#[tokio::test]
async fn upload_chunk_rejects_unknown_session() {
    let h = harness().await;
    let err = h.coordinator.upload_chunk("missing", 0, 1, "album1", b"x").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}
