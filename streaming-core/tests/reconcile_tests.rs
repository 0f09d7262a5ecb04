//! Integration tests for startup reconciliation (C10): crash recovery for
//! tracks/sessions left mid-flight by a prior process.

use std::sync::Arc;

use streaming_core::lock::StatusLock;
use streaming_core::metadata::MetadataExtractor;
use streaming_core::object_store::FsObjectStore;
use streaming_core::hls::PreparationManager;
use streaming_core::reconcile::run_startup_reconcile;
use streaming_core::upload::{SqlxSessionStore, UploadCoordinator};

#[tokio::test]
async fn stuck_track_without_valid_hls_is_marked_failed_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let db = streaming_common::db::init_database(&dir.path().join("t.db")).await.unwrap();
    sqlx::query("INSERT INTO albums (id, owner_id) VALUES ('a1', 1)").execute(&db).await.unwrap();
    sqlx::query(
        "INSERT INTO tracks (id, owner_id, album_id, source_blob_path, variant_type, status, \
         processing_locked_at) VALUES ('t1', 1, 'a1', 'src', 'audio', 'generating', ?)",
    )
    .bind(chrono::Utc::now())
    .execute(&db)
    .await
    .unwrap();

    let object_store = Arc::new(FsObjectStore::new(dir.path().join("blobs"), dir.path().join("tmp")));
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
    let upload_coordinator = Arc::new(UploadCoordinator::new(
        sessions,
        db.clone(),
        object_store,
        status_lock.clone(),
        prep_manager,
        dir.path().join("chunks"),
    ));

    let handles = run_startup_reconcile(status_lock, upload_coordinator, db.clone()).await.unwrap();

    let (status, hls_ready): (String, bool) =
        sqlx::query_as("SELECT status, hls_ready FROM tracks WHERE id = 't1'")
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(status, "failed", "track with no on-disk HLS tree cannot be reconciled to complete");
    assert!(!hls_ready);

    handles.stale_lock_reaper.abort();
    handles.upload_reaper.abort();
}

#[tokio::test]
async fn abandoned_upload_session_is_cleaned_up_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let db = streaming_common::db::init_database(&dir.path().join("t.db")).await.unwrap();
    sqlx::query("INSERT INTO albums (id, owner_id) VALUES ('a1', 1)").execute(&db).await.unwrap();
    sqlx::query(
        "INSERT INTO tracks (id, owner_id, album_id, source_blob_path, variant_type, status) \
         VALUES ('t2', 1, 'a1', 'src', 'audio', 'generating')",
    )
    .execute(&db)
    .await
    .unwrap();
    let ancient = chrono::Utc::now() - chrono::Duration::hours(2);
    sqlx::query(
        "INSERT INTO upload_sessions (upload_id, chunks_dir, total_chunks, filename, creator_id, \
         album_id, track_id, status, last_updated) \
         VALUES ('up1', '/tmp/chunks/up1', 1, 'f.mp3', 1, 'a1', 't2', 'chunks_complete', ?)",
    )
    .bind(ancient)
    .execute(&db)
    .await
    .unwrap();

    let object_store = Arc::new(FsObjectStore::new(dir.path().join("blobs"), dir.path().join("tmp")));
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
    let upload_coordinator = Arc::new(UploadCoordinator::new(
        sessions,
        db.clone(),
        object_store,
        status_lock.clone(),
        prep_manager,
        dir.path().join("chunks"),
    ));

    let handles = run_startup_reconcile(status_lock, upload_coordinator, db.clone()).await.unwrap();

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracks WHERE id = 't2'")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(remaining, 0, "track materialized by an abandoned session should be torn down");

    handles.stale_lock_reaper.abort();
    handles.upload_reaper.abort();
}
