//! Integration test for spec §8 scenario 4: a tier-restriction change on an
//! album must bump `content_version` on every track in it and invalidate
//! any grant tokens already cached for those tracks (invariant 3).

use streaming_core::auth::GrantAuthorizer;
use streaming_core::db::albums;
use streaming_core::error::TokenInvalidReason;

#[tokio::test]
async fn tier_change_bumps_version_and_invalidates_cached_grants() {
    let dir = tempfile::tempdir().unwrap();
    let db = streaming_common::db::init_database(&dir.path().join("t.db")).await.unwrap();

    sqlx::query("INSERT INTO albums (id, owner_id) VALUES ('a1', 1)").execute(&db).await.unwrap();
    sqlx::query(
        "INSERT INTO tracks (id, owner_id, album_id, source_blob_path, variant_type, status) \
         VALUES ('t1', 1, 'a1', 'src', 'audio', 'complete')",
    )
    .execute(&db)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO tracks (id, owner_id, album_id, source_blob_path, variant_type, status) \
         VALUES ('t2', 1, 'a1', 'src', 'audio', 'complete')",
    )
    .execute(&db)
    .await
    .unwrap();

    let authorizer = GrantAuthorizer::new("a-very-long-test-secret-key-value", 600);
    let token_t1 = authorizer.issue("sess1", "t1", None, 1, 42).await;
    let token_t2 = authorizer.issue("sess1", "t2", None, 1, 42).await;

    // Token validates against the content_version it was minted under.
    authorizer.validate(&token_t1, "t1", None, 1).unwrap();

    let updated = albums::update_tier_restrictions(&db, &authorizer, "a1", true, 500, "supporter")
        .await
        .unwrap();
    assert_eq!(updated.len(), 2);
    assert!(updated.contains(&"t1".to_string()));
    assert!(updated.contains(&"t2".to_string()));

    let (v1, v2): (i64, i64) = {
        let v1: i64 = sqlx::query_scalar("SELECT content_version FROM tracks WHERE id = 't1'")
            .fetch_one(&db)
            .await
            .unwrap();
        let v2: i64 = sqlx::query_scalar("SELECT content_version FROM tracks WHERE id = 't2'")
            .fetch_one(&db)
            .await
            .unwrap();
        (v1, v2)
    };
    assert_eq!(v1, 2, "content_version should bump from 1 to 2");
    assert_eq!(v2, 2);

    // The old tokens are stale both by content_version mismatch and by the
    // explicit cache purge.
    let err = authorizer.validate(&token_t1, "t1", None, v1).unwrap_err();
    assert_eq!(err, TokenInvalidReason::ContentUpdated);
    let err = authorizer.validate(&token_t2, "t2", None, v2).unwrap_err();
    assert_eq!(err, TokenInvalidReason::ContentUpdated);

    let (is_restricted, min_cents, min_name): (bool, i64, String) = sqlx::query_as(
        "SELECT is_restricted, minimum_tier_amount_cents, minimum_tier_name FROM albums WHERE id = 'a1'",
    )
    .fetch_one(&db)
    .await
    .unwrap();
    assert!(is_restricted);
    assert_eq!(min_cents, 500);
    assert_eq!(min_name, "supporter");
}

#[tokio::test]
async fn tier_change_does_not_affect_other_albums_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let db = streaming_common::db::init_database(&dir.path().join("t.db")).await.unwrap();

    sqlx::query("INSERT INTO albums (id, owner_id) VALUES ('a1', 1)").execute(&db).await.unwrap();
    sqlx::query("INSERT INTO albums (id, owner_id) VALUES ('a2', 1)").execute(&db).await.unwrap();
    sqlx::query(
        "INSERT INTO tracks (id, owner_id, album_id, source_blob_path, variant_type, status) \
         VALUES ('other', 1, 'a2', 'src', 'audio', 'complete')",
    )
    .execute(&db)
    .await
    .unwrap();

    let authorizer = GrantAuthorizer::new("a-very-long-test-secret-key-value", 600);
    albums::update_tier_restrictions(&db, &authorizer, "a1", true, 500, "supporter").await.unwrap();

    let version: i64 = sqlx::query_scalar("SELECT content_version FROM tracks WHERE id = 'other'")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(version, 1, "tracks in a different album must not be touched");
}
