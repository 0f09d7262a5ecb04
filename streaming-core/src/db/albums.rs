//! Album row queries.

use chrono::Utc;
use sqlx::SqlitePool;
use streaming_common::db::Album;

use crate::auth::GrantAuthorizer;
use crate::error::{Result, StreamingError};

pub async fn find(db: &SqlitePool, album_id: &str) -> Result<Album> {
    sqlx::query_as::<_, Album>("SELECT * FROM albums WHERE id = ?")
        .bind(album_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| StreamingError::NotFound(format!("album {album_id} not found")))
}

/// Update tier restrictions, bumping `tier_updated_at`. Bare DB write; does
/// not invalidate anything. Callers that need invariant 3 enforced should
/// use `update_tier_restrictions` instead.
async fn set_tier_restrictions(
    db: &SqlitePool,
    album_id: &str,
    is_restricted: bool,
    minimum_tier_amount_cents: i64,
    minimum_tier_name: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE albums SET is_restricted = ?, minimum_tier_amount_cents = ?, minimum_tier_name = ?, \
         tier_updated_at = ? WHERE id = ?",
    )
    .bind(is_restricted)
    .bind(minimum_tier_amount_cents)
    .bind(minimum_tier_name)
    .bind(Utc::now())
    .bind(album_id)
    .execute(db)
    .await?;
    Ok(())
}

/// Apply a tier-restriction change and enforce invariant 3 (spec §4.8
/// "Invalidation"): every track in the album gets `content_version += 1`
/// and any cached grants for those tracks are dropped, so tokens minted
/// under the old tier can no longer validate. Returns the affected track
/// ids.
pub async fn update_tier_restrictions(
    db: &SqlitePool,
    authorizer: &GrantAuthorizer,
    album_id: &str,
    is_restricted: bool,
    minimum_tier_amount_cents: i64,
    minimum_tier_name: &str,
) -> Result<Vec<String>> {
    set_tier_restrictions(db, album_id, is_restricted, minimum_tier_amount_cents, minimum_tier_name).await?;

    let track_ids = super::tracks::bump_content_version_for_album(db, album_id).await?;
    for track_id in &track_ids {
        authorizer.invalidate_track(track_id).await;
    }
    Ok(track_ids)
}
