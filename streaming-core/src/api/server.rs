//! HTTP server setup and routing
//!
//! Routes cover the chunked-upload coordinator (C3), the streaming facade
//! (C9), and grant-token issuance (C8). `AppContext` (see `crate::state`)
//! is shared across handlers via Axum's state extractor.

use std::net::SocketAddr;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::Result;
use crate::state::AppContext;

pub async fn run(ctx: AppContext) -> Result<()> {
    let port = ctx.config.port;

    let app = Router::new()
        .route("/health", get(super::handlers::health_check))
        .route(
            "/albums/:album_id/tracks/init-upload",
            post(super::handlers::init_upload),
        )
        .route(
            "/albums/:album_id/tracks/upload-chunk",
            post(super::handlers::upload_chunk),
        )
        .route(
            "/albums/:album_id/tracks/finalize-upload",
            post(super::handlers::finalize_upload),
        )
        .route(
            "/albums/:album_id/tracks/cancel-upload",
            post(super::handlers::cancel_upload),
        )
        .route(
            "/tracks/:track_id/master.m3u8",
            get(super::handlers::get_master_playlist),
        )
        .route(
            "/tracks/:track_id/default/:filename",
            get(super::handlers::get_default_file),
        )
        .route(
            "/tracks/:track_id/voices/:voice_id/master.m3u8",
            get(super::handlers::get_voice_master_playlist),
        )
        .route(
            "/tracks/:track_id/voices/:voice_id/default/:filename",
            get(super::handlers::get_voice_file),
        )
        .route("/tracks/:track_id/progress", get(super::handlers::get_progress))
        .route("/auth/grant", post(super::handlers::issue_grant))
        .route(
            "/albums/:album_id/tier-restrictions",
            patch(super::handlers::update_tier_restrictions),
        )
        .with_state(ctx)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
