//! Shared application context
//!
//! The single `Arc`-shared handle threaded through every Axum handler and
//! background task: the DB pool, the object store, and the long-lived
//! managers for HLS preparation, voice caching, and grant-token auth.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::auth::GrantAuthorizer;
use crate::config::Config;
use crate::hls::PreparationManager;
use crate::lock::StatusLock;
use crate::object_store::ObjectStore;
use crate::stream_manager::StreamManager;
use crate::upload::UploadCoordinator;
use crate::voice_cache::{PopularityOracle, VoiceCache};

/// Shared state accessible by all components.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: SqlitePool,
    pub object_store: Arc<dyn ObjectStore>,
    pub prep_manager: Arc<PreparationManager>,
    pub voice_cache: Arc<VoiceCache>,
    pub authorizer: Arc<GrantAuthorizer>,
    pub upload_coordinator: Arc<UploadCoordinator>,
    pub stream_manager: Arc<StreamManager>,
    pub status_lock: Arc<StatusLock>,
}

impl AppContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        db: SqlitePool,
        object_store: Arc<dyn ObjectStore>,
        prep_manager: Arc<PreparationManager>,
        popularity: Arc<dyn PopularityOracle>,
        status_lock: Arc<StatusLock>,
        upload_coordinator: Arc<UploadCoordinator>,
    ) -> Self {
        let voice_cache = Arc::new(VoiceCache::new(config.segments_root.clone(), popularity));
        let authorizer = Arc::new(GrantAuthorizer::new(
            config.token_secret.clone(),
            config.grant_ttl_secs,
        ));
        let stream_manager = Arc::new(StreamManager::new(
            db.clone(),
            config.segments_root.clone(),
            status_lock.clone(),
            prep_manager.clone(),
            voice_cache.clone(),
        ));
        Self {
            config,
            db,
            object_store,
            prep_manager,
            voice_cache,
            authorizer,
            upload_coordinator,
            stream_manager,
            status_lock,
        }
    }
}
