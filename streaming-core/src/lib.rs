//! # Streaming Core
//!
//! The HLS preparation pipeline and its coordination surface for a
//! multi-tenant audio-hosting service: chunked ingestion, per-track/voice
//! locking, the background preparation worker pool, the voice-variant
//! cache, and HMAC grant-token authorization.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod hls;
pub mod lock;
pub mod metadata;
pub mod object_store;
pub mod reconcile;
pub mod state;
pub mod stream_manager;
pub mod upload;
pub mod voice_cache;
pub mod word_timing;

pub use error::{Result, StreamingError};
pub use state::AppContext;
