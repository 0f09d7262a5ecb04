//! Configuration loading and management
//!
//! Loads bootstrap configuration from a TOML file, with CLI-argument and
//! environment-variable overrides (spec §6's `TOKEN_SECRET` and friends).

use crate::error::{Result, StreamingError};
use serde::Deserialize;
use std::path::PathBuf;

fn default_port() -> u16 {
    8080
}

fn default_grant_ttl_secs() -> u64 {
    600
}

fn default_lock_timeout_minutes() -> i64 {
    90
}

fn default_hls_segment_seconds() -> u32 {
    8
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

/// Bootstrap configuration loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub database_path: PathBuf,

    #[serde(default = "default_port")]
    pub port: u16,

    pub segments_root: PathBuf,
    pub object_store_root: PathBuf,
    pub shared_tmp_root: PathBuf,

    #[serde(default = "default_grant_ttl_secs")]
    pub grant_ttl_secs: u64,

    #[serde(default = "default_lock_timeout_minutes")]
    pub lock_timeout_minutes: i64,

    #[serde(default = "default_hls_segment_seconds")]
    pub hls_segment_seconds: u32,

    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub port: u16,
    pub segments_root: PathBuf,
    pub object_store_root: PathBuf,
    pub shared_tmp_root: PathBuf,
    pub grant_ttl_secs: u64,
    pub lock_timeout_minutes: i64,
    pub hls_segment_seconds: u32,
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
    /// HMAC signing secret for grant tokens; required, loaded from `TOKEN_SECRET`.
    pub token_secret: String,
}

impl Config {
    /// Load configuration from a TOML file, applying command-line overrides
    /// and reading `TOKEN_SECRET` from the environment.
    pub async fn load(
        config_path: &PathBuf,
        database_override: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Result<Self> {
        let toml_str = tokio::fs::read_to_string(config_path)
            .await
            .map_err(|e| StreamingError::Config(format!("failed to read config file: {e}")))?;

        let toml_config: TomlConfig = toml::from_str(&toml_str)
            .map_err(|e| StreamingError::Config(format!("failed to parse TOML: {e}")))?;

        let token_secret = std::env::var("TOKEN_SECRET").map_err(|_| {
            StreamingError::Config("TOKEN_SECRET environment variable is required".to_string())
        })?;
        if token_secret.len() < 32 {
            tracing::warn!(
                "TOKEN_SECRET is shorter than the recommended 32 bytes ({} bytes)",
                token_secret.len()
            );
        }

        Ok(Config {
            database_path: database_override.unwrap_or(toml_config.database_path),
            port: port_override.unwrap_or(toml_config.port),
            segments_root: toml_config.segments_root,
            object_store_root: toml_config.object_store_root,
            shared_tmp_root: toml_config.shared_tmp_root,
            grant_ttl_secs: toml_config.grant_ttl_secs,
            lock_timeout_minutes: toml_config.lock_timeout_minutes,
            hls_segment_seconds: toml_config.hls_segment_seconds,
            ffprobe_path: toml_config.ffprobe_path,
            ffmpeg_path: toml_config.ffmpeg_path,
            token_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        assert_eq!(default_port(), 8080);
        assert_eq!(default_grant_ttl_secs(), 600);
        assert_eq!(default_lock_timeout_minutes(), 90);
    }
}
