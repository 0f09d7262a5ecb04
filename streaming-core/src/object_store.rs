//! Object-store adapter (C1)
//!
//! Uploads a local file into a content-addressed blob namespace, downloads
//! blobs to local temp files, and deletes by path. The concrete backend here
//! is a local filesystem tree standing in for the real remote object store,
//! which spec §1 treats as an external collaborator; the trait boundary is
//! what the rest of the crate depends on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use crate::error::{Result, StreamingError};

/// Per-object outcome of a best-effort bulk delete.
#[derive(Debug, Clone)]
pub struct DeletionReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl DeletionReport {
    fn new() -> Self {
        Self {
            deleted: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Common TTS voice ids used as a last resort when no voice metadata is
/// available at deletion time (spec §9 Open Questions — preserved as a
/// best-effort behavior, not a guarantee).
pub const FALLBACK_VOICE_IDS: &[&str] = &["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// Pluggable blob storage used by the upload coordinator (C3) and the HLS
/// preparation manager (C5).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `local_path` to `remote_key`, atomically at the visible path.
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<()>;

    /// Download `remote_key` to a local temp file, returning its path.
    async fn download_to_temp(&self, remote_key: &str) -> Result<PathBuf>;

    /// Delete a single object. Missing objects are not an error.
    async fn delete(&self, remote_key: &str) -> Result<()>;

    /// Check whether an object exists.
    async fn exists(&self, remote_key: &str) -> Result<bool>;

    /// Delete every `tts_{track_id}_{voice}.mp3` object for the given voice
    /// ids, tolerating per-object failures (spec §4.1).
    async fn delete_all_tts_voices(&self, track_id: &str, voice_ids: &[String]) -> DeletionReport {
        let mut report = DeletionReport::new();
        for voice_id in voice_ids {
            let key = format!("tts_{track_id}_{voice_id}.mp3");
            match self.delete(&key).await {
                Ok(()) => report.deleted.push(key),
                Err(e) => report.failed.push((key, e.to_string())),
            }
        }
        report
    }
}

/// Local-filesystem-backed object store. Uploads are made atomic by writing
/// to a sibling temp file and renaming into place (rename is atomic within
/// one filesystem).
pub struct FsObjectStore {
    root: PathBuf,
    tmp_root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, tmp_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tmp_root: tmp_root.into(),
        }
    }

    fn resolve(&self, remote_key: &str) -> PathBuf {
        self.root.join(remote_key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<()> {
        let dest = self.resolve(remote_key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_name = format!(".{}.upload-{}", uuid::Uuid::new_v4(), remote_key.replace('/', "_"));
        let tmp_path = dest
            .parent()
            .unwrap_or(&self.root)
            .join(tmp_name);

        fs::copy(local_path, &tmp_path).await?;
        fs::rename(&tmp_path, &dest).await.map_err(|e| {
            StreamingError::StorageFailure(format!("atomic rename into {remote_key} failed: {e}"))
        })?;
        Ok(())
    }

    async fn download_to_temp(&self, remote_key: &str) -> Result<PathBuf> {
        let src = self.resolve(remote_key);
        if !src.exists() {
            return Err(StreamingError::NotFound(format!("object {remote_key} not found")));
        }
        fs::create_dir_all(&self.tmp_root).await?;
        let dest = self
            .tmp_root
            .join(format!("dl-{}-{}", uuid::Uuid::new_v4(), remote_key.replace('/', "_")));
        fs::copy(&src, &dest).await?;
        Ok(dest)
    }

    async fn delete(&self, remote_key: &str) -> Result<()> {
        let path = self.resolve(remote_key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(remote_key, error = %e, "failed to delete object");
                Err(StreamingError::StorageFailure(format!("delete {remote_key} failed: {e}")))
            }
        }
    }

    async fn exists(&self, remote_key: &str) -> Result<bool> {
        Ok(self.resolve(remote_key).exists())
    }
}
