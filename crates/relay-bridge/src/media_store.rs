//! Persistence of inbound attachments into the served download directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use relay_core::{sanitize_file_name, write_bytes_atomic};

use crate::client::{AttachmentRef, ClientError, MessagingClient};

#[derive(Debug, Error)]
pub enum MediaStoreError {
    #[error("download failed: {0}")]
    Download(#[from] ClientError),
    #[error("failed to store '{path}': {reason}")]
    Write { path: PathBuf, reason: String },
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Fetches the attachment and returns the stored file's path. The file name
    /// component is always safe to expose under `/files/{name}`.
    async fn save(
        &self,
        client: &dyn MessagingClient,
        attachment: &AttachmentRef,
    ) -> Result<PathBuf, MediaStoreError>;
}

#[derive(Debug, Clone)]
pub struct DownloadDirMediaStore {
    dir: PathBuf,
}

impl DownloadDirMediaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Prefixing with the remote file id keeps same-named attachments apart.
    pub fn stored_file_name(attachment: &AttachmentRef) -> String {
        let name = attachment.file_name.as_deref().unwrap_or("attachment");
        sanitize_file_name(&format!("{}_{}", attachment.file_id, name))
    }
}

#[async_trait]
impl MediaStore for DownloadDirMediaStore {
    async fn save(
        &self,
        client: &dyn MessagingClient,
        attachment: &AttachmentRef,
    ) -> Result<PathBuf, MediaStoreError> {
        let bytes = client.download_media(attachment).await?;
        let path = self.dir.join(Self::stored_file_name(attachment));
        let size = bytes.len();
        // The bridge context is single-threaded; file I/O goes to the blocking pool.
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_bytes_atomic(&target, &bytes))
            .await
            .map_err(|error| MediaStoreError::Write {
                path: path.clone(),
                reason: format!("write task aborted: {error}"),
            })?
            .map_err(|error| MediaStoreError::Write {
                path: path.clone(),
                reason: format!("{error:#}"),
            })?;
        debug!(path = %path.display(), bytes = size, "stored inbound media");
        Ok(path)
    }
}
