//! services/api/src/adapters/blob_fs.rs
//!
//! A `BlobStorage` adapter that keeps objects on the local filesystem under a
//! single root directory. Locators are relative object names such as
//! `uploads/<uuid>.jpg`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use photo_coach_core::ports::{BlobObject, BlobStorage, PortError, PortResult};
use std::path::{Component, Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct FsBlobStorage {
    root: PathBuf,
}

impl FsBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a locator to a path under the root, refusing anything that would escape it.
    fn resolve(&self, locator: &str) -> PortResult<PathBuf> {
        let relative = Path::new(locator);
        let escapes = locator.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(PortError::InvalidInput(format!(
                "Invalid object name: {}",
                locator
            )));
        }
        Ok(self.root.join(relative))
    }
}

pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

pub fn content_type_for(locator: &str) -> &'static str {
    let extension = Path::new(locator)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl BlobStorage for FsBlobStorage {
    async fn ensure_ready(&self) -> PortResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PortError::Unexpected(format!("Blob root unavailable: {}", e)))
    }

    async fn upload(
        &self,
        data: Bytes,
        content_type: &str,
        path_prefix: &str,
    ) -> PortResult<String> {
        let prefix = path_prefix.trim_matches('/');
        let locator = format!(
            "{}/{}.{}",
            prefix,
            Uuid::new_v4(),
            extension_for(content_type)
        );
        let path = self.resolve(&locator)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        debug!("Stored {} bytes at {}", data.len(), locator);
        Ok(locator)
    }

    async fn open_for_read(&self, locator: &str) -> PortResult<BlobObject> {
        let path = self.resolve(locator)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                PortError::NotFound(format!("Object {} not found", locator))
            }
            _ => PortError::Unexpected(e.to_string()),
        })?;
        let size = file.metadata().await.ok().map(|m| m.len());
        let stream = ReaderStream::new(file).map_err(|e| PortError::Unexpected(e.to_string()));

        Ok(BlobObject {
            stream: Box::pin(stream),
            content_type: content_type_for(locator).to_string(),
            size,
        })
    }
}
