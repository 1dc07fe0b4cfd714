use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MediaConfig;
use crate::error::{CoreError, Result};

pub const ALLOWED_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg"];

/// Path under which stored files are served.
pub const PUBLIC_PATH: &str = "/uploads/images";

/// An uploaded file as received from a multipart field.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Persists the upload and returns its public URL.
    async fn store(&self, upload: Upload) -> Result<String>;
    /// Deletes a previously stored file. Unknown URLs are ignored.
    async fn remove(&self, url: &str) -> Result<()>;
}

/// Keeps uploads on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    dir: PathBuf,
    public_base_url: String,
    max_bytes: usize,
}

impl LocalMediaStore {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            dir: config.upload_dir.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            max_bytes: config.max_upload_bytes,
        }
    }

    fn file_name_for(upload: &Upload) -> String {
        let clean: String = upload
            .file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let clean = if clean.trim_matches('.').is_empty() {
            "image".to_string()
        } else {
            clean
        };
        format!(
            "{}-{}-{}",
            Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ"),
            Uuid::new_v4().simple(),
            clean
        )
    }

    fn file_for_url(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(&self.public_base_url)?;
        let name = rest.strip_prefix(PUBLIC_PATH)?.strip_prefix('/')?;
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return None;
        }
        Some(self.dir.join(name))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn store(&self, upload: Upload) -> Result<String> {
        if !ALLOWED_MIME_TYPES.contains(&upload.content_type.as_str()) {
            return Err(CoreError::validation("Invalid type"));
        }
        if upload.data.is_empty() {
            return Err(CoreError::validation("Empty file"));
        }
        if upload.data.len() > self.max_bytes {
            return Err(CoreError::validation(format!(
                "File too large, limit is {} bytes",
                self.max_bytes
            )));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let name = Self::file_name_for(&upload);
        tokio::fs::write(self.dir.join(&name), &upload.data).await?;
        debug!(file = %name, bytes = upload.data.len(), "Stored upload");
        Ok(format!("{}{}/{}", self.public_base_url, PUBLIC_PATH, name))
    }

    async fn remove(&self, url: &str) -> Result<()> {
        let Some(path) = self.file_for_url(url) else {
            warn!(url, "Ignoring removal of foreign media URL");
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
