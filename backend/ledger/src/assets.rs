//! Asset uploads: store bytes and hand back the URL to persist.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::errors::{LedgerError, Result};
use crate::locator::AssetLocator;
use crate::storage::{StorageBackend, Visibility};

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub struct AssetStore {
    storage: Arc<dyn StorageBackend>,
    locator: Arc<AssetLocator>,
    key_prefix: String,
    skip_bucket_check: bool,
    bucket_ready: OnceCell<()>,
}

impl AssetStore {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        locator: Arc<AssetLocator>,
        config: &StorageConfig,
    ) -> Self {
        Self {
            storage,
            locator,
            key_prefix: config.key_prefix.clone(),
            skip_bucket_check: config.skip_bucket_check,
            bucket_ready: OnceCell::new(),
        }
    }

    /// Store `data` under `<prefix>/<folder>/<uuid>.<ext>` in the default
    /// bucket and return its public URL.
    pub async fn upload(
        &self,
        folder: &str,
        data: Bytes,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<String> {
        if data.is_empty() {
            return Err(LedgerError::Validation("upload body is empty".to_string()));
        }
        if data.len() > MAX_UPLOAD_BYTES {
            return Err(LedgerError::Validation(format!(
                "upload exceeds {MAX_UPLOAD_BYTES} bytes"
            )));
        }

        let bucket = self.locator.default_bucket();
        self.ensure_bucket(bucket).await?;

        let key = object_key(&self.key_prefix, folder, content_type)?;
        self.storage
            .put(bucket, &key, data, content_type, visibility)
            .await?;

        let location = self.locator.location_for_upload(bucket, &key);
        let url = self.locator.url_for(&location).ok_or_else(|| {
            LedgerError::Storage(format!("no public URL for {bucket}/{key}"))
        })?;
        info!(bucket, key = %key, "Uploaded asset");
        Ok(url)
    }

    /// Provision the bucket once per process, unless configured not to.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.skip_bucket_check {
            return Ok(());
        }
        self.bucket_ready
            .get_or_try_init(|| async {
                self.storage.ensure_bucket(bucket).await?;
                info!(bucket, "Storage bucket ready");
                Ok::<(), LedgerError>(())
            })
            .await?;
        Ok(())
    }
}

/// Build an object key. `folder` may be nested (`donations/proofs`) but only
/// from lowercase letters, digits, `-`, `_` and `/`.
fn object_key(prefix: &str, folder: &str, content_type: &str) -> Result<String> {
    let folder = folder.trim_matches('/');
    let valid = !folder.is_empty()
        && folder.split('/').all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        });
    if !valid {
        return Err(LedgerError::Validation(format!("invalid folder name: {folder:?}")));
    }

    let name = format!("{}.{}", Uuid::new_v4(), extension_for(content_type));
    Ok(if prefix.is_empty() {
        format!("{folder}/{name}")
    } else {
        format!("{prefix}/{folder}/{name}")
    })
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
        .as_str()
    {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}
