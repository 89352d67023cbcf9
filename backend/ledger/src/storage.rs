//! Object storage client contract and backends.
//!
//! The storage client is a stateless service object: it holds configuration
//! only and is shared across requests behind an `Arc<dyn StorageBackend>`.
//!
//! ## Backends
//!
//! * [`ObjectStoreBackend`] — S3-compatible providers through the
//!   `object_store` crate. A bucket-scoped client is built per call; missing
//!   buckets are created through `aws-sdk-s3`.
//! * [`MemoryBackend`] — thread-safe in-process map for tests and local runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{Attribute, Attributes, ClientOptions, ObjectStore, PutOptions, PutPayload};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::errors::{LedgerError, Result};

/// Access level requested for an uploaded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// Result of a delete call. Failures are a value, not an error, so every
/// caller decides explicitly what to do with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The object was already absent.
    NotFound,
    Failed(String),
}

impl DeleteOutcome {
    /// `Deleted` and `NotFound` both leave the object gone.
    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Deleted | Self::NotFound)
    }
}

/// A listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Make sure `bucket` exists, provisioning it if the backend can.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;

    /// Store `data` under `bucket`/`key`.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<()>;

    /// Remove `bucket`/`key`. Removing an absent object is `NotFound`.
    async fn delete(&self, bucket: &str, key: &str) -> DeleteOutcome;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Objects under `prefix`, in arbitrary order.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>>;
}

// ─────────────────────────────────────────────────────────
// S3-compatible backend
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    config: StorageConfig,
}

/// Kind of request, for picking its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Upload,
    /// Deletes, heads, listings and bucket checks.
    Housekeeping,
}

impl ObjectStoreBackend {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    fn timeout(&self, call: Call) -> Duration {
        match call {
            Call::Upload => self.config.upload_timeout,
            Call::Housekeeping => self.config.delete_timeout,
        }
    }

    fn client(
        &self,
        bucket: &str,
        visibility: Option<Visibility>,
        call: Call,
    ) -> Result<AmazonS3> {
        let mut options = ClientOptions::new().with_timeout(self.timeout(call));
        if let Some(visibility) = visibility {
            let acl = match visibility {
                Visibility::Public => "public-read",
                Visibility::Private => "private",
            };
            let mut headers = HeaderMap::new();
            headers.insert("x-amz-acl", HeaderValue::from_static(acl));
            options = options.with_default_headers(headers);
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&self.config.region)
            .with_client_options(options);

        match &self.config.endpoint {
            // Custom endpoints are addressed path-style.
            Some(endpoint) => {
                builder = builder
                    .with_endpoint(endpoint)
                    .with_virtual_hosted_style_request(false)
                    .with_allow_http(endpoint.starts_with("http://"));
            }
            // Virtual-hosted endpoints carry the bucket in the host.
            None => {
                builder = builder
                    .with_endpoint(format!("https://{bucket}.{}", self.config.provider_domain))
                    .with_virtual_hosted_style_request(true);
            }
        }
        if let Some(key_id) = &self.config.access_key_id {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = &self.config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }

        builder
            .build()
            .map_err(|e| LedgerError::Storage(format!("cannot build client for {bucket}: {e}")))
    }

    /// Control-plane client for bucket management, which object_store lacks.
    async fn bucket_admin(&self) -> aws_sdk_s3::Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.config.region.clone()))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(self.timeout(Call::Housekeeping))
                    .build(),
            )
            .endpoint_url(
                self.config
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| format!("https://{}", self.config.provider_domain)),
            );
        if let (Some(key_id), Some(secret)) =
            (&self.config.access_key_id, &self.config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "ledger",
            ));
        }
        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(self.config.endpoint.is_some())
            .build();
        aws_sdk_s3::Client::from_conf(s3_config)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let client = self.bucket_admin().await;
        let mut request = client.create_bucket().bucket(bucket);
        if let Some(constraint) = location_constraint(&self.config.region) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!(bucket, region = %self.config.region, "Created storage bucket");
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you()) =>
            {
                Ok(())
            }
            Err(err) => Err(LedgerError::Storage(format!(
                "cannot create bucket {bucket}: {}",
                DisplayErrorContext(&err)
            ))),
        }
    }
}

/// `us-east-1` is the implicit default and must not be sent as a constraint.
fn location_constraint(region: &str) -> Option<BucketLocationConstraint> {
    match region.trim() {
        "" | "us-east-1" => None,
        region => Some(BucketLocationConstraint::from(region)),
    }
}

/// The object_store path for a raw key, taken verbatim when it is a valid
/// path. Every operation goes through here so put and delete agree.
fn object_path(key: &str) -> Path {
    Path::parse(key).unwrap_or_else(|_| Path::from(key))
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let store = self.client(bucket, None, Call::Housekeeping)?;
        match store.list_with_delimiter(None).await {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!(bucket, error = %e, "Bucket not listable, creating it");
                self.create_bucket(bucket).await
            }
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<()> {
        let store = self.client(bucket, Some(visibility), Call::Upload)?;
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };
        store
            .put_opts(&object_path(key), PutPayload::from(data), options)
            .await
            .map_err(|e| LedgerError::Storage(format!("put {bucket}/{key} failed: {e}")))?;
        debug!(bucket, key, "Object stored");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> DeleteOutcome {
        let store = match self.client(bucket, None, Call::Housekeeping) {
            Ok(store) => store,
            Err(e) => return DeleteOutcome::Failed(e.to_string()),
        };
        let path = object_path(key);

        // S3 answers 204 for absent keys, so existence is checked first.
        match store.head(&path).await {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => return DeleteOutcome::NotFound,
            Err(e) => return DeleteOutcome::Failed(format!("head failed: {e}")),
        }

        match store.delete(&path).await {
            Ok(()) => DeleteOutcome::Deleted,
            Err(object_store::Error::NotFound { .. }) => DeleteOutcome::NotFound,
            Err(e) => DeleteOutcome::Failed(e.to_string()),
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let store = self.client(bucket, None, Call::Housekeeping)?;
        match store.head(&object_path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(LedgerError::Storage(format!("head {bucket}/{key} failed: {e}"))),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let store = self.client(bucket, None, Call::Housekeeping)?;
        let prefix = Path::from(prefix);
        let metas: Vec<object_store::ObjectMeta> = store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(|e| LedgerError::Storage(format!("list {bucket} failed: {e}")))?;
        Ok(metas
            .into_iter()
            .map(|m| ObjectEntry {
                key: m.location.to_string(),
                size: m.size as u64,
                last_modified: Some(m.last_modified),
            })
            .collect())
    }
}

// ─────────────────────────────────────────────────────────
// In-memory backend
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    visibility: Visibility,
    last_modified: DateTime<Utc>,
}

/// In-memory storage backend. Buckets are created on demand by
/// [`StorageBackend::ensure_bucket`]; writes to a missing bucket fail.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    buckets: Arc<RwLock<HashMap<String, BTreeMap<String, StoredObject>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> LedgerError {
        LedgerError::Storage("lock poisoned".to_string())
    }

    /// Content type and visibility of a stored object.
    #[cfg(test)]
    pub fn describe(&self, bucket: &str, key: &str) -> Option<(String, Visibility)> {
        let buckets = self.buckets.read().ok()?;
        buckets
            .get(bucket)?
            .get(key)
            .map(|o| (o.content_type.clone(), o.visibility))
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        self.buckets
            .write()
            .map_err(|_| Self::poisoned())?
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<()> {
        let mut buckets = self.buckets.write().map_err(|_| Self::poisoned())?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| LedgerError::Storage(format!("bucket {bucket} does not exist")))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                visibility,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> DeleteOutcome {
        let Ok(mut buckets) = self.buckets.write() else {
            return DeleteOutcome::Failed("lock poisoned".to_string());
        };
        match buckets.get_mut(bucket).and_then(|objects| objects.remove(key)) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let buckets = self.buckets.read().map_err(|_| Self::poisoned())?;
        Ok(buckets.get(bucket).is_some_and(|o| o.contains_key(key)))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let buckets = self.buckets.read().map_err(|_| Self::poisoned())?;
        Ok(buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|(k, _)| k.starts_with(prefix))
                    .map(|(k, o)| ObjectEntry {
                        key: k.clone(),
                        size: o.data.len() as u64,
                        last_modified: Some(o.last_modified),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
