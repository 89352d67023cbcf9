//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Emit JSON logs instead of human-readable ones
    pub json_logs: bool,
    pub storage: StorageConfig,
}

/// Which storage client to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// S3-compatible remote object storage.
    S3,
    /// In-process map, for local runs without a storage provider.
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Bucket used for uploads and for URLs that carry no bucket name
    pub default_bucket: String,
    pub region: String,
    /// Primary provider host suffix, e.g. `nyc3.digitaloceanspaces.com`
    pub provider_domain: String,
    /// Secondary S3-compatible domain, e.g. `amazonaws.com`
    pub secondary_domain: String,
    /// Custom endpoint; URLs written under it are path-style
    pub endpoint: Option<String>,
    /// CDN or public base URL override; URLs under it carry no bucket
    pub public_base_url: Option<String>,
    /// Prefix prepended to every uploaded key
    pub key_prefix: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Upper bound on a single delete, head, list or bucket call
    pub delete_timeout: Duration,
    /// Upper bound on a single upload
    pub upload_timeout: Duration,
    /// Skip first-use bucket provisioning (bucket is pre-provisioned)
    pub skip_bucket_check: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./ledger.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| LedgerError::Config("Invalid API_PORT".to_string()))?,
            json_logs: env_var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            storage: StorageConfig::from_env()?,
        })
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        let kind = match env_var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "s3".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "s3" => StorageKind::S3,
            "memory" => StorageKind::Memory,
            other => {
                return Err(LedgerError::Config(format!(
                    "Invalid STORAGE_BACKEND: {other}"
                )))
            }
        };

        let region = env_var("STORAGE_REGION").unwrap_or_else(|_| "us-east-1".to_string());

        Ok(StorageConfig {
            kind,
            default_bucket: env_var("STORAGE_BUCKET").map_err(|_| {
                LedgerError::Config("STORAGE_BUCKET environment variable is required".to_string())
            })?,
            provider_domain: env_var("STORAGE_PROVIDER_DOMAIN")
                .unwrap_or_else(|_| format!("{region}.digitaloceanspaces.com")),
            secondary_domain: env_var("STORAGE_SECONDARY_DOMAIN")
                .unwrap_or_else(|_| "amazonaws.com".to_string()),
            endpoint: optional_url("STORAGE_ENDPOINT"),
            public_base_url: optional_url("STORAGE_PUBLIC_BASE_URL"),
            key_prefix: env_var("STORAGE_KEY_PREFIX")
                .map(|p| p.trim_matches('/').to_string())
                .unwrap_or_default(),
            access_key_id: env_var("STORAGE_ACCESS_KEY_ID").ok(),
            secret_access_key: env_var("STORAGE_SECRET_ACCESS_KEY").ok(),
            delete_timeout: Duration::from_secs(
                env_var("STORAGE_DELETE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .map_err(|_| {
                        LedgerError::Config("Invalid STORAGE_DELETE_TIMEOUT_SECS".to_string())
                    })?,
            ),
            upload_timeout: Duration::from_secs(
                env_var("STORAGE_UPLOAD_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()
                    .map_err(|_| {
                        LedgerError::Config("Invalid STORAGE_UPLOAD_TIMEOUT_SECS".to_string())
                    })?,
            ),
            region,
            skip_bucket_check: env_var("STORAGE_SKIP_BUCKET_CHECK")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .map_err(|_| LedgerError::Config("Invalid STORAGE_SKIP_BUCKET_CHECK".to_string()))?,
        })
    }

    /// A configuration with only a default bucket and provider domain set.
    #[cfg(test)]
    pub fn for_tests(default_bucket: &str) -> Self {
        StorageConfig {
            kind: StorageKind::Memory,
            default_bucket: default_bucket.to_string(),
            region: "region1".to_string(),
            provider_domain: "region1.provider-a.com".to_string(),
            secondary_domain: "provider-b.com".to_string(),
            endpoint: None,
            public_base_url: None,
            key_prefix: String::new(),
            access_key_id: None,
            secret_access_key: None,
            delete_timeout: Duration::from_secs(2),
            upload_timeout: Duration::from_secs(30),
            skip_bucket_check: false,
        }
    }
}

/// Read an optional URL-valued variable, dropping trailing slashes and
/// treating an empty value as unset.
fn optional_url(key: &str) -> Option<String> {
    env_var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| LedgerError::Config(format!("Missing env var: {key}")))
}
