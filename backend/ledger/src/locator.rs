//! Resolve stored-object URLs back to `(bucket, key)` addresses.
//!
//! Persisted URLs were written under whatever storage configuration was
//! active at the time, so one deployment holds several URL shapes. Each
//! shape has its own [`UrlMatcher`]; [`AssetLocator::resolve`] tries them in
//! a fixed order and falls back to [`AssetLocation::Unresolved`]:
//!
//! | Order | Shape                  | Example                                           |
//! |-------|------------------------|---------------------------------------------------|
//! | 1     | `VirtualHostPrimary`   | `https://<bucket>.<provider-domain>/<key>`        |
//! | 2     | `VirtualHostSecondary` | `https://<bucket>.s3.<region>.<domain>/<key>`     |
//! | 3     | `PathStyle`            | `<endpoint>/<bucket>/<key>`                       |
//! | 4     | `PublicBaseRelative`   | `<public-base>/<key>` (bucket from configuration) |
//!
//! Resolution never fails: malformed input is simply unresolved.
//!
//! Keys in an [`AssetLocation`] are the raw storage keys: percent-escapes
//! from the URL are decoded on the way in and re-applied by
//! [`AssetLocator::url_for`], so backends never see URL encoding.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tracing::debug;
use url::Url;

use crate::config::StorageConfig;

/// Where an asset URL points, tagged with the shape it was recognised as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    VirtualHostPrimary {
        bucket: String,
        key: String,
    },
    VirtualHostSecondary {
        bucket: String,
        region: String,
        key: String,
    },
    PathStyle {
        bucket: String,
        key: String,
    },
    PublicBaseRelative {
        bucket: String,
        key: String,
    },
    /// No shape matched; carries the configured default bucket.
    Unresolved {
        bucket: String,
    },
}

impl AssetLocation {
    pub fn bucket(&self) -> &str {
        match self {
            Self::VirtualHostPrimary { bucket, .. }
            | Self::VirtualHostSecondary { bucket, .. }
            | Self::PathStyle { bucket, .. }
            | Self::PublicBaseRelative { bucket, .. }
            | Self::Unresolved { bucket } => bucket,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::VirtualHostPrimary { key, .. }
            | Self::VirtualHostSecondary { key, .. }
            | Self::PathStyle { key, .. }
            | Self::PublicBaseRelative { key, .. } => Some(key),
            Self::Unresolved { .. } => None,
        }
    }

    /// `(bucket, key)` when the URL was resolvable.
    pub fn address(&self) -> Option<(&str, &str)> {
        self.key().map(|key| (self.bucket(), key))
    }
}

/// One URL shape.
pub trait UrlMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Recognise `raw` or return `None`. Must not panic on any input.
    fn try_match(&self, raw: &str) -> Option<AssetLocation>;
}

/// Drop any query string or fragment.
fn strip_query(raw: &str) -> &str {
    raw.split(['?', '#']).next().unwrap_or(raw)
}

/// Bytes escaped when a key is written into a URL path. `/` stays literal.
const KEY_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Storage key for a URL path segment. `None` when empty or not UTF-8.
fn decode_key(raw: &str) -> Option<String> {
    let key = percent_decode_str(raw).decode_utf8().ok()?;
    (!key.is_empty()).then(|| key.into_owned())
}

fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ESCAPES).to_string()
}

/// Host and non-empty key of an absolute http(s) URL.
fn host_and_key(raw: &str) -> Option<(String, String)> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let key = decode_key(url.path().trim_start_matches('/'))?;
    Some((host, key))
}

/// `https://<bucket>.<provider-domain>/<key>`
pub struct VirtualHostPrimary {
    domain: String,
}

impl VirtualHostPrimary {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_ascii_lowercase(),
        }
    }
}

impl UrlMatcher for VirtualHostPrimary {
    fn name(&self) -> &'static str {
        "virtual_host_primary"
    }

    fn try_match(&self, raw: &str) -> Option<AssetLocation> {
        let (host, key) = host_and_key(raw)?;
        let bucket = host.strip_suffix(&self.domain)?.strip_suffix('.')?;
        // A single DNS label; anything longer belongs to another shape.
        if bucket.is_empty() || bucket.contains('.') {
            return None;
        }
        Some(AssetLocation::VirtualHostPrimary {
            bucket: bucket.to_string(),
            key,
        })
    }
}

/// `https://<bucket>.s3.<region>.<domain>/<key>`
pub struct VirtualHostSecondary {
    domain: String,
}

impl VirtualHostSecondary {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_ascii_lowercase(),
        }
    }
}

impl UrlMatcher for VirtualHostSecondary {
    fn name(&self) -> &'static str {
        "virtual_host_secondary"
    }

    fn try_match(&self, raw: &str) -> Option<AssetLocation> {
        let (host, key) = host_and_key(raw)?;
        let rest = host.strip_suffix(&self.domain)?.strip_suffix('.')?;
        let (bucket, region) = rest.rsplit_once(".s3.")?;
        if bucket.is_empty() || region.is_empty() || region.contains('.') {
            return None;
        }
        Some(AssetLocation::VirtualHostSecondary {
            bucket: bucket.to_string(),
            region: region.to_string(),
            key,
        })
    }
}

/// `<endpoint>/<bucket>/<key>`, split at the first `/` after the endpoint.
pub struct PathStyle {
    endpoint: String,
}

impl PathStyle {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

impl UrlMatcher for PathStyle {
    fn name(&self) -> &'static str {
        "path_style"
    }

    fn try_match(&self, raw: &str) -> Option<AssetLocation> {
        let rest = strip_query(raw.trim())
            .strip_prefix(&self.endpoint)?
            .strip_prefix('/')?;
        let (bucket, key) = rest.split_once('/')?;
        if bucket.is_empty() {
            return None;
        }
        Some(AssetLocation::PathStyle {
            bucket: bucket.to_string(),
            key: decode_key(key)?,
        })
    }
}

/// `<public-base>/<key>`; the bucket is not part of the URL.
pub struct PublicBaseRelative {
    base: String,
    bucket: String,
}

impl PublicBaseRelative {
    pub fn new(base: &str, bucket: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
        }
    }
}

impl UrlMatcher for PublicBaseRelative {
    fn name(&self) -> &'static str {
        "public_base_relative"
    }

    fn try_match(&self, raw: &str) -> Option<AssetLocation> {
        let key = strip_query(raw.trim())
            .strip_prefix(&self.base)?
            .strip_prefix('/')?;
        Some(AssetLocation::PublicBaseRelative {
            bucket: self.bucket.clone(),
            key: decode_key(key)?,
        })
    }
}

pub struct AssetLocator {
    default_bucket: String,
    provider_domain: String,
    secondary_domain: String,
    endpoint: Option<String>,
    public_base_url: Option<String>,
    matchers: Vec<Box<dyn UrlMatcher>>,
}

impl AssetLocator {
    pub fn new(config: &StorageConfig) -> Self {
        let mut matchers: Vec<Box<dyn UrlMatcher>> = vec![
            Box::new(VirtualHostPrimary::new(&config.provider_domain)),
            Box::new(VirtualHostSecondary::new(&config.secondary_domain)),
        ];
        if let Some(endpoint) = &config.endpoint {
            matchers.push(Box::new(PathStyle::new(endpoint)));
        }
        if let Some(base) = &config.public_base_url {
            matchers.push(Box::new(PublicBaseRelative::new(
                base,
                &config.default_bucket,
            )));
        }

        Self {
            default_bucket: config.default_bucket.clone(),
            provider_domain: config.provider_domain.to_ascii_lowercase(),
            secondary_domain: config.secondary_domain.to_ascii_lowercase(),
            endpoint: config
                .endpoint
                .as_deref()
                .map(|e| e.trim_end_matches('/').to_string()),
            public_base_url: config
                .public_base_url
                .as_deref()
                .map(|b| b.trim_end_matches('/').to_string()),
            matchers,
        }
    }

    pub fn default_bucket(&self) -> &str {
        &self.default_bucket
    }

    /// Resolve `url` against each known shape in order.
    pub fn resolve(&self, url: &str) -> AssetLocation {
        for matcher in &self.matchers {
            if let Some(location) = matcher.try_match(url) {
                debug!(url, shape = matcher.name(), "Resolved asset URL");
                return location;
            }
        }
        debug!(url, "Asset URL did not match any known shape");
        AssetLocation::Unresolved {
            bucket: self.default_bucket.clone(),
        }
    }

    /// Rebuild the URL for `location` under the current configuration.
    pub fn url_for(&self, location: &AssetLocation) -> Option<String> {
        match location {
            AssetLocation::VirtualHostPrimary { bucket, key } => Some(format!(
                "https://{bucket}.{}/{}",
                self.provider_domain,
                encode_key(key)
            )),
            AssetLocation::VirtualHostSecondary {
                bucket,
                region,
                key,
            } => Some(format!(
                "https://{bucket}.s3.{region}.{}/{}",
                self.secondary_domain,
                encode_key(key)
            )),
            AssetLocation::PathStyle { bucket, key } => self
                .endpoint
                .as_ref()
                .map(|endpoint| format!("{endpoint}/{bucket}/{}", encode_key(key))),
            AssetLocation::PublicBaseRelative { key, .. } => self
                .public_base_url
                .as_ref()
                .map(|base| format!("{base}/{}", encode_key(key))),
            AssetLocation::Unresolved { .. } => None,
        }
    }

    /// The URL a freshly uploaded object is published under: the public base
    /// when it serves `bucket`, else the custom endpoint, else the primary
    /// provider host.
    pub fn location_for_upload(&self, bucket: &str, key: &str) -> AssetLocation {
        let (bucket, key) = (bucket.to_string(), key.to_string());
        if self.public_base_url.is_some() && bucket == self.default_bucket {
            AssetLocation::PublicBaseRelative { bucket, key }
        } else if self.endpoint.is_some() {
            AssetLocation::PathStyle { bucket, key }
        } else {
            AssetLocation::VirtualHostPrimary { bucket, key }
        }
    }
}
