//! Best-effort cleanup of stored objects that domain records stop referencing.
//!
//! Cleanup never blocks or rolls back the domain write it follows. Every
//! delete is bounded by a timeout, failures come back as
//! [`DeleteOutcome::Failed`] and are logged, and an already-absent object
//! counts as success.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::locator::AssetLocator;
use crate::storage::{DeleteOutcome, StorageBackend};
use crate::types::{Donation, DonationProject};

/// An entity that owns URL-valued asset references.
pub trait AssetOwner {
    /// Short label for logs, e.g. `donation 12`.
    fn label(&self) -> String;

    /// Every asset URL currently set on the entity, including those of
    /// owned children deleted along with it.
    fn asset_urls(&self) -> Vec<&str>;
}

impl AssetOwner for Donation {
    fn label(&self) -> String {
        format!("donation {}", self.id)
    }

    fn asset_urls(&self) -> Vec<&str> {
        self.proof_url.as_deref().into_iter().collect()
    }
}

impl AssetOwner for DonationProject {
    fn label(&self) -> String {
        format!("project {}", self.id)
    }

    fn asset_urls(&self) -> Vec<&str> {
        [self.qr_code_url.as_deref(), self.image_url.as_deref()]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// A campaign together with the donations removed by its deletion.
pub struct ProjectCascade<'a> {
    pub project: &'a DonationProject,
    pub donations: &'a [Donation],
}

impl AssetOwner for ProjectCascade<'_> {
    fn label(&self) -> String {
        format!(
            "project {} (+{} donations)",
            self.project.id,
            self.donations.len()
        )
    }

    fn asset_urls(&self) -> Vec<&str> {
        let mut urls = self.project.asset_urls();
        for donation in self.donations {
            urls.extend(donation.asset_urls());
        }
        urls
    }
}

/// What an entity cleanup did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    /// Already absent from storage.
    pub missing: usize,
    /// URLs that matched no known shape; nothing was attempted for them.
    pub unresolved: usize,
    /// `(url, reason)` of each failed delete.
    pub failures: Vec<(String, String)>,
}

/// Treat blank URLs as unset.
fn present(url: Option<&str>) -> Option<&str> {
    url.map(str::trim).filter(|u| !u.is_empty())
}

#[derive(Clone)]
pub struct AssetReconciler {
    storage: Arc<dyn StorageBackend>,
    locator: Arc<AssetLocator>,
    timeout: Duration,
}

impl AssetReconciler {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        locator: Arc<AssetLocator>,
        timeout: Duration,
    ) -> Self {
        Self {
            storage,
            locator,
            timeout,
        }
    }

    /// Delete the object behind `url`. Returns `None` when the URL could not
    /// be resolved to an address and nothing was attempted.
    pub async fn delete_url(&self, url: &str) -> Option<DeleteOutcome> {
        let location = self.locator.resolve(url);
        let (bucket, key) = location.address()?;

        let outcome = match tokio::time::timeout(self.timeout, self.storage.delete(bucket, key)).await
        {
            Ok(outcome) => outcome,
            Err(_) => DeleteOutcome::Failed(format!("timed out after {:?}", self.timeout)),
        };

        match &outcome {
            DeleteOutcome::Deleted => info!(bucket, key, "Deleted asset"),
            DeleteOutcome::NotFound => debug!(bucket, key, "Asset already absent"),
            DeleteOutcome::Failed(reason) => {
                warn!(bucket, key, reason = %reason, "Asset delete failed")
            }
        }
        Some(outcome)
    }

    /// Remove the object superseded by a field update. `new` is the field's
    /// value after the update; `None` or blank means it was cleared. Nothing
    /// happens when `old` is unset or unchanged.
    pub async fn on_replace(&self, old: Option<&str>, new: Option<&str>) -> Option<DeleteOutcome> {
        let old = present(old)?;
        if present(new) == Some(old) {
            return None;
        }
        self.delete_url(old).await
    }

    /// Remove every object owned by a deleted entity. Deletes run
    /// concurrently; failures are collected and logged, never raised.
    pub async fn on_entity_delete(&self, owner: &(dyn AssetOwner + Sync)) -> CleanupReport {
        let urls: Vec<&str> = owner
            .asset_urls()
            .into_iter()
            .filter_map(|u| present(Some(u)))
            .collect();
        let outcomes = join_all(urls.iter().map(|url| self.delete_url(url))).await;

        let mut report = CleanupReport::default();
        for (url, outcome) in urls.iter().zip(outcomes) {
            match outcome {
                Some(DeleteOutcome::Deleted) => report.deleted += 1,
                Some(DeleteOutcome::NotFound) => report.missing += 1,
                Some(DeleteOutcome::Failed(reason)) => {
                    report.failures.push((url.to_string(), reason));
                }
                None => report.unresolved += 1,
            }
        }

        if !report.failures.is_empty() {
            warn!(
                owner = %owner.label(),
                failed = report.failures.len(),
                "Asset cleanup incomplete; orphaned objects remain in storage"
            );
        }
        report
    }
}
