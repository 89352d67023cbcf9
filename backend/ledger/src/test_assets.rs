//! Asset lifecycle through the domain services: superseded and orphaned
//! objects are removed, and storage trouble never fails the domain write.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rust_decimal::Decimal;

use crate::assets::AssetStore;
use crate::config::StorageConfig;
use crate::db;
use crate::errors::Result;
use crate::ledger::DonationLedger;
use crate::locator::AssetLocator;
use crate::projects::{ProjectService, ProjectUpdate};
use crate::reconciler::AssetReconciler;
use crate::storage::{DeleteOutcome, MemoryBackend, ObjectEntry, StorageBackend, Visibility};
use crate::types::{DonationType, NewDonation, NewProject};

const IMAGE_A: &str = "https://media.region1.provider-a.com/projects/a.png";
const IMAGE_B: &str = "https://media.region1.provider-a.com/projects/b.png";
const QR: &str = "https://media.region1.provider-a.com/qr/q.png";
const PROOF_1: &str = "https://media.s3.region1.provider-b.com/proofs/1.jpg";
const PROOF_2: &str = "https://media.s3.region1.provider-b.com/proofs/2.jpg";

/// How the wrapped backend answers delete calls.
#[derive(Clone, Copy)]
enum DeleteMode {
    Normal,
    Fail,
    Hang,
}

/// Memory backend that records every delete attempt and bucket check.
struct RecordingBackend {
    inner: MemoryBackend,
    mode: DeleteMode,
    deletes: Mutex<Vec<(String, String)>>,
    bucket_checks: AtomicUsize,
}

impl RecordingBackend {
    fn new(mode: DeleteMode) -> Self {
        Self {
            inner: MemoryBackend::new(),
            mode,
            deletes: Mutex::new(Vec::new()),
            bucket_checks: AtomicUsize::new(0),
        }
    }

    fn attempts_on(&self, bucket: &str, key: &str) -> usize {
        self.deletes
            .lock()
            .unwrap()
            .iter()
            .filter(|(b, k)| b == bucket && k == key)
            .count()
    }

    fn attempts(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }

    fn bucket_checks(&self) -> usize {
        self.bucket_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        self.bucket_checks.fetch_add(1, Ordering::SeqCst);
        self.inner.ensure_bucket(bucket).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<()> {
        self.inner
            .put(bucket, key, data, content_type, visibility)
            .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> DeleteOutcome {
        self.deletes
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));
        match self.mode {
            DeleteMode::Normal => self.inner.delete(bucket, key).await,
            DeleteMode::Fail => DeleteOutcome::Failed("503 Service Unavailable".to_string()),
            DeleteMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                DeleteOutcome::Deleted
            }
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        self.inner.exists(bucket, key).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectEntry>> {
        self.inner.list(bucket, prefix).await
    }
}

struct Harness {
    backend: Arc<RecordingBackend>,
    locator: Arc<AssetLocator>,
    ledger: DonationLedger,
    projects: ProjectService,
    assets: AssetStore,
}

async fn harness(mode: DeleteMode) -> Harness {
    let mut config = StorageConfig::for_tests("media");
    config.delete_timeout = Duration::from_millis(100);

    let backend = Arc::new(RecordingBackend::new(mode));
    backend.ensure_bucket("media").await.unwrap();
    for key in [
        "projects/a.png",
        "projects/b.png",
        "qr/q.png",
        "proofs/1.jpg",
        "proofs/2.jpg",
    ] {
        backend
            .put("media", key, Bytes::from("x"), "image/png", Visibility::Public)
            .await
            .unwrap();
    }

    let pool = db::test_pool().await;
    let storage: Arc<dyn StorageBackend> = backend.clone();
    let locator = Arc::new(AssetLocator::new(&config));
    let reconciler = AssetReconciler::new(storage.clone(), locator.clone(), config.delete_timeout);

    Harness {
        ledger: DonationLedger::new(pool.clone(), reconciler.clone()),
        projects: ProjectService::new(pool, reconciler),
        assets: AssetStore::new(storage, locator.clone(), &config),
        locator,
        backend,
    }
}

fn project_with_assets() -> NewProject {
    NewProject {
        title: "Library".to_string(),
        description: Some("Books for the village school".to_string()),
        target_amount: None,
        is_active: true,
        qr_code_url: Some(QR.to_string()),
        image_url: Some(IMAGE_A.to_string()),
    }
}

fn donation_with_proof(project_id: Option<i64>, proof: &str) -> NewDonation {
    NewDonation {
        amount: Decimal::from(25),
        donation_type: if project_id.is_some() {
            DonationType::SpecificProject
        } else {
            DonationType::General
        },
        project_id,
        donor_name: None,
        donor_email: None,
        message: None,
        proof_url: Some(proof.to_string()),
    }
}

fn set_image(url: Option<&str>) -> ProjectUpdate {
    ProjectUpdate {
        image_url: Some(url.map(str::to_string)),
        ..Default::default()
    }
}

#[tokio::test]
async fn replacing_an_image_deletes_only_the_old_object() {
    let h = harness(DeleteMode::Normal).await;
    let project = h.projects.create(project_with_assets()).await.unwrap();

    let updated = h
        .projects
        .update(project.id, set_image(Some(IMAGE_B)))
        .await
        .unwrap();

    assert_eq!(updated.image_url.as_deref(), Some(IMAGE_B));
    assert_eq!(h.backend.attempts_on("media", "projects/a.png"), 1);
    assert_eq!(h.backend.attempts_on("media", "projects/b.png"), 0);
    assert_eq!(h.backend.attempts(), 1);
    assert!(!h.backend.exists("media", "projects/a.png").await.unwrap());
    assert!(h.backend.exists("media", "projects/b.png").await.unwrap());
    assert!(h.backend.exists("media", "qr/q.png").await.unwrap());
}

#[tokio::test]
async fn unchanged_fields_trigger_no_deletes() {
    let h = harness(DeleteMode::Normal).await;
    let project = h.projects.create(project_with_assets()).await.unwrap();

    h.projects
        .update(project.id, set_image(Some(IMAGE_A)))
        .await
        .unwrap();
    h.projects
        .update(
            project.id,
            ProjectUpdate {
                title: Some("Library wing".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(h.backend.attempts(), 0);
}

#[tokio::test]
async fn clearing_a_field_deletes_its_object() {
    let h = harness(DeleteMode::Normal).await;
    let project = h.projects.create(project_with_assets()).await.unwrap();

    let updated = h
        .projects
        .update(
            project.id,
            ProjectUpdate {
                qr_code_url: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.qr_code_url, None);
    assert_eq!(updated.image_url.as_deref(), Some(IMAGE_A));
    assert_eq!(h.backend.attempts_on("media", "qr/q.png"), 1);
    assert_eq!(h.backend.attempts(), 1);
}

#[tokio::test]
async fn failed_delete_does_not_fail_the_update() {
    let h = harness(DeleteMode::Fail).await;
    let project = h.projects.create(project_with_assets()).await.unwrap();

    let updated = h
        .projects
        .update(project.id, set_image(Some(IMAGE_B)))
        .await
        .unwrap();

    assert_eq!(updated.image_url.as_deref(), Some(IMAGE_B));
    assert_eq!(
        h.projects.get(project.id).await.unwrap().image_url.as_deref(),
        Some(IMAGE_B)
    );
    assert_eq!(h.backend.attempts_on("media", "projects/a.png"), 1);
    // The old object is orphaned, not lost from the record.
    assert!(h.backend.exists("media", "projects/a.png").await.unwrap());
}

#[tokio::test]
async fn hung_delete_is_bounded_by_the_timeout() {
    let h = harness(DeleteMode::Hang).await;
    let project = h.projects.create(project_with_assets()).await.unwrap();
    let donation = h
        .ledger
        .submit(donation_with_proof(Some(project.id), PROOF_1))
        .await
        .unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        h.ledger
            .record_status_change(donation.id, "APPROVED", "admin-1", Some(PROOF_2)),
    )
    .await
    .expect("status change finished")
    .unwrap();

    assert!(matches!(outcome.proof_cleanup, Some(DeleteOutcome::Failed(_))));
    assert_eq!(outcome.donation.proof_url.as_deref(), Some(PROOF_2));
    assert_eq!(h.backend.attempts_on("media", "proofs/1.jpg"), 1);
}

#[tokio::test]
async fn replacing_a_proof_deletes_the_previous_one() {
    let h = harness(DeleteMode::Normal).await;
    let donation = h
        .ledger
        .submit(donation_with_proof(None, PROOF_1))
        .await
        .unwrap();

    let outcome = h
        .ledger
        .record_status_change(donation.id, "APPROVED", "admin-1", Some(PROOF_2))
        .await
        .unwrap();
    assert_eq!(outcome.proof_cleanup, Some(DeleteOutcome::Deleted));
    assert!(!h.backend.exists("media", "proofs/1.jpg").await.unwrap());

    // Same proof again: nothing to clean up.
    let outcome = h
        .ledger
        .record_status_change(donation.id, "REJECTED", "admin-1", Some(PROOF_2))
        .await
        .unwrap();
    assert_eq!(outcome.proof_cleanup, None);
    assert!(h.backend.exists("media", "proofs/2.jpg").await.unwrap());
}

#[tokio::test]
async fn deleting_a_donation_removes_its_proof() {
    let h = harness(DeleteMode::Normal).await;
    let donation = h
        .ledger
        .submit(donation_with_proof(None, PROOF_1))
        .await
        .unwrap();

    h.ledger.delete_donation(donation.id).await.unwrap();

    assert_eq!(h.backend.attempts_on("media", "proofs/1.jpg"), 1);
    assert!(!h.backend.exists("media", "proofs/1.jpg").await.unwrap());
}

#[tokio::test]
async fn deleting_a_campaign_removes_every_owned_object() {
    let h = harness(DeleteMode::Normal).await;
    let project = h.projects.create(project_with_assets()).await.unwrap();
    h.ledger
        .submit(donation_with_proof(Some(project.id), PROOF_1))
        .await
        .unwrap();
    h.ledger
        .submit(donation_with_proof(Some(project.id), PROOF_2))
        .await
        .unwrap();

    let report = h.projects.delete(project.id).await.unwrap();

    assert_eq!(report.deleted, 4);
    assert!(report.failures.is_empty());
    let remaining: Vec<String> = h
        .backend
        .list("media", "")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(remaining, vec!["projects/b.png".to_string()]);
}

#[tokio::test]
async fn campaign_delete_with_failing_storage_still_removes_records() {
    let h = harness(DeleteMode::Fail).await;
    let project = h.projects.create(project_with_assets()).await.unwrap();

    let report = h.projects.delete(project.id).await.unwrap();

    assert_eq!(report.failures.len(), 2);
    assert!(h.projects.get(project.id).await.is_err());
}

#[tokio::test]
async fn uploaded_asset_is_cleaned_up_when_replaced() {
    let h = harness(DeleteMode::Normal).await;
    let url = h
        .assets
        .upload("projects", Bytes::from("png"), "image/png", Visibility::Public)
        .await
        .unwrap();
    let key = url
        .strip_prefix("https://media.region1.provider-a.com/")
        .unwrap()
        .to_string();
    assert!(h.backend.exists("media", &key).await.unwrap());

    let project = h
        .projects
        .create(NewProject {
            image_url: Some(url.clone()),
            ..project_with_assets()
        })
        .await
        .unwrap();
    h.projects
        .update(project.id, set_image(Some(IMAGE_B)))
        .await
        .unwrap();

    assert_eq!(h.backend.attempts_on("media", &key), 1);
    assert!(!h.backend.exists("media", &key).await.unwrap());
}

#[tokio::test]
async fn escaped_proof_url_deletes_the_raw_key() {
    let h = harness(DeleteMode::Normal).await;
    h.backend
        .put(
            "media",
            "proofs/my scan.jpg",
            Bytes::from("x"),
            "image/jpeg",
            Visibility::Private,
        )
        .await
        .unwrap();
    let donation = h
        .ledger
        .submit(donation_with_proof(
            None,
            "https://media.s3.region1.provider-b.com/proofs/my%20scan.jpg",
        ))
        .await
        .unwrap();

    h.ledger.delete_donation(donation.id).await.unwrap();

    assert_eq!(h.backend.attempts_on("media", "proofs/my scan.jpg"), 1);
    assert!(!h.backend.exists("media", "proofs/my scan.jpg").await.unwrap());
}

#[tokio::test]
async fn bucket_is_checked_once_across_uploads() {
    let h = harness(DeleteMode::Normal).await;
    let before = h.backend.bucket_checks();

    for _ in 0..2 {
        h.assets
            .upload("qr", Bytes::from("png"), "image/png", Visibility::Public)
            .await
            .unwrap();
    }

    assert_eq!(h.backend.bucket_checks() - before, 1);
}

#[tokio::test]
async fn skip_bucket_check_never_provisions() {
    let h = harness(DeleteMode::Normal).await;
    let before = h.backend.bucket_checks();
    let mut config = StorageConfig::for_tests("media");
    config.skip_bucket_check = true;
    let storage: Arc<dyn StorageBackend> = h.backend.clone();
    let assets = AssetStore::new(storage, h.locator.clone(), &config);

    for _ in 0..2 {
        assets
            .upload("qr", Bytes::from("png"), "image/png", Visibility::Public)
            .await
            .unwrap();
    }

    assert_eq!(h.backend.bucket_checks(), before);
    assert_eq!(h.backend.list("media", "qr/").await.unwrap().len(), 3);
}
