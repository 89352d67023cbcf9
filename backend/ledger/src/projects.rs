//! Campaign management.
//!
//! Edits that touch the QR code or reference image go through the
//! reconciler once the new reference is committed; deleting a campaign
//! removes its donations and every asset they own.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::annual_goal;
use crate::completion;
use crate::db;
use crate::errors::{LedgerError, Result};
use crate::reconciler::{AssetReconciler, CleanupReport, ProjectCascade};
use crate::types::{DonationProject, DonationStatus, NewProject};

/// Partial campaign update. Nullable fields are tri-state: absent leaves
/// the value alone, `null` clears it, a value sets it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub target_amount: Option<Option<Decimal>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub qr_code_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub image_url: Option<Option<String>>,
}

/// Distinguish an explicit `null` (`Some(None)`) from a missing field (`None`).
fn present_or_null<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn blank_to_none(url: Option<String>) -> Option<String> {
    url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())
}

fn validate_target(target: Option<Decimal>) -> Result<()> {
    match target {
        Some(t) if t <= Decimal::ZERO => Err(LedgerError::Validation(
            "target_amount must be greater than zero".to_string(),
        )),
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct ProjectService {
    pool: SqlitePool,
    reconciler: AssetReconciler,
}

impl ProjectService {
    pub fn new(pool: SqlitePool, reconciler: AssetReconciler) -> Self {
        Self { pool, reconciler }
    }

    pub async fn create(&self, mut new: NewProject) -> Result<DonationProject> {
        new.title = new.title.trim().to_string();
        if new.title.is_empty() {
            return Err(LedgerError::Validation("title is required".to_string()));
        }
        validate_target(new.target_amount)?;
        new.qr_code_url = blank_to_none(new.qr_code_url);
        new.image_url = blank_to_none(new.image_url);

        let mut conn = self.pool.acquire().await?;
        let project = db::insert_project(&mut conn, &new, db::now()).await?;
        info!(project_id = project.id, title = %project.title, "Project created");
        Ok(project)
    }

    pub async fn get(&self, id: i64) -> Result<DonationProject> {
        let mut conn = self.pool.acquire().await?;
        db::get_project(&mut conn, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("project", id))
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<DonationProject>> {
        let mut conn = self.pool.acquire().await?;
        db::list_projects(&mut conn, active_only).await
    }

    /// Apply `update`. A target change re-evaluates completion in the same
    /// transaction; superseded assets are deleted after the commit.
    pub async fn update(&self, id: i64, update: ProjectUpdate) -> Result<DonationProject> {
        let mut tx = self.pool.begin().await?;
        let mut project = db::get_project(&mut tx, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("project", id))?;
        let before = project.clone();

        if let Some(title) = update.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(LedgerError::Validation("title must not be blank".to_string()));
            }
            project.title = title;
        }
        if let Some(description) = update.description {
            project.description = description;
        }
        if let Some(target) = update.target_amount {
            validate_target(target)?;
            project.target_amount = target;
        }
        if let Some(active) = update.is_active {
            project.is_active = active;
        }
        if let Some(url) = update.qr_code_url {
            project.qr_code_url = blank_to_none(url);
        }
        if let Some(url) = update.image_url {
            project.image_url = blank_to_none(url);
        }

        let now = db::now();
        db::save_project_details(&mut tx, &project, now).await?;
        project.updated_at = now;
        completion::evaluate(&mut tx, &mut project).await?;
        tx.commit().await?;
        info!(project_id = id, "Project updated");

        self.reconciler
            .on_replace(before.qr_code_url.as_deref(), project.qr_code_url.as_deref())
            .await;
        self.reconciler
            .on_replace(before.image_url.as_deref(), project.image_url.as_deref())
            .await;

        Ok(project)
    }

    /// Delete a campaign with its donations, refresh the annual totals those
    /// donations contributed to, then clean up every owned asset.
    pub async fn delete(&self, id: i64) -> Result<CleanupReport> {
        let mut tx = self.pool.begin().await?;
        let project = db::get_project(&mut tx, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("project", id))?;
        let donations = db::donations_for_project(&mut tx, id).await?;

        let mut years = BTreeSet::new();
        for donation in donations
            .iter()
            .filter(|d| d.status == DonationStatus::Approved)
        {
            years.insert(annual_goal::year_of(donation.created_at)?);
        }

        let removed = db::delete_donations_for_project(&mut tx, id).await?;
        db::delete_project(&mut tx, id).await?;
        for year in years {
            annual_goal::recompute(&mut tx, year).await?;
        }
        tx.commit().await?;
        info!(project_id = id, donations = removed, "Project deleted");

        let report = self
            .reconciler
            .on_entity_delete(&ProjectCascade {
                project: &project,
                donations: &donations,
            })
            .await;
        if !report.failures.is_empty() {
            warn!(project_id = id, failures = ?report.failures, "Project asset cleanup failed");
        }
        Ok(report)
    }
}
