//! # Donation ledger
//!
//! Applies donation status transitions and keeps each campaign's raised
//! amount equal to the sum of its approved donations.
//!
//! ## Transition effects
//!
//! | Prior      | Next       | Campaign amount |
//! |------------|------------|-----------------|
//! | ≠ APPROVED | APPROVED   | `+ amount`      |
//! | APPROVED   | ≠ APPROVED | `- amount`      |
//! | otherwise  |            | unchanged       |
//!
//! Each mutation runs in a single transaction, in this order: campaign
//! amount, completion flag, annual total. A failure at any step rolls back
//! the whole mutation. Asset cleanup runs only after the commit.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::annual_goal;
use crate::completion;
use crate::db;
use crate::errors::{LedgerError, Result};
use crate::reconciler::AssetReconciler;
use crate::storage::DeleteOutcome;
use crate::types::{
    Donation, DonationProject, DonationStatus, DonationType, NewDonation, ProjectSnapshot,
};

/// Effect of a status transition on the owning campaign's amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountDelta {
    Credit,
    Debit,
    Unchanged,
}

impl AmountDelta {
    pub fn for_transition(prior: DonationStatus, next: DonationStatus) -> Self {
        match (prior, next) {
            (DonationStatus::Approved, DonationStatus::Approved) => Self::Unchanged,
            (_, DonationStatus::Approved) => Self::Credit,
            (DonationStatus::Approved, _) => Self::Debit,
            _ => Self::Unchanged,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChangeOutcome {
    pub donation: Donation,
    /// Present when the donation belongs to a campaign.
    pub project: Option<ProjectSnapshot>,
    #[serde(skip)]
    pub proof_cleanup: Option<DeleteOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletionOutcome {
    pub donation: Donation,
    pub project: Option<ProjectSnapshot>,
    /// Annual total of the donation's year after the deletion.
    pub annual_total: Decimal,
}

#[derive(Clone)]
pub struct DonationLedger {
    pool: SqlitePool,
    reconciler: AssetReconciler,
}

impl DonationLedger {
    pub fn new(pool: SqlitePool, reconciler: AssetReconciler) -> Self {
        Self { pool, reconciler }
    }

    /// Record an unauthenticated submission as `PENDING`.
    pub async fn submit(&self, new: NewDonation) -> Result<Donation> {
        self.submit_at(new, db::now()).await
    }

    pub(crate) async fn submit_at(&self, mut new: NewDonation, created_at: i64) -> Result<Donation> {
        if new.amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }
        if let Some(email) = new.donor_email.as_deref() {
            if !email.contains('@') {
                return Err(LedgerError::Validation(format!("invalid email: {email}")));
            }
        }
        new.proof_url = new.proof_url.filter(|u| !u.trim().is_empty());

        let mut conn = self.pool.acquire().await?;
        match (new.donation_type, new.project_id) {
            (DonationType::SpecificProject, None) => {
                return Err(LedgerError::Validation(
                    "project_id is required for SPECIFIC_PROJECT donations".to_string(),
                ))
            }
            (DonationType::General, Some(_)) => {
                return Err(LedgerError::Validation(
                    "GENERAL donations cannot target a project".to_string(),
                ))
            }
            (DonationType::SpecificProject, Some(project_id)) => {
                let project = db::get_project(&mut conn, project_id)
                    .await?
                    .ok_or_else(|| LedgerError::not_found("project", project_id))?;
                if !project.is_active {
                    return Err(LedgerError::Validation(format!(
                        "project {project_id} is not accepting donations"
                    )));
                }
            }
            (DonationType::General, None) => {}
        }

        let donation = db::insert_donation(&mut conn, &new, created_at).await?;
        info!(
            donation_id = donation.id,
            amount = %donation.amount,
            project_id = ?donation.project_id,
            "Donation submitted"
        );
        Ok(donation)
    }

    pub async fn get(&self, id: i64) -> Result<Donation> {
        let mut conn = self.pool.acquire().await?;
        db::get_donation(&mut conn, id)
            .await?
            .ok_or_else(|| LedgerError::not_found("donation", id))
    }

    pub async fn list(
        &self,
        status: Option<DonationStatus>,
        project_id: Option<i64>,
    ) -> Result<Vec<Donation>> {
        let mut conn = self.pool.acquire().await?;
        db::list_donations(&mut conn, status, project_id).await
    }

    /// Move a donation to `new_status` on behalf of `reviewer`, adjusting the
    /// owning campaign, its completion flag and the annual total.
    ///
    /// A non-blank `proof_url` replaces the donation's proof; the superseded
    /// object is removed from storage after the commit.
    pub async fn record_status_change(
        &self,
        donation_id: i64,
        new_status: &str,
        reviewer: &str,
        proof_url: Option<&str>,
    ) -> Result<StatusChangeOutcome> {
        let next = DonationStatus::parse(new_status)
            .ok_or_else(|| LedgerError::Validation(format!("invalid status: {new_status}")))?;
        let reviewer = reviewer.trim();
        if reviewer.is_empty() {
            return Err(LedgerError::Validation("reviewer is required".to_string()));
        }
        let proof_url = proof_url.map(str::trim).filter(|u| !u.is_empty());

        let mut tx = self.pool.begin().await?;
        let donation = db::get_donation(&mut tx, donation_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("donation", donation_id))?;
        let prior = donation.status;
        let now = db::now();

        let delta = AmountDelta::for_transition(prior, next);
        let project = match donation.project_id {
            Some(project_id) => {
                Some(apply_delta(&mut tx, project_id, delta, donation.amount, now).await?)
            }
            None => None,
        };

        let approval = (delta == AmountDelta::Credit).then_some((reviewer, now));
        db::update_donation_status(&mut tx, donation_id, next, approval, now).await?;

        let superseded_proof = match proof_url {
            Some(url) if donation.proof_url.as_deref() != Some(url) => {
                db::set_donation_proof(&mut tx, donation_id, Some(url), now).await?;
                donation.proof_url.clone()
            }
            _ => None,
        };

        annual_goal::recompute(&mut tx, annual_goal::year_of(donation.created_at)?).await?;

        let updated = db::get_donation(&mut tx, donation_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("donation", donation_id))?;
        tx.commit().await?;

        info!(
            donation_id,
            from = prior.as_str(),
            to = next.as_str(),
            reviewer,
            delta = ?delta,
            project_amount = ?project.as_ref().map(|p| p.current_amount),
            "Donation status changed"
        );

        let proof_cleanup = match superseded_proof {
            Some(old) => self.reconciler.on_replace(Some(&old), proof_url).await,
            None => None,
        };

        Ok(StatusChangeOutcome {
            donation: updated,
            project: project.as_ref().map(ProjectSnapshot::from),
            proof_cleanup,
        })
    }

    /// Delete a donation at any status, reversing its contribution first if
    /// it was approved. Its proof object is cleaned up after the commit.
    pub async fn delete_donation(&self, donation_id: i64) -> Result<DeletionOutcome> {
        let mut tx = self.pool.begin().await?;
        let donation = db::get_donation(&mut tx, donation_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("donation", donation_id))?;
        let now = db::now();

        let project = match (donation.status, donation.project_id) {
            (DonationStatus::Approved, Some(project_id)) => Some(
                apply_delta(&mut tx, project_id, AmountDelta::Debit, donation.amount, now).await?,
            ),
            _ => None,
        };

        db::delete_donation(&mut tx, donation_id).await?;
        let annual_total =
            annual_goal::recompute(&mut tx, annual_goal::year_of(donation.created_at)?).await?;
        tx.commit().await?;

        info!(
            donation_id,
            status = donation.status.as_str(),
            amount = %donation.amount,
            "Donation deleted"
        );

        let report = self.reconciler.on_entity_delete(&donation).await;
        if !report.failures.is_empty() {
            warn!(donation_id, failures = ?report.failures, "Proof cleanup failed");
        }

        Ok(DeletionOutcome {
            project: project.as_ref().map(ProjectSnapshot::from),
            donation,
            annual_total,
        })
    }

    /// Re-sum a campaign's approved donations from scratch.
    #[cfg(test)]
    pub async fn approved_total(&self, project_id: i64) -> Result<Decimal> {
        let mut conn = self.pool.acquire().await?;
        let mut total = Decimal::ZERO;
        for raw in db::approved_amounts_for_project(&mut conn, project_id).await? {
            total += crate::types::parse_amount(&raw)?;
        }
        Ok(total)
    }
}

/// Apply `delta` for `amount` to a campaign and re-evaluate its completion.
///
/// The amount write is a compare-and-swap on the value read in this
/// transaction. A debit below zero aborts with
/// [`LedgerError::ArithmeticInvariantViolation`].
async fn apply_delta(
    conn: &mut SqliteConnection,
    project_id: i64,
    delta: AmountDelta,
    amount: Decimal,
    now: i64,
) -> Result<DonationProject> {
    let mut project = db::get_project(conn, project_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("project", project_id))?;
    let current = project.current_amount;

    let next = match delta {
        AmountDelta::Unchanged => return Ok(project),
        AmountDelta::Credit => current.checked_add(amount).ok_or_else(|| {
            LedgerError::Validation(format!("project {project_id} amount overflow"))
        })?,
        AmountDelta::Debit => {
            let next = current - amount;
            if next < Decimal::ZERO {
                return Err(LedgerError::ArithmeticInvariantViolation {
                    project_id,
                    current,
                    decrement: amount,
                });
            }
            next
        }
    };

    if !db::swap_project_amount(conn, project_id, current, next, now).await? {
        return Err(LedgerError::Conflict(format!(
            "project {project_id} amount changed concurrently"
        )));
    }
    project.current_amount = next;
    project.updated_at = now;

    completion::evaluate(conn, &mut project).await?;
    Ok(project)
}
