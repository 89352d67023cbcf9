//! Donation, campaign and annual-goal records.
//!
//! Each entity has two shapes: a `*Record` that maps 1:1 onto its SQLite row
//! (amounts as canonical decimal text), and a domain struct with amounts
//! parsed into [`Decimal`]. Conversion is fallible because a corrupted amount
//! column must surface as an error instead of silently reading as zero.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, Result};

/// Lifecycle status of a donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DonationStatus {
    /// Submitted, awaiting review.
    Pending,
    /// Counted towards the campaign and the annual goal.
    Approved,
    Rejected,
    Cancelled,
}

impl DonationStatus {
    /// Parse a status string case-insensitively. Unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Identifier stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DonationType {
    /// Unrestricted gift to the organisation.
    General,
    /// Earmarked for one campaign.
    SpecificProject,
}

impl DonationType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GENERAL" => Some(Self::General),
            "SPECIFIC_PROJECT" => Some(Self::SpecificProject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::SpecificProject => "SPECIFIC_PROJECT",
        }
    }
}

/// Parse a stored decimal amount.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|e| LedgerError::Decode(format!("invalid decimal amount {raw:?}: {e}")))
}

// ─────────────────────────────────────────────────────────
// Donations
// ─────────────────────────────────────────────────────────

/// A donation row as stored in / read from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DonationRecord {
    pub id: i64,
    pub amount: String,
    pub status: String,
    pub donation_type: String,
    pub project_id: Option<i64>,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub message: Option<String>,
    pub proof_url: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: i64,
    /// Fixed at creation.
    pub amount: Decimal,
    pub status: DonationStatus,
    pub donation_type: DonationType,
    pub project_id: Option<i64>,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub message: Option<String>,
    pub proof_url: Option<String>,
    /// Reviewer who most recently moved the donation into `APPROVED`.
    pub approved_by: Option<String>,
    pub approved_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<DonationRecord> for Donation {
    type Error = LedgerError;

    fn try_from(row: DonationRecord) -> Result<Self> {
        let status = DonationStatus::parse(&row.status).ok_or_else(|| {
            LedgerError::Decode(format!("donation {} has unknown status {}", row.id, row.status))
        })?;
        let donation_type = DonationType::parse(&row.donation_type).ok_or_else(|| {
            LedgerError::Decode(format!(
                "donation {} has unknown type {}",
                row.id, row.donation_type
            ))
        })?;
        Ok(Donation {
            id: row.id,
            amount: parse_amount(&row.amount)?,
            status,
            donation_type,
            project_id: row.project_id,
            donor_name: row.donor_name,
            donor_email: row.donor_email,
            message: row.message,
            proof_url: row.proof_url,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Unauthenticated donation submission.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDonation {
    pub amount: Decimal,
    pub donation_type: DonationType,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub donor_name: Option<String>,
    #[serde(default)]
    pub donor_email: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub proof_url: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Campaigns
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRecord {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub target_amount: Option<String>,
    pub current_amount: String,
    pub is_completed: bool,
    pub is_active: bool,
    pub qr_code_url: Option<String>,
    pub image_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A fundraising campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationProject {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub target_amount: Option<Decimal>,
    /// Sum of the amounts of this campaign's approved donations.
    pub current_amount: Decimal,
    /// Derived: target set and reached.
    pub is_completed: bool,
    pub is_active: bool,
    pub qr_code_url: Option<String>,
    pub image_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<ProjectRecord> for DonationProject {
    type Error = LedgerError;

    fn try_from(row: ProjectRecord) -> Result<Self> {
        Ok(DonationProject {
            id: row.id,
            title: row.title,
            description: row.description,
            target_amount: row.target_amount.as_deref().map(parse_amount).transpose()?,
            current_amount: parse_amount(&row.current_amount)?,
            is_completed: row.is_completed,
            is_active: row.is_active,
            qr_code_url: row.qr_code_url,
            image_url: row.image_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Operator request to open a campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_amount: Option<Decimal>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub qr_code_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

fn default_true() -> bool {
    true
}

/// The funding figures returned after a ledger mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSnapshot {
    pub id: i64,
    pub target_amount: Option<Decimal>,
    pub current_amount: Decimal,
    pub is_completed: bool,
}

impl From<&DonationProject> for ProjectSnapshot {
    fn from(p: &DonationProject) -> Self {
        ProjectSnapshot {
            id: p.id,
            target_amount: p.target_amount,
            current_amount: p.current_amount,
            is_completed: p.is_completed,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Annual goals
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnnualGoalRecord {
    pub year: i64,
    pub target_amount: String,
    pub current_amount: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnualGoal {
    pub year: i32,
    pub target_amount: Decimal,
    pub current_amount: Decimal,
    pub updated_at: i64,
}

impl TryFrom<AnnualGoalRecord> for AnnualGoal {
    type Error = LedgerError;

    fn try_from(row: AnnualGoalRecord) -> Result<Self> {
        Ok(AnnualGoal {
            year: i32::try_from(row.year)
                .map_err(|_| LedgerError::Decode(format!("year out of range: {}", row.year)))?,
            target_amount: parse_amount(&row.target_amount)?,
            current_amount: parse_amount(&row.current_amount)?,
            updated_at: row.updated_at,
        })
    }
}
