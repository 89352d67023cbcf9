//! Campaign completion flag.
//!
//! `is_completed` is a derived fact: target set and reached. It is
//! recomputed after every change to a campaign's raised amount or target,
//! in both directions, so a reversal below target clears it again.

use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::info;

use crate::db;
use crate::errors::Result;
use crate::types::DonationProject;

/// `true` iff a target is set and the raised amount has reached it.
pub fn is_completed(target_amount: Option<Decimal>, current_amount: Decimal) -> bool {
    matches!(target_amount, Some(target) if current_amount >= target)
}

/// Recompute and persist the completion flag of `project`, writing only when
/// it changed. Updates `project` in place and returns whether it flipped.
pub async fn evaluate(conn: &mut SqliteConnection, project: &mut DonationProject) -> Result<bool> {
    let completed = is_completed(project.target_amount, project.current_amount);
    if completed == project.is_completed {
        return Ok(false);
    }

    db::set_project_completed(conn, project.id, completed).await?;
    project.is_completed = completed;
    info!(
        project_id = project.id,
        current = %project.current_amount,
        target = ?project.target_amount,
        "Campaign {}",
        if completed { "completed" } else { "reopened" }
    );
    Ok(true)
}
