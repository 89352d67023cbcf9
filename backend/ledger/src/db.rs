//! Database layer — migrations and queries.
//!
//! Query helpers take `&mut SqliteConnection` so the same function runs
//! against a pooled connection or inside a transaction (`&mut *tx`).

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::errors::{LedgerError, Result};
use crate::types::{
    AnnualGoal, AnnualGoalRecord, Donation, DonationProject, DonationRecord, DonationStatus,
    NewDonation, NewProject, ProjectRecord,
};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Single-connection in-memory pool with migrations applied.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid sqlite url")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("in-memory pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations apply");
    pool
}

/// Current unix time in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

const DONATION_COLUMNS: &str = "id, amount, status, donation_type, project_id, donor_name, \
     donor_email, message, proof_url, approved_by, approved_at, created_at, updated_at";

const PROJECT_COLUMNS: &str = "id, title, description, target_amount, current_amount, \
     is_completed, is_active, qr_code_url, image_url, created_at, updated_at";

// ─────────────────────────────────────────────────────────
// Donations
// ─────────────────────────────────────────────────────────

/// Insert a new donation in `PENDING` state.
pub async fn insert_donation(
    conn: &mut SqliteConnection,
    new: &NewDonation,
    created_at: i64,
) -> Result<Donation> {
    let id = sqlx::query(
        r#"
        INSERT INTO donations
            (amount, status, donation_type, project_id, donor_name, donor_email,
             message, proof_url, created_at, updated_at)
        VALUES (?1, 'PENDING', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        "#,
    )
    .bind(new.amount.to_string())
    .bind(new.donation_type.as_str())
    .bind(new.project_id)
    .bind(&new.donor_name)
    .bind(&new.donor_email)
    .bind(&new.message)
    .bind(&new.proof_url)
    .bind(created_at)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    let row = sqlx::query_as::<_, DonationRecord>(&format!(
        "SELECT {DONATION_COLUMNS} FROM donations WHERE id = ?1"
    ))
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;
    Donation::try_from(row)
}

pub async fn get_donation(conn: &mut SqliteConnection, id: i64) -> Result<Option<Donation>> {
    let row = sqlx::query_as::<_, DonationRecord>(&format!(
        "SELECT {DONATION_COLUMNS} FROM donations WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.map(Donation::try_from).transpose()
}

/// List donations, optionally filtered by status and/or campaign, newest first.
pub async fn list_donations(
    conn: &mut SqliteConnection,
    status: Option<DonationStatus>,
    project_id: Option<i64>,
) -> Result<Vec<Donation>> {
    let rows = sqlx::query_as::<_, DonationRecord>(&format!(
        r#"
        SELECT {DONATION_COLUMNS}
        FROM   donations
        WHERE  (?1 IS NULL OR status = ?1)
          AND  (?2 IS NULL OR project_id = ?2)
        ORDER  BY created_at DESC, id DESC
        "#
    ))
    .bind(status.map(|s| s.as_str()))
    .bind(project_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(Donation::try_from).collect()
}

/// Write a new status. `approval` is only passed on a transition into
/// `APPROVED`; otherwise the existing approver stamp is preserved.
pub async fn update_donation_status(
    conn: &mut SqliteConnection,
    id: i64,
    status: DonationStatus,
    approval: Option<(&str, i64)>,
    updated_at: i64,
) -> Result<()> {
    let (approved_by, approved_at) = match approval {
        Some((by, at)) => (Some(by), Some(at)),
        None => (None, None),
    };
    sqlx::query(
        r#"
        UPDATE donations
        SET    status      = ?1,
               approved_by = COALESCE(?2, approved_by),
               approved_at = COALESCE(?3, approved_at),
               updated_at  = ?4
        WHERE  id = ?5
        "#,
    )
    .bind(status.as_str())
    .bind(approved_by)
    .bind(approved_at)
    .bind(updated_at)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_donation_proof(
    conn: &mut SqliteConnection,
    id: i64,
    proof_url: Option<&str>,
    updated_at: i64,
) -> Result<()> {
    sqlx::query("UPDATE donations SET proof_url = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(proof_url)
        .bind(updated_at)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn delete_donation(conn: &mut SqliteConnection, id: i64) -> Result<u64> {
    Ok(sqlx::query("DELETE FROM donations WHERE id = ?1")
        .bind(id)
        .execute(conn)
        .await?
        .rows_affected())
}

pub async fn donations_for_project(
    conn: &mut SqliteConnection,
    project_id: i64,
) -> Result<Vec<Donation>> {
    list_donations(conn, None, Some(project_id)).await
}

pub async fn delete_donations_for_project(
    conn: &mut SqliteConnection,
    project_id: i64,
) -> Result<u64> {
    Ok(sqlx::query("DELETE FROM donations WHERE project_id = ?1")
        .bind(project_id)
        .execute(conn)
        .await?
        .rows_affected())
}

/// Amounts of approved donations created in `[from, to)`.
pub async fn approved_amounts_between(
    conn: &mut SqliteConnection,
    from: i64,
    to: i64,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT amount FROM donations
        WHERE  status = 'APPROVED' AND created_at >= ?1 AND created_at < ?2
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(a,)| a).collect())
}

/// Amounts of the approved donations of one campaign.
#[cfg(test)]
pub async fn approved_amounts_for_project(
    conn: &mut SqliteConnection,
    project_id: i64,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT amount FROM donations WHERE status = 'APPROVED' AND project_id = ?1",
    )
    .bind(project_id)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(a,)| a).collect())
}

// ─────────────────────────────────────────────────────────
// Campaigns
// ─────────────────────────────────────────────────────────

pub async fn insert_project(
    conn: &mut SqliteConnection,
    new: &NewProject,
    created_at: i64,
) -> Result<DonationProject> {
    let id = sqlx::query(
        r#"
        INSERT INTO donation_projects
            (title, description, target_amount, current_amount, is_completed,
             is_active, qr_code_url, image_url, created_at, updated_at)
        VALUES (?1, ?2, ?3, '0', 0, ?4, ?5, ?6, ?7, ?7)
        "#,
    )
    .bind(&new.title)
    .bind(&new.description)
    .bind(new.target_amount.map(|t| t.to_string()))
    .bind(new.is_active)
    .bind(&new.qr_code_url)
    .bind(&new.image_url)
    .bind(created_at)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    get_project(conn, id)
        .await?
        .ok_or_else(|| LedgerError::not_found("project", id))
}

pub async fn get_project(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<DonationProject>> {
    let row = sqlx::query_as::<_, ProjectRecord>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM donation_projects WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.map(DonationProject::try_from).transpose()
}

pub async fn list_projects(
    conn: &mut SqliteConnection,
    active_only: bool,
) -> Result<Vec<DonationProject>> {
    let rows = sqlx::query_as::<_, ProjectRecord>(&format!(
        r#"
        SELECT {PROJECT_COLUMNS}
        FROM   donation_projects
        WHERE  (?1 = 0 OR is_active = 1)
        ORDER  BY created_at DESC, id DESC
        "#
    ))
    .bind(active_only)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(DonationProject::try_from).collect()
}

/// Overwrite the operator-editable columns of a campaign. The derived
/// columns (`current_amount`, `is_completed`) are left alone.
pub async fn save_project_details(
    conn: &mut SqliteConnection,
    project: &DonationProject,
    updated_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE donation_projects
        SET    title         = ?1,
               description   = ?2,
               target_amount = ?3,
               is_active     = ?4,
               qr_code_url   = ?5,
               image_url     = ?6,
               updated_at    = ?7
        WHERE  id = ?8
        "#,
    )
    .bind(&project.title)
    .bind(&project.description)
    .bind(project.target_amount.map(|t| t.to_string()))
    .bind(project.is_active)
    .bind(&project.qr_code_url)
    .bind(&project.image_url)
    .bind(updated_at)
    .bind(project.id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Compare-and-swap the raised amount. Returns `false` when the stored
/// amount no longer equals `expected`.
pub async fn swap_project_amount(
    conn: &mut SqliteConnection,
    id: i64,
    expected: Decimal,
    new_amount: Decimal,
    updated_at: i64,
) -> Result<bool> {
    let affected = sqlx::query(
        r#"
        UPDATE donation_projects
        SET    current_amount = ?1, updated_at = ?2
        WHERE  id = ?3 AND current_amount = ?4
        "#,
    )
    .bind(new_amount.to_string())
    .bind(updated_at)
    .bind(id)
    .bind(expected.to_string())
    .execute(conn)
    .await?
    .rows_affected();
    Ok(affected == 1)
}

pub async fn set_project_completed(
    conn: &mut SqliteConnection,
    id: i64,
    is_completed: bool,
) -> Result<()> {
    sqlx::query("UPDATE donation_projects SET is_completed = ?1 WHERE id = ?2")
        .bind(is_completed)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn delete_project(conn: &mut SqliteConnection, id: i64) -> Result<u64> {
    Ok(sqlx::query("DELETE FROM donation_projects WHERE id = ?1")
        .bind(id)
        .execute(conn)
        .await?
        .rows_affected())
}

// ─────────────────────────────────────────────────────────
// Annual goals
// ─────────────────────────────────────────────────────────

pub async fn get_annual_goal(
    conn: &mut SqliteConnection,
    year: i32,
) -> Result<Option<AnnualGoal>> {
    let row = sqlx::query_as::<_, AnnualGoalRecord>(
        "SELECT year, target_amount, current_amount, updated_at FROM annual_goals WHERE year = ?1",
    )
    .bind(year)
    .fetch_optional(conn)
    .await?;
    row.map(AnnualGoal::try_from).transpose()
}

/// Set the target for `year`, creating the row if needed.
pub async fn upsert_annual_target(
    conn: &mut SqliteConnection,
    year: i32,
    target: Decimal,
    updated_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO annual_goals (year, target_amount, current_amount, updated_at)
        VALUES (?1, ?2, '0', ?3)
        ON CONFLICT (year) DO UPDATE SET target_amount = ?2, updated_at = ?3
        "#,
    )
    .bind(year)
    .bind(target.to_string())
    .bind(updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Overwrite the raised total for `year`, creating the row if needed.
pub async fn save_annual_current(
    conn: &mut SqliteConnection,
    year: i32,
    current: Decimal,
    updated_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO annual_goals (year, target_amount, current_amount, updated_at)
        VALUES (?1, '0', ?2, ?3)
        ON CONFLICT (year) DO UPDATE SET current_amount = ?2, updated_at = ?3
        "#,
    )
    .bind(year)
    .bind(current.to_string())
    .bind(updated_at)
    .execute(conn)
    .await?;
    Ok(())
}
