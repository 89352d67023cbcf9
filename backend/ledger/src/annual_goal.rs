//! Organisation-wide yearly fundraising total.
//!
//! The total is always a full re-sum of the approved donations created in the
//! year, general and campaign-specific alike. Nothing is applied as a delta,
//! so a retried or partially failed mutation cannot leave drift behind.

use chrono::{DateTime, Datelike, NaiveDate};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::db;
use crate::errors::{LedgerError, Result};
use crate::types::{parse_amount, AnnualGoal};

/// Calendar year (UTC) of a unix timestamp.
pub fn year_of(timestamp: i64) -> Result<i32> {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.year())
        .ok_or_else(|| LedgerError::Validation(format!("timestamp out of range: {timestamp}")))
}

/// `[start, end)` of `year` as unix seconds.
fn year_bounds(year: i32) -> Result<(i64, i64)> {
    let start = |y: i32| {
        NaiveDate::from_ymd_opt(y, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp())
            .ok_or_else(|| LedgerError::Validation(format!("year out of range: {y}")))
    };
    Ok((start(year)?, start(year + 1)?))
}

/// Re-sum all approved donations created in `year` and overwrite the stored
/// total.
pub async fn recompute(conn: &mut SqliteConnection, year: i32) -> Result<Decimal> {
    let (from, to) = year_bounds(year)?;
    let amounts = db::approved_amounts_between(conn, from, to).await?;

    let mut total = Decimal::ZERO;
    for raw in &amounts {
        total = total
            .checked_add(parse_amount(raw)?)
            .ok_or_else(|| LedgerError::Decode(format!("annual total overflow for {year}")))?;
    }

    db::save_annual_current(conn, year, total, db::now()).await?;
    debug!(year, donations = amounts.len(), total = %total, "Annual goal recomputed");
    Ok(total)
}

/// Stored goal for `year`, or an empty goal if none has been recorded yet.
pub async fn get(conn: &mut SqliteConnection, year: i32) -> Result<AnnualGoal> {
    Ok(db::get_annual_goal(conn, year)
        .await?
        .unwrap_or(AnnualGoal {
            year,
            target_amount: Decimal::ZERO,
            current_amount: Decimal::ZERO,
            updated_at: 0,
        }))
}

/// Configure the target for `year` and refresh its total.
pub async fn set_target(conn: &mut SqliteConnection, year: i32, target: Decimal) -> Result<AnnualGoal> {
    if target.is_sign_negative() {
        return Err(LedgerError::Validation(
            "annual target must not be negative".to_string(),
        ));
    }
    year_bounds(year)?;
    db::upsert_annual_target(conn, year, target, db::now()).await?;
    recompute(conn, year).await?;
    get(conn, year).await
}
