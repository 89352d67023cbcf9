//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::error;

use crate::annual_goal;
use crate::assets::AssetStore;
use crate::errors::{LedgerError, Result};
use crate::ledger::DonationLedger;
use crate::projects::{ProjectService, ProjectUpdate};
use crate::storage::Visibility;
use crate::types::{DonationStatus, NewDonation, NewProject};

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub ledger: DonationLedger,
    pub projects: ProjectService,
    pub assets: Arc<AssetStore>,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct StatusChangeRequest {
    pub new_status: String,
    pub reviewer_id: String,
    #[serde(default)]
    pub proof_url: Option<String>,
}

#[derive(Deserialize)]
pub struct DonationFilter {
    pub status: Option<String>,
    pub project_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct ProjectFilter {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Deserialize)]
pub struct AnnualTargetRequest {
    pub target_amount: Decimal,
}

#[derive(Deserialize)]
pub struct UploadParams {
    #[serde(default)]
    pub private: bool,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub items: Vec<T>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub url: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_status(e: &LedgerError) -> StatusCode {
    match e {
        LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::Conflict(_) => StatusCode::CONFLICT,
        LedgerError::ArithmeticInvariantViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::Storage(_) => StatusCode::BAD_GATEWAY,
        LedgerError::Database(_)
        | LedgerError::Migrate(_)
        | LedgerError::Config(_)
        | LedgerError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render `result` as JSON with `ok` on success or the mapped error status.
fn respond<T: Serialize>(ok: StatusCode, result: Result<T>) -> Response {
    match result {
        Ok(body) => (ok, Json(body)).into_response(),
        Err(e) => {
            let status = error_status(&e);
            if status.is_server_error() {
                error!("Request failed: {e}");
            }
            (
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

fn list<T>(items: Vec<T>) -> ListResponse<T> {
    ListResponse {
        count: items.len(),
        items,
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /donations`
pub async fn submit_donation(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<NewDonation>,
) -> Response {
    respond(StatusCode::CREATED, state.ledger.submit(body).await)
}

/// `GET /donations?status=&project_id=`
pub async fn list_donations(
    State(state): State<Arc<ApiState>>,
    Query(filter): Query<DonationFilter>,
) -> Response {
    let result = async {
        let status = filter
            .status
            .as_deref()
            .map(|s| {
                DonationStatus::parse(s)
                    .ok_or_else(|| LedgerError::Validation(format!("invalid status: {s}")))
            })
            .transpose()?;
        state.ledger.list(status, filter.project_id).await.map(list)
    }
    .await;
    respond(StatusCode::OK, result)
}

/// `GET /donations/:id`
pub async fn get_donation(State(state): State<Arc<ApiState>>, Path(id): Path<i64>) -> Response {
    respond(StatusCode::OK, state.ledger.get(id).await)
}

/// `PATCH /donations/:id/status`
///
/// Returns the updated donation and, for campaign donations, the campaign's
/// raised amount and completion flag.
pub async fn change_donation_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Json(body): Json<StatusChangeRequest>,
) -> Response {
    respond(
        StatusCode::OK,
        state
            .ledger
            .record_status_change(id, &body.new_status, &body.reviewer_id, body.proof_url.as_deref())
            .await,
    )
}

/// `DELETE /donations/:id`
pub async fn delete_donation(State(state): State<Arc<ApiState>>, Path(id): Path<i64>) -> Response {
    respond(StatusCode::OK, state.ledger.delete_donation(id).await)
}

/// `POST /projects`
pub async fn create_project(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<NewProject>,
) -> Response {
    respond(StatusCode::CREATED, state.projects.create(body).await)
}

/// `GET /projects?active_only=`
pub async fn list_projects(
    State(state): State<Arc<ApiState>>,
    Query(filter): Query<ProjectFilter>,
) -> Response {
    respond(
        StatusCode::OK,
        state.projects.list(filter.active_only).await.map(list),
    )
}

/// `GET /projects/:id`
pub async fn get_project(State(state): State<Arc<ApiState>>, Path(id): Path<i64>) -> Response {
    respond(StatusCode::OK, state.projects.get(id).await)
}

/// `PUT /projects/:id`
pub async fn update_project(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Json(body): Json<ProjectUpdate>,
) -> Response {
    respond(StatusCode::OK, state.projects.update(id, body).await)
}

/// `DELETE /projects/:id`
///
/// Storage cleanup is best-effort and not reported to the caller.
pub async fn delete_project(State(state): State<Arc<ApiState>>, Path(id): Path<i64>) -> Response {
    match state.projects.delete(id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => respond::<()>(StatusCode::NO_CONTENT, Err(e)),
    }
}

/// `GET /annual-goals/:year`
pub async fn get_annual_goal(
    State(state): State<Arc<ApiState>>,
    Path(year): Path<i32>,
) -> Response {
    let result = async {
        let mut conn = state.pool.acquire().await?;
        annual_goal::get(&mut conn, year).await
    }
    .await;
    respond(StatusCode::OK, result)
}

/// `PUT /annual-goals/:year`
pub async fn set_annual_goal(
    State(state): State<Arc<ApiState>>,
    Path(year): Path<i32>,
    Json(body): Json<AnnualTargetRequest>,
) -> Response {
    let result = async {
        let mut conn = state.pool.acquire().await?;
        annual_goal::set_target(&mut conn, year, body.target_amount).await
    }
    .await;
    respond(StatusCode::OK, result)
}

/// `POST /assets/*folder?private=`
///
/// Stores the raw request body and returns the URL to reference it by.
pub async fn upload_asset(
    State(state): State<Arc<ApiState>>,
    Path(folder): Path<String>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let visibility = if params.private {
        Visibility::Private
    } else {
        Visibility::Public
    };
    respond(
        StatusCode::CREATED,
        state
            .assets
            .upload(&folder, body, &content_type, visibility)
            .await
            .map(|url| UploadResponse { url }),
    )
}
