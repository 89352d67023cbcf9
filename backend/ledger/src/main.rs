//! Donation ledger service — entry point.
//!
//! Tracks donations through review, keeps each campaign's raised amount and
//! the yearly fundraising total consistent with the approved donations, and
//! cleans up stored assets (proofs, QR codes, images) that records stop
//! referencing. Everything is exposed through a small Axum REST API.

mod annual_goal;
mod api;
mod assets;
mod completion;
mod config;
mod db;
mod errors;
mod ledger;
mod locator;
mod projects;
mod reconciler;
mod storage;
mod types;

#[cfg(test)]
mod test_assets;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use assets::{AssetStore, MAX_UPLOAD_BYTES};
use config::{Config, StorageKind};
use ledger::DonationLedger;
use locator::AssetLocator;
use projects::ProjectService;
use reconciler::AssetReconciler;
use storage::{MemoryBackend, ObjectStoreBackend, StorageBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // RUST_LOG controls verbosity; LOG_FORMAT=json switches the output format.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // ─── Object storage ───────────────────────────────────
    let storage: Arc<dyn StorageBackend> = match config.storage.kind {
        StorageKind::S3 => Arc::new(ObjectStoreBackend::new(config.storage.clone())),
        StorageKind::Memory => {
            info!("Using in-memory object storage; assets are lost on restart");
            Arc::new(MemoryBackend::new())
        }
    };
    let locator = Arc::new(AssetLocator::new(&config.storage));
    let reconciler = AssetReconciler::new(
        storage.clone(),
        locator.clone(),
        config.storage.delete_timeout,
    );

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        pool: pool.clone(),
        ledger: DonationLedger::new(pool.clone(), reconciler.clone()),
        projects: ProjectService::new(pool, reconciler),
        assets: Arc::new(AssetStore::new(storage, locator, &config.storage)),
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route(
            "/donations",
            post(api::submit_donation).get(api::list_donations),
        )
        .route(
            "/donations/:id",
            get(api::get_donation).delete(api::delete_donation),
        )
        .route("/donations/:id/status", patch(api::change_donation_status))
        .route(
            "/projects",
            post(api::create_project).get(api::list_projects),
        )
        .route(
            "/projects/:id",
            get(api::get_project)
                .put(api::update_project)
                .delete(api::delete_project),
        )
        .route(
            "/annual-goals/:year",
            get(api::get_annual_goal).put(api::set_annual_goal),
        )
        .route(
            "/assets/*folder",
            post(api::upload_asset).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
