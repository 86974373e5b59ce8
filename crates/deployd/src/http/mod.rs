use std::sync::Arc;

use anyhow::Result;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, patch, post};
use axum::{middleware, Router};
use tracing::info;

use crate::config::DeploydConfig;
use crate::credentials::{DbCredentials, TokenCipher};
use crate::db::DbClient;
use crate::deploy::DeploymentOrchestrator;
use crate::errors::EngineError;
use crate::lifecycle::ServiceLifecycleManager;
use crate::queue::SqliteQueue;
use crate::quota::StaticQuota;
use crate::runtime::docker::DockerRuntime;
use crate::runtime::ContainerRuntime;
use crate::webhook::WebhookReconciler;

pub mod api_types;
mod deployments;
mod internal;
mod services;
mod webhook;


#[derive(Clone)]
pub struct AppState {
    pub lifecycle: ServiceLifecycleManager,
    pub deployer: DeploymentOrchestrator,
    pub reconciler: WebhookReconciler,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub webhook_secret: Option<String>,
    pub worker_secret: Option<String>,
}

pub(crate) fn map_engine_error(error: EngineError) -> (StatusCode, String) {
    (error.status_code(), error.to_string())
}

/// Extracts the authenticated caller set by the fronting gateway.
pub(crate) fn caller_id(headers: &HeaderMap) -> Result<String, (StatusCode, String)> {
    headers
        .get("X-User-Id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "X-User-Id header required".to_string(),
        ))
}

pub fn router(state: AppState) -> Router {
    let internal_router = Router::new()
        .route(
            "/deployments/:deployment_id/status",
            post(internal::update_deployment_status),
        )
        .route("/queue/lease", post(internal::lease_build_job))
        .route("/queue/ack", post(internal::ack_build_job))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            internal::verify_worker_signature,
        ));

    Router::new()
        .route(
            "/api/services",
            get(services::list_services).post(services::create_service),
        )
        .route(
            "/api/services/name-available",
            get(services::name_available),
        )
        .route(
            "/api/services/:service_id",
            get(services::get_service)
                .patch(services::update_service)
                .delete(services::soft_delete_service),
        )
        .route(
            "/api/services/:service_id/recover",
            post(services::recover_service),
        )
        .route(
            "/api/services/:service_id/purge",
            delete(services::hard_delete_service),
        )
        .route(
            "/api/services/:service_id/protection",
            patch(services::set_protection),
        )
        .route("/api/services/:service_id/logs", get(services::service_logs))
        .route(
            "/api/services/:service_id/stats",
            get(services::service_stats),
        )
        .route(
            "/api/services/:service_id/deployments",
            get(deployments::list_deployments).post(deployments::create_deployment),
        )
        .route(
            "/api/deployments/:deployment_id",
            get(deployments::get_deployment),
        )
        .route("/hooks/source", post(webhook::receive_source_event))
        .nest("/internal", internal_router)
        .with_state(state)
}

/// Wires the engine together from config and serves it.
///
/// # Errors
/// Returns an error if the database, runtime socket, or listener
/// cannot be set up.
pub async fn run(config: &DeploydConfig) -> Result<()> {
    let db = DbClient::initialize(&config.database_path()).await?;

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerRuntime::connect(&config.runtime_socket())
            .map_err(|error| anyhow::anyhow!("runtime connection failed: {error}"))?,
    );

    let cipher = match config.credential_encryption_key() {
        Some(key) => Some(TokenCipher::from_base64_key(&key)?),
        None => None,
    };

    let queue = Arc::new(SqliteQueue::new(db.clone()));
    let deployer = DeploymentOrchestrator::new(
        db.clone(),
        queue,
        Arc::new(DbCredentials::new(db.clone())),
        cipher,
    );
    let lifecycle = ServiceLifecycleManager::new(
        db.clone(),
        runtime.clone(),
        Arc::new(StaticQuota::new(config.free_plan_max_services())),
        config.default_plan(),
    );
    let reconciler = WebhookReconciler::new(db.clone(), deployer.clone(), lifecycle.clone());

    let state = AppState {
        lifecycle,
        deployer,
        reconciler,
        runtime,
        webhook_secret: config.webhook_secret(),
        worker_secret: config.worker_shared_secret(),
    };

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(database = %config.database_path(), bind = %bind_address, "deployd listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
