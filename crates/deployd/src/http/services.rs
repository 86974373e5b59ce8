use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use futures::StreamExt;

use crate::lifecycle::{CreateServiceInput, ServicePatch};
use crate::runtime::{ContainerFilter, LogOptions};

use super::api_types::{
    map_reclaim_report, map_service_record, CreateServiceRequest, DeleteResponse, LogsQuery,
    LogsResponse, NameAvailableQuery, NameAvailableResponse, ProtectionRequest, ServiceResponse,
    StatsResponse, UpdateServiceRequest,
};
use super::{caller_id, map_engine_error, AppState};

const MAX_LOG_LINES: usize = 1000;

pub(super) async fn list_services(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ServiceResponse>>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let services = state
        .lifecycle
        .get_user_services(&caller)
        .await
        .map_err(map_engine_error)?;

    Ok(Json(services.into_iter().map(map_service_record).collect()))
}

pub(super) async fn create_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<ServiceResponse>), (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let input = CreateServiceInput {
        name: payload.name,
        service_type: payload.service_type,
        environment_id: payload.environment_id,
        repo_url: payload.repo_url,
        branch: payload.branch,
        build_command: payload.build_command,
        start_command: payload.start_command,
        static_output_dir: payload.static_output_dir,
        port: payload.port,
        env_vars: payload.env_vars,
        custom_domain: payload.custom_domain,
    };

    let service = state
        .lifecycle
        .create_or_update(&caller, input)
        .await
        .map_err(map_engine_error)?;

    Ok((StatusCode::CREATED, Json(map_service_record(service))))
}

pub(super) async fn name_available(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NameAvailableQuery>,
) -> Result<Json<NameAvailableResponse>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let available = state
        .lifecycle
        .is_name_available(&caller, query.environment_id.as_deref(), &query.name)
        .await
        .map_err(map_engine_error)?;

    Ok(Json(NameAvailableResponse { available }))
}

pub(super) async fn get_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
) -> Result<Json<ServiceResponse>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let service = state
        .lifecycle
        .get_service(&caller, &service_id)
        .await
        .map_err(map_engine_error)?;

    Ok(Json(map_service_record(service)))
}

pub(super) async fn update_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
    Json(payload): Json<UpdateServiceRequest>,
) -> Result<Json<ServiceResponse>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let patch = ServicePatch {
        repo_url: payload.repo_url,
        branch: payload.branch,
        build_command: payload.build_command,
        start_command: payload.start_command,
        static_output_dir: payload.static_output_dir,
        port: payload.port,
        env_vars: payload.env_vars,
        custom_domain: payload.custom_domain,
    };

    let service = state
        .lifecycle
        .update_service(&caller, &service_id, patch)
        .await
        .map_err(map_engine_error)?;

    Ok(Json(map_service_record(service)))
}

pub(super) async fn soft_delete_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
) -> Result<Json<DeleteResponse>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let report = state
        .lifecycle
        .soft_delete(&caller, &service_id)
        .await
        .map_err(map_engine_error)?;

    Ok(Json(map_reclaim_report(&report)))
}

pub(super) async fn recover_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
) -> Result<Json<ServiceResponse>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let service = state
        .lifecycle
        .recover(&caller, &service_id)
        .await
        .map_err(map_engine_error)?;

    Ok(Json(map_service_record(service)))
}

pub(super) async fn hard_delete_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
) -> Result<Json<DeleteResponse>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let report = state
        .lifecycle
        .hard_delete(Some(&caller), &service_id)
        .await
        .map_err(map_engine_error)?;

    match report {
        Some(report) => Ok(Json(map_reclaim_report(&report))),
        None => Ok(Json(DeleteResponse {
            deleted: false,
            fully_reclaimed: true,
            steps: Vec::new(),
        })),
    }
}

pub(super) async fn set_protection(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
    Json(payload): Json<ProtectionRequest>,
) -> Result<Json<ServiceResponse>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let service = state
        .lifecycle
        .set_delete_protection(&caller, &service_id, payload.protected)
        .await
        .map_err(map_engine_error)?;

    Ok(Json(map_service_record(service)))
}

pub(super) async fn service_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;
    let service = state
        .lifecycle
        .get_service(&caller, &service_id)
        .await
        .map_err(map_engine_error)?;

    let container = primary_container(&state, &service.id).await?;

    let options = LogOptions {
        tail: query.tail.or(Some(200)),
        ..LogOptions::default()
    };
    let mut stream = state
        .runtime
        .container_logs(&container, &options)
        .await
        .map_err(|error| (StatusCode::BAD_GATEWAY, error.to_string()))?;

    let mut lines = Vec::new();
    while let Some(line) = stream.next().await {
        let line = line.map_err(|error| (StatusCode::BAD_GATEWAY, error.to_string()))?;
        lines.push(line.content);
        if lines.len() >= MAX_LOG_LINES {
            break;
        }
    }

    Ok(Json(LogsResponse { lines }))
}

pub(super) async fn service_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
) -> Result<Json<StatsResponse>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;
    let service = state
        .lifecycle
        .get_service(&caller, &service_id)
        .await
        .map_err(map_engine_error)?;

    let container = primary_container(&state, &service.id).await?;

    let snapshot = state
        .runtime
        .container_stats(&container)
        .await
        .map_err(|error| (StatusCode::BAD_GATEWAY, error.to_string()))?;

    Ok(Json(StatsResponse {
        cpu_percent: snapshot.cpu_percent,
        memory_bytes: snapshot.memory_bytes,
        memory_limit_bytes: snapshot.memory_limit_bytes,
    }))
}

async fn primary_container(
    state: &AppState,
    service_id: &str,
) -> Result<String, (StatusCode, String)> {
    let filter = ContainerFilter {
        all: false,
        labels: vec![(
            crate::lifecycle::reclaim::SERVICE_ID_LABEL.to_string(),
            service_id.to_string(),
        )],
    };

    let containers = state
        .runtime
        .list_containers(&filter)
        .await
        .map_err(|error| (StatusCode::BAD_GATEWAY, error.to_string()))?;

    containers
        .into_iter()
        .next()
        .map(|container| container.id)
        .ok_or((
            StatusCode::NOT_FOUND,
            "no running container for service".to_string(),
        ))
}
