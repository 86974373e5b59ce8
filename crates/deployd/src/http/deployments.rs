use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use crate::deploy::DeployTrigger;

use super::api_types::{
    map_deployment_record, CreateDeploymentRequest, DeploymentListQuery, DeploymentResponse,
};
use super::{caller_id, map_engine_error, AppState};

pub(super) async fn create_deployment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
    Json(payload): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, Json<DeploymentResponse>), (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let trigger = DeployTrigger {
        commit_sha: payload.commit_sha,
        commit_message: payload.commit_message,
        branch: payload.branch,
        correlation_id: None,
    };

    let deployment = state
        .deployer
        .create_and_queue(Some(&caller), &service_id, trigger)
        .await
        .map_err(map_engine_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(map_deployment_record(deployment)),
    ))
}

pub(super) async fn list_deployments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
    Query(query): Query<DeploymentListQuery>,
) -> Result<Json<Vec<DeploymentResponse>>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let deployments = state
        .deployer
        .list_for_service(Some(&caller), &service_id, query.limit, query.offset)
        .await
        .map_err(map_engine_error)?;

    Ok(Json(
        deployments.into_iter().map(map_deployment_record).collect(),
    ))
}

pub(super) async fn get_deployment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(deployment_id): Path<String>,
) -> Result<Json<DeploymentResponse>, (StatusCode, String)> {
    let caller = caller_id(&headers)?;

    let deployment = state
        .deployer
        .get_deployment(Some(&caller), &deployment_id)
        .await
        .map_err(map_engine_error)?;

    Ok(Json(map_deployment_record(deployment)))
}
