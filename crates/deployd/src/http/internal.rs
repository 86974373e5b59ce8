use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::{to_bytes, Body};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::api_types::{
    map_deployment_record, AckRequest, DeploymentResponse, LeaseRequest, LeaseResponse,
    StatusUpdateRequest,
};
use super::{map_engine_error, AppState};

const MAX_BODY_BYTES: usize = 1024 * 1024;
const MAX_TIMESTAMP_AGE_SECONDS: i64 = 30;

type HmacSha256 = Hmac<Sha256>;

/// Middleware authenticating build workers: an HMAC over body plus
/// timestamp, keyed with the shared worker secret.
pub(super) async fn verify_worker_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(secret) = state.worker_secret.as_deref() else {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };

    let signature = header_value(&request, "X-Worker-Signature")?;
    let timestamp = header_value(&request, "X-Worker-Timestamp")?;

    validate_timestamp(&timestamp)?;

    let (parts, body) = request.into_parts();
    let body_bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature_bytes = hex::decode(signature).map_err(|_| StatusCode::UNAUTHORIZED)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    mac.update(&body_bytes);
    mac.update(timestamp.as_bytes());
    mac.verify_slice(&signature_bytes)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}

fn header_value(request: &Request, header_name: &str) -> Result<String, StatusCode> {
    let value = request
        .headers()
        .get(header_name)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let parsed = value.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
    Ok(parsed.to_string())
}

fn validate_timestamp(timestamp: &str) -> Result<(), StatusCode> {
    let timestamp_seconds = timestamp
        .parse::<i64>()
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let now_seconds_u64 = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| StatusCode::UNAUTHORIZED)?
        .as_secs();

    let now_seconds = i64::try_from(now_seconds_u64).map_err(|_| StatusCode::UNAUTHORIZED)?;

    if now_seconds - timestamp_seconds > MAX_TIMESTAMP_AGE_SECONDS {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(())
}

pub(super) async fn update_deployment_status(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
    Json(payload): Json<StatusUpdateRequest>,
) -> Result<Json<DeploymentResponse>, (StatusCode, String)> {
    let deployment = state
        .deployer
        .update_status(
            &deployment_id,
            &payload.status,
            payload.logs.as_deref(),
            payload.image_tag.as_deref(),
        )
        .await
        .map_err(map_engine_error)?;

    Ok(Json(map_deployment_record(deployment)))
}

pub(super) async fn lease_build_job(
    State(state): State<AppState>,
    Json(payload): Json<LeaseRequest>,
) -> Result<Json<Option<LeaseResponse>>, (StatusCode, String)> {
    let leased = state
        .deployer
        .lease_next(payload.lease_seconds.clamp(1, 3600))
        .await
        .map_err(map_engine_error)?;

    Ok(Json(leased.map(|leased| LeaseResponse {
        lease_id: leased.lease_id,
        attempts: leased.attempts,
        job: leased.job,
    })))
}

pub(super) async fn ack_build_job(
    State(state): State<AppState>,
    Json(payload): Json<AckRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .deployer
        .ack(&payload.lease_id)
        .await
        .map_err(map_engine_error)?;

    Ok(StatusCode::NO_CONTENT)
}
