use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use tracing::warn;

use crate::webhook::{PullRequestEvent, PushEvent, SignatureError};

use super::api_types::WebhookAck;
use super::{map_engine_error, AppState};

/// Receives source-provider webhook deliveries. The body is consumed
/// raw so the HMAC covers exactly the bytes sent.
pub(super) async fn receive_source_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, (StatusCode, String)> {
    let signature_header = headers
        .get("X-Hub-Signature-256")
        .and_then(|value| value.to_str().ok());

    crate::webhook::verify_signature(
        state.webhook_secret.as_deref(),
        signature_header,
        body.as_bytes(),
    )
    .map_err(|error| match error {
        SignatureError::SecretNotConfigured => {
            warn!("webhook delivery rejected: no secret configured");
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
        SignatureError::MissingSignature | SignatureError::InvalidSignature => {
            (StatusCode::BAD_REQUEST, error.to_string())
        }
    })?;

    let event_kind = headers
        .get("X-GitHub-Event")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let mut ack = WebhookAck {
        received: true,
        deployments_queued: 0,
    };

    match event_kind {
        "push" => {
            let event: PushEvent = serde_json::from_str(&body).map_err(|error| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("invalid push payload: {error}"),
                )
            })?;
            let summary = state
                .reconciler
                .handle_push(&event)
                .await
                .map_err(map_engine_error)?;
            ack.deployments_queued = summary.deployments_queued;
        }
        "pull_request" => {
            let event: PullRequestEvent = serde_json::from_str(&body).map_err(|error| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("invalid pull request payload: {error}"),
                )
            })?;
            let summary = state
                .reconciler
                .handle_pull_request(&event)
                .await
                .map_err(map_engine_error)?;
            ack.deployments_queued = summary.deployments_queued;
        }
        // Unhandled event kinds are acknowledged so the sender does not
        // retry them forever.
        _ => {}
    }

    Ok(Json(ack))
}
