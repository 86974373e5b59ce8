use hmac::Mac;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::db::types::RepoMatch;
use crate::db::DbClient;
use crate::deploy::{DeployTrigger, DeploymentOrchestrator};
use crate::errors::EngineResult;
use crate::lifecycle::ServiceLifecycleManager;

/// The three distinguishable signature failures. Missing and invalid
/// signatures are the sender's fault; a missing secret is ours.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    MissingSignature,

    #[error("signature mismatch")]
    InvalidSignature,

    #[error("webhook secret not configured")]
    SecretNotConfigured,
}

/// Verifies a `sha256=<hex>` HMAC signature over the raw request body.
///
/// # Errors
/// Returns the specific failure so the HTTP layer can map missing and
/// invalid signatures to 400 and a missing secret to 500.
pub fn verify_signature(
    secret: Option<&str>,
    signature_header: Option<&str>,
    body: &[u8],
) -> Result<(), SignatureError> {
    let secret = match secret {
        Some(secret) if !secret.is_empty() => secret,
        _ => return Err(SignatureError::SecretNotConfigured),
    };
    let header = signature_header.ok_or(SignatureError::MissingSignature)?;

    let provided = header
        .strip_prefix("sha256=")
        .ok_or(SignatureError::InvalidSignature)?;

    let Ok(mut mac) = <hmac::Hmac<sha2::Sha256> as Mac>::new_from_slice(secret.as_bytes()) else {
        return Err(SignatureError::InvalidSignature);
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    if subtle_compare(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::InvalidSignature)
    }
}

fn subtle_compare(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut mismatch = 0_u8;
    for (left_value, right_value) in left.iter().zip(right.iter()) {
        mismatch |= left_value ^ right_value;
    }
    mismatch == 0
}

#[derive(Debug, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub ref_name: Option<String>,
    pub after: Option<String>,
    pub repository: EventRepository,
    pub head_commit: Option<HeadCommit>,
}

#[derive(Debug, Deserialize)]
pub struct HeadCommit {
    pub id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventRepository {
    pub clone_url: Option<String>,
    pub html_url: Option<String>,
}

impl EventRepository {
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.clone_url.as_deref().or(self.html_url.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: i64,
    pub pull_request: PullRequestDetails,
    pub repository: EventRepository,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestDetails {
    pub head: PullRequestHead,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestHead {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

/// What a webhook delivery ended up doing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub deployments_queued: usize,
    pub previews_created: bool,
    pub previews_deleted: bool,
}

/// Turns source-provider events into deployments and preview
/// environments.
#[derive(Clone)]
pub struct WebhookReconciler {
    db: DbClient,
    deployer: DeploymentOrchestrator,
    lifecycle: ServiceLifecycleManager,
}

impl WebhookReconciler {
    #[must_use]
    pub fn new(
        db: DbClient,
        deployer: DeploymentOrchestrator,
        lifecycle: ServiceLifecycleManager,
    ) -> Self {
        Self {
            db,
            deployer,
            lifecycle,
        }
    }

    /// Queues a deployment for every live service tracking the pushed
    /// branch. Events for unknown repositories or branches are
    /// acknowledged without action.
    ///
    /// # Errors
    /// Returns a system error if persistence or enqueueing fails, so
    /// the sender retries the delivery.
    pub async fn handle_push(&self, event: &PushEvent) -> EngineResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        let Some(repo_url) = event.repository.url() else {
            return Ok(summary);
        };
        let Some(ref_name) = event.ref_name.as_deref() else {
            return Ok(summary);
        };
        let branch = ref_name.strip_prefix("refs/heads/").unwrap_or(ref_name);

        let repo = RepoMatch::new(repo_url);
        let targets = self.db.find_push_targets(&repo, branch).await?;

        for service in &targets {
            let trigger = DeployTrigger {
                commit_sha: event
                    .head_commit
                    .as_ref()
                    .and_then(|commit| commit.id.clone())
                    .or_else(|| event.after.clone()),
                commit_message: event
                    .head_commit
                    .as_ref()
                    .and_then(|commit| commit.message.clone()),
                branch: Some(branch.to_string()),
                correlation_id: Some(format!("push:{}:{branch}", repo.bare())),
            };
            self.deployer
                .create_and_queue(None, &service.id, trigger)
                .await?;
            summary.deployments_queued += 1;
        }

        info!(
            repo = %repo.bare(),
            branch,
            queued = summary.deployments_queued,
            "handled push event"
        );
        Ok(summary)
    }

    /// Maintains preview environments: opened and synchronized pull
    /// requests get a preview service and a deployment of the head
    /// commit; closed ones are torn down. Other actions are
    /// acknowledged untouched.
    ///
    /// # Errors
    /// Returns a system error if persistence or enqueueing fails.
    pub async fn handle_pull_request(
        &self,
        event: &PullRequestEvent,
    ) -> EngineResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        let Some(repo_url) = event.repository.url() else {
            return Ok(summary);
        };
        let repo = RepoMatch::new(repo_url);

        match event.action.as_str() {
            "opened" | "reopened" | "synchronize" => {
                let Some(base) = self.db.find_base_service(&repo).await? else {
                    return Ok(summary);
                };

                let preview = self
                    .lifecycle
                    .upsert_preview(&base, event.number, &event.pull_request.head.ref_name)
                    .await?;
                summary.previews_created = true;

                let trigger = DeployTrigger {
                    commit_sha: Some(event.pull_request.head.sha.clone()),
                    commit_message: None,
                    branch: Some(event.pull_request.head.ref_name.clone()),
                    correlation_id: Some(format!("pr:{}:{}", repo.bare(), event.number)),
                };
                self.deployer
                    .create_and_queue(None, &preview.id, trigger)
                    .await?;
                summary.deployments_queued += 1;
            }
            "closed" => {
                if let Some(preview) = self.db.find_preview_service(&repo, event.number).await? {
                    self.lifecycle.hard_delete(None, &preview.id).await?;
                    summary.previews_deleted = true;
                }
            }
            _ => {}
        }

        info!(
            repo = %repo.bare(),
            action = %event.action,
            pr_number = event.number,
            "handled pull request event"
        );
        Ok(summary)
    }
}
