use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::credentials::{authenticated_repo_url, is_integrated_provider, CredentialStore, TokenCipher};
use crate::db::types::{DeploymentRecord, DeploymentStatus, NewDeployment, ServiceRecord, ServiceStatus};
use crate::db::DbClient;
use crate::errors::{EngineError, EngineResult};
use crate::queue::{BuildJob, BuildQueue, LeasedJob};

/// What triggered a deployment, as recorded on the deployment row.
#[derive(Clone, Debug, Default)]
pub struct DeployTrigger {
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub branch: Option<String>,
    pub correlation_id: Option<String>,
}

/// Creates deployments and feeds the build queue. The queue message is
/// the only place a decrypted access token ever appears.
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    db: DbClient,
    queue: Arc<dyn BuildQueue>,
    credentials: Arc<dyn CredentialStore>,
    cipher: Option<TokenCipher>,
}

impl DeploymentOrchestrator {
    #[must_use]
    pub fn new(
        db: DbClient,
        queue: Arc<dyn BuildQueue>,
        credentials: Arc<dyn CredentialStore>,
        cipher: Option<TokenCipher>,
    ) -> Self {
        Self {
            db,
            queue,
            credentials,
            cipher,
        }
    }

    /// Creates a QUEUED deployment for a service and enqueues its build
    /// job. When `caller_id` is given, a service owned by someone else
    /// is reported as missing rather than forbidden.
    ///
    /// # Errors
    /// Returns `NotFound` for missing, tombstoned, or foreign services,
    /// and a system error if persistence or enqueueing fails. On
    /// enqueue failure the QUEUED row is kept so the attempt stays
    /// visible.
    pub async fn create_and_queue(
        &self,
        caller_id: Option<&str>,
        service_id: &str,
        trigger: DeployTrigger,
    ) -> EngineResult<DeploymentRecord> {
        let service = self.visible_service(caller_id, service_id).await?;

        let deployment_id = Uuid::new_v4().to_string();
        let branch = trigger
            .branch
            .clone()
            .unwrap_or_else(|| service.branch.clone());

        self.db
            .insert_deployment(&NewDeployment {
                id: deployment_id.clone(),
                service_id: service.id.clone(),
                commit_sha: trigger.commit_sha.clone(),
                commit_message: trigger.commit_message.clone(),
                branch: Some(branch.clone()),
                correlation_id: trigger.correlation_id.clone(),
            })
            .await?;

        let job = BuildJob {
            deployment_id: deployment_id.clone(),
            service_id: service.id.clone(),
            service_name: service.name.clone(),
            service_type: service.service_type.clone(),
            repo_url: self.clone_url_for(&service).await,
            branch,
            build_command: service.build_command.clone(),
            start_command: service.start_command.clone(),
            static_output_dir: service.static_output_dir.clone(),
            port: service.port,
            env_vars: service.env_map(),
            custom_domain: service.custom_domain.clone(),
            correlation_id: trigger.correlation_id,
        };

        self.queue
            .enqueue(&job)
            .await
            .map_err(EngineError::System)?;

        self.db
            .set_service_status(&service.id, ServiceStatus::Deploying.as_str())
            .await?;

        let record = self
            .db
            .get_deployment(&deployment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("deployment not found after insert"))?;

        Ok(record)
    }

    /// # Errors
    /// Returns `NotFound` when the deployment or its service is not
    /// visible to the caller.
    pub async fn get_deployment(
        &self,
        caller_id: Option<&str>,
        deployment_id: &str,
    ) -> EngineResult<DeploymentRecord> {
        let deployment = self
            .db
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("deployment not found"))?;

        self.visible_service(caller_id, &deployment.service_id)
            .await?;

        Ok(deployment)
    }

    /// # Errors
    /// Returns `NotFound` when the service is not visible to the
    /// caller.
    pub async fn list_for_service(
        &self,
        caller_id: Option<&str>,
        service_id: &str,
        limit: i64,
        offset: i64,
    ) -> EngineResult<Vec<DeploymentRecord>> {
        self.visible_service(caller_id, service_id).await?;

        let deployments = self
            .db
            .list_deployments_for_service(service_id, limit.clamp(1, 100), offset.max(0))
            .await?;

        Ok(deployments)
    }

    /// # Errors
    /// Returns `NotFound` when the service is not visible to the
    /// caller.
    pub async fn count_for_service(
        &self,
        caller_id: Option<&str>,
        service_id: &str,
    ) -> EngineResult<i64> {
        self.visible_service(caller_id, service_id).await?;

        let count = self.db.count_deployments_for_service(service_id).await?;
        Ok(count)
    }

    /// Drops a service's whole deployment history. Queued jobs for the
    /// removed rows are unaffected; the worker drops them when the
    /// deployment row no longer resolves.
    ///
    /// # Errors
    /// Returns `NotFound` when the service is not visible to the
    /// caller.
    pub async fn delete_for_service(
        &self,
        caller_id: Option<&str>,
        service_id: &str,
    ) -> EngineResult<()> {
        self.visible_service(caller_id, service_id).await?;

        self.db.delete_deployments_for_service(service_id).await?;
        Ok(())
    }

    /// Applies a worker-reported status change, enforcing the
    /// deployment state machine and mirroring terminal outcomes onto
    /// the service row.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown deployments, `Validation` for
    /// unknown status strings, and `Conflict` for disallowed
    /// transitions.
    pub async fn update_status(
        &self,
        deployment_id: &str,
        status: &str,
        logs: Option<&str>,
        image_tag: Option<&str>,
    ) -> EngineResult<DeploymentRecord> {
        let deployment = self
            .db
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("deployment not found"))?;

        let next = DeploymentStatus::parse(status)
            .ok_or_else(|| EngineError::validation(format!("unknown status: {status}")))?;
        let current = deployment
            .parsed_status()
            .ok_or_else(|| EngineError::conflict("deployment has unrecognized status"))?;

        if !current.can_transition_to(next) {
            return Err(EngineError::conflict(format!(
                "cannot move deployment from {} to {}",
                current.as_str(),
                next.as_str()
            )));
        }

        self.db
            .update_deployment_status(deployment_id, next.as_str(), logs, image_tag)
            .await?;

        let service_status = match next {
            DeploymentStatus::Success => Some(ServiceStatus::Running),
            DeploymentStatus::Failed => Some(ServiceStatus::Error),
            DeploymentStatus::Stopped => Some(ServiceStatus::Stopped),
            DeploymentStatus::Queued | DeploymentStatus::Building => None,
        };
        if let Some(service_status) = service_status {
            self.db
                .set_service_status(&deployment.service_id, service_status.as_str())
                .await?;
        }

        let record = self
            .db
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("deployment not found"))?;

        Ok(record)
    }

    /// Hands the oldest available build job to a worker.
    ///
    /// # Errors
    /// Returns a system error if the queue backend fails.
    pub async fn lease_next(&self, lease_seconds: i64) -> EngineResult<Option<LeasedJob>> {
        let leased = self
            .queue
            .dequeue(lease_seconds)
            .await
            .map_err(EngineError::System)?;
        Ok(leased)
    }

    /// # Errors
    /// Returns a system error if the queue backend fails.
    pub async fn ack(&self, lease_id: &str) -> EngineResult<()> {
        self.queue.ack(lease_id).await.map_err(EngineError::System)
    }

    async fn visible_service(
        &self,
        caller_id: Option<&str>,
        service_id: &str,
    ) -> EngineResult<ServiceRecord> {
        let service = self
            .db
            .get_service(service_id)
            .await?
            .ok_or_else(|| EngineError::not_found("service not found"))?;

        if service.is_deleted() {
            return Err(EngineError::not_found("service not found"));
        }
        if let Some(caller_id) = caller_id {
            if service.owner_id != caller_id {
                // Foreign services are indistinguishable from missing ones.
                return Err(EngineError::not_found("service not found"));
            }
        }

        Ok(service)
    }

    /// Resolves the clone URL for a build job, splicing in the owner's
    /// access token when the repository lives on an integrated
    /// provider. Credential failures degrade to an anonymous clone.
    async fn clone_url_for(&self, service: &ServiceRecord) -> Option<String> {
        let repo_url = service.repo_url.clone()?;
        if !is_integrated_provider(&repo_url) {
            return Some(repo_url);
        }
        let Some(cipher) = &self.cipher else {
            return Some(repo_url);
        };

        match self.credentials.encrypted_access_token(&service.owner_id).await {
            Ok(Some(sealed)) => match cipher.decrypt(&sealed) {
                Ok(token) => Some(authenticated_repo_url(&repo_url, &token)),
                Err(error) => {
                    warn!(service_id = %service.id, "failed to decrypt access token: {error}");
                    Some(repo_url)
                }
            },
            Ok(None) => Some(repo_url),
            Err(error) => {
                warn!(service_id = %service.id, "failed to load access token: {error}");
                Some(repo_url)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{DbCredentials, NoCredentials};
    use crate::db::tests::{sample_service, temp_db};
    use crate::queue::SqliteQueue;
    use anyhow::Result;
    use async_trait::async_trait;
    use base64::Engine;

    struct FixedCredentials {
        sealed: String,
    }

    #[async_trait]
    impl CredentialStore for FixedCredentials {
        async fn encrypted_access_token(&self, _owner_id: &str) -> Result<Option<String>> {
            Ok(Some(self.sealed.clone()))
        }
    }

    async fn orchestrator_with(
        credentials: Arc<dyn CredentialStore>,
        cipher: Option<TokenCipher>,
    ) -> (DeploymentOrchestrator, DbClient, Arc<SqliteQueue>) {
        let db = temp_db().await;
        let queue = Arc::new(SqliteQueue::new(db.clone()));
        let orchestrator =
            DeploymentOrchestrator::new(db.clone(), queue.clone(), credentials, cipher);
        (orchestrator, db, queue)
    }

    #[tokio::test]
    async fn create_and_queue_inserts_row_and_job() {
        let (orchestrator, db, queue) =
            orchestrator_with(Arc::new(NoCredentials), None).await;
        db.insert_service(&sample_service("svc-1", "owner-1", "api"))
            .await
            .expect("insert service");

        let deployment = orchestrator
            .create_and_queue(Some("owner-1"), "svc-1", DeployTrigger::default())
            .await
            .expect("deploy");
        assert_eq!(deployment.status, "QUEUED");
        assert_eq!(deployment.branch.as_deref(), Some("main"));

        let leased = queue
            .dequeue(60)
            .await
            .expect("dequeue")
            .expect("job queued");
        assert_eq!(leased.job.deployment_id, deployment.id);
        assert_eq!(leased.job.service_name, "api");

        let service = db
            .get_service("svc-1")
            .await
            .expect("get")
            .expect("service");
        assert_eq!(service.status, "DEPLOYING");
    }

    #[tokio::test]
    async fn foreign_and_tombstoned_services_read_as_missing() {
        let (orchestrator, db, _queue) =
            orchestrator_with(Arc::new(NoCredentials), None).await;
        db.insert_service(&sample_service("svc-1", "owner-1", "api"))
            .await
            .expect("insert service");

        let foreign = orchestrator
            .create_and_queue(Some("owner-2"), "svc-1", DeployTrigger::default())
            .await;
        assert!(matches!(foreign, Err(EngineError::NotFound(_))));

        db.set_deleted_at("svc-1", Some("2026-08-26T00:00:00Z"))
            .await
            .expect("tombstone");
        let tombstoned = orchestrator
            .create_and_queue(Some("owner-1"), "svc-1", DeployTrigger::default())
            .await;
        assert!(matches!(tombstoned, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn access_token_reaches_job_but_never_the_db() {
        let key = base64::engine::general_purpose::STANDARD.encode([3_u8; 32]);
        let cipher = TokenCipher::from_base64_key(&key).expect("cipher");
        let sealed = cipher.encrypt("ghs_secret_token").expect("encrypt");

        let (orchestrator, db, queue) = orchestrator_with(
            Arc::new(FixedCredentials { sealed }),
            Some(cipher),
        )
        .await;
        db.insert_service(&sample_service("svc-1", "owner-1", "api"))
            .await
            .expect("insert service");

        let deployment = orchestrator
            .create_and_queue(Some("owner-1"), "svc-1", DeployTrigger::default())
            .await
            .expect("deploy");

        let leased = queue
            .dequeue(60)
            .await
            .expect("dequeue")
            .expect("job queued");
        let repo_url = leased.job.repo_url.expect("repo url");
        assert!(repo_url.contains("x-access-token:ghs_secret_token@"));

        // The stored service and deployment rows stay token-free.
        let service = db
            .get_service("svc-1")
            .await
            .expect("get")
            .expect("service");
        assert_eq!(
            service.repo_url.as_deref(),
            Some("https://github.com/acme/widgets")
        );
        let stored = db
            .get_deployment(&deployment.id)
            .await
            .expect("get")
            .expect("deployment");
        assert!(serde_json::to_string(&stored)
            .expect("serialize")
            .find("ghs_secret_token")
            .is_none());
    }

    #[tokio::test]
    async fn db_backed_store_feeds_the_token_splice() {
        let key = base64::engine::general_purpose::STANDARD.encode([5_u8; 32]);
        let cipher = TokenCipher::from_base64_key(&key).expect("cipher");

        let db = temp_db().await;
        let queue = Arc::new(SqliteQueue::new(db.clone()));
        let orchestrator = DeploymentOrchestrator::new(
            db.clone(),
            queue.clone(),
            Arc::new(DbCredentials::new(db.clone())),
            Some(cipher.clone()),
        );

        let sealed = cipher.encrypt("ghs_from_db").expect("encrypt");
        db.upsert_encrypted_access_token("owner-1", &sealed)
            .await
            .expect("store token");
        db.insert_service(&sample_service("svc-1", "owner-1", "api"))
            .await
            .expect("insert service");

        orchestrator
            .create_and_queue(Some("owner-1"), "svc-1", DeployTrigger::default())
            .await
            .expect("deploy");

        let leased = queue
            .dequeue(60)
            .await
            .expect("dequeue")
            .expect("job queued");
        assert!(leased
            .job
            .repo_url
            .expect("repo_url")
            .contains("x-access-token:ghs_from_db@"));
    }

    #[tokio::test]
    async fn update_status_walks_the_state_machine() {
        let (orchestrator, db, _queue) =
            orchestrator_with(Arc::new(NoCredentials), None).await;
        db.insert_service(&sample_service("svc-1", "owner-1", "api"))
            .await
            .expect("insert service");

        let deployment = orchestrator
            .create_and_queue(Some("owner-1"), "svc-1", DeployTrigger::default())
            .await
            .expect("deploy");

        orchestrator
            .update_status(&deployment.id, "BUILDING", None, None)
            .await
            .expect("to building");
        let finished = orchestrator
            .update_status(
                &deployment.id,
                "SUCCESS",
                Some("done"),
                Some("registry/api:1"),
            )
            .await
            .expect("to success");
        assert_eq!(finished.status, "SUCCESS");

        let service = db
            .get_service("svc-1")
            .await
            .expect("get")
            .expect("service");
        assert_eq!(service.status, "RUNNING");

        // Terminal states reject further transitions.
        let stopped = orchestrator
            .update_status(&deployment.id, "STOPPED", None, None)
            .await
            .expect("to stopped");
        assert_eq!(stopped.status, "STOPPED");
        let revived = orchestrator
            .update_status(&deployment.id, "BUILDING", None, None)
            .await;
        assert!(matches!(revived, Err(EngineError::Conflict(_))));
    }

    #[tokio::test]
    async fn history_count_and_bulk_delete_are_ownership_checked() {
        let (orchestrator, db, _queue) =
            orchestrator_with(Arc::new(NoCredentials), None).await;
        db.insert_service(&sample_service("svc-1", "owner-1", "api"))
            .await
            .expect("insert service");

        for _ in 0..3 {
            orchestrator
                .create_and_queue(Some("owner-1"), "svc-1", DeployTrigger::default())
                .await
                .expect("deploy");
        }

        assert_eq!(
            orchestrator
                .count_for_service(Some("owner-1"), "svc-1")
                .await
                .expect("count"),
            3
        );
        assert!(matches!(
            orchestrator.count_for_service(Some("owner-2"), "svc-1").await,
            Err(EngineError::NotFound(_))
        ));

        orchestrator
            .delete_for_service(Some("owner-1"), "svc-1")
            .await
            .expect("delete history");
        assert_eq!(
            orchestrator
                .count_for_service(Some("owner-1"), "svc-1")
                .await
                .expect("count after delete"),
            0
        );
    }

    #[tokio::test]
    async fn update_status_rejects_unknown_status_strings() {
        let (orchestrator, db, _queue) =
            orchestrator_with(Arc::new(NoCredentials), None).await;
        db.insert_service(&sample_service("svc-1", "owner-1", "api"))
            .await
            .expect("insert service");
        let deployment = orchestrator
            .create_and_queue(Some("owner-1"), "svc-1", DeployTrigger::default())
            .await
            .expect("deploy");

        let result = orchestrator
            .update_status(&deployment.id, "EXPLODED", None, None)
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
