use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::DbClient;

/// Message handed to build workers. Carries everything the worker needs
/// so it never has to call back for service details mid-build.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildJob {
    pub deployment_id: String,
    pub service_id: String,
    pub service_name: String,
    pub service_type: String,
    pub repo_url: Option<String>,
    pub branch: String,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub static_output_dir: Option<String>,
    pub port: i64,
    pub env_vars: BTreeMap<String, String>,
    pub custom_domain: Option<String>,
    pub correlation_id: Option<String>,
}

/// A job claimed by a worker. The lease id is the handle for acking.
#[derive(Clone, Debug)]
pub struct LeasedJob {
    pub lease_id: String,
    pub attempts: i64,
    pub job: BuildJob,
}

/// Durable at-least-once work queue for build jobs. A dequeued job
/// stays invisible until its lease expires; unacked jobs are
/// redelivered.
#[async_trait]
pub trait BuildQueue: Send + Sync {
    /// Enqueues a job, keyed by deployment id. Re-enqueueing the same
    /// deployment is a no-op.
    async fn enqueue(&self, job: &BuildJob) -> Result<()>;

    /// Claims the oldest available job, extending its lease by
    /// `lease_seconds`.
    async fn dequeue(&self, lease_seconds: i64) -> Result<Option<LeasedJob>>;

    /// Acknowledges a completed job, removing it permanently.
    async fn ack(&self, lease_id: &str) -> Result<()>;
}

/// Queue backed by the engine's own SQLite database, so enqueue shares
/// durability with the deployment rows it references.
#[derive(Clone)]
pub struct SqliteQueue {
    db: DbClient,
}

impl SqliteQueue {
    #[must_use]
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BuildQueue for SqliteQueue {
    async fn enqueue(&self, job: &BuildJob) -> Result<()> {
        let payload = serde_json::to_string(job)?;

        sqlx::query(
            "INSERT INTO build_jobs (id, deployment_id, payload) VALUES (?1, ?2, ?3) \
             ON CONFLICT (deployment_id) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&job.deployment_id)
        .bind(&payload)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn dequeue(&self, lease_seconds: i64) -> Result<Option<LeasedJob>> {
        let row = sqlx::query_as::<_, (String, String, i64)>(
            "UPDATE build_jobs SET \
             attempts = attempts + 1, \
             lease_expires_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now', printf('+%d seconds', ?1)) \
             WHERE id = ( \
                 SELECT id FROM build_jobs \
                 WHERE available_at <= strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
                 AND (lease_expires_at IS NULL \
                      OR lease_expires_at <= strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
                 ORDER BY created_at ASC, rowid ASC \
                 LIMIT 1 \
             ) \
             RETURNING id, payload, attempts",
        )
        .bind(lease_seconds)
        .fetch_optional(self.db.pool())
        .await?;

        let Some((lease_id, payload, attempts)) = row else {
            return Ok(None);
        };

        let job: BuildJob = serde_json::from_str(&payload)?;

        Ok(Some(LeasedJob {
            lease_id,
            attempts,
            job,
        }))
    }

    async fn ack(&self, lease_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM build_jobs WHERE id = ?1")
            .bind(lease_id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }
}
