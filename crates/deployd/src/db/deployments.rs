use anyhow::Result;

use super::types::{DeploymentRecord, NewDeployment};
use super::DbClient;

const DEPLOYMENT_COLUMNS: &str = "id, service_id, status, commit_sha, commit_message, branch, \
     image_tag, logs, correlation_id, created_at, updated_at";

impl DbClient {
    /// Inserts a new deployment in QUEUED state.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_deployment(&self, deployment: &NewDeployment) -> Result<()> {
        sqlx::query(
            "INSERT INTO deployments (id, service_id, status, commit_sha, commit_message, \
             branch, correlation_id) VALUES (?1, ?2, 'QUEUED', ?3, ?4, ?5, ?6)",
        )
        .bind(&deployment.id)
        .bind(&deployment.service_id)
        .bind(&deployment.commit_sha)
        .bind(&deployment.commit_message)
        .bind(&deployment.branch)
        .bind(&deployment.correlation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_deployment(&self, deployment_id: &str) -> Result<Option<DeploymentRecord>> {
        let row = sqlx::query_as::<_, DeploymentRecord>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE id = ?1"
        ))
        .bind(deployment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Lists a service's deployments, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_deployments_for_service(
        &self,
        service_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeploymentRecord>> {
        let rows = sqlx::query_as::<_, DeploymentRecord>(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments \
             WHERE service_id = ?1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT ?2 OFFSET ?3"
        ))
        .bind(service_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Updates a deployment's status, appending build logs and the
    /// produced image tag when provided.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn update_deployment_status(
        &self,
        deployment_id: &str,
        status: &str,
        logs: Option<&str>,
        image_tag: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE deployments SET status = ?2, \
             logs = coalesce(?3, logs), \
             image_tag = coalesce(?4, image_tag), \
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE id = ?1",
        )
        .bind(deployment_id)
        .bind(status)
        .bind(logs)
        .bind(image_tag)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete_deployments_for_service(&self, service_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM deployments WHERE service_id = ?1")
            .bind(service_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_deployments_for_service(&self, service_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM deployments WHERE service_id = ?1")
                .bind(service_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Distinct image tags ever produced for a service, for image
    /// reclamation during hard delete.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_image_tags_for_service(&self, service_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT image_tag FROM deployments \
             WHERE service_id = ?1 AND image_tag IS NOT NULL",
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(tag,)| tag).collect())
    }
}
