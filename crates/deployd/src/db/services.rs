use anyhow::Result;

use super::types::{NewService, RepoMatch, ServiceRecord};
use super::DbClient;

const SERVICE_COLUMNS: &str = "id, owner_id, environment_id, name, service_type, repo_url, \
     branch, build_command, start_command, static_output_dir, port, env_vars, custom_domain, \
     status, is_preview, preview_pr_number, delete_protected, deleted_at, created_at, updated_at";

impl DbClient {
    /// # Errors
    /// Returns an error if the insert fails, including unique index
    /// violations for duplicate live names.
    pub async fn insert_service(&self, service: &NewService) -> Result<()> {
        sqlx::query(
            "INSERT INTO services (id, owner_id, environment_id, name, service_type, repo_url, \
             branch, build_command, start_command, static_output_dir, port, env_vars, \
             custom_domain, is_preview, preview_pr_number) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(&service.id)
        .bind(&service.owner_id)
        .bind(&service.environment_id)
        .bind(&service.name)
        .bind(service.service_type.as_str())
        .bind(&service.repo_url)
        .bind(&service.branch)
        .bind(&service.build_command)
        .bind(&service.start_command)
        .bind(&service.static_output_dir)
        .bind(service.port)
        .bind(&service.env_vars)
        .bind(&service.custom_domain)
        .bind(service.is_preview)
        .bind(service.preview_pr_number)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetches a service by id, tombstoned rows included.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_service(&self, service_id: &str) -> Result<Option<ServiceRecord>> {
        let row = sqlx::query_as::<_, ServiceRecord>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"
        ))
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Lists an owner's live services, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_services_for_owner(&self, owner_id: &str) -> Result<Vec<ServiceRecord>> {
        let rows = sqlx::query_as::<_, ServiceRecord>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services \
             WHERE owner_id = ?1 AND deleted_at IS NULL \
             ORDER BY created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Finds a service by owner, environment, and name, tombstoned rows
    /// included so callers can decide whether to resurrect.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_by_owner_and_name(
        &self,
        owner_id: &str,
        environment_id: Option<&str>,
        name: &str,
    ) -> Result<Option<ServiceRecord>> {
        let row = sqlx::query_as::<_, ServiceRecord>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services \
             WHERE owner_id = ?1 AND coalesce(environment_id, '') = coalesce(?2, '') \
             AND name = ?3 \
             ORDER BY deleted_at IS NOT NULL, created_at DESC \
             LIMIT 1"
        ))
        .bind(owner_id)
        .bind(environment_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn update_service(&self, record: &ServiceRecord) -> Result<()> {
        sqlx::query(
            "UPDATE services SET name = ?2, service_type = ?3, repo_url = ?4, branch = ?5, \
             build_command = ?6, start_command = ?7, static_output_dir = ?8, port = ?9, \
             env_vars = ?10, custom_domain = ?11, status = ?12, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE id = ?1",
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.service_type)
        .bind(&record.repo_url)
        .bind(&record.branch)
        .bind(&record.build_command)
        .bind(&record.start_command)
        .bind(&record.static_output_dir)
        .bind(record.port)
        .bind(&record.env_vars)
        .bind(&record.custom_domain)
        .bind(&record.status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn set_service_status(&self, service_id: &str, status: &str) -> Result<()> {
        sqlx::query(
            "UPDATE services SET status = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE id = ?1",
        )
        .bind(service_id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Sets or clears the tombstone. `deleted_at` of `None` resurrects
    /// the row.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn set_deleted_at(&self, service_id: &str, deleted_at: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE services SET deleted_at = ?2, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE id = ?1",
        )
        .bind(service_id)
        .bind(deleted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn set_delete_protected(&self, service_id: &str, protected: bool) -> Result<()> {
        sqlx::query(
            "UPDATE services SET delete_protected = ?2, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE id = ?1",
        )
        .bind(service_id)
        .bind(protected)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Permanently removes the service row.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete_service_row(&self, service_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM services WHERE id = ?1")
            .bind(service_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Counts an owner's live, non-preview services for quota checks.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_live_services_for_owner(&self, owner_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM services \
             WHERE owner_id = ?1 AND deleted_at IS NULL AND is_preview = 0",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// A name is available when no live row holds it in the same scope.
    /// Tombstoned rows do not reserve their names.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn is_name_available(
        &self,
        owner_id: &str,
        environment_id: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM services \
             WHERE owner_id = ?1 AND coalesce(environment_id, '') = coalesce(?2, '') \
             AND name = ?3 AND deleted_at IS NULL",
        )
        .bind(owner_id)
        .bind(environment_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(count == 0)
    }

    /// Finds live, non-preview services tracking the given repository
    /// and branch, for push fan-out.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_push_targets(
        &self,
        repo: &RepoMatch,
        branch: &str,
    ) -> Result<Vec<ServiceRecord>> {
        let rows = sqlx::query_as::<_, ServiceRecord>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services \
             WHERE deleted_at IS NULL AND is_preview = 0 AND branch = ?2 \
             AND LOWER(RTRIM(repo_url, '/')) IN (?1, ?1 || '.git')"
        ))
        .bind(repo.bare())
        .bind(branch)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Finds the live, non-preview service to clone preview
    /// environments from.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_base_service(&self, repo: &RepoMatch) -> Result<Option<ServiceRecord>> {
        let row = sqlx::query_as::<_, ServiceRecord>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services \
             WHERE deleted_at IS NULL AND is_preview = 0 \
             AND LOWER(RTRIM(repo_url, '/')) IN (?1, ?1 || '.git') \
             ORDER BY created_at ASC \
             LIMIT 1"
        ))
        .bind(repo.bare())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Finds the live preview service for a pull request on the given
    /// repository.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_preview_service(
        &self,
        repo: &RepoMatch,
        pr_number: i64,
    ) -> Result<Option<ServiceRecord>> {
        let row = sqlx::query_as::<_, ServiceRecord>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services \
             WHERE deleted_at IS NULL AND is_preview = 1 AND preview_pr_number = ?2 \
             AND LOWER(RTRIM(repo_url, '/')) IN (?1, ?1 || '.git') \
             LIMIT 1"
        ))
        .bind(repo.bare())
        .bind(pr_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
