use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;
use uuid::Uuid;

use crate::db::types::{NewService, ServiceRecord, ServiceStatus, ServiceType};
use crate::db::DbClient;
use crate::errors::{EngineError, EngineResult};
use crate::quota::QuotaCapability;
use crate::runtime::ContainerRuntime;

pub mod reclaim;

pub use reclaim::{ReclaimReport, StepOutcome};

const MAX_NAME_LENGTH: usize = 63;
const GENERATED_SECRET_LENGTH: usize = 32;

#[derive(Clone, Debug)]
pub struct CreateServiceInput {
    pub name: String,
    pub service_type: ServiceType,
    pub environment_id: Option<String>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub static_output_dir: Option<String>,
    pub port: Option<i64>,
    pub env_vars: BTreeMap<String, String>,
    pub custom_domain: Option<String>,
}

/// Partial update. `None` fields are left untouched; provided env vars
/// are merged over the existing map, except generated datastore
/// secrets, which keep their stored value.
#[derive(Clone, Debug, Default)]
pub struct ServicePatch {
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub static_output_dir: Option<String>,
    pub port: Option<i64>,
    pub env_vars: Option<BTreeMap<String, String>>,
    pub custom_domain: Option<String>,
}

/// Owns service creation, mutation, and the two-stage delete flow.
#[derive(Clone)]
pub struct ServiceLifecycleManager {
    db: DbClient,
    runtime: Arc<dyn ContainerRuntime>,
    quota: Arc<dyn QuotaCapability>,
    default_plan: String,
}

impl ServiceLifecycleManager {
    #[must_use]
    pub fn new(
        db: DbClient,
        runtime: Arc<dyn ContainerRuntime>,
        quota: Arc<dyn QuotaCapability>,
        default_plan: String,
    ) -> Self {
        Self {
            db,
            runtime,
            quota,
            default_plan,
        }
    }

    /// Creates a service, or updates it when the caller already owns
    /// one with the same name in the same environment. A tombstoned row
    /// with a matching name is resurrected: its tombstone is cleared
    /// and the new definition applied over it, keeping its deployment
    /// history.
    ///
    /// # Errors
    /// Returns `Validation` for bad input, `Forbidden` when the plan's
    /// service cap is reached, and `NotFound`/`Conflict` per the usual
    /// visibility rules.
    pub async fn create_or_update(
        &self,
        caller_id: &str,
        input: CreateServiceInput,
    ) -> EngineResult<ServiceRecord> {
        let name = normalize_name(&input.name)?;

        let existing = self
            .db
            .find_by_owner_and_name(caller_id, input.environment_id.as_deref(), &name)
            .await?;

        if let Some(mut existing) = existing {
            if existing.is_deleted() {
                self.db.set_deleted_at(&existing.id, None).await?;
                existing.deleted_at = None;
                existing.status = ServiceStatus::Idle.as_str().to_string();
                info!(service_id = %existing.id, name = %existing.name, "resurrected service");
            }
            return self
                .apply_patch(
                    existing,
                    ServicePatch {
                        repo_url: input.repo_url,
                        branch: input.branch,
                        build_command: input.build_command,
                        start_command: input.start_command,
                        static_output_dir: input.static_output_dir,
                        port: input.port,
                        env_vars: Some(input.env_vars),
                        custom_domain: input.custom_domain,
                    },
                )
                .await;
        }

        self.enforce_quota(caller_id).await?;
        self.insert_new(caller_id, &name, input, false, None).await
    }

    /// Creates or refreshes the preview service for a pull request,
    /// cloned from `base`. Previews bypass the service quota and live
    /// under the name `{base}-pr-{number}`.
    ///
    /// # Errors
    /// Returns an error if persistence fails.
    pub async fn upsert_preview(
        &self,
        base: &ServiceRecord,
        pr_number: i64,
        head_ref: &str,
    ) -> EngineResult<ServiceRecord> {
        let repo = crate::db::types::RepoMatch::new(base.repo_url.as_deref().unwrap_or_default());
        if let Some(mut preview) = self.db.find_preview_service(&repo, pr_number).await? {
            // A refreshed preview tracks the PR head and goes back to
            // IDLE until its new deployment lands.
            preview.branch = head_ref.to_string();
            preview.status = ServiceStatus::Idle.as_str().to_string();
            self.db.update_service(&preview).await?;
            return Ok(preview);
        }

        let name = format!("{}-pr-{pr_number}", base.name);
        let input = CreateServiceInput {
            name: name.clone(),
            service_type: base
                .parsed_type()
                .ok_or_else(|| EngineError::conflict("base service has unrecognized type"))?,
            environment_id: base.environment_id.clone(),
            repo_url: base.repo_url.clone(),
            branch: Some(head_ref.to_string()),
            build_command: base.build_command.clone(),
            start_command: base.start_command.clone(),
            static_output_dir: base.static_output_dir.clone(),
            port: Some(base.port),
            env_vars: base.env_map(),
            custom_domain: None,
        };

        let record = self
            .insert_new(&base.owner_id, &name, input, true, Some(pr_number))
            .await?;
        info!(service_id = %record.id, pr_number, "created preview service");
        Ok(record)
    }

    /// # Errors
    /// Returns `NotFound` when the service is missing, tombstoned, or
    /// owned by someone else.
    pub async fn get_service(
        &self,
        caller_id: &str,
        service_id: &str,
    ) -> EngineResult<ServiceRecord> {
        self.visible_service(caller_id, service_id).await
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_user_services(&self, caller_id: &str) -> EngineResult<Vec<ServiceRecord>> {
        let services = self.db.list_services_for_owner(caller_id).await?;
        Ok(services)
    }

    /// # Errors
    /// Returns `NotFound` per visibility rules and `Validation` for bad
    /// fields.
    pub async fn update_service(
        &self,
        caller_id: &str,
        service_id: &str,
        patch: ServicePatch,
    ) -> EngineResult<ServiceRecord> {
        let existing = self.visible_service(caller_id, service_id).await?;
        self.apply_patch(existing, patch).await
    }

    /// Tombstones the service, then reclaims its infrastructure best
    /// effort. The tombstone lands before any engine call, so the
    /// service reads as deleted even if reclamation fails partway.
    ///
    /// # Errors
    /// Returns `Forbidden` when delete protection is on, `NotFound` per
    /// visibility rules.
    pub async fn soft_delete(
        &self,
        caller_id: &str,
        service_id: &str,
    ) -> EngineResult<ReclaimReport> {
        let service = self.visible_service(caller_id, service_id).await?;
        if service.delete_protected {
            return Err(EngineError::forbidden("service is delete-protected"));
        }

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.db.set_deleted_at(&service.id, Some(&now)).await?;

        let image_tags = self.db.list_image_tags_for_service(&service.id).await?;
        let report = reclaim::reclaim_service(self.runtime.as_ref(), &service, &image_tags).await;
        info!(
            service_id = %service.id,
            clean = report.fully_clean(),
            "soft-deleted service"
        );

        Ok(report)
    }

    /// Clears a tombstone, leaving every other field untouched. No
    /// infrastructure is rebuilt; the next deployment does that.
    ///
    /// # Errors
    /// Returns `Conflict` when the service is not tombstoned or its
    /// name has since been taken, `NotFound` per visibility rules.
    pub async fn recover(&self, caller_id: &str, service_id: &str) -> EngineResult<ServiceRecord> {
        let service = self
            .db
            .get_service(service_id)
            .await?
            .filter(|record| record.owner_id == caller_id)
            .ok_or_else(|| EngineError::not_found("service not found"))?;

        if !service.is_deleted() {
            return Err(EngineError::conflict("service is not deleted"));
        }
        if !self
            .db
            .is_name_available(&service.owner_id, service.environment_id.as_deref(), &service.name)
            .await?
        {
            return Err(EngineError::conflict(
                "service name has been reused; recovery would collide",
            ));
        }

        self.db.set_deleted_at(&service.id, None).await?;

        let record = self.visible_service(caller_id, service_id).await?;
        Ok(record)
    }

    /// # Errors
    /// Returns `NotFound` per visibility rules.
    pub async fn set_delete_protection(
        &self,
        caller_id: &str,
        service_id: &str,
        protected: bool,
    ) -> EngineResult<ServiceRecord> {
        let service = self.visible_service(caller_id, service_id).await?;
        self.db.set_delete_protected(&service.id, protected).await?;

        let record = self.visible_service(caller_id, service_id).await?;
        Ok(record)
    }

    /// Permanently removes a service, its deployments, and its
    /// infrastructure. Absent services are a successful no-op so
    /// webhook-driven teardown can be retried freely. A `caller_id` of
    /// `None` is the system acting on its own (preview teardown).
    ///
    /// # Errors
    /// Returns `Forbidden` when delete protection is on, `NotFound`
    /// when the caller does not own the service.
    pub async fn hard_delete(
        &self,
        caller_id: Option<&str>,
        service_id: &str,
    ) -> EngineResult<Option<ReclaimReport>> {
        let Some(service) = self.db.get_service(service_id).await? else {
            return Ok(None);
        };
        if let Some(caller_id) = caller_id {
            if service.owner_id != caller_id {
                return Err(EngineError::not_found("service not found"));
            }
        }
        if service.delete_protected {
            return Err(EngineError::forbidden("service is delete-protected"));
        }

        let image_tags = self.db.list_image_tags_for_service(&service.id).await?;
        let report = reclaim::reclaim_service(self.runtime.as_ref(), &service, &image_tags).await;

        self.db.delete_deployments_for_service(&service.id).await?;
        self.db.delete_service_row(&service.id).await?;
        info!(
            service_id = %service.id,
            clean = report.fully_clean(),
            "hard-deleted service"
        );

        Ok(Some(report))
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn is_name_available(
        &self,
        caller_id: &str,
        environment_id: Option<&str>,
        name: &str,
    ) -> EngineResult<bool> {
        let name = normalize_name(name)?;
        let available = self
            .db
            .is_name_available(caller_id, environment_id, &name)
            .await?;
        Ok(available)
    }

    async fn insert_new(
        &self,
        owner_id: &str,
        name: &str,
        input: CreateServiceInput,
        is_preview: bool,
        preview_pr_number: Option<i64>,
    ) -> EngineResult<ServiceRecord> {
        let mut env_vars = input.env_vars;
        apply_type_defaults(input.service_type, name, &mut env_vars);

        let port = input
            .port
            .unwrap_or_else(|| input.service_type.default_port());
        if !(1..=65535).contains(&port) {
            return Err(EngineError::validation(format!("invalid port: {port}")));
        }

        let service = NewService {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            environment_id: input.environment_id,
            name: name.to_string(),
            service_type: input.service_type,
            repo_url: input.repo_url,
            branch: input.branch.unwrap_or_else(|| "main".to_string()),
            build_command: input.build_command,
            start_command: input.start_command,
            static_output_dir: input.static_output_dir,
            port,
            env_vars: Some(serde_json::to_string(&env_vars).map_err(anyhow::Error::from)?),
            custom_domain: input.custom_domain,
            is_preview,
            preview_pr_number,
        };

        self.db.insert_service(&service).await?;
        info!(service_id = %service.id, name = %service.name, "created service");

        let record = self
            .db
            .get_service(&service.id)
            .await?
            .ok_or_else(|| EngineError::not_found("service not found after insert"))?;
        Ok(record)
    }

    async fn apply_patch(
        &self,
        mut record: ServiceRecord,
        patch: ServicePatch,
    ) -> EngineResult<ServiceRecord> {
        if let Some(repo_url) = patch.repo_url {
            record.repo_url = Some(repo_url);
        }
        if let Some(branch) = patch.branch {
            record.branch = branch;
        }
        if let Some(build_command) = patch.build_command {
            record.build_command = Some(build_command);
        }
        if let Some(start_command) = patch.start_command {
            record.start_command = Some(start_command);
        }
        if let Some(static_output_dir) = patch.static_output_dir {
            record.static_output_dir = Some(static_output_dir);
        }
        if let Some(port) = patch.port {
            if !(1..=65535).contains(&port) {
                return Err(EngineError::validation(format!("invalid port: {port}")));
            }
            record.port = port;
        }
        if let Some(custom_domain) = patch.custom_domain {
            record.custom_domain = Some(custom_domain);
        }
        if let Some(new_env) = patch.env_vars {
            let mut merged = record.env_map();
            for (key, value) in new_env {
                // Generated secrets stick once present; later writes,
                // even explicit ones, never rotate them here.
                if is_generated_secret_key(&key) && merged.contains_key(&key) {
                    continue;
                }
                merged.insert(key, value);
            }
            record.env_vars =
                Some(serde_json::to_string(&merged).map_err(anyhow::Error::from)?);
        }

        self.db.update_service(&record).await?;

        let updated = self
            .db
            .get_service(&record.id)
            .await?
            .ok_or_else(|| EngineError::not_found("service not found"))?;
        Ok(updated)
    }

    async fn enforce_quota(&self, owner_id: &str) -> EngineResult<()> {
        let limits = self
            .quota
            .resource_limits(&self.default_plan)
            .await
            .map_err(EngineError::System)?;

        if let Some(max_services) = limits.max_services {
            let live = self.db.count_live_services_for_owner(owner_id).await?;
            if live >= max_services {
                return Err(EngineError::forbidden(format!(
                    "plan allows at most {max_services} services"
                )));
            }
        }

        Ok(())
    }

    async fn visible_service(
        &self,
        caller_id: &str,
        service_id: &str,
    ) -> EngineResult<ServiceRecord> {
        let service = self
            .db
            .get_service(service_id)
            .await?
            .filter(|record| !record.is_deleted() && record.owner_id == caller_id)
            .ok_or_else(|| EngineError::not_found("service not found"))?;
        Ok(service)
    }
}

fn normalize_name(raw: &str) -> EngineResult<String> {
    let name = raw.trim().to_lowercase();
    if name.is_empty() {
        return Err(EngineError::validation("service name must not be empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(EngineError::validation(format!(
            "service name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
        || name.starts_with('-')
        || name.ends_with('-')
    {
        return Err(EngineError::validation(
            "service name may only contain lowercase letters, digits, and inner dashes",
        ));
    }
    Ok(name)
}

/// Fills in type-specific env defaults. Caller-provided values always
/// win; generated passwords are created once and never rotated here.
fn apply_type_defaults(
    service_type: ServiceType,
    name: &str,
    env_vars: &mut BTreeMap<String, String>,
) {
    let mut default = |key: &str, value: String| {
        env_vars.entry(key.to_string()).or_insert(value);
    };

    match service_type {
        ServiceType::Postgres => {
            default("POSTGRES_USER", "deployd".to_string());
            default("POSTGRES_PASSWORD", generate_secret());
            default("POSTGRES_DB", name.to_string());
        }
        ServiceType::Redis => {
            default("REDIS_PASSWORD", generate_secret());
        }
        ServiceType::Mysql => {
            default("MYSQL_ROOT_PASSWORD", generate_secret());
            default("MYSQL_DATABASE", name.to_string());
        }
        ServiceType::Docker | ServiceType::Static | ServiceType::Compose => {}
    }
}

fn is_generated_secret_key(key: &str) -> bool {
    matches!(
        key,
        "POSTGRES_PASSWORD" | "REDIS_PASSWORD" | "MYSQL_ROOT_PASSWORD"
    )
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests;
