use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::db::types::{DeploymentRecord, ServiceRecord, ServiceType};
use crate::lifecycle::{ReclaimReport, StepOutcome};

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub service_type: ServiceType,
    #[serde(default)]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub static_output_dir: Option<String>,
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub custom_domain: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateServiceRequest {
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub static_output_dir: Option<String>,
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub env_vars: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub custom_domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProtectionRequest {
    pub protected: bool,
}

#[derive(Debug, Deserialize)]
pub struct NameAvailableQuery {
    pub name: String,
    #[serde(default)]
    pub environment_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NameAvailableResponse {
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct ServiceResponse {
    pub id: String,
    pub name: String,
    pub service_type: String,
    pub environment_id: Option<String>,
    pub repo_url: Option<String>,
    pub branch: String,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub static_output_dir: Option<String>,
    pub port: i64,
    pub env_vars: BTreeMap<String, String>,
    pub custom_domain: Option<String>,
    pub status: String,
    pub is_preview: bool,
    pub preview_pr_number: Option<i64>,
    pub delete_protected: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[must_use]
pub fn map_service_record(record: ServiceRecord) -> ServiceResponse {
    let env_vars = record.env_map();
    ServiceResponse {
        id: record.id,
        name: record.name,
        service_type: record.service_type,
        environment_id: record.environment_id,
        repo_url: record.repo_url,
        branch: record.branch,
        build_command: record.build_command,
        start_command: record.start_command,
        static_output_dir: record.static_output_dir,
        port: record.port,
        env_vars,
        custom_domain: record.custom_domain,
        status: record.status,
        is_preview: record.is_preview,
        preview_pr_number: record.preview_pr_number,
        delete_protected: record.delete_protected,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateDeploymentRequest {
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeploymentListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct DeploymentResponse {
    pub id: String,
    pub service_id: String,
    pub status: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub branch: Option<String>,
    pub image_tag: Option<String>,
    pub logs: Option<String>,
    pub correlation_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[must_use]
pub fn map_deployment_record(record: DeploymentRecord) -> DeploymentResponse {
    DeploymentResponse {
        id: record.id,
        service_id: record.service_id,
        status: record.status,
        commit_sha: record.commit_sha,
        commit_message: record.commit_message,
        branch: record.branch,
        image_tag: record.image_tag,
        logs: record.logs,
        correlation_id: record.correlation_id,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

#[derive(Debug, Serialize)]
pub struct ReclaimStepItem {
    pub name: String,
    pub outcome: String,
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub fully_reclaimed: bool,
    pub steps: Vec<ReclaimStepItem>,
}

#[must_use]
pub fn map_reclaim_report(report: &ReclaimReport) -> DeleteResponse {
    DeleteResponse {
        deleted: true,
        fully_reclaimed: report.fully_clean(),
        steps: report
            .steps
            .iter()
            .map(|step| ReclaimStepItem {
                name: step.name.clone(),
                outcome: match step.outcome {
                    StepOutcome::Success => "success",
                    StepOutcome::Skipped => "skipped",
                    StepOutcome::Error => "error",
                }
                .to_string(),
                detail: step.detail.clone(),
            })
            .collect(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub tail: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub deployments_queued: usize,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
    #[serde(default)]
    pub logs: Option<String>,
    #[serde(default)]
    pub image_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeaseRequest {
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,
}

fn default_lease_seconds() -> i64 {
    300
}

#[derive(Debug, Serialize)]
pub struct LeaseResponse {
    pub lease_id: String,
    pub attempts: i64,
    pub job: crate::queue::BuildJob,
}

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    pub lease_id: String,
}
