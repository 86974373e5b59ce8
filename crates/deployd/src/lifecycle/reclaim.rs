use std::time::Duration;

use futures::{stream, StreamExt};
use tracing::warn;

use crate::db::types::{ServiceRecord, ServiceType};
use crate::runtime::{ContainerFilter, ContainerRuntime};

/// Label stamped on every container the engine creates.
pub const SERVICE_ID_LABEL: &str = "deployd.service.id";

/// Label compose puts on everything belonging to a project.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

const STOP_GRACE: Duration = Duration::from_secs(10);
const RECLAIM_CONCURRENCY: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Skipped,
    Error,
}

#[derive(Clone, Debug)]
pub struct ReclaimStep {
    pub name: String,
    pub outcome: StepOutcome,
    pub detail: Option<String>,
}

impl ReclaimStep {
    fn success(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Success,
            detail: None,
        }
    }

    fn skipped(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Skipped,
            detail: Some(detail.into()),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Error,
            detail: Some(detail.into()),
        }
    }
}

/// Outcome of a best-effort infrastructure reclamation. Individual step
/// failures are recorded, never propagated; the database tombstone
/// remains authoritative regardless.
#[derive(Clone, Debug, Default)]
pub struct ReclaimReport {
    pub steps: Vec<ReclaimStep>,
}

impl ReclaimReport {
    #[must_use]
    pub fn fully_clean(&self) -> bool {
        self.steps
            .iter()
            .all(|step| step.outcome != StepOutcome::Error)
    }

    #[must_use]
    pub fn errors(&self) -> Vec<&ReclaimStep> {
        self.steps
            .iter()
            .filter(|step| step.outcome == StepOutcome::Error)
            .collect()
    }
}

/// Tears down a service's containers, volumes, and images. Every step
/// is attempted even when earlier ones fail; already-absent resources
/// count as skipped.
pub async fn reclaim_service(
    runtime: &dyn ContainerRuntime,
    service: &ServiceRecord,
    image_tags: &[String],
) -> ReclaimReport {
    let mut report = ReclaimReport::default();

    reclaim_containers(runtime, service, &mut report).await;
    reclaim_volumes(runtime, service, &mut report).await;
    reclaim_images(runtime, image_tags, &mut report).await;

    for step in report.errors() {
        warn!(
            service_id = %service.id,
            step = %step.name,
            "reclaim step failed: {}",
            step.detail.as_deref().unwrap_or("unknown error")
        );
    }

    report
}

async fn reclaim_containers(
    runtime: &dyn ContainerRuntime,
    service: &ServiceRecord,
    report: &mut ReclaimReport,
) {
    let mut filters = vec![ContainerFilter {
        all: true,
        labels: vec![(SERVICE_ID_LABEL.to_string(), service.id.clone())],
    }];
    if service.parsed_type() == Some(ServiceType::Compose) {
        filters.push(ContainerFilter {
            all: true,
            labels: vec![(COMPOSE_PROJECT_LABEL.to_string(), service.name.clone())],
        });
    }

    let mut containers = Vec::new();
    for filter in &filters {
        match runtime.list_containers(filter).await {
            Ok(found) => containers.extend(found),
            Err(error) => {
                report
                    .steps
                    .push(ReclaimStep::error("list-containers", error.to_string()));
                return;
            }
        }
    }
    containers.sort_by(|a, b| a.id.cmp(&b.id));
    containers.dedup_by(|a, b| a.id == b.id);

    if containers.is_empty() {
        report
            .steps
            .push(ReclaimStep::skipped("containers", "none found"));
        return;
    }

    let steps: Vec<ReclaimStep> = stream::iter(containers)
        .map(|container| async move {
            let step_name = format!("container:{}", container.name);
            if container.is_active() {
                if let Err(error) = runtime.stop_container(&container.id, STOP_GRACE).await {
                    if !error.is_not_found() {
                        return ReclaimStep::error(step_name, error.to_string());
                    }
                }
            }
            match runtime.remove_container(&container.id, true).await {
                Ok(()) => ReclaimStep::success(step_name),
                Err(error) if error.is_not_found() => {
                    ReclaimStep::skipped(step_name, "already gone")
                }
                Err(error) => ReclaimStep::error(step_name, error.to_string()),
            }
        })
        .buffer_unordered(RECLAIM_CONCURRENCY)
        .collect()
        .await;

    report.steps.extend(steps);
}

async fn reclaim_volumes(
    runtime: &dyn ContainerRuntime,
    service: &ServiceRecord,
    report: &mut ReclaimReport,
) {
    match service.parsed_type() {
        Some(service_type) if service_type.is_datastore() => {
            let volume_name = format!("{}-data", service.name);
            let step = match runtime.remove_volume(&volume_name, true).await {
                Ok(()) => ReclaimStep::success(format!("volume:{volume_name}")),
                Err(error) if error.is_not_found() => {
                    ReclaimStep::skipped(format!("volume:{volume_name}"), "already gone")
                }
                Err(error) => {
                    ReclaimStep::error(format!("volume:{volume_name}"), error.to_string())
                }
            };
            report.steps.push(step);
        }
        Some(ServiceType::Compose) => {
            let label = format!("{COMPOSE_PROJECT_LABEL}={}", service.name);
            let volumes = match runtime.list_volumes(Some(&label)).await {
                Ok(volumes) => volumes,
                Err(error) => {
                    report
                        .steps
                        .push(ReclaimStep::error("list-volumes", error.to_string()));
                    return;
                }
            };
            if volumes.is_empty() {
                report
                    .steps
                    .push(ReclaimStep::skipped("volumes", "none found"));
                return;
            }
            for volume in volumes {
                let step = match runtime.remove_volume(&volume.name, true).await {
                    Ok(()) => ReclaimStep::success(format!("volume:{}", volume.name)),
                    Err(error) if error.is_not_found() => {
                        ReclaimStep::skipped(format!("volume:{}", volume.name), "already gone")
                    }
                    Err(error) => {
                        ReclaimStep::error(format!("volume:{}", volume.name), error.to_string())
                    }
                };
                report.steps.push(step);
            }
        }
        _ => {
            report
                .steps
                .push(ReclaimStep::skipped("volumes", "service keeps no volumes"));
        }
    }
}

async fn reclaim_images(
    runtime: &dyn ContainerRuntime,
    image_tags: &[String],
    report: &mut ReclaimReport,
) {
    if image_tags.is_empty() {
        report
            .steps
            .push(ReclaimStep::skipped("images", "none recorded"));
        return;
    }

    for tag in image_tags {
        let step = match runtime.remove_image(tag, true).await {
            Ok(()) => ReclaimStep::success(format!("image:{tag}")),
            Err(error) if error.is_not_found() => {
                ReclaimStep::skipped(format!("image:{tag}"), "already gone")
            }
            Err(error) => ReclaimStep::error(format!("image:{tag}"), error.to_string()),
        };
        report.steps.push(step);
    }
}
