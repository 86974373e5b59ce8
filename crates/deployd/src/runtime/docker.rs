use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptions, CreateImageOptions,
    InspectContainerOptions, ListContainersOptions, ListVolumesOptions, LogsOptions,
    RemoveContainerOptions, RemoveImageOptions, RemoveVolumeOptions, StartContainerOptions,
    StatsOptions, StopContainerOptions,
};
use bollard::Docker;
use futures::StreamExt;

use super::{
    ContainerFilter, ContainerRuntime, ContainerSpec, ContainerSummary, ImageBuildSpec,
    LogChannel, LogLine, LogOptions, LogStream, RuntimeError, UsageSnapshot, VolumeSummary,
};

fn map_not_found(error: bollard::errors::Error) -> RuntimeError {
    match &error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => RuntimeError::NotFound(message.clone()),
        _ => RuntimeError::Runtime(error.to_string()),
    }
}

fn map_remove_error(error: bollard::errors::Error) -> RuntimeError {
    match &error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => RuntimeError::NotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 409 => RuntimeError::Conflict(message.clone()),
        _ => RuntimeError::Runtime(error.to_string()),
    }
}

/// Runtime adapter over the local Docker-compatible engine socket.
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// # Errors
    /// Returns an error if the socket client cannot be constructed.
    pub fn connect(socket_path: &str) -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_unix(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|error| RuntimeError::Runtime(error.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut filter_map: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in &filter.labels {
            filter_map
                .entry("label".to_string())
                .or_default()
                .push(format!("{key}={value}"));
        }

        let options = ListContainersOptions {
            all: filter.all,
            filters: Some(filter_map),
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|error| RuntimeError::Runtime(error.to_string()))?;

        Ok(containers
            .into_iter()
            .map(|container| {
                let id = container.id.unwrap_or_default();
                let name = container
                    .names
                    .unwrap_or_default()
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                let state = container
                    .state
                    .map(|s| format!("{s:?}").to_lowercase())
                    .unwrap_or_default();

                ContainerSummary {
                    id,
                    name,
                    image: container.image.unwrap_or_default(),
                    state,
                    labels: container.labels.unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSummary, RuntimeError> {
        let details = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_not_found)?;

        let config = details.config.unwrap_or_default();
        let state = details
            .state
            .and_then(|s| s.status)
            .map(|s| format!("{s:?}").to_lowercase())
            .unwrap_or_default();

        Ok(ContainerSummary {
            id: details.id.unwrap_or_default(),
            name: details
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: config.image.or(details.image).unwrap_or_default(),
            state,
            labels: config.labels.unwrap_or_default(),
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        let labels: HashMap<String, String> = spec.labels.iter().cloned().collect();

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: Vec<String> = Vec::new();
        for port in &spec.ports {
            let port_key = format!("{}/tcp", port.container_port);
            exposed_ports.push(port_key.clone());
            if let Some(host_port) = port.host_port {
                port_bindings.insert(
                    port_key,
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host_port.to_string()),
                    }]),
                );
            }
        }

        let host_config = HostConfig {
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            labels: if labels.is_empty() {
                None
            } else {
                Some(labels)
            },
            cmd: spec.cmd.clone(),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(options), body)
            .await
            .map_err(map_remove_error)?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.client
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(map_not_found)
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: Some(i32::try_from(grace.as_secs()).unwrap_or(i32::MAX)),
            signal: None,
        };

        match self.client.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304 means the container is already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(error) => Err(map_not_found(error)),
        }
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.client
            .remove_container(id, Some(options))
            .await
            .map_err(map_remove_error)
    }

    async fn build_image(&self, spec: &ImageBuildSpec) -> Result<Vec<String>, RuntimeError> {
        let options = BuildImageOptionsBuilder::default()
            .dockerfile(&spec.dockerfile)
            .t(&spec.tag)
            .rm(true)
            .build();

        let body = bollard::body_full(spec.context.clone().into());
        let mut stream = self.client.build_image(options, None, Some(body));

        let mut lines = Vec::new();
        while let Some(result) = stream.next().await {
            let info = result.map_err(|error| RuntimeError::Runtime(error.to_string()))?;
            if let Some(message) = info.error_detail.and_then(|detail| detail.message) {
                return Err(RuntimeError::Runtime(message));
            }
            if let Some(line) = info.stream {
                let trimmed = line.trim_end();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
        }

        Ok(lines)
    }

    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError> {
        let options = CreateImageOptions {
            from_image: Some(reference.to_string()),
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(map_not_found)?;
        }

        Ok(())
    }

    async fn remove_image(&self, reference: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };

        self.client
            .remove_image(reference, Some(options), None)
            .await
            .map_err(map_remove_error)?;

        Ok(())
    }

    async fn list_volumes(&self, label: Option<&str>) -> Result<Vec<VolumeSummary>, RuntimeError> {
        let mut filter_map: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(label) = label {
            filter_map.insert("label".to_string(), vec![label.to_string()]);
        }

        let options = ListVolumesOptions {
            filters: Some(filter_map),
        };

        let response = self
            .client
            .list_volumes(Some(options))
            .await
            .map_err(|error| RuntimeError::Runtime(error.to_string()))?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|volume| VolumeSummary {
                name: volume.name,
                labels: volume.labels,
            })
            .collect())
    }

    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveVolumeOptions { force };

        self.client
            .remove_volume(name, Some(options))
            .await
            .map_err(map_remove_error)
    }

    async fn container_logs(
        &self,
        id: &str,
        options: &LogOptions,
    ) -> Result<LogStream, RuntimeError> {
        let log_options = LogsOptions {
            stdout: options.stdout,
            stderr: options.stderr,
            follow: options.follow,
            timestamps: options.timestamps,
            tail: options
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let stream = self.client.logs(id, Some(log_options));

        let mapped = stream.map(|result| {
            result
                .map(|output| {
                    let (channel, data) = match output {
                        bollard::container::LogOutput::StdErr { message } => {
                            (LogChannel::Stderr, message)
                        }
                        bollard::container::LogOutput::StdOut { message }
                        | bollard::container::LogOutput::StdIn { message }
                        | bollard::container::LogOutput::Console { message } => {
                            (LogChannel::Stdout, message)
                        }
                    };

                    LogLine {
                        content: String::from_utf8_lossy(&data).to_string(),
                        channel,
                    }
                })
                .map_err(map_not_found)
        });

        Ok(Box::pin(mapped))
    }

    async fn container_stats(&self, id: &str) -> Result<UsageSnapshot, RuntimeError> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };

        let mut stream = self.client.stats(id, Some(options));
        let Some(result) = stream.next().await else {
            return Ok(UsageSnapshot::default());
        };
        let stats = result.map_err(map_not_found)?;

        let cpu_total = stats
            .cpu_stats
            .as_ref()
            .and_then(|cpu| cpu.cpu_usage.as_ref())
            .and_then(|usage| usage.total_usage)
            .unwrap_or(0);
        let precpu_total = stats
            .precpu_stats
            .as_ref()
            .and_then(|cpu| cpu.cpu_usage.as_ref())
            .and_then(|usage| usage.total_usage)
            .unwrap_or(0);
        let system_delta = stats
            .cpu_stats
            .as_ref()
            .and_then(|cpu| cpu.system_cpu_usage)
            .unwrap_or(0)
            .saturating_sub(
                stats
                    .precpu_stats
                    .as_ref()
                    .and_then(|cpu| cpu.system_cpu_usage)
                    .unwrap_or(0),
            );
        let online_cpus = stats
            .cpu_stats
            .as_ref()
            .and_then(|cpu| cpu.online_cpus)
            .unwrap_or(1)
            .max(1);

        let cpu_delta = cpu_total.saturating_sub(precpu_total);
        #[allow(clippy::cast_precision_loss)]
        let cpu_percent = if system_delta > 0 {
            (cpu_delta as f64 / system_delta as f64) * f64::from(online_cpus) * 100.0
        } else {
            0.0
        };

        let memory_bytes = stats
            .memory_stats
            .as_ref()
            .and_then(|memory| memory.usage)
            .unwrap_or(0);
        let memory_limit_bytes = stats
            .memory_stats
            .as_ref()
            .and_then(|memory| memory.limit)
            .unwrap_or(0);

        Ok(UsageSnapshot {
            cpu_percent,
            memory_bytes,
            memory_limit_bytes,
        })
    }
}
