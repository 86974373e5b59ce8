use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use super::{
    ContainerFilter, ContainerRuntime, ContainerSpec, ContainerSummary, ImageBuildSpec,
    LogChannel, LogLine, LogOptions, LogStream, RuntimeError, UsageSnapshot, VolumeSummary,
};

/// In-memory runtime double. Tests seed it with containers and volumes,
/// then assert on the recorded stop/remove calls.
#[derive(Default)]
pub struct MockRuntime {
    pub containers: Mutex<Vec<ContainerSummary>>,
    pub volumes: Mutex<Vec<VolumeSummary>>,
    pub stopped: Mutex<Vec<String>>,
    pub removed_containers: Mutex<Vec<String>>,
    pub removed_volumes: Mutex<Vec<String>>,
    pub removed_images: Mutex<Vec<String>>,
    pub fail_container_removal: Mutex<bool>,
    pub log_lines: Mutex<Vec<String>>,
    pub built_images: Mutex<Vec<String>>,
    pub pulled_images: Mutex<Vec<String>>,
}

impl MockRuntime {
    pub fn add_container(&self, id: &str, state: &str, labels: &[(&str, &str)]) {
        let labels: HashMap<String, String> = labels
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        self.containers
            .lock()
            .expect("containers lock")
            .push(ContainerSummary {
                id: id.to_string(),
                name: id.to_string(),
                image: "mock:latest".to_string(),
                state: state.to_string(),
                labels,
            });
    }

    pub fn add_volume(&self, name: &str, labels: &[(&str, &str)]) {
        let labels: HashMap<String, String> = labels
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        self.volumes
            .lock()
            .expect("volumes lock")
            .push(VolumeSummary {
                name: name.to_string(),
                labels,
            });
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let containers = self.containers.lock().expect("containers lock");
        Ok(containers
            .iter()
            .filter(|container| {
                filter.labels.iter().all(|(key, value)| {
                    container.labels.get(key).map(String::as_str) == Some(value.as_str())
                })
            })
            .cloned()
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSummary, RuntimeError> {
        self.containers
            .lock()
            .expect("containers lock")
            .iter()
            .find(|container| container.id == id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut containers = self.containers.lock().expect("containers lock");
        let id = format!("ctr-{}", containers.len() + 1);
        containers.push(ContainerSummary {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: "created".to_string(),
            labels: spec.labels.iter().cloned().collect(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut containers = self.containers.lock().expect("containers lock");
        let Some(container) = containers.iter_mut().find(|container| container.id == id) else {
            return Err(RuntimeError::NotFound(format!("no such container: {id}")));
        };
        container.state = "running".to_string();
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.stopped
            .lock()
            .expect("stopped lock")
            .push(id.to_string());
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), RuntimeError> {
        if *self
            .fail_container_removal
            .lock()
            .expect("fail flag lock")
        {
            return Err(RuntimeError::Runtime("simulated engine failure".to_string()));
        }
        let mut containers = self.containers.lock().expect("containers lock");
        let before = containers.len();
        containers.retain(|container| container.id != id);
        if containers.len() == before {
            return Err(RuntimeError::NotFound(format!("no such container: {id}")));
        }
        drop(containers);
        self.removed_containers
            .lock()
            .expect("removed containers lock")
            .push(id.to_string());
        Ok(())
    }

    async fn build_image(&self, spec: &ImageBuildSpec) -> Result<Vec<String>, RuntimeError> {
        self.built_images
            .lock()
            .expect("built images lock")
            .push(spec.tag.clone());
        Ok(vec![format!("successfully built {}", spec.tag)])
    }

    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError> {
        self.pulled_images
            .lock()
            .expect("pulled images lock")
            .push(reference.to_string());
        Ok(())
    }

    async fn remove_image(&self, reference: &str, _force: bool) -> Result<(), RuntimeError> {
        self.removed_images
            .lock()
            .expect("removed images lock")
            .push(reference.to_string());
        Ok(())
    }

    async fn list_volumes(&self, label: Option<&str>) -> Result<Vec<VolumeSummary>, RuntimeError> {
        let volumes = self.volumes.lock().expect("volumes lock");
        Ok(volumes
            .iter()
            .filter(|volume| match label {
                Some(label) => {
                    let (key, value) = label.split_once('=').unwrap_or((label, ""));
                    volume.labels.get(key).map(String::as_str) == Some(value)
                }
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn remove_volume(&self, name: &str, _force: bool) -> Result<(), RuntimeError> {
        let mut volumes = self.volumes.lock().expect("volumes lock");
        let before = volumes.len();
        volumes.retain(|volume| volume.name != name);
        if volumes.len() == before {
            return Err(RuntimeError::NotFound(format!("no such volume: {name}")));
        }
        drop(volumes);
        self.removed_volumes
            .lock()
            .expect("removed volumes lock")
            .push(name.to_string());
        Ok(())
    }

    async fn container_logs(
        &self,
        _id: &str,
        _options: &LogOptions,
    ) -> Result<LogStream, RuntimeError> {
        let lines: Vec<Result<LogLine, RuntimeError>> = self
            .log_lines
            .lock()
            .expect("log lines lock")
            .iter()
            .map(|line| {
                Ok(LogLine {
                    content: line.clone(),
                    channel: LogChannel::Stdout,
                })
            })
            .collect();
        Ok(Box::pin(stream::iter(lines)))
    }

    async fn container_stats(&self, _id: &str) -> Result<UsageSnapshot, RuntimeError> {
        Ok(UsageSnapshot {
            cpu_percent: 1.5,
            memory_bytes: 64 * 1024 * 1024,
            memory_limit_bytes: 512 * 1024 * 1024,
        })
    }
}
