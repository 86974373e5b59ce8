use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub mod docker;

#[cfg(test)]
pub(crate) mod mock;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl RuntimeError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Filter for container listings. Labels are exact `key=value` matches.
#[derive(Clone, Debug, Default)]
pub struct ContainerFilter {
    pub all: bool,
    pub labels: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    /// Whether the container needs a stop before removal.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state.as_str(), "running" | "restarting" | "paused")
    }
}

/// One host-to-container port publication. A `None` host port leaves
/// the port exposed but unpublished.
#[derive(Clone, Copy, Debug)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: Option<u16>,
}

/// Everything needed to create a container from an already-present image.
#[derive(Clone, Debug, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: Vec<(String, String)>,
    pub cmd: Option<Vec<String>>,
    pub ports: Vec<PortMapping>,
}

/// Build context for a tagged image. `context` is a tar archive with
/// the Dockerfile at `dockerfile` relative to its root.
#[derive(Clone, Debug)]
pub struct ImageBuildSpec {
    pub tag: String,
    pub dockerfile: String,
    pub context: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct VolumeSummary {
    pub name: String,
    pub labels: HashMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct LogOptions {
    pub stdout: bool,
    pub stderr: bool,
    pub follow: bool,
    pub tail: Option<u32>,
    pub timestamps: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            follow: false,
            tail: Some(200),
            timestamps: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogChannel {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug)]
pub struct LogLine {
    pub content: String,
    pub channel: LogChannel,
}

pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogLine, RuntimeError>> + Send>>;

/// Point-in-time resource usage of a running container.
#[derive(Clone, Copy, Debug, Default)]
pub struct UsageSnapshot {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
}

/// Capability port over a container engine. The control plane itself
/// only exercises the observe-and-reclaim subset; the create/build/pull
/// half of the surface exists for workers that share the engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerSummary, RuntimeError>;

    /// Creates a container and returns the engine-assigned id. The
    /// container is not started.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stops a container, giving it `grace` to exit before the engine
    /// kills it. Stopping an already-stopped container succeeds.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    /// Builds a tagged image from a tar context, returning the engine's
    /// build output lines.
    async fn build_image(&self, spec: &ImageBuildSpec) -> Result<Vec<String>, RuntimeError>;

    /// Pulls an image, draining the engine's progress stream.
    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError>;

    async fn remove_image(&self, reference: &str, force: bool) -> Result<(), RuntimeError>;

    /// Lists volumes, optionally filtered by an exact `key=value` label.
    async fn list_volumes(&self, label: Option<&str>) -> Result<Vec<VolumeSummary>, RuntimeError>;

    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), RuntimeError>;

    async fn container_logs(
        &self,
        id: &str,
        options: &LogOptions,
    ) -> Result<LogStream, RuntimeError>;

    async fn container_stats(&self, id: &str) -> Result<UsageSnapshot, RuntimeError>;
}
