use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "/opt/deployd/config.json";

const DEFAULT_DB_PATH: &str = "/opt/deployd/data/deployd.db";
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:4100";
const DEFAULT_RUNTIME_SOCKET: &str = "/var/run/docker.sock";
const DEFAULT_PLAN: &str = "free";
const DEFAULT_FREE_PLAN_MAX_SERVICES: i64 = 10;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeploydConfig {
    pub database_path: Option<String>,
    pub bind_address: Option<String>,
    pub runtime_socket: Option<String>,
    pub default_plan: Option<String>,
    pub free_plan_max_services: Option<i64>,
    pub webhook: WebhookConfig,
    pub worker: WorkerConfig,
    pub credentials: CredentialsConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub secret: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub shared_secret: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub encryption_key: Option<String>,
}

impl DeploydConfig {
    /// Loads configuration from `DEPLOYD_CONFIG_PATH` (or the default path),
    /// falling back to defaults when the file is missing.
    ///
    /// # Errors
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DEPLOYD_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let path = Path::new(&config_path);
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {config_path}"))?;

        let config = serde_json::from_str::<Self>(&raw)
            .with_context(|| format!("Failed to parse config JSON: {config_path}"))?;

        Ok(config)
    }

    #[must_use]
    pub fn database_path(&self) -> String {
        self.database_path
            .as_deref()
            .unwrap_or(DEFAULT_DB_PATH)
            .trim()
            .to_string()
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        self.bind_address
            .as_deref()
            .unwrap_or(DEFAULT_BIND_ADDRESS)
            .trim()
            .to_string()
    }

    #[must_use]
    pub fn runtime_socket(&self) -> String {
        self.runtime_socket
            .as_deref()
            .unwrap_or(DEFAULT_RUNTIME_SOCKET)
            .trim()
            .to_string()
    }

    #[must_use]
    pub fn default_plan(&self) -> String {
        self.default_plan
            .as_deref()
            .unwrap_or(DEFAULT_PLAN)
            .trim()
            .to_string()
    }

    #[must_use]
    pub fn free_plan_max_services(&self) -> i64 {
        self.free_plan_max_services
            .unwrap_or(DEFAULT_FREE_PLAN_MAX_SERVICES)
    }

    #[must_use]
    pub fn webhook_secret(&self) -> Option<String> {
        self.webhook
            .secret
            .clone()
            .or_else(|| std::env::var("DEPLOYD_WEBHOOK_SECRET").ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn worker_shared_secret(&self) -> Option<String> {
        self.worker
            .shared_secret
            .clone()
            .or_else(|| std::env::var("DEPLOYD_WORKER_SECRET").ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn credential_encryption_key(&self) -> Option<String> {
        self.credentials
            .encryption_key
            .clone()
            .or_else(|| std::env::var("DEPLOYD_CREDENTIAL_ENCRYPTION_KEY").ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}
