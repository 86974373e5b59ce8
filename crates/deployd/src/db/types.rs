use serde::{Deserialize, Serialize};

/// Kinds of services the engine knows how to deploy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceType {
    Docker,
    Static,
    Postgres,
    Redis,
    Mysql,
    Compose,
}

impl ServiceType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "DOCKER",
            Self::Static => "STATIC",
            Self::Postgres => "POSTGRES",
            Self::Redis => "REDIS",
            Self::Mysql => "MYSQL",
            Self::Compose => "COMPOSE",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "DOCKER" => Some(Self::Docker),
            "STATIC" => Some(Self::Static),
            "POSTGRES" => Some(Self::Postgres),
            "REDIS" => Some(Self::Redis),
            "MYSQL" => Some(Self::Mysql),
            "COMPOSE" => Some(Self::Compose),
            _ => None,
        }
    }

    /// Datastore types get generated credentials and a fixed internal port.
    #[must_use]
    pub fn is_datastore(&self) -> bool {
        matches!(self, Self::Postgres | Self::Redis | Self::Mysql)
    }

    #[must_use]
    pub fn default_port(&self) -> i64 {
        match self {
            Self::Static => 80,
            Self::Postgres => 5444,
            Self::Redis => 6379,
            Self::Mysql => 3306,
            Self::Docker | Self::Compose => 3000,
        }
    }
}

/// Coarse service health as reported to owners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Idle,
    Deploying,
    Running,
    Stopped,
    Error,
}

impl ServiceStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Deploying => "DEPLOYING",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "IDLE" => Some(Self::Idle),
            "DEPLOYING" => Some(Self::Deploying),
            "RUNNING" => Some(Self::Running),
            "STOPPED" => Some(Self::Stopped),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Lifecycle states of a single deployment attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentStatus {
    Queued,
    Building,
    Success,
    Failed,
    Stopped,
}

impl DeploymentStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Building => "BUILDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "QUEUED" => Some(Self::Queued),
            "BUILDING" => Some(Self::Building),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            "STOPPED" => Some(Self::Stopped),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }

    /// Allowed status transitions. Re-asserting the current status is
    /// permitted so worker retries stay idempotent. Any non-terminal
    /// deployment may be forced to FAILED.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Queued => matches!(next, Self::Building | Self::Failed),
            Self::Building => matches!(next, Self::Success | Self::Failed),
            Self::Success => matches!(next, Self::Stopped | Self::Failed),
            Self::Failed | Self::Stopped => false,
        }
    }
}

/// A fully materialized service row.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServiceRecord {
    pub id: String,
    pub owner_id: String,
    pub environment_id: Option<String>,
    pub name: String,
    pub service_type: String,
    pub repo_url: Option<String>,
    pub branch: String,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub static_output_dir: Option<String>,
    pub port: i64,
    pub env_vars: Option<String>,
    pub custom_domain: Option<String>,
    pub status: String,
    pub is_preview: bool,
    pub preview_pr_number: Option<i64>,
    pub delete_protected: bool,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ServiceRecord {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    #[must_use]
    pub fn parsed_type(&self) -> Option<ServiceType> {
        ServiceType::parse(&self.service_type)
    }

    /// Deserializes the stored env var JSON blob, treating NULL and
    /// malformed payloads as empty.
    #[must_use]
    pub fn env_map(&self) -> std::collections::BTreeMap<String, String> {
        self.env_vars
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// Parameters for inserting a new service row.
#[derive(Clone, Debug)]
pub struct NewService {
    pub id: String,
    pub owner_id: String,
    pub environment_id: Option<String>,
    pub name: String,
    pub service_type: ServiceType,
    pub repo_url: Option<String>,
    pub branch: String,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub static_output_dir: Option<String>,
    pub port: i64,
    pub env_vars: Option<String>,
    pub custom_domain: Option<String>,
    pub is_preview: bool,
    pub preview_pr_number: Option<i64>,
}

/// A single deployment attempt for a service.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeploymentRecord {
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

impl DeploymentRecord {
    #[must_use]
    pub fn parsed_status(&self) -> Option<DeploymentStatus> {
        DeploymentStatus::parse(&self.status)
    }
}

/// Parameters for inserting a new deployment row.
#[derive(Clone, Debug)]
pub struct NewDeployment {
    pub id: String,
    pub service_id: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub branch: Option<String>,
    pub correlation_id: Option<String>,
}

/// Normalized repository URL used to match incoming webhook events
/// against stored services. Matching tolerates a trailing `.git`
/// suffix, trailing slashes, and letter case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoMatch {
    bare: String,
}

impl RepoMatch {
    #[must_use]
    pub fn new(repo_url: &str) -> Self {
        let mut bare = repo_url.trim().trim_end_matches('/').to_lowercase();
        if let Some(stripped) = bare.strip_suffix(".git") {
            bare = stripped.to_string();
        }
        Self { bare }
    }

    /// The normalized URL without a `.git` suffix.
    #[must_use]
    pub fn bare(&self) -> &str {
        &self.bare
    }

    /// The normalized URL with a `.git` suffix, for matching rows that
    /// stored the clone form.
    #[must_use]
    pub fn with_git_suffix(&self) -> String {
        format!("{}.git", self.bare)
    }

    #[must_use]
    pub fn matches(&self, stored_url: &str) -> bool {
        Self::new(stored_url) == *self
    }
}
