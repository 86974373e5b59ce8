use anyhow::Result;
use async_trait::async_trait;

/// Per-plan resource ceilings. `None` means unlimited.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResourceLimits {
    pub max_services: Option<i64>,
}

/// Resolves the limits attached to a billing plan.
#[async_trait]
pub trait QuotaCapability: Send + Sync {
    async fn resource_limits(&self, plan: &str) -> Result<ResourceLimits>;
}

/// Static plan table: the free plan is capped, everything else is
/// unlimited.
pub struct StaticQuota {
    free_plan_max_services: i64,
}

impl StaticQuota {
    #[must_use]
    pub fn new(free_plan_max_services: i64) -> Self {
        Self {
            free_plan_max_services,
        }
    }
}

#[async_trait]
impl QuotaCapability for StaticQuota {
    async fn resource_limits(&self, plan: &str) -> Result<ResourceLimits> {
        let limits = match plan.to_lowercase().as_str() {
            "free" => ResourceLimits {
                max_services: Some(self.free_plan_max_services),
            },
            _ => ResourceLimits::default(),
        };
        Ok(limits)
    }
}
