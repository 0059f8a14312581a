//! Per-provider KMS health aggregation.
//!
//! Every configured provider gets one check, named `kms-provider-<index>`
//! after its position in the configuration, and one background prober that
//! keeps the check's [`HealthStatus`] current. A failing provider never
//! affects the status of another.

pub mod prober;
pub mod status;

pub use prober::{probe, spawn_probers};
pub use status::{HealthCheck, HealthState, HealthStatus};

use std::sync::Arc;

use common::protocol::HealthResponse;

/// Prefix shared by all KMS provider checks.
pub const CHECK_NAME_PREFIX: &str = "kms-provider";

/// Check name for the provider at `index` in configuration order.
pub fn check_name(index: usize) -> String {
    format!("{CHECK_NAME_PREFIX}-{index}")
}

/// Read side of all provider checks, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    checks: Arc<Vec<HealthCheck>>,
}

impl HealthRegistry {
    /// One `Unknown` check per provider name, in order.
    pub fn for_providers<'a>(providers: impl IntoIterator<Item = &'a str>) -> Self {
        let checks = providers
            .into_iter()
            .enumerate()
            .map(|(index, provider)| HealthCheck::new(check_name(index), provider))
            .collect();
        Self {
            checks: Arc::new(checks),
        }
    }

    pub fn checks(&self) -> &[HealthCheck] {
        &self.checks
    }

    pub fn get(&self, name: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.name() == name)
    }

    /// `true` only if every check has been probed and is healthy.
    pub fn all_healthy(&self) -> bool {
        self.checks
            .iter()
            .all(|c| c.state() == HealthState::Healthy)
    }

    pub fn report(&self) -> HealthResponse {
        HealthResponse {
            status: if self.all_healthy() { "ok" } else { "degraded" }.into(),
            checks: self.checks.iter().map(HealthCheck::to_check_status).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn names_follow_configuration_order() {
        let reg = HealthRegistry::for_providers(["primary", "backup"]);
        assert_eq!(reg.checks()[0].name(), "kms-provider-0");
        assert_eq!(reg.checks()[1].name(), "kms-provider-1");
        assert_eq!(reg.get("kms-provider-1").unwrap().provider(), "backup");
        assert!(reg.get("kms-provider-2").is_none());
    }

    #[test]
    fn aggregate_needs_every_check_healthy() {
        let reg = HealthRegistry::for_providers(["a", "b"]);
        assert!(!reg.all_healthy());

        reg.checks()[0].publish(HealthStatus::healthy(SystemTime::now()));
        assert!(!reg.all_healthy());
        assert_eq!(reg.report().status, "degraded");

        reg.checks()[1].publish(HealthStatus::healthy(SystemTime::now()));
        assert!(reg.all_healthy());
        let report = reg.report();
        assert_eq!(report.status, "ok");
        assert_eq!(report.checks.len(), 2);
    }
}
