//! Per-provider health status, published through `arc-swap`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use common::protocol::CheckStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// No probe has completed yet.
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the most recent probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub state: HealthState,
    pub last_checked: Option<SystemTime>,
    pub last_error: Option<String>,
}

impl HealthStatus {
    pub fn unknown() -> Self {
        Self {
            state: HealthState::Unknown,
            last_checked: None,
            last_error: None,
        }
    }

    pub fn healthy(at: SystemTime) -> Self {
        Self {
            state: HealthState::Healthy,
            last_checked: Some(at),
            last_error: None,
        }
    }

    pub fn unhealthy(at: SystemTime, error: impl Into<String>) -> Self {
        Self {
            state: HealthState::Unhealthy,
            last_checked: Some(at),
            last_error: Some(error.into()),
        }
    }
}

/// Named health check for one provider.
///
/// Clones share the same status cell. The provider's prober is the only
/// writer; readers load the current status without blocking it.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    name: String,
    provider: String,
    status: Arc<ArcSwap<HealthStatus>>,
}

impl HealthCheck {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            status: Arc::new(ArcSwap::from_pointee(HealthStatus::unknown())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn status(&self) -> Arc<HealthStatus> {
        self.status.load_full()
    }

    pub fn state(&self) -> HealthState {
        self.status.load().state
    }

    /// Replace the status, returning the state it replaced.
    pub fn publish(&self, status: HealthStatus) -> HealthState {
        self.status.swap(Arc::new(status)).state
    }

    /// Wire representation for the `/healthz` body.
    pub fn to_check_status(&self) -> CheckStatus {
        let status = self.status.load();
        CheckStatus {
            name: self.name.clone(),
            provider: self.provider.clone(),
            state: status.state.as_str().into(),
            last_checked: status
                .last_checked
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
            last_error: status.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_unknown() {
        let check = HealthCheck::new("kms-provider-0", "p");
        assert_eq!(check.state(), HealthState::Unknown);
        let wire = check.to_check_status();
        assert_eq!(wire.state, "unknown");
        assert!(wire.last_checked.is_none());
    }

    #[test]
    fn publish_is_visible_to_clones() {
        let check = HealthCheck::new("kms-provider-0", "p");
        let reader = check.clone();
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        assert_eq!(check.publish(HealthStatus::unhealthy(at, "plugin down")), HealthState::Unknown);
        assert_eq!(reader.state(), HealthState::Unhealthy);
        let wire = reader.to_check_status();
        assert_eq!(wire.last_checked, Some(1_700_000_000));
        assert_eq!(wire.last_error.as_deref(), Some("plugin down"));

        assert_eq!(check.publish(HealthStatus::healthy(at)), HealthState::Unhealthy);
        assert!(reader.status().last_error.is_none());
    }
}
