//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::health::HealthRegistry;
use crate::registry::ProviderRegistry;

/// Application state shared across all request handlers.
///
/// Both fields are `Arc`-backed, so Axum's per-request clone is cheap.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Transformers for every configured provider.
    pub registry: Arc<ProviderRegistry>,
    /// Read side of the per-provider health checks.
    pub health: HealthRegistry,
}

impl AppState {
    pub fn new(registry: Arc<ProviderRegistry>, health: HealthRegistry) -> Self {
        Self { registry, health }
    }
}
