//! Configuration loading and validation for the envelope service.
//!
//! Values come from a YAML file (path in `KMS_ENVELOPE_CONFIG`, default
//! [`DEFAULT_CONFIG_PATH`]) overlaid with `KMS_ENVELOPE_*` environment
//! variables. The process exits with a clear message if anything is invalid.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use common::SocketEndpoint;
use serde::Deserialize;

/// Config file used when `KMS_ENVELOPE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kms-envelope/config.yaml";

const ENV_PREFIX: &str = "KMS_ENVELOPE";

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Port the HTTP server (health + transform API) listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP endpoint for span export; logs only when absent.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// How often (seconds) each provider's plugin is probed.
    #[serde(default = "default_probe_interval")]
    pub health_probe_interval_secs: u64,

    /// Upper bound (seconds) on a single probe.
    #[serde(default = "default_probe_timeout")]
    pub health_probe_timeout_secs: u64,

    /// Resource kinds whose values are enveloped.
    #[serde(default = "default_resources")]
    pub resources: Vec<String>,

    /// KMS providers in priority order. The first one encrypts new writes;
    /// the position of each determines its health-check name. **Required.**
    pub providers: Vec<ProviderConfig>,
}

/// One `kms` provider entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Unique name; embedded in every envelope this provider writes.
    pub name: String,

    /// Plugin socket, `unix:///path` or `unix:///@abstract-name`.
    pub endpoint: String,

    /// Maximum number of decrypted DEKs kept; 0 disables the cache.
    #[serde(default = "default_cache_size")]
    pub cachesize: usize,

    /// Per-call KMS timeout (seconds).
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_listen_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".into()
}
fn default_probe_interval() -> u64 {
    3
}
fn default_probe_timeout() -> u64 {
    2
}
fn default_resources() -> Vec<String> {
    vec!["secrets".into()]
}
fn default_cache_size() -> usize {
    1000
}
fn default_provider_timeout() -> u64 {
    3
}

impl Config {
    /// Load from the file named by `KMS_ENVELOPE_CONFIG` plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unparsable, or validation fails.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("KMS_ENVELOPE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::build(config::File::with_name(&path).required(true))
            .with_context(|| format!("failed to load configuration from {path}"))
    }

    /// Parse a YAML document (plus environment overrides).
    ///
    /// # Errors
    ///
    /// Returns an error if the document is invalid or validation fails.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::build(config::File::from_str(yaml, config::FileFormat::Yaml))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let cfg = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("failed to build configuration")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.health_probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health_probe_timeout_secs)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("at least one KMS provider must be configured");
        }
        if self.resources.iter().all(|r| r.trim().is_empty()) {
            anyhow::bail!("resources must name at least one resource kind");
        }
        if self.health_probe_interval_secs == 0 {
            anyhow::bail!("health_probe_interval_secs must be > 0");
        }
        if self.health_probe_timeout_secs == 0 {
            anyhow::bail!("health_probe_timeout_secs must be > 0");
        }
        if self.health_probe_timeout_secs >= self.health_probe_interval_secs {
            anyhow::bail!("health_probe_timeout_secs must be shorter than health_probe_interval_secs");
        }

        let mut seen = HashSet::new();
        for (index, provider) in self.providers.iter().enumerate() {
            let name = provider.name.trim();
            if name.is_empty() {
                anyhow::bail!("providers[{index}].name is required and must not be empty");
            }
            if name.contains(':') {
                anyhow::bail!("providers[{index}].name {name:?} must not contain ':'");
            }
            if !seen.insert(name) {
                anyhow::bail!("provider name {name:?} is configured more than once");
            }
            SocketEndpoint::parse(&provider.endpoint)
                .with_context(|| format!("providers[{index}].endpoint is invalid"))?;
            if provider.timeout_secs == 0 {
                anyhow::bail!("providers[{index}].timeout_secs must be > 0");
            }
        }
        Ok(())
    }
}
