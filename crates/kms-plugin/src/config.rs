//! Configuration loading and validation for the development KMS plugin.

use anyhow::{Context, Result};
use common::SocketEndpoint;
use serde::Deserialize;

/// Validated plugin configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Socket to serve on, e.g. `unix:///@kms-provider.sock`. **Required.**
    pub kms_plugin_endpoint: String,

    /// Tracing log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build kms-plugin configuration")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise kms-plugin configuration")?;

        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        if self.kms_plugin_endpoint.trim().is_empty() {
            anyhow::bail!("KMS_PLUGIN_ENDPOINT is required and must not be empty");
        }
        SocketEndpoint::parse(&self.kms_plugin_endpoint)
            .context("KMS_PLUGIN_ENDPOINT is not a valid unix:// endpoint")?;
        Ok(())
    }
}
