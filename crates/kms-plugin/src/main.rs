//! `kms-plugin`: development KMS plugin binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise structured JSON logging.
//! 3. Serve the KMS RPC on the configured socket until Ctrl-C.

use anyhow::{Context, Result};
use kms_plugin::{config::Config, telemetry, Base64Plugin};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        eprintln!("ERROR: kms-plugin configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;

    // -----------------------------------------------------------------------
    // 3. Plugin
    // -----------------------------------------------------------------------
    let handle = Base64Plugin::new(&cfg.kms_plugin_endpoint)?.start()?;
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    handle.shutdown().await;
    Ok(())
}
