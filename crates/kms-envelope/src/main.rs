//! `kms-envelope`: service binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`].
//! 2. Initialise telemetry (JSON logs, optional OTLP export).
//! 3. Build the provider registry and handshake with each plugin.
//! 4. Spawn one health prober per provider.
//! 5. Serve the Axum router until Ctrl-C, then stop the probers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kms_envelope::config::Config;
use kms_envelope::registry::ProviderRegistry;
use kms_envelope::server::{self, state::AppState};
use kms_envelope::{health, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::load().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_port = cfg.listen_port,
        providers = cfg.providers.len(),
        "kms-envelope starting"
    );

    // -----------------------------------------------------------------------
    // 3. Providers
    // -----------------------------------------------------------------------
    let registry = Arc::new(ProviderRegistry::from_config(&cfg)?);
    for transformer in registry.providers() {
        match transformer.kms().version().await {
            Ok(v) => info!(
                provider = transformer.provider(),
                version = %v.version,
                runtime = %v.runtime_name,
                runtime_version = %v.runtime_version,
                "KMS plugin handshake complete"
            ),
            Err(e) => warn!(
                provider = transformer.provider(),
                error = %e,
                "KMS plugin handshake failed; health checks will report it"
            ),
        }
    }

    // -----------------------------------------------------------------------
    // 4. Health probers
    // -----------------------------------------------------------------------
    let cancel = CancellationToken::new();
    let (health, probers) = health::spawn_probers(
        &registry,
        cfg.probe_interval(),
        cfg.probe_timeout(),
        cancel.clone(),
    );

    // -----------------------------------------------------------------------
    // 5. HTTP server
    // -----------------------------------------------------------------------
    let router = server::router::build(AppState::new(registry, health));
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.listen_port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    cancel.cancel();
    for prober in probers {
        if let Err(e) = prober.await {
            warn!(error = %e, "health prober ended abnormally");
        }
    }
    info!("kms-envelope stopped");
    telemetry::shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
