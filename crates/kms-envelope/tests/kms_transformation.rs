//! End-to-end tests against the base64 development plugin over real Unix
//! sockets.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::protocol::{HealthResponse, TransformRequest, TransformResponse};
use kms_envelope::config::Config;
use kms_envelope::crypto::cipher;
use kms_envelope::envelope::format::{provider_prefix, EnvelopeBody};
use kms_envelope::health::{self, HealthCheck, HealthState};
use kms_envelope::server::{router, state::AppState};
use kms_envelope::{ProviderRegistry, ValueContext};
use kms_plugin::{Base64Plugin, PluginHandle};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const SECRET_PATH: &str = "/registry/secrets/ns/name";

struct Fixture {
    _dir: TempDir,
    plugins: Vec<PluginHandle>,
    registry: Arc<ProviderRegistry>,
}

/// Start one plugin per `(name, cachesize)` and a registry pointing at them.
fn fixture(providers: &[(&str, usize)]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut plugins = Vec::new();
    let mut yaml = String::from("providers:\n");
    for (name, cachesize) in providers {
        let endpoint = format!("unix://{}", dir.path().join(format!("{name}.sock")).display());
        plugins.push(Base64Plugin::new(&endpoint).unwrap().start().unwrap());
        yaml.push_str(&format!(
            "  - name: {name}\n    endpoint: {endpoint}\n    cachesize: {cachesize}\n"
        ));
    }
    let cfg = Config::from_yaml_str(&yaml).unwrap();
    let registry = Arc::new(ProviderRegistry::from_config(&cfg).unwrap());
    Fixture {
        _dir: dir,
        plugins,
        registry,
    }
}

impl Fixture {
    async fn shutdown(self) {
        for plugin in self.plugins {
            plugin.shutdown().await;
        }
    }
}

async fn wait_for(check: &HealthCheck, state: HealthState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while check.state() != state {
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} never became {state}",
            check.name()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn plugin_dek_opens_stored_payload() {
    let fx = fixture(&[("kms-provider", 1000)]);
    let ctx = ValueContext::new(SECRET_PATH);

    let raw = fx
        .registry
        .transform_to_storage("secrets", b"secret-value", &ctx)
        .await
        .unwrap();

    let prefix = provider_prefix("kms-provider");
    assert!(raw.starts_with(b"k8s:enc:kms:v1:kms-provider:"));
    let body = EnvelopeBody::parse(&raw[prefix.len()..]).unwrap();
    let declared = u16::from_be_bytes([raw[prefix.len()], raw[prefix.len() + 1]]) as usize;
    assert_eq!(declared, body.encrypted_dek.len());

    let dek = fx.plugins[0].last_encrypt_request().expect("plugin saw the DEK");
    assert_eq!(dek.len(), cipher::KEY_LEN);
    let plain = cipher::open(body.payload, &dek, SECRET_PATH.as_bytes()).unwrap();
    assert_eq!(plain, b"secret-value");

    let back = fx
        .registry
        .transform_from_storage("secrets", &raw, &ctx)
        .await
        .unwrap();
    assert_eq!(back, b"secret-value");

    fx.shutdown().await;
}

#[tokio::test]
async fn repeated_reads_hit_the_dek_cache() {
    let fx = fixture(&[("cached", 10), ("uncached", 0)]);
    let ctx = ValueContext::new(SECRET_PATH);

    for (index, expected_decrypts) in [(0, 1), (1, 3)] {
        let transformer = &fx.registry.providers()[index];
        let raw = transformer
            .transform_to_storage(b"secret-value", &ctx)
            .await
            .unwrap();
        for _ in 0..3 {
            let back = transformer.transform_from_storage(&raw, &ctx).await.unwrap();
            assert_eq!(back, b"secret-value");
        }
        assert_eq!(fx.plugins[index].decrypt_calls(), expected_decrypts);
    }

    fx.shutdown().await;
}

#[tokio::test]
async fn failed_plugin_reads_are_unavailable_until_recovery() {
    let fx = fixture(&[("kms-provider", 0)]);
    let ctx = ValueContext::new(SECRET_PATH);
    let raw = fx
        .registry
        .transform_to_storage("secrets", b"secret-value", &ctx)
        .await
        .unwrap();

    fx.plugins[0].enter_failed_state();
    let err = fx
        .registry
        .transform_from_storage("secrets", &raw, &ctx)
        .await
        .unwrap_err();
    assert!(err.is_transient(), "unexpected error: {err}");

    fx.plugins[0].exit_failed_state();
    let back = fx
        .registry
        .transform_from_storage("secrets", &raw, &ctx)
        .await
        .unwrap();
    assert_eq!(back, b"secret-value");

    fx.shutdown().await;
}

#[tokio::test]
async fn provider_health_is_tracked_independently() {
    let fx = fixture(&[("primary", 10), ("secondary", 10)]);
    let cancel = CancellationToken::new();
    let (health, probers) = health::spawn_probers(
        &fx.registry,
        Duration::from_millis(100),
        Duration::from_millis(50),
        cancel.clone(),
    );
    let server = TestServer::new(router::build(AppState::new(
        fx.registry.clone(),
        health.clone(),
    )))
    .unwrap();

    let first = health.get("kms-provider-0").unwrap();
    let second = health.get("kms-provider-1").unwrap();
    wait_for(first, HealthState::Healthy).await;
    wait_for(second, HealthState::Healthy).await;
    server.get("/healthz").await.assert_status_ok();

    fx.plugins[0].enter_failed_state();
    wait_for(first, HealthState::Unhealthy).await;
    assert_eq!(second.state(), HealthState::Healthy);
    server
        .get("/healthz/kms-provider-0")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    server.get("/healthz/kms-provider-1").await.assert_status_ok();

    let report: HealthResponse = server.get("/healthz").await.json();
    assert_eq!(report.status, "degraded");
    assert_eq!(report.checks[0].state, "unhealthy");
    assert_eq!(report.checks[1].state, "healthy");

    fx.plugins[0].exit_failed_state();
    wait_for(first, HealthState::Healthy).await;
    server.get("/healthz/kms-provider-0").await.assert_status_ok();

    cancel.cancel();
    for prober in probers {
        prober.await.unwrap();
    }
    fx.shutdown().await;
}

#[tokio::test]
async fn transform_api_round_trips_through_plugin() {
    let fx = fixture(&[("kms-provider", 10)]);
    let server = TestServer::new(router::build(AppState::new(
        fx.registry.clone(),
        health::HealthRegistry::for_providers(["kms-provider"]),
    )))
    .unwrap();

    let sealed: TransformResponse = server
        .post("/v1/transform/encrypt")
        .json(&TransformRequest {
            resource: "secrets".into(),
            key: SECRET_PATH.into(),
            data: b"secret-value".to_vec(),
        })
        .await
        .json();
    assert!(sealed.data.starts_with(b"k8s:enc:kms:v1:kms-provider:"));

    let opened: TransformResponse = server
        .post("/v1/transform/decrypt")
        .json(&TransformRequest {
            resource: "secrets".into(),
            key: SECRET_PATH.into(),
            data: sealed.data.clone(),
        })
        .await
        .json();
    assert_eq!(opened.data, b"secret-value");

    server
        .post("/v1/transform/decrypt")
        .json(&TransformRequest {
            resource: "secrets".into(),
            key: "/registry/secrets/ns/other".into(),
            data: sealed.data,
        })
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    fx.shutdown().await;
}
