//! Background probers, one per provider.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{HealthCheck, HealthRegistry, HealthState, HealthStatus};
use crate::kms::KmsService;
use crate::registry::ProviderRegistry;

/// Payload encrypted by every probe.
const PING: &[u8] = b"ping";

/// Run one probe: a version handshake then an encrypt round trip, both
/// within `timeout`.
///
/// # Errors
///
/// Returns the failure text published as the check's last error.
pub async fn probe(kms: &dyn KmsService, timeout: Duration) -> Result<(), String> {
    let attempt = async {
        kms.version().await.map_err(|e| format!("version: {e}"))?;
        let cipher = kms.encrypt(PING).await.map_err(|e| format!("encrypt: {e}"))?;
        if cipher.is_empty() {
            return Err("encrypt: plugin returned an empty ciphertext".to_string());
        }
        Ok(())
    };
    match time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(format!("probe timed out after {timeout:?}")),
    }
}

/// Start one prober per provider of `registry`.
///
/// The first probe runs immediately; checks read `Unknown` until it
/// completes. Probers stop when `cancel` fires.
pub fn spawn_probers(
    registry: &ProviderRegistry,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> (HealthRegistry, Vec<JoinHandle<()>>) {
    let health = HealthRegistry::for_providers(registry.providers().iter().map(|t| t.provider()));
    let handles = health
        .checks()
        .iter()
        .zip(registry.providers())
        .map(|(check, transformer)| {
            spawn_prober(
                check.clone(),
                transformer.kms().clone(),
                interval,
                timeout,
                cancel.clone(),
            )
        })
        .collect();
    (health, handles)
}

fn spawn_prober(
    check: HealthCheck,
    kms: Arc<dyn KmsService>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(check = check.name(), "prober stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = probe(kms.as_ref(), timeout) => outcome,
            };
            record(&check, outcome);
        }
    })
}

fn record(check: &HealthCheck, outcome: Result<(), String>) {
    let now = SystemTime::now();
    match outcome {
        Ok(()) => {
            let previous = check.publish(HealthStatus::healthy(now));
            if previous != HealthState::Healthy {
                info!(
                    check = check.name(),
                    provider = check.provider(),
                    from = %previous,
                    "KMS provider healthy"
                );
            }
        }
        Err(error) => {
            let previous = check.publish(HealthStatus::unhealthy(now, error.clone()));
            if previous != HealthState::Unhealthy {
                warn!(
                    check = check.name(),
                    provider = check.provider(),
                    from = %previous,
                    error = %error,
                    "KMS provider unhealthy"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dek::DekCache;
    use crate::envelope::EnvelopeTransformer;
    use crate::kms::testing::FakeKms;
    use crate::kms::{KmsError, MockKmsService};
    use std::sync::atomic::Ordering;

    const INTERVAL: Duration = Duration::from_millis(50);
    const TIMEOUT: Duration = Duration::from_millis(30);

    fn registry(kms: &[Arc<FakeKms>]) -> ProviderRegistry {
        let transformers = kms
            .iter()
            .enumerate()
            .map(|(i, k)| {
                Arc::new(EnvelopeTransformer::new(
                    format!("provider-{i}"),
                    k.clone() as Arc<dyn KmsService>,
                    DekCache::new(4),
                    Duration::from_secs(1),
                ))
            })
            .collect();
        ProviderRegistry::new(transformers, ["secrets"]).unwrap()
    }

    async fn wait_for(check: &HealthCheck, state: HealthState) {
        let deadline = time::Instant::now() + Duration::from_secs(2);
        while check.state() != state {
            assert!(
                time::Instant::now() < deadline,
                "{} never became {state}",
                check.name()
            );
            time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn probe_reports_each_failure_mode() {
        let kms = FakeKms::default();
        assert!(probe(&kms, TIMEOUT).await.is_ok());
        assert_eq!(kms.version_calls.load(Ordering::SeqCst), 1);
        assert_eq!(kms.encrypt_calls.load(Ordering::SeqCst), 1);

        kms.set_failing(true);
        assert!(probe(&kms, TIMEOUT).await.unwrap_err().starts_with("version:"));

        kms.set_failing(false);
        kms.set_delay(Duration::from_millis(200));
        assert!(probe(&kms, TIMEOUT).await.unwrap_err().contains("timed out"));
    }

    #[tokio::test]
    async fn providers_are_tracked_independently() {
        let kms = [Arc::new(FakeKms::default()), Arc::new(FakeKms::default())];
        let reg = registry(&kms);
        let cancel = CancellationToken::new();
        let (health, handles) = spawn_probers(&reg, INTERVAL, TIMEOUT, cancel.clone());

        let first = health.get("kms-provider-0").unwrap();
        let second = health.get("kms-provider-1").unwrap();
        wait_for(first, HealthState::Healthy).await;
        wait_for(second, HealthState::Healthy).await;

        kms[0].set_failing(true);
        wait_for(first, HealthState::Unhealthy).await;
        assert_eq!(second.state(), HealthState::Healthy);
        assert!(first.status().last_error.is_some());
        assert!(!health.all_healthy());

        kms[0].set_failing(false);
        wait_for(first, HealthState::Healthy).await;
        assert!(health.all_healthy());

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn version_mismatch_publishes_unhealthy() {
        let mut mock = MockKmsService::new();
        mock.expect_version().returning(|| {
            Err(KmsError::VersionMismatch {
                local: common::protocol::KMS_API_VERSION.into(),
                remote: "v2".into(),
            })
        });
        mock.expect_encrypt().never();
        let transformer = Arc::new(EnvelopeTransformer::new(
            "future",
            Arc::new(mock),
            DekCache::new(4),
            Duration::from_secs(1),
        ));
        let reg = ProviderRegistry::new(vec![transformer], ["secrets"]).unwrap();
        let cancel = CancellationToken::new();
        let (health, handles) = spawn_probers(&reg, INTERVAL, TIMEOUT, cancel.clone());

        let check = &health.checks()[0];
        wait_for(check, HealthState::Unhealthy).await;
        let error = check.status().last_error.clone().unwrap();
        assert!(error.contains("unsupported KMS API version"), "{error}");

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn cancelled_probers_stop_probing() {
        let kms = [Arc::new(FakeKms::default())];
        let reg = registry(&kms);
        let cancel = CancellationToken::new();
        let (health, handles) = spawn_probers(&reg, INTERVAL, TIMEOUT, cancel.clone());
        wait_for(&health.checks()[0], HealthState::Healthy).await;

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
        let calls = kms[0].version_calls.load(Ordering::SeqCst);
        time::sleep(INTERVAL * 3).await;
        assert_eq!(kms[0].version_calls.load(Ordering::SeqCst), calls);
    }
}
