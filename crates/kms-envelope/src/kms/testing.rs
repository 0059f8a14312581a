//! In-memory [`KmsService`] for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{KmsError, KmsService, VersionInfo};

/// Wraps DEKs by reversing them with a marker byte; can be switched into a
/// failing or slow mode.
#[derive(Debug, Default)]
pub(crate) struct FakeKms {
    failing: AtomicBool,
    delay_ms: AtomicUsize,
    pub(crate) encrypt_calls: AtomicUsize,
    pub(crate) decrypt_calls: AtomicUsize,
    pub(crate) version_calls: AtomicUsize,
}

const MARKER: u8 = 0xA5;

impl FakeKms {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub(crate) fn decrypts(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), KmsError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(KmsError::Unreachable("fake plugin down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KmsService for FakeKms {
    async fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, KmsError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        let mut cipher = vec![MARKER];
        cipher.extend(plain.iter().rev());
        Ok(cipher)
    }

    async fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, KmsError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        match cipher.split_first() {
            Some((&MARKER, rest)) => Ok(rest.iter().rev().copied().collect()),
            _ => Err(KmsError::Rejected {
                code: "invalid_request".into(),
                message: "not a fake-wrapped DEK".into(),
            }),
        }
    }

    async fn version(&self) -> Result<VersionInfo, KmsError> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        Ok(VersionInfo {
            version: common::protocol::KMS_API_VERSION.into(),
            runtime_name: "fake".into(),
            runtime_version: "0".into(),
        })
    }
}
