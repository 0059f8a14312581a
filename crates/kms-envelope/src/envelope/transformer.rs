//! [`EnvelopeTransformer`]: per-provider wrap/unwrap of stored values.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::TransformError;
use tokio::time::{self, Instant};
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use super::format::{self, EnvelopeBody};
use super::ValueContext;
use crate::crypto::cipher;
use crate::dek::{fingerprint, DekBytes, DekCache};
use crate::kms::{KmsError, KmsService};

/// Transforms values to and from envelopes for one KMS provider.
pub struct EnvelopeTransformer {
    provider: String,
    prefix: Vec<u8>,
    kms: Arc<dyn KmsService>,
    cache: DekCache,
    kms_timeout: Duration,
}

impl EnvelopeTransformer {
    /// Create a transformer writing envelopes tagged with `provider`.
    ///
    /// `kms_timeout` caps every remote call; a tighter per-value deadline from
    /// [`ValueContext`] wins.
    pub fn new(
        provider: impl Into<String>,
        kms: Arc<dyn KmsService>,
        cache: DekCache,
        kms_timeout: Duration,
    ) -> Self {
        let provider = provider.into();
        Self {
            prefix: format::provider_prefix(&provider).into_bytes(),
            provider,
            kms,
            cache,
            kms_timeout,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Prefix every envelope of this provider starts with.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn cache(&self) -> &DekCache {
        &self.cache
    }

    pub fn kms(&self) -> &Arc<dyn KmsService> {
        &self.kms
    }

    /// Seal `plaintext` under a fresh DEK and wrap the DEK with the KMS.
    ///
    /// # Errors
    ///
    /// [`TransformError::EncryptionFailure`] if sealing fails or the wrapped
    /// DEK cannot be framed; [`TransformError::KmsUnavailable`] if the KMS
    /// call fails or misses its deadline.
    #[instrument(skip_all, fields(provider = %self.provider))]
    pub async fn transform_to_storage(
        &self,
        plaintext: &[u8],
        ctx: &ValueContext,
    ) -> Result<Vec<u8>, TransformError> {
        let dek = DekBytes::new(cipher::generate_dek());
        let sealed = cipher::seal(plaintext, dek.as_bytes(), ctx.authenticated_data())
            .map_err(|e| TransformError::EncryptionFailure(e.to_string()))?;

        let encrypted_dek = self.remote(ctx, self.kms.encrypt(dek.as_bytes())).await?;
        drop(dek);

        let envelope = format::assemble(&self.prefix, &encrypted_dek, &sealed)?;
        debug!(
            dek = %fingerprint(&encrypted_dek),
            bytes = envelope.len(),
            "value enveloped"
        );
        Ok(envelope)
    }

    /// Recover the plaintext of an envelope written by this provider.
    ///
    /// # Errors
    ///
    /// [`TransformError::UnknownProvider`] if `raw` does not carry this
    /// provider's prefix; [`TransformError::MalformedEnvelope`] if the body
    /// cannot be split; [`TransformError::KmsUnavailable`] if the DEK is not
    /// cached and the KMS cannot decrypt it; [`TransformError::IntegrityFailure`]
    /// if the payload does not authenticate under `ctx`.
    #[instrument(skip_all, fields(provider = %self.provider))]
    pub async fn transform_from_storage(
        &self,
        raw: &[u8],
        ctx: &ValueContext,
    ) -> Result<Vec<u8>, TransformError> {
        let body = raw.strip_prefix(self.prefix.as_slice()).ok_or_else(|| {
            TransformError::UnknownProvider(
                format::embedded_provider(raw)
                    .unwrap_or_default()
                    .to_owned(),
            )
        })?;
        let body = EnvelopeBody::parse(body)?;

        // A read joining another read's in-flight fetch still answers to its
        // own deadline.
        let budget = self.budget(ctx);
        let fetch = self.cache.get_or_try_fetch(body.encrypted_dek, || {
            self.unwrap_dek(body.encrypted_dek, ctx)
        });
        let dek = match time::timeout(budget, fetch).await {
            Ok(dek) => dek?,
            Err(_) => {
                warn!(budget = ?budget, "DEK lookup exceeded its deadline");
                return Err(self.unavailable(format!(
                    "deadline of {budget:?} exceeded waiting for DEK"
                )));
            }
        };

        cipher::open(body.payload, dek.as_bytes(), ctx.authenticated_data()).map_err(|e| {
            warn!(error = %e, "payload failed authentication");
            TransformError::IntegrityFailure(e.to_string())
        })
    }

    async fn unwrap_dek(
        &self,
        encrypted_dek: &[u8],
        ctx: &ValueContext,
    ) -> Result<DekBytes, TransformError> {
        let (hits, misses) = self.cache.stats();
        debug!(
            dek = %fingerprint(encrypted_dek),
            cache_hits = hits,
            cache_misses = misses,
            "DEK cache miss, decrypting via KMS"
        );
        let plain = Zeroizing::new(self.remote(ctx, self.kms.decrypt(encrypted_dek)).await?);
        DekBytes::from_slice(&plain).map_err(|e| TransformError::IntegrityFailure(e.to_string()))
    }

    /// Run a KMS call under the tighter of the provider timeout and the
    /// value's deadline.
    async fn remote<T>(
        &self,
        ctx: &ValueContext,
        call: impl Future<Output = Result<T, KmsError>>,
    ) -> Result<T, TransformError> {
        let budget = self.budget(ctx);
        if budget.is_zero() {
            return Err(self.unavailable("request deadline already passed".into()));
        }

        match time::timeout(budget, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(error = %e, "KMS call failed");
                Err(self.unavailable(e.to_string()))
            }
            Err(_) => {
                warn!(budget = ?budget, "KMS call exceeded its deadline");
                Err(self.unavailable(format!("deadline of {budget:?} exceeded")))
            }
        }
    }

    /// Time left for remote work on behalf of `ctx`.
    fn budget(&self, ctx: &ValueContext) -> Duration {
        match ctx.deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(self.kms_timeout),
            None => self.kms_timeout,
        }
    }

    fn unavailable(&self, reason: String) -> TransformError {
        TransformError::KmsUnavailable {
            provider: self.provider.clone(),
            reason,
        }
    }
}

impl std::fmt::Debug for EnvelopeTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeTransformer")
            .field("provider", &self.provider)
            .field("cache", &self.cache)
            .field("kms_timeout", &self.kms_timeout)
            .finish()
    }
}
