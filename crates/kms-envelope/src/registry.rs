//! [`ProviderRegistry`]: provider name → transformer, plus resource routing.
//!
//! Writes of a covered resource always use the first configured provider.
//! Reads dispatch on the provider name embedded in the envelope prefix, so
//! values written by any configured provider stay readable after the write
//! provider changes. Values of resources not covered pass through unchanged.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use common::TransformError;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::dek::DekCache;
use crate::envelope::{format, EnvelopeTransformer, ValueContext};
use crate::kms::KmsClient;

/// Errors building a [`ProviderRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry needs at least one provider")]
    Empty,

    #[error("provider {0:?} registered more than once")]
    DuplicateProvider(String),
}

/// Routes store reads and writes to per-provider transformers.
#[derive(Debug)]
pub struct ProviderRegistry {
    /// Transformers in configuration order; index 0 encrypts writes.
    ordered: Vec<Arc<EnvelopeTransformer>>,
    by_name: HashMap<String, Arc<EnvelopeTransformer>>,
    resources: HashSet<String>,
}

impl ProviderRegistry {
    /// Build a registry from transformers in priority order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if `transformers` is empty or names repeat.
    pub fn new<I>(transformers: Vec<Arc<EnvelopeTransformer>>, resources: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        if transformers.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut by_name = HashMap::with_capacity(transformers.len());
        for t in &transformers {
            if by_name.insert(t.provider().to_owned(), t.clone()).is_some() {
                return Err(RegistryError::DuplicateProvider(t.provider().to_owned()));
            }
        }
        Ok(Self {
            ordered: transformers,
            by_name,
            resources: resources.into_iter().map(Into::into).collect(),
        })
    }

    /// Create a [`KmsClient`], [`DekCache`] and transformer per configured provider.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint is invalid or names repeat.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut transformers = Vec::with_capacity(cfg.providers.len());
        for provider in &cfg.providers {
            let client = KmsClient::new(&provider.name, &provider.endpoint, provider.timeout())
                .with_context(|| format!("invalid endpoint for provider {:?}", provider.name))?;
            info!(
                provider = %provider.name,
                endpoint = %client.endpoint(),
                cache_size = provider.cachesize,
                "registered KMS provider"
            );
            transformers.push(Arc::new(EnvelopeTransformer::new(
                &provider.name,
                Arc::new(client),
                DekCache::new(provider.cachesize),
                provider.timeout(),
            )));
        }
        Ok(Self::new(transformers, cfg.resources.iter().cloned())?)
    }

    /// Transformers in configuration order.
    pub fn providers(&self) -> &[Arc<EnvelopeTransformer>] {
        &self.ordered
    }

    pub fn get(&self, provider: &str) -> Option<&Arc<EnvelopeTransformer>> {
        self.by_name.get(provider)
    }

    /// Whether values of `resource` are enveloped.
    pub fn covers(&self, resource: &str) -> bool {
        self.resources.contains(resource)
    }

    /// Transformer that encrypts new writes.
    pub fn write_transformer(&self) -> &Arc<EnvelopeTransformer> {
        &self.ordered[0]
    }

    /// Transformer named by the envelope prefix of `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::UnknownProvider`] if `raw` carries no KMS
    /// prefix or names a provider that is not registered.
    pub fn read_transformer(&self, raw: &[u8]) -> Result<&Arc<EnvelopeTransformer>, TransformError> {
        let name = format::embedded_provider(raw)
            .ok_or_else(|| TransformError::UnknownProvider(String::new()))?;
        self.by_name
            .get(name)
            .ok_or_else(|| TransformError::UnknownProvider(name.to_owned()))
    }

    /// Transform a value of `resource` for storage.
    ///
    /// # Errors
    ///
    /// Propagates the write transformer's [`TransformError`].
    pub async fn transform_to_storage(
        &self,
        resource: &str,
        plaintext: &[u8],
        ctx: &ValueContext,
    ) -> Result<Vec<u8>, TransformError> {
        if !self.covers(resource) {
            debug!(resource, "resource not covered, storing as-is");
            return Ok(plaintext.to_vec());
        }
        self.write_transformer()
            .transform_to_storage(plaintext, ctx)
            .await
    }

    /// Recover a stored value of `resource`.
    ///
    /// # Errors
    ///
    /// [`TransformError::UnknownProvider`] when no registered provider matches
    /// the envelope, otherwise the selected transformer's error.
    pub async fn transform_from_storage(
        &self,
        resource: &str,
        raw: &[u8],
        ctx: &ValueContext,
    ) -> Result<Vec<u8>, TransformError> {
        if !self.covers(resource) {
            return Ok(raw.to_vec());
        }
        self.read_transformer(raw)?
            .transform_from_storage(raw, ctx)
            .await
    }
}
