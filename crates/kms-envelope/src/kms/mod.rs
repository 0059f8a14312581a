//! KMS plugin access.
//!
//! The envelope transformer and the health probers only see the narrow
//! [`KmsService`] capability; [`KmsClient`] is the Unix-socket implementation.
//! A different remote protocol plugs in by implementing the trait.

pub mod client;

#[cfg(test)]
pub(crate) mod testing;

pub use client::KmsClient;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a KMS backend.
///
/// Transport internals are folded into this fixed set.
#[derive(Debug, Clone, Error)]
pub enum KmsError {
    /// The plugin socket refused or does not exist.
    #[error("plugin unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete within its time budget.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The plugin speaks a different API version.
    #[error("unsupported KMS API version {remote:?} (expected {local:?})")]
    VersionMismatch { local: String, remote: String },

    /// The plugin answered with an error.
    #[error("plugin rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The reply could not be decoded or did not match the request.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Version handshake result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub runtime_name: String,
    pub runtime_version: String,
}

/// Remote key-encryption capability of one provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KmsService: Send + Sync {
    /// Wrap a plaintext DEK.
    async fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Unwrap an encrypted DEK.
    async fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Perform the version handshake. Fails with [`KmsError::VersionMismatch`]
    /// if the remote does not speak the supported version.
    async fn version(&self) -> Result<VersionInfo, KmsError>;
}
