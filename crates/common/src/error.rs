//! Common error types shared across crates.

use thiserror::Error;

/// Failure of a value transformation (write or read path).
///
/// Only [`TransformError::KmsUnavailable`] is transient; whether the store
/// operation is retried is the caller's decision.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The stored bytes could not be parsed as an envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// No transformer is registered for the provider named in the envelope.
    #[error("no transformer registered for provider {0:?}")]
    UnknownProvider(String),

    /// The remote KMS call failed or ran past its deadline.
    #[error("KMS provider {provider:?} unavailable: {reason}")]
    KmsUnavailable {
        /// Provider whose plugin failed.
        provider: String,
        /// Transport- or plugin-level failure description.
        reason: String,
    },

    /// Authenticated decryption failed: wrong context, tampering or corruption.
    #[error("integrity check failed: {0}")]
    IntegrityFailure(String),

    /// The local cipher could not seal the value.
    #[error("encryption failure: {0}")]
    EncryptionFailure(String),
}

impl TransformError {
    /// Stable machine-readable code, used in API error bodies and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            TransformError::MalformedEnvelope(_) => "malformed_envelope",
            TransformError::UnknownProvider(_) => "unknown_provider",
            TransformError::KmsUnavailable { .. } => "kms_unavailable",
            TransformError::IntegrityFailure(_) => "integrity_failure",
            TransformError::EncryptionFailure(_) => "encryption_failure",
        }
    }

    /// Returns `true` if retrying the whole store operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransformError::KmsUnavailable { .. })
    }
}

/// Top-level service error type.
///
/// Variants map to HTTP status codes returned to callers:
/// - [`ServiceError::BadRequest`] → 400
/// - [`ServiceError::Integrity`] → 422
/// - [`ServiceError::EncryptionFailure`] → 500
/// - [`ServiceError::Unavailable`] → 503
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request was malformed or named data this service cannot route.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Stored data failed authentication.
    #[error("integrity failure: {0}")]
    Integrity(String),

    /// Encryption failed due to a crypto-layer error.
    #[error("encryption failure: {0}")]
    EncryptionFailure(String),

    /// A KMS plugin is temporarily unavailable.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::Integrity(_) => 422,
            ServiceError::EncryptionFailure(_) => 500,
            ServiceError::Unavailable(_) => 503,
        }
    }
}

impl From<TransformError> for ServiceError {
    fn from(err: TransformError) -> Self {
        let msg = err.to_string();
        match err {
            TransformError::MalformedEnvelope(_) | TransformError::UnknownProvider(_) => {
                ServiceError::BadRequest(msg)
            }
            TransformError::KmsUnavailable { .. } => ServiceError::Unavailable(msg),
            TransformError::IntegrityFailure(_) => ServiceError::Integrity(msg),
            TransformError::EncryptionFailure(_) => ServiceError::EncryptionFailure(msg),
        }
    }
}
