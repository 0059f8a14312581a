//! Messages exchanged between components.
//!
//! Two families live here:
//! - the KMS plugin RPC ([`KmsRequest`] / [`KmsResponse`]), sent as JSON
//!   inside length-delimited frames over a Unix socket;
//! - the JSON bodies of the service's HTTP API.
//!
//! Byte fields are carried as standard base64 strings.

use serde::{Deserialize, Serialize};

/// KMS plugin API version spoken by both ends. A mismatch is a hard failure.
pub const KMS_API_VERSION: &str = "v1beta1";

// ---------------------------------------------------------------------------
// KMS plugin RPC
// ---------------------------------------------------------------------------

/// Request sent to a KMS plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum KmsRequest {
    /// Version handshake; also used as a liveness probe.
    Version { version: String },
    /// Wrap a plaintext DEK.
    Encrypt {
        version: String,
        #[serde(with = "base64_bytes")]
        plain: Vec<u8>,
    },
    /// Unwrap an encrypted DEK.
    Decrypt {
        version: String,
        #[serde(with = "base64_bytes")]
        cipher: Vec<u8>,
    },
}

impl KmsRequest {
    /// Protocol version carried by this request.
    pub fn version(&self) -> &str {
        match self {
            KmsRequest::Version { version }
            | KmsRequest::Encrypt { version, .. }
            | KmsRequest::Decrypt { version, .. } => version,
        }
    }

    /// Short method name, for logs.
    pub fn method(&self) -> &'static str {
        match self {
            KmsRequest::Version { .. } => "version",
            KmsRequest::Encrypt { .. } => "encrypt",
            KmsRequest::Decrypt { .. } => "decrypt",
        }
    }
}

/// Reply from a KMS plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum KmsResponse {
    Version {
        version: String,
        runtime_name: String,
        runtime_version: String,
    },
    Encrypt {
        #[serde(with = "base64_bytes")]
        cipher: Vec<u8>,
    },
    Decrypt {
        #[serde(with = "base64_bytes")]
        plain: Vec<u8>,
    },
    Error {
        code: PluginErrorCode,
        message: String,
    },
}

impl KmsResponse {
    /// Build an error reply.
    pub fn error(code: PluginErrorCode, message: impl Into<String>) -> Self {
        KmsResponse::Error {
            code,
            message: message.into(),
        }
    }
}

/// Error codes a plugin may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginErrorCode {
    /// The request carried an unsupported [`KMS_API_VERSION`].
    VersionMismatch,
    /// The plugin cannot reach its key material right now.
    Unavailable,
    /// The request payload could not be processed (e.g. undecodable cipher).
    InvalidRequest,
    /// Anything else.
    Internal,
}

// ---------------------------------------------------------------------------
// Transform endpoints
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/transform/encrypt` and `POST /v1/transform/decrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRequest {
    /// Resource kind the value belongs to (e.g. `"secrets"`).
    pub resource: String,
    /// Storage key path; bound as authenticated data.
    pub key: String,
    /// Value bytes: plaintext for encrypt, stored envelope for decrypt.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Successful response body for both transform endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformResponse {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"kms_unavailable"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /healthz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` when every check is healthy, `"degraded"` otherwise.
    pub status: String,
    pub checks: Vec<CheckStatus>,
}

/// One provider's entry in [`HealthResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStatus {
    /// Check identifier, e.g. `"kms-provider-0"`.
    pub name: String,
    /// Configured provider name.
    pub provider: String,
    /// `"unknown"`, `"healthy"` or `"unhealthy"`.
    pub state: String,
    /// Unix seconds of the last completed probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Serde adapter carrying `Vec<u8>` as a standard base64 string.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
