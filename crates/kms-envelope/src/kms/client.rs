//! [`KmsClient`]: Unix-socket RPC client for one KMS plugin.
//!
//! Every call opens a fresh connection, writes one length-delimited JSON
//! request frame and reads one reply frame. The whole exchange runs under the
//! client's per-call timeout.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use common::endpoint::{EndpointError, SocketEndpoint};
use common::protocol::{KmsRequest, KmsResponse, PluginErrorCode, KMS_API_VERSION};
use futures::{SinkExt, StreamExt};
use tokio::time;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use super::{KmsError, KmsService, VersionInfo};

/// RPC client bound to one named provider.
#[derive(Debug, Clone)]
pub struct KmsClient {
    provider: String,
    endpoint: SocketEndpoint,
    timeout: Duration,
}

impl KmsClient {
    /// Create a client for `provider` reachable at `endpoint`.
    ///
    /// No connection is made until the first call.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] if `endpoint` is not a valid `unix://` address.
    pub fn new(
        provider: impl Into<String>,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, EndpointError> {
        Ok(Self {
            provider: provider.into(),
            endpoint: SocketEndpoint::parse(endpoint)?,
            timeout,
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Send `request` and return the plugin's non-error reply.
    async fn call(&self, request: KmsRequest) -> Result<KmsResponse, KmsError> {
        let method = request.method();
        let response = time::timeout(self.timeout, self.round_trip(request))
            .await
            .map_err(|_| KmsError::Timeout(self.timeout))??;
        debug!(provider = %self.provider, method, "kms call completed");

        match response {
            KmsResponse::Error { code, message } => Err(rejected(code, message)),
            other => Ok(other),
        }
    }

    async fn round_trip(&self, request: KmsRequest) -> Result<KmsResponse, KmsError> {
        let stream = self.endpoint.connect().await.map_err(transport_error)?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        let body = serde_json::to_vec(&request)
            .map_err(|e| KmsError::Protocol(format!("failed to encode request: {e}")))?;
        framed
            .send(Bytes::from(body))
            .await
            .map_err(transport_error)?;

        let frame = framed
            .next()
            .await
            .ok_or_else(|| KmsError::Protocol("connection closed before reply".into()))?
            .map_err(transport_error)?;

        serde_json::from_slice(&frame)
            .map_err(|e| KmsError::Protocol(format!("undecodable reply: {e}")))
    }

    fn request_version() -> String {
        KMS_API_VERSION.to_owned()
    }
}

#[async_trait]
impl KmsService for KmsClient {
    async fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, KmsError> {
        let request = KmsRequest::Encrypt {
            version: Self::request_version(),
            plain: plain.to_vec(),
        };
        match self.call(request).await? {
            KmsResponse::Encrypt { cipher } => Ok(cipher),
            other => Err(unexpected("encrypt", &other)),
        }
    }

    async fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, KmsError> {
        let request = KmsRequest::Decrypt {
            version: Self::request_version(),
            cipher: cipher.to_vec(),
        };
        match self.call(request).await? {
            KmsResponse::Decrypt { plain } => Ok(plain),
            other => Err(unexpected("decrypt", &other)),
        }
    }

    async fn version(&self) -> Result<VersionInfo, KmsError> {
        let request = KmsRequest::Version {
            version: Self::request_version(),
        };
        match self.call(request).await? {
            KmsResponse::Version {
                version,
                runtime_name,
                runtime_version,
            } => {
                if version != KMS_API_VERSION {
                    return Err(KmsError::VersionMismatch {
                        local: KMS_API_VERSION.into(),
                        remote: version,
                    });
                }
                Ok(VersionInfo {
                    version,
                    runtime_name,
                    runtime_version,
                })
            }
            other => Err(unexpected("version", &other)),
        }
    }
}

/// Fold an I/O failure into the client error taxonomy.
fn transport_error(err: io::Error) -> KmsError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied => KmsError::Unreachable(err.to_string()),
        _ => KmsError::Protocol(format!("transport failure: {err}")),
    }
}

fn rejected(code: PluginErrorCode, message: String) -> KmsError {
    if code == PluginErrorCode::VersionMismatch {
        return KmsError::VersionMismatch {
            local: KMS_API_VERSION.into(),
            remote: message,
        };
    }
    let code = match code {
        PluginErrorCode::Unavailable => "unavailable",
        PluginErrorCode::InvalidRequest => "invalid_request",
        PluginErrorCode::VersionMismatch => "version_mismatch",
        PluginErrorCode::Internal => "internal",
    };
    KmsError::Rejected {
        code: code.into(),
        message,
    }
}

/// Replies may carry key material, so only the variant is reported.
fn unexpected(method: &str, reply: &KmsResponse) -> KmsError {
    let kind = match reply {
        KmsResponse::Version { .. } => "version",
        KmsResponse::Encrypt { .. } => "encrypt",
        KmsResponse::Decrypt { .. } => "decrypt",
        KmsResponse::Error { .. } => "error",
    };
    KmsError::Protocol(format!("unexpected {kind} reply to {method}"))
}
