//! KMS RPC server.
//!
//! For each incoming Unix-socket connection the plugin:
//! 1. Reads length-delimited JSON [`KmsRequest`] frames.
//! 2. Answers each with one [`KmsResponse`] frame.
//! 3. Stops when the peer closes or the plugin shuts down.
//!
//! "Encryption" is base64: the wrapped DEK is readable by anyone. This plugin
//! exists to exercise the RPC contract, never to protect real keys.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use common::endpoint::{EndpointError, SocketEndpoint};
use common::protocol::{KmsRequest, KmsResponse, PluginErrorCode, KMS_API_VERSION};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runtime name reported in the version handshake.
pub const RUNTIME_NAME: &str = "base64-kms-plugin";

/// Observable plugin state, shared between the server task and its handle.
#[derive(Debug, Default)]
struct PluginState {
    failed: AtomicBool,
    last_encrypt_request: Mutex<Option<Vec<u8>>>,
    encrypt_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
}

impl PluginState {
    fn handle(&self, request: KmsRequest) -> KmsResponse {
        if request.version() != KMS_API_VERSION {
            return KmsResponse::error(
                PluginErrorCode::VersionMismatch,
                format!(
                    "unsupported API version {:?}; this plugin speaks {KMS_API_VERSION}",
                    request.version()
                ),
            );
        }
        if self.failed.load(Ordering::SeqCst) {
            return KmsResponse::error(PluginErrorCode::Unavailable, "plugin is in failed state");
        }

        match request {
            KmsRequest::Version { .. } => KmsResponse::Version {
                version: KMS_API_VERSION.into(),
                runtime_name: RUNTIME_NAME.into(),
                runtime_version: env!("CARGO_PKG_VERSION").into(),
            },
            KmsRequest::Encrypt { plain, .. } => {
                self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
                let cipher = STANDARD.encode(&plain).into_bytes();
                *self.last_encrypt_request.lock() = Some(plain);
                KmsResponse::Encrypt { cipher }
            }
            KmsRequest::Decrypt { cipher, .. } => {
                self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
                match STANDARD.decode(&cipher) {
                    Ok(plain) => KmsResponse::Decrypt { plain },
                    Err(e) => KmsResponse::error(
                        PluginErrorCode::InvalidRequest,
                        format!("cipher is not base64: {e}"),
                    ),
                }
            }
        }
    }
}

/// A not-yet-started plugin bound to one endpoint.
#[derive(Debug)]
pub struct Base64Plugin {
    endpoint: SocketEndpoint,
    state: Arc<PluginState>,
}

impl Base64Plugin {
    /// Create a plugin for `endpoint` (`unix:///path` or `unix:///@name`).
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] if the endpoint cannot be parsed.
    pub fn new(endpoint: &str) -> Result<Self, EndpointError> {
        Ok(Self {
            endpoint: SocketEndpoint::parse(endpoint)?,
            state: Arc::new(PluginState::default()),
        })
    }

    /// Bind the socket and spawn the accept loop.
    ///
    /// The socket is listening when this returns. A stale socket file left at
    /// the same path by an earlier run is removed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn start(self) -> Result<PluginHandle> {
        if let SocketEndpoint::Path(path) = &self.endpoint {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        let listener = self.endpoint.bind()?;
        info!(endpoint = %self.endpoint, "kms-plugin listening");

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(listener, self.state.clone(), shutdown.clone()));
        Ok(PluginHandle {
            endpoint: self.endpoint,
            state: self.state,
            shutdown,
            task,
        })
    }
}

/// Control handle of a running plugin.
#[derive(Debug)]
pub struct PluginHandle {
    endpoint: SocketEndpoint,
    state: Arc<PluginState>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl PluginHandle {
    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Make every subsequent RPC fail with `unavailable`.
    pub fn enter_failed_state(&self) {
        self.state.failed.store(true, Ordering::SeqCst);
        warn!(endpoint = %self.endpoint, "kms-plugin entered failed state");
    }

    /// Resume answering RPCs normally.
    pub fn exit_failed_state(&self) {
        self.state.failed.store(false, Ordering::SeqCst);
        info!(endpoint = %self.endpoint, "kms-plugin left failed state");
    }

    pub fn is_failed(&self) -> bool {
        self.state.failed.load(Ordering::SeqCst)
    }

    /// Plaintext of the most recent successful `Encrypt` request.
    pub fn last_encrypt_request(&self) -> Option<Vec<u8>> {
        self.state.last_encrypt_request.lock().clone()
    }

    pub fn encrypt_calls(&self) -> usize {
        self.state.encrypt_calls.load(Ordering::SeqCst)
    }

    pub fn decrypt_calls(&self) -> usize {
        self.state.decrypt_calls.load(Ordering::SeqCst)
    }

    /// Stop accepting connections, wait for the accept loop and remove the
    /// socket file.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "kms-plugin accept loop panicked");
        }
        if let SocketEndpoint::Path(path) = &self.endpoint {
            if let Err(e) = remove_socket_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove socket file");
            }
        }
        info!(endpoint = %self.endpoint, "kms-plugin stopped");
    }
}

/// Remove a socket file; one that is already gone is not an error.
fn remove_socket_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Accept loop: serve each connection on its own task until `shutdown` fires.
async fn run(listener: UnixListener, state: Arc<PluginState>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("accepted plugin connection");
                    let state = state.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            res = handle_connection(stream, state) => {
                                if let Err(e) = res {
                                    warn!(error = %e, "connection error");
                                }
                            }
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
    }
}

/// Answer request frames on one connection until the peer hangs up.
async fn handle_connection(stream: UnixStream, state: Arc<PluginState>) -> Result<()> {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let response = match serde_json::from_slice::<KmsRequest>(&frame) {
            Ok(request) => {
                debug!(method = request.method(), "kms request");
                state.handle(request)
            }
            Err(e) => KmsResponse::error(
                PluginErrorCode::InvalidRequest,
                format!("undecodable request: {e}"),
            ),
        };
        let body = serde_json::to_vec(&response)?;
        framed.send(Bytes::from(body)).await?;
    }
    Ok(())
}
