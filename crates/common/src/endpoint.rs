//! Unix-socket endpoints of KMS plugins.
//!
//! Accepted forms:
//! - `unix:///run/kms/plugin.sock`: filesystem socket;
//! - `unix:///@kms-provider.sock`: Linux abstract socket `kms-provider.sock`.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};

const UNIX_SCHEME: &str = "unix://";

/// The endpoint string could not be parsed.
#[derive(Debug, Error)]
#[error("invalid endpoint {endpoint:?}: {reason}")]
pub struct EndpointError {
    pub endpoint: String,
    pub reason: &'static str,
}

/// A parsed plugin socket address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEndpoint {
    Path(PathBuf),
    Abstract(String),
}

impl SocketEndpoint {
    /// Parse a `unix://` endpoint string.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] for any other scheme or an empty address.
    pub fn parse(endpoint: &str) -> Result<Self, EndpointError> {
        let err = |reason| EndpointError {
            endpoint: endpoint.to_owned(),
            reason,
        };
        let rest = endpoint
            .trim()
            .strip_prefix(UNIX_SCHEME)
            .ok_or_else(|| err("only the unix:// scheme is supported"))?;

        if let Some(name) = rest.strip_prefix("/@").or_else(|| rest.strip_prefix('@')) {
            if name.is_empty() {
                return Err(err("abstract socket name is empty"));
            }
            return Ok(SocketEndpoint::Abstract(name.to_owned()));
        }
        if !rest.starts_with('/') || rest.len() < 2 {
            return Err(err("socket path must be absolute"));
        }
        Ok(SocketEndpoint::Path(PathBuf::from(rest)))
    }

    /// Open a client connection to this endpoint.
    pub async fn connect(&self) -> io::Result<UnixStream> {
        match self {
            SocketEndpoint::Path(path) => UnixStream::connect(path).await,
            SocketEndpoint::Abstract(name) => connect_abstract(name),
        }
    }

    /// Bind a listener on this endpoint. Must be called inside a tokio runtime.
    pub fn bind(&self) -> io::Result<UnixListener> {
        match self {
            SocketEndpoint::Path(path) => UnixListener::bind(path),
            SocketEndpoint::Abstract(name) => bind_abstract(name),
        }
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketEndpoint::Path(path) => write!(f, "{UNIX_SCHEME}{}", path.display()),
            SocketEndpoint::Abstract(name) => write!(f, "{UNIX_SCHEME}/@{name}"),
        }
    }
}

#[cfg(target_os = "linux")]
fn connect_abstract(name: &str) -> io::Result<UnixStream> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixStream as StdUnixStream};

    // Connecting to a local socket does not block for any meaningful time.
    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    let stream = StdUnixStream::connect_addr(&addr)?;
    stream.set_nonblocking(true)?;
    UnixStream::from_std(stream)
}

#[cfg(target_os = "linux")]
fn bind_abstract(name: &str) -> io::Result<UnixListener> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixListener as StdUnixListener};

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    let listener = StdUnixListener::bind_addr(&addr)?;
    listener.set_nonblocking(true)?;
    UnixListener::from_std(listener)
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(_name: &str) -> io::Result<UnixStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract unix sockets require Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
fn bind_abstract(_name: &str) -> io::Result<UnixListener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract unix sockets require Linux",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filesystem_path() {
        let ep = SocketEndpoint::parse("unix:///run/kms/plugin.sock").unwrap();
        assert_eq!(ep, SocketEndpoint::Path(PathBuf::from("/run/kms/plugin.sock")));
        assert_eq!(ep.to_string(), "unix:///run/kms/plugin.sock");
    }

    #[test]
    fn parses_abstract_name() {
        let ep = SocketEndpoint::parse("unix:///@kms-provider.sock").unwrap();
        assert_eq!(ep, SocketEndpoint::Abstract("kms-provider.sock".into()));
        assert_eq!(ep.to_string(), "unix:///@kms-provider.sock");
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(SocketEndpoint::parse("tcp://127.0.0.1:9000").is_err());
        assert!(SocketEndpoint::parse("/run/kms.sock").is_err());
    }

    #[test]
    fn rejects_empty_addresses() {
        assert!(SocketEndpoint::parse("unix://").is_err());
        assert!(SocketEndpoint::parse("unix:///").is_err());
        assert!(SocketEndpoint::parse("unix:///@").is_err());
        assert!(SocketEndpoint::parse("unix://relative.sock").is_err());
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ep = SocketEndpoint::Path(dir.path().join("absent.sock"));
        assert!(ep.connect().await.is_err());
    }

    #[tokio::test]
    async fn bind_then_connect() {
        let dir = tempfile::tempdir().unwrap();
        let ep = SocketEndpoint::Path(dir.path().join("plugin.sock"));
        let listener = ep.bind().unwrap();
        let (client, server) = tokio::join!(ep.connect(), listener.accept());
        assert!(client.is_ok());
        assert!(server.is_ok());
    }
}
