//! Proxy error types

use thiserror::Error;

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Connection-level errors
///
/// All of these are fatal to the connection they occur on and never to the
/// listener.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Remote endpoint unreachable or refused
    #[error("Remote connection failed: {0}")]
    RemoteConnect(#[source] std::io::Error),

    /// Remote endpoint did not accept the connection in time
    #[error("Remote connection timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// TLS handshake with the remote failed (TLS-unwrap mode)
    #[error("TLS handshake failed for {host}: {source}")]
    TlsHandshake {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Mirror sink unreachable or refused
    #[error("Mirror {direction} connection failed: {source}")]
    MirrorConnect {
        direction: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Create a TLS handshake error
    pub fn tls_handshake(host: impl Into<String>, source: std::io::Error) -> Self {
        Self::TlsHandshake {
            host: host.into(),
            source,
        }
    }

    /// Create a mirror connection error
    pub fn mirror(direction: &'static str, source: std::io::Error) -> Self {
        Self::MirrorConnect { direction, source }
    }
}
