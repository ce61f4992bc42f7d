//! Stream abstraction for proxied endpoints

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// A byte stream the proxy can own and relay
///
/// Nagle control is an explicit capability: a connection backed by a TCP
/// socket exposes it through [`Connection::nodelay_socket`], anything else
/// returns `None` and is skipped when `TCP_NODELAY` is requested.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    fn nodelay_socket(&self) -> Option<&TcpStream> {
        None
    }
}

impl Connection for TcpStream {
    fn nodelay_socket(&self) -> Option<&TcpStream> {
        Some(self)
    }
}

impl Connection for TlsStream<TcpStream> {
    fn nodelay_socket(&self) -> Option<&TcpStream> {
        Some(self.get_ref().0)
    }
}

impl Connection for tokio::io::DuplexStream {}

impl Connection for Box<dyn Connection> {
    fn nodelay_socket(&self) -> Option<&TcpStream> {
        (**self).nodelay_socket()
    }
}

/// Outcome of a `TCP_NODELAY` request on one connection
#[derive(Debug)]
pub enum NoDelay {
    Applied,
    Unsupported,
    Failed(std::io::Error),
}

/// Disable Nagle's algorithm if `conn` supports it
pub fn disable_nagle<C: Connection + ?Sized>(conn: &C) -> NoDelay {
    match conn.nodelay_socket() {
        Some(socket) => match socket.set_nodelay(true) {
            Ok(()) => NoDelay::Applied,
            Err(e) => NoDelay::Failed(e),
        },
        None => NoDelay::Unsupported,
    }
}
