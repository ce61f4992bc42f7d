//! tcptap - intercepting TCP proxy
//!
//! tcptap accepts local connections, opens a matching connection to a remote
//! endpoint and relays bytes both ways, with optional inspection and
//! rewriting of the traffic on the way through.
//!
//! ## Features
//!
//! - **Relay**: full-duplex, one task per direction, torn down on the first failure
//! - **Match / replace**: regex matching (logged, counted) and regex rewriting of each chunk
//! - **Mirroring**: best-effort copies of either direction to extra sinks
//! - **TLS-unwrap**: TLS to the remote, plaintext to local clients
//! - **AMQP**: `basic.ack` frames rewritten into `basic.nack`, optionally after a random delay
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tcptap::{ConnectionProxy, MirrorAddrs, ProxySettings};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:9999").await?;
//!     let settings = Arc::new(ProxySettings::default());
//!
//!     let (stream, peer) = listener.accept().await?;
//!     let summary = ConnectionProxy::new(
//!         1,
//!         stream,
//!         peer,
//!         "127.0.0.1:5672".parse()?,
//!         MirrorAddrs::default(),
//!         settings,
//!     )
//!     .start()
//!     .await;
//!
//!     println!("{} bytes sent, {} bytes received", summary.sent, summary.received);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - `proxy` - connection lifecycle and relay
//! - `amqp` - frame codec and ack rewriting
//! - `inspect` - match / replace hooks
//! - `tls` - TLS-unwrap client side
//! - `server` - listener and dispatch
//! - `config` / `cli` - environment and command line

// Core proxy modules
pub mod config;
pub mod error;
pub mod logger;
pub mod proxy;
pub mod server;

// Traffic inspection and rewriting
pub mod amqp;
pub mod inspect;

// TLS utilities
pub mod tls;

// Command line
pub mod cli;

// Re-export commonly used types

/// Configuration types
pub use config::{Config, ResolvedEndpoints};

/// Errors
pub use error::ProxyError;

/// Logging
pub use logger::{Logger, NullLogger, SharedLogger, TracingLogger};

/// Connection proxy
pub use proxy::{
    Connection, ConnectionProxy, FailureLatch, MirrorAddrs, ProxyOutcome, ProxySettings,
    ProxySummary,
};

/// Listener
pub use server::{InspectOptions, ProxyServer};

/// Inspection hooks
pub use inspect::{create_matcher, create_replacer, Matcher, Replacer};

/// AMQP codec and rewriting
pub use amqp::{AckRewriter, Frame, FrameError, Message, MethodFrame};

/// TLS-unwrap
pub use tls::{TlsConfigError, TlsUnwrap, UpstreamTlsConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "tcptap");
    }
}
