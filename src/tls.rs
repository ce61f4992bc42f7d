//! TLS client side of TLS-unwrap
//!
//! In TLS-unwrap mode the proxy performs a TLS handshake with the remote
//! endpoint and relays the decrypted stream to the local side in plaintext.
//!
//! - TLS 1.2 and 1.3 only
//! - Mozilla root bundle (webpki-roots), plus optional extra PEM roots
//! - Hostname verification against the configured server name (SNI)

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::version::{TLS12, TLS13};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::certs;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::info;
use webpki_roots::TLS_SERVER_ROOTS;

/// TLS configuration errors
#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("Failed to read CA file {path}: {source}")]
    CaFile {
        path: String,
        source: std::io::Error,
    },

    #[error("No certificates found in {0}")]
    NoCertificates(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),
}

/// Load every PEM certificate from `path`
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|source| TlsConfigError::CaFile {
        path: display.clone(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    let certs = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsConfigError::CaFile {
            path: display.clone(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsConfigError::NoCertificates(display));
    }

    Ok(certs)
}

/// Upstream TLS config (proxy acts as client with real verification)
pub struct UpstreamTlsConfig {
    config: Arc<ClientConfig>,
}

impl UpstreamTlsConfig {
    /// Client config trusting the webpki roots
    pub fn new() -> Result<Self, TlsConfigError> {
        Self::with_extra_roots(Vec::new())
    }

    /// Client config trusting the webpki roots plus `extra_roots`
    pub fn with_extra_roots(
        extra_roots: Vec<CertificateDer<'static>>,
    ) -> Result<Self, TlsConfigError> {
        let mut root_store = RootCertStore::empty();

        // Add webpki roots (Mozilla CA bundle)
        root_store.extend(TLS_SERVER_ROOTS.iter().cloned());

        let extra_count = extra_roots.len();
        for cert in extra_roots {
            root_store
                .add(cert)
                .map_err(|e| TlsConfigError::InvalidCertificate(e.to_string()))?;
        }

        let config = ClientConfig::builder_with_protocol_versions(&[&TLS12, &TLS13])
            .with_root_certificates(root_store)
            .with_no_client_auth();

        info!(
            roots_count = TLS_SERVER_ROOTS.len(),
            extra_roots = extra_count,
            "Upstream TLS config created"
        );

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Client config with the roots from a PEM file added
    pub fn from_ca_file(path: &Path) -> Result<Self, TlsConfigError> {
        Self::with_extra_roots(load_certs(path)?)
    }

    /// Get rustls ClientConfig
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }
}

/// TLS-unwrap target: where to handshake and which name to verify
#[derive(Clone)]
pub struct TlsUnwrap {
    connector: TlsConnector,
    host: String,
    server_name: ServerName<'static>,
}

impl TlsUnwrap {
    pub fn new(config: &UpstreamTlsConfig, host: &str) -> Result<Self, TlsConfigError> {
        let server_name = parse_server_name(host)?;
        Ok(Self {
            connector: TlsConnector::from(config.client_config()),
            host: host.to_owned(),
            server_name,
        })
    }

    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    /// Server name as configured, for log and error messages
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Run the client handshake over an established TCP connection
    pub async fn connect(&self, stream: TcpStream) -> std::io::Result<TlsStream<TcpStream>> {
        self.connector
            .connect(self.server_name.clone(), stream)
            .await
    }
}

impl std::fmt::Debug for TlsUnwrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsUnwrap")
            .field("host", &self.host)
            .finish()
    }
}

/// Parse hostname into ServerName for SNI
pub fn parse_server_name(hostname: &str) -> Result<ServerName<'static>, TlsConfigError> {
    ServerName::try_from(hostname.to_owned())
        .map_err(|e| TlsConfigError::InvalidServerName(format!("{}: {}", hostname, e)))
}

/// Host part of a `host:port` address (brackets stripped for IPv6)
pub fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}
