use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::lookup_host;

use crate::amqp::AckRewriter;
use crate::cli::Cli;
use crate::proxy::{MirrorAddrs, ProxySettings};
use crate::server::InspectOptions;
use crate::tls::{host_of, TlsUnwrap, UpstreamTlsConfig};

/// Largest accepted `nack_delay_ms`
pub const MAX_NACK_DELAY_MS: u64 = 100;

/// Console log format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Endpoints
    pub local: String,
    pub remote: String,
    pub mirror_request: Option<String>,
    pub mirror_response: Option<String>,

    // Output
    pub verbose: bool,
    pub very_verbose: bool,
    pub output_hex: bool,
    pub color: bool,
    pub log_format: LogFormat,

    // Sockets
    pub no_delay: bool,
    pub connect_timeout_seconds: u64,

    // TLS-unwrap
    pub unwrap_tls: bool,
    pub tls_server_name: Option<String>,
    pub tls_ca_file: Option<PathBuf>,

    // Match / replace
    pub match_pattern: Option<String>,
    pub replace: Option<String>,

    // AMQP ack rewriting
    pub amqp: bool,
    pub nack_requeue: bool,
    pub nack_delay_ms: Option<u64>,
}

/// Addresses resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub mirror: MirrorAddrs,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let local = env::var("TCPTAP_LOCAL").unwrap_or_else(|_| ":9999".to_string());
        let remote = env::var("TCPTAP_REMOTE").unwrap_or_else(|_| "localhost:80".to_string());
        let mirror_request = optional_var("TCPTAP_MIRROR_REQUEST");
        let mirror_response = optional_var("TCPTAP_MIRROR_RESPONSE");

        let verbose = parse_var("TCPTAP_VERBOSE", "false")?;
        let very_verbose = parse_var("TCPTAP_VERY_VERBOSE", "false")?;
        let output_hex = parse_var("TCPTAP_HEX", "false")?;
        let color = parse_var("TCPTAP_COLOR", "false")?;

        let log_format = match env::var("TCPTAP_LOG_FORMAT")
            .unwrap_or_else(|_| "text".to_string())
            .as_str()
        {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(anyhow::anyhow!(
                    "Invalid TCPTAP_LOG_FORMAT '{}'. Must be 'text' or 'json'",
                    other
                ))
            }
        };

        let no_delay = parse_var("TCPTAP_NO_DELAY", "false")?;
        let connect_timeout_seconds = parse_var("TCPTAP_CONNECT_TIMEOUT_SECS", "10")?;

        let unwrap_tls = parse_var("TCPTAP_UNWRAP_TLS", "false")?;
        let tls_server_name = optional_var("TCPTAP_TLS_SERVER_NAME");
        let tls_ca_file = optional_var("TCPTAP_TLS_CA_FILE").map(PathBuf::from);

        let match_pattern = optional_var("TCPTAP_MATCH");
        let replace = optional_var("TCPTAP_REPLACE");

        let amqp = parse_var("TCPTAP_AMQP", "false")?;
        let nack_requeue = parse_var("TCPTAP_NACK_REQUEUE", "false")?;
        let nack_delay_ms = optional_var("TCPTAP_NACK_DELAY_MS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("Invalid TCPTAP_NACK_DELAY_MS")?;

        let config = Config {
            local,
            remote,
            mirror_request,
            mirror_response,
            verbose,
            very_verbose,
            output_hex,
            color,
            log_format,
            no_delay,
            connect_timeout_seconds,
            unwrap_tls,
            tls_server_name,
            tls_ca_file,
            match_pattern,
            replace,
            amqp,
            nack_requeue,
            nack_delay_ms,
        };
        config.validate()?;
        Ok(config)
    }

    /// Range checks that hold whether a value came from the environment or
    /// the command line
    pub fn validate(&self) -> Result<()> {
        if let Some(ms) = self.nack_delay_ms {
            if ms > MAX_NACK_DELAY_MS {
                return Err(anyhow::anyhow!(
                    "Invalid TCPTAP_NACK_DELAY_MS {}. Must be at most {}",
                    ms,
                    MAX_NACK_DELAY_MS
                ));
            }
        }
        Ok(())
    }

    /// Overlay command line flags; flags that were not given keep the
    /// environment value
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(local) = &cli.local {
            self.local = local.clone();
        }
        if let Some(remote) = &cli.remote {
            self.remote = remote.clone();
        }
        if cli.mirror_request.is_some() {
            self.mirror_request = cli.mirror_request.clone();
        }
        if cli.mirror_response.is_some() {
            self.mirror_response = cli.mirror_response.clone();
        }

        self.verbose |= cli.verbose;
        self.very_verbose |= cli.very_verbose;
        self.output_hex |= cli.hex;
        self.color |= cli.color;
        self.no_delay |= cli.nagles;
        if let Some(secs) = cli.connect_timeout {
            self.connect_timeout_seconds = secs;
        }

        self.unwrap_tls |= cli.unwrap_tls;
        if cli.tls_server_name.is_some() {
            self.tls_server_name = cli.tls_server_name.clone();
        }
        if cli.tls_ca_file.is_some() {
            self.tls_ca_file = cli.tls_ca_file.clone();
        }

        if cli.match_pattern.is_some() {
            self.match_pattern = cli.match_pattern.clone();
        }
        if cli.replace.is_some() {
            self.replace = cli.replace.clone();
        }

        self.amqp |= cli.amqp;
        self.nack_requeue |= cli.nack_requeue;
        if cli.nack_delay_ms.is_some() {
            self.nack_delay_ms = cli.nack_delay_ms;
        }
    }

    /// Default `tracing` filter directive for the chosen verbosity
    pub fn log_level(&self) -> &'static str {
        if self.very_verbose {
            "trace"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Resolve every configured address once
    pub async fn resolve(&self) -> Result<ResolvedEndpoints> {
        let local = resolve_addr(&with_default_host(&self.local, "0.0.0.0"))
            .await
            .context("Failed to resolve local address")?;
        let remote = resolve_addr(&with_default_host(&self.remote, "localhost"))
            .await
            .context("Failed to resolve remote address")?;

        let mut mirror = MirrorAddrs::default();
        if let Some(addr) = &self.mirror_request {
            mirror.request = Some(
                resolve_addr(&with_default_host(addr, "localhost"))
                    .await
                    .context("Failed to resolve mirror request address")?,
            );
        }
        if let Some(addr) = &self.mirror_response {
            mirror.response = Some(
                resolve_addr(&with_default_host(addr, "localhost"))
                    .await
                    .context("Failed to resolve mirror response address")?,
            );
        }

        Ok(ResolvedEndpoints {
            local,
            remote,
            mirror,
        })
    }

    /// Connection settings shared by every proxied connection
    ///
    /// Match/replace hooks are compiled by the server when it binds; the
    /// logger is attached per connection.
    pub fn proxy_settings(&self) -> Result<ProxySettings> {
        let tls_unwrap = if self.unwrap_tls {
            let tls_config = match &self.tls_ca_file {
                Some(path) => UpstreamTlsConfig::from_ca_file(path)
                    .context("Failed to load TLS CA file")?,
                None => UpstreamTlsConfig::new().context("Failed to build TLS config")?,
            };
            let server_name = self
                .tls_server_name
                .clone()
                .unwrap_or_else(|| host_of(&self.remote).to_string());
            Some(TlsUnwrap::new(&tls_config, &server_name).context("Invalid TLS server name")?)
        } else {
            None
        };

        let rewriter = self.amqp.then(|| {
            AckRewriter::new(
                self.nack_requeue,
                self.nack_delay_ms.map(Duration::from_millis),
            )
        });

        let connect_timeout = (self.connect_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.connect_timeout_seconds));

        Ok(ProxySettings {
            no_delay: self.no_delay,
            output_hex: self.output_hex,
            tls_unwrap,
            connect_timeout,
            rewriter,
            ..ProxySettings::default()
        })
    }

    pub fn inspect_options(&self) -> InspectOptions {
        InspectOptions {
            match_pattern: self.match_pattern.clone(),
            replace: self.replace.clone(),
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))
}

/// `":9999"` -> `"0.0.0.0:9999"` (for `host = "0.0.0.0"`)
pub fn with_default_host(addr: &str, host: &str) -> String {
    if addr.starts_with(':') {
        format!("{}{}", host, addr)
    } else {
        addr.to_string()
    }
}

async fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    lookup_host(addr)
        .await
        .with_context(|| format!("Failed to resolve {}", addr))?
        .next()
        .with_context(|| format!("No addresses found for {}", addr))
}
