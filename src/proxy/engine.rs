//! Connection proxy engine
//!
//! One [`ConnectionProxy`] owns one accepted local connection. `start` dials
//! the remote (plain TCP or TLS-unwrap) and any mirror sinks, runs one relay
//! task per direction, and tears everything down on the first failure.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::conn::{disable_nagle, Connection, NoDelay};
use super::latch::FailureLatch;
use super::pipe::{Direction, Pipe};
use crate::amqp::AckRewriter;
use crate::error::{ProxyError, Result};
use crate::inspect::{Matcher, Replacer};
use crate::logger::{Logger, NullLogger, SharedLogger};
use crate::tls::TlsUnwrap;

/// Per-connection behaviour, immutable once the proxy starts
#[derive(Clone)]
pub struct ProxySettings {
    /// Disable Nagle's algorithm on every endpoint that supports it
    pub no_delay: bool,
    /// Dump relayed data as hex instead of text
    pub output_hex: bool,
    /// Handshake TLS with the remote and relay plaintext locally
    pub tls_unwrap: Option<TlsUnwrap>,
    /// Remote/mirror dial timeout
    pub connect_timeout: Option<Duration>,
    pub matcher: Option<Matcher>,
    pub replacer: Option<Replacer>,
    /// AMQP mode: rewrite basic.ack frames into basic.nack
    pub rewriter: Option<AckRewriter>,
    pub logger: SharedLogger,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            no_delay: false,
            output_hex: false,
            tls_unwrap: None,
            connect_timeout: None,
            matcher: None,
            replacer: None,
            rewriter: None,
            logger: Arc::new(NullLogger),
        }
    }
}

impl std::fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySettings")
            .field("no_delay", &self.no_delay)
            .field("output_hex", &self.output_hex)
            .field("tls_unwrap", &self.tls_unwrap)
            .field("connect_timeout", &self.connect_timeout)
            .field("matcher", &self.matcher.is_some())
            .field("replacer", &self.replacer.is_some())
            .field("rewriter", &self.rewriter)
            .finish()
    }
}

/// Optional mirror sinks, one per direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorAddrs {
    /// Receives a copy of local -> remote traffic
    pub request: Option<SocketAddr>,
    /// Receives a copy of remote -> local traffic
    pub response: Option<SocketAddr>,
}

/// How a proxied connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// Relay ran and stopped on the first failure or close
    Completed,
    /// Remote or mirror endpoint could not be reached; nothing was relayed
    DialFailed,
}

/// Final byte counts of a proxied connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxySummary {
    pub id: u64,
    /// local -> remote bytes (as read from the local side)
    pub sent: u64,
    /// remote -> local bytes (as read from the remote side)
    pub received: u64,
    pub outcome: ProxyOutcome,
}

/// Manages a proxied connection, piping data between local and remote
pub struct ConnectionProxy<L: Connection> {
    id: u64,
    local: L,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    mirror: MirrorAddrs,
    settings: Arc<ProxySettings>,
}

impl<L: Connection> ConnectionProxy<L> {
    /// Take over `local`; it is closed when the proxy finishes
    pub fn new(
        id: u64,
        local: L,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        mirror: MirrorAddrs,
        settings: Arc<ProxySettings>,
    ) -> Self {
        Self {
            id,
            local,
            local_addr,
            remote_addr,
            mirror,
            settings,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Dial remote (and mirrors), relay both directions, wait for the first
    /// failure, then close every owned connection
    pub async fn start(self) -> ProxySummary {
        let Self {
            id,
            local,
            local_addr,
            remote_addr,
            mirror,
            settings,
        } = self;
        let log = Arc::clone(&settings.logger);

        let dialed = async {
            let remote = dial_remote(remote_addr, &settings).await?;
            let mirror_request = dial_mirror(mirror.request, "requests", &settings).await?;
            let mirror_response = dial_mirror(mirror.response, "responses", &settings).await?;
            Ok::<_, ProxyError>((remote, mirror_request, mirror_response))
        }
        .await;

        let (remote, mirror_request, mirror_response) = match dialed {
            Ok(conns) => conns,
            Err(e) => {
                log.warn(format_args!("{}", e));
                drop(local);
                return ProxySummary {
                    id,
                    sent: 0,
                    received: 0,
                    outcome: ProxyOutcome::DialFailed,
                };
            }
        };

        if settings.no_delay {
            report_no_delay("local", disable_nagle(&local), log.as_ref());
            report_no_delay("remote", disable_nagle(&remote), log.as_ref());
            if let Some(conn) = &mirror_request {
                report_no_delay("mirror requests", disable_nagle(conn), log.as_ref());
            }
            if let Some(conn) = &mirror_response {
                report_no_delay("mirror responses", disable_nagle(conn), log.as_ref());
            }
        }

        log.info(format_args!("Opened {} >>> {}", local_addr, remote_addr));

        let latch = Arc::new(FailureLatch::new());
        let sent = Arc::new(AtomicU64::new(0));
        let received = Arc::new(AtomicU64::new(0));

        let (local_read, local_write) = tokio::io::split(local);
        let (remote_read, remote_write) = tokio::io::split(remote);

        let outbound = tokio::spawn(
            Pipe {
                direction: Direction::Outbound,
                settings: Arc::clone(&settings),
                latch: Arc::clone(&latch),
                counter: Arc::clone(&sent),
            }
            .run(local_read, remote_write, mirror_request),
        );
        let inbound = tokio::spawn(
            Pipe {
                direction: Direction::Inbound,
                settings: Arc::clone(&settings),
                latch: Arc::clone(&latch),
                counter: Arc::clone(&received),
            }
            .run(remote_read, local_write, mirror_response),
        );

        latch.wait().await;

        // Dropping the aborted tasks' halves closes every owned connection
        outbound.abort();
        inbound.abort();
        let _ = outbound.await;
        let _ = inbound.await;

        let summary = ProxySummary {
            id,
            sent: sent.load(Ordering::Relaxed),
            received: received.load(Ordering::Relaxed),
            outcome: ProxyOutcome::Completed,
        };

        log.info(format_args!(
            "Closed ({} bytes sent, {} bytes received)",
            summary.sent, summary.received
        ));

        summary
    }
}

async fn connect_tcp(addr: SocketAddr, settings: &ProxySettings) -> Result<TcpStream> {
    match settings.connect_timeout {
        Some(limit) => timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| ProxyError::ConnectTimeout(limit))?
            .map_err(ProxyError::RemoteConnect),
        None => TcpStream::connect(addr)
            .await
            .map_err(ProxyError::RemoteConnect),
    }
}

async fn dial_remote(addr: SocketAddr, settings: &ProxySettings) -> Result<Box<dyn Connection>> {
    let stream = connect_tcp(addr, settings).await?;

    match &settings.tls_unwrap {
        Some(tls) => {
            let tls_stream = tls
                .connect(stream)
                .await
                .map_err(|e| ProxyError::tls_handshake(tls.host(), e))?;
            Ok(Box::new(tls_stream))
        }
        None => Ok(Box::new(stream)),
    }
}

async fn dial_mirror(
    addr: Option<SocketAddr>,
    direction: &'static str,
    settings: &ProxySettings,
) -> Result<Option<TcpStream>> {
    let Some(addr) = addr else {
        return Ok(None);
    };

    match connect_tcp(addr, settings).await {
        Ok(stream) => Ok(Some(stream)),
        Err(ProxyError::RemoteConnect(e)) => Err(ProxyError::mirror(direction, e)),
        Err(ProxyError::ConnectTimeout(limit)) => Err(ProxyError::mirror(
            direction,
            io::Error::new(io::ErrorKind::TimedOut, format!("timed out after {:?}", limit)),
        )),
        Err(e) => Err(e),
    }
}

fn report_no_delay(endpoint: &str, result: NoDelay, log: &dyn Logger) {
    match result {
        NoDelay::Applied => {}
        NoDelay::Unsupported => {
            log.trace(format_args!("{} connection has no Nagle control, skipped", endpoint))
        }
        NoDelay::Failed(e) => {
            log.debug(format_args!("Failed to disable Nagle on {} connection: {}", endpoint, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Records warn lines only
    #[derive(Default)]
    struct WarnCapture {
        lines: Mutex<Vec<String>>,
    }

    impl Logger for WarnCapture {
        fn trace(&self, _args: std::fmt::Arguments<'_>) {}
        fn debug(&self, _args: std::fmt::Arguments<'_>) {}
        fn info(&self, _args: std::fmt::Arguments<'_>) {}
        fn warn(&self, args: std::fmt::Arguments<'_>) {
            self.lines.lock().unwrap().push(args.to_string());
        }
    }

    async fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    fn local_addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_dial_failure_closes_local_and_warns_once() {
        let capture = Arc::new(WarnCapture::default());
        let settings = ProxySettings {
            logger: capture.clone(),
            ..ProxySettings::default()
        };
        let (mut client, local) = tokio::io::duplex(1024);

        let proxy = ConnectionProxy::new(
            1,
            local,
            local_addr(),
            closed_port().await,
            MirrorAddrs::default(),
            Arc::new(settings),
        );
        assert_eq!(proxy.id(), 1);

        let summary = proxy.start().await;
        assert_eq!(summary.outcome, ProxyOutcome::DialFailed);
        assert_eq!((summary.sent, summary.received), (0, 0));

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);

        let lines = capture.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Remote connection failed"));
    }

    #[tokio::test]
    async fn test_unreachable_mirror_aborts_connection() {
        let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote.local_addr().unwrap();
        let capture = Arc::new(WarnCapture::default());
        let settings = ProxySettings {
            logger: capture.clone(),
            ..ProxySettings::default()
        };
        let (_client, local) = tokio::io::duplex(1024);

        let summary = ConnectionProxy::new(
            2,
            local,
            local_addr(),
            remote_addr,
            MirrorAddrs {
                request: Some(closed_port().await),
                response: None,
            },
            Arc::new(settings),
        )
        .start()
        .await;

        assert_eq!(summary.outcome, ProxyOutcome::DialFailed);
        let lines = capture.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Mirror requests connection failed"));
    }

    #[tokio::test]
    async fn test_relays_both_directions_until_close() {
        let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote.local_addr().unwrap();

        let echo = tokio::spawn(async move {
            let (mut socket, _) = remote.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"pong!!").await.unwrap();
        });

        let (mut client, local) = tokio::io::duplex(1024);
        let settings = ProxySettings {
            no_delay: true,
            ..ProxySettings::default()
        };
        let proxy = tokio::spawn(
            ConnectionProxy::new(
                3,
                local,
                local_addr(),
                remote_addr,
                MirrorAddrs::default(),
                Arc::new(settings),
            )
            .start(),
        );

        client.write_all(b"ping!").await.unwrap();
        let mut reply = [0u8; 6];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong!!");

        echo.await.unwrap();
        let summary = proxy.await.unwrap();
        assert_eq!(summary.outcome, ProxyOutcome::Completed);
        assert_eq!(summary.sent, 5);
        assert_eq!(summary.received, 6);
    }

    #[test]
    fn test_settings_debug_hides_callbacks() {
        let settings = ProxySettings::default();
        let debug = format!("{:?}", settings);
        assert!(debug.contains("matcher: false"));
        assert!(debug.contains("no_delay: false"));
    }
}
