//! Listener and per-connection dispatch
//!
//! Match/replace hooks are compiled once at bind, so bad expressions are
//! reported before the first accept. Each accepted connection gets a
//! sequence number and its own logger, shares the compiled hooks, and runs
//! in a spawned task. Failures of one connection never reach the accept
//! loop.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tracing::{debug, error, info};

use crate::inspect::{create_matcher, create_replacer};
use crate::logger::{SharedLogger, TracingLogger};
use crate::proxy::{ConnectionProxy, MirrorAddrs, ProxySettings};

/// Match / replace expressions, compiled once when the server binds
#[derive(Debug, Clone, Default)]
pub struct InspectOptions {
    pub match_pattern: Option<String>,
    pub replace: Option<String>,
}

pub struct ProxyServer {
    listener: TcpListener,
    remote_addr: SocketAddr,
    mirror: MirrorAddrs,
    settings: ProxySettings,
    connection_seq: AtomicU64,
    match_counter: Arc<AtomicU64>,
}

impl ProxyServer {
    pub async fn bind(
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        mirror: MirrorAddrs,
        settings: ProxySettings,
        inspect: InspectOptions,
    ) -> io::Result<Self> {
        Self::bind_with_logger(
            local_addr,
            remote_addr,
            mirror,
            settings,
            inspect,
            Arc::new(TracingLogger::new()),
        )
        .await
    }

    /// Like [`bind`](Self::bind), with `log` receiving hook compile warnings
    /// and `Match #n` lines
    pub async fn bind_with_logger(
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        mirror: MirrorAddrs,
        settings: ProxySettings,
        inspect: InspectOptions,
        log: SharedLogger,
    ) -> io::Result<Self> {
        let match_counter = Arc::new(AtomicU64::new(0));
        let matcher = inspect.match_pattern.as_deref().and_then(|pattern| {
            create_matcher(pattern, Arc::clone(&match_counter), Arc::clone(&log))
        });
        let replacer = inspect
            .replace
            .as_deref()
            .and_then(|list| create_replacer(list, log.as_ref()));

        let listener = TcpListener::bind(local_addr).await?;
        Ok(Self {
            listener,
            remote_addr,
            mirror,
            settings: ProxySettings {
                matcher,
                replacer,
                ..settings
            },
            connection_seq: AtomicU64::new(0),
            match_counter,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Total regex matches across all connections so far
    pub fn match_count(&self) -> u64 {
        self.match_counter.load(Ordering::Relaxed)
    }

    /// Settings for connection `id`: shared base and hooks plus a
    /// connection logger
    fn connection_settings(&self, id: u64) -> ProxySettings {
        ProxySettings {
            logger: Arc::new(TracingLogger::for_connection(id)),
            ..self.settings.clone()
        }
    }

    fn dispatch(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let id = self.connection_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let settings = Arc::new(self.connection_settings(id));
        debug!(connection = id, peer = %peer_addr, "Accepted connection");

        let proxy = ConnectionProxy::new(
            id,
            stream,
            peer_addr,
            self.remote_addr,
            self.mirror,
            settings,
        );
        tokio::spawn(async move {
            let summary = proxy.start().await;
            debug!(
                connection = summary.id,
                outcome = ?summary.outcome,
                sent = summary.sent,
                received = summary.received,
                "Connection finished"
            );
        });
    }

    /// Accept connections until `shutdown` completes
    ///
    /// Connections already running are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.dispatch(stream, peer_addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutting down proxy...");
                    break;
                }
            }
        }
    }

    /// Accept connections until SIGINT or SIGTERM
    pub async fn run(self) {
        self.run_until(shutdown_signal()).await
    }
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    // Handle SIGINT (Ctrl+C)
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Logger;
    use std::fmt;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    /// Collects warn lines
    #[derive(Default)]
    struct WarnCapture {
        lines: Mutex<Vec<String>>,
    }

    impl Logger for WarnCapture {
        fn trace(&self, _args: fmt::Arguments<'_>) {}
        fn debug(&self, _args: fmt::Arguments<'_>) {}
        fn info(&self, _args: fmt::Arguments<'_>) {}
        fn warn(&self, args: fmt::Arguments<'_>) {
            self.lines.lock().unwrap().push(args.to_string());
        }
    }

    async fn server(remote_addr: SocketAddr, inspect: InspectOptions) -> ProxyServer {
        ProxyServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            remote_addr,
            MirrorAddrs::default(),
            ProxySettings::default(),
            inspect,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_connection_settings_get_hooks_and_logger() {
        let server = server(
            "127.0.0.1:1".parse().unwrap(),
            InspectOptions {
                match_pattern: Some("token".to_string()),
                replace: Some("a~b".to_string()),
            },
        )
        .await;

        let settings = server.connection_settings(1);
        assert!(settings.matcher.is_some());
        assert!(settings.replacer.is_some());

        let matcher = settings.matcher.unwrap();
        matcher(b"token and token".as_slice());
        // a second connection shares the same counter
        let other = server.connection_settings(2).matcher.unwrap();
        other(b"token".as_slice());
        assert_eq!(server.match_count(), 3);
    }

    #[tokio::test]
    async fn test_invalid_patterns_disable_hooks() {
        let server = server(
            "127.0.0.1:1".parse().unwrap(),
            InspectOptions {
                match_pattern: Some("(unclosed".to_string()),
                replace: Some("odd~parts~count".to_string()),
            },
        )
        .await;

        let settings = server.connection_settings(1);
        assert!(settings.matcher.is_none());
        assert!(settings.replacer.is_none());
    }

    #[tokio::test]
    async fn test_bad_pattern_warned_once_at_bind() {
        let capture = Arc::new(WarnCapture::default());
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = closed.local_addr().unwrap();
        drop(closed);

        let server = ProxyServer::bind_with_logger(
            "127.0.0.1:0".parse().unwrap(),
            remote_addr,
            MirrorAddrs::default(),
            ProxySettings::default(),
            InspectOptions {
                match_pattern: Some("(unclosed".to_string()),
                replace: None,
            },
            capture.clone(),
        )
        .await
        .unwrap();
        assert_eq!(capture.lines.lock().unwrap().len(), 1);

        let listen_addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        // two connections, each closed after the failed remote dial
        for _ in 0..2 {
            let mut client = TcpStream::connect(listen_addr).await.unwrap();
            let mut buf = [0u8; 1];
            let n = timeout(Duration::from_secs(5), client.read(&mut buf))
                .await
                .unwrap()
                .unwrap_or(0);
            assert_eq!(n, 0);
        }

        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        let lines = capture.lines.lock().unwrap().clone();
        assert_eq!(lines.len(), 1, "{:?}", lines);
    }

    #[tokio::test]
    async fn test_run_until_proxies_and_stops() {
        let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = remote.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let server = server(remote_addr, InspectOptions::default()).await;
        let listen_addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let mut client = TcpStream::connect(listen_addr).await.unwrap();
        client.write_all(b"echo").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"echo");

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
