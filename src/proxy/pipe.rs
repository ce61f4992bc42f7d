//! One direction of the relay
//!
//! Per chunk: read -> matcher -> replacer -> log -> optional frame rewrite
//! -> forward -> count -> best-effort mirror. Rewritten frames are forwarded
//! and counted but never mirrored.

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::engine::ProxySettings;
use super::latch::FailureLatch;
use crate::amqp::{AckRewriter, Frame};

/// Read chunk size
pub const CHUNK_SIZE: usize = 0xffff;

/// Upper bound for one mirror write before the mirror is given up on
pub const MIRROR_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Direction of data flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// local -> remote
    Outbound,
    /// remote -> local
    Inbound,
}

impl Direction {
    fn describe(self, n: usize) -> String {
        match self {
            Self::Outbound => format!(">>> {} bytes sent", n),
            Self::Inbound => format!("<<< {} bytes received", n),
        }
    }
}

/// Why a pipe stopped
#[derive(Debug)]
enum PipeEnd {
    Eof,
    Read(io::Error),
    Write(io::Error),
}

/// Lazily formatted chunk dump (hex or lossy text)
struct ChunkDump<'a> {
    bytes: &'a [u8],
    hex: bool,
}

impl fmt::Display for ChunkDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hex {
            for b in self.bytes {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        } else {
            f.write_str(&String::from_utf8_lossy(self.bytes))
        }
    }
}

/// Relay task state for one direction
pub(crate) struct Pipe {
    pub direction: Direction,
    pub settings: Arc<ProxySettings>,
    pub latch: Arc<FailureLatch>,
    pub counter: Arc<AtomicU64>,
}

impl Pipe {
    /// Relay from `src` to `dst` until the first read or write failure
    pub async fn run<R, W, M>(self, mut src: R, mut dst: W, mut mirror: Option<M>)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        M: AsyncWrite + Unpin,
    {
        let log = Arc::clone(&self.settings.logger);
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = match src.read(&mut buf).await {
                Ok(0) => return self.fail(PipeEnd::Eof),
                Ok(n) => n,
                Err(e) => return self.fail(PipeEnd::Read(e)),
            };
            let chunk = &buf[..n];

            if let Some(matcher) = &self.settings.matcher {
                matcher(chunk);
            }

            let data: Cow<'_, [u8]> = match &self.settings.replacer {
                Some(replacer) => Cow::Owned(replacer(chunk)),
                None => Cow::Borrowed(chunk),
            };

            log.debug(format_args!("{}", self.direction.describe(n)));
            log.trace(format_args!(
                "{}",
                ChunkDump {
                    bytes: &data,
                    hex: self.settings.output_hex,
                }
            ));

            let (data, rewritten) = match &self.settings.rewriter {
                Some(rewriter) => self.rewrite(rewriter, data).await,
                None => (data, false),
            };

            if let Err(e) = dst.write_all(&data).await {
                return self.fail(PipeEnd::Write(e));
            }
            self.counter.fetch_add(n as u64, Ordering::Relaxed);

            if rewritten {
                continue;
            }

            if let Some(sink) = mirror.as_mut() {
                let failure = match timeout(MIRROR_WRITE_TIMEOUT, sink.write_all(&data)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!("timed out after {:?}", MIRROR_WRITE_TIMEOUT)),
                };
                if let Some(reason) = failure {
                    log.warn(format_args!(
                        "Write to mirror failed '{}', mirroring disabled",
                        reason
                    ));
                    mirror = None;
                }
            }
        }
    }

    /// Replace a chunk holding exactly one frame with its rewritten encoding
    ///
    /// Anything that does not decode is returned untouched. The flag is set
    /// only when an ack was turned into a nack.
    async fn rewrite<'a>(
        &self,
        rewriter: &AckRewriter,
        data: Cow<'a, [u8]>,
    ) -> (Cow<'a, [u8]>, bool) {
        let log = &self.settings.logger;

        let frame = match Frame::decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                log.trace(format_args!("forwarding raw chunk: {}", e));
                return (data, false);
            }
        };

        let (frame, rewritten) = rewriter.maybe_rewrite(frame).await;
        if !rewritten {
            return (data, false);
        }
        log.debug(format_args!("found Basic ACK -> replace with NACK"));

        match frame.encode() {
            Ok(bytes) => (Cow::Owned(bytes.to_vec()), true),
            Err(e) => {
                log.warn(format_args!("Frame re-encode failed '{}'", e));
                (data, false)
            }
        }
    }

    fn fail(&self, end: PipeEnd) {
        let first = self.latch.fire();
        let log = &self.settings.logger;

        match end {
            PipeEnd::Eof => log.debug(format_args!("{:?} stream closed", self.direction)),
            PipeEnd::Read(e) if first => log.warn(format_args!("Read failed '{}'", e)),
            PipeEnd::Write(e) if first => log.warn(format_args!("Write failed '{}'", e)),
            PipeEnd::Read(e) | PipeEnd::Write(e) => {
                log.debug(format_args!("{:?} relay stopped after close: {}", self.direction, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::{Message, MethodFrame};
    use crate::inspect::create_replacer;
    use crate::logger::NullLogger;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::duplex;

    fn pipe(settings: ProxySettings) -> (Pipe, Arc<FailureLatch>, Arc<AtomicU64>) {
        let latch = Arc::new(FailureLatch::new());
        let counter = Arc::new(AtomicU64::new(0));
        let pipe = Pipe {
            direction: Direction::Outbound,
            settings: Arc::new(settings),
            latch: Arc::clone(&latch),
            counter: Arc::clone(&counter),
        };
        (pipe, latch, counter)
    }

    /// Writer that rejects every write
    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_chunk_dump_formats() {
        let hex = ChunkDump {
            bytes: &[0x01, 0xce, 0x0a],
            hex: true,
        };
        assert_eq!(hex.to_string(), "01ce0a");

        let text = ChunkDump {
            bytes: b"hello",
            hex: false,
        };
        assert_eq!(text.to_string(), "hello");
    }

    #[test]
    fn test_direction_descriptions() {
        assert_eq!(Direction::Outbound.describe(5), ">>> 5 bytes sent");
        assert_eq!(Direction::Inbound.describe(9), "<<< 9 bytes received");
    }

    #[tokio::test]
    async fn test_relays_until_eof_and_counts_bytes_read() {
        let settings = ProxySettings {
            replacer: create_replacer("secret~XX", &NullLogger),
            ..ProxySettings::default()
        };
        let (pipe, latch, counter) = pipe(settings);

        let input: &[u8] = b"my secret value";
        let mut output = Vec::new();
        pipe.run(input, &mut output, None::<tokio::io::Sink>).await;

        assert_eq!(output, b"my XX value".to_vec());
        // counter tracks bytes read, not bytes written
        assert_eq!(counter.load(Ordering::Relaxed), input.len() as u64);
        assert!(latch.is_fired());
    }

    #[tokio::test]
    async fn test_write_failure_fires_latch() {
        let (pipe, latch, counter) = pipe(ProxySettings::default());
        pipe.run(&b"data"[..], BrokenWriter, None::<tokio::io::Sink>)
            .await;
        assert!(latch.is_fired());
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_mirror_failure_does_not_stop_relay() {
        let (pipe, latch, counter) = pipe(ProxySettings::default());
        let (mut client, server) = duplex(1024);

        let task = tokio::spawn(async move {
            let mut output = Vec::new();
            pipe.run(server, &mut output, Some(BrokenWriter)).await;
            output
        });

        client.write_all(b"first").await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(b"second").await.unwrap();
        drop(client);

        let output = task.await.unwrap();
        assert_eq!(output, b"firstsecond".to_vec());
        assert_eq!(counter.load(Ordering::Relaxed), 11);
        assert!(latch.is_fired());
    }

    #[tokio::test]
    async fn test_mirror_receives_forwarded_bytes() {
        let (pipe, _latch, _counter) = pipe(ProxySettings::default());
        let mut output = Vec::new();
        let mut mirror = Vec::new();
        pipe.run(&b"copy me"[..], &mut output, Some(&mut mirror))
            .await;
        assert_eq!(output, b"copy me".to_vec());
        assert_eq!(mirror, output);
    }

    #[tokio::test]
    async fn test_rewrites_single_ack_frame() {
        let settings = ProxySettings {
            rewriter: Some(AckRewriter::default()),
            ..ProxySettings::default()
        };
        let (pipe, _latch, counter) = pipe(settings);

        let ack = Frame::Method(MethodFrame::new(
            1,
            Message::BasicAck {
                delivery_tag: 42,
                multiple: true,
            },
        ))
        .encode()
        .unwrap();

        let mut output = Vec::new();
        pipe.run(&ack[..], &mut output, None::<tokio::io::Sink>)
            .await;

        let frame = Frame::decode(&output).unwrap();
        let Frame::Method(mf) = frame;
        assert_eq!(mf.method_id, 120);
        assert_eq!(
            mf.message,
            Message::BasicNack {
                delivery_tag: 42,
                multiple: true,
                requeue: false
            }
        );
        assert_eq!(counter.load(Ordering::Relaxed), ack.len() as u64);
    }

    #[tokio::test]
    async fn test_rewritten_frame_is_not_mirrored() {
        let settings = ProxySettings {
            rewriter: Some(AckRewriter::default()),
            ..ProxySettings::default()
        };
        let (pipe, _latch, counter) = pipe(settings);
        let (mut client, server) = duplex(1024);

        let ack = Frame::Method(MethodFrame::new(
            1,
            Message::BasicAck {
                delivery_tag: 42,
                multiple: false,
            },
        ))
        .encode()
        .unwrap();

        let task = tokio::spawn(async move {
            let mut output = Vec::new();
            let mut mirror = Vec::new();
            pipe.run(server, &mut output, Some(&mut mirror)).await;
            (output, mirror)
        });

        client.write_all(&ack).await.unwrap();
        // keep the two writes in separate chunks
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"plain").await.unwrap();
        drop(client);

        let (output, mirror) = task.await.unwrap();
        assert_eq!(output.len(), ack.len() + 5);
        assert_eq!(&output[9..11], &[0x00, 0x78]);
        assert!(output.ends_with(b"plain"));
        // only the untouched chunk reaches the mirror
        assert_eq!(mirror, b"plain".to_vec());
        assert_eq!(counter.load(Ordering::Relaxed), (ack.len() + 5) as u64);
    }

    #[tokio::test]
    async fn test_undecodable_chunk_forwarded_raw() {
        let settings = ProxySettings {
            rewriter: Some(AckRewriter::default()),
            ..ProxySettings::default()
        };
        let (pipe, _latch, _counter) = pipe(settings);

        let mut bad = Frame::Method(MethodFrame::new(
            0,
            Message::BasicAck {
                delivery_tag: 1,
                multiple: false,
            },
        ))
        .encode()
        .unwrap()
        .to_vec();
        let last = bad.len() - 1;
        bad[last] = 0x00;

        let mut output = Vec::new();
        pipe.run(&bad[..], &mut output, None::<tokio::io::Sink>)
            .await;
        assert_eq!(output, bad);
    }
}
