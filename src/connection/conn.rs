//! The typed, full-duplex WebSocket connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::close::{CloseCode, CloseError};
use crate::codec::{MessageCodec, MessageKind};
use crate::compression::CompressionManager;
use crate::config::{ConnectionConfig, DEFAULT_DEADLINE};
use crate::connection::framing::{FrameReader, FrameWriter};
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::protocol::{Frame, OpCode, ParsePolicy};

/// Write budget for the best-effort close frame.
const CLOSE_WRITE_BUDGET: Duration = Duration::from_millis(100);

/// Payload carried by keepalive pings.
const PING_PAYLOAD: &[u8] = b"ping";

struct PingLoop {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// A typed, full-duplex WebSocket channel over an async byte stream.
///
/// Created by a successful [`Upgrader::upgrade`](crate::server::Upgrader) or
/// [`Dialer::dial`](crate::client::Dialer); [`Connection::new`] wires one up
/// over an already-upgraded stream.
///
/// ## Concurrency
///
/// One reader and one writer may operate concurrently; the internal write
/// lock serializes application writes, ping-loop writes, and the pong echoes
/// produced inside [`read`](Self::read). Only one `read` may be in flight at
/// a time; a second concurrent reader simply waits for the first.
pub struct Connection<S, C: MessageCodec> {
    reader: Mutex<FrameReader<ReadHalf<S>>>,
    writer: Arc<Mutex<FrameWriter<WriteHalf<S>>>>,
    codec: Arc<C>,
    config: ConnectionConfig,
    compression: Option<CompressionManager>,
    role: Role,
    subprotocol: Option<String>,
    closed: AtomicBool,
    close_event: StdMutex<Option<CloseError>>,
    ping: StdMutex<Option<PingLoop>>,
    metrics: Arc<Metrics>,
}

impl<S, C> Connection<S, C>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    C: MessageCodec,
{
    /// Wrap an already-upgraded stream in a connection.
    ///
    /// `compression` should be true only when `permessage-deflate` was
    /// negotiated during the handshake. The ping loop starts immediately if
    /// `config.ping_interval` is non-zero.
    #[must_use]
    pub fn new(io: S, role: Role, codec: C, config: ConnectionConfig, compression: bool) -> Self {
        Self::with_details(
            io,
            role,
            Arc::new(codec),
            config,
            compression,
            None,
            &[],
            Arc::new(Metrics::new()),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn with_details(
        io: S,
        role: Role,
        codec: Arc<C>,
        config: ConnectionConfig,
        compression: bool,
        subprotocol: Option<String>,
        leftover: &[u8],
        metrics: Arc<Metrics>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(io);

        let policy = ParsePolicy {
            max_payload: config.max_frame_size as u64,
            allow_rsv1: compression,
            expect_masked: Some(role.expects_masked()),
        };

        let mut frame_reader = FrameReader::new(read_half, config.read_buffer_size, policy);
        if !leftover.is_empty() {
            frame_reader.feed(leftover);
        }
        let reader = Mutex::new(frame_reader);
        let writer = Arc::new(Mutex::new(FrameWriter::new(
            write_half,
            config.write_buffer_size,
            role.must_mask(),
        )));

        let compression = compression.then(|| CompressionManager::new(config.compression_threshold));

        let ping = if config.ping_interval.is_zero() {
            None
        } else {
            Some(spawn_ping_loop(
                Arc::clone(&writer),
                config.ping_interval,
                config.pong_timeout,
            ))
        };

        Self {
            reader,
            writer,
            codec,
            config,
            compression,
            role,
            subprotocol,
            closed: AtomicBool::new(false),
            close_event: StdMutex::new(None),
            ping: StdMutex::new(ping),
            metrics,
        }
    }

    /// The connection role (client or server).
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// The subprotocol agreed during the handshake, if any.
    #[must_use]
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// True if `permessage-deflate` is active on this connection.
    #[must_use]
    pub fn compression_enabled(&self) -> bool {
        self.compression.is_some()
    }

    /// True once the connection has been closed, locally or by the peer.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The close code observed when the session ended, if known.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        self.close_event
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|e| e.code)
    }

    /// The close reason observed when the session ended, if known.
    #[must_use]
    pub fn close_reason(&self) -> Option<String> {
        self.close_event
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|e| e.reason.clone())
    }

    /// Activity counters for this connection.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Read one fully reassembled, fully decoded message.
    ///
    /// Control frames observed along the way are handled inline: pings are
    /// answered with an identical pong, pongs are ignored, and a close frame
    /// latches the connection and surfaces as [`Error::Close`].
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] on EOF or when already closed
    /// - [`Error::Close`] when the peer sent a close frame
    /// - [`Error::ReadDeadlineExceeded`] when the deadline lapses
    /// - [`Error::Canceled`] when `cancel` fires mid-read
    /// - frame, size, and decode errors per the protocol rules
    pub async fn read(&self, cancel: &CancellationToken) -> Result<C::Message> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let deadline = self.config.effective_read_deadline();
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Canceled),
            res = tokio::time::timeout(deadline, self.read_message()) => match res {
                Ok(result) => result,
                Err(_) => Err(Error::ReadDeadlineExceeded),
            },
        }
    }

    async fn read_message(&self) -> Result<C::Message> {
        let mut reader = self.reader.lock().await;

        let mut payload: Vec<u8> = Vec::new();
        let mut first_frame = true;
        let mut kind = MessageKind::Binary;
        let mut compressed = false;

        loop {
            let frame = reader.read_frame().await.inspect_err(|e| {
                if !matches!(e, Error::ConnectionClosed | Error::Io(_)) {
                    Metrics::incr(&self.metrics.frame_errors);
                }
            })?;

            match frame.opcode {
                OpCode::Continuation => {
                    if first_frame {
                        return Err(Error::InvalidFrame(
                            "continuation frame without initial data frame".into(),
                        ));
                    }
                }
                OpCode::Text | OpCode::Binary => {
                    if !first_frame {
                        return Err(Error::InvalidFrame(
                            "new data frame inside fragmented message".into(),
                        ));
                    }
                    kind = if frame.opcode == OpCode::Text {
                        MessageKind::Text
                    } else {
                        MessageKind::Binary
                    };
                    // RSV1 on the first data frame marks the whole message
                    // as compressed.
                    compressed = frame.rsv1;
                    first_frame = false;
                }
                OpCode::Close => {
                    let event = parse_close_payload(&frame.payload);
                    self.closed.store(true, Ordering::Release);
                    *self
                        .close_event
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner) =
                        Some(event.clone());
                    debug!(code = event.code.as_u16(), "peer closed connection");
                    return Err(Error::Close(event));
                }
                OpCode::Ping => {
                    trace!(len = frame.payload.len(), "ping received, echoing pong");
                    let pong = Frame::pong(frame.payload);
                    let mut writer = self.writer.lock().await;
                    writer.write_frame(&pong).await?;
                    writer.flush().await?;
                    continue;
                }
                OpCode::Pong => continue,
            }

            let new_len = payload.len() + frame.payload.len();
            if new_len > self.config.max_message_size {
                return Err(Error::MessageTooLarge {
                    size: new_len,
                    max: self.config.max_message_size,
                });
            }
            payload.extend_from_slice(&frame.payload);

            if frame.fin {
                break;
            }
        }
        drop(reader);

        Metrics::add(&self.metrics.bytes_read, payload.len() as u64);

        if compressed {
            let manager = self
                .compression
                .as_ref()
                .ok_or_else(|| Error::InvalidFrame("compressed frame without negotiation".into()))?;
            payload = manager.decompress(&payload)?;
            Metrics::incr(&self.metrics.messages_decompressed);
        }

        let msg = self.codec.decode(kind, payload)?;
        Metrics::incr(&self.metrics.messages_read);
        Ok(msg)
    }

    /// Write one message.
    ///
    /// The message is serialized by the codec, optionally compressed, and
    /// emitted as a single frame under the write lock. Client connections
    /// mask the payload with a fresh key.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] when already closed
    /// - [`Error::MessageTooLarge`] when the serialized form exceeds the cap
    /// - [`Error::WriteDeadlineExceeded`] when the deadline lapses
    /// - [`Error::Canceled`] when `cancel` fires mid-write
    /// - serialization and transport errors
    pub async fn write(&self, cancel: &CancellationToken, msg: &C::Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let (kind, mut payload) = self.codec.encode(msg)?;

        if payload.len() > self.config.max_message_size {
            return Err(Error::MessageTooLarge {
                size: payload.len(),
                max: self.config.max_message_size,
            });
        }

        let mut rsv1 = false;
        if let Some(manager) = &self.compression {
            if manager.should_compress(payload.len()) {
                let squeezed = manager.compress(&payload)?;
                // Keep the compressed form only when it actually helps.
                if squeezed.len() < payload.len() {
                    payload = squeezed;
                    rsv1 = true;
                    Metrics::incr(&self.metrics.messages_compressed);
                }
            }
        }

        let opcode = match kind {
            MessageKind::Text => OpCode::Text,
            MessageKind::Binary => OpCode::Binary,
        };
        let mut frame = Frame::new(true, opcode, payload);
        frame.rsv1 = rsv1;

        let deadline = self.config.effective_write_deadline();
        let written = frame.payload.len() as u64;
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Canceled),
            res = tokio::time::timeout(deadline, async {
                let mut writer = self.writer.lock().await;
                writer.write_frame(&frame).await?;
                writer.flush().await
            }) => match res {
                Ok(result) => result,
                Err(_) => Err(Error::WriteDeadlineExceeded),
            },
        }?;

        Metrics::add(&self.metrics.bytes_written, written);
        Metrics::incr(&self.metrics.messages_written);
        Ok(())
    }

    /// Close the connection with a code and reason. Idempotent.
    ///
    /// Stops the ping loop, best-effort writes a close frame within a
    /// 100 ms budget (errors swallowed: the connection is going away), and
    /// shuts the transport down. Subsequent reads and writes fail with
    /// [`Error::ConnectionClosed`].
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(code = code.as_u16(), reason, "closing connection");

        {
            let mut event = self
                .close_event
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if event.is_none() {
                *event = Some(CloseError::new(code, reason));
            }
        }

        let ping = self
            .ping
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(ping) = ping {
            ping.stop.cancel();
            let _ = ping.handle.await;
        }

        let frame = Frame::close(code.as_u16(), reason);
        let _ = tokio::time::timeout(CLOSE_WRITE_BUDGET, async {
            let mut writer = self.writer.lock().await;
            let _ = writer.write_frame(&frame).await;
            let _ = writer.flush().await;
        })
        .await;

        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

/// Decode a close frame payload: big-endian code at offset 0 (default 1000),
/// UTF-8 reason after offset 2.
fn parse_close_payload(payload: &[u8]) -> CloseError {
    if payload.len() >= 2 {
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        CloseError::new(CloseCode::from_u16(code), reason)
    } else {
        CloseError::new(CloseCode::Normal, "")
    }
}

fn spawn_ping_loop<W>(
    writer: Arc<Mutex<FrameWriter<W>>>,
    interval: Duration,
    pong_timeout: Duration,
) -> PingLoop
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let stop = CancellationToken::new();
    let loop_stop = stop.clone();

    let handle = tokio::spawn(async move {
        let budget = if pong_timeout.is_zero() {
            DEFAULT_DEADLINE
        } else {
            pong_timeout
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = loop_stop.cancelled() => return,
                _ = ticker.tick() => {
                    // Failures are swallowed: read-side liveness already
                    // surfaces dead connections.
                    let frame = Frame::ping(PING_PAYLOAD.to_vec());
                    let _ = tokio::time::timeout(budget, async {
                        let mut writer = writer.lock().await;
                        let _ = writer.write_frame(&frame).await;
                        let _ = writer.flush().await;
                    })
                    .await;
                }
            }
        }
    });

    PingLoop { stop, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RawCodec, TextCodec};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn server_conn<C: MessageCodec>(
        io: DuplexStream,
        codec: C,
        config: ConnectionConfig,
    ) -> Connection<DuplexStream, C> {
        Connection::new(io, Role::Server, codec, config, false)
    }

    #[tokio::test]
    async fn test_read_text_message() {
        let (server_io, mut client_io) = duplex(4096);
        let conn = server_conn(server_io, TextCodec, ConnectionConfig::default());

        // Masked "Hello" from the client side.
        client_io
            .write_all(&[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let msg = conn.read(&cancel).await.unwrap();
        assert_eq!(msg, "Hello");
        assert_eq!(conn.metrics().snapshot().messages_read, 1);
    }

    #[tokio::test]
    async fn test_read_fragmented_message() {
        let (server_io, mut client_io) = duplex(4096);
        let conn = server_conn(server_io, TextCodec, ConnectionConfig::default());

        // "Hel" (fin=0, text) + "lo" (fin=1, continuation), zero mask keys.
        client_io
            .write_all(&[0x01, 0x83, 0, 0, 0, 0, b'H', b'e', b'l'])
            .await
            .unwrap();
        client_io
            .write_all(&[0x80, 0x82, 0, 0, 0, 0, b'l', b'o'])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let msg = conn.read(&cancel).await.unwrap();
        assert_eq!(msg, "Hello");
    }

    #[tokio::test]
    async fn test_read_rejects_bare_continuation() {
        let (server_io, mut client_io) = duplex(4096);
        let conn = server_conn(server_io, TextCodec, ConnectionConfig::default());

        client_io
            .write_all(&[0x80, 0x82, 0, 0, 0, 0, b'h', b'i'])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        assert!(matches!(
            conn.read(&cancel).await,
            Err(Error::InvalidFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_read_rejects_data_frame_mid_fragment() {
        let (server_io, mut client_io) = duplex(4096);
        let conn = server_conn(server_io, TextCodec, ConnectionConfig::default());

        client_io
            .write_all(&[0x01, 0x83, 0, 0, 0, 0, b'H', b'e', b'l'])
            .await
            .unwrap();
        // A second text frame instead of a continuation.
        client_io
            .write_all(&[0x81, 0x82, 0, 0, 0, 0, b'l', b'o'])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        assert!(matches!(
            conn.read(&cancel).await,
            Err(Error::InvalidFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong_then_message_delivered() {
        let (server_io, mut client_io) = duplex(4096);
        let conn = server_conn(server_io, TextCodec, ConnectionConfig::default());

        // Ping "abc" then text "hi", both masked with a zero key.
        client_io
            .write_all(&[0x89, 0x83, 0, 0, 0, 0, b'a', b'b', b'c'])
            .await
            .unwrap();
        client_io
            .write_all(&[0x81, 0x82, 0, 0, 0, 0, b'h', b'i'])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let msg = conn.read(&cancel).await.unwrap();
        assert_eq!(msg, "hi");

        // The next bytes on the wire are an unmasked pong echoing "abc".
        let mut pong = [0u8; 5];
        client_io.read_exact(&mut pong).await.unwrap();
        assert_eq!(pong, [0x8a, 0x03, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_close_frame_latches_connection() {
        let (server_io, mut client_io) = duplex(4096);
        let conn = server_conn(server_io, TextCodec, ConnectionConfig::default());

        // Close with code 1001 and reason "bye", zero mask key.
        client_io
            .write_all(&[0x88, 0x85, 0, 0, 0, 0, 0x03, 0xe9, b'b', b'y', b'e'])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let err = conn.read(&cancel).await.unwrap_err();
        let close = err.as_close_error().unwrap();
        assert_eq!(close.code, CloseCode::GoingAway);
        assert_eq!(close.reason, "bye");

        assert!(conn.is_closed());
        assert_eq!(conn.close_code(), Some(CloseCode::GoingAway));
        assert_eq!(conn.close_reason().as_deref(), Some("bye"));

        // Subsequent reads fail with the plain sentinel.
        assert!(matches!(
            conn.read(&cancel).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_frame_without_code_defaults_to_1000() {
        let (server_io, mut client_io) = duplex(4096);
        let conn = server_conn(server_io, TextCodec, ConnectionConfig::default());

        client_io.write_all(&[0x88, 0x80, 0, 0, 0, 0]).await.unwrap();

        let cancel = CancellationToken::new();
        let err = conn.read(&cancel).await.unwrap_err();
        assert_eq!(err.as_close_error().unwrap().code, CloseCode::Normal);
    }

    #[tokio::test]
    async fn test_write_is_unmasked_from_server() {
        let (server_io, mut client_io) = duplex(4096);
        let conn = server_conn(server_io, TextCodec, ConnectionConfig::default());

        let cancel = CancellationToken::new();
        conn.write(&cancel, &"hello".to_string()).await.unwrap();

        let mut wire = [0u8; 7];
        client_io.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, [0x81, 0x05, b'h', b'e', b'l', b'l', b'o']);
    }

    #[tokio::test]
    async fn test_write_message_too_large() {
        let (server_io, _client_io) = duplex(4096);
        let config = ConnectionConfig {
            max_message_size: 4,
            ..ConnectionConfig::default()
        };
        let conn = server_conn(server_io, RawCodec, config);

        let cancel = CancellationToken::new();
        let result = conn.write(&cancel, &vec![0u8; 5]).await;
        assert!(matches!(result, Err(Error::MessageTooLarge { size: 5, max: 4 })));
    }

    #[tokio::test]
    async fn test_oversized_incoming_message_rejected() {
        let (server_io, mut client_io) = duplex(4096);
        let config = ConnectionConfig {
            max_message_size: 4,
            ..ConnectionConfig::default()
        };
        let conn = server_conn(server_io, RawCodec, config);

        client_io
            .write_all(&[0x82, 0x85, 0, 0, 0, 0, 1, 2, 3, 4, 5])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        assert!(matches!(
            conn.read(&cancel).await,
            Err(Error::MessageTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_io() {
        let (server_io, mut client_io) = duplex(4096);
        let conn = server_conn(server_io, TextCodec, ConnectionConfig::default());

        let cancel = CancellationToken::new();
        conn.close(CloseCode::Normal, "done").await.unwrap();
        conn.close(CloseCode::Normal, "again").await.unwrap();

        // The peer sees exactly one close frame.
        let mut wire = Vec::new();
        client_io.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire[0], 0x88);
        assert_eq!(&wire[2..4], &1000u16.to_be_bytes());
        assert_eq!(&wire[4..], b"done");

        assert!(matches!(
            conn.write(&cancel, &"nope".to_string()).await,
            Err(Error::ConnectionClosed)
        ));
        assert!(matches!(
            conn.read(&cancel).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_cancellation() {
        let (server_io, _client_io) = duplex(4096);
        let conn = server_conn(server_io, TextCodec, ConnectionConfig::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(conn.read(&cancel).await, Err(Error::Canceled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline() {
        let (server_io, _client_io) = duplex(4096);
        let config = ConnectionConfig {
            read_deadline: Duration::from_millis(50),
            ..ConnectionConfig::default()
        };
        let conn = server_conn(server_io, TextCodec, config);

        let cancel = CancellationToken::new();
        assert!(matches!(
            conn.read(&cancel).await,
            Err(Error::ReadDeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn test_ping_loop_emits_pings() {
        let (server_io, mut client_io) = duplex(4096);
        let config = ConnectionConfig {
            ping_interval: Duration::from_millis(20),
            pong_timeout: Duration::from_millis(100),
            ..ConnectionConfig::default()
        };
        let conn = server_conn(server_io, TextCodec, config);

        let mut header = [0u8; 2];
        client_io.read_exact(&mut header).await.unwrap();
        assert_eq!(header, [0x89, 0x04]);
        let mut body = [0u8; 4];
        client_io.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"ping");

        conn.close(CloseCode::Normal, "").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_reader_and_writer() {
        let (server_io, mut client_io) = duplex(65536);
        let conn = Arc::new(server_conn(server_io, TextCodec, ConnectionConfig::default()));

        let writer_conn = Arc::clone(&conn);
        let writer = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            for i in 0..20 {
                writer_conn
                    .write(&cancel, &format!("out-{i}"))
                    .await
                    .unwrap();
            }
        });

        // Feed inbound frames while the writer runs.
        let feeder = tokio::spawn(async move {
            for _ in 0..20 {
                client_io
                    .write_all(&[0x81, 0x82, 0, 0, 0, 0, b'h', b'i'])
                    .await
                    .unwrap();
            }
            client_io
        });

        let cancel = CancellationToken::new();
        for _ in 0..20 {
            assert_eq!(conn.read(&cancel).await.unwrap(), "hi");
        }

        writer.await.unwrap();
        let _client_io = feeder.await.unwrap();
    }
}
