//! Server-side HTTP/1.1 upgrade to WebSocket.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::codec::MessageCodec;
use crate::config::UpgradeOptions;
use crate::connection::{Connection, Role};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::protocol::handshake::{compute_accept_key, select_subprotocol};
use crate::protocol::HandshakeRequest;

/// Upper bound on the upgrade request size.
const MAX_HANDSHAKE_SIZE: usize = 8192;

/// Promotes HTTP/1.1 upgrade requests to WebSocket connections.
///
/// Two entry points cover the common deployments: [`upgrade`](Self::upgrade)
/// reads the HTTP request off a raw accepted stream, while
/// [`accept_request`](Self::accept_request) takes a request that an HTTP
/// server already parsed together with the hijacked transport.
#[derive(Debug, Clone, Default)]
pub struct Upgrader {
    options: UpgradeOptions,
}

impl Upgrader {
    /// Create an upgrader with the given options.
    #[must_use]
    pub fn new(options: UpgradeOptions) -> Self {
        Self { options }
    }

    /// The options this upgrader applies.
    #[must_use]
    pub fn options(&self) -> &UpgradeOptions {
        &self.options
    }

    /// Read an upgrade request from `io` and promote the stream.
    ///
    /// # Errors
    ///
    /// - [`Error::UpgradeRequired`] when the request is not a WebSocket upgrade
    /// - [`Error::InvalidHandshake`] for version or key problems
    /// - [`Error::InvalidOrigin`] when the configured origin check rejects
    /// - [`Error::InvalidSubprotocol`] when no requested subprotocol is supported
    pub async fn upgrade<S, C>(&self, mut io: S, codec: C) -> Result<Connection<S, C>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        C: MessageCodec,
    {
        let (head, leftover) = read_http_head(&mut io).await?;
        let request = HandshakeRequest::parse(&head)?;
        self.finish(request, io, codec, leftover).await
    }

    /// Promote a stream whose upgrade request was already parsed by an HTTP
    /// layer. `io` must be positioned right after the request head.
    ///
    /// # Errors
    ///
    /// Same as [`upgrade`](Self::upgrade).
    pub async fn accept_request<S, C>(
        &self,
        request: HandshakeRequest,
        io: S,
        codec: C,
    ) -> Result<Connection<S, C>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        C: MessageCodec,
    {
        self.finish(request, io, codec, Vec::new()).await
    }

    async fn finish<S, C>(
        &self,
        request: HandshakeRequest,
        mut io: S,
        codec: C,
        leftover: Vec<u8>,
    ) -> Result<Connection<S, C>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        C: MessageCodec,
    {
        if request.method != "GET" {
            return Err(Error::UpgradeRequired);
        }

        match request.header("upgrade") {
            Some(v) if v.eq_ignore_ascii_case("websocket") => {}
            _ => return Err(Error::UpgradeRequired),
        }

        match request.header("connection") {
            Some(v) if v.to_ascii_lowercase().contains("upgrade") => {}
            _ => return Err(Error::UpgradeRequired),
        }

        if request.header("sec-websocket-version") != Some("13") {
            // Advertise the version we speak before failing the exchange.
            let _ = io
                .write_all(
                    b"HTTP/1.1 426 Upgrade Required\r\nSec-WebSocket-Version: 13\r\n\r\n",
                )
                .await;
            let _ = io.flush().await;
            return Err(Error::InvalidHandshake(
                "unsupported Sec-WebSocket-Version".into(),
            ));
        }

        if let Some(check) = &self.options.check_origin {
            if !check(&request) {
                return Err(Error::InvalidOrigin);
            }
        }

        let key = match request.key.as_deref() {
            Some(k) if !k.is_empty() => k,
            _ => {
                return Err(Error::InvalidHandshake(
                    "missing Sec-WebSocket-Key".into(),
                ))
            }
        };

        let subprotocol = select_subprotocol(&request.protocols, &self.options.subprotocols)?;
        let compression = self.options.compression && request.wants_compression();

        let accept = compute_accept_key(key);
        let response = crate::protocol::HandshakeResponse::serialize_accept(
            &accept,
            subprotocol.as_deref(),
            compression,
        );
        io.write_all(response.as_bytes()).await?;
        io.flush().await?;

        debug!(
            path = %request.path,
            subprotocol = subprotocol.as_deref().unwrap_or(""),
            compression,
            "upgraded connection"
        );

        Ok(Connection::with_details(
            io,
            Role::Server,
            Arc::new(codec),
            self.options.connection.clone(),
            compression,
            subprotocol,
            &leftover,
            Arc::new(Metrics::new()),
        ))
    }
}

/// Read bytes up to and including the blank line that ends an HTTP head.
/// Returns the head and any bytes that arrived behind it.
pub(crate) async fn read_http_head<S>(io: &mut S) -> Result<(Vec<u8>, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        if let Some(end) = find_head_end(&buf) {
            let leftover = buf.split_off(end);
            return Ok((buf, leftover));
        }
        if buf.len() > MAX_HANDSHAKE_SIZE {
            return Err(Error::InvalidHandshake("handshake too large".into()));
        }

        let n = io.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::InvalidHandshake(
                "connection closed during handshake".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|idx| idx + 4)
}
