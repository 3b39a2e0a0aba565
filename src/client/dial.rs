//! Client-side dialing: URL handling, TCP/TLS connect, and the upgrade
//! request.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig as TlsClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::Url;

use crate::codec::MessageCodec;
use crate::config::DialOptions;
use crate::connection::{Connection, Role};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::protocol::handshake::generate_key;
use crate::protocol::{HandshakeRequest, HandshakeResponse};
use crate::server::read_http_head;

/// A dialed transport: plain TCP or TLS over TCP.
#[allow(clippy::large_enum_variant)]
pub enum MaybeTlsStream {
    /// Plain TCP, for `ws://`.
    Plain(TcpStream),
    /// TLS over TCP, for `wss://`.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A connection produced by [`Dialer::dial`].
pub type ClientConnection<C> = Connection<MaybeTlsStream, C>;

fn default_tls_config() -> Arc<TlsClientConfig> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        TlsClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

struct Target {
    tls: bool,
    host: String,
    port: u16,
    path: String,
}

fn parse_target(raw: &str) -> Result<Target> {
    let url = Url::parse(raw).map_err(|e| Error::InvalidHandshake(format!("invalid url: {e}")))?;

    let tls = match url.scheme() {
        "ws" => false,
        "wss" => true,
        other => {
            return Err(Error::InvalidHandshake(format!(
                "unsupported scheme: {other}"
            )))
        }
    };

    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidHandshake("url has no host".into()))?
        .to_string();
    let port = url.port().unwrap_or(if tls { 443 } else { 80 });

    let mut path = url.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    Ok(Target { tls, host, port, path })
}

/// WebSocket client dialer.
///
/// Rewrites `ws`/`wss` URLs onto TCP/TLS, performs the upgrade request, and
/// validates the server's `101` response including the mandatory accept-key
/// check.
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    options: DialOptions,
}

impl Dialer {
    /// Create a dialer with the given options.
    #[must_use]
    pub fn new(options: DialOptions) -> Self {
        Self { options }
    }

    /// The options this dialer applies.
    #[must_use]
    pub fn options(&self) -> &DialOptions {
        &self.options
    }

    /// Dial `url` and perform the WebSocket handshake.
    ///
    /// The whole exchange (TCP connect, TLS if any, request, response) is
    /// bounded by `handshake_timeout`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandshake`] for URL, negotiation, or validation
    /// problems; [`Error::Io`] for transport failures.
    pub async fn dial<C>(&self, url: &str, codec: C) -> Result<ClientConnection<C>>
    where
        C: MessageCodec,
    {
        self.dial_shared(url, Arc::new(codec), Arc::new(Metrics::new()))
            .await
    }

    pub(crate) async fn dial_shared<C>(
        &self,
        url: &str,
        codec: Arc<C>,
        metrics: Arc<Metrics>,
    ) -> Result<ClientConnection<C>>
    where
        C: MessageCodec,
    {
        let timeout = self.options.handshake_timeout;
        match tokio::time::timeout(timeout, self.handshake(url, codec, metrics)).await {
            Ok(result) => result,
            Err(_) => Err(Error::InvalidHandshake("handshake timed out".into())),
        }
    }

    async fn handshake<C>(
        &self,
        url: &str,
        codec: Arc<C>,
        metrics: Arc<Metrics>,
    ) -> Result<ClientConnection<C>>
    where
        C: MessageCodec,
    {
        let target = parse_target(url)?;
        let addr = format!("{}:{}", target.host, target.port);

        let tcp = TcpStream::connect(&addr).await?;
        let mut stream = if target.tls {
            let config = self
                .options
                .tls
                .clone()
                .unwrap_or_else(default_tls_config);
            let connector = TlsConnector::from(config);
            let server_name = ServerName::try_from(target.host.clone())
                .map_err(|_| Error::InvalidHandshake("invalid TLS server name".into()))?;
            MaybeTlsStream::Tls(Box::new(connector.connect(server_name, tcp).await?))
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        let key = generate_key()?;
        let request = HandshakeRequest::serialize_client_request(
            &addr,
            &target.path,
            &key,
            &self.options.subprotocols,
            self.options.compression,
            &self.options.headers,
        );
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let (head, leftover) = read_http_head(&mut stream).await?;
        let response = HandshakeResponse::parse(&head)?;
        response.validate(&key)?;

        let compression = self.options.compression && response.compression_accepted();
        let subprotocol = response.protocol.clone();

        debug!(
            url,
            subprotocol = subprotocol.as_deref().unwrap_or(""),
            compression,
            "dial complete"
        );

        Ok(Connection::with_details(
            stream,
            Role::Client,
            codec,
            self.options.connection.clone(),
            compression,
            subprotocol,
            &leftover,
            metrics,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_ws() {
        let t = parse_target("ws://example.com/chat").unwrap();
        assert!(!t.tls);
        assert_eq!(t.host, "example.com");
        assert_eq!(t.port, 80);
        assert_eq!(t.path, "/chat");
    }

    #[test]
    fn test_parse_target_wss_with_port_and_query() {
        let t = parse_target("wss://example.com:9443/stream?room=7&mode=live").unwrap();
        assert!(t.tls);
        assert_eq!(t.port, 9443);
        assert_eq!(t.path, "/stream?room=7&mode=live");
    }

    #[test]
    fn test_parse_target_root_path() {
        let t = parse_target("ws://example.com").unwrap();
        assert_eq!(t.path, "/");
    }

    #[test]
    fn test_parse_target_rejects_other_schemes() {
        for bad in ["http://example.com", "https://example.com", "ftp://x", "example.com"] {
            assert!(
                matches!(parse_target(bad), Err(Error::InvalidHandshake(_))),
                "{bad} should be rejected"
            );
        }
    }
}
