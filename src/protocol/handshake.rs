//! WebSocket opening handshake (RFC 6455 Section 4).
//!
//! Parsing and serialization of the HTTP/1.1 upgrade exchange: the client
//! request, the server's `101 Switching Protocols` response, the
//! `Sec-WebSocket-Accept` derivation, and subprotocol selection. Policy
//! decisions (origin checks, which subprotocols a server offers) live with
//! the [`Upgrader`](crate::server::Upgrader) and
//! [`Dialer`](crate::client::Dialer).

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The GUID appended to the client key in the accept derivation (RFC 6455
/// Section 1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The extension token negotiated for per-message DEFLATE (RFC 7692).
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// Compute the `Sec-WebSocket-Accept` value for a client key:
/// `base64(SHA1(key ++ GUID))`.
///
/// # Example
///
/// ```
/// use tether::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a random `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| Error::InvalidHandshake(format!("key generation failed: {}", e)))?;
    Ok(BASE64.encode(nonce))
}

/// Pick the subprotocol to speak, giving the client's preference order
/// priority. Returns `None` when either side offered nothing.
///
/// # Errors
///
/// Returns `Error::InvalidSubprotocol` when both sides offered protocols but
/// none matched.
pub fn select_subprotocol(requested: &[String], supported: &[String]) -> Result<Option<String>> {
    if requested.is_empty() || supported.is_empty() {
        return Ok(None);
    }
    for req in requested {
        if supported.iter().any(|s| s == req) {
            return Ok(Some(req.clone()));
        }
    }
    Err(Error::InvalidSubprotocol)
}

/// Check whether a `Sec-WebSocket-Extensions` header value offers
/// `permessage-deflate`. Parameters after `;` are ignored: only the
/// stateless single-message form is spoken either way.
#[must_use]
pub fn offers_permessage_deflate(extensions: &str) -> bool {
    extensions.split(',').any(|offer| {
        offer
            .split(';')
            .next()
            .is_some_and(|name| name.trim().eq_ignore_ascii_case(PERMESSAGE_DEFLATE))
    })
}

fn parse_header_block<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    headers
}

/// A parsed client upgrade request.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// HTTP method from the request line.
    pub method: String,
    /// Request path, including any query string.
    pub path: String,
    /// The `Sec-WebSocket-Key` header value, if present.
    pub key: Option<String>,
    /// The `Origin` header value, if present.
    pub origin: Option<String>,
    /// Requested subprotocols, in the client's preference order.
    pub protocols: Vec<String>,
    /// The raw `Sec-WebSocket-Extensions` header value, if present.
    pub extensions: Option<String>,
    /// All request headers, keyed by lowercase name.
    pub headers: HashMap<String, String>,
}

impl HandshakeRequest {
    /// Parse an upgrade request from raw HTTP bytes.
    ///
    /// This only checks HTTP shape; upgrade semantics (method, headers,
    /// version) are validated by the server's upgrade path.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` for non-UTF-8 data or a malformed
    /// request line.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("request is not valid UTF-8".into()))?;

        let mut lines = text.lines();
        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("empty request".into()))?;

        let mut parts = request_line.split_whitespace();
        let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v)) => (m, p, v),
            _ => return Err(Error::InvalidHandshake("malformed request line".into())),
        };
        if !version.starts_with("HTTP/1.1") {
            return Err(Error::InvalidHandshake(format!(
                "expected HTTP/1.1, got {}",
                version
            )));
        }

        let headers = parse_header_block(lines);

        let protocols = headers
            .get("sec-websocket-protocol")
            .map(|p| p.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            key: headers.get("sec-websocket-key").cloned(),
            origin: headers.get("origin").cloned(),
            protocols,
            extensions: headers.get("sec-websocket-extensions").cloned(),
            headers,
        })
    }

    /// Look up a header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// True if the request offers `permessage-deflate`.
    #[must_use]
    pub fn wants_compression(&self) -> bool {
        self.extensions
            .as_deref()
            .is_some_and(offers_permessage_deflate)
    }

    /// Serialize a client upgrade request.
    ///
    /// `extra_headers` are appended verbatim after the standard set.
    #[must_use]
    pub fn serialize_client_request(
        host: &str,
        path: &str,
        key: &str,
        subprotocols: &[String],
        compression: bool,
        extra_headers: &[(String, String)],
    ) -> String {
        let mut req = String::with_capacity(256);
        req.push_str("GET ");
        req.push_str(path);
        req.push_str(" HTTP/1.1\r\nHost: ");
        req.push_str(host);
        req.push_str("\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: ");
        req.push_str(key);
        req.push_str("\r\nSec-WebSocket-Version: 13\r\n");

        if !subprotocols.is_empty() {
            req.push_str("Sec-WebSocket-Protocol: ");
            req.push_str(&subprotocols.join(", "));
            req.push_str("\r\n");
        }
        if compression {
            req.push_str("Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n");
        }
        for (name, value) in extra_headers {
            req.push_str(name);
            req.push_str(": ");
            req.push_str(value);
            req.push_str("\r\n");
        }

        req.push_str("\r\n");
        req
    }
}

/// A parsed server handshake response.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    /// HTTP status code from the status line.
    pub status: u16,
    /// The `Sec-WebSocket-Accept` header value, if present.
    pub accept: Option<String>,
    /// The selected subprotocol, if any.
    pub protocol: Option<String>,
    /// The raw `Sec-WebSocket-Extensions` header value, if present.
    pub extensions: Option<String>,
    /// All response headers, keyed by lowercase name.
    pub headers: HashMap<String, String>,
}

impl HandshakeResponse {
    /// Parse a handshake response from raw HTTP bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` for non-UTF-8 data or a malformed
    /// status line.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("response is not valid UTF-8".into()))?;

        let mut lines = text.lines();
        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("empty response".into()))?;

        let mut parts = status_line.split_whitespace();
        let version = parts
            .next()
            .ok_or_else(|| Error::InvalidHandshake("malformed status line".into()))?;
        if !version.starts_with("HTTP/1.1") {
            return Err(Error::InvalidHandshake(format!(
                "expected HTTP/1.1, got {}",
                version
            )));
        }
        let status: u16 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::InvalidHandshake("malformed status code".into()))?;

        let headers = parse_header_block(lines);

        Ok(Self {
            status,
            accept: headers.get("sec-websocket-accept").cloned(),
            protocol: headers.get("sec-websocket-protocol").cloned(),
            extensions: headers.get("sec-websocket-extensions").cloned(),
            headers,
        })
    }

    /// Validate the response against the key the client sent.
    ///
    /// Checks the 101 status, the `Upgrade`/`Connection` headers, and the
    /// mandatory accept-key recomputation.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHandshake` describing the first check that
    /// failed.
    pub fn validate(&self, sent_key: &str) -> Result<()> {
        if self.status != 101 {
            return Err(Error::InvalidHandshake(format!(
                "unexpected status code: {}",
                self.status
            )));
        }

        match self.headers.get("upgrade") {
            Some(v) if v.eq_ignore_ascii_case("websocket") => {}
            _ => {
                return Err(Error::InvalidHandshake(
                    "missing or invalid Upgrade header".into(),
                ))
            }
        }

        match self.headers.get("connection") {
            Some(v) if v.to_ascii_lowercase().contains("upgrade") => {}
            _ => {
                return Err(Error::InvalidHandshake(
                    "missing or invalid Connection header".into(),
                ))
            }
        }

        let expected = compute_accept_key(sent_key);
        match self.accept.as_deref() {
            Some(accept) if accept == expected => Ok(()),
            _ => Err(Error::InvalidHandshake(
                "Sec-WebSocket-Accept mismatch".into(),
            )),
        }
    }

    /// True if the server accepted `permessage-deflate`.
    #[must_use]
    pub fn compression_accepted(&self) -> bool {
        self.extensions
            .as_deref()
            .is_some_and(offers_permessage_deflate)
    }

    /// Serialize a `101 Switching Protocols` response.
    #[must_use]
    pub fn serialize_accept(
        accept: &str,
        protocol: Option<&str>,
        compression: bool,
    ) -> String {
        let mut resp = String::with_capacity(160);
        resp.push_str(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n",
        );
        resp.push_str("Sec-WebSocket-Accept: ");
        resp.push_str(accept);
        resp.push_str("\r\n");
        if let Some(proto) = protocol {
            resp.push_str("Sec-WebSocket-Protocol: ");
            resp.push_str(proto);
            resp.push_str("\r\n");
        }
        if compression {
            resp.push_str("Sec-WebSocket-Extensions: permessage-deflate\r\n");
        }
        resp.push_str("\r\n");
        resp
    }
}
