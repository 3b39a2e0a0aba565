//! Configuration for server upgrades, client dials, and the resilient
//! client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::rustls::ClientConfig as TlsClientConfig;

use crate::compression::DEFAULT_COMPRESSION_THRESHOLD;
use crate::protocol::HandshakeRequest;

/// Default buffer size for the transport read/write buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
/// Default per-frame payload cap.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;
/// Default per-message (reassembled) cap.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_048_576;
/// Deadline applied to reads and writes when none is configured.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
/// Default client handshake timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Server-side origin validator.
pub type OriginCheck = Arc<dyn Fn(&HandshakeRequest) -> bool + Send + Sync>;

/// Connection tuning shared by the server and client paths.
///
/// A `read_deadline`/`write_deadline` of zero means "use the 30 second
/// default" at operation time; a `ping_interval` of zero disables the
/// keepalive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Transport read buffer size in bytes.
    pub read_buffer_size: usize,
    /// Transport write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Per-frame payload cap.
    pub max_frame_size: usize,
    /// Per-message cap after fragment reassembly.
    pub max_message_size: usize,
    /// Per-operation read timeout; zero selects the default.
    pub read_deadline: Duration,
    /// Per-operation write timeout; zero selects the default.
    pub write_deadline: Duration,
    /// Keepalive ping interval; zero disables the ping loop.
    pub ping_interval: Duration,
    /// Write deadline used when emitting keepalive pings.
    pub pong_timeout: Duration,
    /// Minimum payload size to compress when compression is negotiated.
    pub compression_threshold: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_deadline: Duration::ZERO,
            write_deadline: Duration::ZERO,
            ping_interval: Duration::ZERO,
            pong_timeout: Duration::ZERO,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl ConnectionConfig {
    /// Effective read deadline for one operation.
    #[must_use]
    pub fn effective_read_deadline(&self) -> Duration {
        if self.read_deadline.is_zero() {
            DEFAULT_DEADLINE
        } else {
            self.read_deadline
        }
    }

    /// Effective write deadline for one operation.
    #[must_use]
    pub fn effective_write_deadline(&self) -> Duration {
        if self.write_deadline.is_zero() {
            DEFAULT_DEADLINE
        } else {
            self.write_deadline
        }
    }
}

/// Options for upgrading an HTTP request to a WebSocket connection
/// (server side).
#[derive(Clone, Default)]
pub struct UpgradeOptions {
    /// Connection tuning. Server defaults leave the ping loop disabled.
    pub connection: ConnectionConfig,
    /// Subprotocols this server speaks, in no particular order.
    pub subprotocols: Vec<String>,
    /// Accept `permessage-deflate` offers from clients.
    pub compression: bool,
    /// Origin validator; `None` allows every origin.
    pub check_origin: Option<OriginCheck>,
}

impl UpgradeOptions {
    /// Create options with the defaults from the configuration table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-frame payload cap.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.connection.max_frame_size = size;
        self
    }

    /// Set the per-message cap.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.connection.max_message_size = size;
        self
    }

    /// Set the keepalive ping interval and the write deadline for pings.
    #[must_use]
    pub fn ping(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.connection.ping_interval = interval;
        self.connection.pong_timeout = pong_timeout;
        self
    }

    /// Set the subprotocols the server is willing to speak.
    #[must_use]
    pub fn subprotocols(mut self, protocols: Vec<String>) -> Self {
        self.subprotocols = protocols;
        self
    }

    /// Enable `permessage-deflate` negotiation.
    #[must_use]
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Install an origin validator.
    #[must_use]
    pub fn check_origin<F>(mut self, check: F) -> Self
    where
        F: Fn(&HandshakeRequest) -> bool + Send + Sync + 'static,
    {
        self.check_origin = Some(Arc::new(check));
        self
    }
}

impl fmt::Debug for UpgradeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeOptions")
            .field("connection", &self.connection)
            .field("subprotocols", &self.subprotocols)
            .field("compression", &self.compression)
            .field("check_origin", &self.check_origin.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Options for dialing a WebSocket server (client side).
#[derive(Clone)]
pub struct DialOptions {
    /// Connection tuning. Client defaults enable a 30 s ping loop with a
    /// 10 s pong write budget.
    pub connection: ConnectionConfig,
    /// Maximum time for TCP connect plus the upgrade exchange.
    pub handshake_timeout: Duration,
    /// Subprotocols to request, in preference order.
    pub subprotocols: Vec<String>,
    /// Request `permessage-deflate` from the server.
    pub compression: bool,
    /// Extra headers appended to the upgrade request.
    pub headers: Vec<(String, String)>,
    /// TLS configuration for `wss://` dials; `None` uses the webpki root
    /// store.
    pub tls: Option<Arc<TlsClientConfig>>,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig {
                ping_interval: Duration::from_secs(30),
                pong_timeout: Duration::from_secs(10),
                ..ConnectionConfig::default()
            },
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            subprotocols: Vec::new(),
            compression: false,
            headers: Vec::new(),
            tls: None,
        }
    }
}

impl DialOptions {
    /// Create options with the defaults from the configuration table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the per-frame payload cap.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.connection.max_frame_size = size;
        self
    }

    /// Set the per-message cap.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.connection.max_message_size = size;
        self
    }

    /// Set the keepalive ping interval and the write deadline for pings.
    /// A zero interval disables the loop.
    #[must_use]
    pub fn ping(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.connection.ping_interval = interval;
        self.connection.pong_timeout = pong_timeout;
        self
    }

    /// Set the subprotocols to request, in preference order.
    #[must_use]
    pub fn subprotocols(mut self, protocols: Vec<String>) -> Self {
        self.subprotocols = protocols;
        self
    }

    /// Request `permessage-deflate`, with the given minimum payload size to
    /// compress.
    #[must_use]
    pub fn compression(mut self, enabled: bool, threshold: usize) -> Self {
        self.compression = enabled;
        if threshold > 0 {
            self.connection.compression_threshold = threshold;
        }
        self
    }

    /// Append an extra header to the upgrade request.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Use a custom TLS configuration for `wss://` dials.
    #[must_use]
    pub fn tls_config(mut self, config: Arc<TlsClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }
}

impl fmt::Debug for DialOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialOptions")
            .field("connection", &self.connection)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("subprotocols", &self.subprotocols)
            .field("compression", &self.compression)
            .field("headers", &self.headers.len())
            .field("tls", &self.tls.as_ref().map(|_| "..."))
            .finish()
    }
}
