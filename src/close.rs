//! WebSocket close status codes (RFC 6455 Section 7.4) and the typed close
//! event surfaced when a peer ends the session.

use std::fmt;

/// WebSocket close status code per RFC 6455 Section 7.4.
///
/// Covers the registered 1000-1015 range plus the 3000-3999 (library) and
/// 4000-4999 (application) ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000). The connection successfully completed.
    #[default]
    Normal,
    /// Going away (1001). Endpoint is going away (server shutdown, browser navigating away).
    GoingAway,
    /// Protocol error (1002). A malformed frame or protocol violation was observed.
    ProtocolError,
    /// Unsupported data (1003). Endpoint received a data type it cannot handle.
    UnsupportedData,
    /// No status received (1005). Reserved: signals a close frame without a code.
    NoStatusReceived,
    /// Abnormal closure (1006). Reserved: the transport died without a close frame.
    AbnormalClosure,
    /// Invalid payload (1007). Message data was inconsistent with its type.
    InvalidPayload,
    /// Policy violation (1008). Message violated the endpoint's policy.
    PolicyViolation,
    /// Message too big (1009). Message too large to process.
    MessageTooBig,
    /// Mandatory extension (1010). The server did not negotiate a required extension.
    MandatoryExtension,
    /// Internal error (1011). The server hit an unexpected condition.
    InternalError,
    /// Service restart (1012). The server is restarting.
    ServiceRestart,
    /// Try again later (1013). The server is overloaded.
    TryAgainLater,
    /// Bad gateway (1014). A gateway received an invalid upstream response.
    BadGateway,
    /// TLS handshake failure (1015). Reserved, never sent on the wire.
    TlsHandshake,
    /// Any other code, including the 3000-3999 and 4000-4999 ranges.
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatusReceived,
            1006 => CloseCode::AbnormalClosure,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            1012 => CloseCode::ServiceRestart,
            1013 => CloseCode::TryAgainLater,
            1014 => CloseCode::BadGateway,
            1015 => CloseCode::TlsHandshake,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::AbnormalClosure => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::ServiceRestart => 1012,
            CloseCode::TryAgainLater => 1013,
            CloseCode::BadGateway => 1014,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check if this code is reserved and must never appear on the wire.
    ///
    /// Reserved per RFC 6455 Section 7.4.1: 1005 (no status received),
    /// 1006 (abnormal closure), 1015 (TLS handshake). They are
    /// implementation-only signals.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self.as_u16(), 1005 | 1006 | 1015)
    }

    /// Check if this code may be sent in a close frame.
    ///
    /// Valid codes are the non-reserved values in 1000-1015 plus the
    /// 3000-4999 library/application ranges.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        let code = self.as_u16();
        !self.is_reserved() && matches!(code, 1000..=1015 | 3000..=4999)
    }

    /// Check if reconnection should typically be attempted after this code.
    ///
    /// This is a hint used by the default reconnect predicate; applications
    /// can override it with their own `should_reconnect` logic.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1001 | 1006 | 1011 | 1012 | 1013 | 1014) || code >= 4000
    }

    /// Human-readable name for this close code.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            CloseCode::Normal => "Normal Closure",
            CloseCode::GoingAway => "Going Away",
            CloseCode::ProtocolError => "Protocol Error",
            CloseCode::UnsupportedData => "Unsupported Data",
            CloseCode::NoStatusReceived => "No Status Received",
            CloseCode::AbnormalClosure => "Abnormal Closure",
            CloseCode::InvalidPayload => "Invalid Payload Data",
            CloseCode::PolicyViolation => "Policy Violation",
            CloseCode::MessageTooBig => "Message Too Big",
            CloseCode::MandatoryExtension => "Mandatory Extension",
            CloseCode::InternalError => "Internal Error",
            CloseCode::ServiceRestart => "Service Restart",
            CloseCode::TryAgainLater => "Try Again Later",
            CloseCode::BadGateway => "Bad Gateway",
            CloseCode::TlsHandshake => "TLS Handshake Failed",
            CloseCode::Other(code) => {
                let c = *code;
                if c >= 3000 && c < 4000 {
                    "Library-Defined"
                } else if c >= 4000 && c < 5000 {
                    "Application-Defined"
                } else {
                    "Unknown"
                }
            }
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u16(), self.name())
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode::from_u16(code)
    }
}

/// A close event received from the peer, carrying code and reason.
///
/// Distinguishable from the plain [`Error::ConnectionClosed`] sentinel: a
/// `CloseError` means a close frame actually arrived (or the close cause is
/// otherwise known), while the sentinel covers reads and writes against an
/// already-dead connection.
///
/// [`Error::ConnectionClosed`]: crate::Error::ConnectionClosed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseError {
    /// The close status code.
    pub code: CloseCode,
    /// Human-readable reason for closing.
    pub reason: String,
}

impl CloseError {
    /// Create a new close error with the given code and reason.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Check if reconnection should typically be attempted.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "connection closed (code: {})", self.code)
        } else {
            write!(
                f,
                "connection closed (code: {}, reason: {})",
                self.code, self.reason
            )
        }
    }
}

impl std::error::Error for CloseError {}
