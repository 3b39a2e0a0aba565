//! Error types for the WebSocket runtime.
//!
//! All fallible operations in this crate return [`Result`]. The error type is
//! cloneable so that the cause of a disconnect can be carried on state change
//! events without consuming it.

use thiserror::Error;

use crate::close::CloseError;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The HTTP upgrade exchange was malformed or failed validation.
    #[error("invalid websocket handshake: {0}")]
    InvalidHandshake(String),

    /// The request is not a WebSocket upgrade request.
    #[error("upgrade required")]
    UpgradeRequired,

    /// The Origin header was rejected by the configured origin check.
    #[error("invalid origin")]
    InvalidOrigin,

    /// None of the requested subprotocols is supported by the server.
    #[error("invalid subprotocol")]
    InvalidSubprotocol,

    /// A frame violated the WebSocket protocol.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame masking direction did not match the sender's role.
    #[error("invalid mask")]
    InvalidMask,

    /// The frame opcode is reserved or unassigned.
    #[error("unsupported frame type: {0:#x}")]
    UnsupportedFrameType(u8),

    /// A control frame was fragmented (forbidden by RFC 6455).
    #[error("fragmented control frame")]
    FragmentedControlFrame,

    /// A frame payload exceeds the configured or protocol maximum.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared payload size.
        size: u64,
        /// Maximum allowed size.
        max: u64,
    },

    /// More frame bytes are needed before a frame can be parsed.
    ///
    /// An internal signal used by the buffered frame reader; it never escapes
    /// a connection read.
    #[error("incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// A reassembled message exceeds the configured maximum.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Accumulated message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The message codec failed to serialize an outgoing message.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// The message codec failed to deserialize an incoming message.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// DEFLATE compression or decompression failed.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer sent a close frame; carries the close code and reason.
    #[error(transparent)]
    Close(#[from] CloseError),

    /// A read operation exceeded its deadline.
    #[error("read deadline exceeded")]
    ReadDeadlineExceeded,

    /// A write operation exceeded its deadline.
    #[error("write deadline exceeded")]
    WriteDeadlineExceeded,

    /// The operation was canceled via its cancellation token.
    #[error("operation canceled")]
    Canceled,

    /// An invalid connection state transition was attempted.
    #[error("invalid state transition")]
    InvalidState,

    /// The client has been closed.
    #[error("client closed")]
    ClientClosed,

    /// Reconnection attempts were exhausted or denied.
    #[error("reconnection failed")]
    ReconnectFailed,

    /// The message queue is full.
    #[error("message queue full")]
    QueueFull,

    /// The message queue has been closed.
    #[error("message queue closed")]
    QueueClosed,

    /// A queued message expired before it could be sent.
    #[error("queued message timeout")]
    QueueTimeout,

    /// The queue was cleared before the message was sent.
    #[error("message queue cleared")]
    QueueCleared,

    /// An I/O error from the underlying transport.
    #[error("i/o error: {0}")]
    Io(String),
}

impl Error {
    /// Returns the close event carried by this error, if any.
    #[must_use]
    pub fn as_close_error(&self) -> Option<&CloseError> {
        match self {
            Error::Close(e) => Some(e),
            _ => None,
        }
    }

    /// True if this error signals that the transport or session is gone and
    /// the client should run its disconnect handling.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Close(_) | Error::ConnectionClosed | Error::Canceled | Error::Io(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::close::CloseCode;

    #[test]
    fn test_error_display() {
        let err = Error::FrameTooLarge {
            size: 20_000_000,
            max: 4096,
        };
        assert_eq!(
            err.to_string(),
            "frame too large: 20000000 bytes (max: 4096)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_as_close_error() {
        let err = Error::Close(CloseError::new(CloseCode::GoingAway, "shutting down"));
        let close = err.as_close_error().unwrap();
        assert_eq!(close.code, CloseCode::GoingAway);
        assert_eq!(close.reason, "shutting down");

        assert!(Error::ConnectionClosed.as_close_error().is_none());
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(Error::ConnectionClosed.is_disconnect());
        assert!(Error::Canceled.is_disconnect());
        assert!(Error::Close(CloseError::new(CloseCode::Normal, "")).is_disconnect());
        assert!(!Error::QueueFull.is_disconnect());
        assert!(!Error::ReadDeadlineExceeded.is_disconnect());
        assert!(!Error::DeserializationFailed("bad json".into()).is_disconnect());
    }

    #[test]
    fn test_error_clone_eq() {
        let err = Error::InvalidSubprotocol;
        assert_eq!(err.clone(), err);
    }
}
