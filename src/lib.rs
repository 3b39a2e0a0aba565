//! # tether
//!
//! A typed, resilient WebSocket (RFC 6455) runtime for tokio.
//!
//! The crate has three layers:
//!
//! - **Protocol** ([`protocol`], [`compression`]): frame codec, masking,
//!   opening handshake, and stateless per-message DEFLATE (RFC 7692).
//! - **Connection** ([`Connection`]): a typed full-duplex channel over any
//!   `AsyncRead + AsyncWrite` transport, with fragmentation reassembly,
//!   automatic pong replies, a keepalive ping loop, and an idempotent close
//!   handshake. Message types flow through a pluggable [`MessageCodec`]
//!   ([`JsonCodec`], [`RawCodec`], [`TextCodec`]).
//! - **Client** ([`Client`]): automatic reconnection with exponential
//!   backoff and jitter, a bounded offline message queue flushed after
//!   reconnect, and causal connect/disconnect/message callbacks on top of a
//!   six-state lifecycle ([`ConnectionState`]).
//!
//! Servers promote HTTP/1.1 upgrade requests with [`Upgrader`]; clients dial
//! with [`Dialer`] or, for the resilient stack, [`Client`].
//!
//! ## Echo client
//!
//! ```rust,ignore
//! use tether::{Client, ClientOptions, TextCodec};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = Client::new("ws://127.0.0.1:9001/echo", TextCodec, ClientOptions::default());
//! client.on_message(|msg| println!("got: {msg}"));
//!
//! let cancel = CancellationToken::new();
//! client.connect_with_read_loop(&cancel).await?;
//! client.write(&cancel, "hello".into()).await?;
//! ```

pub mod client;
pub mod close;
pub mod codec;
pub mod compression;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod server;

pub use client::{
    Client, ClientConnection, ClientOptions, ConnectionState, Dialer, MaybeTlsStream,
    MessageQueue, QueueStats, ReconnectConfig, Reconnector, StateChange, StateManager,
};
pub use close::{CloseCode, CloseError};
pub use codec::{JsonCodec, MessageCodec, MessageKind, RawCodec, TextCodec};
pub use compression::CompressionManager;
pub use config::{ConnectionConfig, DialOptions, UpgradeOptions};
pub use connection::{Connection, Role};
pub use error::{Error, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use server::Upgrader;
