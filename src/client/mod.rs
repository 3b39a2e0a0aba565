//! The resilient client stack: dialing, lifecycle state, reconnection, and
//! offline queueing.

#[allow(clippy::module_inception)]
mod client;
mod dial;
mod queue;
mod reconnect;
mod state;

pub use client::{Client, ClientOptions};
pub use dial::{ClientConnection, Dialer, MaybeTlsStream};
pub use queue::{MessageQueue, QueueStats};
pub use reconnect::{
    OnReconnectFailed, OnReconnected, OnReconnecting, ReconnectConfig, ReconnectPredicate,
    Reconnector,
};
pub use state::{ConnectionState, StateChange, StateHandler, StateManager};
