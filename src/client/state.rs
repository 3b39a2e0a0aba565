//! The client connection lifecycle state machine.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::error::Error;

/// Client connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// No connection is established.
    #[default]
    Disconnected = 0,
    /// A connection attempt is in progress.
    Connecting = 1,
    /// The connection is established and ready.
    Connected = 2,
    /// A reconnection attempt is in progress.
    Reconnecting = 3,
    /// The client is shutting the connection down.
    Closing = 4,
    /// The client has been permanently closed. Terminal.
    Closed = 5,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// True for states where the client is connected or moving toward it.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }

    /// True if reconnection may be started from this state.
    #[must_use]
    pub const fn can_reconnect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Reconnecting
        )
    }

    /// True if the transition table allows moving from `self` to `to`.
    #[must_use]
    pub const fn can_transition(&self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (*self, to),
            (Disconnected, Connecting | Closed)
                | (Connecting, Connected | Disconnected | Closed)
                | (Connected, Disconnected | Reconnecting | Closing | Closed)
                | (Reconnecting, Connecting | Connected | Disconnected | Closed)
                | (Closing, Closed)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// A state transition event delivered to subscribed handlers.
#[derive(Debug, Clone)]
pub struct StateChange {
    /// State before the transition.
    pub from: ConnectionState,
    /// State after the transition.
    pub to: ConnectionState,
    /// When the transition was applied.
    pub at: SystemTime,
    /// The error that caused the transition, if any.
    pub cause: Option<Error>,
    /// Reconnection attempt number, when applicable.
    pub attempt: u32,
    /// The application-supplied session identifier at transition time.
    pub session_id: String,
}

/// Callback invoked synchronously for every state change.
///
/// Handlers must not block for long; post to your own executor for heavy
/// work.
pub type StateHandler = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Atomic state variable plus subscribed handlers.
///
/// Transitions are totally ordered by compare-and-swap on the state value;
/// every handler observes the same sequence of changes.
pub struct StateManager {
    state: AtomicU8,
    session_id: RwLock<String>,
    handlers: RwLock<Vec<StateHandler>>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    /// Create a manager in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            session_id: RwLock::new(String::new()),
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// The current state. Always readable, from any thread.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Set the opaque session identifier carried on future events.
    pub fn set_session_id(&self, id: impl Into<String>) {
        *self
            .session_id
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = id.into();
    }

    /// The current session identifier.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.session_id
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Subscribe a handler to state change events.
    pub fn on_state_change(&self, handler: StateHandler) {
        self.handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(handler);
    }

    /// Compare-and-set transition.
    ///
    /// Succeeds only when the current state is `from` and the transition
    /// table allows `from -> to`. On success every handler is invoked
    /// synchronously before this returns.
    pub fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
        cause: Option<Error>,
        attempt: u32,
    ) -> bool {
        if !from.can_transition(to) {
            return false;
        }
        if self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.emit(from, to, cause, attempt);
        true
    }

    /// Unconditional transition; returns the previous state.
    ///
    /// Emits an event only when the state actually changed. `Closed` is
    /// absorbing: once there, no forced transition leaves it.
    pub fn force_transition(
        &self,
        to: ConnectionState,
        cause: Option<Error>,
        attempt: u32,
    ) -> ConnectionState {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if ConnectionState::from_u8(current) == ConnectionState::Closed {
                return ConnectionState::Closed;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(prev) => {
                    let from = ConnectionState::from_u8(prev);
                    if from != to {
                        self.emit(from, to, cause, attempt);
                    }
                    return from;
                }
                Err(observed) => current = observed,
            }
        }
    }

    fn emit(&self, from: ConnectionState, to: ConnectionState, cause: Option<Error>, attempt: u32) {
        let change = StateChange {
            from,
            to,
            at: SystemTime::now(),
            cause,
            attempt,
            session_id: self.session_id(),
        };

        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        for handler in &handlers {
            handler(&change);
        }
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish()
    }
}
