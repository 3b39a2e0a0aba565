//! The resilient WebSocket client: dialer + state machine + reconnector +
//! offline queue + user callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::dial::{ClientConnection, Dialer};
use crate::client::queue::{MessageQueue, QueueStats};
use crate::client::reconnect::{ReconnectConfig, Reconnector};
use crate::client::state::{ConnectionState, StateChange, StateManager};
use crate::close::CloseCode;
use crate::codec::MessageCodec;
use crate::config::DialOptions;
use crate::error::{Error, Result};
use crate::metrics::{Metrics, MetricsSnapshot};

/// How long the read loop naps when the client is between connections.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Configuration for [`Client`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Options for the underlying dials.
    pub dial: DialOptions,
    /// Automatic reconnection behavior.
    pub reconnect: ReconnectConfig,
    /// Capacity of the offline message queue; 0 disables queueing.
    pub queue_size: usize,
    /// How long queued messages stay valid.
    pub queue_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dial: DialOptions::default(),
            reconnect: ReconnectConfig::default(),
            queue_size: 100,
            queue_timeout: Duration::from_secs(30),
        }
    }
}

type Callback<A> = StdRwLock<Option<Arc<dyn Fn(A) + Send + Sync>>>;

struct Callbacks<M> {
    on_connect: StdRwLock<Option<Arc<dyn Fn() + Send + Sync>>>,
    on_disconnect: Callback<Error>,
    on_message: StdRwLock<Option<Arc<dyn Fn(M) + Send + Sync>>>,
    on_error: Callback<Error>,
}

impl<M> Default for Callbacks<M> {
    fn default() -> Self {
        Self {
            on_connect: StdRwLock::new(None),
            on_disconnect: StdRwLock::new(None),
            on_message: StdRwLock::new(None),
            on_error: StdRwLock::new(None),
        }
    }
}

struct ClientInner<C: MessageCodec> {
    url: String,
    dialer: Dialer,
    codec: Arc<C>,
    state: StateManager,
    reconnector: Mutex<Reconnector>,
    queue: Option<MessageQueue<C::Message>>,
    callbacks: Callbacks<C::Message>,
    conn: StdRwLock<Option<Arc<ClientConnection<C>>>>,
    shutdown: CancellationToken,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    metrics: Arc<Metrics>,
}

/// A WebSocket client with automatic reconnection and offline message
/// queueing.
///
/// Cheap to clone; all clones share the same session. At most three
/// background tasks run at a time: the read loop, the reconnect loop, and
/// the connection's ping loop.
pub struct Client<C: MessageCodec> {
    inner: Arc<ClientInner<C>>,
}

impl<C: MessageCodec> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: MessageCodec> Client<C> {
    /// Create a client for `url`. No connection is made until
    /// [`connect`](Self::connect).
    #[must_use]
    pub fn new(url: impl Into<String>, codec: C, options: ClientOptions) -> Self {
        let queue = (options.queue_size > 0)
            .then(|| MessageQueue::new(options.queue_size, options.queue_timeout));

        let inner = ClientInner {
            url: url.into(),
            dialer: Dialer::new(options.dial),
            codec: Arc::new(codec),
            state: StateManager::new(),
            reconnector: Mutex::new(Reconnector::new(options.reconnect)),
            queue,
            callbacks: Callbacks::default(),
            conn: StdRwLock::new(None),
            shutdown: CancellationToken::new(),
            tasks: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            metrics: Arc::new(Metrics::new()),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Set the callback invoked after every successful connect, including
    /// reconnects.
    pub fn on_connect<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self
            .inner
            .callbacks
            .on_connect
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::new(f));
    }

    /// Set the callback invoked when the connection is lost, with the error
    /// that ended it.
    pub fn on_disconnect<F>(&self, f: F)
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        *self
            .inner
            .callbacks
            .on_disconnect
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::new(f));
    }

    /// Set the callback invoked for every message the read loop delivers.
    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(C::Message) + Send + Sync + 'static,
    {
        *self
            .inner
            .callbacks
            .on_message
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::new(f));
    }

    /// Set the callback invoked for non-fatal errors the read loop observes.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        *self
            .inner
            .callbacks
            .on_error
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::new(f));
    }

    /// Subscribe to state change events.
    pub fn on_state_change<F>(&self, f: F)
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.inner.state.on_state_change(Arc::new(f));
    }

    /// Set the opaque session identifier carried on state change events.
    pub fn set_session_id(&self, id: impl Into<String>) {
        self.inner.state.set_session_id(id);
    }

    /// The current session identifier.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.inner.state.session_id()
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.state()
    }

    /// True when the client is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Offline queue counters; zeroes when queueing is disabled.
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.inner
            .queue
            .as_ref()
            .map(MessageQueue::stats)
            .unwrap_or_default()
    }

    /// Runtime counters, accumulated across reconnects.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Establish the connection.
    ///
    /// Succeeds immediately when already connected. Flushes any queued
    /// messages once the connection is up.
    ///
    /// # Errors
    ///
    /// - [`Error::ClientClosed`] after [`close`](Self::close)
    /// - [`Error::InvalidState`] when called mid-transition
    /// - dial errors, with the state forced back to `Disconnected`
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(Error::ClientClosed);
        }

        if !inner.state.transition(
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            None,
            0,
        ) {
            if inner.state.state() == ConnectionState::Connected {
                return Ok(());
            }
            return Err(Error::InvalidState);
        }

        let dial = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Canceled),
            result = inner.dialer.dial_shared(
                &inner.url,
                Arc::clone(&inner.codec),
                Arc::clone(&inner.metrics),
            ) => result,
        };

        match dial {
            Err(err) => {
                inner
                    .state
                    .force_transition(ConnectionState::Disconnected, Some(err.clone()), 0);
                Err(err)
            }
            Ok(conn) => {
                inner.install_connection(conn);
                inner
                    .state
                    .force_transition(ConnectionState::Connected, None, 0);
                inner.flush_queue().await;
                inner.invoke_connect();

                let mut reconnector = inner.reconnector.lock().await;
                reconnector.record_connect();
                reconnector.maybe_reset();
                Ok(())
            }
        }
    }

    /// [`connect`](Self::connect) plus a background read loop that delivers
    /// messages to [`on_message`](Self::on_message) and drives disconnect
    /// handling and reconnection.
    pub async fn connect_with_read_loop(&self, cancel: &CancellationToken) -> Result<()> {
        self.connect(cancel).await?;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            read_loop(inner).await;
        });
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(handle);

        Ok(())
    }

    /// Read one message directly from the current connection.
    ///
    /// Not for use together with
    /// [`connect_with_read_loop`](Self::connect_with_read_loop): the
    /// connection allows only one reader.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] when no connection is installed, or any
    /// connection read error.
    pub async fn read(&self, cancel: &CancellationToken) -> Result<C::Message> {
        let conn = self.inner.current_conn().ok_or(Error::ConnectionClosed)?;
        conn.read(cancel).await
    }

    /// Write a message.
    ///
    /// When connected the write goes straight to the connection. During
    /// `Connecting`/`Reconnecting`, with queueing enabled, the message is
    /// queued and this call waits for the post-reconnect flush to report its
    /// fate. Otherwise the write fails.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] when disconnected without a queue,
    /// queue errors, or the underlying write error.
    pub async fn write(&self, cancel: &CancellationToken, msg: C::Message) -> Result<()> {
        let inner = &self.inner;
        let state = inner.state.state();

        if state == ConnectionState::Connected {
            return inner.write_direct(cancel.clone(), msg).await;
        }

        if let Some(queue) = &inner.queue {
            if matches!(
                state,
                ConnectionState::Reconnecting | ConnectionState::Connecting
            ) {
                let outcome = queue.enqueue(cancel.clone(), msg)?;
                return tokio::select! {
                    _ = cancel.cancelled() => Err(Error::Canceled),
                    result = outcome => result.unwrap_or(Err(Error::ConnectionClosed)),
                };
            }
        }

        Err(Error::ConnectionClosed)
    }

    /// Shut the client down. One-shot; later calls return `Ok(())`.
    ///
    /// Cancels the background tasks, closes the queue (failing its pending
    /// writes with [`Error::QueueCleared`]), closes the connection with code
    /// 1000, and waits for the tasks to finish. The client ends in the
    /// terminal `Closed` state; every later operation fails.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(url = %inner.url, "closing client");

        inner
            .state
            .force_transition(ConnectionState::Closing, None, 0);
        inner.shutdown.cancel();

        if let Some(queue) = &inner.queue {
            queue.close();
        }

        let conn = inner
            .conn
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let mut result = Ok(());
        if let Some(conn) = conn {
            result = conn.close(CloseCode::Normal, "client closed").await;
        }

        let tasks: Vec<JoinHandle<()>> = inner
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }

        inner.state.force_transition(ConnectionState::Closed, None, 0);
        result
    }
}

impl<C: MessageCodec> ClientInner<C> {
    fn current_conn(&self) -> Option<Arc<ClientConnection<C>>> {
        self.conn
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn install_connection(&self, conn: ClientConnection<C>) {
        *self
            .conn
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::new(conn));
    }

    async fn write_direct(&self, cancel: CancellationToken, msg: C::Message) -> Result<()> {
        let conn = self.current_conn().ok_or(Error::ConnectionClosed)?;
        conn.write(&cancel, &msg).await
    }

    async fn flush_queue(&self) {
        if let Some(queue) = &self.queue {
            queue
                .flush(|token, msg| self.write_direct(token, msg))
                .await;
        }
    }

    fn invoke_connect(&self) {
        let cb = self
            .callbacks
            .on_connect
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(cb) = cb {
            cb();
        }
    }

    fn invoke_disconnect(&self, err: &Error) {
        let cb = self
            .callbacks
            .on_disconnect
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(cb) = cb {
            cb(err.clone());
        }
    }

    fn invoke_message(&self, msg: C::Message) {
        let cb = self
            .callbacks
            .on_message
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(cb) = cb {
            cb(msg);
        }
    }

    fn invoke_error(&self, err: &Error) {
        let cb = self
            .callbacks
            .on_error
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(cb) = cb {
            cb(err.clone());
        }
    }
}

/// The background read loop: deliver messages, classify errors, and kick
/// off disconnect handling.
async fn read_loop<C: MessageCodec>(inner: Arc<ClientInner<C>>) {
    loop {
        if inner.shutdown.is_cancelled() {
            return;
        }

        match inner.state.state() {
            ConnectionState::Closed | ConnectionState::Closing => return,
            ConnectionState::Connected => {}
            _ => {
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }
        }

        let Some(conn) = inner.current_conn() else {
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        };

        match conn.read(&inner.shutdown).await {
            Ok(msg) => inner.invoke_message(msg),
            Err(err) if err.is_disconnect() => {
                handle_disconnect(&inner, err).await;
            }
            Err(err) => inner.invoke_error(&err),
        }
    }
}

/// Disconnect handling: notify, then either launch the reconnect task or
/// settle in `Disconnected`.
async fn handle_disconnect<C: MessageCodec>(inner: &Arc<ClientInner<C>>, err: Error) {
    let from = inner.state.state();
    if matches!(from, ConnectionState::Closed | ConnectionState::Closing) {
        return;
    }
    warn!(error = %err, "connection lost");

    inner.invoke_disconnect(&err);

    let (should, attempts) = {
        let reconnector = inner.reconnector.lock().await;
        (reconnector.should_reconnect(Some(&err)), reconnector.attempts())
    };

    if should {
        inner
            .state
            .force_transition(ConnectionState::Reconnecting, Some(err), attempts);
        spawn_reconnect(Arc::clone(inner));
    } else {
        inner
            .state
            .force_transition(ConnectionState::Disconnected, Some(err), 0);
    }
}

fn spawn_reconnect<C: MessageCodec>(inner: Arc<ClientInner<C>>) {
    let task_inner = Arc::clone(&inner);
    let handle = tokio::spawn(async move {
        let inner = task_inner;
        let mut reconnector = inner.reconnector.lock().await;

        let dial_inner = Arc::clone(&inner);
        let result = reconnector
            .reconnect_loop(&inner.shutdown, move |attempt| {
                let inner = Arc::clone(&dial_inner);
                async move {
                    Metrics::incr(&inner.metrics.reconnect_attempts);
                    inner
                        .state
                        .force_transition(ConnectionState::Connecting, None, attempt);

                    let conn = inner
                        .dialer
                        .dial_shared(
                            &inner.url,
                            Arc::clone(&inner.codec),
                            Arc::clone(&inner.metrics),
                        )
                        .await?;

                    inner.install_connection(conn);
                    Metrics::incr(&inner.metrics.reconnect_successes);
                    inner
                        .state
                        .force_transition(ConnectionState::Connected, None, attempt);
                    inner.flush_queue().await;
                    inner.invoke_connect();
                    Ok(())
                }
            })
            .await;

        match result {
            Ok(()) => {
                reconnector.maybe_reset();
            }
            Err(Error::Canceled) => {
                // Shutdown raced the reconnect; close() owns the state now.
            }
            Err(err) => {
                Metrics::incr(&inner.metrics.reconnect_failures);
                let attempts = reconnector.attempts();
                inner
                    .state
                    .force_transition(ConnectionState::Disconnected, Some(err.clone()), attempts);
                inner.invoke_error(&err);
            }
        }
    });

    inner
        .tasks
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(handle);
}
