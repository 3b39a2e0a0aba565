//! Bounded offline message queue.
//!
//! While the client is reconnecting, writes land here instead of failing.
//! Each entry carries a one-shot result channel that fires exactly once:
//! with the send outcome after a flush, or with the reason the message was
//! dropped.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

const DEFAULT_MAX_SIZE: usize = 100;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

struct QueuedMessage<T> {
    msg: T,
    cancel: CancellationToken,
    done: oneshot::Sender<Result<()>>,
    expires_at: Instant,
}

/// Counters and size information for a [`MessageQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Entries currently waiting.
    pub current_size: usize,
    /// Configured capacity.
    pub max_size: usize,
    /// Total messages accepted by `enqueue`.
    pub enqueued: u64,
    /// Messages successfully sent by a flush.
    pub sent: u64,
    /// Messages dropped: expired, cancelled, failed, cleared, or refused
    /// because the queue was full.
    pub dropped: u64,
}

/// Bounded FIFO of messages awaiting a connection.
pub struct MessageQueue<T> {
    entries: Mutex<VecDeque<QueuedMessage<T>>>,
    max_size: usize,
    timeout: Duration,
    enqueued: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl<T> MessageQueue<T> {
    /// Create a queue. A zero `max_size` falls back to 100 entries, a zero
    /// `timeout` to 30 seconds.
    #[must_use]
    pub fn new(max_size: usize, timeout: Duration) -> Self {
        let max_size = if max_size == 0 {
            DEFAULT_MAX_SIZE
        } else {
            max_size
        };
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_size)),
            max_size,
            timeout,
            enqueued: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Append a message, returning the channel that will carry its outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::QueueClosed`] after [`close`](Self::close)
    /// - [`Error::QueueFull`] when at capacity (counted as a drop)
    pub fn enqueue(&self, cancel: CancellationToken, msg: T) -> Result<oneshot::Receiver<Result<()>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::QueueClosed);
        }

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if entries.len() >= self.max_size {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(Error::QueueFull);
        }

        let (done, result) = oneshot::channel();
        entries.push_back(QueuedMessage {
            msg,
            cancel,
            done,
            expires_at: Instant::now() + self.timeout,
        });
        self.enqueued.fetch_add(1, Ordering::Relaxed);

        Ok(result)
    }

    /// Drain the queue in FIFO order through `send`.
    ///
    /// The backlog is swapped out up front, so new enqueues proceed while
    /// the flush runs. Expired and cancelled entries are dropped with
    /// [`Error::QueueTimeout`] / [`Error::Canceled`] on their result
    /// channels; the rest get the outcome of `send`.
    pub async fn flush<F, Fut>(&self, send: F)
    where
        F: Fn(CancellationToken, T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let backlog: VecDeque<QueuedMessage<T>> = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::replace(&mut *entries, VecDeque::with_capacity(self.max_size))
        };

        if backlog.is_empty() {
            return;
        }
        debug!(backlog = backlog.len(), "flushing queued messages");

        let now = Instant::now();
        for entry in backlog {
            if now > entry.expires_at {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let _ = entry.done.send(Err(Error::QueueTimeout));
                continue;
            }
            if entry.cancel.is_cancelled() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let _ = entry.done.send(Err(Error::Canceled));
                continue;
            }

            let outcome = send(entry.cancel, entry.msg).await;
            match &outcome {
                Ok(()) => self.sent.fetch_add(1, Ordering::Relaxed),
                Err(_) => self.dropped.fetch_add(1, Ordering::Relaxed),
            };
            let _ = entry.done.send(outcome);
        }
    }

    /// Drop every pending entry, signalling [`Error::QueueCleared`].
    pub fn clear(&self) {
        let backlog: VecDeque<QueuedMessage<T>> = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *entries)
        };

        self.dropped.fetch_add(backlog.len() as u64, Ordering::Relaxed);
        for entry in backlog {
            let _ = entry.done.send(Err(Error::QueueCleared));
        }
    }

    /// Clear the queue and refuse all future enqueues. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.clear();
    }

    /// True once the queue is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of entries currently waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// True when no entries are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters and size information.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            current_size: self.len(),
            max_size: self.max_size,
            enqueued: self.enqueued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl<T> std::fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}
