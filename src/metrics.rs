//! Lock-free counters for connection, message, reconnection, and
//! compression activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracking runtime activity.
///
/// All counters are relaxed atomics: they are observability data, not
/// synchronization points.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Messages fully read and decoded.
    pub messages_read: AtomicU64,
    /// Messages written and flushed.
    pub messages_written: AtomicU64,
    /// Payload bytes read (after unmasking, before decompression).
    pub bytes_read: AtomicU64,
    /// Payload bytes written (after compression, before masking).
    pub bytes_written: AtomicU64,
    /// Frame-level protocol errors observed on the read path.
    pub frame_errors: AtomicU64,
    /// Reconnection attempts started.
    pub reconnect_attempts: AtomicU64,
    /// Reconnection attempts that produced a live connection.
    pub reconnect_successes: AtomicU64,
    /// Reconnect loops that gave up.
    pub reconnect_failures: AtomicU64,
    /// Messages written in compressed form.
    pub messages_compressed: AtomicU64,
    /// Messages inflated on the read path.
    pub messages_decompressed: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Messages fully read and decoded.
    pub messages_read: u64,
    /// Messages written and flushed.
    pub messages_written: u64,
    /// Payload bytes read.
    pub bytes_read: u64,
    /// Payload bytes written.
    pub bytes_written: u64,
    /// Frame-level protocol errors.
    pub frame_errors: u64,
    /// Reconnection attempts started.
    pub reconnect_attempts: u64,
    /// Successful reconnections.
    pub reconnect_successes: u64,
    /// Exhausted reconnect loops.
    pub reconnect_failures: u64,
    /// Messages written in compressed form.
    pub messages_compressed: u64,
    /// Messages inflated on the read path.
    pub messages_decompressed: u64,
}

impl Metrics {
    /// Create a zeroed set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_read: self.messages_read.load(Ordering::Relaxed),
            messages_written: self.messages_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            reconnect_successes: self.reconnect_successes.load(Ordering::Relaxed),
            reconnect_failures: self.reconnect_failures.load(Ordering::Relaxed),
            messages_compressed: self.messages_compressed.load(Ordering::Relaxed),
            messages_decompressed: self.messages_decompressed.load(Ordering::Relaxed),
        }
    }
}
