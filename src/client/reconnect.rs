//! Exponential-backoff reconnection.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_RESET_AFTER: Duration = Duration::from_secs(60);

/// Decides whether a given failure warrants another attempt.
///
/// Receives the error that ended the session (`None` before the first check
/// of a loop iteration) and the number of attempts made so far.
pub type ReconnectPredicate = Arc<dyn Fn(Option<&Error>, u32) -> bool + Send + Sync>;

/// Hook invoked when an attempt starts, with the attempt number and the
/// delay about to be slept.
pub type OnReconnecting = Arc<dyn Fn(u32, Duration) + Send + Sync>;
/// Hook invoked when an attempt produced a live connection.
pub type OnReconnected = Arc<dyn Fn(u32) + Send + Sync>;
/// Hook invoked when an attempt failed.
pub type OnReconnectFailed = Arc<dyn Fn(u32, &Error) + Send + Sync>;

/// Automatic reconnection behavior.
#[derive(Clone)]
pub struct ReconnectConfig {
    /// Master switch; when false the client never reconnects.
    pub enabled: bool,
    /// Maximum number of attempts; 0 means unlimited.
    pub max_attempts: u32,
    /// Delay before the first attempt. Defaults to 1 s.
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay. Defaults to 30 s.
    pub max_delay: Duration,
    /// Exponential growth factor. Defaults to 2.0.
    pub backoff_multiplier: f64,
    /// Perturb each delay by up to ±25% to avoid thundering herds.
    pub jitter: bool,
    /// Reset the attempt counter once a connection has stayed healthy this
    /// long. Defaults to 60 s.
    pub reset_after: Duration,
    /// Custom reconnect decision; overrides the close-code heuristic.
    pub should_reconnect: Option<ReconnectPredicate>,
    /// Called when an attempt starts.
    pub on_reconnecting: Option<OnReconnecting>,
    /// Called when an attempt succeeds.
    pub on_reconnected: Option<OnReconnected>,
    /// Called when an attempt fails.
    pub on_reconnect_failed: Option<OnReconnectFailed>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 0,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_MULTIPLIER,
            jitter: true,
            reset_after: DEFAULT_RESET_AFTER,
            should_reconnect: None,
            on_reconnecting: None,
            on_reconnected: None,
            on_reconnect_failed: None,
        }
    }
}

impl ReconnectConfig {
    /// A configuration with reconnection switched off entirely.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for ReconnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectConfig")
            .field("enabled", &self.enabled)
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("reset_after", &self.reset_after)
            .field("should_reconnect", &self.should_reconnect.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Splitmix-style generator for jitter; seeded with entropy at construction.
struct JitterRng {
    state: u64,
}

impl JitterRng {
    fn from_entropy() -> Self {
        let mut seed = [0u8; 8];
        let state = if getrandom::getrandom(&mut seed).is_ok() {
            u64::from_le_bytes(seed)
        } else {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9E37_79B9_7F4A_7C15)
        };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in [0, 1).
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Backoff state for one client. Mutated only by the single reconnect task.
pub struct Reconnector {
    config: ReconnectConfig,
    attempts: u32,
    last_connect: Option<Instant>,
    rng: JitterRng,
}

impl Reconnector {
    /// Create a reconnector, replacing non-positive delays and multiplier
    /// with their defaults.
    #[must_use]
    pub fn new(mut config: ReconnectConfig) -> Self {
        if config.initial_delay.is_zero() {
            config.initial_delay = DEFAULT_INITIAL_DELAY;
        }
        if config.max_delay.is_zero() {
            config.max_delay = DEFAULT_MAX_DELAY;
        }
        if config.backoff_multiplier <= 0.0 {
            config.backoff_multiplier = DEFAULT_MULTIPLIER;
        }
        if config.reset_after.is_zero() {
            config.reset_after = DEFAULT_RESET_AFTER;
        }

        Self {
            config,
            attempts: 0,
            last_connect: None,
            rng: JitterRng::from_entropy(),
        }
    }

    /// Number of attempts made since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Decide whether another attempt should be made after `err`.
    ///
    /// Order: the master switch, then the attempt budget, then the user
    /// predicate, then the close-code recoverability hint, then a default
    /// yes.
    #[must_use]
    pub fn should_reconnect(&self, err: Option<&Error>) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts {
            return false;
        }
        if let Some(predicate) = &self.config.should_reconnect {
            return predicate(err, self.attempts);
        }
        if let Some(Error::Close(close)) = err {
            return close.is_recoverable();
        }
        true
    }

    /// The delay for the current attempt number, jittered when configured.
    fn next_delay(&mut self) -> Duration {
        let base = self.config.initial_delay.as_secs_f64()
            * self.config.backoff_multiplier.powi(self.attempts as i32);
        let mut delay = base.min(self.config.max_delay.as_secs_f64());

        if self.config.jitter {
            let range = delay * 0.25;
            delay += self.rng.next_f64() * 2.0 * range - range;
        }

        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Perform a single attempt: sleep the backoff delay, then dial.
    ///
    /// # Errors
    ///
    /// Returns `Error::Canceled` when `cancel` fires during the delay, or
    /// the dial error itself.
    pub async fn attempt<F, Fut>(&mut self, cancel: &CancellationToken, dial: F) -> Result<()>
    where
        F: FnOnce(u32) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.attempts += 1;
        let delay = self.next_delay();

        if let Some(hook) = &self.config.on_reconnecting {
            hook(self.attempts, delay);
        }
        debug!(attempt = self.attempts, ?delay, "reconnect attempt starting");

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            _ = tokio::time::sleep(delay) => {}
        }

        match dial(self.attempts).await {
            Ok(()) => {
                self.last_connect = Some(Instant::now());
                if let Some(hook) = &self.config.on_reconnected {
                    hook(self.attempts);
                }
                debug!(attempt = self.attempts, "reconnect attempt succeeded");
                Ok(())
            }
            Err(err) => {
                if let Some(hook) = &self.config.on_reconnect_failed {
                    hook(self.attempts, &err);
                }
                warn!(attempt = self.attempts, error = %err, "reconnect attempt failed");
                Err(err)
            }
        }
    }

    /// Record a successful connect made outside the reconnect loop.
    pub fn record_connect(&mut self) {
        self.last_connect = Some(Instant::now());
    }

    /// Zero the attempt counter.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Reset the attempt counter if the last successful connect is at least
    /// `reset_after` old, so a brief outage after a long healthy period does
    /// not start from an escalated delay.
    pub fn maybe_reset(&mut self) {
        if let Some(last) = self.last_connect {
            if last.elapsed() >= self.config.reset_after {
                self.reset();
            }
        }
    }

    /// Repeat [`attempt`](Self::attempt) until a dial succeeds, the policy
    /// denies further tries, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// `Error::ReconnectFailed` when attempts are exhausted or denied,
    /// `Error::Canceled` on cancellation.
    pub async fn reconnect_loop<F, Fut>(
        &mut self,
        cancel: &CancellationToken,
        mut dial: F,
    ) -> Result<()>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Canceled);
            }
            if !self.should_reconnect(None) {
                return Err(Error::ReconnectFailed);
            }

            match self.attempt(cancel, &mut dial).await {
                Ok(()) => return Ok(()),
                Err(Error::Canceled) => return Err(Error::Canceled),
                Err(err) => {
                    if !self.should_reconnect(Some(&err)) {
                        return Err(Error::ReconnectFailed);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Reconnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconnector")
            .field("attempts", &self.attempts)
            .field("config", &self.config)
            .finish()
    }
}
