//! Connection timing: the delay between reconnection attempts and the
//! deadlines that decide a connection is dead.
//!
//! The connection manager schedules one attempt at a time; this module
//! only decides how long to wait before it. [`ReconnectPolicy::Fixed`]
//! retries at a constant interval forever. [`ReconnectPolicy::Backoff`]
//! grows the delay after each consecutive failure up to a cap.
//! [`Liveness`] bounds the handshake and the silence on an open
//! connection; exceeding either counts as a close.

use std::time::Duration;

/// Default interval between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default bound on the connect handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between outbound pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Default silence after which an open connection is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// Deadlines that detect a stalled handshake or a half-open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    /// Upper bound on [`Connector::connect`](crate::Connector::connect).
    pub connect_timeout: Duration,
    /// How often to ping an open connection. `None` sends no pings.
    pub ping_interval: Option<Duration>,
    /// Drop an open connection after this long without any inbound
    /// frame, heartbeats included. `None` never drops it.
    pub idle_timeout: Option<Duration>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// How long to wait before the next reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt.
    Fixed(Duration),
    /// Exponential backoff, reset by a successful open.
    Backoff(BackoffConfig),
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Delay before the attempt that follows `failures` consecutive
    /// closes without a successful open in between.
    ///
    /// `failures` counts from 1 for the first close.
    pub fn delay_for(&self, failures: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Backoff(config) => {
                let mut delay = config.initial_delay.min(config.max_delay);
                for _ in 1..failures {
                    let next = next_delay(delay, config);
                    // Stops at the cap, or when the multiplier no longer grows it.
                    if next <= delay {
                        break;
                    }
                    delay = next;
                }
                delay
            }
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}
