//! Subscription configuration.

use std::time::Duration;

/// Default connection string.
pub const DEFAULT_DATABASE_URL: &str = "postgres://postgres@127.0.0.1:5432/postgres";

/// Default interval between liveness pings on an idle connection.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default delay before the first reconnection attempt.
pub const DEFAULT_MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// Default upper bound for the reconnection backoff.
pub const DEFAULT_MAX_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of reconnection attempts before a loss is unrecoverable.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Default number of notifications buffered between the connection and its reader.
pub const DEFAULT_NOTIFICATION_BUFFER: usize = 1024;

/// Configuration for a notification subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// PostgreSQL connection string.
    pub database_url: String,

    /// Interval between liveness pings.
    pub heartbeat_interval: Duration,

    /// Delay before the first reconnection attempt. Doubles per attempt.
    pub min_reconnect_interval: Duration,

    /// Maximum delay between reconnection attempts.
    pub max_reconnect_interval: Duration,

    /// Reconnection attempts before giving up. Zero makes the first loss final.
    pub max_reconnect_attempts: u32,

    /// Capacity of the notification queue.
    pub notification_buffer: usize,
}

impl SubscriptionConfig {
    /// Create a new configuration for the given connection string.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            min_reconnect_interval: DEFAULT_MIN_RECONNECT_INTERVAL,
            max_reconnect_interval: DEFAULT_MAX_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
        }
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the reconnection backoff bounds.
    pub fn with_reconnect_interval(mut self, min: Duration, max: Duration) -> Self {
        self.min_reconnect_interval = min;
        self.max_reconnect_interval = max.max(min);
        self
    }

    /// Set the number of reconnection attempts.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the notification queue capacity.
    pub fn with_notification_buffer(mut self, size: usize) -> Self {
        self.notification_buffer = size.max(1);
        self
    }

    /// Backoff delay before the given reconnection attempt (starting at 1).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.min_reconnect_interval
            .saturating_mul(factor)
            .min(self.max_reconnect_interval)
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE_URL)
    }
}
