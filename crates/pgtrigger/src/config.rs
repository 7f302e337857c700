//! Listener configuration and command-line arguments.

use std::time::Duration;

use clap::{Parser, Subcommand};

use pgtrigger_client::config::{
    DEFAULT_DATABASE_URL, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_NOTIFICATION_BUFFER,
};
use pgtrigger_client::SubscriptionConfig;
use pgtrigger_proto::SubscriptionTarget;

use crate::error::Error;

/// Default time `stop` waits for the dispatch loop to exit, in seconds.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Default heartbeat interval, in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Default minimum reconnection delay, in milliseconds.
pub const DEFAULT_MIN_RECONNECT_MS: u64 = 500;

/// Default maximum reconnection delay, in milliseconds.
pub const DEFAULT_MAX_RECONNECT_MS: u64 = 5_000;

/// Default schema for command-line targets.
pub const DEFAULT_SCHEMA: &str = "public";

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Connection and reconnection settings for the subscription.
    pub subscription: SubscriptionConfig,

    /// How long `stop` waits for the dispatch loop to exit.
    pub stop_timeout: Duration,
}

impl ListenerConfig {
    /// Create a new listener configuration for the given connection string.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            subscription: SubscriptionConfig::new(database_url),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
        }
    }

    /// Set the subscription settings.
    pub fn with_subscription(mut self, subscription: SubscriptionConfig) -> Self {
        self.subscription = subscription;
        self
    }

    /// Set the stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Connection string of the subscription.
    pub fn database_url(&self) -> &str {
        &self.subscription.database_url
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE_URL)
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "pgtrigger")]
#[command(version, about = "PostgreSQL row change notifications", long_about = None)]
pub struct Args {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL, global = true)]
    pub database_url: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install the notification trigger on a table.
    Install(TargetArgs),

    /// Remove the notification trigger from a table.
    Uninstall(TargetArgs),

    /// Print change notifications for a table as JSON lines.
    Listen(ListenArgs),
}

/// Table selection.
#[derive(clap::Args, Debug, Clone)]
pub struct TargetArgs {
    /// Schema of the table.
    #[arg(long, default_value = DEFAULT_SCHEMA)]
    pub schema: String,

    /// Table name.
    #[arg(long)]
    pub table: String,
}

impl TargetArgs {
    /// Validate the selection into a subscription target.
    pub fn to_target(&self) -> Result<SubscriptionTarget, Error> {
        Ok(SubscriptionTarget::new(&self.schema, &self.table)?)
    }
}

/// Arguments of the `listen` subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct ListenArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Seconds between liveness pings.
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_SECS)]
    pub heartbeat: u64,

    /// Minimum reconnection delay in milliseconds.
    #[arg(long, default_value_t = DEFAULT_MIN_RECONNECT_MS)]
    pub min_reconnect_ms: u64,

    /// Maximum reconnection delay in milliseconds.
    #[arg(long, default_value_t = DEFAULT_MAX_RECONNECT_MS)]
    pub max_reconnect_ms: u64,

    /// Reconnection attempts before giving up (0 = fail on first loss).
    #[arg(long, default_value_t = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub reconnect_attempts: u32,

    /// Notifications buffered between the connection and the consumers.
    #[arg(long, default_value_t = DEFAULT_NOTIFICATION_BUFFER)]
    pub buffer: usize,

    /// Seconds to wait for a clean stop.
    #[arg(long, default_value_t = DEFAULT_STOP_TIMEOUT_SECS)]
    pub stop_timeout: u64,
}

impl ListenArgs {
    /// Convert command-line arguments to listener configuration.
    pub fn into_config(self, database_url: impl Into<String>) -> Result<ListenerConfig, Error> {
        if self.heartbeat == 0 {
            return Err(Error::Config("heartbeat must be at least one second".to_string()));
        }
        if self.min_reconnect_ms == 0 {
            return Err(Error::Config(
                "minimum reconnection delay must be positive".to_string(),
            ));
        }

        let subscription = SubscriptionConfig::new(database_url)
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat))
            .with_reconnect_interval(
                Duration::from_millis(self.min_reconnect_ms),
                Duration::from_millis(self.max_reconnect_ms),
            )
            .with_max_reconnect_attempts(self.reconnect_attempts)
            .with_notification_buffer(self.buffer);

        Ok(ListenerConfig {
            subscription,
            stop_timeout: Duration::from_secs(self.stop_timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ListenerConfig::default();
        assert_eq!(config.database_url(), DEFAULT_DATABASE_URL);
        assert_eq!(
            config.stop_timeout,
            Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS)
        );
        assert_eq!(
            config.subscription.max_reconnect_attempts,
            DEFAULT_MAX_RECONNECT_ATTEMPTS
        );
    }

    #[test]
    fn test_config_builder() {
        let config = ListenerConfig::new("postgres://db/app")
            .with_stop_timeout(Duration::from_secs(2))
            .with_subscription(
                SubscriptionConfig::new("postgres://db/other").with_max_reconnect_attempts(0),
            );

        assert_eq!(config.stop_timeout, Duration::from_secs(2));
        assert_eq!(config.database_url(), "postgres://db/other");
        assert_eq!(config.subscription.max_reconnect_attempts, 0);
    }

    #[test]
    fn test_parse_listen() {
        let args = Args::try_parse_from([
            "pgtrigger",
            "--database-url",
            "postgres://db/app",
            "listen",
            "--table",
            "users",
            "--reconnect-attempts",
            "5",
            "--heartbeat",
            "10",
        ])
        .unwrap();

        assert_eq!(args.database_url, "postgres://db/app");
        let Command::Listen(listen) = args.command else {
            panic!("expected listen");
        };
        assert_eq!(listen.target.schema, DEFAULT_SCHEMA);
        assert_eq!(listen.target.table, "users");

        let target = listen.target.to_target().unwrap();
        assert_eq!(target.channel(), "public_users_channel");

        let config = listen.into_config("postgres://db/app").unwrap();
        assert_eq!(config.database_url(), "postgres://db/app");
        assert_eq!(config.subscription.max_reconnect_attempts, 5);
        assert_eq!(
            config.subscription.heartbeat_interval,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_parse_install() {
        let args = Args::try_parse_from([
            "pgtrigger",
            "install",
            "--schema",
            "billing",
            "--table",
            "invoices",
        ])
        .unwrap();

        let Command::Install(target) = args.command else {
            panic!("expected install");
        };
        assert_eq!(target.to_target().unwrap().to_string(), "billing.invoices");
    }

    #[test]
    fn test_invalid_target() {
        let target = TargetArgs {
            schema: "public".to_string(),
            table: "users; drop".to_string(),
        };
        assert!(matches!(target.to_target(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let args = ListenArgs {
            target: TargetArgs {
                schema: DEFAULT_SCHEMA.to_string(),
                table: "users".to_string(),
            },
            heartbeat: 0,
            min_reconnect_ms: DEFAULT_MIN_RECONNECT_MS,
            max_reconnect_ms: DEFAULT_MAX_RECONNECT_MS,
            reconnect_attempts: 3,
            buffer: 16,
            stop_timeout: 1,
        };
        assert!(matches!(
            args.into_config("postgres://db/app"),
            Err(Error::Config(_))
        ));
    }
}
