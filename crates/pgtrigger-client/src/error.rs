//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failed or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// The target's trigger is not installed, so its channel never publishes.
    #[error("channel {channel} not found: trigger {trigger} is not installed")]
    ChannelNotFound { channel: String, trigger: String },

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] pgtrigger_proto::Error),

    /// Database driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
