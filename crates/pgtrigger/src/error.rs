//! Listener error types.

use std::time::Duration;

use thiserror::Error;

use crate::state::ListenerState;

/// Listener errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A subscription is already active on this listener.
    #[error("already listening on {0}")]
    AlreadyListening(String),

    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ListenerState,
    },

    /// The dispatch loop did not confirm exit in time.
    #[error("listener did not stop within {0:?}")]
    StopTimeout(Duration),

    /// The listener ended in a failure state.
    #[error("listener ended {state}: {reason}")]
    Terminated {
        state: ListenerState,
        reason: String,
    },

    /// Subscription error.
    #[error("subscription error: {0}")]
    Client(#[from] pgtrigger_client::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] pgtrigger_proto::Error),

    /// Database error from an administrative operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
