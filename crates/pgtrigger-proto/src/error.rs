//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
///
/// Every variant except [`Error::InvalidIdentifier`] is a decode failure for a
/// single notification payload.
#[derive(Debug, Error)]
pub enum Error {
    /// The payload is not a well-formed notification object.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The `action` field is not one of `INSERT`, `UPDATE` or `DELETE`.
    #[error("unknown action: {0:?}")]
    UnknownAction(String),

    /// A row image is present but is not valid JSON.
    #[error("invalid {field}: {message}")]
    InvalidImage { field: &'static str, message: String },

    /// A row image is present for an action that never carries it.
    #[error("unexpected {field} for {action} notification")]
    UnexpectedImage { field: &'static str, action: &'static str },

    /// A schema or table name cannot be used to derive channel and trigger names.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl Error {
    /// Check whether this error came from decoding a notification payload.
    pub fn is_decode_error(&self) -> bool {
        !matches!(self, Error::InvalidIdentifier(_))
    }
}

/// Alias used by the codec for decode failures.
pub type DecodeError = Error;
