//! Consumers of change messages.

use std::io::Write;

use parking_lot::Mutex;
use thiserror::Error;

use pgtrigger_proto::ChangeMessage;

/// Failure reported by a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsumerError {
    /// The consumer could not handle this message. Other consumers and
    /// later messages are unaffected.
    #[error("{0}")]
    Failed(String),

    /// The consumer cannot continue. The listener stops and reports
    /// `CallbackFaulted`.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ConsumerError {
    /// A per-message failure.
    pub fn failed(message: impl Into<String>) -> Self {
        ConsumerError::Failed(message.into())
    }

    /// A failure that ends the listener.
    pub fn fatal(message: impl Into<String>) -> Self {
        ConsumerError::Fatal(message.into())
    }

    /// Whether this failure ends the listener.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsumerError::Fatal(_))
    }
}

/// Receives every change message observed on a subscription.
///
/// Consumers run synchronously on the dispatch loop, one message at a time.
/// A slow consumer delays every message behind it.
pub trait Consumer: Send + Sync {
    /// Handle one change message.
    fn on_change(&self, message: &ChangeMessage) -> Result<(), ConsumerError>;
}

impl<F> Consumer for F
where
    F: Fn(&ChangeMessage) -> Result<(), ConsumerError> + Send + Sync,
{
    fn on_change(&self, message: &ChangeMessage) -> Result<(), ConsumerError> {
        self(message)
    }
}

/// Writes each message as one line of JSON.
///
/// A message that cannot be encoded is a per-message failure. A write or
/// flush error is fatal: once the output is gone, for example a closed
/// stdout pipe, every later change would be lost too, so the listener ends
/// in `CallbackFaulted` and `pgtrigger listen` exits non-zero.
pub struct JsonLines<W> {
    writer: Mutex<W>,
}

impl<W: Write> JsonLines<W> {
    /// Create a consumer writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Return the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> Consumer for JsonLines<W> {
    fn on_change(&self, message: &ChangeMessage) -> Result<(), ConsumerError> {
        let line = serde_json::to_string(message)
            .map_err(|e| ConsumerError::failed(format!("failed to encode message: {e}")))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .map_err(|e| ConsumerError::fatal(format!("output closed: {e}")))
    }
}
