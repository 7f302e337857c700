//! Fan-out of change messages to registered consumers.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};

use pgtrigger_proto::ChangeMessage;

use super::consumer::{Consumer, ConsumerError};

/// A consumer failed fatally while handling a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("consumer {index} failed fatally: {message}")]
pub struct DispatchFault {
    /// Registration index of the consumer.
    pub index: usize,
    /// Failure reported by the consumer.
    pub message: String,
}

/// A consumer that reported a per-message failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerFailure {
    /// Registration index of the consumer.
    pub index: usize,
    /// Failure reported by the consumer.
    pub message: String,
}

/// Outcome of delivering one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Number of consumers invoked.
    pub delivered: usize,
    /// Consumers that failed on this message.
    pub failures: Vec<ConsumerFailure>,
}

impl DispatchReport {
    /// Whether every consumer handled the message.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Delivers each message to every consumer, in registration order.
#[derive(Clone, Default)]
pub struct Dispatcher {
    consumers: Vec<Arc<dyn Consumer>>,
}

impl Dispatcher {
    /// Create a dispatcher for a fixed set of consumers.
    pub fn new(consumers: Vec<Arc<dyn Consumer>>) -> Self {
        Self { consumers }
    }

    /// Number of registered consumers.
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    /// Whether no consumers are registered.
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Deliver `message` to all consumers.
    ///
    /// A [`ConsumerError::Failed`] is logged and recorded in the report and
    /// delivery continues with the next consumer. A [`ConsumerError::Fatal`]
    /// stops delivery of this message and is returned as a [`DispatchFault`].
    pub fn dispatch(&self, message: &ChangeMessage) -> Result<DispatchReport, DispatchFault> {
        let mut report = DispatchReport::default();

        for (index, consumer) in self.consumers.iter().enumerate() {
            report.delivered += 1;
            match consumer.on_change(message) {
                Ok(()) => {}
                Err(ConsumerError::Failed(reason)) => {
                    warn!(
                        consumer = index,
                        schema = message.schema(),
                        table = message.table(),
                        action = %message.action(),
                        error = %reason,
                        "consumer failed to handle change"
                    );
                    report.failures.push(ConsumerFailure {
                        index,
                        message: reason,
                    });
                }
                Err(ConsumerError::Fatal(reason)) => {
                    error!(
                        consumer = index,
                        schema = message.schema(),
                        table = message.table(),
                        error = %reason,
                        "consumer failed fatally"
                    );
                    return Err(DispatchFault {
                        index,
                        message: reason,
                    });
                }
            }
        }

        Ok(report)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("consumers", &self.consumers.len())
            .finish()
    }
}
