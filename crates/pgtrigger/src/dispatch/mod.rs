//! Delivery of decoded change messages to consumers.

mod consumer;
mod dispatcher;

pub use consumer::{Consumer, ConsumerError, JsonLines};
pub use dispatcher::{ConsumerFailure, DispatchFault, DispatchReport, Dispatcher};
