//! pgtrigger - PostgreSQL row change listener.
//!
//! A [`Listener`] subscribes to the notify channel of one table, decodes
//! each notification into a [`ChangeMessage`](pgtrigger_proto::ChangeMessage)
//! and delivers it to every registered [`Consumer`]. [`TriggerAdmin`]
//! installs the trigger that produces those notifications.

pub mod admin;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod state;

pub use admin::TriggerAdmin;
pub use config::{Args, Command, ListenArgs, ListenerConfig, TargetArgs};
pub use dispatch::{
    Consumer, ConsumerError, ConsumerFailure, DispatchFault, DispatchReport, Dispatcher, JsonLines,
};
pub use error::Error;
pub use listener::Listener;
pub use metrics::ListenerMetrics;
pub use state::{ListenerState, ListenerStatus};

/// Re-export protocol types.
pub use pgtrigger_proto as proto;

/// Re-export subscription types.
pub use pgtrigger_client as client;
