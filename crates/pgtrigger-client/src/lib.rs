//! pgtrigger client - PostgreSQL notification subscriptions.
//!
//! This crate owns the listening connection for one subscription target:
//! connecting, liveness checks, reconnection with backoff and reporting a
//! connection that cannot be recovered.
//!
//! # Quick Start
//!
//! ```ignore
//! use pgtrigger_client::{SubscriptionConfig, SubscriptionManager};
//! use pgtrigger_proto::SubscriptionTarget;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SubscriptionManager::new(SubscriptionConfig::new("postgres://localhost/app"));
//!     let target = SubscriptionTarget::new("public", "users")?;
//!
//!     let (events_tx, _events_rx) = tokio::sync::mpsc::channel(2);
//!     let mut subscription = manager.open(&target, events_tx).await?;
//!
//!     while let Some(notification) = subscription.next().await {
//!         println!("{}", String::from_utf8_lossy(&notification.payload));
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod subscription;
pub mod testing;

pub use config::SubscriptionConfig;
pub use connection::{Connector, NotificationStream, PgConnector, RawNotification};
pub use error::Error;
pub use subscription::{
    EventSender, HealthProbe, LifecycleEvent, Subscription, SubscriptionManager,
};

/// Re-export protocol types.
pub use pgtrigger_proto as proto;
