//! Connection management for pgtrigger subscriptions.
//!
//! [`Connector`] opens one listening connection for a target and
//! [`NotificationStream`] reads from it. [`PgConnector`] is the PostgreSQL
//! implementation built on `sqlx::postgres::PgListener`.

use async_trait::async_trait;
use sqlx::postgres::PgListener;

use pgtrigger_proto::{SubscriptionTarget, TRIGGER_EXISTS_SQL};

use crate::error::Error;

/// A notification as delivered by the server, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// Channel the notification arrived on.
    pub channel: String,
    /// Notification payload bytes.
    pub payload: Vec<u8>,
    /// Backend process that sent the notification.
    pub process_id: u32,
}

impl RawNotification {
    /// Create a notification with no originating process.
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            process_id: 0,
        }
    }
}

/// Opens listening connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and start listening on the target's channel.
    ///
    /// Fails if the server is unreachable or the target's trigger is not
    /// installed.
    async fn connect(
        &self,
        target: &SubscriptionTarget,
    ) -> Result<Box<dyn NotificationStream>, Error>;
}

/// A live listening connection. Dropping it releases the connection.
#[async_trait]
pub trait NotificationStream: Send {
    /// Wait for the next notification.
    ///
    /// Returns `Ok(None)` once the connection has been lost.
    async fn recv(&mut self) -> Result<Option<RawNotification>, Error>;

    /// Round-trip to the server to check the connection.
    async fn ping(&mut self) -> Result<(), Error>;
}

/// PostgreSQL connector.
#[derive(Debug, Clone)]
pub struct PgConnector {
    database_url: String,
}

impl PgConnector {
    /// Create a connector for the given connection string.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(
        &self,
        target: &SubscriptionTarget,
    ) -> Result<Box<dyn NotificationStream>, Error> {
        let mut listener = PgListener::connect(&self.database_url)
            .await
            .map_err(|e| Error::Connection(format!("failed to connect: {}", e)))?;

        // LISTEN accepts any name, so check the publisher exists first.
        let installed: bool = sqlx::query_scalar(TRIGGER_EXISTS_SQL)
            .bind(target.trigger_name())
            .bind(target.schema())
            .bind(target.table())
            .fetch_one(&mut listener)
            .await?;

        if !installed {
            return Err(Error::ChannelNotFound {
                channel: target.channel(),
                trigger: target.trigger_name(),
            });
        }

        let channel = target.channel();
        listener
            .listen(&channel)
            .await
            .map_err(|e| Error::Connection(format!("failed to listen on {}: {}", channel, e)))?;

        tracing::debug!(subscription = %target, channel = %channel, "listening");

        Ok(Box::new(PgStream { listener }))
    }
}

/// PostgreSQL notification stream.
struct PgStream {
    listener: PgListener,
}

#[async_trait]
impl NotificationStream for PgStream {
    async fn recv(&mut self) -> Result<Option<RawNotification>, Error> {
        // try_recv yields None on a lost connection instead of reconnecting.
        let notification = self.listener.try_recv().await?;

        Ok(notification.map(|n| RawNotification {
            channel: n.channel().to_string(),
            payload: n.payload().as_bytes().to_vec(),
            process_id: n.process_id(),
        }))
    }

    async fn ping(&mut self) -> Result<(), Error> {
        sqlx::query("SELECT 1").execute(&mut self.listener).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PgStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStream").finish_non_exhaustive()
    }
}
