//! Testing utilities for code built on subscriptions.
//!
//! [`MockConnector`] stands in for PostgreSQL: tests push notifications,
//! drop the live connection, make the server unreachable or fail pings.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use pgtrigger_proto::SubscriptionTarget;

use crate::connection::{Connector, NotificationStream, RawNotification};
use crate::error::Error;

enum Frame {
    Notification(RawNotification),
    Drop,
}

struct MockState {
    available: AtomicBool,
    trigger_installed: AtomicBool,
    fail_pings: AtomicBool,
    connect_attempts: AtomicUsize,
    connects: AtomicUsize,
    current: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

/// In-memory connector.
///
/// Clones share state, so a test can keep one clone while the code under
/// test owns another.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    /// A reachable server with the trigger installed.
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                available: AtomicBool::new(true),
                trigger_installed: AtomicBool::new(true),
                fail_pings: AtomicBool::new(false),
                connect_attempts: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                current: Mutex::new(None),
            }),
        }
    }

    /// A server where the target's trigger has not been installed.
    pub fn without_trigger(self) -> Self {
        self.state.trigger_installed.store(false, Ordering::SeqCst);
        self
    }

    /// Make new connection attempts succeed or fail.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Make pings on live connections fail.
    pub fn fail_pings(&self, fail: bool) {
        self.state.fail_pings.store(fail, Ordering::SeqCst);
    }

    /// Deliver a notification on the live connection.
    ///
    /// Returns false if there is no live connection.
    pub fn notify(&self, channel: &str, payload: impl Into<Vec<u8>>) -> bool {
        let current = self.state.current.lock();
        match current.as_ref() {
            Some(tx) => tx
                .send(Frame::Notification(RawNotification::new(channel, payload)))
                .is_ok(),
            None => false,
        }
    }

    /// Drop the live connection as if the server went away.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.state.current.lock().take() {
            let _ = tx.send(Frame::Drop);
        }
    }

    /// Whether a connection is open and still held by a reader.
    pub fn is_connected(&self) -> bool {
        self.state
            .current
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Number of successful connections.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of connection attempts, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Wait up to five seconds for `count` successful connections.
    pub async fn wait_for_connects(&self, count: usize) -> bool {
        self.wait_until(|c| c.connect_count() >= count).await
    }

    /// Wait up to five seconds for the live connection to be released.
    pub async fn wait_for_release(&self) -> bool {
        self.wait_until(|c| !c.is_connected()).await
    }

    async fn wait_until(&self, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        condition(self)
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("connects", &self.connect_count())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        target: &SubscriptionTarget,
    ) -> Result<Box<dyn NotificationStream>, Error> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.state.available.load(Ordering::SeqCst) {
            return Err(Error::Connection("server unavailable".to_string()));
        }
        if !self.state.trigger_installed.load(Ordering::SeqCst) {
            return Err(Error::ChannelNotFound {
                channel: target.channel(),
                trigger: target.trigger_name(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.current.lock() = Some(tx);
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockStream {
            rx,
            state: self.state.clone(),
            lost: false,
        }))
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<Frame>,
    state: Arc<MockState>,
    lost: bool,
}

#[async_trait]
impl NotificationStream for MockStream {
    async fn recv(&mut self) -> Result<Option<RawNotification>, Error> {
        if self.lost {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Frame::Notification(notification)) => Ok(Some(notification)),
            Some(Frame::Drop) | None => {
                self.lost = true;
                Ok(None)
            }
        }
    }

    async fn ping(&mut self) -> Result<(), Error> {
        if self.lost || self.state.fail_pings.load(Ordering::SeqCst) {
            return Err(Error::Connection("ping failed".to_string()));
        }
        Ok(())
    }
}
