//! Subscription lifecycle.
//!
//! [`SubscriptionManager::open`] connects to a target's channel and hands
//! the connection to a background worker. The worker forwards notifications,
//! pings the server on an interval and reconnects with exponential backoff
//! when the connection drops. When reconnection gives up it sends a single
//! [`LifecycleEvent::Disconnected`] to the owner and exits.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use pgtrigger_proto::SubscriptionTarget;

use crate::config::SubscriptionConfig;
use crate::connection::{Connector, NotificationStream, PgConnector, RawNotification};
use crate::error::Error;

/// Signal delivered to the owner of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The connection was lost and could not be re-established.
    Disconnected {
        /// Why the connection is considered lost.
        reason: String,
    },
    /// The owner asked for the subscription to stop.
    StopRequested,
}

/// Sender half of the owner's lifecycle event queue.
pub type EventSender = mpsc::Sender<LifecycleEvent>;

const HEALTH_DOWN: u8 = 0;
const HEALTH_UP: u8 = 1;
const HEALTH_CLOSED: u8 = 2;

/// Shared, non-blocking view of a subscription's liveness.
///
/// Once closed, a probe never reports healthy again.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    state: Arc<AtomicU8>,
}

impl HealthProbe {
    /// A probe for a connection that has never connected.
    pub fn disconnected() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(HEALTH_DOWN)),
        }
    }

    fn connected() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(HEALTH_UP)),
        }
    }

    /// Whether the connection is currently believed to be alive.
    pub fn is_healthy(&self) -> bool {
        self.state.load(Ordering::Acquire) == HEALTH_UP
    }

    /// Whether the subscription has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == HEALTH_CLOSED
    }

    fn mark_up(&self) {
        let _ = self.state.compare_exchange(
            HEALTH_DOWN,
            HEALTH_UP,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn mark_down(&self) {
        let _ = self.state.compare_exchange(
            HEALTH_UP,
            HEALTH_DOWN,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn mark_closed(&self) {
        self.state.store(HEALTH_CLOSED, Ordering::Release);
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// Opens subscriptions and owns the reconnection policy.
pub struct SubscriptionManager {
    config: SubscriptionConfig,
    connector: Arc<dyn Connector>,
}

impl SubscriptionManager {
    /// Create a manager that connects to PostgreSQL.
    pub fn new(config: SubscriptionConfig) -> Self {
        let connector = Arc::new(PgConnector::new(config.database_url.clone()));
        Self { config, connector }
    }

    /// Create a manager with a custom connector.
    pub fn with_connector(config: SubscriptionConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Open a subscription to the target's channel.
    ///
    /// The initial connection is not retried: any failure is returned here.
    /// After that, an unrecoverable loss is reported once through `events`.
    pub async fn open(
        &self,
        target: &SubscriptionTarget,
        events: EventSender,
    ) -> Result<Subscription, Error> {
        info!(subscription = %target, channel = %target.channel(), "opening subscription");

        let stream = self.connector.connect(target).await?;

        let health = HealthProbe::connected();
        let (notifications_tx, notifications_rx) = mpsc::channel(self.config.notification_buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = ConnectionWorker {
            config: self.config.clone(),
            connector: self.connector.clone(),
            target: target.clone(),
            stream,
            notifications: notifications_tx,
            events: Some(events),
            health: health.clone(),
            shutdown: shutdown_rx,
        };
        let handle = tokio::spawn(worker.run());

        Ok(Subscription {
            target: target.clone(),
            notifications: notifications_rx,
            health,
            shutdown: shutdown_tx,
            worker: Some(handle),
        })
    }

    /// Non-blocking liveness check.
    pub fn healthy(&self, subscription: &Subscription) -> bool {
        subscription.healthy()
    }

    /// Release a subscription. Safe to call more than once.
    pub fn close(&self, subscription: &mut Subscription) {
        subscription.close();
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// An open subscription.
///
/// Notifications arrive in the order the server sent them. Dropping the
/// subscription closes it.
#[derive(Debug)]
pub struct Subscription {
    target: SubscriptionTarget,
    notifications: mpsc::Receiver<RawNotification>,
    health: HealthProbe,
    shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl Subscription {
    /// The subscribed target.
    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    /// Wait for the next notification.
    ///
    /// Returns `None` once the subscription is closed or its worker has exited.
    pub async fn next(&mut self) -> Option<RawNotification> {
        self.notifications.recv().await
    }

    /// Whether the connection is currently alive.
    pub fn healthy(&self) -> bool {
        self.health.is_healthy()
    }

    /// A probe that can check liveness without access to the subscription.
    pub fn health_probe(&self) -> HealthProbe {
        self.health.clone()
    }

    /// Whether [`Subscription::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.worker.is_none()
    }

    /// Close the subscription. Idempotent.
    ///
    /// No lifecycle event is sent for a closed subscription.
    pub fn close(&mut self) {
        self.health.mark_closed();
        let _ = self.shutdown.send(true);
        self.notifications.close();
        if self.worker.take().is_some() {
            debug!(subscription = %self.target, "subscription closed");
        }
    }

    /// Close the subscription and wait for its connection to be released.
    pub async fn shutdown(&mut self) {
        let worker = self.worker.take();
        self.close();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(subscription = %self.target, error = %e, "connection worker failed");
            }
            debug!(subscription = %self.target, "connection released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Outcome of a wait inside the worker loop.
enum Step {
    Notification(RawNotification),
    Heartbeat,
    Lost(String),
    Shutdown,
}

/// Outcome of a reconnection sequence.
enum Reconnect {
    Connected(Box<dyn NotificationStream>),
    Exhausted(String),
    Shutdown,
}

/// Background task that owns the live connection.
struct ConnectionWorker {
    config: SubscriptionConfig,
    connector: Arc<dyn Connector>,
    target: SubscriptionTarget,
    stream: Box<dyn NotificationStream>,
    notifications: mpsc::Sender<RawNotification>,
    events: Option<EventSender>,
    health: HealthProbe,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionWorker {
    async fn run(mut self) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        heartbeat.tick().await;

        loop {
            if self.is_shutdown() {
                break;
            }

            let step = tokio::select! {
                _ = self.shutdown.changed() => Step::Shutdown,
                received = self.stream.recv() => match received {
                    Ok(Some(notification)) => Step::Notification(notification),
                    Ok(None) => Step::Lost("connection lost".to_string()),
                    Err(e) => Step::Lost(format!("receive failed: {}", e)),
                },
                _ = heartbeat.tick() => Step::Heartbeat,
            };

            let reason = match step {
                Step::Shutdown => break,
                Step::Notification(notification) => {
                    if !self.forward(notification).await {
                        break;
                    }
                    continue;
                }
                Step::Heartbeat => match self.stream.ping().await {
                    Ok(()) => continue,
                    Err(e) => format!("ping failed: {}", e),
                },
                Step::Lost(reason) => reason,
            };

            self.health.mark_down();
            warn!(subscription = %self.target, reason = %reason, "subscription connection lost");

            match self.reconnect().await {
                Reconnect::Connected(stream) => {
                    self.stream = stream;
                    self.health.mark_up();
                    heartbeat.reset();
                }
                Reconnect::Shutdown => break,
                Reconnect::Exhausted(last_error) => {
                    self.emit_disconnected(format!("{}; {}", reason, last_error))
                        .await;
                    break;
                }
            }
        }

        self.health.mark_down();
        debug!(subscription = %self.target, "connection worker exited");
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Hand a notification to the reader. Returns false if the reader is gone.
    async fn forward(&mut self, notification: RawNotification) -> bool {
        tokio::select! {
            sent = self.notifications.send(notification) => sent.is_ok(),
            _ = self.shutdown.changed() => false,
        }
    }

    async fn reconnect(&mut self) -> Reconnect {
        let max_attempts = self.config.max_reconnect_attempts;
        if max_attempts == 0 {
            return Reconnect::Exhausted("reconnection disabled".to_string());
        }

        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            let delay = with_jitter(self.config.reconnect_delay(attempt));
            debug!(
                subscription = %self.target,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "waiting to reconnect"
            );

            let connector = &self.connector;
            let target = &self.target;
            let connected = tokio::select! {
                _ = self.shutdown.changed() => return Reconnect::Shutdown,
                connected = async {
                    tokio::time::sleep(delay).await;
                    connector.connect(target).await
                } => connected,
            };

            match connected {
                Ok(stream) => {
                    if self.is_shutdown() {
                        return Reconnect::Shutdown;
                    }
                    info!(subscription = %self.target, attempt, "subscription reconnected");
                    return Reconnect::Connected(stream);
                }
                Err(e) => {
                    warn!(
                        subscription = %self.target,
                        attempt,
                        max_attempts,
                        error = %e,
                        "reconnect attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Reconnect::Exhausted(format!(
            "{} reconnect attempts failed, last error: {}",
            max_attempts, last_error
        ))
    }

    /// Report an unrecoverable loss. Sends at most once per subscription.
    async fn emit_disconnected(&mut self, reason: String) {
        if self.is_shutdown() {
            return;
        }
        if let Some(events) = self.events.take() {
            warn!(subscription = %self.target, reason = %reason, "subscription disconnected");
            let _ = events
                .send(LifecycleEvent::Disconnected { reason })
                .await;
        }
    }
}

/// Spread reconnection attempts by up to a quarter of the delay.
fn with_jitter(delay: Duration) -> Duration {
    let max_jitter = delay.as_millis() as u64 / 4;
    if max_jitter == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=max_jitter);
    delay + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;

    fn target() -> SubscriptionTarget {
        SubscriptionTarget::new("public", "alarm_item").unwrap()
    }

    fn fast_config() -> SubscriptionConfig {
        SubscriptionConfig::default()
            .with_heartbeat_interval(Duration::from_secs(3600))
            .with_reconnect_interval(Duration::from_millis(1), Duration::from_millis(5))
            .with_max_reconnect_attempts(2)
    }

    fn manager(connector: &MockConnector) -> SubscriptionManager {
        SubscriptionManager::with_connector(fast_config(), Arc::new(connector.clone()))
    }

    #[test]
    fn test_health_probe_closed_is_final() {
        let probe = HealthProbe::connected();
        assert!(probe.is_healthy());

        probe.mark_down();
        assert!(!probe.is_healthy());
        probe.mark_up();
        assert!(probe.is_healthy());

        probe.mark_closed();
        probe.mark_up();
        assert!(!probe.is_healthy());
        assert!(probe.is_closed());
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_millis(400);
        for _ in 0..50 {
            let jittered = with_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= Duration::from_millis(500));
        }
        assert_eq!(with_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_open_and_receive() {
        let connector = MockConnector::new();
        let (events_tx, _events_rx) = mpsc::channel(2);

        let mut sub = manager(&connector).open(&target(), events_tx).await.unwrap();
        assert!(sub.healthy());
        assert_eq!(connector.connect_count(), 1);

        connector.notify("public_alarm_item_channel", "one");
        connector.notify("public_alarm_item_channel", "two");

        assert_eq!(sub.next().await.unwrap().payload, b"one".to_vec());
        assert_eq!(sub.next().await.unwrap().payload, b"two".to_vec());
    }

    #[tokio::test]
    async fn test_open_fails_when_unavailable() {
        let connector = MockConnector::new();
        connector.set_available(false);
        let (events_tx, _events_rx) = mpsc::channel(2);

        let err = manager(&connector).open(&target(), events_tx).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_open_fails_without_trigger() {
        let connector = MockConnector::new().without_trigger();
        let (events_tx, _events_rx) = mpsc::channel(2);

        let err = manager(&connector).open(&target(), events_tx).await.unwrap_err();
        assert!(matches!(err, Error::ChannelNotFound { .. }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connector = MockConnector::new();
        let (events_tx, mut events_rx) = mpsc::channel(2);
        let manager = manager(&connector);

        let mut sub = manager.open(&target(), events_tx).await.unwrap();
        let probe = sub.health_probe();

        manager.close(&mut sub);
        manager.close(&mut sub);
        sub.shutdown().await;

        assert!(sub.is_closed());
        assert!(!manager.healthy(&sub));
        assert!(!probe.is_healthy());
        assert!(sub.next().await.is_none());
        // Closing never reports a disconnect.
        assert!(events_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reconnects_after_drop() {
        let connector = MockConnector::new();
        let (events_tx, mut events_rx) = mpsc::channel(2);

        let mut sub = manager(&connector).open(&target(), events_tx).await.unwrap();
        connector.drop_connection();

        assert!(connector.wait_for_connects(2).await);
        connector.notify("public_alarm_item_channel", "after");

        assert_eq!(sub.next().await.unwrap().payload, b"after".to_vec());
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unrecoverable_loss_emits_once() {
        let connector = MockConnector::new();
        let (events_tx, mut events_rx) = mpsc::channel(2);

        let mut sub = manager(&connector).open(&target(), events_tx).await.unwrap();
        let probe = sub.health_probe();

        connector.set_available(false);
        connector.drop_connection();

        match events_rx.recv().await {
            Some(LifecycleEvent::Disconnected { reason }) => {
                assert!(reason.contains("connection lost"));
                assert!(reason.contains("2 reconnect attempts failed"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        // The worker has exited and dropped its sender.
        assert!(events_rx.recv().await.is_none());
        assert!(!probe.is_healthy());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_ping_failure_is_a_loss() {
        let connector = MockConnector::new();
        let config = fast_config()
            .with_heartbeat_interval(Duration::from_millis(10))
            .with_max_reconnect_attempts(0);
        let manager = SubscriptionManager::with_connector(config, Arc::new(connector.clone()));
        let (events_tx, mut events_rx) = mpsc::channel(2);

        let _sub = manager.open(&target(), events_tx).await.unwrap();
        connector.fail_pings(true);

        match events_rx.recv().await {
            Some(LifecycleEvent::Disconnected { reason }) => {
                assert!(reason.contains("ping failed"));
                assert!(reason.contains("reconnection disabled"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(events_rx.recv().await.is_none());
    }
}
