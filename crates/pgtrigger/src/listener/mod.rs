//! Listener state machine.
//!
//! A [`Listener`] owns one subscription target. [`Listener::start`] opens the
//! subscription and spawns a dispatch loop that decodes every notification
//! and hands it to the registered consumers. The loop is the only place that
//! moves the listener into a terminal state:
//!
//! - `Stopped` after [`Listener::stop`]
//! - `Faulted` when the subscription reports an unrecoverable disconnect
//! - `CallbackFaulted` when a consumer fails fatally
//!
//! A terminal listener must be [`reset`](Listener::reset) before it can be
//! started again. Dropping a running listener asks its dispatch loop to stop
//! without waiting for it.

mod worker;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pgtrigger_client::{
    Connector, EventSender, HealthProbe, LifecycleEvent, SubscriptionManager,
};
use pgtrigger_proto::SubscriptionTarget;

use crate::config::ListenerConfig;
use crate::dispatch::{Consumer, Dispatcher};
use crate::error::Error;
use crate::metrics::ListenerMetrics;
use crate::state::{ListenerState, ListenerStatus, StateCell};

use worker::{DispatchLoop, UNEXPECTED_EXIT};

/// Capacity of the control queue. Holds one stop request and one
/// disconnect report.
const CONTROL_CAPACITY: usize = 2;

/// Handles to a running dispatch loop.
struct Running {
    control: EventSender,
    done: oneshot::Receiver<()>,
    task: JoinHandle<()>,
}

/// Listens for row changes on one table and fans them out to consumers.
pub struct Listener {
    target: SubscriptionTarget,
    config: ListenerConfig,
    manager: SubscriptionManager,
    state: Arc<StateCell>,
    metrics: Arc<ListenerMetrics>,
    health: Mutex<HealthProbe>,
    running: Mutex<Option<Running>>,
}

impl Listener {
    /// Create a listener that connects to PostgreSQL.
    pub fn new(target: SubscriptionTarget, config: ListenerConfig) -> Self {
        let manager = SubscriptionManager::new(config.subscription.clone());
        Self::with_manager(target, config, manager)
    }

    /// Create a listener with a custom connector.
    pub fn with_connector(
        target: SubscriptionTarget,
        config: ListenerConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let manager = SubscriptionManager::with_connector(config.subscription.clone(), connector);
        Self::with_manager(target, config, manager)
    }

    fn with_manager(
        target: SubscriptionTarget,
        config: ListenerConfig,
        manager: SubscriptionManager,
    ) -> Self {
        Self {
            target,
            config,
            manager,
            state: Arc::new(StateCell::new()),
            metrics: Arc::new(ListenerMetrics::new()),
            health: Mutex::new(HealthProbe::disconnected()),
            running: Mutex::new(None),
        }
    }

    /// The subscribed target.
    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    /// Get the configuration.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Open the subscription and start dispatching to `consumers`.
    ///
    /// Only valid from `Idle`. Consumers are invoked in the given order for
    /// every message. If the subscription cannot be opened the listener
    /// returns to `Idle` with the failure recorded as its last error.
    pub async fn start(&self, consumers: Vec<Arc<dyn Consumer>>) -> Result<(), Error> {
        if let Err(current) = self
            .state
            .transition(ListenerState::Idle, ListenerState::Starting)
        {
            return Err(if current.is_terminal() {
                Error::InvalidState {
                    operation: "start",
                    state: current,
                }
            } else {
                Error::AlreadyListening(self.target.to_string())
            });
        }
        self.state.clear_error();

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let subscription = match self.manager.open(&self.target, control_tx.clone()).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(subscription = %self.target, error = %e, "failed to start listener");
                self.state.set_error(e.to_string());
                self.state.set(ListenerState::Idle);
                return Err(e.into());
            }
        };

        *self.health.lock() = subscription.health_probe();

        let (done_tx, done_rx) = oneshot::channel();
        let dispatch = DispatchLoop::new(
            subscription,
            control_rx,
            Dispatcher::new(consumers),
            self.state.clone(),
            self.metrics.clone(),
        );

        // Held until the handles are stored so a concurrent stop finds them.
        let mut running = self.running.lock();
        self.state.set(ListenerState::Steady);
        let task = tokio::spawn(dispatch.run(done_tx));
        *running = Some(Running {
            control: control_tx,
            done: done_rx,
            task,
        });
        drop(running);

        info!(subscription = %self.target, channel = %self.target.channel(), "listener started");
        Ok(())
    }

    /// Stop the listener and wait for the dispatch loop to exit.
    ///
    /// Only effective from `Steady`; in any other state this does nothing.
    /// If the loop does not exit within the configured stop timeout,
    /// [`Error::StopTimeout`] is returned and the listener stays `Stopping`
    /// until the loop finishes.
    pub async fn stop(&self) -> Result<(), Error> {
        if let Err(current) = self
            .state
            .transition(ListenerState::Steady, ListenerState::Stopping)
        {
            debug!(subscription = %self.target, state = %current, "stop ignored");
            return Ok(());
        }

        let running = self.running.lock().take();
        let Some(running) = running else {
            return Ok(());
        };

        info!(subscription = %self.target, "stopping listener");
        let _ = running.control.send(LifecycleEvent::StopRequested).await;

        match tokio::time::timeout(self.config.stop_timeout, running.done).await {
            Ok(Ok(())) => {
                info!(subscription = %self.target, state = %self.state(), "listener stopped");
                Ok(())
            }
            Ok(Err(_)) => {
                error!(subscription = %self.target, "dispatch loop exited without confirming");
                if !self.state().is_terminal() {
                    self.state.set_error(UNEXPECTED_EXIT);
                    self.state.set(ListenerState::CallbackFaulted);
                }
                Ok(())
            }
            Err(_) => {
                warn!(
                    subscription = %self.target,
                    timeout = ?self.config.stop_timeout,
                    "dispatch loop did not exit in time"
                );
                Err(Error::StopTimeout(self.config.stop_timeout))
            }
        }
    }

    /// Return a terminal listener to `Idle` so it can be started again.
    pub fn reset(&self) -> Result<(), Error> {
        let current = self.state();
        if !current.is_terminal() {
            return Err(Error::InvalidState {
                operation: "reset",
                state: current,
            });
        }
        self.state
            .transition(current, ListenerState::Idle)
            .map_err(|state| Error::InvalidState {
                operation: "reset",
                state,
            })?;

        self.running.lock().take();
        *self.health.lock() = HealthProbe::disconnected();
        self.state.clear_error();
        debug!(subscription = %self.target, "listener reset");
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> ListenerState {
        self.state.get()
    }

    /// Last recorded error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.state.last_error()
    }

    /// Whether the subscription connection is alive. Never blocks.
    pub fn healthy(&self) -> bool {
        self.health.lock().is_healthy()
    }

    /// State, last error and health in one view.
    pub fn status(&self) -> ListenerStatus {
        ListenerStatus {
            state: self.state(),
            last_error: self.last_error(),
            healthy: self.healthy(),
        }
    }

    /// Dispatch counters.
    pub fn metrics(&self) -> &ListenerMetrics {
        &self.metrics
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Wait until the listener reaches a terminal state and return it.
    pub async fn wait(&self) -> ListenerState {
        let mut states = self.subscribe_state();
        let reached = states
            .wait_for(|state| state.is_terminal())
            .await
            .map(|state| *state);
        reached.unwrap_or_else(|_| self.state())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let Some(running) = self.running.get_mut().take() else {
            return;
        };
        if running.task.is_finished() {
            return;
        }
        debug!(subscription = %self.target, "listener dropped while running");
        if running.control.try_send(LifecycleEvent::StopRequested).is_err() {
            running.task.abort();
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("target", &self.target)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ConsumerError;
    use pgtrigger_client::testing::MockConnector;
    use pgtrigger_proto::ChangeMessage;
    use std::time::Duration;

    fn listener(connector: &MockConnector) -> Listener {
        let target = SubscriptionTarget::new("public", "alarm_item").unwrap();
        let config = ListenerConfig::default().with_stop_timeout(Duration::from_secs(5));
        Listener::with_connector(target, config, Arc::new(connector.clone()))
    }

    fn noop() -> Arc<dyn Consumer> {
        Arc::new(|_: &ChangeMessage| -> Result<(), ConsumerError> { Ok(()) })
    }

    #[tokio::test]
    async fn test_new_listener_is_idle() {
        let connector = MockConnector::new();
        let listener = listener(&connector);

        let status = listener.status();
        assert_eq!(status.state, ListenerState::Idle);
        assert!(status.last_error.is_none());
        assert!(!status.healthy);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let connector = MockConnector::new();
        let listener = listener(&connector);

        listener.start(vec![noop()]).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Steady);
        assert!(listener.healthy());

        listener.stop().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert!(!listener.healthy());
        assert!(connector.wait_for_release().await);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let connector = MockConnector::new();
        let listener = listener(&connector);

        listener.stop().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Idle);
    }

    #[tokio::test]
    async fn test_reset_requires_terminal_state() {
        let connector = MockConnector::new();
        let listener = listener(&connector);

        assert!(matches!(
            listener.reset(),
            Err(Error::InvalidState {
                operation: "reset",
                state: ListenerState::Idle
            })
        ));
    }
}
