//! The dispatch loop.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use pgtrigger_client::{LifecycleEvent, RawNotification, Subscription};
use pgtrigger_proto::decode;

use crate::dispatch::{DispatchFault, Dispatcher};
use crate::metrics::ListenerMetrics;
use crate::state::{ListenerState, StateCell};

/// Why the loop exited.
#[derive(Debug)]
enum Exit {
    Stopped,
    Disconnected(String),
    Faulted(String),
}

/// Recorded when the loop is dropped without publishing a final state.
pub(crate) const UNEXPECTED_EXIT: &str = "dispatch loop exited unexpectedly";

/// Reads notifications from one subscription and hands them to the
/// dispatcher until a lifecycle event arrives.
pub(crate) struct DispatchLoop {
    subscription: Subscription,
    control: mpsc::Receiver<LifecycleEvent>,
    dispatcher: Dispatcher,
    state: Arc<StateCell>,
    metrics: Arc<ListenerMetrics>,
    published: bool,
}

impl DispatchLoop {
    pub(crate) fn new(
        subscription: Subscription,
        control: mpsc::Receiver<LifecycleEvent>,
        dispatcher: Dispatcher,
        state: Arc<StateCell>,
        metrics: Arc<ListenerMetrics>,
    ) -> Self {
        Self {
            subscription,
            control,
            dispatcher,
            state,
            metrics,
            published: false,
        }
    }

    /// Run until stopped or faulted, then publish the final state and
    /// signal `done`.
    pub(crate) async fn run(mut self, done: oneshot::Sender<()>) {
        let target = self.subscription.target().clone();
        info!(subscription = %target, consumers = self.dispatcher.len(), "dispatch loop started");

        let exit = loop {
            tokio::select! {
                biased;

                event = self.control.recv() => match event {
                    Some(LifecycleEvent::StopRequested) => break Exit::Stopped,
                    Some(LifecycleEvent::Disconnected { reason }) => {
                        break Exit::Disconnected(reason)
                    }
                    None => break Exit::Faulted("control channel closed".to_string()),
                },

                notification = self.subscription.next() => match notification {
                    Some(raw) => {
                        if let Err(fault) = self.handle(raw) {
                            break Exit::Faulted(fault.to_string());
                        }
                    }
                    None => break Exit::Disconnected("notification stream closed".to_string()),
                },
            }
        };

        self.subscription.shutdown().await;

        let final_state = match exit {
            Exit::Stopped => {
                info!(subscription = %target, "dispatch loop stopped");
                ListenerState::Stopped
            }
            Exit::Disconnected(reason) => {
                error!(subscription = %target, reason = %reason, "listener disconnected");
                self.state.set_error(format!("listener disconnected: {reason}"));
                ListenerState::Faulted
            }
            Exit::Faulted(reason) => {
                error!(subscription = %target, reason = %reason, "listener stopped by consumer failure");
                self.state.set_error(reason);
                ListenerState::CallbackFaulted
            }
        };

        self.state.set(final_state);
        self.published = true;
        let _ = done.send(());
    }

    fn handle(&self, raw: RawNotification) -> Result<(), DispatchFault> {
        self.metrics.record_notification();

        let message = match decode(&raw.payload) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_decode_error();
                warn!(
                    channel = %raw.channel,
                    error = %e,
                    "skipping notification that could not be decoded"
                );
                return Ok(());
            }
        };

        trace!(
            channel = %raw.channel,
            action = %message.action(),
            "dispatching change"
        );

        let report = self.dispatcher.dispatch(&message)?;
        if !report.is_clean() {
            debug!(failures = report.failures.len(), "change delivered with consumer failures");
        }
        self.metrics.record_dispatch(report.failures.len());
        Ok(())
    }
}

impl Drop for DispatchLoop {
    /// A consumer panic unwinds through [`DispatchLoop::run`]. The connection
    /// is closed before the fault is published so a terminal listener never
    /// reports healthy.
    fn drop(&mut self) {
        if self.published {
            return;
        }
        self.subscription.close();
        error!(subscription = %self.subscription.target(), "dispatch loop exited unexpectedly");
        self.state.set_error(UNEXPECTED_EXIT);
        self.state.set(ListenerState::CallbackFaulted);
    }
}
