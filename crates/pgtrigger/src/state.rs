//! Listener state machine states.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Externally observable state of a listener.
///
/// ```text
/// Idle -> Starting -> Steady -> Stopping -> Stopped
///                       |
///                       +-> Faulted
///                       +-> CallbackFaulted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ListenerState {
    /// Not started, no connection.
    Idle = 0,
    /// Subscription is being opened.
    Starting = 1,
    /// Connection open and dispatch loop running.
    Steady = 2,
    /// Stop requested, waiting for the loop to exit.
    Stopping = 3,
    /// Stopped on request.
    Stopped = 4,
    /// The connection was lost and could not be recovered.
    Faulted = 5,
    /// A consumer reported a fatal failure.
    CallbackFaulted = 6,
}

impl ListenerState {
    /// Stable numeric code for status reporting.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Lowercase name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerState::Idle => "idle",
            ListenerState::Starting => "starting",
            ListenerState::Steady => "steady",
            ListenerState::Stopping => "stopping",
            ListenerState::Stopped => "stopped",
            ListenerState::Faulted => "faulted",
            ListenerState::CallbackFaulted => "callback_faulted",
        }
    }

    /// Whether the listener can no longer run without a reset.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ListenerState::Stopped | ListenerState::Faulted | ListenerState::CallbackFaulted
        )
    }

    /// Whether a subscription is held in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ListenerState::Starting | ListenerState::Steady | ListenerState::Stopping
        )
    }

    /// Whether the listener ended because of a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, ListenerState::Faulted | ListenerState::CallbackFaulted)
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a listener.
///
/// May be stale as soon as it is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerStatus {
    /// Current state.
    pub state: ListenerState,
    /// Last recorded error, if any.
    pub last_error: Option<String>,
    /// Whether the subscription connection is alive.
    pub healthy: bool,
}

/// State code plus last error, shared between the listener and its loop.
///
/// Writes go through compare-and-set transitions on the watch channel, so
/// readers always see a whole state and can wait for changes.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: watch::Sender<ListenerState>,
    last_error: Mutex<Option<String>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ListenerState::Idle);
        Self {
            state,
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn get(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub(crate) fn set(&self, next: ListenerState) {
        self.state.send_replace(next);
    }

    /// Move from `from` to `to`. On mismatch, returns the actual state.
    pub(crate) fn transition(
        &self,
        from: ListenerState,
        to: ListenerState,
    ) -> Result<(), ListenerState> {
        let mut actual = from;
        let changed = self.state.send_if_modified(|current| {
            if *current == from {
                *current = to;
                true
            } else {
                actual = *current;
                false
            }
        });

        if changed {
            Ok(())
        } else {
            Err(actual)
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub(crate) fn set_error(&self, error: impl Into<String>) {
        *self.last_error.lock() = Some(error.into());
    }

    pub(crate) fn clear_error(&self) {
        *self.last_error.lock() = None;
    }
}
