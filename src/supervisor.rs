//! Connection lifecycle and reconnect policy
//!
//! [`ConnectionSupervisor`] is the only writer of [`ConnectionState`]. It
//! does not touch the transport itself: every method returns a
//! [`SupervisorAction`] that the session worker carries out. All time comes
//! in as a `now` argument, which keeps the state machine deterministic
//! under a manual clock.
//!
//! ```text
//! Disconnected --start--> Connecting --opened--> Connected --batch--> Streaming
//!       ^                     ^                                           |
//!       |                     +------ retry delay elapsed ---- Error <----+
//!       +--------------------------- stop (from any state) -------------+
//! ```
//!
//! Transitions are fanned out to subscribers through [`StatePublisher`].

use crate::types::{ConnectionState, ReconnectStatus};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Delay curve between reconnect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Same delay before every attempt
    Fixed { delay_ms: u64 },
    /// `initial_ms * multiplier^n`, capped at `max_ms`
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        multiplier: f64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            initial_ms: 250,
            max_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `retry` (zero-based)
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffPolicy::Exponential {
                initial_ms,
                max_ms,
                multiplier,
            } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let scaled = initial_ms as f64 * multiplier.powi(exponent);
                Duration::from_millis(scaled.min(max_ms as f64) as u64)
            }
        }
    }
}

/// Backoff curve plus attempt cap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub backoff: BackoffPolicy,
    /// Reconnect attempts allowed after a failure before the error is terminal
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_attempts: 5,
        }
    }
}

/// What the session worker must do after a supervisor call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Nothing to do
    None,
    /// Open a new transport connection
    OpenTransport,
    /// Tear down the current transport connection
    CloseTransport,
}

/// Current connection state plus subscriber fan-out
#[derive(Debug, Default)]
pub struct StatePublisher {
    current: RwLock<ConnectionState>,
    subscribers: Mutex<Vec<Sender<ConnectionState>>>,
}

impl StatePublisher {
    /// Create a publisher in the Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently published state
    pub fn current(&self) -> ConnectionState {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Receive every state published from now on
    pub fn subscribe(&self) -> Receiver<ConnectionState> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Store and broadcast a new state; dropped subscribers are pruned
    pub fn publish(&self, state: ConnectionState) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = state.clone();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(state.clone()).is_ok());
    }
}

/// Lifecycle state machine with reconnect scheduling
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    policy: ReconnectPolicy,
    publisher: Arc<StatePublisher>,
    /// Reconnect attempts made since the last time data flowed
    attempts: u32,
    retry_at: Option<Duration>,
    terminal: bool,
}

impl ConnectionSupervisor {
    /// Create a supervisor publishing to `publisher`
    pub fn new(policy: ReconnectPolicy, publisher: Arc<StatePublisher>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            publisher,
            attempts: 0,
            retry_at: None,
            terminal: false,
        }
    }

    /// Current state
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Whether batches should be ingested right now
    pub fn is_streaming(&self) -> bool {
        self.state == ConnectionState::Streaming
    }

    /// Whether attempts are exhausted
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Reconnect bookkeeping for status displays
    pub fn reconnect_status(&self, now: Duration) -> ReconnectStatus {
        ReconnectStatus {
            attempts: self.attempts,
            max_attempts: self.policy.max_attempts,
            terminal: self.terminal,
            next_retry_in_ms: self
                .retry_at
                .map(|at| at.saturating_sub(now).as_millis() as u64),
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        tracing::info!("Connection state: {} -> {}", self.state, next);
        self.state = next.clone();
        self.publisher.publish(next);
    }

    /// Begin connecting
    ///
    /// Valid from Disconnected or from a terminal Error, which starts a
    /// fresh attempt sequence. Ignored otherwise.
    pub fn start(&mut self) -> SupervisorAction {
        let startable = match self.state {
            ConnectionState::Disconnected => true,
            ConnectionState::Error(_) => self.terminal,
            _ => false,
        };
        if !startable {
            tracing::debug!("Ignoring start while {}", self.state);
            return SupervisorAction::None;
        }

        self.attempts = 0;
        self.retry_at = None;
        self.terminal = false;
        self.transition(ConnectionState::Connecting);
        SupervisorAction::OpenTransport
    }

    /// The transport reported that it is open
    pub fn on_opened(&mut self) -> SupervisorAction {
        if self.state == ConnectionState::Connecting {
            self.transition(ConnectionState::Connected);
        } else {
            tracing::debug!("Ignoring transport open while {}", self.state);
        }
        SupervisorAction::None
    }

    /// A batch arrived; returns whether it should be ingested
    ///
    /// The first batch after opening moves Connected to Streaming and resets
    /// the attempt counter.
    pub fn on_batch(&mut self) -> bool {
        match self.state {
            ConnectionState::Streaming => true,
            ConnectionState::Connected => {
                self.attempts = 0;
                self.transition(ConnectionState::Streaming);
                true
            }
            _ => {
                tracing::debug!("Ignoring batch while {}", self.state);
                false
            }
        }
    }

    /// The transport failed
    pub fn on_error(&mut self, reason: impl Into<String>, now: Duration) -> SupervisorAction {
        self.fail(reason.into(), now)
    }

    /// The transport closed without being asked to
    pub fn on_closed(&mut self, reason: impl Into<String>, now: Duration) -> SupervisorAction {
        self.fail(reason.into(), now)
    }

    fn fail(&mut self, reason: String, now: Duration) -> SupervisorAction {
        if !self.state.is_active() {
            tracing::debug!("Ignoring transport failure while {}: {}", self.state, reason);
            return SupervisorAction::None;
        }

        if self.attempts >= self.policy.max_attempts {
            self.terminal = true;
            self.retry_at = None;
            tracing::error!(
                "Giving up after {} reconnect attempts: {}",
                self.attempts,
                reason
            );
        } else {
            let delay = self.policy.backoff.delay(self.attempts);
            self.retry_at = Some(now + delay);
            tracing::warn!(
                "Transport failed ({}); retrying in {} ms",
                reason,
                delay.as_millis()
            );
        }

        self.transition(ConnectionState::Error(reason));
        SupervisorAction::CloseTransport
    }

    /// Fire a scheduled reconnect if its delay has elapsed
    pub fn poll(&mut self, now: Duration) -> SupervisorAction {
        match self.retry_at {
            Some(at) if now >= at && self.state.is_error() => {
                self.retry_at = None;
                self.attempts += 1;
                tracing::info!(
                    "Reconnect attempt {}/{}",
                    self.attempts,
                    self.policy.max_attempts
                );
                self.transition(ConnectionState::Connecting);
                SupervisorAction::OpenTransport
            }
            _ => SupervisorAction::None,
        }
    }

    /// Go to Disconnected from any state. Idempotent.
    pub fn stop(&mut self) -> SupervisorAction {
        self.retry_at = None;
        self.attempts = 0;
        self.terminal = false;

        if self.state == ConnectionState::Disconnected {
            return SupervisorAction::None;
        }
        self.transition(ConnectionState::Disconnected);
        SupervisorAction::CloseTransport
    }
}
