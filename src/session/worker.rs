//! Session Worker Thread Implementation
//!
//! The worker is the single consumer of the session channel. Commands from
//! the host and events from the transport arrive on the same channel and are
//! applied one at a time, in arrival order, so connection state transitions
//! never race each other.
//!
//! # Responsibilities
//!
//! - **Lifecycle**: forwards start/stop to the [`ConnectionSupervisor`] and
//!   carries out the transport action it returns
//! - **Ingestion**: hands batches to the [`StreamIngestor`] while streaming
//! - **Reconnects**: polls the supervisor between messages so a scheduled
//!   retry fires even when the channel is quiet
//! - **Generations**: every open or close starts a new connection
//!   generation; events stamped with an older one are discarded

use super::{SessionCommand, SessionMessage};
use crate::clock::{Clock, SharedClock};
use crate::buffer::SampleBuffer;
use crate::ingest::StreamIngestor;
use crate::supervisor::{ConnectionSupervisor, SupervisorAction};
use crate::transport::{EventSink, StampedEvent, Transport, TransportEvent};
use crate::types::ReconnectStatus;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Longest the worker waits for a message before polling the supervisor
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Owns the supervisor, the ingestor and the transport
pub struct SessionWorker {
    supervisor: ConnectionSupervisor,
    ingestor: StreamIngestor,
    transport: Box<dyn Transport>,
    buffer: Arc<SampleBuffer>,
    clock: SharedClock,
    /// Receiver for commands and transport events
    rx: Receiver<SessionMessage>,
    /// Sender handed to transports through their sinks
    tx: Sender<SessionMessage>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Reconnect bookkeeping mirrored for status readers
    reconnect: Arc<RwLock<ReconnectStatus>>,
    /// Current connection generation
    generation: u64,
}

impl SessionWorker {
    /// Create a new session worker
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        supervisor: ConnectionSupervisor,
        ingestor: StreamIngestor,
        transport: Box<dyn Transport>,
        buffer: Arc<SampleBuffer>,
        clock: SharedClock,
        channel: (Sender<SessionMessage>, Receiver<SessionMessage>),
        running: Arc<AtomicBool>,
        reconnect: Arc<RwLock<ReconnectStatus>>,
    ) -> Self {
        let (tx, rx) = channel;
        Self {
            supervisor,
            ingestor,
            transport,
            buffer,
            clock,
            rx,
            tx,
            running,
            reconnect,
            generation: 0,
        }
    }

    /// Run the main worker loop
    pub fn run(&mut self) {
        tracing::info!("Session worker started ({})", self.transport.describe());

        while self.running.load(Ordering::SeqCst) {
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(msg) => self.handle_message(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.running.store(false, Ordering::SeqCst);
                }
            }

            let action = self.supervisor.poll(self.clock.now());
            self.apply(action);
            self.publish_reconnect_status();
        }

        // Cleanup
        let action = self.supervisor.stop();
        self.apply(action);
        self.transport.close();
        self.publish_reconnect_status();
        tracing::info!("Session worker stopped");
    }

    fn handle_message(&mut self, msg: SessionMessage) {
        match msg {
            SessionMessage::Command(cmd) => self.handle_command(cmd),
            SessionMessage::Transport(stamped) => self.handle_transport(stamped),
        }
    }

    /// Handle a single command
    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Start { ack } => {
                let action = self.supervisor.start();
                self.apply(action);
                self.publish_reconnect_status();
                let _ = ack.send(self.supervisor.state().clone());
            }
            SessionCommand::Stop { ack } => {
                let action = self.supervisor.stop();
                self.apply(action);
                // Release the transport even if the supervisor was already idle
                self.transport.close();
                self.publish_reconnect_status();
                let _ = ack.send(self.supervisor.state().clone());
            }
            SessionCommand::ClearBuffer => {
                self.buffer.clear();
                tracing::debug!("Sample buffer cleared");
            }
            SessionCommand::Shutdown => {
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    fn handle_transport(&mut self, stamped: StampedEvent) {
        if stamped.generation != self.generation {
            tracing::trace!(
                "Discarding event from connection {} (current {})",
                stamped.generation,
                self.generation
            );
            return;
        }

        let now = self.clock.now();
        match stamped.event {
            TransportEvent::Opened => {
                let action = self.supervisor.on_opened();
                self.apply(action);
            }
            TransportEvent::BatchReceived(payload) => {
                if self.supervisor.on_batch() {
                    // Rejections are counted and logged by the ingestor
                    let _ = self.ingestor.on_batch(&payload, now);
                } else {
                    self.ingestor.counters().record_ignored();
                }
            }
            TransportEvent::Closed(reason) => {
                let action = self.supervisor.on_closed(reason, now);
                self.apply(action);
            }
            TransportEvent::ErrorOccurred(reason) => {
                let action = self.supervisor.on_error(reason, now);
                self.apply(action);
            }
        }
    }

    /// Carry out a supervisor action
    fn apply(&mut self, action: SupervisorAction) {
        match action {
            SupervisorAction::None => {}
            SupervisorAction::OpenTransport => {
                self.generation += 1;
                self.ingestor.resync();
                let sink = EventSink::new(self.generation, self.tx.clone());
                tracing::debug!(
                    "Opening {} (connection {})",
                    self.transport.describe(),
                    self.generation
                );

                if let Err(e) = self.transport.open(sink) {
                    let action = self.supervisor.on_error(e.to_string(), self.clock.now());
                    self.apply(action);
                }
            }
            SupervisorAction::CloseTransport => {
                self.transport.close();
                // Anything still in flight from the old connection is stale
                self.generation += 1;
            }
        }
    }

    fn publish_reconnect_status(&self) {
        let status = self.supervisor.reconnect_status(self.clock.now());
        *self
            .reconnect
            .write()
            .unwrap_or_else(PoisonError::into_inner) = status;
    }
}
