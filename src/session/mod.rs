//! Streaming session
//!
//! A [`StreamSession`] owns one complete pipeline: sample buffer, rate
//! estimator, ingestor, connection supervisor, render scheduler and
//! transport. Sessions are plain values with an explicit lifecycle, so any
//! number of them can run side by side.
//!
//! # Threads
//!
//! - **session worker** ([`SessionWorker`]) - the only consumer of the
//!   session channel; applies commands and transport events in order
//! - **render ticker / render thread** - owned by the [`RenderScheduler`]
//! - whatever the transport spawns to do its I/O
//!
//! # Example
//!
//! ```no_run
//! use livescope::config::PipelineConfig;
//! use livescope::render::Frame;
//! use livescope::session::StreamSession;
//!
//! let mut session = StreamSession::builder(PipelineConfig::default())
//!     .renderer(Box::new(|frame: &Frame| -> livescope::Result<()> {
//!         println!("{} samples", frame.window().len());
//!         Ok(())
//!     }))
//!     .build()?;
//!
//! session.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! println!("{:.0} samples/s", session.sample_rate());
//! session.stop()?;
//! # Ok::<(), livescope::LivescopeError>(())
//! ```

pub mod worker;

pub use worker::{SessionWorker, POLL_INTERVAL};

use crate::buffer::SampleBuffer;
use crate::clock::{Clock, MonotonicClock, SharedClock};
use crate::config::PipelineConfig;
use crate::error::{LivescopeError, Result};
use crate::ingest::{IngestCounters, StreamIngestor};
use crate::rate::{EventKind, RateEstimator};
use crate::render::{Frame, RenderScheduler, Renderer, TickOutcome};
use crate::supervisor::{ConnectionSupervisor, StatePublisher};
use crate::transport::{build_transport, StampedEvent, Transport};
use crate::types::{ConnectionState, DisplayWindow, ReconnectStatus, StatusSnapshot};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// Pending messages the session channel holds before senders block
pub const CHANNEL_CAPACITY: usize = 10_000;

/// How long lifecycle calls wait for the worker to acknowledge
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Requests from the session owner to its worker
#[derive(Debug)]
pub enum SessionCommand {
    /// Begin connecting; acknowledged with the resulting state
    Start { ack: Sender<ConnectionState> },
    /// Disconnect and release the transport; acknowledged with the resulting state
    Stop { ack: Sender<ConnectionState> },
    /// Drop all buffered samples
    ClearBuffer,
    /// Exit the worker loop
    Shutdown,
}

/// Everything the session worker consumes
#[derive(Debug)]
pub enum SessionMessage {
    Command(SessionCommand),
    Transport(StampedEvent),
}

fn discard_frames() -> Box<dyn Renderer> {
    Box::new(|_: &Frame| -> Result<()> { Ok(()) })
}

/// Builder for [`StreamSession`]
///
/// Anything not supplied is derived from the config: the transport from
/// `config.transport`, the clock is a [`MonotonicClock`] and the renderer
/// discards frames.
pub struct SessionBuilder {
    config: PipelineConfig,
    clock: Option<SharedClock>,
    transport: Option<Box<dyn Transport>>,
    renderer: Option<Box<dyn Renderer>>,
}

impl SessionBuilder {
    /// Time source for rates, timestamps and reconnect delays
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use this transport instead of the configured one
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Receives every rendered frame
    pub fn renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Validate the config, wire the pipeline and spawn the session worker
    pub fn build(self) -> Result<StreamSession> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(MonotonicClock::shared);
        let transport = self
            .transport
            .unwrap_or_else(|| build_transport(&config.transport));
        let renderer = self.renderer.unwrap_or_else(discard_frames);
        let description = transport.describe();

        let buffer = Arc::new(SampleBuffer::new(config.buffer.capacity)?);
        let rates = Arc::new(RateEstimator::new(
            Arc::clone(&clock),
            config.rate.window(),
        ));
        let counters = Arc::new(IngestCounters::default());
        let publisher = Arc::new(StatePublisher::new());

        let scheduler = RenderScheduler::new(
            &config.render,
            Arc::clone(&buffer),
            Arc::clone(&rates),
            Arc::clone(&publisher),
            renderer,
        )?;

        let supervisor = ConnectionSupervisor::new(config.reconnect.clone(), Arc::clone(&publisher));
        let reconnect = Arc::new(RwLock::new(supervisor.reconnect_status(clock.now())));
        let ingestor = StreamIngestor::new(
            Arc::clone(&buffer),
            Arc::clone(&rates),
            Arc::clone(&counters),
            config.buffer.max_batch_samples,
        );

        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let mut worker = SessionWorker::new(
            supervisor,
            ingestor,
            transport,
            Arc::clone(&buffer),
            Arc::clone(&clock),
            (tx.clone(), rx),
            Arc::clone(&running),
            Arc::clone(&reconnect),
        );

        let handle = std::thread::Builder::new()
            .name("livescope-session".to_string())
            .spawn(move || worker.run())
            .map_err(|e| LivescopeError::Session(format!("Failed to spawn session worker: {}", e)))?;

        tracing::debug!("Session created ({})", description);

        Ok(StreamSession {
            config,
            buffer,
            rates,
            counters,
            publisher,
            reconnect,
            scheduler,
            tx,
            running,
            worker: Some(handle),
            started: false,
            started_at: None,
            description,
        })
    }
}

/// One live streaming pipeline
pub struct StreamSession {
    config: PipelineConfig,
    buffer: Arc<SampleBuffer>,
    rates: Arc<RateEstimator>,
    counters: Arc<IngestCounters>,
    publisher: Arc<StatePublisher>,
    reconnect: Arc<RwLock<ReconnectStatus>>,
    scheduler: RenderScheduler,
    tx: Sender<SessionMessage>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    /// Whether the render ticker is running on behalf of `start`
    started: bool,
    started_at: Option<DateTime<Utc>>,
    description: String,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("transport", &self.description)
            .field("state", &self.publisher.current())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    /// Start building a session from `config`
    pub fn builder(config: PipelineConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            clock: None,
            transport: None,
            renderer: None,
        }
    }

    /// Build a session with the configured transport and no renderer
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    fn send(&self, msg: SessionMessage) -> Result<()> {
        if self.worker.is_none() {
            return Err(LivescopeError::Session("Session has been shut down".to_string()));
        }
        self.tx
            .send_timeout(msg, COMMAND_TIMEOUT)
            .map_err(|_| LivescopeError::Session("Session worker is not responding".to_string()))
    }

    fn request(&self, make: impl FnOnce(Sender<ConnectionState>) -> SessionCommand) -> Result<ConnectionState> {
        let (ack_tx, ack_rx) = bounded(1);
        self.send(SessionMessage::Command(make(ack_tx)))?;
        ack_rx.recv_timeout(COMMAND_TIMEOUT).map_err(|_| {
            LivescopeError::Timeout("Session worker did not acknowledge command".to_string())
        })
    }

    /// Start connecting and rendering
    ///
    /// Returns the connection state right after the request was applied.
    /// Ignored by the supervisor while a connection is already active or a
    /// retry is pending.
    pub fn start(&mut self) -> Result<ConnectionState> {
        if !self.started {
            self.rates.reset();
        }

        let state = self.request(|ack| SessionCommand::Start { ack })?;

        if !self.started {
            self.scheduler.start()?;
            self.started = true;
            self.started_at = Some(Utc::now());
        }
        Ok(state)
    }

    /// Disconnect, release the transport and stop the render ticker
    ///
    /// Idempotent and safe from any state, including after
    /// [`shutdown`](Self::shutdown).
    pub fn stop(&mut self) -> Result<ConnectionState> {
        self.scheduler.stop();
        self.started = false;

        if self.worker.is_none() {
            return Ok(ConnectionState::Disconnected);
        }
        self.request(|ack| SessionCommand::Stop { ack })
    }

    /// Stop everything and join all session threads. Idempotent.
    pub fn shutdown(&mut self) {
        self.scheduler.stop();
        self.started = false;

        if let Some(handle) = self.worker.take() {
            self.running.store(false, Ordering::SeqCst);
            // Wakes the worker immediately rather than at its next poll
            let _ = self.tx.try_send(SessionMessage::Command(SessionCommand::Shutdown));
            let _ = handle.join();
        }
        self.scheduler.shutdown();
    }

    /// Everything a status display needs, captured now
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.publisher.current(),
            reconnect: self.reconnect_status(),
            sample_rate: self.sample_rate(),
            frame_rate: self.frame_rate(),
            buffer: self.buffer.metrics(),
            ingest: self.counters.snapshot(),
            render: self.scheduler.stats(),
            started_at: self.started_at,
        }
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.publisher.current()
    }

    /// Reconnect attempt bookkeeping
    pub fn reconnect_status(&self) -> ReconnectStatus {
        self.reconnect
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Samples per second over the rate window
    pub fn sample_rate(&self) -> f64 {
        self.rates.rate(EventKind::Sample)
    }

    /// Rendered frames per second over the rate window
    pub fn frame_rate(&self) -> f64 {
        self.rates.rate(EventKind::Frame)
    }

    /// Samples currently buffered
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Receive every connection state transition from now on
    pub fn subscribe(&self) -> Receiver<ConnectionState> {
        self.publisher.subscribe()
    }

    /// Copy of the newest `max_count` buffered samples (all if `None`)
    pub fn snapshot(&self, max_count: Option<usize>) -> DisplayWindow {
        self.buffer.snapshot(max_count)
    }

    /// Drop all buffered samples, in order with pending batches
    pub fn clear_buffer(&self) -> Result<()> {
        self.send(SessionMessage::Command(SessionCommand::ClearBuffer))
    }

    /// Skip render ticks until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.scheduler.pause();
    }

    /// Resume render ticks after [`pause`](Self::pause)
    pub fn resume(&self) {
        self.scheduler.resume();
    }

    /// Whether render ticks are currently skipped
    pub fn is_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    /// Run one render tick immediately, outside the ticker's cadence
    pub fn tick(&self) -> TickOutcome {
        self.scheduler.tick()
    }

    /// Block until no frame is rendering, up to `timeout`
    pub fn wait_render_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    /// Description of the transport, for logs and status output
    pub fn transport_description(&self) -> &str {
        &self.description
    }

    /// Config the session was built from
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Wall-clock time of the most recent `start` from a stopped session
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::{MockTransport, PushHandle, PushTransport};
    use std::time::Instant;

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn push_session(clock: &ManualClock) -> (StreamSession, PushHandle) {
        let (transport, handle) = PushTransport::new();
        let mut config = PipelineConfig::default();
        config.buffer.capacity = 5;
        let session = StreamSession::builder(config)
            .clock(Arc::new(clock.clone()))
            .transport(Box::new(transport))
            .build()
            .unwrap();
        (session, handle)
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.buffer.capacity = 0;
        assert!(StreamSession::new(config).is_err());
    }

    #[test]
    fn test_start_reaches_streaming_and_ingests() {
        let clock = ManualClock::new();
        let (mut session, handle) = push_session(&clock);

        session.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            session.connection_state() == ConnectionState::Connected
        }));

        for v in 1..=7 {
            assert!(handle.push(format!("[{}]", v)));
        }
        assert!(wait_until(Duration::from_secs(2), || {
            session.status().ingest.accepted_samples == 7
        }));

        let values: Vec<f64> = session.snapshot(Some(5)).values().collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(session.connection_state(), ConnectionState::Streaming);
        assert!(session.started_at().is_some());
    }

    #[test]
    fn test_stop_twice_is_disconnected() {
        let clock = ManualClock::new();
        let (mut session, handle) = push_session(&clock);
        session.start().unwrap();

        assert_eq!(session.stop().unwrap(), ConnectionState::Disconnected);
        assert_eq!(session.stop().unwrap(), ConnectionState::Disconnected);
        assert!(!handle.is_open());
    }

    #[test]
    fn test_stop_after_shutdown() {
        let clock = ManualClock::new();
        let (mut session, _handle) = push_session(&clock);
        session.shutdown();
        session.shutdown();
        assert_eq!(session.stop().unwrap(), ConnectionState::Disconnected);
        assert!(session.start().is_err());
    }

    #[test]
    fn test_open_failure_from_mock_transport() {
        let mut transport = MockTransport::new();
        transport.expect_describe().returning(|| "mock".to_string());
        transport
            .expect_open()
            .times(1)
            .returning(|_| Err(LivescopeError::Transport("unreachable".into())));
        transport.expect_close().returning(|| ());

        let mut session = StreamSession::builder(PipelineConfig::default())
            .clock(Arc::new(ManualClock::new()))
            .transport(Box::new(transport))
            .build()
            .unwrap();

        let state = session.start().unwrap();
        assert!(state.is_error());
        assert_eq!(session.transport_description(), "mock");
        // Manual clock never advances, so no retry is attempted
        assert_eq!(session.reconnect_status().attempts, 0);
        session.shutdown();
    }

    #[test]
    fn test_clear_buffer_is_ordered_with_batches() {
        let clock = ManualClock::new();
        let (mut session, handle) = push_session(&clock);
        session.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || handle.is_open()));

        handle.push("[1, 2, 3]");
        session.clear_buffer().unwrap();
        handle.push("[4]");

        assert!(wait_until(Duration::from_secs(2), || {
            session.status().ingest.accepted_samples == 4
        }));
        let values: Vec<f64> = session.snapshot(None).values().collect();
        assert_eq!(values, vec![4.0]);
    }

    #[test]
    fn test_sessions_are_independent() {
        let clock = ManualClock::new();
        let (mut a, handle_a) = push_session(&clock);
        let (b, _handle_b) = push_session(&clock);

        a.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || handle_a.is_open()));
        handle_a.push("[1]");
        assert!(wait_until(Duration::from_secs(2), || a.buffer_len() == 1));

        assert_eq!(b.connection_state(), ConnectionState::Disconnected);
        assert_eq!(b.buffer_len(), 0);
    }
}
