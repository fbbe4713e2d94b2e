//! Fixed-cadence rendering
//!
//! The [`RenderScheduler`] pulls a [`DisplayWindow`] out of the sample
//! buffer on every tick and hands it to a [`Renderer`] on a dedicated render
//! thread. Ticking and rendering are decoupled:
//!
//! - A ticker thread paces ticks at `max_fps` and only dispatches.
//! - The render thread runs the callback and records a frame event when it
//!   completes successfully.
//! - A tick that arrives while the previous frame is still rendering is
//!   dropped, never queued.
//!
//! [`RenderScheduler::tick`] is public, so a host with its own timer (or a
//! test) can drive the cadence directly instead of calling
//! [`RenderScheduler::start`].

use crate::buffer::SampleBuffer;
use crate::config::RenderConfig;
use crate::error::{LivescopeError, Result};
use crate::rate::{EventKind, RateEstimator};
use crate::supervisor::StatePublisher;
use crate::types::{ConnectionState, DisplayWindow, RenderStats};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Size of the rolling window for recent render times
const RECENT_WINDOW_SIZE: usize = 100;

/// One frame's worth of input for a renderer
#[derive(Debug)]
pub struct Frame {
    window: DisplayWindow,
    state: ConnectionState,
    index: u64,
}

impl Frame {
    pub(crate) fn new(window: DisplayWindow, state: ConnectionState, index: u64) -> Self {
        Self {
            window,
            state,
            index,
        }
    }

    /// Samples to draw, oldest first
    pub fn window(&self) -> &DisplayWindow {
        &self.window
    }

    /// Connection state when the tick fired
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Zero-based index of this frame among dispatched frames
    pub fn index(&self) -> u64 {
        self.index
    }
}

/// Draws frames
///
/// Implemented for any `FnMut(&Frame) -> Result<()>` closure.
#[cfg_attr(test, mockall::automock)]
pub trait Renderer: Send {
    /// Draw one frame. An error skips the frame; it is logged and counted.
    fn render(&mut self, frame: &Frame) -> Result<()>;
}

impl<F> Renderer for F
where
    F: FnMut(&Frame) -> Result<()> + Send,
{
    fn render(&mut self, frame: &Frame) -> Result<()> {
        self(frame)
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was handed to the render thread
    Dispatched,
    /// The previous frame was still rendering
    Dropped,
    /// Rendering is paused
    Paused,
    /// The scheduler has been stopped
    Stopped,
}

#[derive(Debug, Default)]
struct LatencyWindow {
    recent: VecDeque<u64>,
    total_us: u64,
    samples: u64,
}

impl LatencyWindow {
    fn record(&mut self, time_us: u64) {
        self.total_us += time_us;
        self.samples += 1;
        self.recent.push_back(time_us);
        if self.recent.len() > RECENT_WINDOW_SIZE {
            self.recent.pop_front();
        }
    }

    fn avg_us(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_us as f64 / self.samples as f64
        }
    }

    fn recent_min_us(&self) -> u64 {
        self.recent.iter().min().copied().unwrap_or(0)
    }

    fn recent_max_us(&self) -> u64 {
        self.recent.iter().max().copied().unwrap_or(0)
    }
}

/// State shared between the ticker, the render thread and status readers
#[derive(Debug, Default)]
struct RenderShared {
    in_flight: AtomicBool,
    paused: AtomicBool,
    next_index: AtomicU64,
    frames_rendered: AtomicU64,
    frames_dropped: AtomicU64,
    frames_failed: AtomicU64,
    frames_paused: AtomicU64,
    latency: Mutex<LatencyWindow>,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl RenderShared {
    fn finish_frame(&self) {
        {
            let _guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.in_flight.store(false, Ordering::SeqCst);
        }
        self.idle.notify_all();
    }
}

/// Everything a tick needs, shareable with the ticker thread
struct Dispatcher {
    shared: Arc<RenderShared>,
    buffer: Arc<SampleBuffer>,
    publisher: Arc<StatePublisher>,
    window_samples: usize,
    jobs: Mutex<Option<Sender<Frame>>>,
}

impl Dispatcher {
    fn tick(&self) -> TickOutcome {
        if self.shared.paused.load(Ordering::SeqCst) {
            self.shared.frames_paused.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::Paused;
        }

        if self
            .shared
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Frame dropped: previous render still running");
            return TickOutcome::Dropped;
        }

        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(jobs) = jobs.as_ref() else {
            self.shared.finish_frame();
            return TickOutcome::Stopped;
        };

        let frame = Frame::new(
            self.buffer.snapshot(Some(self.window_samples)),
            self.publisher.current(),
            self.shared.next_index.fetch_add(1, Ordering::Relaxed),
        );
        if jobs.try_send(frame).is_err() {
            self.shared.finish_frame();
            return TickOutcome::Stopped;
        }
        TickOutcome::Dispatched
    }
}

fn render_loop(
    mut renderer: Box<dyn Renderer>,
    jobs: Receiver<Frame>,
    shared: Arc<RenderShared>,
    rates: Arc<RateEstimator>,
) {
    tracing::debug!("Render thread started");

    for frame in jobs {
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| renderer.render(&frame)));
        let elapsed_us = started.elapsed().as_micros() as u64;

        match result {
            Ok(Ok(())) => {
                shared.frames_rendered.fetch_add(1, Ordering::Relaxed);
                shared
                    .latency
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(elapsed_us);
                rates.record_event(EventKind::Frame, rates.now());
            }
            Ok(Err(e)) => {
                shared.frames_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Render failed on frame {}: {}", frame.index(), e);
            }
            Err(_) => {
                shared.frames_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Renderer panicked on frame {}", frame.index());
            }
        }

        drop(frame);
        shared.finish_frame();
    }

    tracing::debug!("Render thread stopped");
}

/// Paces render ticks and runs the renderer off the caller's thread
pub struct RenderScheduler {
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    running: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RenderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderScheduler")
            .field("interval", &self.interval)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RenderScheduler {
    /// Create a scheduler and its render thread. Ticking starts with
    /// [`start`](Self::start) or manual [`tick`](Self::tick) calls.
    pub fn new(
        config: &RenderConfig,
        buffer: Arc<SampleBuffer>,
        rates: Arc<RateEstimator>,
        publisher: Arc<StatePublisher>,
        renderer: Box<dyn Renderer>,
    ) -> Result<Self> {
        if config.max_fps == 0 {
            return Err(LivescopeError::Config(
                "Render max_fps must be at least 1".to_string(),
            ));
        }

        let shared = Arc::new(RenderShared::default());
        // One slot: the in-flight flag already limits dispatch to one frame
        let (job_tx, job_rx) = bounded(1);

        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("livescope-render".to_string())
                .spawn(move || render_loop(renderer, job_rx, shared, rates))
                .map_err(|e| LivescopeError::Session(format!("Failed to spawn render thread: {}", e)))?
        };

        Ok(Self {
            dispatcher: Arc::new(Dispatcher {
                shared,
                buffer,
                publisher,
                window_samples: config.window_samples,
                jobs: Mutex::new(Some(job_tx)),
            }),
            interval: config.frame_interval(),
            running: Arc::new(AtomicBool::new(false)),
            ticker: None,
            worker: Some(worker),
        })
    }

    /// Tick interval derived from `max_fps`
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one tick now
    pub fn tick(&self) -> TickOutcome {
        self.dispatcher.tick()
    }

    /// Start the ticker thread. No-op if already running.
    pub fn start(&mut self) -> Result<()> {
        if self.ticker.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let dispatcher = Arc::clone(&self.dispatcher);
        let interval = self.interval;

        let handle = std::thread::Builder::new()
            .name("livescope-ticker".to_string())
            .spawn(move || {
                let mut next_tick = Instant::now() + interval;
                while running.load(Ordering::SeqCst) {
                    if dispatcher.tick() == TickOutcome::Stopped {
                        break;
                    }

                    // Sleep to the next deadline; if we fell behind, skip ahead
                    let now = Instant::now();
                    if next_tick > now {
                        std::thread::sleep(next_tick - now);
                        next_tick += interval;
                    } else {
                        next_tick = now + interval;
                    }
                }
            })
            .map_err(|e| LivescopeError::Session(format!("Failed to spawn ticker thread: {}", e)))?;

        self.ticker = Some(handle);
        tracing::debug!("Render ticker started at {:?} per frame", interval);
        Ok(())
    }

    /// Stop the ticker thread. Idempotent; [`start`](Self::start) may be
    /// called again afterwards.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.ticker.take() {
            let _ = handle.join();
            tracing::debug!("Render ticker stopped");
        }
    }

    /// Stop ticking and shut down the render thread. Idempotent.
    ///
    /// Waits for a frame that is already rendering to finish. Later ticks
    /// return [`TickOutcome::Stopped`].
    pub fn shutdown(&mut self) {
        self.stop();
        self.dispatcher
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
            tracing::debug!("Render thread joined");
        }
    }

    /// Skip ticks until [`resume`](Self::resume); skipped ticks are not drops
    pub fn pause(&self) {
        self.dispatcher.shared.paused.store(true, Ordering::SeqCst);
    }

    /// Resume rendering after [`pause`](Self::pause)
    pub fn resume(&self) {
        self.dispatcher.shared.paused.store(false, Ordering::SeqCst);
    }

    /// Whether rendering is paused
    pub fn is_paused(&self) -> bool {
        self.dispatcher.shared.paused.load(Ordering::SeqCst)
    }

    /// Whether a frame is currently rendering
    pub fn is_busy(&self) -> bool {
        self.dispatcher.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Block until no frame is rendering, up to `timeout`
    ///
    /// Returns `false` if a frame was still rendering when the timeout hit.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let shared = &self.dispatcher.shared;
        let guard = shared.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (_guard, result) = shared
            .idle
            .wait_timeout_while(guard, timeout, |_| shared.in_flight.load(Ordering::SeqCst))
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    /// Frame counters and render latency
    pub fn stats(&self) -> RenderStats {
        let shared = &self.dispatcher.shared;
        let latency = shared.latency.lock().unwrap_or_else(PoisonError::into_inner);
        let min = latency.recent_min_us();
        let max = latency.recent_max_us();

        RenderStats {
            frames_rendered: shared.frames_rendered.load(Ordering::Relaxed),
            frames_dropped: shared.frames_dropped.load(Ordering::Relaxed),
            frames_failed: shared.frames_failed.load(Ordering::Relaxed),
            frames_paused: shared.frames_paused.load(Ordering::Relaxed),
            avg_render_time_us: latency.avg_us(),
            min_render_time_us: min,
            max_render_time_us: max,
            jitter_us: max.saturating_sub(min),
        }
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
