//! # livescope: real-time sample streaming
//!
//! The core of a live oscilloscope-style display. A producer delivers a
//! continuous stream of numeric samples over an unreliable transport; a
//! bounded ring buffer absorbs bursty arrival; a renderer draws the newest
//! window at a capped frame rate while sample and frame rates are measured
//! continuously.
//!
//! ## Architecture
//!
//! - **Transport**: produces raw payloads on its own thread and reports
//!   through [`TransportEvent`]s (TCP, host-pushed, or simulated)
//! - **Session worker**: one thread per [`StreamSession`] that applies
//!   transport events and lifecycle commands in arrival order
//! - **Supervisor**: the connection state machine and reconnect backoff
//! - **Ingestion**: validates payloads and appends them to the
//!   [`SampleBuffer`]
//! - **Rendering**: a ticker pulls a [`DisplayWindow`] at a fixed cadence
//!   and hands it to a [`Renderer`] on a dedicated thread, dropping ticks
//!   while a frame is still rendering
//! - **Communication**: crossbeam channels between all threads
//!
//! ## Configuration
//!
//! Sessions are described by a [`PipelineConfig`], stored as TOML under the
//! platform config directory (`livescope/config.toml`).
//!
//! ## Example
//!
//! ```no_run
//! use livescope::{PipelineConfig, PushTransport, StreamSession};
//!
//! let (transport, handle) = PushTransport::new();
//! let mut session = StreamSession::builder(PipelineConfig::default())
//!     .transport(Box::new(transport))
//!     .build()?;
//!
//! session.start()?;
//! handle.push("[0.5, 0.75, 1.0]");
//!
//! let status = session.status();
//! println!("{} | {:.0} samples/s", status.state, status.sample_rate);
//! # Ok::<(), livescope::LivescopeError>(())
//! ```

pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod rate;
pub mod render;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use buffer::{BufferMetrics, SampleBuffer};
pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock};
pub use config::PipelineConfig;
pub use error::{LivescopeError, Result, ResultExt};
pub use ingest::{parse_payload, StreamIngestor};
pub use rate::{EventKind, RateEstimator};
pub use render::{Frame, RenderScheduler, Renderer, TickOutcome};
pub use session::StreamSession;
pub use supervisor::{BackoffPolicy, ConnectionSupervisor, ReconnectPolicy};
pub use transport::{PushHandle, PushTransport, Transport, TransportEvent};
pub use types::{ConnectionState, DisplayWindow, Sample, StatusSnapshot};
