//! Core data types for livescope
//!
//! This module contains the fundamental data structures shared by every
//! stage of the pipeline.
//!
//! # Main Types
//!
//! - [`Sample`] - A single ingested value with its sequence number
//! - [`DisplayWindow`] - The ordered samples handed to one render call
//! - [`ConnectionState`] - Lifecycle state of a streaming session
//! - [`StatusSnapshot`] - Read-only aggregate published to status displays
//!
//! # Sequence Numbers
//!
//! Sequence numbers are assigned at ingestion and strictly increase across
//! batch boundaries. When the transport reports its own upstream index and
//! data was lost in transit, the lost range is skipped, so a consumer can
//! spot dropped data by looking for jumps (see [`DisplayWindow::gap_count`]).

use crate::buffer::BufferMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single numeric sample. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    seq: u64,
    value: f64,
    timestamp: Duration,
}

impl Sample {
    /// Create a sample
    pub fn new(seq: u64, value: f64, timestamp: Duration) -> Self {
        Self {
            seq,
            value,
            timestamp,
        }
    }

    /// Monotonic sequence number assigned at ingestion
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The sample value
    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Arrival time relative to the session clock origin
    #[inline]
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

/// Ordered, newest-last samples for a single render call
///
/// Not `Clone`: a renderer only ever sees a window by reference for the
/// duration of one frame.
#[derive(Debug, Default)]
pub struct DisplayWindow {
    samples: Vec<Sample>,
}

impl DisplayWindow {
    pub(crate) fn from_vec(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// An empty window (idle frame)
    pub fn empty() -> Self {
        Self::default()
    }

    /// The samples, oldest first
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Iterate over the sample values, oldest first
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(Sample::value)
    }

    /// Number of samples in the window
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The newest sample
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Sequence range covered by this window
    pub fn seq_range(&self) -> Option<(u64, u64)> {
        Some((self.samples.first()?.seq, self.samples.last()?.seq))
    }

    /// Get the time range of the window in seconds
    pub fn time_range(&self) -> Option<(f64, f64)> {
        let first = self.samples.first()?.timestamp.as_secs_f64();
        let last = self.samples.last()?.timestamp.as_secs_f64();
        Some((first, last))
    }

    /// Get the value range of the window
    pub fn value_range(&self) -> Option<(f64, f64)> {
        if self.samples.is_empty() {
            return None;
        }
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for s in &self.samples {
            min = min.min(s.value);
            max = max.max(s.value);
        }
        Some((min, max))
    }

    /// Number of sequence discontinuities inside the window
    pub fn gap_count(&self) -> usize {
        self.samples
            .windows(2)
            .filter(|pair| pair[1].seq != pair[0].seq + 1)
            .count()
    }
}

/// Lifecycle state of a streaming session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport is open
    #[default]
    Disconnected,
    /// Transport is being opened
    Connecting,
    /// Transport is open, no data yet
    Connected,
    /// Data is flowing into the buffer
    Streaming,
    /// Transport failed or closed unexpectedly
    Error(String),
}

impl ConnectionState {
    /// Whether the session is holding (or opening) a transport
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Streaming
        )
    }

    /// Whether this is an error state
    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error(_))
    }

    /// Short label for status displays
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Streaming => "Streaming",
            ConnectionState::Error(_) => "Error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Streaming => write!(f, "Streaming"),
            ConnectionState::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Reconnect bookkeeping published alongside the connection state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconnectStatus {
    /// Consecutive failed attempts so far
    pub attempts: u32,
    /// Configured attempt cap
    pub max_attempts: u32,
    /// Attempts exhausted; the error will not clear on its own
    pub terminal: bool,
    /// Time until the next scheduled attempt
    pub next_retry_in_ms: Option<u64>,
}

/// Ingestion counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Batches appended to the buffer
    pub accepted_batches: u64,
    /// Samples appended to the buffer
    pub accepted_samples: u64,
    /// Batches rejected as malformed or stale
    pub rejected_batches: u64,
    /// Of the rejected batches, how many were stale replays
    pub stale_batches: u64,
    /// Upstream sequence discontinuities detected
    pub gap_count: u64,
    /// Samples missing across all detected gaps
    pub missing_samples: u64,
    /// Batches received while the session was not accepting data
    pub ignored_batches: u64,
}

impl IngestStats {
    /// Percentage of received batches that were rejected
    pub fn rejection_rate(&self) -> f64 {
        let total = self.accepted_batches + self.rejected_batches;
        if total == 0 {
            0.0
        } else {
            (self.rejected_batches as f64 / total as f64) * 100.0
        }
    }
}

/// Render counters and latency health
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderStats {
    /// Frames whose render callback completed successfully
    pub frames_rendered: u64,
    /// Ticks skipped because the previous render was still running
    pub frames_dropped: u64,
    /// Render callbacks that returned an error or panicked
    pub frames_failed: u64,
    /// Ticks skipped while rendering was paused
    pub frames_paused: u64,
    /// Average render time in microseconds
    pub avg_render_time_us: f64,
    /// Minimum render time in the recent window (microseconds)
    pub min_render_time_us: u64,
    /// Maximum render time in the recent window (microseconds)
    pub max_render_time_us: u64,
    /// Render time jitter (max - min) in microseconds
    pub jitter_us: u64,
}

impl RenderStats {
    /// Percentage of dispatched-or-dropped ticks that were dropped
    pub fn drop_rate(&self) -> f64 {
        let total = self.frames_rendered + self.frames_failed + self.frames_dropped;
        if total == 0 {
            0.0
        } else {
            (self.frames_dropped as f64 / total as f64) * 100.0
        }
    }
}

/// Everything a status display shows, captured at one instant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Current connection state
    pub state: ConnectionState,
    /// Reconnect bookkeeping
    pub reconnect: ReconnectStatus,
    /// Samples per second over the rate window
    pub sample_rate: f64,
    /// Frames per second over the rate window
    pub frame_rate: f64,
    /// Buffer occupancy and totals
    pub buffer: BufferMetrics,
    /// Ingestion counters
    pub ingest: IngestStats,
    /// Render counters
    pub render: RenderStats,
    /// Wall-clock time the session was started
    pub started_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    /// Buffer occupancy as a percentage of capacity
    pub fn buffer_fill_percent(&self) -> f64 {
        if self.buffer.capacity == 0 {
            0.0
        } else {
            (self.buffer.len as f64 / self.buffer.capacity as f64) * 100.0
        }
    }
}
