//! Sliding-window event rate estimation
//!
//! [`RateEstimator`] counts events per [`EventKind`] over a trailing window
//! and reports events per second. Ingestion records sample arrivals, the
//! render loop records completed frames, and status consumers read both.
//!
//! The window advances lazily: expired events are pruned whenever an event
//! is recorded or a rate is read, so there is no background timer.
//!
//! # Startup
//!
//! Until one full window has elapsed since the estimator started (or was
//! reset), rates are divided by the elapsed time so far instead of the full
//! window. A stream that has been running for 200 ms at 1 kHz reports
//! ~1000/s, not ~200/s.

use crate::clock::{Clock, SharedClock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Default trailing window length
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(1);

/// Kind of event being rated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// One ingested sample
    Sample,
    /// One completed render frame
    Frame,
}

impl EventKind {
    fn index(self) -> usize {
        match self {
            EventKind::Sample => 0,
            EventKind::Frame => 1,
        }
    }
}

#[derive(Debug, Default)]
struct EventWindow {
    /// (timestamp, count) buckets, oldest first, timestamps non-decreasing
    buckets: VecDeque<(Duration, u64)>,
    in_window: u64,
    total: u64,
    latest: Duration,
}

impl EventWindow {
    fn record(&mut self, count: u64, timestamp: Duration) {
        // Out-of-order events are clamped to the newest timestamp seen
        let timestamp = timestamp.max(self.latest);
        self.latest = timestamp;

        match self.buckets.back_mut() {
            Some((last, bucket)) if *last == timestamp => *bucket += count,
            _ => self.buckets.push_back((timestamp, count)),
        }
        self.in_window += count;
        self.total += count;
    }

    /// Drop buckets at or before `now - window`
    fn prune(&mut self, now: Duration, window: Duration) {
        while let Some(&(timestamp, count)) = self.buckets.front() {
            if timestamp + window > now {
                break;
            }
            self.buckets.pop_front();
            self.in_window -= count;
        }
    }
}

#[derive(Debug)]
struct Inner {
    started_at: Duration,
    windows: [EventWindow; 2],
}

/// Thread-safe trailing-window rate calculator
pub struct RateEstimator {
    clock: SharedClock,
    window: Duration,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for RateEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateEstimator")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl RateEstimator {
    /// Create an estimator with the given trailing window, started now
    pub fn new(clock: SharedClock, window: Duration) -> Self {
        let window = if window.is_zero() {
            DEFAULT_RATE_WINDOW
        } else {
            window
        };
        let started_at = clock.now();

        Self {
            clock,
            window,
            inner: Mutex::new(Inner {
                started_at,
                windows: Default::default(),
            }),
        }
    }

    /// Trailing window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Current time on the estimator's clock
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Record one event of `kind` at `timestamp`
    pub fn record_event(&self, kind: EventKind, timestamp: Duration) {
        self.record_events(kind, 1, timestamp);
    }

    /// Record `count` events of `kind` at `timestamp`
    pub fn record_events(&self, kind: EventKind, count: u64, timestamp: Duration) {
        if count == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let window = &mut inner.windows[kind.index()];
        window.record(count, timestamp);
        let latest = window.latest;
        window.prune(latest, self.window);
    }

    /// Events of `kind` per second over the trailing window
    pub fn rate(&self, kind: EventKind) -> f64 {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = now.saturating_sub(inner.started_at);
        let window = &mut inner.windows[kind.index()];
        window.prune(now, self.window);

        let span = elapsed.min(self.window);
        if span.is_zero() {
            return 0.0;
        }
        window.in_window as f64 / span.as_secs_f64()
    }

    /// Events of `kind` currently inside the trailing window
    pub fn count(&self, kind: EventKind) -> u64 {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let window = &mut inner.windows[kind.index()];
        window.prune(now, self.window);
        window.in_window
    }

    /// Events of `kind` recorded since start or the last reset
    pub fn total(&self, kind: EventKind) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.windows[kind.index()].total
    }

    /// Forget all events and restart the startup period from now
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.started_at = now;
        inner.windows = Default::default();
    }
}
