//! Fixed-capacity sample ring buffer
//!
//! [`SampleBuffer`] is the only place raw sample data is stored. Capacity is
//! fixed at construction; once full, each appended sample evicts the oldest
//! one (strict FIFO). Storage is allocated once and indexed by a head
//! position, so appends and evictions are O(1) per sample.
//!
//! # Concurrency
//!
//! The ring lives behind a reader-writer lock. A whole batch is written
//! under one write guard and a snapshot is copied out under one read guard,
//! so a snapshot sees either every sample of a batch or none of them.
//! [`SampleBuffer::len`] reads an atomic mirror and never takes the lock.

use crate::error::{LivescopeError, Result};
use crate::types::{DisplayWindow, Sample};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// Occupancy and lifetime totals for a buffer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferMetrics {
    pub len: usize,
    pub capacity: usize,
    pub total_appended: u64,
    pub total_evicted: u64,
    pub peak_len: usize,
}

#[derive(Debug)]
struct Ring {
    /// Grows to `capacity` once, then is overwritten in place
    storage: Vec<Sample>,
    /// Index of the oldest sample once the ring is full
    head: usize,
    capacity: usize,
    total_appended: u64,
    total_evicted: u64,
    peak_len: usize,
}

impl Ring {
    fn push(&mut self, sample: Sample) {
        if self.storage.len() < self.capacity {
            self.storage.push(sample);
        } else {
            self.storage[self.head] = sample;
            self.head = (self.head + 1) % self.capacity;
            self.total_evicted += 1;
        }
        self.total_appended += 1;
    }

    /// Iterate oldest to newest, skipping the first `skip` samples
    fn iter_from(&self, skip: usize) -> impl Iterator<Item = &Sample> {
        let (older, newer) = if self.storage.len() < self.capacity {
            (&self.storage[..], &[][..])
        } else {
            (&self.storage[self.head..], &self.storage[..self.head])
        };
        older.iter().chain(newer.iter()).skip(skip)
    }
}

/// Bounded, drop-oldest ring buffer of samples
#[derive(Debug)]
pub struct SampleBuffer {
    ring: RwLock<Ring>,
    len: AtomicUsize,
    capacity: usize,
}

impl SampleBuffer {
    /// Create a buffer holding at most `capacity` samples
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(LivescopeError::Config(
                "Sample buffer capacity must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            ring: RwLock::new(Ring {
                storage: Vec::with_capacity(capacity),
                head: 0,
                capacity,
                total_appended: 0,
                total_evicted: 0,
                peak_len: 0,
            }),
            len: AtomicUsize::new(0),
            capacity,
        })
    }

    /// Append a batch in arrival order, evicting the oldest samples as needed
    ///
    /// A batch longer than the capacity keeps only its newest `capacity`
    /// samples; the rest count as evicted.
    pub fn append(&self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }

        let overflow = samples.len().saturating_sub(self.capacity);
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);

        if overflow > 0 {
            ring.total_appended += overflow as u64;
            ring.total_evicted += overflow as u64;
        }
        for sample in &samples[overflow..] {
            ring.push(*sample);
        }

        let len = ring.storage.len();
        ring.peak_len = ring.peak_len.max(len);
        self.len.store(len, Ordering::Release);
    }

    /// Copy out the newest `min(max_count, len)` samples, newest last
    ///
    /// `None` returns everything currently buffered.
    pub fn snapshot(&self, max_count: Option<usize>) -> DisplayWindow {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        let len = ring.storage.len();
        let count = max_count.map_or(len, |max| max.min(len));

        let mut samples = Vec::with_capacity(count);
        samples.extend(ring.iter_from(len - count).copied());
        DisplayWindow::from_vec(samples)
    }

    /// Number of buffered samples
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every buffered sample. Capacity and lifetime totals are kept.
    pub fn clear(&self) {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        ring.storage.clear();
        ring.head = 0;
        self.len.store(0, Ordering::Release);
    }

    /// Get current metrics
    pub fn metrics(&self) -> BufferMetrics {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        BufferMetrics {
            len: ring.storage.len(),
            capacity: self.capacity,
            total_appended: ring.total_appended,
            total_evicted: ring.total_evicted,
            peak_len: ring.peak_len,
        }
    }
}
