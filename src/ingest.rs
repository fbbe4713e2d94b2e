//! Batch ingestion
//!
//! [`StreamIngestor`] turns raw transport payloads into [`Sample`]s and
//! appends them to the shared [`SampleBuffer`]. It is driven from the
//! session worker only, so sequence assignment needs no locking; the
//! counters it updates are atomics shared with the status boundary.
//!
//! # Payload Encodings
//!
//! Payloads are UTF-8 text. Surrounding whitespace is ignored.
//!
//! | Form        | Example                                  |
//! |-------------|------------------------------------------|
//! | JSON array  | `[0.1, 0.2, 0.3]`                        |
//! | JSON object | `{"seq": 1200, "samples": [0.1, 0.2]}`   |
//! | Plain text  | `0.1, 0.2 0.3`                           |
//!
//! An empty payload is a valid zero-sample batch. Non-finite values,
//! non-numeric tokens and oversized batches reject the whole batch.
//!
//! # Upstream Sequence Numbers
//!
//! The optional `seq` of the object form is the producer's index of the
//! first sample. A `seq` ahead of the expected index is a gap: the jump is
//! carried into the assigned sequence numbers and counted. A `seq` behind
//! it is a replay and the batch is rejected as stale.

use crate::buffer::SampleBuffer;
use crate::error::{LivescopeError, Result};
use crate::rate::{EventKind, RateEstimator};
use crate::types::{IngestStats, Sample};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default cap on samples per batch
pub const DEFAULT_MAX_BATCH_SAMPLES: usize = 8192;

/// A payload decoded into values, before sequence numbers are assigned
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBatch {
    /// Upstream index of the first value, if the producer sent one
    pub upstream_seq: Option<u64>,
    /// Values in arrival order
    pub values: Vec<f64>,
}

#[derive(Deserialize)]
struct ObjectPayload {
    #[serde(default)]
    seq: Option<u64>,
    samples: Vec<f64>,
}

/// Decode a raw payload
pub fn parse_payload(raw: &[u8], max_batch_samples: usize) -> Result<ParsedBatch> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| LivescopeError::Payload(format!("Payload is not UTF-8: {}", e)))?
        .trim();

    let batch = if text.is_empty() {
        ParsedBatch::default()
    } else if text.starts_with('[') {
        let values: Vec<f64> = serde_json::from_str(text)
            .map_err(|e| LivescopeError::Payload(format!("Invalid JSON array: {}", e)))?;
        ParsedBatch {
            upstream_seq: None,
            values,
        }
    } else if text.starts_with('{') {
        let object: ObjectPayload = serde_json::from_str(text)
            .map_err(|e| LivescopeError::Payload(format!("Invalid JSON object: {}", e)))?;
        ParsedBatch {
            upstream_seq: object.seq,
            values: object.samples,
        }
    } else {
        ParsedBatch {
            upstream_seq: None,
            values: parse_plain(text)?,
        }
    };

    if batch.values.len() > max_batch_samples {
        return Err(LivescopeError::Payload(format!(
            "Batch of {} samples exceeds limit of {}",
            batch.values.len(),
            max_batch_samples
        )));
    }
    if let Some(index) = batch.values.iter().position(|v| !v.is_finite()) {
        return Err(LivescopeError::Payload(format!(
            "Non-finite value at index {}",
            index
        )));
    }

    Ok(batch)
}

fn parse_plain(text: &str) -> Result<Vec<f64>> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| LivescopeError::Payload(format!("Not a number: {:?}", token)))
        })
        .collect()
}

/// Ingestion counters, shared between the ingestor and status readers
#[derive(Debug, Default)]
pub struct IngestCounters {
    accepted_batches: AtomicU64,
    accepted_samples: AtomicU64,
    rejected_batches: AtomicU64,
    stale_batches: AtomicU64,
    gap_count: AtomicU64,
    missing_samples: AtomicU64,
    ignored_batches: AtomicU64,
}

impl IngestCounters {
    /// Count a batch that arrived while the session was not accepting data
    pub fn record_ignored(&self) {
        self.ignored_batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in [
            &self.accepted_batches,
            &self.accepted_samples,
            &self.rejected_batches,
            &self.stale_batches,
            &self.gap_count,
            &self.missing_samples,
            &self.ignored_batches,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> IngestStats {
        IngestStats {
            accepted_batches: self.accepted_batches.load(Ordering::Relaxed),
            accepted_samples: self.accepted_samples.load(Ordering::Relaxed),
            rejected_batches: self.rejected_batches.load(Ordering::Relaxed),
            stale_batches: self.stale_batches.load(Ordering::Relaxed),
            gap_count: self.gap_count.load(Ordering::Relaxed),
            missing_samples: self.missing_samples.load(Ordering::Relaxed),
            ignored_batches: self.ignored_batches.load(Ordering::Relaxed),
        }
    }
}

/// Result of an accepted batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// Samples appended
    pub count: usize,
    /// Sequence number of the first appended sample (next expected if empty)
    pub first_seq: u64,
    /// Samples missing before this batch, if a gap was detected
    pub missing: Option<u64>,
}

/// Validates payloads and appends them to the buffer
#[derive(Debug)]
pub struct StreamIngestor {
    buffer: Arc<SampleBuffer>,
    rates: Arc<RateEstimator>,
    counters: Arc<IngestCounters>,
    max_batch_samples: usize,
    /// Next sequence number to assign
    next_seq: u64,
    /// Next upstream index expected, once the producer has sent one
    upstream_expected: Option<u64>,
}

impl StreamIngestor {
    /// Create an ingestor feeding `buffer` and `rates`
    pub fn new(
        buffer: Arc<SampleBuffer>,
        rates: Arc<RateEstimator>,
        counters: Arc<IngestCounters>,
        max_batch_samples: usize,
    ) -> Self {
        Self {
            buffer,
            rates,
            counters,
            max_batch_samples: max_batch_samples.max(1),
            next_seq: 0,
            upstream_expected: None,
        }
    }

    /// Shared counters
    pub fn counters(&self) -> &Arc<IngestCounters> {
        &self.counters
    }

    /// Next sequence number that will be assigned
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Forget the producer's upstream index
    ///
    /// Called when a new connection opens: the producer may restart its
    /// numbering, and the first indexed batch after this re-anchors without
    /// counting a gap. Assigned sequence numbers keep increasing.
    pub fn resync(&mut self) {
        self.upstream_expected = None;
    }

    /// Sequence positions after a batch of `count` samples
    ///
    /// Returns the next expected upstream index, the first assigned sequence
    /// number and the next one to assign, or `None` if any would overflow.
    fn advance(
        &self,
        upstream_seq: Option<u64>,
        jump: u64,
        count: u64,
    ) -> Option<(Option<u64>, u64, u64)> {
        let upstream_expected = match upstream_seq.or(self.upstream_expected) {
            Some(base) => Some(base.checked_add(count)?),
            None => None,
        };
        let first_seq = self.next_seq.checked_add(jump)?;
        let next_seq = first_seq.checked_add(count)?;
        Some((upstream_expected, first_seq, next_seq))
    }

    /// Parse, validate and append one payload
    ///
    /// A rejected batch leaves the buffer and the rate estimator untouched;
    /// only the rejection counters move.
    pub fn on_batch(&mut self, raw: &[u8], now: Duration) -> Result<Accepted> {
        let batch = match parse_payload(raw, self.max_batch_samples) {
            Ok(batch) => batch,
            Err(e) => {
                self.counters.rejected_batches.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Rejected batch: {}", e);
                return Err(e);
            }
        };

        let count = batch.values.len();
        let mut jump = 0;

        if let (Some(seq), Some(expected)) = (batch.upstream_seq, self.upstream_expected) {
            if seq < expected {
                self.counters.rejected_batches.fetch_add(1, Ordering::Relaxed);
                self.counters.stale_batches.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Rejected stale batch: seq {} < expected {}", seq, expected);
                return Err(LivescopeError::Payload(format!(
                    "Stale batch: seq {} is behind expected {}",
                    seq, expected
                )));
            }
            jump = seq - expected;
        }

        let (upstream_expected, first_seq, next_seq) =
            match self.advance(batch.upstream_seq, jump, count as u64) {
                Some(positions) => positions,
                None => {
                    self.counters.rejected_batches.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Rejected batch: sequence number overflow");
                    return Err(LivescopeError::Payload(
                        "Sequence number overflow".to_string(),
                    ));
                }
            };

        let missing = if jump > 0 {
            self.counters.gap_count.fetch_add(1, Ordering::Relaxed);
            self.counters.missing_samples.fetch_add(jump, Ordering::Relaxed);
            tracing::debug!("Sequence gap: {} samples missing", jump);
            Some(jump)
        } else {
            None
        };

        self.upstream_expected = upstream_expected;
        self.next_seq = next_seq;

        let samples: Vec<Sample> = batch
            .values
            .iter()
            .enumerate()
            .map(|(i, &value)| Sample::new(first_seq + i as u64, value, now))
            .collect();

        self.buffer.append(&samples);
        self.rates.record_events(EventKind::Sample, count as u64, now);

        self.counters.accepted_batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .accepted_samples
            .fetch_add(count as u64, Ordering::Relaxed);
        tracing::trace!("Accepted batch of {} samples (first seq {})", count, first_seq);

        Ok(Accepted {
            count,
            first_seq,
            missing,
        })
    }
}
