//! Simulated waveform transport
//!
//! Generates samples on a background thread and delivers them as
//! `{"seq": N, "samples": [...]}` payloads, exactly as a networked producer
//! would. Useful for demos and for exercising the pipeline without a
//! server.
//!
//! # Waveforms
//!
//! - [`Waveform::Sine`] - `offset + amplitude * sin(2π f t)`
//! - [`Waveform::Square`] - alternates between `±amplitude` every half period
//! - [`Waveform::Triangle`] - linear ramp between `±amplitude`
//! - [`Waveform::Sawtooth`] - ramp from 0 to `amplitude`, then reset
//! - [`Waveform::Counter`] - steps by `step`, wrapping within `[min, max]`
//! - [`Waveform::Random`] - uniform values in `[min, max]`
//!
//! Optional noise is added on top of any waveform. `drop_every` skips every
//! Nth batch while still advancing the sequence number, which shows up as
//! gaps downstream.

use super::{EventSink, Transport};
use crate::error::{LivescopeError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shape of the generated signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Waveform {
    Sine {
        frequency_hz: f64,
        amplitude: f64,
        offset: f64,
    },
    Square { period_s: f64, amplitude: f64 },
    Triangle { period_s: f64, amplitude: f64 },
    Sawtooth { period_s: f64, amplitude: f64 },
    Counter { step: f64, min: f64, max: f64 },
    Random { min: f64, max: f64 },
}

impl Default for Waveform {
    fn default() -> Self {
        Waveform::Sine {
            frequency_hz: 1.0,
            amplitude: 1.0,
            offset: 0.0,
        }
    }
}

/// Simulated producer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    pub waveform: Waveform,
    /// Samples generated per second
    pub sample_rate_hz: u32,
    /// Samples per payload
    pub batch_size: usize,
    /// Peak noise added to each sample (0 = none)
    pub noise_amplitude: f64,
    /// Skip every Nth batch to simulate loss
    pub drop_every: Option<u64>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            waveform: Waveform::default(),
            sample_rate_hz: 1_000,
            batch_size: 50,
            noise_amplitude: 0.0,
            drop_every: None,
        }
    }
}

/// Stateful sample generator
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    waveform: Waveform,
    noise_amplitude: f64,
    counter_value: f64,
    rng_state: u64,
}

impl SignalGenerator {
    pub fn new(waveform: Waveform, noise_amplitude: f64) -> Self {
        let counter_value = match waveform {
            Waveform::Counter { min, .. } => min,
            _ => 0.0,
        };
        Self {
            waveform,
            noise_amplitude,
            counter_value,
            rng_state: 0x2545_f491_4f6c_dd1d,
        }
    }

    /// xorshift64, uniform in [0, 1]
    fn next_random(&mut self) -> f64 {
        let mut s = self.rng_state;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.rng_state = s;
        s as f64 / u64::MAX as f64
    }

    /// Value at `elapsed_secs` since generation started
    pub fn value_at(&mut self, elapsed_secs: f64) -> f64 {
        let base = match self.waveform {
            Waveform::Sine {
                frequency_hz,
                amplitude,
                offset,
            } => offset + amplitude * (std::f64::consts::TAU * frequency_hz * elapsed_secs).sin(),
            Waveform::Square {
                period_s,
                amplitude,
            } => {
                if elapsed_secs % period_s < period_s / 2.0 {
                    amplitude
                } else {
                    -amplitude
                }
            }
            Waveform::Triangle {
                period_s,
                amplitude,
            } => {
                let t = elapsed_secs % period_s;
                let half = period_s / 2.0;
                if t < half {
                    amplitude * (2.0 * t / half - 1.0)
                } else {
                    amplitude * (1.0 - 2.0 * (t - half) / half)
                }
            }
            Waveform::Sawtooth {
                period_s,
                amplitude,
            } => amplitude * ((elapsed_secs % period_s) / period_s),
            Waveform::Counter { step, min, max } => {
                let value = self.counter_value;
                self.counter_value += step;
                if self.counter_value > max {
                    self.counter_value = min;
                } else if self.counter_value < min {
                    self.counter_value = max;
                }
                value
            }
            Waveform::Random { min, max } => min + self.next_random() * (max - min),
        };

        if self.noise_amplitude > 0.0 {
            base + (self.next_random() - 0.5) * 2.0 * self.noise_amplitude
        } else {
            base
        }
    }
}

/// Transport backed by a generator thread
pub struct SimulatedTransport {
    config: SimulatedConfig,
    stop: Option<Arc<AtomicBool>>,
}

impl SimulatedTransport {
    pub fn new(config: SimulatedConfig) -> Self {
        Self { config, stop: None }
    }
}

impl Transport for SimulatedTransport {
    fn open(&mut self, sink: EventSink) -> Result<()> {
        self.close();

        if self.config.sample_rate_hz == 0 || self.config.batch_size == 0 {
            return Err(LivescopeError::Config(
                "Simulated transport needs a non-zero sample rate and batch size".to_string(),
            ));
        }

        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Some(Arc::clone(&stop));
        let config = self.config.clone();

        std::thread::Builder::new()
            .name(format!("livescope-sim-{}", sink.generation()))
            .spawn(move || generate(config, &stop, &sink))
            .map_err(|e| LivescopeError::Transport(format!("Failed to spawn generator: {}", e)))?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
    }

    fn describe(&self) -> String {
        format!(
            "simulated ({} Hz, {} samples/batch)",
            self.config.sample_rate_hz, self.config.batch_size
        )
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn generate(config: SimulatedConfig, stop: &AtomicBool, sink: &EventSink) {
    if !sink.opened() {
        return;
    }

    let mut generator = SignalGenerator::new(config.waveform, config.noise_amplitude);
    let sample_period = 1.0 / config.sample_rate_hz as f64;
    let batch_interval = Duration::from_secs_f64(sample_period * config.batch_size as f64);
    let started = Instant::now();
    let mut next_batch = started + batch_interval;
    let mut seq = 0u64;
    let mut batch_index = 0u64;

    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if next_batch > now {
            std::thread::sleep(next_batch - now);
        }
        next_batch += batch_interval;
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let samples: Vec<f64> = (0..config.batch_size as u64)
            .map(|i| generator.value_at((seq + i) as f64 * sample_period))
            .collect();
        let first = seq;
        seq += samples.len() as u64;
        batch_index += 1;

        if config.drop_every.is_some_and(|n| n > 0 && batch_index % n == 0) {
            tracing::trace!("Simulated loss of batch at seq {}", first);
            continue;
        }

        let payload = serde_json::json!({ "seq": first, "samples": samples });
        if !sink.batch(payload.to_string()) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parse_payload;
    use crate::session::SessionMessage;
    use crate::transport::{StampedEvent, TransportEvent};
    use crossbeam_channel::unbounded;

    #[test]
    fn test_square_wave() {
        let mut gen = SignalGenerator::new(
            Waveform::Square {
                period_s: 1.0,
                amplitude: 2.0,
            },
            0.0,
        );
        assert_eq!(gen.value_at(0.1), 2.0);
        assert_eq!(gen.value_at(0.6), -2.0);
    }

    #[test]
    fn test_triangle_wave_peaks() {
        let mut gen = SignalGenerator::new(
            Waveform::Triangle {
                period_s: 2.0,
                amplitude: 1.0,
            },
            0.0,
        );
        assert!((gen.value_at(0.0) + 1.0).abs() < 1e-9);
        assert!((gen.value_at(1.0) - 1.0).abs() < 1e-9);
        assert!((gen.value_at(0.5) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_counter_wraps() {
        let mut gen = SignalGenerator::new(
            Waveform::Counter {
                step: 1.0,
                min: 0.0,
                max: 2.0,
            },
            0.0,
        );
        let values: Vec<f64> = (0..5).map(|_| gen.value_at(0.0)).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_noise_stays_bounded() {
        let mut gen = SignalGenerator::new(
            Waveform::Sine {
                frequency_hz: 0.0,
                amplitude: 0.0,
                offset: 10.0,
            },
            0.5,
        );
        for i in 0..1000 {
            let v = gen.value_at(i as f64);
            assert!((9.5..=10.5).contains(&v));
        }
    }

    #[test]
    fn test_generates_parseable_indexed_batches() {
        let mut transport = SimulatedTransport::new(SimulatedConfig {
            sample_rate_hz: 10_000,
            batch_size: 10,
            drop_every: Some(2),
            ..Default::default()
        });
        let (tx, rx) = unbounded();
        transport.open(EventSink::new(1, tx)).unwrap();

        let mut payloads = Vec::new();
        while payloads.len() < 3 {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                SessionMessage::Transport(StampedEvent {
                    event: TransportEvent::BatchReceived(payload),
                    ..
                }) => payloads.push(payload),
                _ => {}
            }
        }
        transport.close();

        let seqs: Vec<Option<u64>> = payloads
            .iter()
            .map(|p| parse_payload(p, 100).unwrap().upstream_seq)
            .collect();
        // Every second batch is dropped
        assert_eq!(seqs, vec![Some(0), Some(20), Some(40)]);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let mut transport = SimulatedTransport::new(SimulatedConfig {
            sample_rate_hz: 0,
            ..Default::default()
        });
        let (tx, _rx) = unbounded();
        assert!(transport.open(EventSink::new(1, tx)).is_err());
    }

    #[test]
    fn test_waveform_toml_shape() {
        let config: SimulatedConfig = toml::from_str(
            r#"
            sample_rate_hz = 500
            [waveform]
            shape = "square"
            period_s = 0.5
            amplitude = 3.0
            "#,
        )
        .unwrap();
        assert_eq!(config.sample_rate_hz, 500);
        assert_eq!(
            config.waveform,
            Waveform::Square {
                period_s: 0.5,
                amplitude: 3.0
            }
        );
    }
}
