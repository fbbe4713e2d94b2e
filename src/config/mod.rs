//! Configuration module for livescope
//!
//! A [`PipelineConfig`] describes one streaming session: buffer sizing,
//! render cadence, rate window, reconnect policy, transport and logging.
//! It is stored as TOML; every section has defaults, so a config file only
//! needs the values it changes.
//!
//! # Config Location
//!
//! The default file lives in the platform config directory:
//! - **Linux**: `~/.config/livescope/config.toml`
//! - **macOS**: `~/Library/Application Support/livescope/config.toml`
//! - **Windows**: `%APPDATA%\livescope\config.toml`
//!
//! # Example
//!
//! ```toml
//! [buffer]
//! capacity = 8192
//!
//! [render]
//! max_fps = 30
//!
//! [reconnect]
//! max_attempts = 10
//! backoff = { kind = "fixed", delay_ms = 500 }
//!
//! [transport]
//! kind = "tcp"
//! address = "10.0.0.5:7878"
//! ```

use crate::error::{LivescopeError, Result};
use crate::supervisor::{BackoffPolicy, ReconnectPolicy};
use crate::transport::{SimulatedConfig, TcpConfig, Waveform};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application directory name under the platform config dir
pub const APP_DIR: &str = "livescope";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Highest accepted render cadence
pub const MAX_FPS_LIMIT: u32 = 1_000;

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
}

/// Sample buffer sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum samples held
    pub capacity: usize,
    /// Largest batch accepted from the transport
    pub max_batch_samples: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 4_096,
            max_batch_samples: crate::ingest::DEFAULT_MAX_BATCH_SAMPLES,
        }
    }
}

/// Render cadence and window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Frame cap
    pub max_fps: u32,
    /// Most recent samples handed to each frame
    pub window_samples: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_fps: 60,
            window_samples: 1_024,
        }
    }
}

impl RenderConfig {
    /// Time between ticks
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.max_fps.max(1) as f64)
    }
}

/// Rate estimation window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    pub window_ms: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self { window_ms: 1_000 }
    }
}

impl RateConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Where samples come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Newline-delimited payloads over TCP
    Tcp(TcpConfig),
    /// Generated waveform
    Simulated(SimulatedConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Simulated(SimulatedConfig::default())
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub filter: String,
    /// Also write a daily rolling log file at this path
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,livescope=debug".to_string(),
            file: None,
        }
    }
}

/// Complete session configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub buffer: BufferConfig,
    pub render: RenderConfig,
    pub rate: RateConfig,
    pub reconnect: ReconnectPolicy,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LivescopeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            LivescopeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, falling back to defaults if it is missing or invalid
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LivescopeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| LivescopeError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            LivescopeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(LivescopeError::Config(msg.to_string()));

        if self.buffer.capacity == 0 {
            return fail("buffer.capacity must be at least 1");
        }
        if self.buffer.max_batch_samples == 0 {
            return fail("buffer.max_batch_samples must be at least 1");
        }
        if self.render.max_fps == 0 || self.render.max_fps > MAX_FPS_LIMIT {
            return Err(LivescopeError::Config(format!(
                "render.max_fps must be between 1 and {}",
                MAX_FPS_LIMIT
            )));
        }
        if self.render.window_samples == 0 {
            return fail("render.window_samples must be at least 1");
        }
        if self.rate.window_ms == 0 {
            return fail("rate.window_ms must be at least 1");
        }

        if let BackoffPolicy::Exponential {
            initial_ms,
            max_ms,
            multiplier,
        } = self.reconnect.backoff
        {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return fail("reconnect.backoff.multiplier must be at least 1.0");
            }
            if initial_ms > max_ms {
                return fail("reconnect.backoff.initial_ms must not exceed max_ms");
            }
        }

        match &self.transport {
            TransportConfig::Tcp(tcp) if tcp.address.trim().is_empty() => {
                fail("transport.address must not be empty")
            }
            TransportConfig::Simulated(sim) if sim.sample_rate_hz == 0 || sim.batch_size == 0 => {
                fail("transport.sample_rate_hz and transport.batch_size must be at least 1")
            }
            TransportConfig::Simulated(sim) if sim.batch_size > self.buffer.max_batch_samples => {
                fail("transport.batch_size must not exceed buffer.max_batch_samples")
            }
            TransportConfig::Simulated(sim) => match sim.waveform {
                Waveform::Square { period_s, .. }
                | Waveform::Triangle { period_s, .. }
                | Waveform::Sawtooth { period_s, .. }
                    if !(period_s.is_finite() && period_s > 0.0) =>
                {
                    fail("transport.waveform.period_s must be a positive number")
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}
