//! Integration tests for configuration files

mod common;

use livescope::config::{PipelineConfig, TransportConfig};
use livescope::supervisor::BackoffPolicy;
use livescope::transport::{TcpConfig, Waveform};
use livescope::StreamSession;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = PipelineConfig::default();
    config.buffer.capacity = 2_048;
    config.render.max_fps = 30;
    config.reconnect.max_attempts = 9;
    config.reconnect.backoff = BackoffPolicy::Fixed { delay_ms: 500 };
    config.transport = TransportConfig::Tcp(TcpConfig {
        address: "192.168.1.20:9000".to_string(),
        ..Default::default()
    });

    config.save(&path).unwrap();
    assert!(path.exists());

    let loaded = PipelineConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_handwritten_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
        [render]
        max_fps = 24

        [reconnect]
        max_attempts = 3
        backoff = { kind = "exponential", initial_ms = 100, max_ms = 800, multiplier = 1.5 }

        [transport]
        kind = "simulated"
        sample_rate_hz = 200
        waveform = { shape = "counter", step = 1.0, min = 0.0, max = 10.0 }
        "#,
    )
    .unwrap();

    let config = PipelineConfig::load(&path).unwrap();
    assert_eq!(config.render.max_fps, 24);
    assert_eq!(config.render.window_samples, 1_024);
    assert_eq!(config.buffer.capacity, 4_096);
    assert_eq!(config.reconnect.max_attempts, 3);
    match config.transport {
        TransportConfig::Simulated(sim) => {
            assert_eq!(sim.sample_rate_hz, 200);
            assert_eq!(sim.batch_size, 50);
            assert!(matches!(sim.waveform, Waveform::Counter { .. }));
        }
        other => panic!("expected simulated transport, got {:?}", other),
    }
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[buffer]\ncapacity = 0\n").unwrap();

    let err = PipelineConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("buffer.capacity"));
}

#[test]
fn test_unparseable_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[render\nmax_fps = ").unwrap();

    assert!(PipelineConfig::load(&path).is_err());
    assert_eq!(PipelineConfig::load_or_default(&path), PipelineConfig::default());
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    assert!(PipelineConfig::load(&path).is_err());
    assert_eq!(PipelineConfig::load_or_default(&path), PipelineConfig::default());
}

#[test]
fn test_session_rejects_invalid_config() {
    let mut config = PipelineConfig::default();
    config.render.max_fps = 0;
    assert!(StreamSession::new(config).is_err());
}
