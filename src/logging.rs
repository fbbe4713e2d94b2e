//! Log output setup
//!
//! Installs a `tracing` subscriber with an `EnvFilter` and a formatted
//! stderr layer, plus a daily rolling file layer when the config names a
//! log file. `RUST_LOG` overrides the configured filter.

use crate::config::LoggingConfig;
use crate::error::{LivescopeError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Pick the active filter: `RUST_LOG` if set and valid, else the configured one
pub fn resolve_filter(env: Option<&str>, configured: &str) -> Result<EnvFilter> {
    if let Some(directive) = env.filter(|d| !d.trim().is_empty()) {
        match EnvFilter::try_new(directive) {
            Ok(filter) => return Ok(filter),
            Err(e) => eprintln!("Ignoring invalid RUST_LOG ({}), using config filter", e),
        }
    }

    EnvFilter::try_new(configured).map_err(|e| {
        LivescopeError::Config(format!("Invalid logging.filter {:?}: {}", configured, e))
    })
}

/// Split a log file path into the appender's directory and file prefix
fn split_log_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr)> {
    let file_name = path.file_name().ok_or_else(|| {
        LivescopeError::Config(format!("logging.file {:?} has no file name", path))
    })?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir, file_name))
}

/// Install the global subscriber
///
/// Keep the returned guard alive for as long as the file log should be
/// written; dropping it flushes and stops the background writer.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = resolve_filter(env.as_deref(), &config.filter)?;

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let (dir, prefix) = split_log_path(path)?;
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| LivescopeError::Config(format!("Failed to install logger: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_env_overrides_config() {
        let filter = resolve_filter(Some("warn"), "debug").unwrap();
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn test_blank_env_uses_config() {
        let filter = resolve_filter(Some("  "), "info,livescope=debug").unwrap();
        assert!(filter.to_string().contains("livescope=debug"));
    }

    #[test]
    fn test_invalid_config_filter_rejected() {
        assert!(resolve_filter(None, "livescope=notalevel").is_err());
    }

    #[test]
    fn test_split_log_path() {
        let path = PathBuf::from("/var/log/livescope/session.log");
        let (dir, prefix) = split_log_path(&path).unwrap();
        assert_eq!(dir, Path::new("/var/log/livescope"));
        assert_eq!(prefix, "session.log");

        let bare = PathBuf::from("session.log");
        assert_eq!(split_log_path(&bare).unwrap().0, Path::new("."));
    }
}
