//! Error handling for livescope
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the pipeline.

use thiserror::Error;

/// Main error type for livescope operations
#[derive(Error, Debug)]
pub enum LivescopeError {
    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by a transport (connect, read, close)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A payload could not be parsed into a sample batch
    #[error("Payload error: {0}")]
    Payload(String),

    /// A render callback failed
    #[error("Render error: {0}")]
    Render(String),

    /// Errors related to session lifecycle (threads, channels)
    #[error("Session error: {0}")]
    Session(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<LivescopeError>,
    },
}

impl LivescopeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        LivescopeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error came from the transport layer (directly or wrapped)
    pub fn is_transport(&self) -> bool {
        match self {
            LivescopeError::Transport(_) | LivescopeError::Timeout(_) | LivescopeError::Io(_) => {
                true
            }
            LivescopeError::WithContext { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

impl From<toml::de::Error> for LivescopeError {
    fn from(err: toml::de::Error) -> Self {
        LivescopeError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for LivescopeError {
    fn from(err: toml::ser::Error) -> Self {
        LivescopeError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LivescopeError {
    fn from(err: serde_json::Error) -> Self {
        LivescopeError::Serialization(err.to_string())
    }
}

/// Result type alias for livescope operations
pub type Result<T> = std::result::Result<T, LivescopeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| LivescopeError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| LivescopeError::Io(e).with_context(f()))
    }
}
