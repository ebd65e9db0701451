//! Error handling for dkr-reload
//!
//! This module defines the error taxonomy of the reload engine and a Result
//! alias for use throughout the crate. Only [`ReloadError::TransportSpawn`] is
//! fatal; every other variant is absorbed by the backend into status text,
//! logging or automatic recovery.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for dkr-reload operations
#[derive(Error, Debug)]
pub enum ReloadError {
    /// The loader executable is missing
    #[error("Failed to start loader {program:?}: {reason}")]
    TransportSpawn { program: PathBuf, reason: String },

    /// The loader exists but this launch failed (pty, thread or exec error)
    #[error("Loader launch failed: {0}")]
    TransportStart(String),

    /// The loader process died or closed its output stream
    #[error("Transport lost")]
    TransportLost,

    /// Writing to the loader's input failed
    #[error("Transport write failed: {0}")]
    TransportWrite(#[source] std::io::Error),

    /// A write was requested while no loader process is running
    #[error("No transport is connected")]
    NoTransport,

    /// The output buffer's repeat counter could not be parsed
    #[error("Malformed counter state: {0:?}")]
    MalformedCounterState(String),

    /// Errors related to configuration loading
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shell stopped listening for backend messages
    #[error("Channel error: {0}")]
    Channel(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ReloadError>,
    },
}

impl ReloadError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ReloadError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error must halt the application instead of being recovered
    pub fn is_fatal(&self) -> bool {
        match self {
            ReloadError::TransportSpawn { .. } => true,
            ReloadError::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

/// Result type alias for dkr-reload operations
pub type Result<T> = std::result::Result<T, ReloadError>;

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
