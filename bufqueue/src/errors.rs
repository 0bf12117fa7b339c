use std::collections::TryReserveError;
use std::{fmt, io};

use thiserror::Error;

/// Reason a queue could not be brought up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("failed to reserve room for {count} nodes: {source}")]
    Storage {
        count: usize,
        #[source]
        source: TryReserveError,
    },
    #[error("failed to allocate buffer {index} of {size} bytes: {source}")]
    Buffer {
        index: usize,
        size: usize,
        #[source]
        source: TryReserveError,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PopError {
    /// Nothing arrived before the deadline. Expected; callers use it to retry or to stop.
    #[error("no node became available before the timeout")]
    Timeout,
    #[error("queue is disabled: {0}")]
    Disabled(InitError),
}

impl PopError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PopError::Timeout)
    }
}

/// Returned by a push on a disabled queue. The rejected node is handed back.
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushError(..)")
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("push on a disabled queue")
    }
}

impl<T> std::error::Error for PushError<T> {}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("external source failed with code {0}")]
    Failed(i32),
    #[error("external source reported {filled} bytes for a buffer of {capacity}")]
    Overrun { filled: usize, capacity: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] confy::ConfyError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{queue} queue failed to initialize: {source}")]
    QueueInit {
        queue: &'static str,
        #[source]
        source: InitError,
    },
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} panicked")]
    WorkerPanicked(String),
    #[error("signal handling error: {0}")]
    SignalHook(#[source] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
