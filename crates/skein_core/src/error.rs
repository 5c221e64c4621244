//! # Core Error Types
//!
//! Errors raised by the scheduler and by configuration loading.

use thiserror::Error;

/// Errors surfaced by the task executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A task panicked. Reported at the next sync after the panic.
    #[error("task panicked on thread {thread}: {message}")]
    TaskPanicked {
        /// Name of the thread the task ran on.
        thread: String,
        /// The panic message.
        message: String,
    },

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that was read.
        path: String,
        /// The underlying I/O error.
        message: String,
    },

    /// The configuration is not valid TOML for this schema.
    #[error("invalid configuration syntax: {0}")]
    Parse(String),

    /// A field holds a value outside its allowed range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// The offending key.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
