//! Structured error types for fleetprof
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Failed to enumerate processes: {0}")]
    DiscoveryFailed(String),

    #[error("Failed to spawn {command}: {error}")]
    SpawnFailed { command: String, error: String },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed { command: String, status: String, stderr: String },

    #[error("Malformed collapsed stack at line {line}: {reason}")]
    MalformedStack { line: usize, reason: String },

    #[error("{source_name} timed out after {timeout_ms}ms")]
    Timeout { source_name: String, timeout_ms: u64 },

    #[error("{0} panicked")]
    TaskPanicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write profile file: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cycle duration must be positive")]
    ZeroCycleDuration,

    #[error("Invalid profiler spec '{0}': expected RUNTIME=COMMAND")]
    InvalidProfilerSpec(String),

    #[error("Unknown runtime in profiler spec: {0}")]
    UnknownRuntime(String),
}
