//! Runner error types.

use thiserror::Error;

/// Errors from process supervision.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{id}: can't start process: {reason}")]
    Spawn { id: String, reason: String },

    #[error("{0}: process not running")]
    NotRunning(String),
}

/// Convenience alias for supervisor results.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Errors from virtual interface control.
#[derive(Debug, Error)]
pub enum NetifError {
    #[error("failed to run `{command}`: {reason}")]
    Exec { command: String, reason: String },

    #[error("`{command}` failed: {output}")]
    Failed { command: String, output: String },
}

/// Convenience alias for interface control results.
pub type NetifResult<T> = Result<T, NetifError>;

/// Errors from the discovery and link-state event sources.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited: {status}")]
    Exited { program: String, status: String },

    #[error("I/O error reading {program}: {reason}")]
    Io { program: String, reason: String },
}

/// Convenience alias for event source results.
pub type SourceResult<T> = Result<T, SourceError>;
