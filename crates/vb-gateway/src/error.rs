//! Gateway error types.

use thiserror::Error;

/// Errors from the local SocketCAN side.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("cannot open CAN interface {interface}: {reason}")]
    Open { interface: String, reason: String },

    #[error("CAN socket I/O error: {0}")]
    Io(String),

    #[error("CAN socket closed")]
    Closed,
}

impl From<std::io::Error> for BusError {
    fn from(e: std::io::Error) -> Self {
        BusError::Io(e.to_string())
    }
}

/// Convenience alias for local bus results.
pub type BusResult<T> = Result<T, BusError>;

/// Errors reported by the remote device client.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The device cannot accept frames right now (its send queue is full).
    #[error("device temporarily unavailable")]
    TemporarilyUnavailable,

    #[error("no answer from device within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("device rejected request: {0}")]
    Rejected(String),

    #[error("device connection closed")]
    Closed,
}

impl From<std::io::Error> for RemoteError {
    fn from(e: std::io::Error) -> Self {
        RemoteError::Connection(e.to_string())
    }
}

/// Convenience alias for remote device results.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Conditions that end a gateway session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("sample stream silent for {timeout_ms}ms")]
    StreamTimeout { timeout_ms: u64 },

    #[error("sending frames to device failed: {0}")]
    SendFailed(RemoteError),

    #[error("gateway task failed: {0}")]
    Task(String),
}

/// Convenience alias for session results.
pub type SessionResult<T> = Result<T, SessionError>;
