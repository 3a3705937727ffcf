//! Error types for session control and the matchmaking handoff.

use thiserror::Error;

/// Errors that can occur while driving states, connections or matchmaking.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a wire message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but none is open.
    #[error("not connected to server")]
    NotConnected,

    /// Attempted to pop the last state off the stack.
    #[error("cannot pop the base state off the state stack")]
    StackUnderflow,

    /// A background task was requested outside of a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Opening a connection to an endpoint failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// The matchmaking frontend refused or failed a request.
    #[error("matchmaking error: {0}")]
    Matchmaking(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for handoff operations.
pub type Result<T> = std::result::Result<T, HandoffError>;
