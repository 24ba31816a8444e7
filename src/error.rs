//! Error types for the Ridewire client.

use thiserror::Error;

/// Errors that can occur when using the Ridewire client.
#[derive(Debug, Error)]
pub enum RidewireError {
    /// No usable credential: the token store is empty or the token does not
    /// yield a user id. Fatal to the connect attempt, never retried.
    #[error("could not resolve credentials: {0}")]
    AuthResolution(String),

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// An inbound frame or payload did not have the expected shape.
    /// The offending event is dropped; other in-flight state is unaffected.
    #[error("decode error: {0}")]
    Decode(String),

    /// Failed to serialize an outbound protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but the
    /// client is not connected. Emits against a non-connected link are
    /// no-ops surfaced through this variant.
    #[error("not connected to dispatch server")]
    NotConnected,

    /// The connection retry bound was exhausted without reaching the server.
    #[error("dispatch server unavailable")]
    ConnectionUnavailable,

    /// The server explicitly rejected a command (`success: false` or an
    /// `error` event).
    #[error("server rejection: {message}")]
    ServerRejection {
        /// Human-readable message from the server, passed through verbatim.
        message: String,
    },

    /// No acknowledgement arrived within the bound. Treated identically to a
    /// negative acknowledgement, with a distinct message for the caller.
    #[error("request timed out")]
    AckTimeout,

    /// An operation was attempted from a state that does not allow it
    /// (e.g. accepting a ride with no active offer). Rejected locally,
    /// never sent to the server.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The client handle has been shut down; the actor task is gone.
    #[error("client closed")]
    ClientClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Ridewire client operations.
pub type Result<T> = std::result::Result<T, RidewireError>;
