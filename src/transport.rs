//! Transport abstraction for the Ridewire dispatch protocol.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and the dispatch server. The protocol uses JSON text
//! frames, so every transport implementation must handle message framing
//! internally (e.g., WebSocket frames, length-prefixed TCP, QUIC streams).
//!
//! Unlike a one-shot connection, a dispatch client reconnects — possibly many
//! times over a driver's shift — so connection setup lives behind the
//! [`Connector`] factory: the connection manager calls
//! [`Connector::connect`] with a freshly resolved [`AuthContext`] for every
//! attempt, and each attempt yields a brand-new transport (connections are
//! recreated, never reused across attempts).
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use ridewire_client::auth::AuthContext;
//! use ridewire_client::error::RidewireError;
//! use ridewire_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), RidewireError> {
//!         // Send the JSON text frame over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, RidewireError>> {
//!         // Receive the next JSON text frame
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), RidewireError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector { /* endpoint, TLS config, ... */ }
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(&self, auth: &AuthContext) -> Result<Box<dyn Transport>, RidewireError> {
//!         // Open a connection carrying {userId, userType} handshake data
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::auth::AuthContext;
use crate::error::RidewireError;

/// A bidirectional text message transport for the Ridewire dispatch protocol.
///
/// Implementors shuttle serialized JSON frames between the client and server.
/// Each call to [`send`](Transport::send) transmits one complete frame; each
/// call to [`recv`](Transport::recv) returns one complete frame.
///
/// # Object Safety
///
/// This trait is object-safe; the connection manager drives transports as
/// `Box<dyn Transport>` so one client type works over any backend.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// used inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data. Channel-based implementations (e.g.,
/// wrapping `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::TransportSend`] if the frame could not be
    /// sent (e.g., connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), RidewireError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete frame was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, RidewireError>>;

    /// Close the transport connection gracefully.
    ///
    /// After calling this method, subsequent calls to [`send`](Transport::send)
    /// and [`recv`](Transport::recv) may return errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), RidewireError>;
}

/// A factory that opens one transport per connect attempt.
///
/// Called on the initial connect and again after every disconnect the retry
/// policy decides to recover from. The [`AuthContext`] is resolved fresh for
/// each attempt; implementations must pass `{userId, userType}` as
/// handshake-time authentication data (not as a post-connect message) so the
/// server can reject unauthenticated sockets before any event is processed.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a new connection authenticated as `auth`.
    ///
    /// # Errors
    ///
    /// Any [`RidewireError`] — the connection manager counts the failure
    /// against the role's retry policy.
    async fn connect(&self, auth: &AuthContext) -> Result<Box<dyn Transport>, RidewireError>;
}
