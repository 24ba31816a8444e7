//! Transport implementations for the Ridewire dispatch protocol.
//!
//! This module provides concrete [`Transport`](crate::Transport) implementations
//! behind feature gates. Enable the corresponding Cargo feature to pull in
//! a transport:
//!
//! | Feature                | Transport              |
//! |------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] (+ [`WebSocketConnector`](websocket::WebSocketConnector)) |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), ridewire_client::RidewireError> {
//! use ridewire_client::{Transport, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("ws://localhost:4000/ride?userId=7&userType=driver").await?;
//! ws.send(r#"{"event":"driver:goOffline"}"#.to_string()).await?;
//!
//! if let Some(Ok(msg)) = ws.recv().await {
//!     println!("server said: {msg}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
