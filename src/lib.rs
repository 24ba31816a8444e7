//! # Ridewire Client
//!
//! Transport-agnostic Rust client for the Ridewire ride dispatch protocol.
//!
//! This crate provides the client-side protocol engine that connects a
//! passenger or a driver to a dispatch server over a persistent,
//! bidirectional, event-based connection and coordinates the lifecycle of a
//! single ride match: request, offer, accept-or-timeout race, cancellation,
//! and in-progress status transitions.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] and
//!   [`Connector`] traits for any backend
//! - **WebSocket built-in** — default `transport-websocket` feature provides
//!   `WebSocketTransport`/`WebSocketConnector`
//! - **Event-driven** — receive typed [`PassengerEvent`]s/[`DriverEvent`]s
//!   via a channel; no callbacks to wire up
//! - **Flake-tolerant** — automatic reconnection per role policy, duplicate
//!   event suppression, and timers for every deadline
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ridewire_client::{
//!     AuthResolver, DriverClient, DriverEvent, GeoPoint, RidewireConfig, WebSocketConnector,
//! };
//!
//! let connector = WebSocketConnector::new(environment);
//! let auth = AuthResolver::new(token_store, jwt_claims);
//! let (client, mut events) = DriverClient::start(connector, auth, RidewireConfig::new());
//!
//! client.go_online(GeoPoint { latitude: 52.52, longitude: 13.40 }, vec![])?;
//! while let Some(event) = events.recv().await {
//!     if let DriverEvent::OfferReceived { offer } = event {
//!         client.accept_ride(offer.ride_request_id)?;
//!     }
//! }
//! ```

pub mod auth;
pub mod config;
pub mod driver;
pub mod error;
pub mod passenger;
pub mod protocol;
pub mod transport;
pub mod transports;

mod connection;
mod presence;
mod router;
mod scheduler;

// Re-export primary types for ergonomic imports.
pub use auth::{AuthResolver, ClaimExtractor, CredentialProvider, EndpointResolver, Role};
pub use config::RidewireConfig;
pub use connection::{ConnectionState, RetryPolicy};
pub use driver::{DriverClient, DriverEvent, DriverState};
pub use error::RidewireError;
pub use passenger::{PassengerClient, PassengerEvent, PassengerState, RideRequestDraft};
pub use protocol::{
    ClientEvent, DriverInfo, EventFrame, GeoPoint, PassengerInfo, RideOffer, RideSession,
    RideStatus, ServerEvent, Stop,
};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::websocket::{WebSocketConnector, WebSocketTransport};
