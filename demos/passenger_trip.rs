//! # Passenger Trip Example
//!
//! Demonstrates a complete passenger lifecycle:
//!
//! 1. Connect to a dispatch server via WebSocket
//! 2. Request a ride
//! 3. React to dispatch events (acknowledgement, driver found, status updates)
//! 4. Shut down gracefully on Ctrl+C or when the ride resolves
//!
//! ## Running
//!
//! ```sh
//! # Start a Ridewire dispatch server on localhost:4000, then:
//! cargo run --example passenger_trip
//!
//! # Override the server URL or user id:
//! RIDEWIRE_URL=ws://my-server:4000 RIDEWIRE_USER_ID=12 cargo run --example passenger_trip
//! ```

use std::sync::Arc;

use ridewire_client::passenger::RideRequestDraft;
use ridewire_client::{
    AuthResolver, ClaimExtractor, CredentialProvider, EndpointResolver, PassengerClient,
    PassengerEvent, RidewireConfig, Stop, WebSocketConnector,
};

/// Default server URL when `RIDEWIRE_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:4000";

/// Environment-backed collaborators. A real application would plug in its
/// token store and JWT handling here.
struct EnvProviders;

impl CredentialProvider for EnvProviders {
    fn current_token(&self) -> Option<String> {
        Some(std::env::var("RIDEWIRE_TOKEN").unwrap_or_else(|_| "demo-token".into()))
    }
}

impl ClaimExtractor for EnvProviders {
    fn extract_user_id(&self, _token: &str) -> Option<i64> {
        std::env::var("RIDEWIRE_USER_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(Some(12))
    }
}

impl EndpointResolver for EnvProviders {
    fn socket_endpoint(&self) -> String {
        std::env::var("RIDEWIRE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Client setup ────────────────────────────────────────────────
    let providers = Arc::new(EnvProviders);
    let connector = WebSocketConnector::new(providers.clone());
    let auth = AuthResolver::new(providers.clone(), providers);
    let (mut client, mut events) =
        PassengerClient::start(connector, auth, RidewireConfig::new());

    // ── Request a ride ──────────────────────────────────────────────
    // The client connects on demand; no separate connect step needed.
    client.request_ride(
        RideRequestDraft::new(
            Stop::new(52.5200, 13.4050, "Alexanderplatz 1, Berlin"),
            Stop::new(52.5076, 13.4542, "Karl-Marx-Allee 99, Berlin"),
            3,
            14.20,
        )
        .with_preferences(vec![2, 7]),
    )?;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            // Branch 1: Incoming event from the dispatch server.
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    PassengerEvent::Connected => tracing::info!("connected to dispatch"),
                    PassengerEvent::SearchStarted => tracing::info!("looking for a driver…"),
                    PassengerEvent::RequestAcknowledged { ride_id } => {
                        tracing::info!("request acknowledged, ride {ride_id}");
                    }
                    PassengerEvent::DriverFound { driver } => {
                        tracing::info!(
                            "driver found: {} ({})",
                            driver.driver_name,
                            driver.vehicle_info.as_deref().unwrap_or("vehicle unknown"),
                        );
                    }
                    PassengerEvent::StatusChanged { status, .. } => {
                        tracing::info!("ride status: {status:?}");
                    }
                    PassengerEvent::RideCompleted => {
                        tracing::info!("ride completed — thanks for riding");
                        break;
                    }
                    PassengerEvent::RideCancelled { message } => {
                        tracing::warn!("ride cancelled: {}", message.as_deref().unwrap_or("no reason given"));
                        break;
                    }
                    PassengerEvent::NoDriverFound => {
                        tracing::warn!("no driver found — try again later");
                        break;
                    }
                    PassengerEvent::RequestFailed { message } => {
                        tracing::error!("request failed: {message}");
                        break;
                    }
                    PassengerEvent::Disconnected { reason } => {
                        tracing::warn!("disconnected: {reason:?}");
                    }
                    other => tracing::debug!("event: {other:?}"),
                }
            }

            // Branch 2: Ctrl+C cancels the search and exits.
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt — cancelling ride search");
                let _ = client.cancel_ride_search();
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
