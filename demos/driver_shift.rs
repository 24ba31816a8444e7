//! # Driver Shift Example
//!
//! Demonstrates a complete driver lifecycle:
//!
//! 1. Go online (connect + announce presence)
//! 2. Accept the first incoming ride offer
//! 3. Walk the ride through arrival, start, and completion
//! 4. Go offline on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start a Ridewire dispatch server on localhost:4000, then:
//! cargo run --example driver_shift
//!
//! # Override the server URL or user id:
//! RIDEWIRE_URL=ws://my-server:4000 RIDEWIRE_USER_ID=7 cargo run --example driver_shift
//! ```

use std::sync::Arc;
use std::time::Duration;

use ridewire_client::{
    AuthResolver, ClaimExtractor, CredentialProvider, DriverClient, DriverEvent,
    EndpointResolver, GeoPoint, RidewireConfig, WebSocketConnector,
};

/// Default server URL when `RIDEWIRE_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:4000";

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
            .or(Some(7))
    }
}

impl EndpointResolver for EnvProviders {
    fn socket_endpoint(&self) -> String {
        std::env::var("RIDEWIRE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let providers = Arc::new(EnvProviders);
    let connector = WebSocketConnector::new(providers.clone());
    let auth = AuthResolver::new(providers.clone(), providers);
    let (mut client, mut events) = DriverClient::start(connector, auth, RidewireConfig::new());

    // Go online at a fixed position; a real app feeds GPS into
    // `update_location`.
    client.go_online(
        GeoPoint {
            latitude: 52.5200,
            longitude: 13.4050,
        },
        vec![2],
    )?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    DriverEvent::Online => tracing::info!("online, waiting for offers"),
                    DriverEvent::OfferReceived { offer } => {
                        tracing::info!(
                            "offer {} from {} — {} → {} (est. {:?})",
                            offer.ride_request_id,
                            offer.passenger.name,
                            offer.pickup.address,
                            offer.dropoff.address,
                            offer.estimated_price,
                        );
                        client.accept_ride(offer.ride_request_id)?;
                    }
                    DriverEvent::RideAssigned { session } => {
                        tracing::info!("ride {} assigned — driving to pickup", session.ride_id);
                        // Simulate the drive; a real app reacts to navigation.
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        client.arrived_at_pickup()?;
                    }
                    DriverEvent::StatusChanged { status } => {
                        tracing::info!("ride status: {status:?}");
                        match status {
                            ridewire_client::RideStatus::DriverArrived => {
                                tokio::time::sleep(Duration::from_secs(1)).await;
                                client.start_ride()?;
                            }
                            ridewire_client::RideStatus::RideStarted => {
                                tokio::time::sleep(Duration::from_secs(2)).await;
                                client.complete_ride()?;
                            }
                            _ => {}
                        }
                    }
                    DriverEvent::RideCompleted => {
                        tracing::info!("ride completed — back to waiting");
                    }
                    DriverEvent::AcceptFailed { message } => {
                        tracing::warn!("accept failed: {message}");
                    }
                    DriverEvent::OfferExpired { ride_request_id } => {
                        tracing::info!("offer {ride_request_id} expired");
                    }
                    DriverEvent::RideCancelled { message } => {
                        tracing::warn!("ride cancelled: {}", message.as_deref().unwrap_or("no reason given"));
                    }
                    DriverEvent::Disconnected { reason } => {
                        tracing::warn!("disconnected: {reason:?} — reconnecting");
                    }
                    DriverEvent::Error { message } => tracing::error!("{message}"),
                    other => tracing::debug!("event: {other:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt — going offline");
                let _ = client.go_offline();
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
