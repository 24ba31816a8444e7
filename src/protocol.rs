//! Wire-compatible protocol types for the Ridewire dispatch protocol.
//!
//! One JSON text frame per message: `{"event": <name>, "data": <payload>}`,
//! plus an `ackId` correlation field on ack-expecting commands and their
//! replies. Payload field names are camelCase to match the server.
//!
//! Decoding is deliberately tolerant: optional server fields stay `Option`
//! (never defaulted to zero), and the event-name aliases some server builds
//! emit (`ride:requestReceived`, `ride:accepted`, `cancelled`/`completed`
//! statuses) decode to the same typed event.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::Role;
use crate::error::{Result, RidewireError};

// ── Event names ─────────────────────────────────────────────────────

/// Wire event names, client → server and server → client.
pub mod events {
    // Outbound (client → server)
    pub const PASSENGER_REQUEST_RIDE: &str = "passenger:requestRide";
    pub const PASSENGER_CANCEL_RIDE: &str = "passenger:cancelRide";
    pub const DRIVER_GO_ONLINE: &str = "driver:goOnline";
    pub const DRIVER_GO_OFFLINE: &str = "driver:goOffline";
    pub const DRIVER_ACCEPT_RIDE: &str = "driver:acceptRide";
    pub const DRIVER_DECLINE_RIDE: &str = "driver:declineRide";
    pub const DRIVER_UPDATE_LOCATION: &str = "driver:updateLocation";
    pub const DRIVER_ARRIVED_AT_PICKUP: &str = "driver:arrivedAtPickup";
    pub const DRIVER_START_RIDE: &str = "driver:startRide";
    pub const DRIVER_COMPLETE_RIDE: &str = "driver:completeRide";

    // Inbound (server → client)
    pub const RIDE_REQUEST_RESPONSE: &str = "ride:requestResponse";
    pub const RIDE_REQUEST_RECEIVED: &str = "ride:requestReceived";
    pub const RIDE_DRIVER_FOUND: &str = "ride:driverFound";
    pub const RIDE_ACCEPTED: &str = "ride:accepted";
    pub const RIDE_STATUS_UPDATE: &str = "ride:statusUpdate";
    pub const RIDE_NO_DRIVER_FOUND: &str = "ride:noDriverFound";
    pub const RIDE_NEW_REQUEST: &str = "ride:newRequest";
    pub const RIDE_REQUEST_TIMEOUT: &str = "ride:requestTimeout";
    pub const RIDE_CANCELLED: &str = "ride:cancelled";
    pub const ERROR: &str = "error";
    pub const ACK: &str = "ack";
}

// ── Frame envelope ──────────────────────────────────────────────────

/// The envelope every message travels in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    /// Event name, e.g. `"driver:acceptRide"`.
    pub event: String,
    /// Event payload. Absent payloads decode as `null`.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Correlation id for ack-expecting commands and their replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<Uuid>,
}

/// Serialize a frame to its wire form.
pub fn encode_frame(frame: &EventFrame) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse a wire frame.
///
/// # Errors
///
/// Returns [`RidewireError::Decode`] for anything that is not a frame-shaped
/// JSON object. Callers drop the message; decode failures never tear the
/// connection down.
pub fn decode_frame(text: &str) -> Result<EventFrame> {
    serde_json::from_str(text).map_err(|e| RidewireError::Decode(e.to_string()))
}

// ── Geo types ───────────────────────────────────────────────────────

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A named point on the map: coordinates plus the display address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    #[serde(flatten)]
    pub location: GeoPoint,
    pub address: String,
}

impl Stop {
    pub fn new(latitude: f64, longitude: f64, address: impl Into<String>) -> Self {
        Self {
            location: GeoPoint {
                latitude,
                longitude,
            },
            address: address.into(),
        }
    }
}

// ── Ride status ─────────────────────────────────────────────────────

/// Server-reported ride status.
///
/// Snake_case on the wire; `cancelled`/`completed` are accepted as the short
/// spellings some server builds push on the driver channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Searching,
    DriverFound,
    DriverEnRoute,
    DriverArrived,
    RideStarted,
    #[serde(alias = "completed")]
    RideCompleted,
    #[serde(alias = "cancelled")]
    RideCancelled,
    NoDriverFound,
}

// ── Outbound payloads ───────────────────────────────────────────────

/// Payload of `passenger:requestRide`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequestPayload {
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_address: String,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub dropoff_address: String,
    pub role: Role,
    pub service_type_id: i64,
    pub selected_preferences: Vec<i64>,
    pub estimated_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<i64>,
}

/// Payload of `passenger:cancelRide`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRidePayload {
    pub ride_id: String,
}

/// Payload of `driver:goOnline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoOnlinePayload {
    pub latitude: f64,
    pub longitude: f64,
    pub role: Role,
    pub selected_preferences: Vec<i64>,
    pub is_available: bool,
}

/// Payload of `driver:acceptRide` and `driver:declineRide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequestIdPayload {
    pub ride_request_id: i64,
}

/// Payload of `driver:updateLocation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdatePayload {
    pub latitude: f64,
    pub longitude: f64,
    pub is_available: bool,
}

/// Payload of the ride-id-tagged driver commands
/// (`arrivedAtPickup`, `startRide`, `completeRide`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideIdPayload {
    pub ride_id: String,
}

/// A typed outbound command, paired with its wire event name.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    RequestRide(RideRequestPayload),
    CancelRide(CancelRidePayload),
    GoOnline(GoOnlinePayload),
    GoOffline,
    AcceptRide(RideRequestIdPayload),
    DeclineRide(RideRequestIdPayload),
    UpdateLocation(LocationUpdatePayload),
    ArrivedAtPickup(RideIdPayload),
    StartRide(RideIdPayload),
    CompleteRide(RideIdPayload),
}

impl ClientEvent {
    /// The wire event name for this command.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RequestRide(_) => events::PASSENGER_REQUEST_RIDE,
            ClientEvent::CancelRide(_) => events::PASSENGER_CANCEL_RIDE,
            ClientEvent::GoOnline(_) => events::DRIVER_GO_ONLINE,
            ClientEvent::GoOffline => events::DRIVER_GO_OFFLINE,
            ClientEvent::AcceptRide(_) => events::DRIVER_ACCEPT_RIDE,
            ClientEvent::DeclineRide(_) => events::DRIVER_DECLINE_RIDE,
            ClientEvent::UpdateLocation(_) => events::DRIVER_UPDATE_LOCATION,
            ClientEvent::ArrivedAtPickup(_) => events::DRIVER_ARRIVED_AT_PICKUP,
            ClientEvent::StartRide(_) => events::DRIVER_START_RIDE,
            ClientEvent::CompleteRide(_) => events::DRIVER_COMPLETE_RIDE,
        }
    }

    /// Build the wire frame for this command.
    pub fn into_frame(self, ack_id: Option<Uuid>) -> Result<EventFrame> {
        let name = self.name();
        let data = match self {
            ClientEvent::RequestRide(p) => serde_json::to_value(p)?,
            ClientEvent::CancelRide(p) => serde_json::to_value(p)?,
            ClientEvent::GoOnline(p) => serde_json::to_value(p)?,
            ClientEvent::GoOffline => Value::Object(serde_json::Map::new()),
            ClientEvent::AcceptRide(p) => serde_json::to_value(p)?,
            ClientEvent::DeclineRide(p) => serde_json::to_value(p)?,
            ClientEvent::UpdateLocation(p) => serde_json::to_value(p)?,
            ClientEvent::ArrivedAtPickup(p) => serde_json::to_value(p)?,
            ClientEvent::StartRide(p) => serde_json::to_value(p)?,
            ClientEvent::CompleteRide(p) => serde_json::to_value(p)?,
        };
        Ok(EventFrame {
            event: name.to_string(),
            data,
            ack_id,
        })
    }
}

// ── Inbound payloads ────────────────────────────────────────────────

/// Payload of `ride:requestResponse` / `ride:requestReceived`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponsePayload {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub ride_id: Option<String>,
}

/// Driver and vehicle details pushed on `ride:driverFound` / `ride:accepted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    #[serde(default)]
    pub ride_id: Option<String>,
    pub driver_id: i64,
    pub driver_name: String,
    #[serde(default)]
    pub driver_phone: Option<String>,
    #[serde(default)]
    pub vehicle_info: Option<String>,
    #[serde(default)]
    pub estimated_arrival: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
}

/// Payload of `ride:statusUpdate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdatePayload {
    #[serde(default)]
    pub ride_id: Option<String>,
    pub status: RideStatus,
    #[serde(default)]
    pub message: Option<String>,
}

/// The passenger behind a pushed ride offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassengerInfo {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
}

/// A ride proposal pushed to one driver (`ride:newRequest`).
///
/// At most one offer is active per driver connection at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideOffer {
    pub ride_request_id: i64,
    #[serde(default)]
    pub ride_offer_id: Option<i64>,
    #[serde(default)]
    pub estimated_price: Option<f64>,
    pub pickup: Stop,
    pub dropoff: Stop,
    pub passenger: PassengerInfo,
    /// Offer deadline as epoch milliseconds, when the server provides one.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Payload of `ride:requestTimeout`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTimeoutPayload {
    #[serde(default)]
    pub ride_request_id: Option<i64>,
}

/// Payload of `ride:cancelled`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledPayload {
    #[serde(default)]
    pub ride_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload of the generic `error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
}

/// Body of a server acknowledgement correlated to an emitted command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponsePayload {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub ride_id: Option<String>,
}

/// Outcome carried by an ack frame.
///
/// Some transport libraries deliver their internal timeout marker as a bare
/// string where the response body belongs; any string body is therefore read
/// as "timed out" rather than matched against a particular sentinel literal.
#[derive(Debug, Clone, PartialEq)]
pub enum AckBody {
    Response(AckResponsePayload),
    TimedOut,
}

impl AckBody {
    fn decode(data: &Value) -> Result<Self> {
        if data.is_string() {
            return Ok(AckBody::TimedOut);
        }
        Ok(AckBody::Response(parse(data)?))
    }
}

// ── The agreed ride ─────────────────────────────────────────────────

/// The agreed, in-progress ride between a specific driver and passenger.
///
/// Created only by a successful accept-acknowledgement (driver) or a
/// driver-found event (passenger); destroyed on completion or cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideSession {
    pub ride_id: String,
    pub pickup: Stop,
    pub dropoff: Stop,
    #[serde(default)]
    pub price: Option<f64>,
    pub status: RideStatus,
}

// ── Typed inbound events ────────────────────────────────────────────

/// A decoded server event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    RequestResponse(RequestResponsePayload),
    DriverFound(DriverInfo),
    StatusUpdate(StatusUpdatePayload),
    NoDriverFound,
    NewRequest(RideOffer),
    RequestTimeout(RequestTimeoutPayload),
    Cancelled(CancelledPayload),
    ServerError(ErrorPayload),
    Ack {
        ack_id: Option<Uuid>,
        body: AckBody,
    },
}

impl ServerEvent {
    /// Decode a frame into a typed event.
    ///
    /// Returns `Ok(None)` for event names this client does not recognize —
    /// those are observed (logged) but never routed.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::Decode`] when a recognized event carries a
    /// payload of the wrong shape; the caller drops the event.
    pub fn from_frame(frame: &EventFrame) -> Result<Option<Self>> {
        let event = match frame.event.as_str() {
            events::RIDE_REQUEST_RESPONSE | events::RIDE_REQUEST_RECEIVED => {
                ServerEvent::RequestResponse(parse(&frame.data)?)
            }
            events::RIDE_DRIVER_FOUND | events::RIDE_ACCEPTED => {
                ServerEvent::DriverFound(parse(&frame.data)?)
            }
            events::RIDE_STATUS_UPDATE => ServerEvent::StatusUpdate(parse(&frame.data)?),
            events::RIDE_NO_DRIVER_FOUND => ServerEvent::NoDriverFound,
            events::RIDE_NEW_REQUEST => ServerEvent::NewRequest(parse(&frame.data)?),
            events::RIDE_REQUEST_TIMEOUT => {
                ServerEvent::RequestTimeout(parse_or_default(&frame.data)?)
            }
            events::RIDE_CANCELLED => ServerEvent::Cancelled(parse_or_default(&frame.data)?),
            events::ERROR => ServerEvent::ServerError(parse(&frame.data)?),
            events::ACK => ServerEvent::Ack {
                ack_id: frame.ack_id,
                body: AckBody::decode(&frame.data)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Short name used for logging and duplicate tracking.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::RequestResponse(_) => "requestResponse",
            ServerEvent::DriverFound(_) => "driverFound",
            ServerEvent::StatusUpdate(_) => "statusUpdate",
            ServerEvent::NoDriverFound => "noDriverFound",
            ServerEvent::NewRequest(_) => "newRequest",
            ServerEvent::RequestTimeout(_) => "requestTimeout",
            ServerEvent::Cancelled(_) => "cancelled",
            ServerEvent::ServerError(_) => "error",
            ServerEvent::Ack { .. } => "ack",
        }
    }

    /// The identity the server may redeliver this event under, if it has one.
    ///
    /// Events without an identity are never deduplicated.
    pub fn identity(&self) -> Option<String> {
        match self {
            ServerEvent::RequestResponse(p) => p.ride_id.clone(),
            ServerEvent::DriverFound(p) => p
                .ride_id
                .clone()
                .or_else(|| Some(p.driver_id.to_string())),
            ServerEvent::StatusUpdate(p) => p.ride_id.clone(),
            ServerEvent::NewRequest(p) => Some(p.ride_request_id.to_string()),
            ServerEvent::RequestTimeout(p) => p.ride_request_id.map(|id| id.to_string()),
            ServerEvent::Cancelled(p) => p.ride_id.clone(),
            ServerEvent::NoDriverFound
            | ServerEvent::ServerError(_)
            | ServerEvent::Ack { .. } => None,
        }
    }
}

// ── Decode helpers ──────────────────────────────────────────────────

fn parse<T: DeserializeOwned>(data: &Value) -> Result<T> {
    serde_json::from_value(data.clone()).map_err(|e| RidewireError::Decode(e.to_string()))
}

/// Like [`parse`], but a `null`/absent payload decodes to the default.
fn parse_or_default<T: DeserializeOwned + Default>(data: &Value) -> Result<T> {
    if data.is_null() {
        return Ok(T::default());
    }
    parse(data)
}
