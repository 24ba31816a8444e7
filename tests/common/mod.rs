#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Ridewire client integration tests.
//!
//! Provides a channel-based mock transport, a scripted [`Connector`] that
//! hands one transport per connect attempt, and helper functions for
//! constructing server frames. Timer-driven behavior is tested with
//! `#[tokio::test(start_paused = true)]` so no test ever waits on a real
//! clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use ridewire_client::auth::{AuthContext, AuthResolver, StaticCredentials};
use ridewire_client::protocol::{decode_frame, encode_frame, EventFrame};
use ridewire_client::{Connector, RidewireConfig, RidewireError, Transport};

/// Replies injected by a mock server in reaction to a client frame.
pub type Responder = Arc<dyn Fn(&EventFrame) -> Vec<EventFrame> + Send + Sync>;

type Inbound = Option<Result<String, RidewireError>>;

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-based mock transport.
///
/// The paired [`ServerHandle`] injects inbound frames at any point in the
/// test; everything the client sends is recorded. An optional [`Responder`]
/// reacts to outgoing frames (needed for ack correlation, where the reply
/// must echo an id the client just generated).
pub struct MockTransport {
    incoming: tokio::sync::mpsc::UnboundedReceiver<Inbound>,
    loopback: tokio::sync::mpsc::UnboundedSender<Inbound>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    responder: Option<Responder>,
}

/// Test-side handle to one [`MockTransport`].
#[derive(Clone)]
pub struct ServerHandle {
    tx: tokio::sync::mpsc::UnboundedSender<Inbound>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new(responder: Option<Responder>) -> (Self, ServerHandle) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: rx,
            loopback: tx.clone(),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
            responder,
        };
        let handle = ServerHandle {
            tx,
            sent,
            closed,
        };
        (transport, handle)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), RidewireError> {
        if let Some(responder) = &self.responder {
            if let Ok(frame) = decode_frame(&message) {
                for reply in responder(&frame) {
                    let _ = self
                        .loopback
                        .send(Some(Ok(encode_frame(&reply).unwrap())));
                }
            }
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, RidewireError>> {
        match self.incoming.recv().await {
            // Scripted frame or transport error.
            Some(Some(item)) => Some(item),
            // Explicit clean close from the server side.
            Some(None) => None,
            // Handle dropped; treat as a clean close too.
            None => None,
        }
    }

    async fn close(&mut self) -> Result<(), RidewireError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl ServerHandle {
    /// Push one server frame to the client.
    pub fn push(&self, frame: EventFrame) {
        self.tx
            .send(Some(Ok(encode_frame(&frame).unwrap())))
            .unwrap();
    }

    /// Push a raw text message (malformed-input tests).
    pub fn push_raw(&self, text: &str) {
        self.tx.send(Some(Ok(text.to_string()))).unwrap();
    }

    /// Fail the transport with a receive error.
    pub fn fail(&self, message: &str) {
        self.tx
            .send(Some(Err(RidewireError::TransportReceive(message.into()))))
            .unwrap();
    }

    /// Close the connection cleanly from the server side.
    pub fn close(&self) {
        let _ = self.tx.send(None);
    }

    /// Frames the client has sent so far, decoded.
    pub fn sent_frames(&self) -> Vec<EventFrame> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| decode_frame(text).expect("client sent an undecodable frame"))
            .collect()
    }

    /// Frames with the given event name.
    pub fn sent_named(&self, event: &str) -> Vec<EventFrame> {
        self.sent_frames()
            .into_iter()
            .filter(|f| f.event == event)
            .collect()
    }

    /// Wait (in paused time) until the client has sent at least `count`
    /// frames with the given event name.
    pub async fn wait_for_sent(&self, event: &str, count: usize) -> Vec<EventFrame> {
        for _ in 0..2_000 {
            let frames = self.sent_named(event);
            if frames.len() >= count {
                return frames;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "client never sent {count} `{event}` frame(s); sent: {:?}",
            self.sent.lock().unwrap()
        );
    }
}

// ── Connectors ──────────────────────────────────────────────────────

/// Hands out pre-built transports, one per connect attempt, and fails the
/// attempt once the script runs dry.
pub struct ScriptedConnector {
    transports: StdMutex<VecDeque<MockTransport>>,
    connects: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new(transports: Vec<MockTransport>) -> (Self, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        (
            Self {
                transports: StdMutex::new(VecDeque::from(transports)),
                connects: Arc::clone(&connects),
            },
            connects,
        )
    }

    /// A connector with a single plain transport.
    pub fn single() -> (Self, ServerHandle, Arc<AtomicUsize>) {
        Self::single_with(None)
    }

    /// A connector with a single responding transport.
    pub fn single_with(responder: Option<Responder>) -> (Self, ServerHandle, Arc<AtomicUsize>) {
        let (transport, handle) = MockTransport::new(responder);
        let (connector, connects) = Self::new(vec![transport]);
        (connector, handle, connects)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _auth: &AuthContext) -> Result<Box<dyn Transport>, RidewireError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.transports.lock().unwrap().pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(RidewireError::TransportReceive(
                "scripted connector exhausted".into(),
            )),
        }
    }
}

/// A connector whose attempts always fail.
pub struct FailingConnector {
    pub connects: Arc<AtomicUsize>,
}

impl FailingConnector {
    pub fn new() -> Self {
        Self {
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self, _auth: &AuthContext) -> Result<Box<dyn Transport>, RidewireError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Err(RidewireError::TransportReceive("connection refused".into()))
    }
}

// ── Auth and config helpers ─────────────────────────────────────────

/// An [`AuthResolver`] that always yields `user_id`.
pub fn test_auth(user_id: i64) -> AuthResolver {
    let creds = Arc::new(StaticCredentials::signed_in(user_id));
    AuthResolver::new(creds.clone(), creds)
}

/// An [`AuthResolver`] with no stored token.
pub fn signed_out_auth() -> AuthResolver {
    let creds = Arc::new(StaticCredentials::signed_out());
    AuthResolver::new(creds.clone(), creds)
}

/// The default config used by integration tests.
pub fn test_config() -> RidewireConfig {
    RidewireConfig::new()
}

// ── Server frame helpers ────────────────────────────────────────────

pub fn frame(event: &str, data: serde_json::Value) -> EventFrame {
    EventFrame {
        event: event.into(),
        data,
        ack_id: None,
    }
}

pub fn request_response(success: bool, ride_id: Option<&str>, message: Option<&str>) -> EventFrame {
    frame(
        "ride:requestResponse",
        json!({"success": success, "rideId": ride_id, "message": message}),
    )
}

pub fn driver_found(ride_id: &str, driver_id: i64, driver_name: &str) -> EventFrame {
    frame(
        "ride:driverFound",
        json!({
            "rideId": ride_id,
            "driverId": driver_id,
            "driverName": driver_name,
            "vehicleInfo": "Blue VW ID.3 · B-RW 1234",
            "rating": 4.9,
        }),
    )
}

pub fn status_update(ride_id: &str, status: &str) -> EventFrame {
    frame(
        "ride:statusUpdate",
        json!({"rideId": ride_id, "status": status}),
    )
}

pub fn no_driver_found() -> EventFrame {
    frame("ride:noDriverFound", serde_json::Value::Null)
}

pub fn new_request(ride_request_id: i64) -> EventFrame {
    frame(
        "ride:newRequest",
        json!({
            "rideRequestId": ride_request_id,
            "estimatedPrice": 18.40,
            "pickup": {"latitude": 52.52, "longitude": 13.40, "address": "Alexanderplatz 1"},
            "dropoff": {"latitude": 52.50, "longitude": 13.45, "address": "Karl-Marx-Allee 99"},
            "passenger": {"id": 501, "name": "Robin", "rating": 4.7},
        }),
    )
}

pub fn request_timeout(ride_request_id: i64) -> EventFrame {
    frame(
        "ride:requestTimeout",
        json!({"rideRequestId": ride_request_id}),
    )
}

pub fn ride_cancelled(reason: Option<&str>) -> EventFrame {
    frame("ride:cancelled", json!({"reason": reason}))
}

pub fn server_error(message: &str) -> EventFrame {
    frame("error", json!({"message": message}))
}

/// A positive or negative acknowledgement correlated to `ack_id`.
pub fn ack(ack_id: Uuid, success: bool, ride_id: Option<&str>, message: Option<&str>) -> EventFrame {
    EventFrame {
        event: "ack".into(),
        data: json!({"success": success, "rideId": ride_id, "message": message}),
        ack_id: Some(ack_id),
    }
}

/// An ack whose body is a bare string — the shape some transport libraries
/// use for their internal timeout marker.
pub fn ack_sentinel(ack_id: Uuid) -> EventFrame {
    EventFrame {
        event: "ack".into(),
        data: json!("NO ACK"),
        ack_id: Some(ack_id),
    }
}

/// A responder that acknowledges every `driver:acceptRide` with the given
/// outcome.
pub fn accept_responder(
    success: bool,
    ride_id: Option<&'static str>,
    message: Option<&'static str>,
) -> Responder {
    Arc::new(move |frame: &EventFrame| {
        if frame.event == "driver:acceptRide" {
            let ack_id = frame.ack_id.expect("acceptRide must carry an ackId");
            vec![ack(ack_id, success, ride_id, message)]
        } else {
            vec![]
        }
    })
}

// ── Event draining ──────────────────────────────────────────────────

/// Receive the next event or panic after (paused-clock) 120 s.
pub async fn next_event<T: std::fmt::Debug>(rx: &mut tokio::sync::mpsc::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Drain events until `predicate` matches one, returning it. Panics if the
/// channel closes or (paused-clock) time runs out first.
pub async fn next_matching<T: std::fmt::Debug>(
    rx: &mut tokio::sync::mpsc::Receiver<T>,
    predicate: impl Fn(&T) -> bool,
) -> T {
    loop {
        let event = next_event(rx).await;
        if predicate(&event) {
            return event;
        }
    }
}

/// Let queued actor work drain without advancing past any armed timer.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Poll `condition` until it holds, or panic after a bounded number of
/// (paused-clock) waits.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}
