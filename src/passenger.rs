//! Passenger-side ride lifecycle.
//!
//! [`PassengerClient`] is a thin handle that communicates with a background
//! actor task via an unbounded MPSC channel. Every state transition for the
//! role happens on that single task — socket callbacks, timer firings, and
//! API calls all serialize through it — so interleavings can never corrupt
//! the machine. Events are emitted on a bounded channel returned from
//! [`PassengerClient::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let (client, mut events) = PassengerClient::start(connector, auth, config);
//!
//! client.request_ride(
//!     RideRequestDraft::new(pickup, dropoff, SERVICE_STANDARD, 12.50)
//!         .with_preferences(vec![2, 7]),
//! )?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         PassengerEvent::DriverFound { driver } => { /* … */ }
//!         PassengerEvent::RideCompleted => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::auth::{AuthResolver, Role};
use crate::config::RidewireConfig;
use crate::connection::{ConnectionManager, DownOutcome, LinkEvent, LinkEventKind, RetryPolicy};
use crate::error::{Result, RidewireError};
use crate::protocol::{
    CancelRidePayload, ClientEvent, DriverInfo, RideRequestPayload, RideSession, RideStatus,
    ServerEvent, Stop,
};
use crate::router::EventRouter;
use crate::scheduler::{TimeoutScheduler, TimerFired, TimerKey, TimerPurpose};
use crate::transport::Connector;

/// Timer id for the single in-flight ride request.
const REQUEST_TIMER_ID: &str = "ride-request";

/// Message shown when the retry bound is exhausted without a connection.
const UNAVAILABLE_MESSAGE: &str = "Could not reach the dispatch server";

/// Message shown when an acknowledgement never arrives.
const TIMED_OUT_MESSAGE: &str = "Request timed out";

// ── Ride request draft ──────────────────────────────────────────────

/// A ride request as composed by the passenger. Immutable once submitted
/// (consumed by value).
///
/// # Example
///
/// ```
/// use ridewire_client::passenger::RideRequestDraft;
/// use ridewire_client::protocol::Stop;
///
/// let draft = RideRequestDraft::new(
///     Stop::new(52.52, 13.40, "Alexanderplatz 1"),
///     Stop::new(52.50, 13.45, "Karl-Marx-Allee 99"),
///     3,
///     14.20,
/// )
/// .with_preferences(vec![2, 7])
/// .with_coupon(41);
/// assert_eq!(draft.service_type_id, 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RideRequestDraft {
    /// Where the driver should pick the passenger up.
    pub pickup: Stop,
    /// Where the ride ends.
    pub dropoff: Stop,
    /// Requested service class.
    pub service_type_id: i64,
    /// Price quoted to the passenger before requesting.
    pub estimated_price: f64,
    /// Ride preference ids selected by the passenger.
    pub selected_preference_ids: Vec<i64>,
    /// Coupon applied to the quote, if any.
    pub coupon_id: Option<i64>,
}

impl RideRequestDraft {
    /// Create a draft with the required fields.
    pub fn new(pickup: Stop, dropoff: Stop, service_type_id: i64, estimated_price: f64) -> Self {
        Self {
            pickup,
            dropoff,
            service_type_id,
            estimated_price,
            selected_preference_ids: Vec::new(),
            coupon_id: None,
        }
    }

    /// Set the selected ride preferences.
    #[must_use]
    pub fn with_preferences(mut self, preference_ids: Vec<i64>) -> Self {
        self.selected_preference_ids = preference_ids;
        self
    }

    /// Apply a coupon.
    #[must_use]
    pub fn with_coupon(mut self, coupon_id: i64) -> Self {
        self.coupon_id = Some(coupon_id);
        self
    }

    fn to_payload(&self) -> RideRequestPayload {
        RideRequestPayload {
            pickup_lat: self.pickup.location.latitude,
            pickup_lng: self.pickup.location.longitude,
            pickup_address: self.pickup.address.clone(),
            dropoff_lat: self.dropoff.location.latitude,
            dropoff_lng: self.dropoff.location.longitude,
            dropoff_address: self.dropoff.address.clone(),
            role: Role::Passenger,
            service_type_id: self.service_type_id,
            selected_preferences: self.selected_preference_ids.clone(),
            estimated_price: self.estimated_price,
            coupon_id: self.coupon_id,
        }
    }
}

// ── States and events ───────────────────────────────────────────────

/// Passenger ride lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassengerState {
    Idle,
    /// A request is out (or waiting for the connection to come up).
    Searching,
    DriverFound,
    EnRoute,
    Arrived,
    InProgress,
    Completed,
    NoDriverFound,
    Cancelled,
    /// Connection-level failure that is not being retried.
    Error,
}

impl PassengerState {
    /// Terminal for the current ride attempt: only a fresh `request_ride`
    /// leaves these.
    fn is_terminal(self) -> bool {
        matches!(
            self,
            PassengerState::Completed
                | PassengerState::NoDriverFound
                | PassengerState::Cancelled
                | PassengerState::Error
        )
    }

    /// Position in the forward progression of a ride. Status updates that
    /// would move backwards are stale redeliveries and are dropped.
    fn rank(self) -> u8 {
        match self {
            PassengerState::Idle | PassengerState::Error => 0,
            PassengerState::Searching => 1,
            PassengerState::DriverFound => 2,
            PassengerState::EnRoute => 3,
            PassengerState::Arrived => 4,
            PassengerState::InProgress => 5,
            PassengerState::Completed
            | PassengerState::NoDriverFound
            | PassengerState::Cancelled => 6,
        }
    }
}

/// Events published by a [`PassengerClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum PassengerEvent {
    /// The connection handshake completed.
    Connected,
    /// The connection dropped (or was torn down on request).
    Disconnected { reason: Option<String> },
    /// A ride request was accepted for submission.
    SearchStarted,
    /// The server acknowledged the request and assigned a ride id.
    RequestAcknowledged { ride_id: String },
    /// The request failed: server rejection, acknowledgement timeout, or no
    /// connection within the retry bound. Not retried automatically.
    RequestFailed { message: String },
    /// A driver accepted the request.
    DriverFound { driver: DriverInfo },
    /// The ride progressed to a new status.
    StatusChanged {
        status: RideStatus,
        message: Option<String>,
    },
    /// No driver took the request; a new `request_ride` is needed to retry.
    NoDriverFound,
    /// The search was cancelled locally.
    SearchCancelled,
    /// The ride was cancelled.
    RideCancelled { message: Option<String> },
    /// The ride completed.
    RideCompleted,
    /// A failure surfaced as a short human-readable message.
    Error { message: String },
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the client handle and the actor task.
struct SharedState {
    connected: AtomicBool,
    state: Mutex<PassengerState>,
    ride_id: Mutex<Option<String>>,
    session: Mutex<Option<RideSession>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            state: Mutex::new(PassengerState::Idle),
            ride_id: Mutex::new(None),
            session: Mutex::new(None),
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────

#[derive(Debug)]
enum PassengerCommand {
    Connect,
    Disconnect,
    RequestRide(RideRequestDraft),
    CancelRideSearch,
}

// ── Client handle ───────────────────────────────────────────────────

/// Async client handle for the passenger role.
///
/// Created via [`PassengerClient::start`], which spawns the background actor
/// and returns this handle together with an event receiver. One instance per
/// passenger connection; construct and inject it where it is needed rather
/// than sharing a global.
pub struct PassengerClient {
    cmd_tx: mpsc::UnboundedSender<PassengerCommand>,
    shared: Arc<SharedState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl PassengerClient {
    /// Start the passenger actor and return a handle plus event receiver.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        connector: impl Connector,
        auth: AuthResolver,
        config: RidewireConfig,
    ) -> (Self, mpsc::Receiver<PassengerEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let shared = Arc::new(SharedState::new());
        let policy = RetryPolicy::bounded(config.passenger_max_retries, config.reconnect_backoff);
        let (manager, link_rx) = ConnectionManager::new(
            Arc::new(connector),
            auth,
            Role::Passenger,
            policy,
            config.connect_timeout,
        );
        let (scheduler, fire_rx) = TimeoutScheduler::new();

        let actor = PassengerActor {
            manager,
            scheduler,
            router: EventRouter::new(),
            event_tx,
            shared: Arc::clone(&shared),
            config: config.clone(),
            state: PassengerState::Idle,
            ride_id: None,
            session: None,
            submitted: None,
            pending: None,
        };
        let task = tokio::spawn(actor.run(cmd_rx, link_rx, fire_rx, shutdown_rx));

        let client = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (client, event_rx)
    }

    /// Open the dispatch connection without requesting a ride.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn connect(&self) -> Result<()> {
        self.send(PassengerCommand::Connect)
    }

    /// Tear down the connection. Pending timers are cancelled and retries
    /// pause until the next `connect`/`request_ride`.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn disconnect(&self) -> Result<()> {
        self.send(PassengerCommand::Disconnect)
    }

    /// Submit a ride request. If the connection is down, it is opened first
    /// and the request is submitted exactly once when it comes up, bounded
    /// by the retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn request_ride(&self, draft: RideRequestDraft) -> Result<()> {
        self.send(PassengerCommand::RequestRide(draft))
    }

    /// Cancel the ride search. Valid only while searching; tells the server
    /// only when a ride id has already been assigned.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn cancel_ride_search(&self) -> Result<()> {
        self.send(PassengerCommand::CancelRideSearch)
    }

    /// Returns `true` if the transport is believed to be connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> PassengerState {
        *self.shared.state.lock().await
    }

    /// The server-assigned ride id, once acknowledged.
    pub async fn current_ride_id(&self) -> Option<String> {
        self.shared.ride_id.lock().await.clone()
    }

    /// The agreed ride, once a driver was found. Retained in memory across a
    /// transport drop so the UI keeps its context until reconnection.
    pub async fn current_session(&self) -> Option<RideSession> {
        self.shared.session.lock().await.clone()
    }

    /// Shut down the client, closing the transport and stopping the actor.
    ///
    /// After calling this method, the event receiver will yield `None` once
    /// the actor exits.
    pub async fn shutdown(&mut self) {
        debug!("PassengerClient: shutdown requested");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("passenger actor terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("passenger actor did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("passenger actor aborted: {join_err}");
                    }
                }
            }
        }
        self.shared.connected.store(false, Ordering::Release);
    }

    fn send(&self, cmd: PassengerCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| RidewireError::ClientClosed)
    }
}

impl std::fmt::Debug for PassengerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassengerClient")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for PassengerClient {
    fn drop(&mut self) {
        // No executor context to drive a graceful shutdown from Drop;
        // aborting the actor drops the manager, which closes the link.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Actor ───────────────────────────────────────────────────────────

/// The ride request waiting for a connection, plus how many retry ticks it
/// has survived.
struct PendingRequest {
    draft: RideRequestDraft,
    attempts: u32,
}

/// Pickup/dropoff of the submitted request, kept to build the session when
/// a driver is found.
struct SubmittedRequest {
    pickup: Stop,
    dropoff: Stop,
    price: f64,
}

struct PassengerActor {
    manager: ConnectionManager,
    scheduler: TimeoutScheduler,
    router: EventRouter,
    event_tx: mpsc::Sender<PassengerEvent>,
    shared: Arc<SharedState>,
    config: RidewireConfig,
    state: PassengerState,
    ride_id: Option<String>,
    session: Option<RideSession>,
    submitted: Option<SubmittedRequest>,
    pending: Option<PendingRequest>,
}

impl PassengerActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<PassengerCommand>,
        mut link_rx: mpsc::UnboundedReceiver<LinkEvent>,
        mut fire_rx: mpsc::UnboundedReceiver<TimerFired>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("passenger actor started");
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        // Handle dropped.
                        None => {
                            debug!("command channel closed, stopping passenger actor");
                            self.teardown(Some("client shut down".into())).await;
                            break;
                        }
                    }
                }

                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    self.teardown(Some("client shut down".into())).await;
                    break;
                }

                link = link_rx.recv() => {
                    if let Some(event) = link {
                        self.handle_link(event).await;
                    }
                }

                fired = fire_rx.recv() => {
                    if let Some(fired) = fired {
                        if self.scheduler.claim(&fired) {
                            self.handle_timer(fired.key).await;
                        }
                    }
                }
            }
        }
        debug!("passenger actor exited");
    }

    // ── Commands ────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: PassengerCommand) {
        match cmd {
            PassengerCommand::Connect => {
                if let Err(e) = self.manager.connect() {
                    self.enter_error(format!("{e}")).await;
                }
            }
            PassengerCommand::Disconnect => {
                self.manager.disconnect(&mut self.scheduler);
                self.pending = None;
                self.set_session(None).await;
                self.submitted = None;
                if self.state == PassengerState::Searching {
                    self.set_state(PassengerState::Idle).await;
                }
                self.shared.connected.store(false, Ordering::Release);
                self.publish(PassengerEvent::Disconnected {
                    reason: Some("disconnect requested".into()),
                })
                .await;
            }
            PassengerCommand::RequestRide(draft) => self.request_ride(draft).await,
            PassengerCommand::CancelRideSearch => self.cancel_ride_search().await,
        }
    }

    async fn request_ride(&mut self, draft: RideRequestDraft) {
        if self.state == PassengerState::Searching {
            self.publish(PassengerEvent::Error {
                message: "A ride search is already in progress".into(),
            })
            .await;
            return;
        }

        // A new attempt clears whatever the previous ride left behind.
        self.set_session(None).await;
        self.ride_id = None;
        *self.shared.ride_id.lock().await = None;
        self.set_state(PassengerState::Searching).await;
        self.publish(PassengerEvent::SearchStarted).await;

        if self.manager.is_connected() {
            self.submit(draft).await;
        } else {
            self.pending = Some(PendingRequest {
                draft,
                attempts: 0,
            });
            if let Err(e) = self.manager.connect() {
                // Auth failure is fatal to the attempt, not retried.
                self.pending = None;
                self.fail_request(format!("{e}")).await;
                return;
            }
            self.scheduler.schedule(
                TimerKey::new(TimerPurpose::RequestRetry, REQUEST_TIMER_ID),
                self.config.request_retry_delay,
            );
        }
    }

    /// Emit the request event and arm the acknowledgement timer. The caller
    /// has already moved the machine into `Searching`.
    async fn submit(&mut self, draft: RideRequestDraft) {
        self.scheduler
            .cancel(&TimerKey::new(TimerPurpose::RequestRetry, REQUEST_TIMER_ID));
        self.submitted = Some(SubmittedRequest {
            pickup: draft.pickup.clone(),
            dropoff: draft.dropoff.clone(),
            price: draft.estimated_price,
        });
        match self.manager.emit(ClientEvent::RequestRide(draft.to_payload())) {
            Ok(()) => {
                self.scheduler.schedule(
                    TimerKey::new(TimerPurpose::AckTimeout, REQUEST_TIMER_ID),
                    self.config.ack_timeout,
                );
            }
            Err(e) => {
                // The link died between the connected check and the emit;
                // park the request again and let the retry path handle it.
                warn!("ride request emit failed ({e}); re-queuing");
                self.pending = Some(PendingRequest {
                    draft,
                    attempts: 0,
                });
                self.scheduler.schedule(
                    TimerKey::new(TimerPurpose::RequestRetry, REQUEST_TIMER_ID),
                    self.config.request_retry_delay,
                );
            }
        }
    }

    async fn cancel_ride_search(&mut self) {
        if self.state != PassengerState::Searching {
            self.publish(PassengerEvent::Error {
                message: "No ride search in progress".into(),
            })
            .await;
            return;
        }
        self.scheduler
            .cancel(&TimerKey::new(TimerPurpose::AckTimeout, REQUEST_TIMER_ID));
        self.scheduler
            .cancel(&TimerKey::new(TimerPurpose::RequestRetry, REQUEST_TIMER_ID));
        self.pending = None;
        self.set_session(None).await;
        self.submitted = None;

        // Tell the server only if it has assigned us a ride id; otherwise
        // there is nothing to cancel remotely.
        if let Some(ride_id) = self.ride_id.take() {
            *self.shared.ride_id.lock().await = None;
            if let Err(e) = self
                .manager
                .emit(ClientEvent::CancelRide(CancelRidePayload { ride_id }))
            {
                warn!("cancel emit failed: {e}");
            }
        }
        self.set_state(PassengerState::Idle).await;
        self.publish(PassengerEvent::SearchCancelled).await;
    }

    // ── Link events ─────────────────────────────────────────────────

    async fn handle_link(&mut self, event: LinkEvent) {
        if !self.manager.is_current(&event) {
            debug!("discarding link event from superseded connection");
            return;
        }
        match event.kind {
            LinkEventKind::Up => {
                self.manager.handle_up();
                self.shared.connected.store(true, Ordering::Release);
                self.publish(PassengerEvent::Connected).await;
                // Submit the parked request exactly once.
                if let Some(pending) = self.pending.take() {
                    self.submit(pending.draft).await;
                }
            }
            LinkEventKind::Frame(frame) => {
                if let Some(server_event) = self.router.route(&frame) {
                    self.handle_server_event(server_event).await;
                }
            }
            LinkEventKind::Down { reason } => {
                self.shared.connected.store(false, Ordering::Release);
                match self.manager.handle_down(reason.clone(), &mut self.scheduler) {
                    DownOutcome::Stale => {}
                    DownOutcome::Retrying { .. } => {
                        self.publish(PassengerEvent::Disconnected { reason }).await;
                    }
                    DownOutcome::GaveUp { reason } => {
                        self.publish(PassengerEvent::Disconnected {
                            reason: Some(reason.clone()),
                        })
                        .await;
                        if self.pending.take().is_some() {
                            self.fail_request(UNAVAILABLE_MESSAGE.into()).await;
                        } else {
                            self.enter_error(reason).await;
                        }
                    }
                }
            }
        }
    }

    // ── Timers ──────────────────────────────────────────────────────

    async fn handle_timer(&mut self, key: TimerKey) {
        match key.purpose {
            TimerPurpose::Reconnect => {
                if let Err(e) = self.manager.try_connect() {
                    self.enter_error(format!("{e}")).await;
                }
            }
            TimerPurpose::RequestRetry => {
                let Some(mut pending) = self.pending.take() else {
                    return;
                };
                if self.manager.is_connected() {
                    self.submit(pending.draft).await;
                    return;
                }
                pending.attempts += 1;
                if pending.attempts >= self.config.passenger_max_retries {
                    debug!("request retry bound exhausted");
                    self.fail_request(UNAVAILABLE_MESSAGE.into()).await;
                } else {
                    self.pending = Some(pending);
                    self.scheduler.schedule(
                        TimerKey::new(TimerPurpose::RequestRetry, REQUEST_TIMER_ID),
                        self.config.request_retry_delay,
                    );
                }
            }
            TimerPurpose::AckTimeout => {
                if self.state == PassengerState::Searching {
                    self.fail_request(TIMED_OUT_MESSAGE.into()).await;
                }
            }
            TimerPurpose::OfferExpiry => {
                debug!("ignoring driver-side timer on passenger connection");
            }
        }
    }

    // ── Server events ───────────────────────────────────────────────

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::RequestResponse(payload) => {
                if self.state != PassengerState::Searching {
                    debug!("requestResponse outside Searching ignored");
                    return;
                }
                self.scheduler
                    .cancel(&TimerKey::new(TimerPurpose::AckTimeout, REQUEST_TIMER_ID));
                if payload.success {
                    match payload.ride_id {
                        Some(ride_id) => {
                            self.ride_id = Some(ride_id.clone());
                            *self.shared.ride_id.lock().await = Some(ride_id.clone());
                            self.publish(PassengerEvent::RequestAcknowledged { ride_id })
                                .await;
                        }
                        None => {
                            warn!("successful requestResponse without a ride id");
                        }
                    }
                } else {
                    let message = payload
                        .message
                        .unwrap_or_else(|| "Ride request rejected".into());
                    self.fail_request(message).await;
                }
            }

            ServerEvent::DriverFound(driver) => {
                if self.state != PassengerState::Searching {
                    debug!("driverFound outside Searching ignored");
                    return;
                }
                self.scheduler
                    .cancel(&TimerKey::new(TimerPurpose::AckTimeout, REQUEST_TIMER_ID));
                if let Some(ride_id) = driver.ride_id.clone() {
                    *self.shared.ride_id.lock().await = Some(ride_id.clone());
                    self.ride_id = Some(ride_id);
                }
                self.set_state(PassengerState::DriverFound).await;
                let session = self.build_session(RideStatus::DriverFound);
                self.set_session(session).await;
                self.publish(PassengerEvent::DriverFound { driver }).await;
            }

            ServerEvent::StatusUpdate(payload) => {
                self.apply_status(payload.status, payload.message).await;
            }

            ServerEvent::NoDriverFound => {
                if self.state != PassengerState::Searching {
                    return;
                }
                self.scheduler
                    .cancel(&TimerKey::new(TimerPurpose::AckTimeout, REQUEST_TIMER_ID));
                self.set_session(None).await;
                self.set_state(PassengerState::NoDriverFound).await;
                self.publish(PassengerEvent::NoDriverFound).await;
            }

            ServerEvent::Cancelled(payload) => {
                self.apply_cancellation(payload.reason).await;
            }

            ServerEvent::ServerError(payload) => {
                self.publish(PassengerEvent::Error {
                    message: payload.message,
                })
                .await;
            }

            // Driver-side traffic has no business on this connection.
            ServerEvent::NewRequest(_)
            | ServerEvent::RequestTimeout(_)
            | ServerEvent::Ack { .. } => {
                debug!("driver-side event on passenger connection ignored");
            }
        }
    }

    async fn apply_status(&mut self, status: RideStatus, message: Option<String>) {
        match status {
            RideStatus::RideCancelled => {
                self.apply_cancellation(message).await;
                return;
            }
            RideStatus::RideCompleted => {
                if self.state.is_terminal() {
                    return;
                }
                self.set_session(None).await;
                self.set_state(PassengerState::Completed).await;
                self.publish(PassengerEvent::RideCompleted).await;
                return;
            }
            RideStatus::NoDriverFound => {
                if self.state == PassengerState::Searching {
                    self.set_session(None).await;
                    self.set_state(PassengerState::NoDriverFound).await;
                    self.publish(PassengerEvent::NoDriverFound).await;
                }
                return;
            }
            _ => {}
        }

        let target = match status {
            RideStatus::DriverFound => PassengerState::DriverFound,
            RideStatus::DriverEnRoute => PassengerState::EnRoute,
            RideStatus::DriverArrived => PassengerState::Arrived,
            RideStatus::RideStarted => PassengerState::InProgress,
            // `searching` is the state we are already in while waiting.
            _ => return,
        };

        // First successful transition wins; anything that would move the
        // ride backwards is a stale redelivery.
        if self.state.is_terminal() || target.rank() <= self.state.rank() {
            debug!(?status, state = ?self.state, "status update ignored");
            return;
        }
        self.set_state(target).await;
        if let Some(session) = &mut self.session {
            session.status = status;
            *self.shared.session.lock().await = Some(session.clone());
        }
        self.publish(PassengerEvent::StatusChanged { status, message })
            .await;
    }

    async fn apply_cancellation(&mut self, message: Option<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.scheduler
            .cancel(&TimerKey::new(TimerPurpose::AckTimeout, REQUEST_TIMER_ID));
        self.scheduler
            .cancel(&TimerKey::new(TimerPurpose::RequestRetry, REQUEST_TIMER_ID));
        self.pending = None;
        self.set_session(None).await;
        self.set_state(PassengerState::Cancelled).await;
        self.publish(PassengerEvent::RideCancelled { message }).await;
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn build_session(&self, status: RideStatus) -> Option<RideSession> {
        let submitted = self.submitted.as_ref()?;
        Some(RideSession {
            ride_id: self.ride_id.clone().unwrap_or_default(),
            pickup: submitted.pickup.clone(),
            dropoff: submitted.dropoff.clone(),
            price: Some(submitted.price),
            status,
        })
    }

    /// The in-flight request is over, unsuccessfully. Resolves the machine
    /// back to `Idle` and surfaces `message` exactly once.
    async fn fail_request(&mut self, message: String) {
        self.scheduler
            .cancel(&TimerKey::new(TimerPurpose::AckTimeout, REQUEST_TIMER_ID));
        self.scheduler
            .cancel(&TimerKey::new(TimerPurpose::RequestRetry, REQUEST_TIMER_ID));
        self.pending = None;
        self.set_session(None).await;
        self.submitted = None;
        self.set_state(PassengerState::Idle).await;
        self.publish(PassengerEvent::RequestFailed { message }).await;
    }

    async fn enter_error(&mut self, message: String) {
        self.pending = None;
        self.set_state(PassengerState::Error).await;
        self.publish(PassengerEvent::Error { message }).await;
    }

    async fn set_session(&mut self, session: Option<RideSession>) {
        *self.shared.session.lock().await = session.clone();
        self.session = session;
    }

    async fn set_state(&mut self, state: PassengerState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "passenger state transition");
            self.state = state;
            self.router.reset();
            *self.shared.state.lock().await = state;
        }
    }

    async fn teardown(&mut self, reason: Option<String>) {
        self.manager.disconnect(&mut self.scheduler);
        self.shared.connected.store(false, Ordering::Release);
        // The final event must never be dropped, so block instead of
        // try_send.
        if self
            .event_tx
            .send(PassengerEvent::Disconnected { reason })
            .await
            .is_err()
        {
            debug!("event channel closed, receiver dropped");
        }
    }

    /// Emit an event to the event channel. If the channel is full, log a
    /// warning and drop the event to avoid blocking the actor.
    async fn publish(&self, event: PassengerEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("event channel full, dropping event: {dropped:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}
