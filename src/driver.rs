//! Driver-side presence and offer lifecycle.
//!
//! [`DriverClient`] mirrors the passenger handle: a thin command sender in
//! front of a background actor that owns the connection, the timers, and the
//! state machine. The driver adds three things the passenger does not have:
//! periodic presence reporting while online, the single-active-offer rule
//! (a second offer while one is undecided is a protocol violation and is
//! ignored), and the accept/ack race — `accept_ride` must resolve to exactly
//! one of *assigned* or *back to waiting*, whether the server answers
//! positively, negatively, or not at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{AuthResolver, Role};
use crate::config::RidewireConfig;
use crate::connection::{ConnectionManager, DownOutcome, LinkEvent, LinkEventKind, RetryPolicy};
use crate::error::{Result, RidewireError};
use crate::presence::PresenceReporter;
use crate::protocol::{
    AckBody, ClientEvent, GeoPoint, GoOnlinePayload, LocationUpdatePayload, RideIdPayload,
    RideOffer, RideRequestIdPayload, RideSession, RideStatus, ServerEvent,
};
use crate::router::EventRouter;
use crate::scheduler::{TimeoutScheduler, TimerFired, TimerKey, TimerPurpose};
use crate::transport::Connector;

/// Message shown when an accept acknowledgement never arrives.
const TIMED_OUT_MESSAGE: &str = "Request timed out";

// ── States and events ───────────────────────────────────────────────

/// Driver lifecycle state. Completion of a ride returns to `Online`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Offline,
    /// Online and waiting for offers.
    Online,
    /// An offer is active and undecided.
    OfferReceived,
    /// An offer was accepted; heading to the pickup.
    Accepted,
    ArrivedAtPickup,
    InProgress,
}

impl DriverState {
    /// States in which the driver holds an agreed ride.
    fn has_active_ride(self) -> bool {
        matches!(
            self,
            DriverState::Accepted | DriverState::ArrivedAtPickup | DriverState::InProgress
        )
    }
}

/// Events published by a [`DriverClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// The connection handshake completed.
    Connected,
    /// The connection dropped (reconnection continues in the background
    /// unless `go_offline` was called).
    Disconnected { reason: Option<String> },
    /// Presence was announced; the driver is waiting for offers.
    Online,
    /// The driver is offline.
    Offline,
    /// A ride offer arrived and its countdown started.
    OfferReceived { offer: RideOffer },
    /// The offer ran out before a decision (local countdown or
    /// server-pushed timeout — one code path).
    OfferExpired { ride_request_id: i64 },
    /// The offer was declined locally.
    OfferDeclined { ride_request_id: i64 },
    /// Accept succeeded; the ride is assigned.
    RideAssigned { session: RideSession },
    /// Accept failed: negative acknowledgement or acknowledgement timeout.
    /// The driver is back to waiting.
    AcceptFailed { message: String },
    /// The active ride progressed to a new status.
    StatusChanged { status: RideStatus },
    /// The active ride (or undecided offer) was cancelled.
    RideCancelled { message: Option<String> },
    /// The active ride completed; the driver is back to waiting.
    RideCompleted,
    /// A failure surfaced as a short human-readable message.
    Error { message: String },
}

// ── Shared state ────────────────────────────────────────────────────

struct SharedState {
    connected: AtomicBool,
    state: Mutex<DriverState>,
    offer: Mutex<Option<RideOffer>>,
    session: Mutex<Option<RideSession>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            state: Mutex::new(DriverState::Offline),
            offer: Mutex::new(None),
            session: Mutex::new(None),
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────

#[derive(Debug)]
enum DriverCommand {
    GoOnline {
        location: GeoPoint,
        preference_ids: Vec<i64>,
    },
    GoOffline,
    AcceptRide {
        ride_request_id: i64,
    },
    DeclineRide {
        ride_request_id: i64,
    },
    UpdateLocation {
        location: GeoPoint,
    },
    ArrivedAtPickup,
    StartRide,
    CompleteRide,
}

// ── Client handle ───────────────────────────────────────────────────

/// Async client handle for the driver role.
///
/// Created via [`DriverClient::start`]. One instance per driver connection;
/// construct and inject it where it is needed rather than sharing a global.
pub struct DriverClient {
    cmd_tx: mpsc::UnboundedSender<DriverCommand>,
    shared: Arc<SharedState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl DriverClient {
    /// Start the driver actor and return a handle plus event receiver.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        connector: impl Connector,
        auth: AuthResolver,
        config: RidewireConfig,
    ) -> (Self, mpsc::Receiver<DriverEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(SharedState::new());
        // A driver silently dropping offline mid-shift is worse than a slow
        // reconnect, so this role retries without bound.
        let policy = RetryPolicy::unbounded(config.reconnect_backoff);
        let (manager, link_rx) = ConnectionManager::new(
            Arc::new(connector),
            auth,
            Role::Driver,
            policy,
            config.connect_timeout,
        );
        let (scheduler, fire_rx) = TimeoutScheduler::new();

        let actor = DriverActor {
            manager,
            scheduler,
            router: EventRouter::new(),
            presence: PresenceReporter::new(),
            tick_tx,
            event_tx,
            shared: Arc::clone(&shared),
            config: config.clone(),
            state: DriverState::Offline,
            offer: None,
            session: None,
            presence_data: None,
            last_location: None,
            announced: false,
            pending_ack: None,
        };
        let task = tokio::spawn(actor.run(cmd_rx, link_rx, fire_rx, tick_rx, shutdown_rx));

        let client = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (client, event_rx)
    }

    /// Go online: open the connection if needed and announce availability
    /// once the handshake settles.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn go_online(&self, location: GeoPoint, preference_ids: Vec<i64>) -> Result<()> {
        self.send(DriverCommand::GoOnline {
            location,
            preference_ids,
        })
    }

    /// Go offline: best-effort notice to the server, then tear the
    /// connection down. Local state is forced to `Offline` regardless of
    /// whether the notice was delivered.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn go_offline(&self) -> Result<()> {
        self.send(DriverCommand::GoOffline)
    }

    /// Accept the active offer. Resolves to exactly one of
    /// [`DriverEvent::RideAssigned`] or [`DriverEvent::AcceptFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn accept_ride(&self, ride_request_id: i64) -> Result<()> {
        self.send(DriverCommand::AcceptRide { ride_request_id })
    }

    /// Decline the active offer. Fire-and-forget: no acknowledgement is
    /// awaited and the driver returns to waiting unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn decline_ride(&self, ride_request_id: i64) -> Result<()> {
        self.send(DriverCommand::DeclineRide { ride_request_id })
    }

    /// Report the driver's current location.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn update_location(&self, location: GeoPoint) -> Result<()> {
        self.send(DriverCommand::UpdateLocation { location })
    }

    /// Mark arrival at the pickup. Valid only while `Accepted`.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn arrived_at_pickup(&self) -> Result<()> {
        self.send(DriverCommand::ArrivedAtPickup)
    }

    /// Start the ride. Valid only while `ArrivedAtPickup`.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn start_ride(&self) -> Result<()> {
        self.send(DriverCommand::StartRide)
    }

    /// Complete the ride and return to waiting. Valid only while
    /// `InProgress`.
    ///
    /// # Errors
    ///
    /// Returns [`RidewireError::ClientClosed`] if the actor has shut down.
    pub fn complete_ride(&self) -> Result<()> {
        self.send(DriverCommand::CompleteRide)
    }

    /// Returns `true` if the transport is believed to be connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> DriverState {
        *self.shared.state.lock().await
    }

    /// The undecided offer, if one is active.
    pub async fn active_offer(&self) -> Option<RideOffer> {
        self.shared.offer.lock().await.clone()
    }

    /// The agreed ride, if one is active. Retained in memory across a
    /// transport drop so the UI keeps its context until reconnection.
    pub async fn current_session(&self) -> Option<RideSession> {
        self.shared.session.lock().await.clone()
    }

    /// Shut down the client, closing the transport and stopping the actor.
    pub async fn shutdown(&mut self) {
        debug!("DriverClient: shutdown requested");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("driver actor terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("driver actor did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("driver actor aborted: {join_err}");
                    }
                }
            }
        }
        self.shared.connected.store(false, Ordering::Release);
    }

    fn send(&self, cmd: DriverCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| RidewireError::ClientClosed)
    }
}

impl std::fmt::Debug for DriverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverClient")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for DriverClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Actor ───────────────────────────────────────────────────────────

/// Location and preferences to announce once the connection settles.
#[derive(Debug, Clone)]
struct PresenceData {
    location: GeoPoint,
    preference_ids: Vec<i64>,
}

/// Bookkeeping for one in-flight accept command.
#[derive(Debug)]
struct PendingAck {
    ack_id: Uuid,
    ride_request_id: i64,
}

struct DriverActor {
    manager: ConnectionManager,
    scheduler: TimeoutScheduler,
    router: EventRouter,
    presence: PresenceReporter,
    tick_tx: mpsc::UnboundedSender<()>,
    event_tx: mpsc::Sender<DriverEvent>,
    shared: Arc<SharedState>,
    config: RidewireConfig,
    state: DriverState,
    offer: Option<RideOffer>,
    session: Option<RideSession>,
    presence_data: Option<PresenceData>,
    last_location: Option<GeoPoint>,
    announced: bool,
    pending_ack: Option<PendingAck>,
}

impl DriverActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<DriverCommand>,
        mut link_rx: mpsc::UnboundedReceiver<LinkEvent>,
        mut fire_rx: mpsc::UnboundedReceiver<TimerFired>,
        mut tick_rx: mpsc::UnboundedReceiver<()>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("driver actor started");
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            debug!("command channel closed, stopping driver actor");
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

                tick = tick_rx.recv() => {
                    if tick.is_some() {
                        self.report_presence().await;
                    }
                }
            }
        }
        debug!("driver actor exited");
    }

    // ── Commands ────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: DriverCommand) {
        match cmd {
            DriverCommand::GoOnline {
                location,
                preference_ids,
            } => self.go_online(location, preference_ids).await,
            DriverCommand::GoOffline => self.go_offline().await,
            DriverCommand::AcceptRide { ride_request_id } => {
                self.accept_ride(ride_request_id).await;
            }
            DriverCommand::DeclineRide { ride_request_id } => {
                self.decline_ride(ride_request_id).await;
            }
            DriverCommand::UpdateLocation { location } => {
                self.last_location = Some(location);
                if self.state == DriverState::Offline {
                    debug!("location update while offline ignored");
                    return;
                }
                self.emit_location(location).await;
            }
            DriverCommand::ArrivedAtPickup => {
                self.ride_step(
                    DriverState::Accepted,
                    DriverState::ArrivedAtPickup,
                    RideStatus::DriverArrived,
                )
                .await;
            }
            DriverCommand::StartRide => {
                self.ride_step(
                    DriverState::ArrivedAtPickup,
                    DriverState::InProgress,
                    RideStatus::RideStarted,
                )
                .await;
            }
            DriverCommand::CompleteRide => self.complete_ride().await,
        }
    }

    async fn go_online(&mut self, location: GeoPoint, preference_ids: Vec<i64>) {
        self.presence_data = Some(PresenceData {
            location,
            preference_ids,
        });
        self.last_location = Some(location);

        if self.manager.is_connected() {
            self.announce().await;
            return;
        }
        if let Err(e) = self.manager.connect() {
            // No usable credential: fatal to the attempt, not retried.
            self.presence_data = None;
            self.publish(DriverEvent::Error {
                message: format!("{e}"),
            })
            .await;
        }
        // The announce happens on link-up.
    }

    /// Announce presence exactly once per successful connect. The emit path
    /// checks the live link, not just the cached connection state, because
    /// the handshake may not be fully settled the instant the transport
    /// reports connected.
    async fn announce(&mut self) {
        if self.announced {
            return;
        }
        let Some(data) = self.presence_data.clone() else {
            return;
        };
        let payload = GoOnlinePayload {
            latitude: data.location.latitude,
            longitude: data.location.longitude,
            role: Role::Driver,
            selected_preferences: data.preference_ids,
            is_available: true,
        };
        match self.manager.emit(ClientEvent::GoOnline(payload)) {
            Ok(()) => {
                self.announced = true;
                self.presence
                    .start(self.config.presence_interval, self.tick_tx.clone());
                if self.state == DriverState::Offline {
                    self.set_state(DriverState::Online).await;
                }
                self.publish(DriverEvent::Online).await;
            }
            Err(e) => {
                // The link went away again; the next link-up retries.
                warn!("presence announce failed: {e}");
            }
        }
    }

    async fn go_offline(&mut self) {
        // Best-effort notice; never acked, and failure to deliver does not
        // keep us online.
        if let Err(e) = self.manager.emit(ClientEvent::GoOffline) {
            debug!("going-offline notice not delivered: {e}");
        }
        self.presence.stop();
        self.manager.disconnect(&mut self.scheduler);
        self.shared.connected.store(false, Ordering::Release);
        self.pending_ack = None;
        self.presence_data = None;
        self.announced = false;
        self.offer = None;
        *self.shared.offer.lock().await = None;
        self.session = None;
        *self.shared.session.lock().await = None;
        self.set_state(DriverState::Offline).await;
        self.publish(DriverEvent::Offline).await;
    }

    async fn accept_ride(&mut self, ride_request_id: i64) {
        if self.state != DriverState::OfferReceived {
            self.publish(DriverEvent::Error {
                message: "No active ride offer to accept".into(),
            })
            .await;
            return;
        }
        let offer_id = self.offer.as_ref().map(|o| o.ride_request_id);
        if offer_id != Some(ride_request_id) {
            self.publish(DriverEvent::Error {
                message: "That ride offer is no longer active".into(),
            })
            .await;
            return;
        }
        if self.pending_ack.is_some() {
            debug!("accept already in flight");
            return;
        }

        match self
            .manager
            .emit_with_ack(ClientEvent::AcceptRide(RideRequestIdPayload {
                ride_request_id,
            })) {
            Ok(ack_id) => {
                self.pending_ack = Some(PendingAck {
                    ack_id,
                    ride_request_id,
                });
                self.scheduler.schedule(
                    TimerKey::new(TimerPurpose::AckTimeout, ride_request_id.to_string()),
                    self.config.ack_timeout,
                );
            }
            Err(e) => {
                self.publish(DriverEvent::Error {
                    message: format!("{e}"),
                })
                .await;
            }
        }
    }

    async fn decline_ride(&mut self, ride_request_id: i64) {
        if self.state != DriverState::OfferReceived
            || self.offer.as_ref().map(|o| o.ride_request_id) != Some(ride_request_id)
        {
            self.publish(DriverEvent::Error {
                message: "No active ride offer to decline".into(),
            })
            .await;
            return;
        }
        // Fire-and-forget: no ack awaited, and the local transition does
        // not depend on delivery.
        if let Err(e) = self
            .manager
            .emit(ClientEvent::DeclineRide(RideRequestIdPayload {
                ride_request_id,
            }))
        {
            warn!("decline emit failed: {e}");
        }
        self.clear_offer().await;
        self.pending_ack = None;
        self.set_state(DriverState::Online).await;
        self.publish(DriverEvent::OfferDeclined { ride_request_id })
            .await;
    }

    /// A state-tagged ride progress emit: valid only in `expected`, and the
    /// local transition happens only if the emit was actually queued.
    async fn ride_step(&mut self, expected: DriverState, next: DriverState, status: RideStatus) {
        if self.state != expected {
            warn!(state = ?self.state, ?next, "ride step out of order ignored");
            self.publish(DriverEvent::Error {
                message: "Action not available in the current ride state".into(),
            })
            .await;
            return;
        }
        let Some(ride_id) = self.session.as_ref().map(|s| s.ride_id.clone()) else {
            warn!("ride step with no active session ignored");
            return;
        };
        let event = match next {
            DriverState::ArrivedAtPickup => ClientEvent::ArrivedAtPickup(RideIdPayload { ride_id }),
            DriverState::InProgress => ClientEvent::StartRide(RideIdPayload { ride_id }),
            _ => return,
        };
        if let Err(e) = self.manager.emit(event) {
            self.publish(DriverEvent::Error {
                message: format!("{e}"),
            })
            .await;
            return;
        }
        if let Some(session) = &mut self.session {
            session.status = status;
            *self.shared.session.lock().await = Some(session.clone());
        }
        self.set_state(next).await;
        self.publish(DriverEvent::StatusChanged { status }).await;
    }

    async fn complete_ride(&mut self) {
        if self.state != DriverState::InProgress {
            self.publish(DriverEvent::Error {
                message: "Action not available in the current ride state".into(),
            })
            .await;
            return;
        }
        let Some(ride_id) = self.session.as_ref().map(|s| s.ride_id.clone()) else {
            warn!("complete with no active session ignored");
            return;
        };
        if let Err(e) = self
            .manager
            .emit(ClientEvent::CompleteRide(RideIdPayload { ride_id }))
        {
            self.publish(DriverEvent::Error {
                message: format!("{e}"),
            })
            .await;
            return;
        }
        self.session = None;
        *self.shared.session.lock().await = None;
        self.set_state(DriverState::Online).await;
        self.publish(DriverEvent::RideCompleted).await;
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
                self.publish(DriverEvent::Connected).await;
                // Re-announce after every fresh connect while logically
                // online.
                self.announce().await;
            }
            LinkEventKind::Frame(frame) => {
                if let Some(server_event) = self.router.route(&frame) {
                    self.handle_server_event(server_event).await;
                }
            }
            LinkEventKind::Down { reason } => {
                self.shared.connected.store(false, Ordering::Release);
                self.announced = false;
                match self.manager.handle_down(reason.clone(), &mut self.scheduler) {
                    DownOutcome::Stale => {}
                    DownOutcome::Retrying { .. } => {
                        // All timers were re-armed or cancelled by the
                        // manager path; the in-flight accept can no longer
                        // resolve, so fold it now.
                        if self.pending_ack.take().is_some() {
                            self.resolve_accept_failure(TIMED_OUT_MESSAGE.into()).await;
                        }
                        self.publish(DriverEvent::Disconnected { reason }).await;
                    }
                    DownOutcome::GaveUp { reason } => {
                        self.publish(DriverEvent::Disconnected {
                            reason: Some(reason.clone()),
                        })
                        .await;
                        self.force_offline(reason).await;
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
                    self.force_offline(format!("{e}")).await;
                }
            }
            TimerPurpose::OfferExpiry => {
                let ride_request_id = key.id.parse::<i64>().ok();
                self.expire_offer(ride_request_id).await;
            }
            TimerPurpose::AckTimeout => {
                // No acknowledgement within the bound: same transition as a
                // negative ack, with a distinct message so the UI can tell
                // network failure from server refusal.
                if self.pending_ack.take().is_some() {
                    self.resolve_accept_failure(TIMED_OUT_MESSAGE.into()).await;
                }
            }
            TimerPurpose::RequestRetry => {
                debug!("ignoring passenger-side timer on driver connection");
            }
        }
    }

    // ── Server events ───────────────────────────────────────────────

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::NewRequest(offer) => self.offer_received(offer).await,

            ServerEvent::RequestTimeout(payload) => {
                // Same code path as the local countdown so the two can never
                // diverge.
                self.expire_offer(payload.ride_request_id).await;
            }

            ServerEvent::Ack { ack_id, body } => self.handle_ack(ack_id, body).await,

            ServerEvent::StatusUpdate(payload) => match payload.status {
                RideStatus::RideCancelled => self.cancel_active(payload.message).await,
                RideStatus::RideCompleted => {
                    if self.state.has_active_ride() {
                        self.session = None;
                        *self.shared.session.lock().await = None;
                        self.set_state(DriverState::Online).await;
                        self.publish(DriverEvent::RideCompleted).await;
                    }
                }
                status => {
                    debug!(?status, "driver status update ignored");
                }
            },

            ServerEvent::Cancelled(payload) => self.cancel_active(payload.reason).await,

            ServerEvent::ServerError(payload) => {
                self.publish(DriverEvent::Error {
                    message: payload.message,
                })
                .await;
            }

            // Passenger-side traffic has no business on this connection.
            ServerEvent::RequestResponse(_)
            | ServerEvent::DriverFound(_)
            | ServerEvent::NoDriverFound => {
                debug!("passenger-side event on driver connection ignored");
            }
        }
    }

    async fn offer_received(&mut self, offer: RideOffer) {
        match self.state {
            DriverState::Online => {}
            DriverState::OfferReceived => {
                // One active offer per connection; the driver is already
                // mid-decision, so the first offer stays.
                warn!(
                    incoming = offer.ride_request_id,
                    "second offer while one is active ignored"
                );
                return;
            }
            _ => {
                debug!(state = ?self.state, "offer while unavailable ignored");
                return;
            }
        }

        let countdown = self.offer_countdown(&offer);
        self.scheduler.schedule(
            TimerKey::new(TimerPurpose::OfferExpiry, offer.ride_request_id.to_string()),
            countdown,
        );
        self.offer = Some(offer.clone());
        *self.shared.offer.lock().await = Some(offer.clone());
        self.set_state(DriverState::OfferReceived).await;
        self.publish(DriverEvent::OfferReceived { offer }).await;
    }

    /// Remaining time on a pushed offer, or the configured window when the
    /// server sent no deadline.
    fn offer_countdown(&self, offer: &RideOffer) -> Duration {
        let Some(expires_at) = offer.expires_at else {
            return self.config.offer_timeout;
        };
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let remaining = expires_at.saturating_sub(now_ms);
        if remaining <= 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(remaining as u64)
        }
    }

    /// The offer ran out — by local countdown or by a server-pushed
    /// `requestTimeout`; both land here.
    async fn expire_offer(&mut self, ride_request_id: Option<i64>) {
        if self.state != DriverState::OfferReceived {
            debug!("offer expiry outside OfferReceived ignored");
            return;
        }
        let Some(active_id) = self.offer.as_ref().map(|o| o.ride_request_id) else {
            return;
        };
        if let Some(id) = ride_request_id {
            if id != active_id {
                debug!(id, active_id, "expiry for a different offer ignored");
                return;
            }
        }
        self.clear_offer().await;
        self.pending_ack = None;
        self.set_state(DriverState::Online).await;
        self.publish(DriverEvent::OfferExpired {
            ride_request_id: active_id,
        })
        .await;
    }

    async fn handle_ack(&mut self, ack_id: Option<Uuid>, body: AckBody) {
        let Some(pending) = self.pending_ack.take() else {
            debug!("ack with no accept in flight ignored");
            return;
        };
        if ack_id != Some(pending.ack_id) {
            // An ack for a superseded command; keep waiting for ours.
            debug!("ack with mismatched correlation id ignored");
            self.pending_ack = Some(pending);
            return;
        }
        self.scheduler.cancel(&TimerKey::new(
            TimerPurpose::AckTimeout,
            pending.ride_request_id.to_string(),
        ));

        match body {
            AckBody::TimedOut => {
                self.resolve_accept_failure(TIMED_OUT_MESSAGE.into()).await;
            }
            AckBody::Response(response) if response.success => {
                let Some(offer) = self.offer.take() else {
                    warn!("positive accept ack with no active offer");
                    self.set_state(DriverState::Online).await;
                    return;
                };
                *self.shared.offer.lock().await = None;
                self.scheduler.cancel(&TimerKey::new(
                    TimerPurpose::OfferExpiry,
                    offer.ride_request_id.to_string(),
                ));
                let ride_id = response
                    .ride_id
                    .unwrap_or_else(|| offer.ride_request_id.to_string());
                let session = RideSession {
                    ride_id,
                    pickup: offer.pickup,
                    dropoff: offer.dropoff,
                    price: offer.estimated_price,
                    status: RideStatus::DriverFound,
                };
                self.session = Some(session.clone());
                *self.shared.session.lock().await = Some(session.clone());
                self.set_state(DriverState::Accepted).await;
                self.publish(DriverEvent::RideAssigned { session }).await;
            }
            AckBody::Response(response) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "Ride no longer available".into());
                self.resolve_accept_failure(message).await;
            }
        }
    }

    /// Accept did not go through (negative ack or timeout): clear the offer
    /// and return to waiting with the reason surfaced once.
    async fn resolve_accept_failure(&mut self, message: String) {
        self.clear_offer().await;
        self.pending_ack = None;
        if self.state == DriverState::OfferReceived {
            self.set_state(DriverState::Online).await;
        }
        self.publish(DriverEvent::AcceptFailed { message }).await;
    }

    /// Server cancelled the undecided offer or the active ride.
    async fn cancel_active(&mut self, message: Option<String>) {
        match self.state {
            DriverState::OfferReceived => {
                self.clear_offer().await;
                self.pending_ack = None;
                self.set_state(DriverState::Online).await;
                self.publish(DriverEvent::RideCancelled { message }).await;
            }
            state if state.has_active_ride() => {
                self.session = None;
                *self.shared.session.lock().await = None;
                self.pending_ack = None;
                self.set_state(DriverState::Online).await;
                self.publish(DriverEvent::RideCancelled { message }).await;
            }
            _ => {
                debug!("cancellation with nothing active ignored");
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn report_presence(&mut self) {
        if !self.manager.is_connected() || self.state == DriverState::Offline {
            return;
        }
        if let Some(location) = self.last_location {
            self.emit_location(location).await;
        }
    }

    async fn emit_location(&mut self, location: GeoPoint) {
        let payload = LocationUpdatePayload {
            latitude: location.latitude,
            longitude: location.longitude,
            is_available: self.state == DriverState::Online,
        };
        if let Err(e) = self.manager.emit(ClientEvent::UpdateLocation(payload)) {
            debug!("location update not delivered: {e}");
        }
    }

    /// Drop the active offer and every timer tied to it.
    async fn clear_offer(&mut self) {
        if let Some(offer) = self.offer.take() {
            let id = offer.ride_request_id.to_string();
            self.scheduler
                .cancel(&TimerKey::new(TimerPurpose::OfferExpiry, id.clone()));
            self.scheduler
                .cancel(&TimerKey::new(TimerPurpose::AckTimeout, id));
            *self.shared.offer.lock().await = None;
        }
    }

    /// A failure that cannot be retried: resolve everything to `Offline`
    /// and surface the reason once. The session stays readable on the
    /// handle for the UI.
    async fn force_offline(&mut self, message: String) {
        self.presence.stop();
        self.scheduler.cancel_all();
        self.pending_ack = None;
        self.announced = false;
        self.offer = None;
        *self.shared.offer.lock().await = None;
        self.set_state(DriverState::Offline).await;
        self.publish(DriverEvent::Error { message }).await;
    }

    async fn teardown(&mut self, reason: Option<String>) {
        self.presence.stop();
        self.manager.disconnect(&mut self.scheduler);
        self.shared.connected.store(false, Ordering::Release);
        if self
            .event_tx
            .send(DriverEvent::Disconnected { reason })
            .await
            .is_err()
        {
            debug!("event channel closed, receiver dropped");
        }
    }

    async fn set_state(&mut self, state: DriverState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "driver state transition");
            self.state = state;
            self.router.reset();
            *self.shared.state.lock().await = state;
        }
    }

    async fn publish(&self, event: DriverEvent) {
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
