//! Connection ownership for one client role.
//!
//! [`ConnectionManager`] owns exactly one transport connection: it resolves
//! the handshake identity, spawns a *link task* per connect attempt, tracks
//! [`ConnectionState`], and decides what happens when the link drops. The
//! manager itself lives inside the role's actor task; link tasks only ever
//! send [`LinkEvent`]s back into that actor, so all state transitions stay
//! on one execution context.
//!
//! Connections are recreated, never reused: every attempt gets a fresh
//! transport from the [`Connector`] and a new generation number. Events
//! carrying a superseded generation are discarded by the owner, which is how
//! frames and acks from a torn-down link are kept away from fresh state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth::{AuthContext, AuthResolver, Role};
use crate::error::{Result, RidewireError};
use crate::protocol::{self, ClientEvent, EventFrame};
use crate::scheduler::{TimeoutScheduler, TimerKey, TimerPurpose};
use crate::transport::Connector;

/// Timer id used for the reconnect backoff wait.
pub(crate) const RECONNECT_TIMER_ID: &str = "link";

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A failure that is not being retried: auth resolution failed, or the
    /// retry policy is exhausted. Surfaced once, not repeated.
    Error(String),
}

/// Reconnection behavior for one role.
///
/// The passenger retries a bounded number of times; the driver retries
/// without bound, because a driver silently dropping offline mid-shift is
/// worse than a slow reconnect. Both use a fixed backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum consecutive failed attempts before giving up.
    /// `None` means retry forever.
    pub max_attempts: Option<u32>,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// A policy that gives up after `max_attempts` consecutive failures.
    pub fn bounded(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }

    /// A policy that never gives up.
    pub fn unbounded(backoff: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    /// Whether a retry is allowed after `attempt` consecutive failures.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

/// Message from a link task to the owning actor.
#[derive(Debug)]
pub(crate) struct LinkEvent {
    pub generation: u64,
    pub kind: LinkEventKind,
}

#[derive(Debug)]
pub(crate) enum LinkEventKind {
    /// Transport handshake completed; the connection is usable.
    Up,
    /// One decoded inbound frame, in transport-delivery order.
    Frame(EventFrame),
    /// The link failed or closed: connect error, send/receive error, or
    /// server-side close.
    Down { reason: Option<String> },
}

/// What the owner should do about a link going down.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DownOutcome {
    /// Event from a superseded link, or the owner already called
    /// [`ConnectionManager::disconnect`]. Ignore.
    Stale,
    /// A reconnect timer has been armed.
    Retrying { attempt: u32 },
    /// Retry bound exhausted; the connection is in `Error` state.
    GaveUp { reason: String },
}

/// Owns one transport connection for one client role.
pub(crate) struct ConnectionManager {
    connector: Arc<dyn Connector>,
    auth: AuthResolver,
    role: Role,
    policy: RetryPolicy,
    connect_timeout: Duration,
    state: ConnectionState,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    link_task: Option<JoinHandle<()>>,
    generation: u64,
    attempts: u32,
    closing: bool,
}

impl ConnectionManager {
    /// Create a manager and the channel its link events arrive on.
    pub fn new(
        connector: Arc<dyn Connector>,
        auth: AuthResolver,
        role: Role,
        policy: RetryPolicy,
        connect_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        (
            Self {
                connector,
                auth,
                role,
                policy,
                connect_timeout,
                state: ConnectionState::Disconnected,
                link_tx,
                outbound: None,
                link_task: None,
                generation: 0,
                attempts: 0,
                closing: false,
            },
            link_rx,
        )
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Whether the cached state *and* the live channel to the link task
    /// agree the connection is usable. The handshake may not be fully
    /// settled the instant the state flips, so emit paths check this rather
    /// than the cached state alone.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Begin a fresh connect cycle. Idempotent: calling while `Connecting`
    /// or `Connected` is a logged no-op.
    ///
    /// # Errors
    ///
    /// [`RidewireError::AuthResolution`] when the stored credential yields no
    /// user id; no transport is opened and nothing is retried.
    pub fn connect(&mut self) -> Result<()> {
        self.closing = false;
        self.attempts = 0;
        self.try_connect()
    }

    /// One connect attempt, used both by [`connect`](Self::connect) and the
    /// reconnect timer path.
    pub fn try_connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(role = %self.role, state = ?self.state, "connect ignored");
                return Ok(());
            }
            _ => {}
        }

        let auth = match self.auth.resolve(self.role) {
            Ok(auth) => auth,
            Err(e) => {
                self.state = ConnectionState::Error("auth".into());
                return Err(e);
            }
        };

        self.state = ConnectionState::Connecting;
        self.generation += 1;
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.outbound = Some(out_tx);

        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        debug!(role = %self.role, generation = self.generation, "opening link");
        self.link_task = Some(tokio::spawn(run_link(
            Arc::clone(&self.connector),
            auth,
            self.generation,
            self.connect_timeout,
            out_rx,
            self.link_tx.clone(),
        )));
        Ok(())
    }

    /// Returns `false` when the event belongs to a superseded link.
    pub fn is_current(&self, event: &LinkEvent) -> bool {
        event.generation == self.generation
    }

    /// The link completed its handshake.
    pub fn handle_up(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        debug!(role = %self.role, "link up");
    }

    /// The link failed or closed. Decides between retrying (arming a
    /// reconnect timer) and giving up.
    pub fn handle_down(
        &mut self,
        reason: Option<String>,
        scheduler: &mut TimeoutScheduler,
    ) -> DownOutcome {
        if self.closing {
            return DownOutcome::Stale;
        }
        self.outbound = None;
        let reason = reason.unwrap_or_else(|| "connection lost".into());
        self.attempts += 1;

        if self.policy.allows(self.attempts) {
            self.state = ConnectionState::Disconnected;
            scheduler.schedule(
                TimerKey::new(TimerPurpose::Reconnect, RECONNECT_TIMER_ID),
                self.policy.backoff,
            );
            warn!(
                role = %self.role,
                attempt = self.attempts,
                "link down ({reason}); reconnect scheduled"
            );
            DownOutcome::Retrying {
                attempt: self.attempts,
            }
        } else {
            self.state = ConnectionState::Error(reason.clone());
            warn!(role = %self.role, "link down ({reason}); retry bound exhausted");
            DownOutcome::GaveUp { reason }
        }
    }

    /// Queue an event for the server.
    ///
    /// # Errors
    ///
    /// [`RidewireError::NotConnected`] when the link is not usable. The
    /// caller reports the condition; nothing is buffered for later.
    pub fn emit(&self, event: ClientEvent) -> Result<()> {
        let frame = event.into_frame(None)?;
        self.emit_frame(frame)
    }

    /// Queue an ack-expecting event and return the correlation id the reply
    /// must carry.
    pub fn emit_with_ack(&self, event: ClientEvent) -> Result<Uuid> {
        let ack_id = Uuid::new_v4();
        let frame = event.into_frame(Some(ack_id))?;
        self.emit_frame(frame)?;
        Ok(ack_id)
    }

    fn emit_frame(&self, frame: EventFrame) -> Result<()> {
        let tx = match (&self.state, &self.outbound) {
            (ConnectionState::Connected, Some(tx)) if !tx.is_closed() => tx,
            _ => return Err(RidewireError::NotConnected),
        };
        let text = protocol::encode_frame(&frame)?;
        tx.send(text).map_err(|_| RidewireError::NotConnected)
    }

    /// Tear the connection down and pause retries entirely. Safe to call
    /// multiple times. Pending timers are cancelled through the scheduler so
    /// none can fire after this returns.
    pub fn disconnect(&mut self, scheduler: &mut TimeoutScheduler) {
        self.closing = true;
        // Supersede anything in flight: frames, acks, and Down events from
        // the old link are stale from here on.
        self.generation += 1;
        // Dropping the outbound sender lets the link task close the
        // transport gracefully and exit.
        self.outbound = None;
        self.link_task = None;
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
        scheduler.cancel_all();
        debug!(role = %self.role, "disconnected");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// One connection's lifetime: connect, pump frames both ways, report down.
async fn run_link(
    connector: Arc<dyn Connector>,
    auth: AuthContext,
    generation: u64,
    connect_timeout: Duration,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    let report = |kind: LinkEventKind| {
        let _ = link_tx.send(LinkEvent {
            generation,
            kind,
        });
    };

    let mut transport = match tokio::time::timeout(connect_timeout, connector.connect(&auth)).await
    {
        Ok(Ok(transport)) => transport,
        Ok(Err(e)) => {
            report(LinkEventKind::Down {
                reason: Some(format!("connect failed: {e}")),
            });
            return;
        }
        Err(_) => {
            report(LinkEventKind::Down {
                reason: Some("connect timed out".into()),
            });
            return;
        }
    };

    report(LinkEventKind::Up);

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if let Err(e) = transport.send(text).await {
                            error!("transport send error: {e}");
                            report(LinkEventKind::Down {
                                reason: Some(format!("transport send error: {e}")),
                            });
                            break;
                        }
                    }
                    // Owner dropped the outbound side: deliberate teardown.
                    None => {
                        debug!("outbound channel closed, closing transport");
                        let _ = transport.close().await;
                        break;
                    }
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        match protocol::decode_frame(&text) {
                            Ok(frame) => report(LinkEventKind::Frame(frame)),
                            Err(e) => {
                                warn!(error = %e, raw = %text, "dropping undecodable inbound frame");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        report(LinkEventKind::Down {
                            reason: Some(format!("transport receive error: {e}")),
                        });
                        break;
                    }
                    None => {
                        debug!("transport closed by server");
                        report(LinkEventKind::Down { reason: None });
                        break;
                    }
                }
            }
        }
    }
}
