//! Single-shot timers for offer countdowns, ack deadlines, and retry waits.
//!
//! Every "wait, then act" path in the client goes through this scheduler
//! instead of ad-hoc sleeps, so the owning actor stays the single place
//! where time-driven transitions happen and tests can drive everything with
//! tokio's paused clock.
//!
//! A timer is keyed by `(purpose, id)`; scheduling a key that already has a
//! live timer replaces it. Firing is delivered as a message on the channel
//! returned from [`TimeoutScheduler::new`], and the owner must [`claim`]
//! the notification before acting on it: a firing whose sequence number no
//! longer matches the live entry lost a race against `cancel` (or a
//! reschedule) and is dropped. Each timer therefore fires exactly once or is
//! cancelled exactly once, never both.
//!
//! [`claim`]: TimeoutScheduler::claim

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// What a pending timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerPurpose {
    /// Offer countdown: the driver did not act before the deadline.
    OfferExpiry,
    /// No acknowledgement arrived for an ack-expecting command.
    AckTimeout,
    /// Backoff wait before the next reconnect attempt.
    Reconnect,
    /// Fixed delay before re-trying a ride request that is waiting for a
    /// connection.
    RequestRetry,
}

/// Identity of a pending timer: purpose plus the ride/request id it guards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TimerKey {
    pub purpose: TimerPurpose,
    pub id: String,
}

impl TimerKey {
    pub fn new(purpose: TimerPurpose, id: impl Into<String>) -> Self {
        Self {
            purpose,
            id: id.into(),
        }
    }
}

/// Notification that a timer's deadline passed.
///
/// Must be [`claim`](TimeoutScheduler::claim)ed before acting.
#[derive(Debug)]
pub(crate) struct TimerFired {
    pub key: TimerKey,
    seq: u64,
}

/// Owns every pending timer for one client actor.
pub(crate) struct TimeoutScheduler {
    fire_tx: mpsc::UnboundedSender<TimerFired>,
    active: HashMap<TimerKey, (u64, JoinHandle<()>)>,
    next_seq: u64,
}

impl TimeoutScheduler {
    /// Create a scheduler and the channel its firings arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        (
            Self {
                fire_tx,
                active: HashMap::new(),
                next_seq: 0,
            },
            fire_rx,
        )
    }

    /// Arm a single-shot timer. An existing timer under the same key is
    /// cancelled first.
    pub fn schedule(&mut self, key: TimerKey, delay: Duration) {
        self.cancel(&key);

        self.next_seq += 1;
        let seq = self.next_seq;
        let fire_tx = self.fire_tx.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the actor is shutting down; nothing to do.
            let _ = fire_tx.send(TimerFired {
                key: task_key,
                seq,
            });
        });
        debug!(?key, ?delay, "timer armed");
        self.active.insert(key, (seq, handle));
    }

    /// Cancel the timer under `key`, if one is pending.
    pub fn cancel(&mut self, key: &TimerKey) {
        if let Some((_, handle)) = self.active.remove(key) {
            handle.abort();
            debug!(?key, "timer cancelled");
        }
    }

    /// Cancel every pending timer. Used on disconnect/shutdown so no timer
    /// can mutate state afterwards.
    pub fn cancel_all(&mut self) {
        for (key, (_, handle)) in self.active.drain() {
            handle.abort();
            debug!(?key, "timer cancelled");
        }
    }

    /// Check a firing against the live table. Returns `true` when the timer
    /// is still current (and consumes it); a stale firing — cancelled or
    /// replaced after the notification was already queued — returns `false`
    /// and must be ignored.
    pub fn claim(&mut self, fired: &TimerFired) -> bool {
        match self.active.get(&fired.key) {
            Some((seq, _)) if *seq == fired.seq => {
                self.active.remove(&fired.key);
                true
            }
            _ => {
                debug!(key = ?fired.key, "stale timer firing dropped");
                false
            }
        }
    }

    /// Whether a timer is pending under `key`.
    #[cfg(test)]
    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.active.contains_key(key)
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.active.drain() {
            handle.abort();
        }
    }
}
