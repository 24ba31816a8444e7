//! Client configuration shared by both roles.

use std::time::Duration;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default bound for ack-expecting commands.
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default offer window when the server sends no deadline.
const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_secs(20);

/// Default fixed backoff between reconnect attempts.
const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Default delay before re-trying a ride request that is waiting for a
/// connection.
const DEFAULT_REQUEST_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default interval between presence reports while a driver is online.
const DEFAULT_PRESENCE_INTERVAL: Duration = Duration::from_secs(10);

/// Default bound on connection retries for the passenger role.
const DEFAULT_PASSENGER_MAX_RETRIES: u32 = 5;

/// Default bound for one transport connect attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a Ridewire client, either role.
///
/// All fields have production defaults; construct with [`RidewireConfig::new`]
/// and override as needed.
///
/// # Example
///
/// ```
/// use ridewire_client::config::RidewireConfig;
/// use std::time::Duration;
///
/// let config = RidewireConfig::new()
///     .with_ack_timeout(Duration::from_secs(5))
///     .with_event_channel_capacity(512);
/// assert_eq!(config.ack_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct RidewireConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up with incoming events, events are
    /// dropped (with a warning logged) to avoid blocking the actor loop.
    /// The `Disconnected`/`Offline` events are always delivered regardless
    /// of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown.
    ///
    /// When `shutdown` is called, the actor task is given this much time to
    /// close the transport and emit its final event. If the timeout expires
    /// the task is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Bound for ack-expecting commands (`driver:acceptRide`) and the
    /// passenger's request acknowledgement. Defaults to **10 seconds**.
    pub ack_timeout: Duration,
    /// Offer countdown used when a pushed offer carries no `expiresAt`.
    /// Defaults to **20 seconds**.
    pub offer_timeout: Duration,
    /// Fixed backoff between reconnect attempts, both roles.
    /// Defaults to **2 seconds**.
    pub reconnect_backoff: Duration,
    /// Connection retry bound for the passenger role. The driver role
    /// retries without bound. Defaults to **5**.
    pub passenger_max_retries: u32,
    /// Fixed delay between attempts to submit a ride request that is
    /// waiting for the connection to come up. Defaults to **2 seconds**.
    pub request_retry_delay: Duration,
    /// Interval between presence reports while a driver is online.
    /// Defaults to **10 seconds**.
    pub presence_interval: Duration,
    /// Bound for one transport connect attempt. A timed-out attempt counts
    /// against the retry policy like any other failure.
    /// Defaults to **10 seconds**.
    pub connect_timeout: Duration,
}

impl Default for RidewireConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            offer_timeout: DEFAULT_OFFER_TIMEOUT,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            passenger_max_retries: DEFAULT_PASSENGER_MAX_RETRIES,
            request_retry_delay: DEFAULT_REQUEST_RETRY_DELAY,
            presence_interval: DEFAULT_PRESENCE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl RidewireConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the bound for ack-expecting commands.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the fallback offer countdown.
    #[must_use]
    pub fn with_offer_timeout(mut self, timeout: Duration) -> Self {
        self.offer_timeout = timeout;
        self
    }

    /// Set the fixed backoff between reconnect attempts.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Set the passenger connection retry bound.
    #[must_use]
    pub fn with_passenger_max_retries(mut self, max_retries: u32) -> Self {
        self.passenger_max_retries = max_retries;
        self
    }

    /// Set the delay between ride-request submission retries.
    #[must_use]
    pub fn with_request_retry_delay(mut self, delay: Duration) -> Self {
        self.request_retry_delay = delay;
        self
    }

    /// Set the presence report interval.
    #[must_use]
    pub fn with_presence_interval(mut self, interval: Duration) -> Self {
        self.presence_interval = interval;
        self
    }

    /// Set the bound for one transport connect attempt.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RidewireConfig::new();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.ack_timeout, Duration::from_secs(10));
        assert_eq!(config.offer_timeout, Duration::from_secs(20));
        assert_eq!(config.passenger_max_retries, 5);
    }

    #[test]
    fn event_channel_capacity_is_clamped_to_one() {
        let config = RidewireConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn builder_methods() {
        let config = RidewireConfig::new()
            .with_ack_timeout(Duration::from_secs(3))
            .with_reconnect_backoff(Duration::from_millis(500))
            .with_passenger_max_retries(2);
        assert_eq!(config.ack_timeout, Duration::from_secs(3));
        assert_eq!(config.reconnect_backoff, Duration::from_millis(500));
        assert_eq!(config.passenger_max_retries, 2);
    }
}
