//! Periodic availability reporting for an online driver.
//!
//! The reporter is a small tick task: it never touches the connection
//! itself, it only nudges the driver actor at a fixed interval. The actor
//! emits `driver:updateLocation` with the last known location when — and
//! only when — the link is up, so a flaky connection just means skipped
//! reports, not queued ones.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Drives periodic presence ticks into the driver actor while online.
#[derive(Debug, Default)]
pub(crate) struct PresenceReporter {
    task: Option<JoinHandle<()>>,
}

impl PresenceReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking. A running reporter is restarted.
    pub fn start(&mut self, interval: Duration, tick_tx: mpsc::UnboundedSender<()>) {
        self.stop();
        debug!(?interval, "presence reporting started");
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of `interval` fires immediately; skip it, the
            // announce already carried the current location.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tick_tx.send(()).is_err() {
                    break;
                }
            }
        }));
    }

    /// Stop ticking. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("presence reporting stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for PresenceReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_arrive_at_the_configured_interval() {
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel();
        let mut reporter = PresenceReporter::new();
        reporter.start(Duration::from_secs(10), tick_tx);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(tick_rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(tick_rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_ticking() {
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel();
        let mut reporter = PresenceReporter::new();
        reporter.start(Duration::from_secs(1), tick_tx);
        assert!(reporter.is_running());

        reporter.stop();
        assert!(!reporter.is_running());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(tick_rx.try_recv().is_err());
    }
}
