//! Inbound event routing: decode, deduplicate, observe.
//!
//! The transport may redeliver events on flaky links, so within one state
//! machine state a second delivery of the same `(event, id)` pair must have
//! no side effects. The router keeps the seen-set for the *current* state;
//! the owning state machine clears it on every transition, which is what
//! lets a later `statusUpdate` for the same ride id through once the
//! previous one has been applied.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::protocol::{EventFrame, ServerEvent};

/// Routes decoded server events to the owning state machine, dropping
/// malformed payloads, duplicates, and event names this client does not
/// recognize.
#[derive(Debug, Default)]
pub(crate) struct EventRouter {
    seen: HashSet<(&'static str, String)>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and admit one inbound frame.
    ///
    /// Returns `None` (after logging) when the frame is unrecognized,
    /// malformed, or a duplicate delivery; decoding failures never affect
    /// other in-flight state.
    pub fn route(&mut self, frame: &EventFrame) -> Option<ServerEvent> {
        let event = match ServerEvent::from_frame(frame) {
            Ok(Some(event)) => event,
            Ok(None) => {
                // Pass-through observer for unrecognized events; must not
                // affect routing decisions.
                debug!(event = %frame.event, "ignoring unrecognized server event");
                return None;
            }
            Err(e) => {
                warn!(event = %frame.event, error = %e, "dropping malformed server event");
                return None;
            }
        };

        if let Some(id) = event.identity() {
            if !self.seen.insert((event.kind(), id.clone())) {
                debug!(kind = event.kind(), %id, "dropping duplicate server event");
                return None;
            }
        }
        Some(event)
    }

    /// Forget every delivery seen in the current state. Called by the state
    /// machine on each transition.
    pub fn reset(&mut self) {
        self.seen.clear();
    }
}
