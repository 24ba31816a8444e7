#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for the passenger ride lifecycle.
//!
//! Uses the channel-based mock transport from `tests/common` to script
//! server behavior, and tokio's paused clock for every timer-driven path —
//! no test waits on a real clock.

mod common;

use ridewire_client::passenger::RideRequestDraft;
use ridewire_client::{
    PassengerClient, PassengerEvent, PassengerState, RideStatus, RidewireError, Stop,
};

use common::{
    driver_found, next_event, next_matching, no_driver_found, request_response, ride_cancelled,
    server_error, settle, status_update, test_auth, test_config, FailingConnector,
    MockTransport, ScriptedConnector, ServerHandle,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn draft() -> RideRequestDraft {
    RideRequestDraft::new(
        Stop::new(52.52, 13.40, "Alexanderplatz 1"),
        Stop::new(52.50, 13.45, "Karl-Marx-Allee 99"),
        3,
        14.20,
    )
    .with_preferences(vec![2, 7])
}

/// Start a client over a single live mock transport.
fn start_client() -> (
    PassengerClient,
    tokio::sync::mpsc::Receiver<PassengerEvent>,
    ServerHandle,
) {
    let (connector, handle, _connects) = ScriptedConnector::single();
    let (client, events) = PassengerClient::start(connector, test_auth(12), test_config());
    (client, events, handle)
}

/// Request a ride and consume events up to the acknowledgement.
async fn start_search(
    client: &PassengerClient,
    events: &mut tokio::sync::mpsc::Receiver<PassengerEvent>,
    handle: &ServerHandle,
    ride_id: &str,
) {
    client.request_ride(draft()).unwrap();
    handle.wait_for_sent("passenger:requestRide", 1).await;
    handle.push(request_response(true, Some(ride_id), None));
    next_matching(events, |e| {
        matches!(e, PassengerEvent::RequestAcknowledged { .. })
    })
    .await;
}

// ════════════════════════════════════════════════════════════════════
// Request round-trip
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn request_ride_round_trip_assigns_ride_id() {
    let (mut client, mut events, handle) = start_client();

    client.request_ride(draft()).unwrap();

    let ev = next_event(&mut events).await;
    assert_eq!(ev, PassengerEvent::SearchStarted);
    assert_eq!(client.state().await, PassengerState::Searching);

    let frames = handle.wait_for_sent("passenger:requestRide", 1).await;
    assert_eq!(frames[0].data["pickupAddress"], "Alexanderplatz 1");
    assert_eq!(frames[0].data["dropoffAddress"], "Karl-Marx-Allee 99");
    assert_eq!(frames[0].data["role"], "passenger");
    assert_eq!(frames[0].data["serviceTypeId"], 3);
    assert_eq!(frames[0].data["selectedPreferences"], serde_json::json!([2, 7]));
    assert_eq!(frames[0].data["estimatedPrice"], 14.20);

    handle.push(request_response(true, Some("R1"), None));
    let ev = next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::RequestAcknowledged { .. })
    })
    .await;
    assert_eq!(
        ev,
        PassengerEvent::RequestAcknowledged {
            ride_id: "R1".into()
        }
    );

    assert_eq!(client.state().await, PassengerState::Searching);
    assert_eq!(client.current_ride_id().await.as_deref(), Some("R1"));

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_request_surfaces_server_message_verbatim() {
    let (mut client, mut events, handle) = start_client();

    client.request_ride(draft()).unwrap();
    handle.wait_for_sent("passenger:requestRide", 1).await;
    handle.push(request_response(false, None, Some("No coverage in this area")));

    let ev = next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::RequestFailed { .. })
    })
    .await;
    assert_eq!(
        ev,
        PassengerEvent::RequestFailed {
            message: "No coverage in this area".into()
        }
    );
    assert_eq!(client.state().await, PassengerState::Idle);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_request_times_out_to_idle() {
    let (mut client, mut events, handle) = start_client();

    client.request_ride(draft()).unwrap();
    handle.wait_for_sent("passenger:requestRide", 1).await;

    // No requestResponse ever arrives; the ack timer resolves the machine.
    let ev = next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::RequestFailed { .. })
    })
    .await;
    assert_eq!(
        ev,
        PassengerEvent::RequestFailed {
            message: "Request timed out".into()
        }
    );
    assert_eq!(client.state().await, PassengerState::Idle);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Driver found and status progression
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn driver_found_transitions_and_builds_session() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;

    handle.push(driver_found("R1", 9, "Dana"));
    let ev = next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::DriverFound { .. })
    })
    .await;
    if let PassengerEvent::DriverFound { driver } = ev {
        assert_eq!(driver.driver_id, 9);
        assert_eq!(driver.driver_name, "Dana");
        assert_eq!(driver.rating, Some(4.9));
    } else {
        unreachable!();
    }

    assert_eq!(client.state().await, PassengerState::DriverFound);
    let session = client.current_session().await.unwrap();
    assert_eq!(session.ride_id, "R1");
    assert_eq!(session.pickup.address, "Alexanderplatz 1");
    assert_eq!(session.status, RideStatus::DriverFound);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_driver_found_is_applied_exactly_once() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;

    handle.push(driver_found("R1", 9, "Dana"));
    handle.push(driver_found("R1", 9, "Dana"));
    // A sentinel event after the duplicates: if the duplicate had produced a
    // second DriverFound, it would arrive before this error does.
    handle.push(server_error("sentinel"));

    next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::DriverFound { .. })
    })
    .await;
    let ev = next_event(&mut events).await;
    assert_eq!(
        ev,
        PassengerEvent::Error {
            message: "sentinel".into()
        }
    );

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn status_updates_progress_through_the_ride() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;
    handle.push(driver_found("R1", 9, "Dana"));
    next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::DriverFound { .. })
    })
    .await;

    handle.push(status_update("R1", "driver_en_route"));
    let ev = next_event(&mut events).await;
    assert_eq!(
        ev,
        PassengerEvent::StatusChanged {
            status: RideStatus::DriverEnRoute,
            message: None
        }
    );
    assert_eq!(client.state().await, PassengerState::EnRoute);

    handle.push(status_update("R1", "driver_arrived"));
    next_event(&mut events).await;
    assert_eq!(client.state().await, PassengerState::Arrived);

    handle.push(status_update("R1", "ride_started"));
    next_event(&mut events).await;
    assert_eq!(client.state().await, PassengerState::InProgress);

    handle.push(status_update("R1", "ride_completed"));
    let ev = next_event(&mut events).await;
    assert_eq!(ev, PassengerEvent::RideCompleted);
    assert_eq!(client.state().await, PassengerState::Completed);
    assert!(client.current_session().await.is_none());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stale_status_update_does_not_move_the_ride_backwards() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;
    handle.push(driver_found("R1", 9, "Dana"));
    next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::DriverFound { .. })
    })
    .await;

    handle.push(status_update("R1", "ride_started"));
    next_event(&mut events).await;
    assert_eq!(client.state().await, PassengerState::InProgress);

    // A redelivered earlier status must not rewind the ride.
    handle.push(status_update("R1", "driver_en_route"));
    settle().await;
    assert_eq!(client.state().await, PassengerState::InProgress);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Cancellation (Scenario D) and no-driver-found
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn cancelled_status_while_driver_found_clears_the_session() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;
    handle.push(driver_found("R1", 9, "Dana"));
    next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::DriverFound { .. })
    })
    .await;
    assert!(client.current_session().await.is_some());

    handle.push(status_update("R1", "ride_cancelled"));
    let ev = next_event(&mut events).await;
    assert!(matches!(ev, PassengerEvent::RideCancelled { .. }));
    assert_eq!(client.state().await, PassengerState::Cancelled);
    assert!(client.current_session().await.is_none());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ride_cancelled_event_behaves_like_cancelled_status() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;

    handle.push(ride_cancelled(Some("Passenger no-show")));
    let ev = next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::RideCancelled { .. })
    })
    .await;
    assert_eq!(
        ev,
        PassengerEvent::RideCancelled {
            message: Some("Passenger no-show".into())
        }
    );
    assert_eq!(client.state().await, PassengerState::Cancelled);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn no_driver_found_is_terminal_for_the_attempt() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;

    handle.push(no_driver_found());
    let ev = next_matching(&mut events, |e| matches!(e, PassengerEvent::NoDriverFound)).await;
    assert_eq!(ev, PassengerEvent::NoDriverFound);
    assert_eq!(client.state().await, PassengerState::NoDriverFound);

    // A fresh request is required — and allowed — to retry.
    client.request_ride(draft()).unwrap();
    handle.wait_for_sent("passenger:requestRide", 2).await;

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Local cancel
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn cancel_with_assigned_ride_id_tells_the_server() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;

    client.cancel_ride_search().unwrap();
    let frames = handle.wait_for_sent("passenger:cancelRide", 1).await;
    assert_eq!(frames[0].data["rideId"], "R1");

    let ev = next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::SearchCancelled)
    })
    .await;
    assert_eq!(ev, PassengerEvent::SearchCancelled);
    assert_eq!(client.state().await, PassengerState::Idle);
    assert!(client.current_ride_id().await.is_none());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_before_acknowledgement_resets_locally_only() {
    let (mut client, mut events, handle) = start_client();

    client.request_ride(draft()).unwrap();
    handle.wait_for_sent("passenger:requestRide", 1).await;

    // No ride id assigned yet: nothing to tell the server.
    client.cancel_ride_search().unwrap();
    next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::SearchCancelled)
    })
    .await;

    settle().await;
    assert!(handle.sent_named("passenger:cancelRide").is_empty());
    assert_eq!(client.state().await, PassengerState::Idle);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_outside_searching_is_rejected_locally() {
    let (mut client, mut events, _handle) = start_client();

    client.cancel_ride_search().unwrap();
    let ev = next_matching(&mut events, |e| matches!(e, PassengerEvent::Error { .. })).await;
    assert_eq!(
        ev,
        PassengerEvent::Error {
            message: "No ride search in progress".into()
        }
    );
    assert_eq!(client.state().await, PassengerState::Idle);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Scenario A: request while disconnected
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn request_while_disconnected_connects_then_emits_exactly_once() {
    let (transport, handle) = MockTransport::new(None);
    let (connector, connects) = ScriptedConnector::new(vec![transport]);
    let (mut client, mut events) = PassengerClient::start(connector, test_auth(12), test_config());

    // No prior connect: the request itself must open the connection.
    client.request_ride(draft()).unwrap();

    next_matching(&mut events, |e| matches!(e, PassengerEvent::Connected)).await;
    handle.wait_for_sent("passenger:requestRide", 1).await;
    assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Let every retry timer horizon pass: the request must not be re-emitted.
    tokio::time::advance(std::time::Duration::from_secs(60)).await;
    settle().await;
    assert_eq!(handle.sent_named("passenger:requestRide").len(), 1);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn request_fails_once_when_the_server_is_unreachable() {
    let connector = FailingConnector::new();
    let connects = std::sync::Arc::clone(&connector.connects);
    let (mut client, mut events) = PassengerClient::start(connector, test_auth(12), test_config());

    client.request_ride(draft()).unwrap();

    let ev = next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::RequestFailed { .. })
    })
    .await;
    assert_eq!(
        ev,
        PassengerEvent::RequestFailed {
            message: "Could not reach the dispatch server".into()
        }
    );
    // Bounded retries: the passenger role never hammers the server forever.
    let attempts = connects.load(std::sync::atomic::Ordering::SeqCst);
    assert!(
        (1..=6).contains(&attempts),
        "expected bounded connect attempts, got {attempts}"
    );

    // The failure is surfaced once, not repeated.
    tokio::time::advance(std::time::Duration::from_secs(120)).await;
    settle().await;
    while let Ok(ev) = events.try_recv() {
        assert!(
            !matches!(ev, PassengerEvent::RequestFailed { .. }),
            "request failure reported twice"
        );
    }

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn request_with_unusable_credential_fails_without_retries() {
    let (connector, _handle, connects) = ScriptedConnector::single();
    let (mut client, mut events) =
        PassengerClient::start(connector, common::signed_out_auth(), test_config());

    client.request_ride(draft()).unwrap();

    next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::RequestFailed { .. })
    })
    .await;
    // Auth resolution failed before any socket was opened.
    assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 0);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Disconnects and reconnection
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn transport_drop_retains_session_and_reconnects() {
    let (t1, h1) = MockTransport::new(None);
    let (t2, h2) = MockTransport::new(None);
    let (connector, connects) = ScriptedConnector::new(vec![t1, t2]);
    let (mut client, mut events) = PassengerClient::start(connector, test_auth(12), test_config());

    client.connect().unwrap();
    next_matching(&mut events, |e| matches!(e, PassengerEvent::Connected)).await;

    client.request_ride(draft()).unwrap();
    h1.wait_for_sent("passenger:requestRide", 1).await;
    h1.push(request_response(true, Some("R1"), None));
    h1.push(driver_found("R1", 9, "Dana"));
    next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::DriverFound { .. })
    })
    .await;

    // The link dies unexpectedly: the session must survive in memory.
    h1.fail("wifi gone");
    next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::Disconnected { .. })
    })
    .await;
    assert!(client.current_session().await.is_some());

    // Fixed backoff, then a fresh transport.
    next_matching(&mut events, |e| matches!(e, PassengerEvent::Connected)).await;
    assert_eq!(connects.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert!(!h2.sent.lock().unwrap().is_empty() || client.is_connected());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn explicit_disconnect_clears_connection_state() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;
    handle.push(driver_found("R1", 9, "Dana"));
    next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::DriverFound { .. })
    })
    .await;

    client.disconnect().unwrap();
    next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::Disconnected { .. })
    })
    .await;
    assert!(!client.is_connected());
    assert!(client.current_session().await.is_none());

    // No reconnect happens on its own after an owner-requested disconnect.
    tokio::time::advance(std::time::Duration::from_secs(60)).await;
    settle().await;
    assert!(!client.is_connected());

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Robustness
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_dropped_without_breaking_the_stream() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;

    // Garbage text, a frame with the wrong shape, then a valid event.
    handle.push_raw("{not json");
    handle.push(common::frame(
        "ride:statusUpdate",
        serde_json::json!({"status": "definitely_not_a_status"}),
    ));
    handle.push(driver_found("R1", 9, "Dana"));

    let ev = next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::DriverFound { .. })
    })
    .await;
    assert!(matches!(ev, PassengerEvent::DriverFound { .. }));

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn generic_error_event_is_surfaced_without_a_transition() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;

    handle.push(server_error("Temporary dispatch hiccup"));
    let ev = next_matching(&mut events, |e| matches!(e, PassengerEvent::Error { .. })).await;
    assert_eq!(
        ev,
        PassengerEvent::Error {
            message: "Temporary dispatch hiccup".into()
        }
    );
    assert_eq!(client.state().await, PassengerState::Searching);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn request_while_searching_is_rejected() {
    let (mut client, mut events, handle) = start_client();
    start_search(&client, &mut events, &handle, "R1").await;

    client.request_ride(draft()).unwrap();
    let ev = next_matching(&mut events, |e| matches!(e, PassengerEvent::Error { .. })).await;
    assert_eq!(
        ev,
        PassengerEvent::Error {
            message: "A ride search is already in progress".into()
        }
    );
    // The original search is untouched.
    assert_eq!(client.state().await, PassengerState::Searching);
    assert_eq!(handle.sent_named("passenger:requestRide").len(), 1);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Handle lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn shutdown_emits_final_disconnected_and_closes_the_handle() {
    let (mut client, mut events, handle) = start_client();
    client.connect().unwrap();
    next_matching(&mut events, |e| matches!(e, PassengerEvent::Connected)).await;

    client.shutdown().await;

    let ev = next_matching(&mut events, |e| {
        matches!(e, PassengerEvent::Disconnected { .. })
    })
    .await;
    assert_eq!(
        ev,
        PassengerEvent::Disconnected {
            reason: Some("client shut down".into())
        }
    );
    // The link task closes the transport on its own schedule.
    let closed = std::sync::Arc::clone(&handle.closed);
    common::wait_until(move || closed.load(std::sync::atomic::Ordering::Relaxed)).await;

    let result = client.request_ride(draft());
    assert!(matches!(result, Err(RidewireError::ClientClosed)));
}

#[tokio::test(start_paused = true)]
async fn double_shutdown_does_not_panic() {
    let (mut client, mut events, _handle) = start_client();
    client.connect().unwrap();
    next_matching(&mut events, |e| matches!(e, PassengerEvent::Connected)).await;

    client.shutdown().await;
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn drop_without_explicit_shutdown_ends_the_event_stream() {
    let (client, mut events, _handle) = start_client();
    client.connect().unwrap();
    next_matching(&mut events, |e| matches!(e, PassengerEvent::Connected)).await;

    drop(client);
    // The actor is aborted; the channel closes without hanging.
    while events.recv().await.is_some() {}
}
