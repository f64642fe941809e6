//! Event bridge integration tests.
//!
//! Runs the bridge with a real coordinator over `MockLedger` and a real
//! `BrokerClient` against a wiremock broker, then checks the ledger writes
//! each event produced and their order.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use bridge_test_utils::{
    call_labels, compressed, forwarded_event, frontend_envelope, join_track, participant_joined,
    publish_answer, test_coordinator_config, test_identity, MockBroker, MockLedger,
    TEST_PARTICIPANT, TEST_ROOM,
};
use ledger_bridge::bridge::{EventBridge, EventOutcome};
use ledger_bridge::coordinator::TransactionCoordinator;
use ledger_bridge::ledger::{EventKind, LedgerCall, LedgerEvent};
use ledger_bridge::observability::HealthState;
use ledger_bridge::tasks::start_event_watcher;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

struct Harness {
    ledger: MockLedger,
    broker: MockBroker,
    bridge: EventBridge,
}

impl Harness {
    async fn start() -> Self {
        let ledger = MockLedger::new();
        let broker = MockBroker::start().await;
        let coordinator = TransactionCoordinator::start(
            Arc::new(ledger.clone()),
            test_identity(),
            test_coordinator_config(),
        );
        let bridge = EventBridge::new(Arc::new(broker.client()), coordinator);
        Self {
            ledger,
            broker,
            bridge,
        }
    }

    fn last_envelope(&self) -> Value {
        self.ledger
            .calls()
            .iter()
            .rev()
            .find_map(frontend_envelope)
            .expect("a ForwardEventToFrontend write")
    }
}

fn offer() -> Value {
    json!({"type": "offer", "sdp": "v=0 offer"})
}

// ============================================================================
// publish-track
// ============================================================================

#[tokio::test]
async fn test_publish_writes_tracks_then_session_then_response() {
    let harness = Harness::start().await;
    let answer = publish_answer(&[("audio0", "0"), ("video0", "1")]);
    harness.broker.mount_create_session("sess-pub").await;
    harness
        .broker
        .mount_tracks_new("sess-pub", answer.clone())
        .await;

    let event = forwarded_event(&json!({
        "type": "publish-track",
        "offer": offer(),
        "tracks": [
            {"trackName": "audio0", "mid": "0", "location": "local"},
            {"trackName": "video0", "mid": "1", "location": "local"}
        ]
    }));
    let outcome = harness.bridge.handle_event(event).await;
    assert_eq!(outcome, EventOutcome::Handled);

    let calls = harness.ledger.calls();
    assert_eq!(
        call_labels(&calls),
        vec!["add_track", "add_track", "set_session_id", "forward_to_frontend"]
    );

    let Some(LedgerCall::AddTrack {
        room_id,
        participant,
        session_id,
        track_name,
        mid,
        location,
        is_published,
    }) = calls.first()
    else {
        unreachable!("first write should be AddTrack");
    };
    assert_eq!(room_id, TEST_ROOM);
    assert_eq!(participant, TEST_PARTICIPANT);
    assert_eq!(session_id, "sess-pub");
    assert_eq!(track_name, "audio0");
    assert_eq!(mid, "0");
    assert_eq!(location, "local");
    assert!(*is_published);

    let Some(LedgerCall::SetParticipantSessionId { session_id, .. }) = calls.get(2) else {
        unreachable!("third write should be SetSessionId");
    };
    assert_eq!(session_id, "sess-pub");

    assert_eq!(
        harness.last_envelope(),
        json!({"type": "publish-track-response", "cloudflareResponse": answer})
    );

    // Nonces follow write order
    assert_eq!(harness.ledger.nonces(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_publish_sends_offer_and_tracks_to_broker() {
    let harness = Harness::start().await;
    harness.broker.mount_create_session("sess-pub").await;
    harness
        .broker
        .mount_tracks_new("sess-pub", publish_answer(&[("audio0", "0")]))
        .await;

    harness
        .bridge
        .handle_event(forwarded_event(&json!({
            "type": "publish-track",
            "offer": offer(),
            "tracks": [{"trackName": "audio0", "mid": "0", "location": "local"}]
        })))
        .await;

    let bodies = harness.broker.request_bodies().await;
    let publish_body = bodies.last().unwrap();
    assert_eq!(publish_body["sessionDescription"], offer());
    assert_eq!(
        publish_body["tracks"],
        json!([{"trackName": "audio0", "mid": "0", "location": "local"}])
    );
}

#[tokio::test]
async fn test_publish_with_compressed_body() {
    let harness = Harness::start().await;
    harness.broker.mount_create_session("sess-z").await;
    harness
        .broker
        .mount_tracks_new("sess-z", publish_answer(&[("screen", "2")]))
        .await;

    let body = json!({
        "offer": offer(),
        "tracks": [{"trackName": "screen", "mid": "2", "location": "local"}]
    });
    let outcome = harness
        .bridge
        .handle_event(forwarded_event(&json!({
            "type": "publish-track",
            "compressedData": compressed(&body)
        })))
        .await;

    assert_eq!(outcome, EventOutcome::Handled);
    assert_eq!(
        call_labels(&harness.ledger.calls()),
        vec!["add_track", "set_session_id", "forward_to_frontend"]
    );
}

#[tokio::test]
async fn test_publish_skips_add_track_for_incomplete_broker_tracks() {
    let harness = Harness::start().await;
    harness.broker.mount_create_session("sess-pub").await;
    harness
        .broker
        .mount_tracks_new(
            "sess-pub",
            json!({
                "sessionDescription": {"type": "answer", "sdp": "v=0"},
                "tracks": [{"trackName": "audio0", "mid": ""}]
            }),
        )
        .await;

    harness
        .bridge
        .handle_event(forwarded_event(&json!({
            "type": "publish-track",
            "offer": offer(),
            "tracks": [{"trackName": "audio0", "mid": "0", "location": "local"}]
        })))
        .await;

    assert_eq!(
        call_labels(&harness.ledger.calls()),
        vec!["set_session_id", "forward_to_frontend"]
    );
}

#[tokio::test]
async fn test_publish_session_failure_writes_nothing() {
    let harness = Harness::start().await;
    harness
        .broker
        .mount_error("POST", "/new", "quota_exceeded", "Too many sessions")
        .await;

    let outcome = harness
        .bridge
        .handle_event(forwarded_event(&json!({
            "type": "publish-track",
            "offer": offer(),
            "tracks": []
        })))
        .await;

    assert_eq!(outcome, EventOutcome::Failed);
    assert!(harness.ledger.calls().is_empty());
}

// ============================================================================
// pull-track
// ============================================================================

#[tokio::test]
async fn test_pull_success_forwards_broker_response() {
    let harness = Harness::start().await;
    let answer = json!({
        "requiresImmediateRenegotiation": true,
        "sessionDescription": {"type": "offer", "sdp": "v=0 pull"},
        "tracks": [{"trackName": "audio0", "mid": "3", "sessionId": "sess-remote"}]
    });
    harness
        .broker
        .mount_tracks_new("sess-local", answer.clone())
        .await;

    let outcome = harness
        .bridge
        .handle_event(forwarded_event(&json!({
            "type": "pull-track",
            "sessionID": "sess-local",
            "tracks": [{"trackName": "audio0", "sessionId": "sess-remote"}]
        })))
        .await;

    assert_eq!(outcome, EventOutcome::Handled);
    assert_eq!(
        call_labels(&harness.ledger.calls()),
        vec!["forward_to_frontend"]
    );
    assert_eq!(
        harness.last_envelope(),
        json!({"type": "pull-track-response", "cloudflareResponse": answer})
    );

    // Pull descriptors get the default remote location
    let bodies = harness.broker.request_bodies().await;
    assert_eq!(bodies.last().unwrap()["tracks"][0]["location"], "remote");
}

#[tokio::test]
async fn test_pull_failure_forwards_error_envelope() {
    let harness = Harness::start().await;
    harness
        .broker
        .mount_error(
            "POST",
            "/sess-local/tracks/new",
            "session_error",
            "Session not found",
        )
        .await;

    let outcome = harness
        .bridge
        .handle_event(forwarded_event(&json!({
            "type": "pull-track",
            "sessionID": "sess-local",
            "tracks": [{"trackName": "audio0", "sessionId": "sess-remote"}]
        })))
        .await;

    assert_eq!(outcome, EventOutcome::Failed);
    let envelope = harness.last_envelope();
    assert_eq!(envelope["type"], "pull-track-response");
    assert_eq!(envelope["errorCode"], 500);
    let description = envelope["errorDescription"].as_str().unwrap();
    assert!(description.starts_with("Failed to pull tracks: "));
    assert!(description.contains("Session not found"));
    assert!(envelope.get("cloudflareResponse").is_none());
}

#[tokio::test]
async fn test_pull_with_compressed_body() {
    let harness = Harness::start().await;
    harness
        .broker
        .mount_tracks_new("sess-local", json!({"tracks": []}))
        .await;

    let body = json!({
        "sessionId": "sess-local",
        "tracks": [{"trackName": "video0", "sessionId": "sess-remote"}]
    });
    let outcome = harness
        .bridge
        .handle_event(forwarded_event(&json!({
            "type": "pull-track",
            "compressedData": compressed(&body)
        })))
        .await;

    assert_eq!(outcome, EventOutcome::Handled);
    assert_eq!(harness.last_envelope()["type"], "pull-track-response");
}

#[tokio::test]
async fn test_pull_descriptor_without_session_id_reports_error() {
    let harness = Harness::start().await;

    let outcome = harness
        .bridge
        .handle_event(forwarded_event(&json!({
            "type": "pull-track",
            "sessionID": "sess-local",
            "tracks": [{"trackName": "video0"}]
        })))
        .await;

    assert_eq!(outcome, EventOutcome::Failed);
    let envelope = harness.last_envelope();
    assert!(envelope["errorDescription"]
        .as_str()
        .unwrap()
        .contains("sessionId must be present"));
    assert!(harness.broker.request_bodies().await.is_empty());
}

// ============================================================================
// close-track and renegotiation
// ============================================================================

#[tokio::test]
async fn test_close_forwards_result() {
    let harness = Harness::start().await;
    let answer = json!({
        "sessionDescription": {"type": "answer", "sdp": "v=0 close"},
        "tracks": [{"mid": "0"}]
    });
    harness.broker.mount_close("sess-local", answer.clone()).await;

    let outcome = harness
        .bridge
        .handle_event(forwarded_event(&json!({
            "type": "close-track",
            "sessionID": "sess-local",
            "tracks": [{"mid": "0"}],
            "force": true,
            "sessionDescription": offer()
        })))
        .await;

    assert_eq!(outcome, EventOutcome::Handled);
    assert_eq!(
        harness.last_envelope(),
        json!({"type": "close-track-response", "cloudflareResponse": answer})
    );

    let bodies = harness.broker.request_bodies().await;
    let close_body = bodies.last().unwrap();
    assert_eq!(close_body["force"], true);
    assert_eq!(close_body["tracks"], json!([{"mid": "0"}]));
    assert_eq!(close_body["sessionDescription"], offer());
}

#[tokio::test]
async fn test_renegotiation_forwards_answer() {
    let harness = Harness::start().await;
    let answer = json!({"sessionDescription": {"type": "answer", "sdp": "v=0 re"}});
    harness
        .broker
        .mount_renegotiate("sess-local", answer.clone())
        .await;

    let body = json!({
        "type": "renegotiation",
        "sessionId": "sess-local",
        "sessionDescription": {"type": "answer", "sdp": "v=0 client"}
    });
    let outcome = harness
        .bridge
        .handle_event(forwarded_event(&json!({
            "type": "renegotiation",
            "sessionId": "sess-local",
            "compressedData": compressed(&body)
        })))
        .await;

    assert_eq!(outcome, EventOutcome::Handled);
    assert_eq!(
        harness.last_envelope(),
        json!({"type": "renegotiation-response", "cloudflareResponse": answer})
    );
}

// ============================================================================
// Other events
// ============================================================================

#[tokio::test]
async fn test_unknown_event_type_is_ignored() {
    let harness = Harness::start().await;

    let outcome = harness
        .bridge
        .handle_event(forwarded_event(&json!({"type": "wave-hand"})))
        .await;

    assert_eq!(outcome, EventOutcome::Ignored);
    assert!(harness.ledger.calls().is_empty());
    assert!(harness.broker.request_bodies().await.is_empty());
}

#[tokio::test]
async fn test_malformed_event_data_fails_without_side_effects() {
    let harness = Harness::start().await;

    let event = LedgerEvent::EventForwardedToBackend {
        room_id: TEST_ROOM.to_string(),
        sender: TEST_PARTICIPANT.to_string(),
        event_data: b"not json at all".to_vec(),
    };
    let outcome = harness.bridge.handle_event(event).await;

    assert_eq!(outcome, EventOutcome::Failed);
    assert!(harness.ledger.calls().is_empty());
}

#[tokio::test]
async fn test_participant_joined_sets_session_and_announces_join() {
    let harness = Harness::start().await;
    let answer = publish_answer(&[("audio0", "0")]);
    harness.broker.mount_create_session("sess-join").await;
    harness
        .broker
        .mount_tracks_new("sess-join", answer.clone())
        .await;

    let event = participant_joined(
        vec![join_track("audio0", "0")],
        compressed(&offer()).into_bytes(),
    );
    let outcome = harness.bridge.handle_event(event).await;

    assert_eq!(outcome, EventOutcome::Handled);
    assert_eq!(
        call_labels(&harness.ledger.calls()),
        vec!["set_session_id", "forward_to_frontend"]
    );
    assert_eq!(
        harness.last_envelope(),
        json!({"type": "join-room", "sessionID": "sess-join", "cloudflareResponse": answer})
    );

    let bodies = harness.broker.request_bodies().await;
    assert_eq!(bodies.last().unwrap()["sessionDescription"], offer());
}

#[tokio::test]
async fn test_observational_events_are_logged_only() {
    let harness = Harness::start().await;

    let outcome = harness
        .bridge
        .handle_event(LedgerEvent::ParticipantLeft {
            room_id: TEST_ROOM.to_string(),
            participant: TEST_PARTICIPANT.to_string(),
        })
        .await;

    assert_eq!(outcome, EventOutcome::Handled);
    assert!(harness.ledger.calls().is_empty());
}

// ============================================================================
// Event watcher end to end
// ============================================================================

#[tokio::test]
async fn test_watcher_dispatches_ledger_events_to_bridge() {
    let harness = Harness::start().await;
    harness
        .broker
        .mount_tracks_new("sess-local", json!({"tracks": []}))
        .await;

    let health = Arc::new(HealthState::new());
    let token = CancellationToken::new();
    let watcher = tokio::spawn(start_event_watcher(
        Arc::new(harness.ledger.clone()),
        harness.bridge.clone(),
        Arc::clone(&health),
        token.clone(),
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        while !health.is_ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("watcher should subscribe");
    assert_eq!(
        harness
            .ledger
            .subscriber_count(EventKind::EventForwardedToBackend),
        1
    );

    harness
        .ledger
        .emit(forwarded_event(&json!({
            "type": "pull-track",
            "sessionID": "sess-local",
            "tracks": [{"trackName": "audio0", "sessionId": "sess-remote"}]
        })))
        .await;

    let writes = harness
        .ledger
        .wait_for_writes(1, Duration::from_secs(5))
        .await;
    let call = &writes.first().unwrap().write.call;
    assert_eq!(frontend_envelope(call).unwrap()["type"], "pull-track-response");

    token.cancel();
    watcher.await.unwrap().unwrap();
}
