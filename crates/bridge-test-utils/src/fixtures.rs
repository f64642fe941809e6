//! Test fixtures: payload builders, events and recorded-write decoders.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ledger_bridge::config::CoordinatorConfig;
use ledger_bridge::ledger::{LedgerCall, LedgerEvent, SigningIdentity, TrackInfo};
use serde_json::Value;
use std::io::Write;
use std::time::Duration;

/// Contract address used by test coordinators.
pub const TEST_CONTRACT: &str = "0x00000000000000000000000000000000000c0de5";

/// Room used by fixtures unless a test picks its own.
pub const TEST_ROOM: &str = "room-42";

/// Participant address used by fixtures.
pub const TEST_PARTICIPANT: &str = "0x1111111111111111111111111111111111111111";

/// Raw zlib stream of `text`.
pub fn zlib(text: &str) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Marked form: `zlib:` + base64 of the zlib stream of the JSON text.
pub fn compressed(value: &Value) -> String {
    format!("zlib:{}", STANDARD.encode(zlib(&value.to_string())))
}

/// Deterministic signing identity.
pub fn test_identity() -> SigningIdentity {
    SigningIdentity::from_seed(&[7u8; 32]).unwrap()
}

/// Coordinator config with short, test-friendly intervals.
pub fn test_coordinator_config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::new(TEST_CONTRACT);
    config.receipt_poll_interval = Duration::from_millis(10);
    config.safety_interval = Duration::from_millis(50);
    config
}

/// `EventForwardedToBackend` from [`TEST_PARTICIPANT`] carrying `payload` as JSON.
pub fn forwarded_event(payload: &Value) -> LedgerEvent {
    LedgerEvent::EventForwardedToBackend {
        room_id: TEST_ROOM.to_string(),
        sender: TEST_PARTICIPANT.to_string(),
        event_data: payload.to_string().into_bytes(),
    }
}

/// `ParticipantJoined` for [`TEST_PARTICIPANT`] with the given description bytes.
pub fn participant_joined(tracks: Vec<TrackInfo>, session_description: Vec<u8>) -> LedgerEvent {
    LedgerEvent::ParticipantJoined {
        room_id: TEST_ROOM.to_string(),
        participant: TEST_PARTICIPANT.to_string(),
        initial_tracks: tracks,
        session_description,
    }
}

/// Track announced on join.
pub fn join_track(track_name: &str, mid: &str) -> TrackInfo {
    TrackInfo {
        track_name: track_name.to_string(),
        mid: mid.to_string(),
        location: "local".to_string(),
        is_published: false,
        session_id: String::new(),
        room_id: TEST_ROOM.to_string(),
    }
}

/// Parsed envelope of a `ForwardEventToFrontend` write, `None` for other calls.
pub fn frontend_envelope(call: &LedgerCall) -> Option<Value> {
    match call {
        LedgerCall::ForwardEventToFrontend { event_data, .. } => {
            Some(serde_json::from_slice(event_data).unwrap())
        }
        _ => None,
    }
}

/// Short label per call kind, for order assertions.
pub fn call_labels(calls: &[LedgerCall]) -> Vec<&'static str> {
    calls.iter().map(|call| call.kind().as_str()).collect()
}
