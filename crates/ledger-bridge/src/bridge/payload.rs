//! Typed requests extracted from forwarded frontend events.
//!
//! A forwarded event is a JSON object `{type, ...}`. Its body is either the
//! object itself or, when a `compressedData` field is present, the JSON
//! carried inside that field. Field extraction is lenient about the
//! `sessionID`/`sessionId` spelling since both appear in the wild.

use crate::broker::{PublishTrack, RemoteTrack, TrackRef};
use crate::codec;
use crate::errors::CodecError;
use serde_json::{Map, Value};

fn malformed(message: impl Into<String>) -> CodecError {
    CodecError::MalformedPayload(message.into())
}

/// Parse the outer forwarded event (`eventData`) into a JSON object.
pub fn parse_event(raw: &[u8]) -> Result<Map<String, Value>, CodecError> {
    let text = codec::decode_envelope(raw);
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(malformed("event payload is not a JSON object")),
        Err(e) => Err(malformed(format!("event payload is not JSON: {e}"))),
    }
}

/// The event-type tag.
pub fn event_type(event: &Map<String, Value>) -> Option<&str> {
    event.get("type").and_then(Value::as_str)
}

/// Resolve the request body, inflating `compressedData` when present.
///
/// An empty `compressedData` string counts as absent.
pub fn resolve_body(event: &Map<String, Value>) -> Result<Map<String, Value>, CodecError> {
    let text = match event.get(codec::NESTED_FIELD) {
        None => return Ok(event.clone()),
        Some(Value::String(text)) if text.is_empty() => return Ok(event.clone()),
        Some(Value::String(text)) => text,
        Some(_) => return Err(malformed("compressedData must be a string")),
    };
    match codec::decode_json(text.as_bytes())? {
        Value::Object(map) => Ok(map),
        _ => Err(malformed("compressed body is not a JSON object")),
    }
}

fn session_id(body: &Map<String, Value>) -> Option<String> {
    body.get("sessionID")
        .or_else(|| body.get("sessionId"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_field(track: &Map<String, Value>, key: &str) -> String {
    track
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn array_of_objects<'a>(
    body: &'a Map<String, Value>,
    key: &str,
) -> Result<impl Iterator<Item = &'a Map<String, Value>>, CodecError> {
    let Some(items) = body.get(key).and_then(Value::as_array) else {
        return Err(malformed(format!("{key} must be an array")));
    };
    Ok(items.iter().filter_map(Value::as_object))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub offer: Value,
    pub tracks: Vec<PublishTrack>,
}

impl PublishRequest {
    pub fn from_body(body: &Map<String, Value>) -> Result<Self, CodecError> {
        let offer = match body.get("offer") {
            Some(offer @ Value::Object(_)) => offer.clone(),
            _ => return Err(malformed("offer must be an object")),
        };
        let tracks = array_of_objects(body, "tracks")?
            .map(|track| PublishTrack {
                track_name: string_field(track, "trackName"),
                mid: string_field(track, "mid"),
                location: string_field(track, "location"),
            })
            .collect();
        Ok(Self { offer, tracks })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub session_id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl PullRequest {
    pub fn from_body(body: &Map<String, Value>) -> Result<Self, CodecError> {
        let session_id = session_id(body).ok_or_else(|| malformed("sessionID is required"))?;
        let tracks = array_of_objects(body, "tracks")?.cloned().collect();
        Ok(Self { session_id, tracks })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseRequest {
    pub session_id: String,
    pub tracks: Vec<TrackRef>,
    pub force: bool,
    pub session_description: Option<Value>,
}

impl CloseRequest {
    pub fn from_body(body: &Map<String, Value>) -> Result<Self, CodecError> {
        let session_id = session_id(body).ok_or_else(|| malformed("sessionID is required"))?;
        // Only string-valued entries survive.
        let tracks = array_of_objects(body, "tracks")?
            .map(|track| {
                track
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect::<TrackRef>()
            })
            .collect();
        let force = body.get("force").and_then(Value::as_bool).unwrap_or(false);
        let session_description = body
            .get("sessionDescription")
            .filter(|v| v.is_object())
            .cloned();
        Ok(Self {
            session_id,
            tracks,
            force,
            session_description,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenegotiateRequest {
    pub session_id: String,
    pub session_description: Value,
}

impl RenegotiateRequest {
    pub fn from_body(body: &Map<String, Value>) -> Result<Self, CodecError> {
        let session_id = session_id(body).ok_or_else(|| malformed("sessionId is required"))?;
        let session_description = match body.get("sessionDescription") {
            Some(desc @ Value::Object(_)) => desc.clone(),
            _ => return Err(malformed("sessionDescription must be an object")),
        };
        Ok(Self {
            session_id,
            session_description,
        })
    }
}

/// Decode the session description attached to a `ParticipantJoined` event.
pub fn join_offer(raw: &[u8]) -> Result<Value, CodecError> {
    match codec::decode_json(raw)? {
        offer @ Value::Object(_) => Ok(offer),
        _ => Err(malformed("session description is not a JSON object")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_event_requires_object() {
        let event = parse_event(br#"{"type":"publish-track"}"#).unwrap();
        assert_eq!(event_type(&event), Some("publish-track"));

        assert!(parse_event(b"[1,2]").is_err());
        assert!(parse_event(b"not json").is_err());
    }

    #[test]
    fn test_resolve_body_inflates_compressed_field() {
        let inner = json!({"offer": {"type": "offer", "sdp": "v=0"}, "tracks": []});
        let compressed = codec::encode(&inner.to_string()).unwrap();
        let event = object(json!({"type": "publish-track", "compressedData": compressed}));

        let body = resolve_body(&event).unwrap();
        assert_eq!(Value::Object(body), inner);
    }

    #[test]
    fn test_resolve_body_plain_returns_event() {
        let event = object(json!({"type": "pull-track", "sessionID": "s1", "tracks": []}));
        assert_eq!(resolve_body(&event).unwrap(), event);
    }

    #[test]
    fn test_resolve_body_empty_compressed_field_uses_plain_fields() {
        let event = object(json!({
            "type": "pull-track",
            "compressedData": "",
            "sessionID": "s1",
            "tracks": [{"trackName": "audio0", "sessionId": "s2"}]
        }));

        let body = resolve_body(&event).unwrap();
        assert_eq!(body, event);
        assert_eq!(PullRequest::from_body(&body).unwrap().session_id, "s1");
    }

    #[test]
    fn test_resolve_body_rejects_non_string_compressed_field() {
        let event = object(json!({"type": "publish-track", "compressedData": 7}));
        assert!(resolve_body(&event).is_err());
    }

    #[test]
    fn test_publish_request_extracts_tracks_leniently() {
        let body = object(json!({
            "offer": {"type": "offer", "sdp": "v=0"},
            "tracks": [
                {"trackName": "audio0", "mid": "0", "location": "local"},
                {"trackName": "video0", "mid": 1},
                "junk"
            ]
        }));
        let request = PublishRequest::from_body(&body).unwrap();

        assert_eq!(request.tracks.len(), 2);
        let second = request.tracks.get(1).unwrap();
        assert_eq!(second.track_name, "video0");
        assert_eq!(second.mid, "");
    }

    #[test]
    fn test_publish_request_requires_object_offer() {
        let body = object(json!({"offer": "v=0", "tracks": []}));
        assert!(PublishRequest::from_body(&body).is_err());
    }

    #[test]
    fn test_pull_request_accepts_either_session_id_spelling() {
        let upper = object(json!({"sessionID": "s1", "tracks": [{"trackName": "a"}]}));
        let lower = object(json!({"sessionId": "s1", "tracks": [{"trackName": "a"}]}));

        assert_eq!(PullRequest::from_body(&upper).unwrap().session_id, "s1");
        assert_eq!(
            PullRequest::from_body(&upper).unwrap(),
            PullRequest::from_body(&lower).unwrap()
        );
        assert!(PullRequest::from_body(&object(json!({"tracks": []}))).is_err());
    }

    #[test]
    fn test_close_request_keeps_only_string_values() {
        let body = object(json!({
            "sessionID": "s1",
            "tracks": [{"mid": "0", "extra": 4}],
            "force": true
        }));
        let request = CloseRequest::from_body(&body).unwrap();

        let track = request.tracks.first().unwrap();
        assert_eq!(track.get("mid").map(String::as_str), Some("0"));
        assert!(!track.contains_key("extra"));
        assert!(request.force);
        assert!(request.session_description.is_none());
    }

    #[test]
    fn test_close_request_defaults_force_false() {
        let body = object(json!({
            "sessionID": "s1",
            "tracks": [],
            "sessionDescription": {"type": "offer", "sdp": "v=0"}
        }));
        let request = CloseRequest::from_body(&body).unwrap();
        assert!(!request.force);
        assert!(request.session_description.is_some());
    }

    #[test]
    fn test_renegotiate_request_requires_description() {
        let body = object(json!({"sessionId": "s1"}));
        assert!(RenegotiateRequest::from_body(&body).is_err());
    }

    #[test]
    fn test_join_offer_handles_marked_and_plain() {
        let offer = json!({"type": "offer", "sdp": "v=0"});
        let marked = codec::encode(&offer.to_string()).unwrap();

        assert_eq!(join_offer(marked.as_bytes()).unwrap(), offer);
        assert_eq!(join_offer(offer.to_string().as_bytes()).unwrap(), offer);
        assert!(join_offer(b"\"string\"").is_err());
    }
}
