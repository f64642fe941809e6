//! Client-facing WebSocket relay to the session broker.
//!
//! Each text frame is `{action, data}` and gets exactly one reply
//! `{action, success, data?, error?}`. Frames are handled in order per
//! connection. Ledger writes never happen here; this is a direct proxy.

use crate::broker::{PublishTrack, RemoteTrack, SessionBroker, TrackRef};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest accepted frame (1 MiB).
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct RelayRequest {
    action: String,
    #[serde(default)]
    data: Map<String, Value>,
}

/// Reply to one relay frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayResponse {
    pub action: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RelayResponse {
    fn ok(action: String, data: Value) -> Self {
        Self {
            action,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(action: String, error: impl Into<String>) -> Self {
        Self {
            action,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Router exposing `GET /ws`.
pub fn relay_router(broker: Arc<dyn SessionBroker>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(broker)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(broker): State<Arc<dyn SessionBroker>>,
) -> Response {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| relay_connection(socket, broker))
}

async fn relay_connection(mut socket: WebSocket, broker: Arc<dyn SessionBroker>) {
    info!(target: "bridge.relay", "Client connected");

    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(target: "bridge.relay", error = %e, "Connection read failed");
                break;
            }
        };

        let response = handle_message(broker.as_ref(), &text).await;
        let body = match serde_json::to_string(&response) {
            Ok(body) => body,
            Err(e) => {
                warn!(target: "bridge.relay", error = %e, "Failed to serialize reply");
                continue;
            }
        };
        if let Err(e) = socket.send(Message::Text(body)).await {
            warn!(target: "bridge.relay", error = %e, "Failed to send reply");
            break;
        }
    }

    info!(target: "bridge.relay", "Client disconnected");
}

/// Handle one relay frame.
pub async fn handle_message(broker: &dyn SessionBroker, text: &str) -> RelayResponse {
    let request: RelayRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(_) => return RelayResponse::err(String::new(), "Invalid message format"),
    };

    let action = request.action;
    let data = request.data;
    debug!(target: "bridge.relay", action = %action, "Relay request");

    let result = match action.to_lowercase().as_str() {
        "create_session" => broker
            .create_session()
            .await
            .map(|session_id| json!({ "sessionId": session_id })),
        "publish_tracks" => {
            let Some(session_id) = str_field(&data, "sessionId") else {
                return RelayResponse::err(action, "sessionId is required");
            };
            let Some(offer) = data.get("offer").filter(|v| v.is_object()).cloned() else {
                return RelayResponse::err(action, "offer is required");
            };
            let Some(tracks) = data.get("tracks") else {
                return RelayResponse::err(action, "tracks are required");
            };
            let tracks: Vec<PublishTrack> = match serde_json::from_value(tracks.clone()) {
                Ok(tracks) => tracks,
                Err(e) => {
                    debug!(target: "bridge.relay", error = %e, "Rejected publish tracks");
                    return RelayResponse::err(action, format!("invalid tracks: {e}"));
                }
            };
            broker.publish_tracks(session_id, offer, tracks).await
        }
        "pull_tracks" => {
            let Some(session_id) = str_field(&data, "sessionId") else {
                return RelayResponse::err(action, "sessionId is required");
            };
            let Some(remote) = data.get("remoteTracks") else {
                return RelayResponse::err(action, "remoteTracks are required");
            };
            let tracks: Vec<RemoteTrack> = object_list(remote).cloned().collect();
            broker.pull_tracks(session_id, tracks).await
        }
        "renegotiate" => {
            let Some(session_id) = str_field(&data, "sessionId") else {
                return RelayResponse::err(action, "sessionId is required");
            };
            let Some(description) = data
                .get("sessionDescription")
                .filter(|v| v.is_object())
                .cloned()
            else {
                return RelayResponse::err(action, "sessionDescription is required");
            };
            broker.renegotiate(session_id, description).await
        }
        "close_tracks" => {
            let Some(session_id) = str_field(&data, "sessionId") else {
                return RelayResponse::err(action, "sessionId is required");
            };
            let Some(tracks) = data.get("tracks") else {
                return RelayResponse::err(action, "tracks are required");
            };
            let tracks: Vec<TrackRef> = object_list(tracks)
                .map(|track| {
                    track
                        .iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .collect();
            let force = data.get("force").and_then(Value::as_bool).unwrap_or(false);
            let description = data
                .get("sessionDescription")
                .filter(|v| v.is_object())
                .cloned();
            broker
                .close_tracks(session_id, tracks, force, description)
                .await
        }
        "get_session_state" => {
            let Some(session_id) = str_field(&data, "sessionId") else {
                return RelayResponse::err(action, "sessionId is required");
            };
            broker.get_session_state(session_id).await
        }
        _ => return RelayResponse::err(action, "Unknown action"),
    };

    match result {
        Ok(data) => RelayResponse::ok(action, data),
        Err(e) => {
            warn!(target: "bridge.relay", action = %action, error = %e, "Broker call failed");
            RelayResponse::err(action, e.to_string())
        }
    }
}

fn str_field<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

fn object_list(value: &Value) -> impl Iterator<Item = &Map<String, Value>> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::BrokerError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Broker that records calls and echoes its arguments back.
    #[derive(Default)]
    struct EchoBroker {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl EchoBroker {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn record(&self, call: &str) -> Result<(), BrokerError> {
            self.calls.lock().unwrap().push(call.to_string());
            if self.fail {
                return Err(BrokerError::Api {
                    code: "session_error".to_string(),
                    description: "session not found".to_string(),
                });
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionBroker for EchoBroker {
        async fn create_session(&self) -> Result<String, BrokerError> {
            self.record("create_session")?;
            Ok("sess-new".to_string())
        }

        async fn publish_tracks(
            &self,
            session_id: &str,
            offer: Value,
            tracks: Vec<PublishTrack>,
        ) -> Result<Value, BrokerError> {
            self.record("publish_tracks")?;
            Ok(json!({"sessionId": session_id, "offer": offer, "tracks": tracks}))
        }

        async fn pull_tracks(
            &self,
            session_id: &str,
            tracks: Vec<RemoteTrack>,
        ) -> Result<Value, BrokerError> {
            self.record("pull_tracks")?;
            Ok(json!({"sessionId": session_id, "tracks": tracks}))
        }

        async fn renegotiate(
            &self,
            session_id: &str,
            session_description: Value,
        ) -> Result<Value, BrokerError> {
            self.record("renegotiate")?;
            Ok(json!({"sessionId": session_id, "sessionDescription": session_description}))
        }

        async fn close_tracks(
            &self,
            session_id: &str,
            tracks: Vec<TrackRef>,
            force: bool,
            session_description: Option<Value>,
        ) -> Result<Value, BrokerError> {
            self.record("close_tracks")?;
            Ok(json!({
                "sessionId": session_id,
                "tracks": tracks,
                "force": force,
                "sessionDescription": session_description
            }))
        }

        async fn get_session_state(&self, session_id: &str) -> Result<Value, BrokerError> {
            self.record("get_session_state")?;
            Ok(json!({"sessionId": session_id, "tracks": []}))
        }
    }

    async fn relay(broker: &EchoBroker, frame: Value) -> RelayResponse {
        handle_message(broker, &frame.to_string()).await
    }

    #[tokio::test]
    async fn test_invalid_frame_reports_format_error() {
        let broker = EchoBroker::default();
        let response = handle_message(&broker, "{not json").await;

        assert!(!response.success);
        assert_eq!(response.action, "");
        assert_eq!(response.error.as_deref(), Some("Invalid message format"));
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let broker = EchoBroker::default();
        let response = relay(&broker, json!({"action": "dance", "data": {}})).await;

        assert_eq!(response.action, "dance");
        assert_eq!(response.error.as_deref(), Some("Unknown action"));
    }

    #[tokio::test]
    async fn test_create_session_action_is_case_insensitive() {
        let broker = EchoBroker::default();
        let response = relay(&broker, json!({"action": "CREATE_SESSION"})).await;

        assert!(response.success);
        assert_eq!(response.action, "CREATE_SESSION");
        assert_eq!(response.data, Some(json!({"sessionId": "sess-new"})));
    }

    #[tokio::test]
    async fn test_publish_tracks_validates_fields_in_order() {
        let broker = EchoBroker::default();

        let response = relay(&broker, json!({"action": "publish_tracks", "data": {}})).await;
        assert_eq!(response.error.as_deref(), Some("sessionId is required"));

        let response = relay(
            &broker,
            json!({"action": "publish_tracks", "data": {"sessionId": "s1", "offer": "v=0"}}),
        )
        .await;
        assert_eq!(response.error.as_deref(), Some("offer is required"));

        let response = relay(
            &broker,
            json!({"action": "publish_tracks", "data": {"sessionId": "s1", "offer": {"sdp": "v=0"}}}),
        )
        .await;
        assert_eq!(response.error.as_deref(), Some("tracks are required"));
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_publish_tracks_forwards_to_broker() {
        let broker = EchoBroker::default();
        let response = relay(
            &broker,
            json!({
                "action": "publish_tracks",
                "data": {
                    "sessionId": "s1",
                    "offer": {"type": "offer", "sdp": "v=0"},
                    "tracks": [{"trackName": "audio0", "mid": "0", "location": "local"}]
                }
            }),
        )
        .await;

        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data["sessionId"], "s1");
        assert_eq!(data["tracks"][0]["trackName"], "audio0");
    }

    #[tokio::test]
    async fn test_publish_tracks_rejects_malformed_tracks() {
        let broker = EchoBroker::default();

        for tracks in [json!("audio0"), json!([{"trackName": "audio0"}]), json!([7])] {
            let response = relay(
                &broker,
                json!({
                    "action": "publish_tracks",
                    "data": {"sessionId": "s1", "offer": {"sdp": "v=0"}, "tracks": tracks}
                }),
            )
            .await;

            assert!(!response.success);
            assert!(response.data.is_none());
            assert!(response.error.unwrap().starts_with("invalid tracks: "));
        }
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pull_tracks_requires_remote_tracks() {
        let broker = EchoBroker::default();
        let response = relay(
            &broker,
            json!({"action": "pull_tracks", "data": {"sessionId": "s1", "tracks": []}}),
        )
        .await;

        assert_eq!(response.error.as_deref(), Some("remoteTracks are required"));
    }

    #[tokio::test]
    async fn test_close_tracks_defaults() {
        let broker = EchoBroker::default();
        let response = relay(
            &broker,
            json!({
                "action": "close_tracks",
                "data": {"sessionId": "s1", "tracks": [{"mid": "0", "n": 1}]}
            }),
        )
        .await;

        let data = response.data.unwrap();
        assert_eq!(data["force"], false);
        assert_eq!(data["tracks"], json!([{"mid": "0"}]));
        assert_eq!(data["sessionDescription"], Value::Null);
    }

    #[tokio::test]
    async fn test_renegotiate_requires_description_object() {
        let broker = EchoBroker::default();
        let response = relay(
            &broker,
            json!({"action": "renegotiate", "data": {"sessionId": "s1", "sessionDescription": "x"}}),
        )
        .await;

        assert_eq!(
            response.error.as_deref(),
            Some("sessionDescription is required")
        );
    }

    #[tokio::test]
    async fn test_broker_failure_becomes_error_reply() {
        let broker = EchoBroker::failing();
        let response = relay(
            &broker,
            json!({"action": "get_session_state", "data": {"sessionId": "s1"}}),
        )
        .await;

        assert!(!response.success);
        assert_eq!(broker.calls(), vec!["get_session_state".to_string()]);
        assert!(response.error.unwrap().contains("session not found"));
    }

    #[test]
    fn test_reply_omits_absent_fields() {
        let reply = RelayResponse::err("x".to_string(), "Unknown action");
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"action": "x", "success": false, "error": "Unknown action"})
        );
    }

    #[tokio::test]
    async fn test_ws_route_rejects_plain_get() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use tower::util::ServiceExt;

        let app = relay_router(Arc::new(EchoBroker::default()));
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.status().is_client_error());
    }
}
