//! Session broker mock built on a wiremock server.
//!
//! Mounts the broker endpoints the bridge and relay call, and builds a real
//! [`BrokerClient`] pointed at the server.

use ledger_bridge::broker::BrokerClient;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// App id the mock expects in every path.
pub const TEST_APP_ID: &str = "test-app";

/// Bearer secret the mock expects.
pub const TEST_APP_SECRET: &str = "test-app-secret";

/// Wiremock-backed session broker.
pub struct MockBroker {
    server: MockServer,
}

impl MockBroker {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// The underlying server, for custom mounts and request inspection.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Client configured for this mock.
    pub fn client(&self) -> BrokerClient {
        BrokerClient::new(
            self.server.uri(),
            TEST_APP_ID.to_string(),
            secrecy::SecretString::from(TEST_APP_SECRET),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn session_path(suffix: &str) -> String {
        format!("/{TEST_APP_ID}/sessions{suffix}")
    }

    async fn mount(&self, verb: &str, route: String, body: Value) {
        Mock::given(method(verb))
            .and(path(route))
            .and(header(
                "Authorization",
                format!("Bearer {TEST_APP_SECRET}").as_str(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// `POST /sessions/new` returns `session_id`.
    pub async fn mount_create_session(&self, session_id: &str) {
        self.mount("POST", Self::session_path("/new"), json!({ "sessionId": session_id }))
            .await;
    }

    /// `POST /sessions/{id}/tracks/new` returns `body` (publish and pull share it).
    pub async fn mount_tracks_new(&self, session_id: &str, body: Value) {
        self.mount(
            "POST",
            Self::session_path(&format!("/{session_id}/tracks/new")),
            body,
        )
        .await;
    }

    /// `PUT /sessions/{id}/tracks/close` returns `body`.
    pub async fn mount_close(&self, session_id: &str, body: Value) {
        self.mount(
            "PUT",
            Self::session_path(&format!("/{session_id}/tracks/close")),
            body,
        )
        .await;
    }

    /// `PUT /sessions/{id}/renegotiate` returns `body`.
    pub async fn mount_renegotiate(&self, session_id: &str, body: Value) {
        self.mount(
            "PUT",
            Self::session_path(&format!("/{session_id}/renegotiate")),
            body,
        )
        .await;
    }

    /// Any request to `/sessions{suffix}` with `verb` answers with a broker error body.
    pub async fn mount_error(&self, verb: &str, suffix: &str, code: &str, description: &str) {
        Mock::given(method(verb))
            .and(path(Self::session_path(suffix)))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errorCode": code,
                "errorDescription": description,
            })))
            .mount(&self.server)
            .await;
    }

    /// Bodies of requests received so far, in arrival order.
    pub async fn request_bodies(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|request| serde_json::from_slice(&request.body).unwrap_or(Value::Null))
            .collect()
    }
}

/// Broker answer to a publish: SDP answer plus one entry per accepted track.
pub fn publish_answer(tracks: &[(&str, &str)]) -> Value {
    let tracks: Vec<Value> = tracks
        .iter()
        .map(|(name, mid)| json!({ "trackName": name, "mid": mid }))
        .collect();
    json!({
        "requiresImmediateRenegotiation": false,
        "sessionDescription": { "type": "answer", "sdp": "v=0 answer" },
        "tracks": tracks,
    })
}
