//! HTTP client for the session broker REST API.
//!
//! Requests go to `{base_url}/{app_id}{path}` with a bearer secret. Every
//! response body has the shape
//! `{errorCode?, errorDescription?, sessionId?, result?}`:
//! - a non-null `errorCode` is a hard failure
//! - a non-empty `sessionId` yields `{"sessionId": ...}`
//! - a non-empty `result` object yields that object
//! - anything else yields the whole body

use super::{prepare_remote_tracks, PublishTrack, RemoteTrack, SessionBroker, TrackRef};
use crate::errors::BrokerError;
use crate::observability::metrics;
use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

/// Connect timeout for broker requests.
const BROKER_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrokerEnvelope {
    #[serde(default)]
    error_code: Option<Value>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    result: Option<Map<String, Value>>,
}

/// Session broker client.
#[derive(Clone)]
pub struct BrokerClient {
    client: Client,
    base_url: String,
    app_id: String,
    app_secret: SecretString,
}

impl BrokerClient {
    /// Create a new broker client.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Transport` if the HTTP client cannot be built.
    pub fn new(
        base_url: String,
        app_id: String,
        app_secret: SecretString,
        request_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(BROKER_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                error!(target: "bridge.broker", error = %e, "Failed to build HTTP client");
                BrokerError::Transport(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id,
            app_secret,
        })
    }

    async fn request(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BrokerError> {
        let start = Instant::now();
        let result = self.send(method, path, body).await;
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_broker_request(operation, status, start.elapsed());
        result
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, BrokerError> {
        let url = format!("{}/{}{}", self.base_url, self.app_id, path);

        let mut request = self
            .client
            .request(method, &url)
            .header(
                "Authorization",
                format!("Bearer {}", self.app_secret.expose_secret()),
            )
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(target: "bridge.broker", error = %e, "Broker request failed");
            BrokerError::Transport(e.to_string())
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            warn!(target: "bridge.broker", error = %e, "Failed to read broker response");
            BrokerError::Transport(e.to_string())
        })?;

        debug!(target: "bridge.broker", status = %status, bytes = bytes.len(), "Broker responded");
        interpret_response(&bytes)
    }
}

/// Apply the broker response rules to a raw body.
fn interpret_response(body: &[u8]) -> Result<Value, BrokerError> {
    let envelope: BrokerEnvelope = serde_json::from_slice(body)
        .map_err(|e| BrokerError::InvalidResponse(format!("error parsing response: {e}")))?;

    if let Some(code) = envelope.error_code.filter(|c| !c.is_null()) {
        let code = match code {
            Value::String(s) => s,
            other => other.to_string(),
        };
        return Err(BrokerError::Api {
            code,
            description: envelope.error_description.unwrap_or_default(),
        });
    }

    if let Some(session_id) = envelope.session_id.filter(|s| !s.is_empty()) {
        return Ok(json!({ "sessionId": session_id }));
    }

    if let Some(result) = envelope.result.filter(|r| !r.is_empty()) {
        return Ok(Value::Object(result));
    }

    serde_json::from_slice(body)
        .map_err(|e| BrokerError::InvalidResponse(format!("error converting response: {e}")))
}

#[async_trait]
impl SessionBroker for BrokerClient {
    #[instrument(skip_all)]
    async fn create_session(&self) -> Result<String, BrokerError> {
        let response = self
            .request("create_session", Method::POST, "/sessions/new", None)
            .await?;

        response
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                warn!(target: "bridge.broker", "Session ID not found in response");
                BrokerError::InvalidResponse("sessionId not found in response".to_string())
            })
    }

    #[instrument(skip_all, fields(session_id = %session_id, tracks = tracks.len()))]
    async fn publish_tracks(
        &self,
        session_id: &str,
        offer: Value,
        tracks: Vec<PublishTrack>,
    ) -> Result<Value, BrokerError> {
        let body = json!({
            "sessionDescription": offer,
            "tracks": tracks,
        });
        self.request(
            "publish_tracks",
            Method::POST,
            &format!("/sessions/{session_id}/tracks/new"),
            Some(body),
        )
        .await
    }

    #[instrument(skip_all, fields(session_id = %session_id, tracks = tracks.len()))]
    async fn pull_tracks(
        &self,
        session_id: &str,
        tracks: Vec<RemoteTrack>,
    ) -> Result<Value, BrokerError> {
        let tracks = prepare_remote_tracks(tracks)?;
        self.request(
            "pull_tracks",
            Method::POST,
            &format!("/sessions/{session_id}/tracks/new"),
            Some(json!({ "tracks": tracks })),
        )
        .await
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn renegotiate(
        &self,
        session_id: &str,
        session_description: Value,
    ) -> Result<Value, BrokerError> {
        self.request(
            "renegotiate",
            Method::PUT,
            &format!("/sessions/{session_id}/renegotiate"),
            Some(json!({ "sessionDescription": session_description })),
        )
        .await
    }

    #[instrument(skip_all, fields(session_id = %session_id, tracks = tracks.len(), force = force))]
    async fn close_tracks(
        &self,
        session_id: &str,
        tracks: Vec<TrackRef>,
        force: bool,
        session_description: Option<Value>,
    ) -> Result<Value, BrokerError> {
        let mut body = json!({
            "tracks": tracks,
            "force": force,
        });
        if let (Some(description), Some(map)) = (session_description, body.as_object_mut()) {
            map.insert("sessionDescription".to_string(), description);
        }
        self.request(
            "close_tracks",
            Method::PUT,
            &format!("/sessions/{session_id}/tracks/close"),
            Some(body),
        )
        .await
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn get_session_state(&self, session_id: &str) -> Result<Value, BrokerError> {
        self.request(
            "get_session_state",
            Method::GET,
            &format!("/sessions/{session_id}"),
            None,
        )
        .await
    }
}
