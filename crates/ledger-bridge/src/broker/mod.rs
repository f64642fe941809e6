//! Session broker collaborator.
//!
//! The broker is the external WebRTC media service that owns sessions and
//! tracks. Every call returns the broker's JSON result unchanged so it can
//! be relayed to participants as-is.

pub mod client;

pub use client::BrokerClient;

use crate::errors::BrokerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Track being published into a local session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishTrack {
    pub track_name: String,
    pub mid: String,
    pub location: String,
}

/// Descriptor of a remote track to pull. Must carry `trackName` and `sessionId`.
pub type RemoteTrack = Map<String, Value>;

/// Track identifier for close requests (string values only).
pub type TrackRef = BTreeMap<String, String>;

/// Session broker operations used by the bridge and the client relay.
#[async_trait]
pub trait SessionBroker: Send + Sync {
    /// Create a session and return its id.
    async fn create_session(&self) -> Result<String, BrokerError>;

    /// Publish local tracks with an SDP offer.
    async fn publish_tracks(
        &self,
        session_id: &str,
        offer: Value,
        tracks: Vec<PublishTrack>,
    ) -> Result<Value, BrokerError>;

    /// Pull remote tracks into `session_id`.
    async fn pull_tracks(
        &self,
        session_id: &str,
        tracks: Vec<RemoteTrack>,
    ) -> Result<Value, BrokerError>;

    /// Send an updated session description.
    async fn renegotiate(
        &self,
        session_id: &str,
        session_description: Value,
    ) -> Result<Value, BrokerError>;

    /// Close tracks in `session_id`.
    async fn close_tracks(
        &self,
        session_id: &str,
        tracks: Vec<TrackRef>,
        force: bool,
        session_description: Option<Value>,
    ) -> Result<Value, BrokerError>;

    /// Current session state.
    async fn get_session_state(&self, session_id: &str) -> Result<Value, BrokerError>;
}

/// Check pull descriptors and fill in the default location.
///
/// # Errors
///
/// Returns `BrokerError::InvalidRequest` if a descriptor lacks `trackName` or `sessionId`.
pub fn prepare_remote_tracks(tracks: Vec<RemoteTrack>) -> Result<Vec<RemoteTrack>, BrokerError> {
    tracks
        .into_iter()
        .map(|mut track| {
            if !track.contains_key("trackName") {
                return Err(BrokerError::InvalidRequest(
                    "trackName must be present in track data".to_string(),
                ));
            }
            if !track.contains_key("sessionId") {
                return Err(BrokerError::InvalidRequest(
                    "sessionId must be present when pulling remote tracks".to_string(),
                ));
            }
            track
                .entry("location")
                .or_insert_with(|| Value::String("remote".to_string()));
            Ok(track)
        })
        .collect()
}
