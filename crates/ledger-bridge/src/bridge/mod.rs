//! Event bridge: ledger events in, broker calls and ledger writes out.
//!
//! Each handler turns one contract event into broker operations and then
//! reflects the result back onto the ledger through the coordinator, so every
//! participant sees the same record. The bridge never signs or submits
//! anything itself.
//!
//! Writes for one event are enqueued one after another and each is awaited,
//! which keeps their ledger order fixed (for publish: `AddTrack`s, then
//! `SetSessionId`, then `ForwardToFrontend`).

pub mod envelope;
pub mod payload;

pub use envelope::FrontendEnvelope;

use crate::broker::{PublishTrack, SessionBroker};
use crate::coordinator::{OutcomeResult, TransactionCoordinator};
use crate::errors::{BridgeError, BrokerError};
use crate::ledger::{LedgerCall, LedgerEvent, TrackInfo};
use crate::observability::metrics;
use payload::{CloseRequest, PublishRequest, PullRequest, RenegotiateRequest};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Event-type tags carried by `EventForwardedToBackend` payloads.
pub const PUBLISH_TRACK: &str = "publish-track";
pub const PULL_TRACK: &str = "pull-track";
pub const CLOSE_TRACK: &str = "close-track";
pub const RENEGOTIATION: &str = "renegotiation";

/// Location recorded for tracks this bridge published.
const LOCAL_LOCATION: &str = "local";

/// How a single event ended. Used for the `bridge_events_total` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Handled,
    Ignored,
    Failed,
}

impl EventOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            EventOutcome::Handled => "handled",
            EventOutcome::Ignored => "ignored",
            EventOutcome::Failed => "failed",
        }
    }
}

/// Translates ledger events into broker operations.
#[derive(Clone)]
pub struct EventBridge {
    broker: Arc<dyn SessionBroker>,
    coordinator: TransactionCoordinator,
}

impl EventBridge {
    pub fn new(broker: Arc<dyn SessionBroker>, coordinator: TransactionCoordinator) -> Self {
        Self {
            broker,
            coordinator,
        }
    }

    /// Handle one ledger event. Never returns an error: failures are logged,
    /// counted, and reported to the participant where the flow allows it.
    #[instrument(skip_all, fields(kind = event.kind().as_str()))]
    pub async fn handle_event(&self, event: LedgerEvent) -> EventOutcome {
        let kind = event.kind();

        let result = match event {
            LedgerEvent::ParticipantJoined {
                room_id,
                participant,
                initial_tracks,
                session_description,
            } => {
                self.handle_participant_joined(
                    &room_id,
                    &participant,
                    initial_tracks,
                    &session_description,
                )
                .await
            }
            LedgerEvent::EventForwardedToBackend {
                room_id,
                sender,
                event_data,
            } => self.handle_forwarded(&room_id, &sender, &event_data).await,
            LedgerEvent::ParticipantLeft {
                room_id,
                participant,
            } => {
                info!(target: "bridge.events", %room_id, %participant, "Participant left");
                Ok(EventOutcome::Handled)
            }
            LedgerEvent::TrackAdded {
                room_id,
                participant,
                track_name,
            } => {
                info!(target: "bridge.events", %room_id, %participant, %track_name, "Track added");
                Ok(EventOutcome::Handled)
            }
            LedgerEvent::EventForwardedToFrontend {
                room_id,
                participant,
                ..
            } => {
                debug!(target: "bridge.events", %room_id, %participant, "Event forwarded to frontend");
                Ok(EventOutcome::Handled)
            }
        };

        let outcome = result.unwrap_or_else(|e| {
            error!(target: "bridge.events", kind = kind.as_str(), error = %e, "Event handling failed");
            EventOutcome::Failed
        });
        metrics::record_event(kind.as_str(), outcome.as_str());
        outcome
    }

    #[instrument(skip_all, fields(room_id = %room_id, participant = %participant))]
    async fn handle_participant_joined(
        &self,
        room_id: &str,
        participant: &str,
        initial_tracks: Vec<TrackInfo>,
        session_description: &[u8],
    ) -> Result<EventOutcome, BridgeError> {
        info!(
            target: "bridge.events",
            tracks = initial_tracks.len(),
            "Participant joined"
        );

        let offer = payload::join_offer(session_description)?;
        let session_id = self.broker.create_session().await?;
        let tracks = initial_tracks
            .into_iter()
            .map(|track| PublishTrack {
                track_name: track.track_name,
                mid: track.mid,
                location: track.location,
            })
            .collect();

        let response = self
            .broker
            .publish_tracks(&session_id, offer, tracks)
            .await?;

        self.write(LedgerCall::SetParticipantSessionId {
            room_id: room_id.to_string(),
            participant: participant.to_string(),
            session_id: session_id.clone(),
        })
        .await?;

        self.forward(
            room_id,
            participant,
            FrontendEnvelope::joined(session_id, response),
        )
        .await
    }

    #[instrument(skip_all, fields(room_id = %room_id, sender = %sender))]
    async fn handle_forwarded(
        &self,
        room_id: &str,
        sender: &str,
        event_data: &[u8],
    ) -> Result<EventOutcome, BridgeError> {
        let event = payload::parse_event(event_data)?;

        let Some(event_type) = payload::event_type(&event) else {
            warn!(target: "bridge.events", "Forwarded event has no type tag");
            return Ok(EventOutcome::Ignored);
        };

        match event_type {
            PUBLISH_TRACK => self.publish(room_id, sender, &event).await,
            PULL_TRACK => self.pull(room_id, sender, &event).await,
            CLOSE_TRACK => self.close(room_id, sender, &event).await,
            RENEGOTIATION => self.renegotiate(room_id, sender, &event).await,
            other => {
                info!(target: "bridge.events", event_type = %other, "Unknown event type, ignoring");
                Ok(EventOutcome::Ignored)
            }
        }
    }

    async fn publish(
        &self,
        room_id: &str,
        participant: &str,
        event: &Map<String, Value>,
    ) -> Result<EventOutcome, BridgeError> {
        let request = PublishRequest::from_body(&payload::resolve_body(event)?)?;
        let session_id = self.broker.create_session().await?;

        debug!(
            target: "bridge.events",
            %session_id,
            tracks = request.tracks.len(),
            "Publishing tracks"
        );

        let response = self
            .broker
            .publish_tracks(&session_id, request.offer, request.tracks)
            .await?;

        for (track_name, mid) in published_tracks(&response) {
            let call = LedgerCall::AddTrack {
                room_id: room_id.to_string(),
                participant: participant.to_string(),
                session_id: session_id.clone(),
                track_name,
                mid,
                location: LOCAL_LOCATION.to_string(),
                is_published: true,
            };
            if let Err(e) = self.write(call).await {
                warn!(target: "bridge.events", error = %e, "AddTrack write failed");
            }
        }

        if let Err(e) = self
            .write(LedgerCall::SetParticipantSessionId {
                room_id: room_id.to_string(),
                participant: participant.to_string(),
                session_id,
            })
            .await
        {
            warn!(target: "bridge.events", error = %e, "SetSessionId write failed");
        }

        self.forward(
            room_id,
            participant,
            FrontendEnvelope::success(envelope::PUBLISH_TRACK_RESPONSE, response),
        )
        .await
    }

    async fn pull(
        &self,
        room_id: &str,
        participant: &str,
        event: &Map<String, Value>,
    ) -> Result<EventOutcome, BridgeError> {
        let request = PullRequest::from_body(&payload::resolve_body(event)?)?;

        let result = self
            .broker
            .pull_tracks(&request.session_id, request.tracks)
            .await;
        self.respond(
            room_id,
            participant,
            envelope::PULL_TRACK_RESPONSE,
            "Failed to pull tracks",
            result,
        )
        .await
    }

    async fn close(
        &self,
        room_id: &str,
        participant: &str,
        event: &Map<String, Value>,
    ) -> Result<EventOutcome, BridgeError> {
        let request = CloseRequest::from_body(&payload::resolve_body(event)?)?;

        let result = self
            .broker
            .close_tracks(
                &request.session_id,
                request.tracks,
                request.force,
                request.session_description,
            )
            .await;
        self.respond(
            room_id,
            participant,
            envelope::CLOSE_TRACK_RESPONSE,
            "Failed to close tracks",
            result,
        )
        .await
    }

    async fn renegotiate(
        &self,
        room_id: &str,
        participant: &str,
        event: &Map<String, Value>,
    ) -> Result<EventOutcome, BridgeError> {
        let request = RenegotiateRequest::from_body(&payload::resolve_body(event)?)?;

        let result = self
            .broker
            .renegotiate(&request.session_id, request.session_description)
            .await;
        self.respond(
            room_id,
            participant,
            envelope::RENEGOTIATION_RESPONSE,
            "Failed to renegotiate",
            result,
        )
        .await
    }

    /// Forward the broker result, or a structured error envelope if the
    /// broker call failed.
    async fn respond(
        &self,
        room_id: &str,
        participant: &str,
        kind: &'static str,
        failure_prefix: &str,
        result: Result<Value, BrokerError>,
    ) -> Result<EventOutcome, BridgeError> {
        match result {
            Ok(response) => {
                self.forward(room_id, participant, FrontendEnvelope::success(kind, response))
                    .await
            }
            Err(e) => {
                warn!(target: "bridge.events", response = kind, error = %e, "Broker call failed");
                let envelope =
                    FrontendEnvelope::failure(kind, e.error_code(), format!("{failure_prefix}: {e}"));
                self.forward(room_id, participant, envelope).await?;
                Ok(EventOutcome::Failed)
            }
        }
    }

    async fn forward(
        &self,
        room_id: &str,
        participant: &str,
        envelope: FrontendEnvelope,
    ) -> Result<EventOutcome, BridgeError> {
        self.write(LedgerCall::ForwardEventToFrontend {
            room_id: room_id.to_string(),
            participant: participant.to_string(),
            event_data: envelope.to_bytes(),
        })
        .await?;
        Ok(EventOutcome::Handled)
    }

    async fn write(&self, call: LedgerCall) -> OutcomeResult {
        let kind = call.kind();
        let outcome = self.coordinator.enqueue(call).await;
        match &outcome {
            Ok(done) => debug!(
                target: "bridge.events",
                operation = %kind,
                tx_hash = %done.tx_hash,
                "Ledger write confirmed"
            ),
            Err(e) => warn!(
                target: "bridge.events",
                operation = %kind,
                tx_hash = e.tx_hash().map(|h| h.as_str()),
                error = %e,
                "Ledger write failed"
            ),
        }
        outcome
    }
}

/// `(trackName, mid)` pairs of tracks the broker accepted.
fn published_tracks(response: &Value) -> Vec<(String, String)> {
    response
        .get("tracks")
        .and_then(Value::as_array)
        .map(|tracks| {
            tracks
                .iter()
                .filter_map(|track| {
                    let name = track.get("trackName").and_then(Value::as_str)?;
                    let mid = track.get("mid").and_then(Value::as_str)?;
                    (!name.is_empty() && !mid.is_empty())
                        .then(|| (name.to_string(), mid.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}
