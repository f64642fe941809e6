//! Ledger collaborator.
//!
//! The room registry contract is reached through a narrow async trait so the
//! coordinator and the event watcher can run against a mock in tests.
//!
//! # Components
//!
//! - [`LedgerClient`]: nonce/fee/chain queries, submission, receipts, event watch
//! - [`SigningIdentity`]: the single key pair every write is signed with
//! - [`RpcLedgerClient`]: JSON-RPC gateway implementation

pub mod identity;
pub mod rpc_client;

pub use identity::SigningIdentity;
pub use rpc_client::RpcLedgerClient;

use crate::errors::LedgerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Ledger transaction handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TxHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Kind of coordinated ledger write, used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    ForwardToFrontend,
    SetSessionId,
    AddTrack,
}

impl OperationKind {
    /// Bounded metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::ForwardToFrontend => "forward_to_frontend",
            OperationKind::SetSessionId => "set_session_id",
            OperationKind::AddTrack => "add_track",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ledger-mutating contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum LedgerCall {
    /// `ForwardEventToFrontend(roomId, participant, bytes)`.
    #[serde(rename = "forwardEventToFrontend", rename_all = "camelCase")]
    ForwardEventToFrontend {
        room_id: String,
        participant: String,
        #[serde(with = "hex_bytes")]
        event_data: Vec<u8>,
    },

    /// `SetParticipantSessionID(roomId, participant, sessionId)`.
    #[serde(rename = "setParticipantSessionID", rename_all = "camelCase")]
    SetParticipantSessionId {
        room_id: String,
        participant: String,
        session_id: String,
    },

    /// `AddTrack(roomId, participant, sessionId, trackName, mid, location, isPublished)`.
    #[serde(rename = "addTrack", rename_all = "camelCase")]
    AddTrack {
        room_id: String,
        participant: String,
        session_id: String,
        track_name: String,
        mid: String,
        location: String,
        is_published: bool,
    },
}

impl LedgerCall {
    pub fn kind(&self) -> OperationKind {
        match self {
            LedgerCall::ForwardEventToFrontend { .. } => OperationKind::ForwardToFrontend,
            LedgerCall::SetParticipantSessionId { .. } => OperationKind::SetSessionId,
            LedgerCall::AddTrack { .. } => OperationKind::AddTrack,
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            LedgerCall::ForwardEventToFrontend { room_id, .. }
            | LedgerCall::SetParticipantSessionId { room_id, .. }
            | LedgerCall::AddTrack { room_id, .. } => room_id,
        }
    }

    pub fn participant(&self) -> &str {
        match self {
            LedgerCall::ForwardEventToFrontend { participant, .. }
            | LedgerCall::SetParticipantSessionId { participant, .. }
            | LedgerCall::AddTrack { participant, .. } => participant,
        }
    }
}

/// Per-write parameters assembled by the coordinator before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxParams {
    pub nonce: u64,
    #[serde(with = "quantity_u128")]
    pub fee_price: u128,
    pub gas_limit: u64,
    pub chain_id: u64,
}

/// Write before signing. Its canonical JSON form is what gets signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedWrite {
    pub contract: String,
    pub from: String,
    pub call: LedgerCall,
    pub params: TxParams,
}

/// Write ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedWrite {
    #[serde(flatten)]
    pub write: UnsignedWrite,
    /// `0x`-hex Ed25519 public key.
    pub public_key: String,
    /// `0x`-hex Ed25519 signature over the canonical write bytes.
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Failed,
}

/// Confirmation record for a submitted write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
    #[serde(default)]
    pub block_number: Option<u64>,
}

/// Track descriptor carried by `ParticipantJoined`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub track_name: String,
    pub mid: String,
    pub location: String,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub room_id: String,
}

/// Contract event kinds the bridge watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ParticipantJoined,
    ParticipantLeft,
    TrackAdded,
    EventForwardedToBackend,
    EventForwardedToFrontend,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::ParticipantJoined,
        EventKind::ParticipantLeft,
        EventKind::TrackAdded,
        EventKind::EventForwardedToBackend,
        EventKind::EventForwardedToFrontend,
    ];

    /// Bounded metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ParticipantJoined => "participant_joined",
            EventKind::ParticipantLeft => "participant_left",
            EventKind::TrackAdded => "track_added",
            EventKind::EventForwardedToBackend => "forwarded_to_backend",
            EventKind::EventForwardedToFrontend => "forwarded_to_frontend",
        }
    }
}

/// Typed contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum LedgerEvent {
    ParticipantJoined {
        room_id: String,
        participant: String,
        #[serde(default)]
        initial_tracks: Vec<TrackInfo>,
        #[serde(with = "hex_bytes")]
        session_description: Vec<u8>,
    },
    ParticipantLeft {
        room_id: String,
        participant: String,
    },
    TrackAdded {
        room_id: String,
        participant: String,
        track_name: String,
    },
    EventForwardedToBackend {
        room_id: String,
        sender: String,
        #[serde(with = "hex_bytes")]
        event_data: Vec<u8>,
    },
    EventForwardedToFrontend {
        room_id: String,
        participant: String,
        #[serde(with = "hex_bytes")]
        event_data: Vec<u8>,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::ParticipantJoined { .. } => EventKind::ParticipantJoined,
            LedgerEvent::ParticipantLeft { .. } => EventKind::ParticipantLeft,
            LedgerEvent::TrackAdded { .. } => EventKind::TrackAdded,
            LedgerEvent::EventForwardedToBackend { .. } => EventKind::EventForwardedToBackend,
            LedgerEvent::EventForwardedToFrontend { .. } => EventKind::EventForwardedToFrontend,
        }
    }
}

/// Stream of events for one kind. Dropping it ends the underlying watch.
pub type EventSubscription = mpsc::Receiver<LedgerEvent>;

/// Ledger client used by the coordinator and the event watcher.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Next sequence number for `address`, including pending writes.
    async fn pending_nonce(&self, address: &str) -> Result<u64, LedgerError>;

    /// Suggested fee price.
    async fn fee_price(&self) -> Result<u128, LedgerError>;

    /// Chain identity of the target ledger.
    async fn chain_id(&self) -> Result<u64, LedgerError>;

    /// Submit a signed write and return its handle.
    async fn submit(&self, write: &SignedWrite) -> Result<TxHash, LedgerError>;

    /// Receipt for `tx_hash`, or `None` while it is not yet available.
    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<Receipt>, LedgerError>;

    /// Subscribe to events of one kind.
    async fn watch(&self, kind: EventKind) -> Result<EventSubscription, LedgerError>;
}

/// `0x`-prefixed hex encoding for byte payloads.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let digits = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(digits).map_err(serde::de::Error::custom)
    }
}

/// `0x`-prefixed hex quantity for values wider than JSON numbers.
mod quantity_u128 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_quantity(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parse a `0x`-hex quantity.
pub(crate) fn parse_quantity(raw: &str) -> Result<u128, String> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| format!("quantity {raw} is missing 0x prefix"))?;
    u128::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity {raw}: {e}"))
}
