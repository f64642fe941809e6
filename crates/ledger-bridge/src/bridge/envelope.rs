//! Frontend-bound envelopes written via `ForwardEventToFrontend`.
//!
//! The broker result travels under `cloudflareResponse`, which is the field
//! name participants' clients read.

use serde::Serialize;
use serde_json::Value;

pub const JOIN_ROOM: &str = "join-room";
pub const PUBLISH_TRACK_RESPONSE: &str = "publish-track-response";
pub const PULL_TRACK_RESPONSE: &str = "pull-track-response";
pub const CLOSE_TRACK_RESPONSE: &str = "close-track-response";
pub const RENEGOTIATION_RESPONSE: &str = "renegotiation-response";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendEnvelope {
    #[serde(rename = "type")]
    pub kind: &'static str,

    #[serde(rename = "sessionID", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(rename = "cloudflareResponse", skip_serializing_if = "Option::is_none")]
    pub broker_response: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl FrontendEnvelope {
    pub fn success(kind: &'static str, broker_response: Value) -> Self {
        Self {
            kind,
            session_id: None,
            broker_response: Some(broker_response),
            error_code: None,
            error_description: None,
        }
    }

    pub fn failure(kind: &'static str, error_code: u16, description: String) -> Self {
        Self {
            kind,
            session_id: None,
            broker_response: None,
            error_code: Some(error_code),
            error_description: Some(description),
        }
    }

    pub fn joined(session_id: String, broker_response: Value) -> Self {
        Self {
            session_id: Some(session_id),
            ..Self::success(JOIN_ROOM, broker_response)
        }
    }

    /// JSON bytes for the ledger write.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing a struct of strings, numbers and `Value` cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
