//! Ledger Bridge error types.
//!
//! Each collaborator has its own error enum. `BridgeError` is the top-level
//! type used by startup code and by flows that cross collaborator boundaries.
//! Participant-facing envelopes only ever carry `error_code()` and a
//! description, never raw transport details.

use crate::ledger::TxHash;
use thiserror::Error;

/// Error code surfaced to participants when the session broker fails.
pub const BROKER_FAILURE_CODE: u16 = 500;

/// Errors from the ledger gateway.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Network failure talking to the gateway.
    #[error("Ledger transport error: {0}")]
    Transport(String),

    /// The gateway answered with a JSON-RPC error object.
    #[error("Ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The gateway answered with something we could not interpret.
    #[error("Invalid ledger response: {0}")]
    InvalidResponse(String),

    /// The event subscription ended because the consumer went away.
    #[error("Event subscription closed")]
    SubscriptionClosed,
}

/// Outcome error for a single coordinated ledger write.
///
/// Every variant is terminal for its request only. `Reverted`, `Receipt` and
/// `ReceiptTimeout` happen after submission and keep the transaction handle.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Nonce, fee, or submission failure before the ledger accepted the write.
    #[error("Transaction transport error: {0}")]
    Transport(String),

    /// The ledger accepted the write but the receipt reports failure.
    #[error("transaction reverted: {tx_hash}")]
    Reverted { tx_hash: TxHash },

    /// Receipt polling failed with something other than "not found".
    #[error("Receipt error for {tx_hash}: {reason}")]
    Receipt { tx_hash: TxHash, reason: String },

    /// The optional receipt deadline elapsed.
    #[error("Receipt deadline elapsed for {tx_hash}")]
    ReceiptTimeout { tx_hash: TxHash },

    /// The worker stopped before writing the outcome for this request.
    #[error("Transaction abandoned by coordinator")]
    Abandoned,
}

impl TransactionError {
    /// Transaction handle preserved by post-submission failures.
    pub fn tx_hash(&self) -> Option<&TxHash> {
        match self {
            TransactionError::Reverted { tx_hash }
            | TransactionError::Receipt { tx_hash, .. }
            | TransactionError::ReceiptTimeout { tx_hash } => Some(tx_hash),
            TransactionError::Transport(_) | TransactionError::Abandoned => None,
        }
    }

    /// Bounded label for metrics.
    pub fn status_label(&self) -> &'static str {
        match self {
            TransactionError::Transport(_) => "transport_error",
            TransactionError::Reverted { .. } => "reverted",
            TransactionError::Receipt { .. } => "receipt_error",
            TransactionError::ReceiptTimeout { .. } => "receipt_timeout",
            TransactionError::Abandoned => "abandoned",
        }
    }
}

/// Errors from the media session broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// HTTP request failed before a response body was read.
    #[error("Broker transport error: {0}")]
    Transport(String),

    /// The broker returned a non-null `errorCode`.
    #[error("Broker API error: {description} (code: {code})")]
    Api { code: String, description: String },

    /// The broker response could not be parsed or lacked a required field.
    #[error("Invalid broker response: {0}")]
    InvalidResponse(String),

    /// The request was rejected locally before being sent.
    #[error("Invalid broker request: {0}")]
    InvalidRequest(String),
}

impl BrokerError {
    /// Numeric code carried in participant-facing error envelopes.
    pub fn error_code(&self) -> u16 {
        BROKER_FAILURE_CODE
    }
}

/// Payload could not be decoded into the expected structure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

/// Top-level Ledger Bridge error.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Signing key could not be loaded.
    #[error("Identity error: {0}")]
    Identity(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    MalformedPayload(#[from] CodecError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<crate::config::ConfigError> for BridgeError {
    fn from(err: crate::config::ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}
