//! Request and reply types passed between callers and the coordinator worker.

use crate::errors::TransactionError;
use crate::ledger::{LedgerCall, OperationKind, TxHash};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::warn;

/// Successful outcome of a coordinated write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

pub type OutcomeResult = Result<TransactionOutcome, TransactionError>;

/// Single-use completion token for one request.
///
/// Not `Clone`; `deliver` consumes it, so a request can be answered at most
/// once. Dropping an undelivered slot resolves the caller with
/// `TransactionError::Abandoned`.
#[derive(Debug)]
pub(crate) struct ReplySlot {
    sender: Option<oneshot::Sender<OutcomeResult>>,
    kind: OperationKind,
}

impl ReplySlot {
    pub(crate) fn new(kind: OperationKind) -> (Self, oneshot::Receiver<OutcomeResult>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
                kind,
            },
            receiver,
        )
    }

    /// Write the outcome. A caller that stopped waiting is not an error.
    pub(crate) fn deliver(mut self, outcome: OutcomeResult) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(outcome);
        }
    }
}

impl Drop for ReplySlot {
    fn drop(&mut self) {
        if self.sender.is_some() {
            warn!(
                target: "bridge.coordinator",
                operation = %self.kind,
                "Reply slot dropped without an outcome"
            );
        }
    }
}

/// A queued ledger write.
#[derive(Debug)]
pub(crate) struct TransactionRequest {
    pub(crate) call: LedgerCall,
    pub(crate) reply: ReplySlot,
    pub(crate) enqueued_at: Instant,
}

impl TransactionRequest {
    pub(crate) fn new(call: LedgerCall) -> (Self, oneshot::Receiver<OutcomeResult>) {
        let (reply, receiver) = ReplySlot::new(call.kind());
        (
            Self {
                call,
                reply,
                enqueued_at: Instant::now(),
            },
            receiver,
        )
    }
}
