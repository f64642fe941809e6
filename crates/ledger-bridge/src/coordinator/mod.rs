//! Transaction coordinator: the single writer for the signing identity.
//!
//! Every ledger write in the process goes through [`TransactionCoordinator::enqueue`].
//! Requests wait in a FIFO queue and one worker task submits them one at a
//! time, so the identity's nonces are assigned in enqueue order and at most
//! one write is ever awaiting confirmation.
//!
//! # State Machine
//!
//! ```text
//! Idle --dequeue--> Submitting --accepted--> AwaitingConfirmation
//!   ^                   |                          |
//!   +---- outcome ------+--------------------------+
//! ```
//!
//! Transitions happen only on the worker. `enqueue` appends under the queue
//! lock and sends a wake signal on a capacity-one channel with `try_send`.
//! A dropped signal is harmless: the worker rechecks the queue after every
//! outcome and a safety timer re-signals while work is pending.
//!
//! # Failure Handling
//!
//! Nonce, fee, and submission failures end the current request with
//! `TransactionError::Transport`. A failed receipt status ends it with
//! `TransactionError::Reverted`, keeping the hash. Neither affects later
//! requests. Receipt polling is unbounded unless `receipt_timeout` is set.
//!
//! # Shutdown
//!
//! Cancelling stops the worker. A write that was already dequeued is
//! abandoned mid-flight and queued requests resolve with
//! `TransactionError::Abandoned`. Nothing is persisted.

mod request;

pub use request::{OutcomeResult, TransactionOutcome};

use request::TransactionRequest;

use crate::config::CoordinatorConfig;
use crate::errors::{BridgeError, TransactionError};
use crate::ledger::{
    LedgerCall, LedgerClient, OperationKind, Receipt, ReceiptStatus, SigningIdentity, TxHash,
    TxParams, UnsignedWrite,
};
use crate::observability::metrics;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStatus {
    /// Requests waiting to be dequeued.
    pub queue_length: usize,
    /// Whether a write is outstanding for the signing identity.
    pub busy: bool,
    pub in_flight: Option<OperationKind>,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    kind: OperationKind,
    since: Instant,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<TransactionRequest>,
    in_flight: Option<InFlight>,
    closed: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    wake_tx: mpsc::Sender<()>,
    ledger: Arc<dyn LedgerClient>,
    identity: SigningIdentity,
    config: CoordinatorConfig,
    cancel_token: CancellationToken,
}

/// Handle to the coordinator. Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct TransactionCoordinator {
    inner: Arc<Inner>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TransactionCoordinator {
    /// Take ownership of the signing identity and spawn the worker.
    pub fn start(
        ledger: Arc<dyn LedgerClient>,
        identity: SigningIdentity,
        config: CoordinatorConfig,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(1);

        info!(
            target: "bridge.coordinator",
            signer = %identity.address(),
            contract = %config.contract_address,
            receipt_poll_interval_ms = config.receipt_poll_interval.as_millis(),
            receipt_timeout_secs = config.receipt_timeout.map(|t| t.as_secs()),
            "Starting transaction coordinator"
        );

        let inner = Arc::new(Inner {
            state: Mutex::new(QueueState::default()),
            wake_tx,
            ledger,
            identity,
            config,
            cancel_token: CancellationToken::new(),
        });

        let worker = tokio::spawn(run_worker(Arc::clone(&inner), wake_rx));

        Self {
            inner,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Queue a ledger write and wait for its outcome.
    ///
    /// Other callers can enqueue while this one waits. Dropping the returned
    /// future does not withdraw the request.
    ///
    /// # Errors
    ///
    /// Returns the request's `TransactionError`, or `Abandoned` if the
    /// coordinator is shut down before answering.
    #[instrument(skip_all, fields(operation = %call.kind(), room_id = %call.room_id()))]
    pub async fn enqueue(&self, call: LedgerCall) -> OutcomeResult {
        let (request, receiver) = TransactionRequest::new(call);

        let depth = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                request.reply.deliver(Err(TransactionError::Abandoned));
                return Err(TransactionError::Abandoned);
            }
            state.pending.push_back(request);
            state.pending.len()
        };
        metrics::set_queue_depth(depth);
        debug!(target: "bridge.coordinator", queue_length = depth, "Request enqueued");

        self.inner.signal();

        receiver.await.unwrap_or(Err(TransactionError::Abandoned))
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let state = self.inner.state.lock().await;
        CoordinatorStatus {
            queue_length: state.pending.len(),
            busy: state.in_flight.is_some(),
            in_flight: state.in_flight.map(|f| f.kind),
        }
    }

    /// Number of requests waiting to be dequeued.
    pub async fn queue_length(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    /// Address every write is signed by.
    pub fn signer_address(&self) -> &str {
        self.inner.identity.address()
    }

    /// Stop the worker without waiting for it.
    pub fn close(&self) {
        self.inner.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.cancel_token.is_cancelled()
    }

    /// Get a child token that is cancelled when the coordinator closes.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.inner.cancel_token.child_token()
    }

    /// Stop the worker and wait up to `deadline` for it to exit.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Internal` if the worker does not exit in time.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), BridgeError> {
        self.close();

        let Some(handle) = self.worker.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BridgeError::Internal(format!("coordinator worker failed: {e}"))),
            Err(_) => Err(BridgeError::Internal(
                "coordinator worker did not stop before deadline".to_string(),
            )),
        }
    }
}

impl Inner {
    /// Non-blocking wake. A full channel already holds a pending signal.
    fn signal(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// Dequeue the head if idle, marking it in flight under the same lock.
    async fn try_dequeue_next(&self) -> Option<TransactionRequest> {
        let mut state = self.state.lock().await;
        if state.in_flight.is_some() {
            return None;
        }
        let request = state.pending.pop_front()?;
        state.in_flight = Some(InFlight {
            kind: request.call.kind(),
            since: Instant::now(),
        });
        metrics::set_queue_depth(state.pending.len());
        Some(request)
    }

    /// Clear the busy slot and report whether more work is waiting.
    async fn release_in_flight(&self) -> bool {
        let mut state = self.state.lock().await;
        if let Some(finished) = state.in_flight.take() {
            debug!(
                target: "bridge.coordinator",
                operation = %finished.kind,
                busy_ms = finished.since.elapsed().as_millis(),
                "Busy slot released"
            );
        }
        !state.pending.is_empty()
    }

    async fn has_idle_work(&self) -> bool {
        let state = self.state.lock().await;
        state.in_flight.is_none() && !state.pending.is_empty()
    }

    /// Refuse new requests and abandon everything still queued.
    async fn close_queue(&self) {
        let drained: Vec<TransactionRequest> = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.pending.drain(..).collect()
        };
        metrics::set_queue_depth(0);

        if !drained.is_empty() {
            warn!(
                target: "bridge.coordinator",
                abandoned = drained.len(),
                "Coordinator stopped with queued writes"
            );
        }
        for request in drained {
            request.reply.deliver(Err(TransactionError::Abandoned));
        }
    }

    async fn process(&self, request: TransactionRequest) {
        let TransactionRequest {
            call,
            reply,
            enqueued_at,
        } = request;
        let kind = call.kind();

        let outcome = self.execute(call).await;

        let status = match &outcome {
            Ok(done) => {
                info!(
                    target: "bridge.coordinator",
                    operation = %kind,
                    tx_hash = %done.tx_hash,
                    "Transaction confirmed"
                );
                "success"
            }
            Err(e) => {
                warn!(
                    target: "bridge.coordinator",
                    operation = %kind,
                    tx_hash = e.tx_hash().map(TxHash::as_str),
                    error = %e,
                    "Transaction failed"
                );
                e.status_label()
            }
        };
        metrics::record_transaction(kind.as_str(), status, enqueued_at.elapsed());

        reply.deliver(outcome);

        if self.release_in_flight().await {
            self.signal();
        }
    }

    /// Submitting then AwaitingConfirmation.
    async fn execute(&self, call: LedgerCall) -> OutcomeResult {
        let params = self.build_params().await?;

        let unsigned = UnsignedWrite {
            contract: self.config.contract_address.clone(),
            from: self.identity.address().to_string(),
            call,
            params,
        };
        let signed = self
            .identity
            .sign(unsigned)
            .map_err(|e| TransactionError::Transport(e.to_string()))?;

        let tx_hash = self
            .ledger
            .submit(&signed)
            .await
            .map_err(|e| TransactionError::Transport(format!("failed to send transaction: {e}")))?;

        debug!(
            target: "bridge.coordinator",
            tx_hash = %tx_hash,
            nonce = params.nonce,
            "Transaction submitted, awaiting receipt"
        );

        let receipt = self.await_receipt(&tx_hash).await?;

        match receipt.status {
            ReceiptStatus::Success => Ok(TransactionOutcome {
                tx_hash,
                block_number: receipt.block_number,
            }),
            ReceiptStatus::Failed => Err(TransactionError::Reverted { tx_hash }),
        }
    }

    async fn build_params(&self) -> Result<TxParams, TransactionError> {
        let nonce = self
            .ledger
            .pending_nonce(self.identity.address())
            .await
            .map_err(|e| TransactionError::Transport(format!("failed to get nonce: {e}")))?;

        let fee_price = self
            .ledger
            .fee_price()
            .await
            .map_err(|e| TransactionError::Transport(format!("failed to get fee price: {e}")))?;

        let chain_id = match self.ledger.chain_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    target: "bridge.coordinator",
                    error = %e,
                    fallback_chain_id = self.config.fallback_chain_id,
                    "Chain id query failed, using fallback"
                );
                self.config.fallback_chain_id
            }
        };

        Ok(TxParams {
            nonce,
            fee_price,
            gas_limit: self.config.gas_limit,
            chain_id,
        })
    }

    async fn await_receipt(&self, tx_hash: &TxHash) -> Result<Receipt, TransactionError> {
        let deadline = self.config.receipt_timeout.map(|t| Instant::now() + t);

        loop {
            match self.ledger.receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => {
                    return Err(TransactionError::Receipt {
                        tx_hash: tx_hash.clone(),
                        reason: e.to_string(),
                    })
                }
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(TransactionError::ReceiptTimeout {
                    tx_hash: tx_hash.clone(),
                });
            }

            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
    }
}

async fn run_worker(inner: Arc<Inner>, mut wake_rx: mpsc::Receiver<()>) {
    let mut safety = tokio::time::interval(inner.config.safety_interval);
    safety.set_missed_tick_behavior(MissedTickBehavior::Skip);
    safety.reset();

    debug!(target: "bridge.coordinator", "Worker started");

    loop {
        tokio::select! {
            biased;

            () = inner.cancel_token.cancelled() => break,

            signal = wake_rx.recv() => {
                if signal.is_none() {
                    break;
                }
            }

            _ = safety.tick() => {
                if inner.has_idle_work().await {
                    debug!(target: "bridge.coordinator", "Safety timer found idle work");
                    inner.signal();
                }
                continue;
            }
        }

        let Some(request) = inner.try_dequeue_next().await else {
            continue;
        };
        let kind = request.call.kind();

        tokio::select! {
            biased;

            () = inner.cancel_token.cancelled() => {
                warn!(
                    target: "bridge.coordinator",
                    operation = %kind,
                    "Abandoning in-flight write on shutdown"
                );
                break;
            }

            () = inner.process(request) => {}
        }
    }

    inner.close_queue().await;
    info!(target: "bridge.coordinator", "Worker stopped");
}
