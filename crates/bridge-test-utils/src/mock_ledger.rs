//! In-memory ledger mock for coordinator and bridge testing.
//!
//! Behaves like a single-account ledger:
//! - `pending_nonce` returns the number of accepted submissions
//! - each accepted submission gets a hash and a receipt after a configurable
//!   number of "not found yet" polls
//! - submissions can be scripted to fail or revert by their index
//!
//! It also records what a test needs to check the single-writer rules: the
//! order of submitted writes, their nonces, and the highest number of writes
//! that were submitted but not yet confirmed at the same time.
//!
//! # Example
//!
//! ```rust,ignore
//! use bridge_test_utils::MockLedger;
//!
//! let ledger = MockLedger::new()
//!     .with_pending_polls(2)
//!     .with_revert_at(1);
//!
//! // ... drive the coordinator ...
//!
//! assert_eq!(ledger.nonces(), vec![0, 1, 2]);
//! assert_eq!(ledger.max_in_flight(), 1);
//! ```

use async_trait::async_trait;
use ledger_bridge::errors::LedgerError;
use ledger_bridge::ledger::{
    EventKind, EventSubscription, LedgerCall, LedgerClient, LedgerEvent, Receipt, ReceiptStatus,
    SignedWrite, TxHash,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of each mock event subscription.
const SUBSCRIPTION_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct MockLedgerInner {
    /// Nonce the next accepted write must carry.
    next_nonce: u64,
    /// Number of `submit` calls so far, accepted or not.
    submit_calls: usize,
    /// Accepted writes, in submission order.
    submitted: Vec<SignedWrite>,
    /// Receipt polls per hash.
    polls: HashMap<TxHash, u32>,
    /// Hashes submitted but not yet confirmed.
    unconfirmed: HashSet<TxHash>,
    /// Hashes whose receipt reports failure.
    reverted: HashSet<TxHash>,
    max_in_flight: usize,
    nonce_mismatches: usize,

    pending_polls: u32,
    fail_submit_at: HashSet<usize>,
    revert_at: HashSet<usize>,
    fail_receipt_at: HashSet<usize>,
    chain_id: Option<u64>,
    submit_delay: Duration,

    subscribers: HashMap<EventKind, Vec<mpsc::Sender<LedgerEvent>>>,
    refuse_watch: bool,
}

/// Mock ledger implementing [`LedgerClient`].
#[derive(Debug, Clone)]
pub struct MockLedger {
    inner: Arc<Mutex<MockLedgerInner>>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    /// Create a ledger that confirms every write on the first receipt poll.
    #[must_use]
    pub fn new() -> Self {
        let inner = MockLedgerInner {
            chain_id: Some(1337),
            ..MockLedgerInner::default()
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Report "not found yet" for the first `polls` receipt queries of each write.
    #[must_use]
    pub fn with_pending_polls(self, polls: u32) -> Self {
        self.inner.lock().unwrap().pending_polls = polls;
        self
    }

    /// Fail the `index`-th `submit` call (0-based) with a transport error.
    #[must_use]
    pub fn with_submit_failure_at(self, index: usize) -> Self {
        self.inner.lock().unwrap().fail_submit_at.insert(index);
        self
    }

    /// Make the `index`-th `submit` call (0-based) revert on confirmation.
    #[must_use]
    pub fn with_revert_at(self, index: usize) -> Self {
        self.inner.lock().unwrap().revert_at.insert(index);
        self
    }

    /// Make receipt queries for the `index`-th `submit` call fail.
    #[must_use]
    pub fn with_receipt_failure_at(self, index: usize) -> Self {
        self.inner.lock().unwrap().fail_receipt_at.insert(index);
        self
    }

    /// Make `chain_id` fail so the coordinator falls back to its configured id.
    #[must_use]
    pub fn without_chain_id(self) -> Self {
        self.inner.lock().unwrap().chain_id = None;
        self
    }

    /// Delay every `submit` call.
    #[must_use]
    pub fn with_submit_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().submit_delay = delay;
        self
    }

    /// Make `watch` fail.
    #[must_use]
    pub fn refusing_watch(self) -> Self {
        self.inner.lock().unwrap().refuse_watch = true;
        self
    }

    /// Accepted writes in submission order.
    pub fn submitted(&self) -> Vec<SignedWrite> {
        self.inner.lock().unwrap().submitted.clone()
    }

    /// Calls of the accepted writes in submission order.
    pub fn calls(&self) -> Vec<LedgerCall> {
        self.submitted().into_iter().map(|w| w.write.call).collect()
    }

    /// Nonces of the accepted writes in submission order.
    pub fn nonces(&self) -> Vec<u64> {
        self.submitted()
            .iter()
            .map(|w| w.write.params.nonce)
            .collect()
    }

    /// Total `submit` calls, including failed ones.
    pub fn submit_calls(&self) -> usize {
        self.inner.lock().unwrap().submit_calls
    }

    /// Highest number of writes submitted but unconfirmed at once.
    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().unwrap().max_in_flight
    }

    /// Writes whose nonce was not the account's next nonce.
    pub fn nonce_mismatches(&self) -> usize {
        self.inner.lock().unwrap().nonce_mismatches
    }

    /// Number of open subscriptions for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to every subscriber of its kind.
    pub async fn emit(&self, event: LedgerEvent) {
        let senders = self
            .inner
            .lock()
            .unwrap()
            .subscribers
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for sender in senders {
            sender
                .send(event.clone())
                .await
                .expect("subscriber should be listening");
        }
    }

    /// Drop every subscription sender, ending all watches.
    pub fn close_subscriptions(&self) {
        self.inner.lock().unwrap().subscribers.clear();
    }

    /// Wait until `count` writes have been accepted.
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within `timeout`.
    pub async fn wait_for_writes(&self, count: usize, timeout: Duration) -> Vec<SignedWrite> {
        tokio::time::timeout(timeout, async {
            loop {
                let submitted = self.submitted();
                if submitted.len() >= count {
                    return submitted;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {count} writes within {timeout:?}, got {}",
                self.submitted().len()
            )
        })
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn pending_nonce(&self, _address: &str) -> Result<u64, LedgerError> {
        Ok(self.inner.lock().unwrap().next_nonce)
    }

    async fn fee_price(&self) -> Result<u128, LedgerError> {
        Ok(1_000_000_000)
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.inner
            .lock()
            .unwrap()
            .chain_id
            .ok_or_else(|| LedgerError::Transport("chain id unavailable".to_string()))
    }

    async fn submit(&self, write: &SignedWrite) -> Result<TxHash, LedgerError> {
        let delay = self.inner.lock().unwrap().submit_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().unwrap();
        let index = inner.submit_calls;
        inner.submit_calls += 1;

        if inner.fail_submit_at.contains(&index) {
            return Err(LedgerError::Transport("connection reset".to_string()));
        }

        if write.write.params.nonce != inner.next_nonce {
            inner.nonce_mismatches += 1;
        }
        inner.next_nonce += 1;

        let tx_hash = TxHash::from(format!("0x{:064x}", index + 1));
        inner.unconfirmed.insert(tx_hash.clone());
        inner.max_in_flight = inner.max_in_flight.max(inner.unconfirmed.len());
        if inner.revert_at.contains(&index) {
            inner.reverted.insert(tx_hash.clone());
        }
        inner.submitted.push(write.clone());

        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<Receipt>, LedgerError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.unconfirmed.contains(tx_hash)
            && submit_index_of(tx_hash).is_some_and(|i| inner.fail_receipt_at.contains(&i))
        {
            inner.unconfirmed.remove(tx_hash);
            return Err(LedgerError::Rpc {
                code: -32000,
                message: "receipt lookup failed".to_string(),
            });
        }

        let pending_polls = inner.pending_polls;
        let polls = inner.polls.entry(tx_hash.clone()).or_insert(0);
        *polls += 1;
        if *polls <= pending_polls {
            return Ok(None);
        }

        inner.unconfirmed.remove(tx_hash);
        let status = if inner.reverted.contains(tx_hash) {
            ReceiptStatus::Failed
        } else {
            ReceiptStatus::Success
        };
        Ok(Some(Receipt {
            tx_hash: tx_hash.clone(),
            status,
            block_number: Some(100 + inner.next_nonce),
        }))
    }

    async fn watch(&self, kind: EventKind) -> Result<EventSubscription, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.refuse_watch {
            return Err(LedgerError::Transport("watch refused".to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        inner.subscribers.entry(kind).or_default().push(tx);
        Ok(rx)
    }
}

/// Recover the 0-based submit index from a hash minted by `submit`.
fn submit_index_of(tx_hash: &TxHash) -> Option<usize> {
    let hex = tx_hash.as_str().strip_prefix("0x")?;
    usize::from_str_radix(hex, 16).ok()?.checked_sub(1)
}
