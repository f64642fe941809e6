//! Ledger event watcher background task.
//!
//! Subscribes to every contract event kind, merges the subscriptions into one
//! stream and hands each event to the [`EventBridge`] on its own task, so a
//! slow or failing event never holds up the ones behind it.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered. Events already
//! dispatched keep running; their ledger writes resolve through the
//! coordinator's own shutdown.

use crate::bridge::EventBridge;
use crate::errors::{BridgeError, LedgerError};
use crate::ledger::{EventKind, EventSubscription, LedgerClient, LedgerEvent};
use crate::observability::HealthState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the merged event channel.
pub const MERGED_CHANNEL_CAPACITY: usize = 256;

/// Run the event watcher until cancelled.
///
/// Marks the service ready once every subscription is open, and not ready
/// again if all of them close.
///
/// # Errors
///
/// Returns `BridgeError::Ledger` if a subscription cannot be opened or every
/// subscription ends before cancellation.
pub async fn start_event_watcher(
    ledger: Arc<dyn LedgerClient>,
    bridge: EventBridge,
    health_state: Arc<HealthState>,
    cancel_token: CancellationToken,
) -> Result<(), BridgeError> {
    info!(target: "bridge.task.event_watcher", "Event watcher task started");

    // Forwarders stop with the task, however it exits.
    let forwarders = cancel_token.child_token();
    let _forwarders_guard = forwarders.clone().drop_guard();

    let (tx, mut rx) = mpsc::channel(MERGED_CHANNEL_CAPACITY);
    for kind in EventKind::ALL {
        let subscription = ledger.watch(kind).await.map_err(|e| {
            error!(
                target: "bridge.task.event_watcher",
                kind = kind.as_str(),
                error = %e,
                "Failed to subscribe to contract events"
            );
            e
        })?;
        tokio::spawn(forward_subscription(
            kind,
            subscription,
            tx.clone(),
            forwarders.clone(),
        ));
    }
    drop(tx);

    health_state.set_ready();
    info!(
        target: "bridge.task.event_watcher",
        kinds = EventKind::ALL.len(),
        "Subscribed to contract events"
    );

    let result = loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => {
                info!(
                    target: "bridge.task.event_watcher",
                    "Event watcher received shutdown signal, exiting"
                );
                break Ok(());
            }

            event = rx.recv() => {
                let Some(event) = event else {
                    warn!(
                        target: "bridge.task.event_watcher",
                        "All event subscriptions closed"
                    );
                    health_state.set_not_ready();
                    break Err(LedgerError::SubscriptionClosed.into());
                };
                dispatch(&bridge, event);
            }
        }
    };

    info!(target: "bridge.task.event_watcher", "Event watcher task stopped");
    result
}

fn dispatch(bridge: &EventBridge, event: LedgerEvent) {
    debug!(
        target: "bridge.task.event_watcher",
        kind = event.kind().as_str(),
        "Dispatching event"
    );
    let bridge = bridge.clone();
    tokio::spawn(async move {
        bridge.handle_event(event).await;
    });
}

async fn forward_subscription(
    kind: EventKind,
    mut subscription: EventSubscription,
    tx: mpsc::Sender<LedgerEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => break,

            event = subscription.recv() => {
                let Some(event) = event else {
                    warn!(
                        target: "bridge.task.event_watcher",
                        kind = kind.as_str(),
                        "Event subscription closed"
                    );
                    break;
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::broker::BrokerClient;
    use crate::config::CoordinatorConfig;
    use crate::coordinator::TransactionCoordinator;
    use crate::ledger::{Receipt, SignedWrite, SigningIdentity, TxHash};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Ledger that only supports subscriptions; writes always fail.
    struct WatchOnlyLedger {
        senders: Mutex<Vec<mpsc::Sender<LedgerEvent>>>,
        refuse_watch: bool,
    }

    impl WatchOnlyLedger {
        fn new(refuse_watch: bool) -> Self {
            Self {
                senders: Mutex::new(Vec::new()),
                refuse_watch,
            }
        }

        fn subscriber_count(&self) -> usize {
            self.senders.lock().unwrap().len()
        }

        fn close_all(&self) {
            self.senders.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl LedgerClient for WatchOnlyLedger {
        async fn pending_nonce(&self, _address: &str) -> Result<u64, LedgerError> {
            Err(LedgerError::Transport("read only".to_string()))
        }

        async fn fee_price(&self) -> Result<u128, LedgerError> {
            Err(LedgerError::Transport("read only".to_string()))
        }

        async fn chain_id(&self) -> Result<u64, LedgerError> {
            Ok(1)
        }

        async fn submit(&self, _write: &SignedWrite) -> Result<TxHash, LedgerError> {
            Err(LedgerError::Transport("read only".to_string()))
        }

        async fn receipt(&self, _tx_hash: &TxHash) -> Result<Option<Receipt>, LedgerError> {
            Ok(None)
        }

        async fn watch(&self, _kind: EventKind) -> Result<EventSubscription, LedgerError> {
            if self.refuse_watch {
                return Err(LedgerError::Rpc {
                    code: -32000,
                    message: "filter not supported".to_string(),
                });
            }
            let (tx, rx) = mpsc::channel(8);
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }
    }

    fn bridge(ledger: Arc<WatchOnlyLedger>) -> EventBridge {
        let coordinator = TransactionCoordinator::start(
            ledger,
            SigningIdentity::from_seed(&[3u8; 32]).unwrap(),
            CoordinatorConfig::new("0xcontract"),
        );
        let broker = BrokerClient::new(
            "http://127.0.0.1:9".to_string(),
            "app".to_string(),
            SecretString::from("secret"),
            Duration::from_secs(1),
        )
        .unwrap();
        EventBridge::new(Arc::new(broker), coordinator)
    }

    #[tokio::test]
    async fn test_watcher_becomes_ready_and_stops_on_cancel() {
        let ledger = Arc::new(WatchOnlyLedger::new(false));
        let health = Arc::new(HealthState::new());
        let token = CancellationToken::new();

        let handle = tokio::spawn(start_event_watcher(
            ledger.clone(),
            bridge(ledger.clone()),
            health.clone(),
            token.clone(),
        ));

        tokio::time::timeout(Duration::from_secs(1), async {
            while !health.is_ready() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("watcher should become ready");
        assert_eq!(ledger.subscriber_count(), EventKind::ALL.len());

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher should stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_watcher_fails_when_subscription_refused() {
        let ledger = Arc::new(WatchOnlyLedger::new(true));
        let health = Arc::new(HealthState::new());

        let result = start_event_watcher(
            ledger.clone(),
            bridge(ledger),
            health.clone(),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(BridgeError::Ledger(LedgerError::Rpc { code: -32000, .. }))
        ));
        assert!(!health.is_ready());
    }

    #[tokio::test]
    async fn test_watcher_reports_closed_subscriptions() {
        let ledger = Arc::new(WatchOnlyLedger::new(false));
        let health = Arc::new(HealthState::new());

        let handle = tokio::spawn(start_event_watcher(
            ledger.clone(),
            bridge(ledger.clone()),
            health.clone(),
            CancellationToken::new(),
        ));

        tokio::time::timeout(Duration::from_secs(1), async {
            while ledger.subscriber_count() < EventKind::ALL.len() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("watcher should subscribe");
        ledger.close_all();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher should stop")
            .unwrap();
        assert!(matches!(
            result,
            Err(BridgeError::Ledger(LedgerError::SubscriptionClosed))
        ));
        assert!(!health.is_ready());
    }
}
