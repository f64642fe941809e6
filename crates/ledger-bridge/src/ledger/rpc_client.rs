//! JSON-RPC client for the ledger gateway.
//!
//! The gateway fronts the room registry contract and owns ABI encoding.
//! This client only moves typed requests and typed events across HTTP.
//!
//! # Methods
//!
//! | Method | Params | Result |
//! |--------|--------|--------|
//! | `ledger_pendingNonce` | `[address]` | hex quantity |
//! | `ledger_feePrice` | `[]` | hex quantity |
//! | `ledger_chainId` | `[]` | hex quantity |
//! | `ledger_submit` | `[signedWrite]` | tx hash |
//! | `ledger_getReceipt` | `[txHash]` | receipt or `null` |
//! | `ledger_getEvents` | `[{contract, kind, cursor}]` | `{events, cursor}` |

use super::{
    parse_quantity, EventKind, EventSubscription, LedgerClient, LedgerEvent, Receipt, SignedWrite,
    TxHash,
};
use crate::errors::LedgerError;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// HTTP timeout for gateway calls.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout for gateway calls.
const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffered events per subscription before the poller waits.
const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct EventPage {
    #[serde(default)]
    events: Vec<Value>,
    cursor: u64,
}

/// Ledger client backed by the JSON-RPC gateway.
#[derive(Clone)]
pub struct RpcLedgerClient {
    client: Client,
    rpc_url: String,
    contract_address: String,
    event_poll_interval: Duration,
    next_id: Arc<AtomicU64>,
}

impl RpcLedgerClient {
    /// Create a new gateway client.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Transport` if the HTTP client cannot be built.
    pub fn new(
        rpc_url: String,
        contract_address: String,
        event_poll_interval: Duration,
    ) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(RPC_TIMEOUT)
            .connect_timeout(RPC_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LedgerError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            rpc_url,
            contract_address,
            event_poll_interval,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "bridge.ledger.rpc", method, error = %e, "Gateway request failed");
                LedgerError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "bridge.ledger.rpc", method, status = %status, "Gateway returned error status");
            return Err(LedgerError::Transport(format!("gateway returned {status}")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(body.result.unwrap_or(Value::Null))
            .map_err(|e| LedgerError::InvalidResponse(format!("{method}: {e}")))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128, LedgerError> {
        let raw: String = self.call(method, params).await?;
        parse_quantity(&raw).map_err(LedgerError::InvalidResponse)
    }

    async fn fetch_events(
        &self,
        kind: EventKind,
        cursor: Option<u64>,
    ) -> Result<(Vec<LedgerEvent>, u64), LedgerError> {
        let page: EventPage = self
            .call(
                "ledger_getEvents",
                json!([{
                    "contract": self.contract_address,
                    "kind": kind,
                    "cursor": cursor,
                }]),
            )
            .await?;

        // One undecodable entry must not stall the cursor.
        let events = page
            .events
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<LedgerEvent>(raw) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(target: "bridge.ledger.rpc", kind = kind.as_str(), error = %e, "Skipping undecodable event");
                    None
                }
            })
            .collect();

        Ok((events, page.cursor))
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn pending_nonce(&self, address: &str) -> Result<u64, LedgerError> {
        let nonce = self.quantity("ledger_pendingNonce", json!([address])).await?;
        u64::try_from(nonce).map_err(|_| LedgerError::InvalidResponse("nonce overflow".to_string()))
    }

    async fn fee_price(&self) -> Result<u128, LedgerError> {
        self.quantity("ledger_feePrice", json!([])).await
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        let chain_id = self.quantity("ledger_chainId", json!([])).await?;
        u64::try_from(chain_id)
            .map_err(|_| LedgerError::InvalidResponse("chain id overflow".to_string()))
    }

    #[instrument(skip_all, fields(nonce = write.write.params.nonce))]
    async fn submit(&self, write: &SignedWrite) -> Result<TxHash, LedgerError> {
        let hash: TxHash = self.call("ledger_submit", json!([write])).await?;
        if hash.is_empty() {
            return Err(LedgerError::InvalidResponse(
                "gateway returned empty transaction hash".to_string(),
            ));
        }
        Ok(hash)
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<Receipt>, LedgerError> {
        self.call("ledger_getReceipt", json!([tx_hash])).await
    }

    async fn watch(&self, kind: EventKind) -> Result<EventSubscription, LedgerError> {
        // Start from the head so restarts do not replay history.
        let (_, mut cursor) = self.fetch_events(kind, None).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.event_poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = tx.closed() => {
                        debug!(target: "bridge.ledger.rpc", kind = kind.as_str(), "Subscriber dropped, stopping watch");
                        break;
                    }
                    _ = ticker.tick() => {
                        match client.fetch_events(kind, Some(cursor)).await {
                            Ok((events, next)) => {
                                cursor = next;
                                for event in events {
                                    if tx.send(event).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(target: "bridge.ledger.rpc", kind = kind.as_str(), error = %e, "Event poll failed, will retry");
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
