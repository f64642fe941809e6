//! Ledger Bridge Service Library
//!
//! This library provides the core functionality for the Ledger Bridge - a
//! backend that sits between a ledger-hosted room registry contract and a
//! WebRTC session broker, responsible for:
//!
//! - Serializing every ledger write through one signing identity
//! - Translating contract events into session broker operations
//! - Mirroring broker results back onto the ledger for all participants
//! - Decoding compressed event payloads
//! - Relaying direct client requests to the broker over WebSocket
//!
//! # Architecture
//!
//! ```text
//! RpcLedgerClient --watch--> event_watcher --spawn per event--> EventBridge
//!                                                                 |      |
//!                                               SessionBroker <---+      |
//!                                                                        v
//! RpcLedgerClient <--submit/receipt-- TransactionCoordinator <--enqueue--+
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer**: only the coordinator worker signs and submits, one
//!   write at a time, so nonces follow enqueue order
//! - **Reply slots**: each request carries a single-use oneshot; callers await
//!   their own outcome while the queue keeps moving
//! - **No persistence**: queued writes are abandoned on shutdown
//!
//! # Modules
//!
//! - [`bridge`] - Event bridge and frontend envelopes
//! - [`broker`] - Session broker trait and HTTP client
//! - [`codec`] - Payload decoding (`zlib:` + base64, raw zlib, nested)
//! - [`config`] - Service configuration from environment
//! - [`coordinator`] - Transaction coordinator
//! - [`errors`] - Error types
//! - [`ledger`] - Ledger types, signing identity and JSON-RPC client
//! - [`observability`] - Health endpoints and Prometheus metrics
//! - [`relay`] - Client WebSocket relay
//! - [`tasks`] - Background tasks

pub mod bridge;
pub mod broker;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod ledger;
pub mod observability;
pub mod relay;
pub mod tasks;
