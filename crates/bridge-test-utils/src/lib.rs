//! # Ledger Bridge Test Utilities
//!
//! Shared test utilities for the Ledger Bridge.
//!
//! This crate provides mock implementations and fixtures for testing the
//! coordinator, event bridge and relay without a real ledger or broker.
//!
//! ## Modules
//!
//! - `mock_ledger` - In-memory ledger recording nonce order and in-flight writes
//! - `mock_broker` - Wiremock-backed session broker
//! - `fixtures` - Payload builders, events and recorded-write decoders
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_test_utils::*;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ledger = MockLedger::new().with_pending_polls(1);
//!     let coordinator = TransactionCoordinator::start(
//!         Arc::new(ledger.clone()),
//!         test_identity(),
//!         test_coordinator_config(),
//!     );
//!
//!     let broker = MockBroker::start().await;
//!     broker.mount_create_session("sess-1").await;
//!
//!     // Run your test...
//! }
//! ```

pub mod fixtures;
pub mod mock_broker;
pub mod mock_ledger;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_broker::*;
pub use mock_ledger::*;
