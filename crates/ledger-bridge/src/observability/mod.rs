//! Observability for the Ledger Bridge.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `bridge_transactions_total` | Counter | `operation`, `status` | Coordinated write outcomes |
//! | `bridge_transaction_duration_seconds` | Histogram | `operation` | Enqueue-to-outcome latency |
//! | `bridge_queue_depth` | Gauge | none | Writes waiting for the signing identity |
//! | `bridge_broker_requests_total` | Counter | `operation`, `status` | Session broker calls |
//! | `bridge_broker_request_duration_seconds` | Histogram | `operation` | Session broker latency |
//! | `bridge_events_total` | Counter | `kind`, `outcome` | Ledger events processed |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_broker_request, record_event, record_transaction,
    set_queue_depth,
};
