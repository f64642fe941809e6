//! Background tasks for the bridge.
//!
//! # Tasks
//!
//! - `event_watcher` - Subscribes to contract events and dispatches each one to the event bridge

pub mod event_watcher;

pub use event_watcher::start_event_watcher;
