//! Notification dispatch subsystem.
//!
//! Dedup-key upsert, read/unread tracking, and at-most-once delivery
//! signalling through an external sink.

/// Dedup upsert and delivery worker.
pub mod dispatcher;
/// Delivery boundary trait and reference sinks.
pub mod sink;

pub use dispatcher::{DispatcherConfig, NotificationDispatcher};
pub use sink::{DeliveryError, DeliverySink, NoopDeliverySink, RecordingSink};
