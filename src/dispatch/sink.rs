//! Delivery boundary.
//!
//! Push and email transports live outside the engine. The dispatcher hands
//! a sink the notification id, the recipient, and the flat rendered payload;
//! everything needed to render is in the payload, no lookups required.

use std::sync::Mutex;

use thiserror::Error;

use crate::ids::{NotificationId, UserId};
use crate::notification::RenderedPayload;

/// Error returned by a delivery sink.
///
/// Sink failures are logged, never retried by the queue path: delivery is
/// at-most-once per notification id.
#[derive(Debug, Error)]
#[error("delivery failed: {message}")]
pub struct DeliveryError {
    /// Transport-specific failure description.
    pub message: String,
}

impl DeliveryError {
    #[must_use]
    #[allow(missing_docs)]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// External delivery transport.
pub trait DeliverySink: Send + Sync {
    /// Deliver one notification. Invoked at most once per notification id
    /// by the dispatcher.
    fn deliver(
        &self,
        id: NotificationId,
        recipient: UserId,
        payload: &RenderedPayload,
    ) -> Result<(), DeliveryError>;
}

/// Sink that discards everything. For embedders that only consume the
/// unread list and never push.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDeliverySink;

impl DeliverySink for NoopDeliverySink {
    fn deliver(
        &self,
        _id: NotificationId,
        _recipient: UserId,
        _payload: &RenderedPayload,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Sink that records every delivery, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<(NotificationId, UserId)>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far.
    #[must_use]
    pub fn delivered(&self) -> Vec<(NotificationId, UserId)> {
        self.deliveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

impl DeliverySink for RecordingSink {
    fn deliver(
        &self,
        id: NotificationId,
        recipient: UserId,
        _payload: &RenderedPayload,
    ) -> Result<(), DeliveryError> {
        self.deliveries
            .lock()
            .map_err(|_| DeliveryError::new("recording sink lock poisoned"))?
            .push((id, recipient));
        Ok(())
    }
}
