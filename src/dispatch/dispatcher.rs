//! Notification dispatcher.
//!
//! This module owns the dedup-key upsert and the delivery worker. Publishes
//! enqueue delivery signals on a bounded channel and never block the
//! caller; the worker invokes the external sink at most once per
//! notification id and records the signal in the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult, ExecutionError};
use crate::event::EngineEvent;
use crate::ids::{NotificationId, UserId};
use crate::notification::{Notification, RenderedPayload};
use crate::storage::{NotificationStore, StorageError};

use super::sink::DeliverySink;

#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Max queued delivery signals before backpressure applies.
    pub delivery_queue_capacity: usize,
    /// How often the worker re-scans for unread notifications whose
    /// delivery signal was dropped.
    pub rescan_interval: Duration,
    /// Only notifications last triggered within this window are picked up
    /// by the re-scan.
    pub delivery_window: chrono::Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            delivery_queue_capacity: 4096,
            rescan_interval: Duration::from_secs(5),
            delivery_window: chrono::Duration::minutes(15),
        }
    }
}

#[derive(Debug)]
struct DeliveryMsg {
    id: NotificationId,
    recipient: UserId,
    payload: RenderedPayload,
}

/// Notification dispatcher: dedup-key upsert plus background delivery.
///
/// The dispatcher runs a dedicated worker thread. `publish` records the
/// notification durably before anything is signalled; the delivery enqueue
/// uses non-blocking `try_send` so a slow sink can never stall a publisher.
pub struct NotificationDispatcher {
    cfg: DispatcherConfig,
    store: Arc<dyn NotificationStore>,
    delivery_tx: Sender<DeliveryMsg>,
    dropped_deliveries: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    /// Creates the dispatcher and spawns its delivery worker.
    #[must_use]
    pub fn new(
        cfg: DispatcherConfig,
        store: Arc<dyn NotificationStore>,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        let capacity = cfg.delivery_queue_capacity.max(1);
        let (delivery_tx, delivery_rx) = bounded::<DeliveryMsg>(capacity);

        let worker_store = Arc::clone(&store);
        let worker_cfg = cfg.clone();
        let join = thread::Builder::new()
            .name("proxim-delivery".to_string())
            .spawn(move || worker_loop(worker_cfg, worker_store, sink, delivery_rx))
            .expect("failed to spawn proxim delivery worker");

        Self {
            cfg,
            store,
            delivery_tx,
            dropped_deliveries: AtomicU64::new(0),
            join: Mutex::new(Some(join)),
        }
    }

    /// Publishes an event as a notification.
    ///
    /// Computes the dedup key and upserts: an existing unread notification
    /// with the key gets its payload and recency refreshed in place; a new
    /// record is created otherwise, and only a new record is signalled for
    /// delivery (the refreshed one's id was already signalled or queued).
    ///
    /// # Errors
    ///
    /// Surfaces storage failures; the caller decides whether to retry.
    pub fn publish(&self, event: &EngineEvent) -> EngineResult<Notification> {
        let candidate = Notification::from_event(event);
        let outcome = self
            .store
            .upsert_unread(candidate)
            .map_err(|e| map_storage(&e))?;

        let created = outcome.is_created();
        let notification = outcome.into_notification();
        debug!(
            notification = %notification.id,
            recipient = %notification.recipient,
            kind = %notification.kind,
            created,
            "published notification"
        );

        if created {
            let msg = DeliveryMsg {
                id: notification.id,
                recipient: notification.recipient,
                payload: notification.payload.clone(),
            };
            match self.delivery_tx.try_send(msg) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    // The re-scan picks these up; nothing is lost, only late.
                    self.dropped_deliveries.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        Ok(notification)
    }

    /// Marks a notification read on behalf of `user`.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown id
    /// - `Forbidden` when the notification belongs to a different user
    pub fn mark_read(&self, id: NotificationId, user: UserId) -> EngineResult<Notification> {
        let existing = self
            .store
            .get(id)
            .map_err(|e| map_storage(&e))?
            .ok_or(ExecutionError::NotificationNotFound { id })?;

        if existing.recipient != user {
            return Err(ExecutionError::Forbidden {
                reason: "notification belongs to a different user".to_string(),
            }
            .into());
        }

        self.store.mark_read(id).map_err(|e| map_storage(&e))
    }

    /// A user's unread notifications, most recently triggered first.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn list_unread(&self, user: UserId) -> EngineResult<Vec<Notification>> {
        self.store.list_unread(user).map_err(|e| map_storage(&e))
    }

    /// Number of unread notifications for a user.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn unread_count(&self, user: UserId) -> EngineResult<usize> {
        self.store.unread_count(user).map_err(|e| map_storage(&e))
    }

    /// Delivery signals dropped because the queue was full.
    #[must_use]
    pub fn dropped_deliveries(&self) -> u64 {
        self.dropped_deliveries.load(Ordering::Relaxed)
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        // Close the channel so the worker can terminate.
        let (dummy_tx, _) = bounded::<DeliveryMsg>(1);
        let old_tx = std::mem::replace(&mut self.delivery_tx, dummy_tx);
        drop(old_tx);

        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                // Detach rather than join: the worker exits once the last
                // sender is gone, and joining from Drop risks blocking an
                // unrelated caller on a slow sink.
                drop(handle);
            }
        }
    }
}

fn worker_loop(
    cfg: DispatcherConfig,
    store: Arc<dyn NotificationStore>,
    sink: Arc<dyn DeliverySink>,
    delivery_rx: Receiver<DeliveryMsg>,
) {
    loop {
        select! {
            recv(delivery_rx) -> msg => {
                match msg {
                    Ok(msg) => deliver_once(&*store, &*sink, msg.id, msg.recipient, Some(&msg.payload)),
                    Err(_) => break,
                }
            }
            default(cfg.rescan_interval) => {
                let since = Utc::now() - cfg.delivery_window;
                match store.list_undelivered_since(since) {
                    Ok(missed) => {
                        for n in missed {
                            deliver_once(&*store, &*sink, n.id, n.recipient, Some(&n.payload));
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "delivery re-scan failed");
                    }
                }
            }
        }
    }
}

/// Invokes the sink at most once for this notification id.
///
/// A record already read or already signalled is skipped, which makes the
/// queue path and the re-scan path safe to overlap.
fn deliver_once(
    store: &dyn NotificationStore,
    sink: &dyn DeliverySink,
    id: NotificationId,
    recipient: UserId,
    payload: Option<&RenderedPayload>,
) {
    let current = match store.get(id) {
        Ok(Some(n)) => n,
        Ok(None) => return,
        Err(e) => {
            warn!(notification = %id, error = %e, "delivery lookup failed");
            return;
        }
    };
    if current.read || current.delivered_at.is_some() {
        return;
    }

    let payload = payload.unwrap_or(&current.payload);
    if let Err(e) = sink.deliver(id, recipient, payload) {
        // At-most-once: the attempt happened, it is not repeated.
        warn!(notification = %id, error = %e, "delivery sink failed");
    }
    if let Err(e) = store.mark_delivered(id, Utc::now()) {
        warn!(notification = %id, error = %e, "failed to record delivery");
    }
}

fn map_storage(e: &StorageError) -> EngineError {
    ExecutionError::Storage {
        message: e.to_string(),
    }
    .into()
}
