//! Abstract storage traits.
//!
//! These traits define the contract a durable backend must implement. The
//! engine only ever talks to storage through them, which keeps the
//! persistence product choice outside the crate: in-memory backends serve
//! embedded use and tests, a database-backed implementation slots in behind
//! the same seam.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::MatchEvent;
use crate::ids::{ItemId, MatchEventId, NotificationId, SubscriptionId, UserId};
use crate::item::Item;
use crate::notification::Notification;
use crate::status::ItemStatus;
use crate::subscription::SearchSubscription;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Item not found.
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    /// Subscription not found.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    /// Notification not found.
    #[error("Notification not found: {0}")]
    NotificationNotFound(NotificationId),

    /// Compare-and-swap lost: the stored version is not the expected one.
    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The contended item.
        id: ItemId,
        /// Version the caller based its mutation on.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Outcome of a dedup-key upsert in the notification store.
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// No unread notification existed for the key; a new record was created.
    Created(Notification),
    /// An unread notification existed; its payload and recency were
    /// refreshed in place.
    Refreshed(Notification),
}

impl UpsertOutcome {
    /// The stored notification, whichever way it got there.
    #[must_use]
    pub fn into_notification(self) -> Notification {
        match self {
            Self::Created(n) | Self::Refreshed(n) => n,
        }
    }

    /// Returns true if a new record was created.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Storage trait for Item operations.
///
/// # Safety Considerations
/// - Status updates are compare-and-swap on the item version; callers retry
///   or surface a conflict when the swap is lost.
/// - Match-sweep bookkeeping never bumps the item version (the version
///   drives subscription-evaluation idempotency and must only move on
///   user-visible mutations).
pub trait ItemStore: Send + Sync {
    /// Insert a new item. Returns error if ID already exists.
    fn insert(&self, item: Item) -> Result<(), StorageError>;

    /// Get an item by ID.
    fn get(&self, id: ItemId) -> Result<Option<Item>, StorageError>;

    /// Delete an item by ID. Returns error if not found.
    fn delete(&self, id: ItemId) -> Result<(), StorageError>;

    /// Atomically set the status if the stored version equals `expected`.
    ///
    /// On success the item's status, `updated_at`, and version are updated
    /// as one write and the new item state is returned.
    ///
    /// # Errors
    /// - `ItemNotFound` for an unknown id
    /// - `VersionConflict` when the stored version differs from `expected`
    fn update_status(
        &self,
        id: ItemId,
        expected: u64,
        status: ItemStatus,
    ) -> Result<Item, StorageError>;

    /// Record matcher bookkeeping: last-matched time and the pending flag.
    ///
    /// `last_matched_at` of `None` leaves the stored timestamp untouched
    /// (a failed sweep must not claim to have matched). Does not bump the
    /// item version.
    fn record_match_sweep(
        &self,
        id: ItemId,
        last_matched_at: Option<DateTime<Utc>>,
        match_pending: bool,
    ) -> Result<(), StorageError>;

    /// List items still owed a matcher run, oldest first.
    fn list_match_pending(&self, limit: usize) -> Result<Vec<Item>, StorageError>;

    /// Find items whose normalized fingerprint equals `fingerprint`.
    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<Item>, StorageError>;

    /// Scan all distinct fingerprints with the items carrying them.
    ///
    /// Feeds the fuzzy matching tier; implementations should return
    /// fingerprints in a deterministic order.
    fn scan_fingerprints(&self) -> Result<Vec<(String, Vec<ItemId>)>, StorageError>;

    /// Count stored items.
    fn count(&self) -> Result<usize, StorageError>;
}

/// Storage trait for saved-search subscriptions.
pub trait SubscriptionStore: Send + Sync {
    /// Insert a new subscription. Returns error if ID already exists.
    fn insert(&self, subscription: SearchSubscription) -> Result<(), StorageError>;

    /// Get a subscription by ID.
    fn get(&self, id: SubscriptionId) -> Result<Option<SearchSubscription>, StorageError>;

    /// Delete a subscription. Returns error if not found.
    fn delete(&self, id: SubscriptionId) -> Result<(), StorageError>;

    /// List every stored subscription.
    fn list_all(&self) -> Result<Vec<SearchSubscription>, StorageError>;

    /// List a user's subscriptions.
    fn list_by_owner(&self, owner: UserId) -> Result<Vec<SearchSubscription>, StorageError>;

    /// The item version this pair was last evaluated at, if ever.
    fn last_evaluated(
        &self,
        subscription: SubscriptionId,
        item: ItemId,
    ) -> Result<Option<u64>, StorageError>;

    /// Record that the pair was evaluated at `version`.
    fn record_evaluated(
        &self,
        subscription: SubscriptionId,
        item: ItemId,
        version: u64,
    ) -> Result<(), StorageError>;

    /// Count stored subscriptions.
    fn count(&self) -> Result<usize, StorageError>;
}

/// Storage trait for recorded match events.
///
/// Match events are immutable history: inserts only, no updates.
pub trait MatchEventStore: Send + Sync {
    /// Insert a new match event. Returns error if ID already exists.
    fn insert(&self, event: MatchEvent) -> Result<(), StorageError>;

    /// Get an event by ID.
    fn get(&self, id: MatchEventId) -> Result<Option<MatchEvent>, StorageError>;

    /// Insert unless an existing event for the unordered pair already
    /// covers `covered_after`.
    ///
    /// Atomic check-and-insert: returns true if the event was recorded,
    /// false if an existing event for the pair has `detected_at >=
    /// covered_after` (the candidate is redundant). Two concurrent
    /// detection runs over the same pair record exactly one event.
    fn record_unless_covered(
        &self,
        event: MatchEvent,
        covered_after: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// The most recent recorded event for the unordered pair, if any.
    fn latest_for_pair(
        &self,
        a: ItemId,
        b: ItemId,
    ) -> Result<Option<MatchEvent>, StorageError>;

    /// All events referencing the item, newest first.
    fn find_by_item(&self, item: ItemId) -> Result<Vec<MatchEvent>, StorageError>;

    /// Count recorded events.
    fn count(&self) -> Result<usize, StorageError>;
}

/// Storage trait for notification records.
pub trait NotificationStore: Send + Sync {
    /// Atomic dedup-key upsert.
    ///
    /// If an unread notification with `candidate`'s (recipient, dedup key)
    /// exists, its payload and `last_triggered_at` are replaced by the
    /// candidate's and the refreshed record is returned; otherwise the
    /// candidate is inserted as-is. The check-and-write happens under one
    /// write lock so two concurrent publishes cannot both create.
    fn upsert_unread(&self, candidate: Notification) -> Result<UpsertOutcome, StorageError>;

    /// Get a notification by ID.
    fn get(&self, id: NotificationId) -> Result<Option<Notification>, StorageError>;

    /// Mark a notification read. Idempotent on an already-read record.
    fn mark_read(&self, id: NotificationId) -> Result<Notification, StorageError>;

    /// A recipient's unread notifications, most recently triggered first.
    fn list_unread(&self, recipient: UserId) -> Result<Vec<Notification>, StorageError>;

    /// Number of unread notifications for a recipient.
    fn unread_count(&self, recipient: UserId) -> Result<usize, StorageError>;

    /// Record that delivery was signalled for this notification.
    fn mark_delivered(
        &self,
        id: NotificationId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Unread notifications never signalled for delivery and last triggered
    /// at or after `since`. Feeds the periodic re-scan.
    fn list_undelivered_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_item_store_object_safe(_: &dyn ItemStore) {}
    fn _assert_subscription_store_object_safe(_: &dyn SubscriptionStore) {}
    fn _assert_match_event_store_object_safe(_: &dyn MatchEventStore) {}
    fn _assert_notification_store_object_safe(_: &dyn NotificationStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::ItemNotFound(ItemId::new());
        assert!(err.to_string().contains("Item not found"));

        let err = StorageError::VersionConflict {
            id: ItemId::new(),
            expected: 1,
            actual: 2,
        };
        assert!(err.to_string().contains("expected 1"));

        let err = StorageError::BackendError("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
