//! In-memory storage backend.
//!
//! Thread-safe reference implementations of the storage traits, intended
//! for embedded usage and tests. Secondary indexes (fingerprint map,
//! unordered-pair map, unread-key map) mirror what a database backend would
//! express as indexes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::event::{pair_key, MatchEvent};
use crate::ids::{ItemId, MatchEventId, NotificationId, SubscriptionId, UserId};
use crate::item::Item;
use crate::notification::{DedupKey, Notification};
use crate::status::ItemStatus;
use crate::storage::traits::{
    ItemStore, MatchEventStore, NotificationStore, StorageError, SubscriptionStore, UpsertOutcome,
};
use crate::subscription::SearchSubscription;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct ItemState {
    by_id: HashMap<ItemId, Item>,
    by_fingerprint: BTreeMap<String, BTreeSet<ItemId>>,
    pending: BTreeSet<ItemId>,
}

impl ItemState {
    fn unindex_fingerprint(&mut self, item: &Item) {
        if let Some(fp) = item.fingerprint.as_ref() {
            if let Some(ids) = self.by_fingerprint.get_mut(fp) {
                ids.remove(&item.id);
                if ids.is_empty() {
                    self.by_fingerprint.remove(fp);
                }
            }
        }
    }
}

/// Thread-safe in-memory item store.
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    state: RwLock<ItemState>,
}

impl InMemoryItemStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItemStore for InMemoryItemStore {
    fn insert(&self, item: Item) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("item.insert"))?;
        if state.by_id.contains_key(&item.id) {
            return Err(StorageError::DuplicateKey(item.id.to_string()));
        }

        if let Some(fp) = item.fingerprint.clone() {
            state.by_fingerprint.entry(fp).or_default().insert(item.id);
        }
        if item.match_pending {
            state.pending.insert(item.id);
        }
        state.by_id.insert(item.id, item);
        Ok(())
    }

    fn get(&self, id: ItemId) -> Result<Option<Item>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("item.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn delete(&self, id: ItemId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("item.delete"))?;
        let Some(item) = state.by_id.remove(&id) else {
            return Err(StorageError::ItemNotFound(id));
        };
        state.unindex_fingerprint(&item);
        state.pending.remove(&id);
        Ok(())
    }

    fn update_status(
        &self,
        id: ItemId,
        expected: u64,
        status: ItemStatus,
    ) -> Result<Item, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("item.update_status"))?;
        let Some(item) = state.by_id.get_mut(&id) else {
            return Err(StorageError::ItemNotFound(id));
        };

        if item.version != expected {
            return Err(StorageError::VersionConflict {
                id,
                expected,
                actual: item.version,
            });
        }

        item.status = status;
        item.touch();
        Ok(item.clone())
    }

    fn record_match_sweep(
        &self,
        id: ItemId,
        last_matched_at: Option<DateTime<Utc>>,
        match_pending: bool,
    ) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("item.record_match_sweep"))?;
        let Some(item) = state.by_id.get_mut(&id) else {
            return Err(StorageError::ItemNotFound(id));
        };

        if let Some(at) = last_matched_at {
            item.last_matched_at = Some(at);
        }
        item.match_pending = match_pending;
        let id = item.id;
        if match_pending {
            state.pending.insert(id);
        } else {
            state.pending.remove(&id);
        }
        Ok(())
    }

    fn list_match_pending(&self, limit: usize) -> Result<Vec<Item>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("item.list_match_pending"))?;
        let mut items: Vec<Item> = state
            .pending
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect();
        items.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        items.truncate(limit);
        Ok(items)
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<Item>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("item.find_by_fingerprint"))?;
        let Some(ids) = state.by_fingerprint.get(fingerprint) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect())
    }

    fn scan_fingerprints(&self) -> Result<Vec<(String, Vec<ItemId>)>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("item.scan_fingerprints"))?;
        Ok(state
            .by_fingerprint
            .iter()
            .map(|(fp, ids)| (fp.clone(), ids.iter().copied().collect()))
            .collect())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("item.count"))?;
        Ok(state.by_id.len())
    }
}

#[derive(Debug, Default)]
struct SubscriptionState {
    by_id: HashMap<SubscriptionId, SearchSubscription>,
    by_owner: HashMap<UserId, HashSet<SubscriptionId>>,
    evaluated: HashMap<(SubscriptionId, ItemId), u64>,
}

/// Thread-safe in-memory subscription store.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    state: RwLock<SubscriptionState>,
}

impl InMemorySubscriptionStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriptionStore for InMemorySubscriptionStore {
    fn insert(&self, subscription: SearchSubscription) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("sub.insert"))?;
        if state.by_id.contains_key(&subscription.id) {
            return Err(StorageError::DuplicateKey(subscription.id.to_string()));
        }

        state
            .by_owner
            .entry(subscription.owner)
            .or_default()
            .insert(subscription.id);
        state.by_id.insert(subscription.id, subscription);
        Ok(())
    }

    fn get(&self, id: SubscriptionId) -> Result<Option<SearchSubscription>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("sub.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn delete(&self, id: SubscriptionId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("sub.delete"))?;
        let Some(sub) = state.by_id.remove(&id) else {
            return Err(StorageError::SubscriptionNotFound(id));
        };
        if let Some(owned) = state.by_owner.get_mut(&sub.owner) {
            owned.remove(&id);
            if owned.is_empty() {
                state.by_owner.remove(&sub.owner);
            }
        }
        state.evaluated.retain(|(sub_id, _), _| *sub_id != id);
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<SearchSubscription>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("sub.list_all"))?;
        let mut subs: Vec<SearchSubscription> = state.by_id.values().cloned().collect();
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(subs)
    }

    fn list_by_owner(&self, owner: UserId) -> Result<Vec<SearchSubscription>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("sub.list_by_owner"))?;
        let Some(ids) = state.by_owner.get(&owner) else {
            return Ok(Vec::new());
        };
        let mut subs: Vec<SearchSubscription> = ids
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect();
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(subs)
    }

    fn last_evaluated(
        &self,
        subscription: SubscriptionId,
        item: ItemId,
    ) -> Result<Option<u64>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("sub.last_evaluated"))?;
        Ok(state.evaluated.get(&(subscription, item)).copied())
    }

    fn record_evaluated(
        &self,
        subscription: SubscriptionId,
        item: ItemId,
        version: u64,
    ) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("sub.record_evaluated"))?;
        if !state.by_id.contains_key(&subscription) {
            return Err(StorageError::SubscriptionNotFound(subscription));
        }
        let entry = state.evaluated.entry((subscription, item)).or_insert(0);
        *entry = (*entry).max(version);
        Ok(())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("sub.count"))?;
        Ok(state.by_id.len())
    }
}

#[derive(Debug, Default)]
struct MatchEventState {
    by_id: HashMap<MatchEventId, MatchEvent>,
    by_pair: HashMap<(ItemId, ItemId), Vec<MatchEventId>>,
    by_item: HashMap<ItemId, Vec<MatchEventId>>,
}

/// Thread-safe in-memory match event store. Insert-only history.
#[derive(Debug, Default)]
pub struct InMemoryMatchEventStore {
    state: RwLock<MatchEventState>,
}

impl InMemoryMatchEventStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn insert_match_event(state: &mut MatchEventState, event: MatchEvent) -> Result<(), StorageError> {
    if state.by_id.contains_key(&event.id) {
        return Err(StorageError::DuplicateKey(event.id.to_string()));
    }

    state.by_pair.entry(event.pair()).or_default().push(event.id);
    state.by_item.entry(event.item_a).or_default().push(event.id);
    state.by_item.entry(event.item_b).or_default().push(event.id);
    state.by_id.insert(event.id, event);
    Ok(())
}

impl MatchEventStore for InMemoryMatchEventStore {
    fn insert(&self, event: MatchEvent) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("match.insert"))?;
        insert_match_event(&mut state, event)
    }

    fn record_unless_covered(
        &self,
        event: MatchEvent,
        covered_after: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("match.record_unless_covered"))?;

        if let Some(ids) = state.by_pair.get(&event.pair()) {
            let covered = ids
                .iter()
                .filter_map(|id| state.by_id.get(id))
                .any(|existing| existing.detected_at >= covered_after);
            if covered {
                return Ok(false);
            }
        }

        insert_match_event(&mut state, event)?;
        Ok(true)
    }

    fn get(&self, id: MatchEventId) -> Result<Option<MatchEvent>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("match.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn latest_for_pair(&self, a: ItemId, b: ItemId) -> Result<Option<MatchEvent>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("match.latest_for_pair"))?;
        let Some(ids) = state.by_pair.get(&pair_key(a, b)) else {
            return Ok(None);
        };
        let mut latest: Option<&MatchEvent> = None;
        for id in ids {
            let Some(ev) = state.by_id.get(id) else {
                continue;
            };
            latest = Some(match latest {
                None => ev,
                Some(cur) if ev.detected_at > cur.detected_at => ev,
                Some(cur) => cur,
            });
        }
        Ok(latest.cloned())
    }

    fn find_by_item(&self, item: ItemId) -> Result<Vec<MatchEvent>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("match.find_by_item"))?;
        let Some(ids) = state.by_item.get(&item) else {
            return Ok(Vec::new());
        };
        let mut events: Vec<MatchEvent> = ids
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect();
        events.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    fn count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("match.count"))?;
        Ok(state.by_id.len())
    }
}

#[derive(Debug, Default)]
struct NotificationState {
    by_id: HashMap<NotificationId, Notification>,
    by_recipient: HashMap<UserId, HashSet<NotificationId>>,
    unread_by_key: HashMap<(UserId, DedupKey), NotificationId>,
}

/// Thread-safe in-memory notification store.
///
/// The unread-key map is the dedup index: the upsert consults and mutates
/// it under the same write lock that inserts the record, which is what
/// makes the dedup-key upsert atomic.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    state: RwLock<NotificationState>,
}

impl InMemoryNotificationStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn upsert_unread(&self, candidate: Notification) -> Result<UpsertOutcome, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("notification.upsert_unread"))?;

        let key = (candidate.recipient, candidate.dedup_key.clone());
        if let Some(existing_id) = state.unread_by_key.get(&key).copied() {
            let Some(existing) = state.by_id.get_mut(&existing_id) else {
                return Err(StorageError::BackendError(format!(
                    "unread index points at missing notification {existing_id}"
                )));
            };
            existing.payload = candidate.payload;
            existing.last_triggered_at = candidate.last_triggered_at;
            return Ok(UpsertOutcome::Refreshed(existing.clone()));
        }

        if state.by_id.contains_key(&candidate.id) {
            return Err(StorageError::DuplicateKey(candidate.id.to_string()));
        }

        state
            .by_recipient
            .entry(candidate.recipient)
            .or_default()
            .insert(candidate.id);
        if !candidate.read {
            state.unread_by_key.insert(key, candidate.id);
        }
        state.by_id.insert(candidate.id, candidate.clone());
        Ok(UpsertOutcome::Created(candidate))
    }

    fn get(&self, id: NotificationId) -> Result<Option<Notification>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("notification.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn mark_read(&self, id: NotificationId) -> Result<Notification, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("notification.mark_read"))?;
        let Some(notification) = state.by_id.get_mut(&id) else {
            return Err(StorageError::NotificationNotFound(id));
        };

        if !notification.read {
            notification.read = true;
            let key = (notification.recipient, notification.dedup_key.clone());
            let snapshot = notification.clone();
            state.unread_by_key.remove(&key);
            return Ok(snapshot);
        }
        Ok(notification.clone())
    }

    fn list_unread(&self, recipient: UserId) -> Result<Vec<Notification>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("notification.list_unread"))?;
        let Some(ids) = state.by_recipient.get(&recipient) else {
            return Ok(Vec::new());
        };
        let mut unread: Vec<Notification> = ids
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .filter(|n| !n.read)
            .cloned()
            .collect();
        unread.sort_by(|a, b| {
            b.last_triggered_at
                .cmp(&a.last_triggered_at)
                .then(a.id.to_string().cmp(&b.id.to_string()))
        });
        Ok(unread)
    }

    fn unread_count(&self, recipient: UserId) -> Result<usize, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("notification.unread_count"))?;
        let Some(ids) = state.by_recipient.get(&recipient) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .filter(|n| !n.read)
            .count())
    }

    fn mark_delivered(&self, id: NotificationId, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("notification.mark_delivered"))?;
        let Some(notification) = state.by_id.get_mut(&id) else {
            return Err(StorageError::NotificationNotFound(id));
        };
        if notification.delivered_at.is_none() {
            notification.delivered_at = Some(at);
        }
        Ok(())
    }

    fn list_undelivered_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("notification.list_undelivered_since"))?;
        let mut out: Vec<Notification> = state
            .by_id
            .values()
            .filter(|n| !n.read && n.delivered_at.is_none() && n.last_triggered_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.last_triggered_at.cmp(&b.last_triggered_at));
        Ok(out)
    }
}

/// Bundle of all in-memory stores, convenient for embedded use and tests.
#[allow(missing_docs)]
#[derive(Debug, Default)]
pub struct InMemoryStores {
    pub items: InMemoryItemStore,
    pub subscriptions: InMemorySubscriptionStore,
    pub match_events: InMemoryMatchEventStore,
    pub notifications: InMemoryNotificationStore,
}
