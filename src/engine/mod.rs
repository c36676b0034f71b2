//! Engine facade.
//!
//! The engine owns the stores and components and exposes the external
//! interface boundary: item lifecycle, proximity queries, subscriptions,
//! and notifications. Writes for a given item are serialized through a
//! striped lock table; reads and writes for different items proceed in
//! parallel.

mod write_path;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::{
    DeliverySink, DispatcherConfig, NoopDeliverySink, NotificationDispatcher,
};
use crate::error::{EngineError, EngineResult, ExecutionError};
use crate::geo::GeoPoint;
use crate::ids::{ItemId, NotificationId, SubscriptionId, UserId};
use crate::index::{QueryFilters, SpatialIndex, SpatialIndexConfig};
use crate::item::ItemSummary;
use crate::matcher::{IdentityMatcher, MatcherConfig};
use crate::notification::Notification;
use crate::registry::SubscriptionRegistry;
use crate::storage::{
    InMemoryStores, ItemStore, MatchEventStore, NotificationStore, StorageError, SubscriptionStore,
};
use crate::subscription::{SearchSubscription, SubscriptionSpec};

/// Who is acting at the API boundary.
///
/// Status is the only field non-owners may mutate, and only as moderator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "user", rename_all = "snake_case")]
pub enum Actor {
    /// A regular user acting on their own records.
    User(UserId),
    /// A moderator; may transition any item's status.
    Moderator(UserId),
}

impl Actor {
    /// The acting user id.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        match self {
            Self::User(id) | Self::Moderator(id) => *id,
        }
    }

    /// Returns true if this actor may transition the given owner's item.
    #[must_use]
    pub fn may_transition(&self, owner: UserId) -> bool {
        match self {
            Self::User(id) => *id == owner,
            Self::Moderator(_) => true,
        }
    }
}

/// Offset/limit pagination for query results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    /// Results to skip.
    pub offset: usize,
    /// Max results to return. Clamped to [`Page::MAX_LIMIT`].
    pub limit: usize,
}

impl Page {
    /// Hard cap on page size.
    pub const MAX_LIMIT: usize = 500;

    /// First page with the default size.
    #[must_use]
    pub const fn first() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first()
    }
}

/// A proximity query result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyItem {
    /// The item summary.
    pub item: ItemSummary,
    /// Great-circle distance from the query center, in meters.
    pub distance_m: f64,
}

/// Operational counters, for introspection.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub items: usize,
    pub subscriptions: usize,
    pub match_events: usize,
    pub match_pending: usize,
}

#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for spatial queries.
    pub query_timeout: Duration,
    /// Attempts for matching/subscription side effects before the item is
    /// flagged for reconciliation.
    pub side_effect_retries: u32,
    /// Linear backoff step between side-effect attempts.
    pub retry_backoff: Duration,
    /// Width of the per-item lock table.
    pub lock_stripes: usize,
    /// Identity matcher settings.
    pub matcher: MatcherConfig,
    /// Spatial index settings.
    pub index: SpatialIndexConfig,
    /// Notification dispatcher settings.
    pub dispatcher: DispatcherConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_millis(500),
            side_effect_retries: 3,
            retry_backoff: Duration::from_millis(25),
            lock_stripes: 64,
            matcher: MatcherConfig::default(),
            index: SpatialIndexConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

/// Proximity & identity matching engine.
pub struct Engine {
    cfg: EngineConfig,
    items: Arc<dyn ItemStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    match_events: Arc<dyn MatchEventStore>,
    index: SpatialIndex,
    matcher: IdentityMatcher,
    registry: SubscriptionRegistry,
    dispatcher: NotificationDispatcher,
    locks: Vec<Mutex<()>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine over the given backends and delivery sink.
    #[must_use]
    pub fn new(
        cfg: EngineConfig,
        items: Arc<dyn ItemStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        match_events: Arc<dyn MatchEventStore>,
        notifications: Arc<dyn NotificationStore>,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        let index = SpatialIndex::new(cfg.index.clone(), Arc::clone(&items));
        let matcher = IdentityMatcher::new(
            cfg.matcher.clone(),
            Arc::clone(&items),
            Arc::clone(&match_events),
        );
        let registry = SubscriptionRegistry::new(Arc::clone(&subscriptions));
        let dispatcher =
            NotificationDispatcher::new(cfg.dispatcher.clone(), notifications, sink);

        let stripes = cfg.lock_stripes.max(1);
        let locks = (0..stripes).map(|_| Mutex::new(())).collect();

        Self {
            cfg,
            items,
            subscriptions,
            match_events,
            index,
            matcher,
            registry,
            dispatcher,
            locks,
        }
    }

    /// Creates a fully in-memory engine with default configuration and no
    /// external delivery. Intended for embedded use and tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::in_memory_with(EngineConfig::default(), Arc::new(NoopDeliverySink))
    }

    /// Creates an in-memory engine with explicit configuration and sink.
    #[must_use]
    pub fn in_memory_with(cfg: EngineConfig, sink: Arc<dyn DeliverySink>) -> Self {
        let stores = InMemoryStores::default();
        Self::new(
            cfg,
            Arc::new(stores.items),
            Arc::new(stores.subscriptions),
            Arc::new(stores.match_events),
            Arc::new(stores.notifications),
            sink,
        )
    }

    pub(crate) fn lock_for(&self, id: ItemId) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (hasher.finish() as usize) % self.locks.len();
        &self.locks[idx]
    }

    // ---- Query boundary ----

    /// Items within `radius_m` of `center`, ascending by distance, with
    /// structured post-filters and pagination.
    ///
    /// # Errors
    ///
    /// - `InvalidRadius` for a non-positive radius
    /// - `Timeout` when the scan exceeds the configured query timeout
    pub fn query_nearby(
        &self,
        center: &GeoPoint,
        radius_m: f64,
        filters: &QueryFilters,
        page: Page,
    ) -> EngineResult<Vec<NearbyItem>> {
        let hits = self
            .index
            .query_radius(center, radius_m, filters, self.cfg.query_timeout)?;

        let limit = page.limit.min(Page::MAX_LIMIT);
        let mut out = Vec::with_capacity(limit.min(hits.len()));
        for (id, distance_m) in hits.into_iter().skip(page.offset).take(limit) {
            let Some(item) = self.items.get(id).map_err(|e| map_storage(&e))? else {
                continue;
            };
            out.push(NearbyItem {
                item: item.summary(),
                distance_m,
            });
        }
        Ok(out)
    }

    // ---- Subscription boundary ----

    /// Creates a saved search for `user`.
    ///
    /// # Errors
    ///
    /// Validation errors for an unconstrained or oversized spec.
    pub fn create_subscription(
        &self,
        user: UserId,
        spec: SubscriptionSpec,
    ) -> EngineResult<SearchSubscription> {
        spec.validate().map_err(EngineError::Validation)?;
        let subscription = SearchSubscription::new(user, spec);
        self.subscriptions
            .insert(subscription.clone())
            .map_err(|e| map_storage(&e))?;
        tracing::debug!(subscription = %subscription.id, owner = %user, "created subscription");
        Ok(subscription)
    }

    /// Deletes a subscription owned by `user`.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown id
    /// - `Forbidden` when the subscription belongs to someone else
    pub fn delete_subscription(&self, id: SubscriptionId, user: UserId) -> EngineResult<()> {
        let existing = self
            .subscriptions
            .get(id)
            .map_err(|e| map_storage(&e))?
            .ok_or(ExecutionError::SubscriptionNotFound { id })?;

        if existing.owner != user {
            return Err(ExecutionError::Forbidden {
                reason: "subscription belongs to a different user".to_string(),
            }
            .into());
        }

        self.subscriptions.delete(id).map_err(|e| map_storage(&e))
    }

    /// A user's saved searches.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn list_subscriptions(&self, user: UserId) -> EngineResult<Vec<SearchSubscription>> {
        self.subscriptions
            .list_by_owner(user)
            .map_err(|e| map_storage(&e))
    }

    // ---- Notification boundary ----

    /// A user's unread notifications, most recently triggered first.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn list_unread(&self, user: UserId) -> EngineResult<Vec<Notification>> {
        self.dispatcher.list_unread(user)
    }

    /// Marks a notification read on behalf of `user`.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown id
    /// - `Forbidden` when the notification belongs to someone else
    pub fn mark_read(&self, id: NotificationId, user: UserId) -> EngineResult<Notification> {
        self.dispatcher.mark_read(id, user)
    }

    /// Number of unread notifications for a user.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn unread_count(&self, user: UserId) -> EngineResult<usize> {
        self.dispatcher.unread_count(user)
    }

    // ---- Introspection ----

    /// Delivery signals dropped due to queue backpressure.
    #[must_use]
    pub fn dropped_deliveries(&self) -> u64 {
        self.dispatcher.dropped_deliveries()
    }

    /// Operational counters.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn stats(&self) -> EngineResult<EngineStats> {
        Ok(EngineStats {
            items: self.items.count().map_err(|e| map_storage(&e))?,
            subscriptions: self.subscriptions.count().map_err(|e| map_storage(&e))?,
            match_events: self.match_events.count().map_err(|e| map_storage(&e))?,
            match_pending: self
                .items
                .list_match_pending(usize::MAX)
                .map_err(|e| map_storage(&e))?
                .len(),
        })
    }

    pub(crate) fn cfg(&self) -> &EngineConfig {
        &self.cfg
    }

    pub(crate) fn items(&self) -> &Arc<dyn ItemStore> {
        &self.items
    }

    pub(crate) fn match_events(&self) -> &Arc<dyn MatchEventStore> {
        &self.match_events
    }

    pub(crate) fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub(crate) fn matcher(&self) -> &IdentityMatcher {
        &self.matcher
    }

    pub(crate) fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub(crate) fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }
}

pub(crate) fn map_storage(e: &StorageError) -> EngineError {
    ExecutionError::Storage {
        message: e.to_string(),
    }
    .into()
}
