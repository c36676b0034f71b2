//! Subscription registry.
//!
//! Evaluates items against stored saved searches. Evaluation is idempotent
//! per (subscription, item, item-version): the registry records the version
//! it last evaluated each pair at and skips repeats, so re-running an
//! unchanged item can never produce a duplicate hit.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use regex::{Regex, RegexBuilder};

use crate::error::{EngineError, EngineResult, ExecutionError};
use crate::item::Item;
use crate::storage::{StorageError, SubscriptionStore};
use crate::subscription::SearchSubscription;

const REGEX_CACHE_MAX: usize = 1024;

static TERM_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

/// Case-insensitive containment regex for a free-text term, cached.
///
/// Terms come from stored subscriptions and repeat across evaluations, so
/// compiled regexes are cached. The cache is bounded; when full it is
/// cleared rather than grown.
fn cached_term_regex(term: &str) -> EngineResult<Regex> {
    let cache = TERM_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    {
        let guard = cache
            .read()
            .map_err(|_| EngineError::internal("term regex cache lock poisoned"))?;
        if let Some(re) = guard.get(term) {
            return Ok(re.clone());
        }
    }

    let compiled = RegexBuilder::new(&regex::escape(term))
        .case_insensitive(true)
        .build()
        .map_err(|e| EngineError::internal(format!("term regex build failed: {e}")))?;

    let mut guard = cache
        .write()
        .map_err(|_| EngineError::internal("term regex cache lock poisoned"))?;

    if guard.len() >= REGEX_CACHE_MAX {
        guard.clear();
    }

    // Another thread may have inserted it while we compiled.
    guard
        .entry(term.to_string())
        .or_insert_with(|| compiled.clone());
    Ok(compiled)
}

/// Lazy, finite sequence of subscriptions hit by one item evaluation.
///
/// Each yielded subscription pairs with the evaluated item. Misses are
/// recorded as evaluated while the scan advances; a hit is only recorded
/// once the caller confirms it via [`SubscriptionRegistry::confirm`], so a
/// hit whose downstream publish failed is yielded again on the next run.
pub struct EvalScan {
    item: Item,
    subs: std::vec::IntoIter<SearchSubscription>,
    store: Arc<dyn SubscriptionStore>,
}

impl std::fmt::Debug for EvalScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalScan")
            .field("item", &self.item.id)
            .finish_non_exhaustive()
    }
}

impl Iterator for EvalScan {
    type Item = EngineResult<SearchSubscription>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let sub = self.subs.next()?;

            match self.store.last_evaluated(sub.id, self.item.id) {
                Ok(Some(v)) if v >= self.item.version => continue,
                Ok(_) => {}
                Err(e) => return Some(Err(map_storage(&e))),
            }

            let hit = match subscription_hits(&sub, &self.item) {
                Ok(hit) => hit,
                Err(e) => return Some(Err(e)),
            };

            if hit {
                return Some(Ok(sub));
            }

            // A miss has nothing to publish, so it is safe to record here.
            if let Err(e) = self
                .store
                .record_evaluated(sub.id, self.item.id, self.item.version)
            {
                // A vanished subscription mid-scan is not an error; anything
                // else is.
                if !matches!(e, StorageError::SubscriptionNotFound(_)) {
                    return Some(Err(map_storage(&e)));
                }
            }
        }
    }
}

/// Returns true if the item satisfies every criterion of the subscription.
fn subscription_hits(sub: &SearchSubscription, item: &Item) -> EngineResult<bool> {
    if let Some(area) = &sub.area {
        if !area.contains(&item.location) {
            return Ok(false);
        }
    }
    if let Some(category) = &sub.category {
        if &item.category != category {
            return Ok(false);
        }
    }
    if let Some(range) = &sub.created {
        if !range.contains(item.created_at) {
            return Ok(false);
        }
    }

    let terms = sub.terms();
    if !terms.is_empty() {
        let text = item.searchable_text();
        for term in &terms {
            let re = cached_term_regex(term)?;
            if !re.is_match(&text) {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

/// Saved-search evaluator.
pub struct SubscriptionRegistry {
    store: Arc<dyn SubscriptionStore>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry").finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    #[must_use]
    #[allow(missing_docs)]
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    /// Evaluates the item against every stored subscription.
    ///
    /// Called on item creation and on every status transition. Pairs
    /// already evaluated at this item version are skipped.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the subscription list cannot be read;
    /// per-subscription failures surface through the scan's items.
    pub fn evaluate(&self, item: &Item) -> EngineResult<EvalScan> {
        let subs = self.store.list_all().map_err(|e| map_storage(&e))?;
        Ok(EvalScan {
            item: item.clone(),
            subs: subs.into_iter(),
            store: Arc::clone(&self.store),
        })
    }

    /// Confirms a hit: records the pair as evaluated at the item's version.
    ///
    /// Call this after the hit's downstream effects are durably published.
    /// A subscription deleted in the meantime is not an error.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures.
    pub fn confirm(&self, subscription: &SearchSubscription, item: &Item) -> EngineResult<()> {
        match self
            .store
            .record_evaluated(subscription.id, item.id, item.version)
        {
            Ok(()) | Err(StorageError::SubscriptionNotFound(_)) => Ok(()),
            Err(e) => Err(map_storage(&e)),
        }
    }
}

fn map_storage(e: &StorageError) -> EngineError {
    ExecutionError::Storage {
        message: e.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::geo::GeoPoint;
    use crate::ids::UserId;
    use crate::item::{Category, ItemDraft};
    use crate::storage::InMemorySubscriptionStore;
    use crate::subscription::{DateRange, GeoFence, SubscriptionSpec};

    fn registry() -> (Arc<InMemorySubscriptionStore>, SubscriptionRegistry) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let registry = SubscriptionRegistry::new(Arc::clone(&store) as Arc<dyn SubscriptionStore>);
        (store, registry)
    }

    fn paris_item(label: &str, category: Category) -> Item {
        Item::new(
            UserId::new(),
            ItemDraft {
                category,
                serial: None,
                label: label.to_string(),
                description: None,
                location: GeoPoint::new(48.8566, 2.3522).unwrap(),
            },
        )
    }

    fn paris_fence(radius_m: f64) -> GeoFence {
        GeoFence::new(GeoPoint::new(48.8566, 2.3522).unwrap(), radius_m).unwrap()
    }

    fn collect(scan: EvalScan) -> Vec<SearchSubscription> {
        scan.collect::<EngineResult<Vec<_>>>().unwrap()
    }

    #[test]
    fn hits_when_all_criteria_pass() {
        let (store, registry) = registry();
        let sub = SearchSubscription::new(
            UserId::new(),
            SubscriptionSpec {
                query: Some("brompton".to_string()),
                category: Some(Category::Bicycle),
                created: None,
                area: Some(paris_fence(1_000.0)),
            },
        );
        store.insert(sub.clone()).unwrap();

        let item = paris_item("Black Brompton C-Line", Category::Bicycle);
        let hits = collect(registry.evaluate(&item).unwrap());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, sub.id);
    }

    #[test]
    fn misses_outside_the_fence() {
        let (store, registry) = registry();
        let sub = SearchSubscription::new(
            UserId::new(),
            SubscriptionSpec {
                query: None,
                category: None,
                created: None,
                area: Some(paris_fence(100.0)),
            },
        );
        store.insert(sub).unwrap();

        let mut item = paris_item("Bike", Category::Bicycle);
        item.location = GeoPoint::new(51.5074, -0.1278).unwrap();
        assert!(collect(registry.evaluate(&item).unwrap()).is_empty());
    }

    #[test]
    fn category_must_match_exactly() {
        let (store, registry) = registry();
        let sub = SearchSubscription::new(
            UserId::new(),
            SubscriptionSpec {
                query: None,
                category: Some(Category::Phone),
                created: None,
                area: Some(paris_fence(10_000.0)),
            },
        );
        store.insert(sub).unwrap();

        let item = paris_item("Bike", Category::Bicycle);
        assert!(collect(registry.evaluate(&item).unwrap()).is_empty());
    }

    #[test]
    fn every_term_must_be_contained() {
        let (store, registry) = registry();
        let sub = SearchSubscription::new(
            UserId::new(),
            SubscriptionSpec {
                query: Some("black brompton".to_string()),
                category: None,
                created: None,
                area: None,
            },
        );
        store.insert(sub).unwrap();

        let hit = paris_item("BLACK Brompton C-Line", Category::Bicycle);
        assert_eq!(collect(registry.evaluate(&hit).unwrap()).len(), 1);

        let miss = paris_item("Red Brompton", Category::Bicycle);
        assert!(collect(registry.evaluate(&miss).unwrap()).is_empty());
    }

    #[test]
    fn date_range_containment() {
        let (store, registry) = registry();
        let item = paris_item("Bike", Category::Bicycle);

        let covering = DateRange::new(
            Some(item.created_at - chrono::Duration::hours(1)),
            Some(item.created_at + chrono::Duration::hours(1)),
        )
        .unwrap();
        let sub = SearchSubscription::new(
            UserId::new(),
            SubscriptionSpec {
                query: None,
                category: None,
                created: Some(covering),
                area: None,
            },
        );
        store.insert(sub).unwrap();
        let hits = collect(registry.evaluate(&item).unwrap());
        assert_eq!(hits.len(), 1);
        registry.confirm(&hits[0], &item).unwrap();

        let past_only = DateRange::until(item.created_at - chrono::Duration::hours(1));
        let sub2 = SearchSubscription::new(
            UserId::new(),
            SubscriptionSpec {
                query: None,
                category: None,
                created: Some(past_only),
                area: None,
            },
        );
        store.insert(sub2.clone()).unwrap();
        // The covering subscription is confirmed at this version and the
        // past-only one misses, so nothing new hits.
        assert!(collect(registry.evaluate(&item).unwrap()).is_empty());
    }

    #[test]
    fn re_evaluation_at_same_version_is_suppressed() {
        let (store, registry) = registry();
        let sub = SearchSubscription::new(
            UserId::new(),
            SubscriptionSpec {
                query: None,
                category: None,
                created: None,
                area: Some(paris_fence(1_000.0)),
            },
        );
        store.insert(sub).unwrap();

        let item = paris_item("Bike", Category::Bicycle);
        let hits = collect(registry.evaluate(&item).unwrap());
        assert_eq!(hits.len(), 1);
        registry.confirm(&hits[0], &item).unwrap();
        assert!(collect(registry.evaluate(&item).unwrap()).is_empty());
    }

    #[test]
    fn unconfirmed_hit_is_yielded_again() {
        let (store, registry) = registry();
        let sub = SearchSubscription::new(
            UserId::new(),
            SubscriptionSpec {
                query: None,
                category: None,
                created: None,
                area: Some(paris_fence(1_000.0)),
            },
        );
        store.insert(sub).unwrap();

        let item = paris_item("Bike", Category::Bicycle);
        assert_eq!(collect(registry.evaluate(&item).unwrap()).len(), 1);
        // Not confirmed (publish would have failed): the hit comes back.
        assert_eq!(collect(registry.evaluate(&item).unwrap()).len(), 1);
    }

    #[test]
    fn version_bump_allows_re_evaluation() {
        let (store, registry) = registry();
        let sub = SearchSubscription::new(
            UserId::new(),
            SubscriptionSpec {
                query: None,
                category: None,
                created: None,
                area: Some(paris_fence(1_000.0)),
            },
        );
        store.insert(sub).unwrap();

        let mut item = paris_item("Bike", Category::Bicycle);
        let hits = collect(registry.evaluate(&item).unwrap());
        assert_eq!(hits.len(), 1);
        registry.confirm(&hits[0], &item).unwrap();

        item.touch();
        assert_eq!(collect(registry.evaluate(&item).unwrap()).len(), 1);
    }

    #[test]
    fn misses_are_recorded_too() {
        let (store, registry) = registry();
        let sub = SearchSubscription::new(
            UserId::new(),
            SubscriptionSpec {
                query: Some("nomatch".to_string()),
                category: None,
                created: None,
                area: None,
            },
        );
        store.insert(sub.clone()).unwrap();

        let item = paris_item("Bike", Category::Bicycle);
        assert!(collect(registry.evaluate(&item).unwrap()).is_empty());
        assert_eq!(
            store.last_evaluated(sub.id, item.id).unwrap(),
            Some(item.version)
        );
    }
}
