//! Engine write path.
//!
//! Item creation, status transitions, and their downstream side effects.
//! A transition and its matching/subscription fan-out run as one logical
//! unit under the item's lock: callers never observe a "successful" status
//! change whose events silently went missing. When side effects fail after
//! retries, the commit stands and the item is flagged for the
//! reconciliation sweep instead.

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult, ExecutionError};
use crate::event::{EngineEvent, MatchEvent};
use crate::ids::{ItemId, UserId};
use crate::item::{Item, ItemDraft};
use crate::lifecycle;
use crate::status::ItemStatus;
use crate::storage::StorageError;

use super::{map_storage, Actor, Engine};

impl Engine {
    /// Registers a new item.
    ///
    /// The item starts as `registered`, is indexed spatially, and is
    /// immediately run through matching and subscription evaluation.
    ///
    /// # Errors
    ///
    /// Validation errors are detected before any mutation.
    pub fn create_item(&self, owner: UserId, draft: ItemDraft) -> EngineResult<Item> {
        draft.validate().map_err(EngineError::Validation)?;

        let item = Item::new(owner, draft);
        self.items()
            .insert(item.clone())
            .map_err(|e| map_storage(&e))?;
        self.index().upsert(item.id, item.location)?;
        debug!(item = %item.id, owner = %owner, "created item");

        self.run_side_effects(&item, true);
        self.reload(item)
    }

    /// Applies a status transition on behalf of `actor`.
    ///
    /// Transitions for a given item are serialized; the downstream events
    /// reach the notification dispatcher before this returns. Reporting an
    /// item `stolen` or `lost` additionally runs the identity matcher.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown item
    /// - `Forbidden` when the actor is neither the owner nor a moderator
    /// - `InvalidTransition` for an edge not in the lifecycle table
    /// - `Conflict` when a concurrent transition wins twice in a row
    pub fn update_item_status(
        &self,
        item_id: ItemId,
        requested: ItemStatus,
        actor: Actor,
    ) -> EngineResult<Item> {
        let _guard = self
            .lock_for(item_id)
            .lock()
            .map_err(|_| EngineError::internal("item lock poisoned"))?;

        let item = self
            .items()
            .get(item_id)
            .map_err(|e| map_storage(&e))?
            .ok_or(ExecutionError::ItemNotFound { id: item_id })?;

        if !actor.may_transition(item.owner) {
            return Err(ExecutionError::Forbidden {
                reason: "only the owner or a moderator may change item status".to_string(),
            }
            .into());
        }

        lifecycle::validate_transition(item.status, requested)
            .map_err(EngineError::Execution)?;

        let previous = item.status;
        let updated = self.commit_transition(&item, requested)?;
        debug!(
            item = %updated.id,
            from = %previous,
            to = %requested,
            actor = %actor.user_id(),
            "status transition committed"
        );

        let status_event = EngineEvent::StatusChanged {
            recipient: updated.owner,
            item: updated.summary(),
            from: previous,
            to: requested,
            occurred_at: updated.updated_at,
        };
        let status_ok = self.with_retry("status event", || {
            self.dispatcher().publish(&status_event).map(|_| ())
        });

        self.run_side_effects(&updated, requested.triggers_matching());

        if !status_ok {
            // The transition is committed; the reconciliation flag keeps
            // the dropped event from being silently lost. Set after the
            // side-effect bookkeeping so it cannot be cleared by it.
            warn!(item = %updated.id, "status event publish failed after retries");
            let _ = self
                .items()
                .record_match_sweep(updated.id, None, true);
        }

        self.reload(updated)
    }

    /// Re-runs matching and subscription evaluation for items flagged
    /// `match_pending`, oldest first. Returns how many items recovered.
    ///
    /// Intended to be driven periodically by the embedding application.
    ///
    /// # Errors
    ///
    /// Surfaces storage failures from listing the pending set.
    pub fn reconcile_pending(&self, limit: usize) -> EngineResult<usize> {
        let pending = self
            .items()
            .list_match_pending(limit)
            .map_err(|e| map_storage(&e))?;

        let mut recovered = 0;
        for stale in pending {
            let _guard = self
                .lock_for(stale.id)
                .lock()
                .map_err(|_| EngineError::internal("item lock poisoned"))?;

            let Some(fresh) = self.items().get(stale.id).map_err(|e| map_storage(&e))? else {
                continue;
            };
            if !fresh.match_pending {
                continue;
            }
            if self.run_side_effects(&fresh, true) {
                recovered += 1;
            }
        }

        if recovered > 0 {
            debug!(recovered, "reconciliation sweep recovered items");
        }
        Ok(recovered)
    }

    /// CAS transition with one internal retry, per the concurrency
    /// contract: a lost swap is retried against fresh state once, then
    /// surfaced as `Conflict`.
    fn commit_transition(&self, item: &Item, requested: ItemStatus) -> EngineResult<Item> {
        match self
            .items()
            .update_status(item.id, item.version, requested)
        {
            Ok(updated) => Ok(updated),
            Err(StorageError::VersionConflict { .. }) => {
                let fresh = self
                    .items()
                    .get(item.id)
                    .map_err(|e| map_storage(&e))?
                    .ok_or(ExecutionError::ItemNotFound { id: item.id })?;

                lifecycle::validate_transition(fresh.status, requested)
                    .map_err(EngineError::Execution)?;

                match self
                    .items()
                    .update_status(fresh.id, fresh.version, requested)
                {
                    Ok(updated) => Ok(updated),
                    Err(StorageError::VersionConflict { .. }) => {
                        Err(ExecutionError::Conflict { item_id: item.id }.into())
                    }
                    Err(StorageError::ItemNotFound(id)) => {
                        Err(ExecutionError::ItemNotFound { id }.into())
                    }
                    Err(e) => Err(map_storage(&e)),
                }
            }
            Err(StorageError::ItemNotFound(id)) => {
                Err(ExecutionError::ItemNotFound { id }.into())
            }
            Err(e) => Err(map_storage(&e)),
        }
    }

    /// Runs matching (optionally) and subscription evaluation, with
    /// retries, and records the sweep bookkeeping. Returns true when every
    /// side effect completed.
    pub(crate) fn run_side_effects(&self, item: &Item, run_matching: bool) -> bool {
        let matched = if run_matching {
            self.with_retry("matching", || self.run_matching(item))
        } else {
            true
        };
        let evaluated = self.with_retry("subscriptions", || self.run_subscriptions(item));

        let ok = matched && evaluated;
        let last_matched_at = if run_matching && matched {
            Some(Utc::now())
        } else {
            None
        };
        if let Err(e) = self
            .items()
            .record_match_sweep(item.id, last_matched_at, !ok)
        {
            warn!(item = %item.id, error = %e, "failed to record match sweep");
        }
        if !ok {
            warn!(item = %item.id, "side effects incomplete, item flagged for reconciliation");
        }
        ok
    }

    /// Detect matches for the item and fan the events out.
    ///
    /// Notifications are published before the event is recorded: a retry
    /// after a partial failure re-emits the pair (nothing recorded yet) and
    /// the dispatcher's dedup key absorbs any repeat publish. Recording
    /// goes through the covered-pair check, so two concurrent detection
    /// runs over the same pair keep history at one event.
    fn run_matching(&self, item: &Item) -> EngineResult<()> {
        let scan = self.matcher().check_for_matches(item)?;
        for event in scan {
            let event = event?;

            let Some(a) = self
                .items()
                .get(event.item_a)
                .map_err(|e| map_storage(&e))?
            else {
                continue;
            };
            let Some(b) = self
                .items()
                .get(event.item_b)
                .map_err(|e| map_storage(&e))?
            else {
                continue;
            };

            self.publish_match(&event, &a, &b)?;

            let covered_after = a.updated_at.max(b.updated_at);
            self.match_events()
                .record_unless_covered(event, covered_after)
                .map_err(|e| map_storage(&e))?;
        }
        Ok(())
    }

    /// Notifies both owners of a detected match.
    fn publish_match(&self, event: &MatchEvent, a: &Item, b: &Item) -> EngineResult<()> {
        for (own, other) in [(a, b), (b, a)] {
            let notify = EngineEvent::Match {
                recipient: own.owner,
                event_id: event.id,
                fingerprint: event.fingerprint.clone(),
                confidence: event.confidence,
                item: own.summary(),
                counterpart: other.summary(),
                occurred_at: event.detected_at,
            };
            self.dispatcher().publish(&notify)?;
        }
        Ok(())
    }

    /// Evaluates the item against stored subscriptions and publishes hits.
    ///
    /// The evaluated version is confirmed only after the hit's publish
    /// succeeded, so a failed publish is re-yielded on retry; a repeated
    /// publish after a lost confirmation is absorbed by the dedup key.
    fn run_subscriptions(&self, item: &Item) -> EngineResult<()> {
        let scan = self.registry().evaluate(item)?;
        for subscription in scan {
            let subscription = subscription?;
            let event = EngineEvent::SubscriptionHit {
                recipient: subscription.owner,
                subscription_id: subscription.id,
                item: item.summary(),
                occurred_at: Utc::now(),
            };
            self.dispatcher().publish(&event)?;
            self.registry().confirm(&subscription, item)?;
        }
        Ok(())
    }

    fn with_retry(&self, label: &'static str, op: impl Fn() -> EngineResult<()>) -> bool {
        let attempts = self.cfg().side_effect_retries.max(1);
        for attempt in 1..=attempts {
            match op() {
                Ok(()) => return true,
                Err(e) => {
                    warn!(attempt, error = %e, "{label} attempt failed");
                    if attempt < attempts {
                        std::thread::sleep(self.cfg().retry_backoff * attempt);
                    }
                }
            }
        }
        false
    }

    fn reload(&self, fallback: Item) -> EngineResult<Item> {
        Ok(self
            .items()
            .get(fallback.id)
            .map_err(|e| map_storage(&e))?
            .unwrap_or(fallback))
    }
}
