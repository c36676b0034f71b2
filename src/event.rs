//! Engine events.
//!
//! Events are the currency between the matcher, the lifecycle manager, the
//! subscription registry, and the notification dispatcher. They are
//! serializable so they can be recorded, replayed, and rendered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ItemId, MatchEventId, SubscriptionId, UserId};
use crate::item::ItemSummary;
use crate::status::ItemStatus;

/// Confidence tier of a fingerprint match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// Normalized fingerprints are byte-identical.
    Exact,
    /// Fingerprints are within edit distance one.
    Fuzzy,
}

/// A detected cross-item identity match.
///
/// The pair is stored in canonical order (`item_a < item_b` by UUID byte
/// order) so the unordered pair has exactly one representation. Once
/// recorded a match event is immutable history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    /// Event id.
    pub id: MatchEventId,
    /// Lower-ordered item of the pair.
    pub item_a: ItemId,
    /// Higher-ordered item of the pair.
    pub item_b: ItemId,
    /// The normalized fingerprint that matched.
    pub fingerprint: String,
    /// Confidence tier.
    pub confidence: MatchConfidence,
    /// Detection time.
    pub detected_at: DateTime<Utc>,
}

/// Errors constructing match events.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchEventError {
    /// Both sides of the pair are the same item.
    #[error("match pair must reference two distinct items: {id}")]
    SelfPair {
        /// The duplicated item id.
        id: ItemId,
    },
}

impl MatchEvent {
    /// Creates a match event, canonicalizing pair order.
    ///
    /// # Errors
    ///
    /// Returns [`MatchEventError::SelfPair`] if both ids are equal.
    pub fn new(
        x: ItemId,
        y: ItemId,
        fingerprint: impl Into<String>,
        confidence: MatchConfidence,
    ) -> Result<Self, MatchEventError> {
        if x == y {
            return Err(MatchEventError::SelfPair { id: x });
        }
        let (item_a, item_b) = if x < y { (x, y) } else { (y, x) };
        Ok(Self {
            id: MatchEventId::new(),
            item_a,
            item_b,
            fingerprint: fingerprint.into(),
            confidence,
            detected_at: Utc::now(),
        })
    }

    /// The canonical unordered pair key.
    #[must_use]
    pub const fn pair(&self) -> (ItemId, ItemId) {
        (self.item_a, self.item_b)
    }

    /// Returns the other side of the pair, if `id` is part of it.
    #[must_use]
    pub fn counterpart_of(&self, id: ItemId) -> Option<ItemId> {
        if id == self.item_a {
            Some(self.item_b)
        } else if id == self.item_b {
            Some(self.item_a)
        } else {
            None
        }
    }
}

/// Canonical unordered pair key for two item ids.
#[must_use]
pub fn pair_key(x: ItemId, y: ItemId) -> (ItemId, ItemId) {
    if x < y {
        (x, y)
    } else {
        (y, x)
    }
}

/// An event addressed to a single recipient, ready for the dispatcher.
///
/// One logical occurrence can fan out into several of these (a match
/// notifies both owners; a transition notifies the owner and every hit
/// subscriber).
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Another item shares this recipient's item's fingerprint.
    Match {
        recipient: UserId,
        event_id: MatchEventId,
        fingerprint: String,
        confidence: MatchConfidence,
        /// The recipient's own item.
        item: ItemSummary,
        /// The matched counterpart.
        counterpart: ItemSummary,
        occurred_at: DateTime<Utc>,
    },

    /// An item's lifecycle status changed.
    StatusChanged {
        recipient: UserId,
        item: ItemSummary,
        from: ItemStatus,
        to: ItemStatus,
        occurred_at: DateTime<Utc>,
    },

    /// An item satisfied a saved search.
    SubscriptionHit {
        recipient: UserId,
        subscription_id: SubscriptionId,
        item: ItemSummary,
        occurred_at: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// The user this event is addressed to.
    #[must_use]
    pub const fn recipient(&self) -> UserId {
        match self {
            Self::Match { recipient, .. }
            | Self::StatusChanged { recipient, .. }
            | Self::SubscriptionHit { recipient, .. } => *recipient,
        }
    }

    /// When the underlying occurrence happened.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::Match { occurred_at, .. }
            | Self::StatusChanged { occurred_at, .. }
            | Self::SubscriptionHit { occurred_at, .. } => *occurred_at,
        }
    }

    /// Stable identity of the referenced entity, used in the dedup key.
    ///
    /// Two events describing the same logical condition for the same
    /// recipient must produce the same string here.
    #[must_use]
    pub fn referenced_entity(&self) -> String {
        match self {
            Self::Match {
                item, counterpart, ..
            } => {
                let (a, b) = pair_key(item.id, counterpart.id);
                format!("pair:{a}:{b}")
            }
            Self::StatusChanged { item, .. } => format!("item:{}", item.id),
            Self::SubscriptionHit {
                subscription_id,
                item,
                ..
            } => format!("sub:{subscription_id}:item:{}", item.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::geo::GeoPoint;
    use crate::item::{Category, Item, ItemDraft};

    fn summary_for(owner: UserId) -> ItemSummary {
        Item::new(
            owner,
            ItemDraft {
                category: Category::Bicycle,
                serial: Some("WTU1".to_string()),
                label: "Bike".to_string(),
                description: None,
                location: GeoPoint::new(48.8566, 2.3522).unwrap(),
            },
        )
        .summary()
    }

    #[test]
    fn match_event_canonicalizes_pair_order() {
        let lo = ItemId::from_uuid(Uuid::from_u128(1));
        let hi = ItemId::from_uuid(Uuid::from_u128(2));

        let forward = MatchEvent::new(lo, hi, "fp", MatchConfidence::Exact).unwrap();
        let reverse = MatchEvent::new(hi, lo, "fp", MatchConfidence::Exact).unwrap();

        assert_eq!(forward.pair(), (lo, hi));
        assert_eq!(reverse.pair(), (lo, hi));
    }

    #[test]
    fn match_event_rejects_self_pair() {
        let id = ItemId::new();
        let err = MatchEvent::new(id, id, "fp", MatchConfidence::Exact).unwrap_err();
        assert_eq!(err, MatchEventError::SelfPair { id });
    }

    #[test]
    fn counterpart_lookup() {
        let lo = ItemId::from_uuid(Uuid::from_u128(1));
        let hi = ItemId::from_uuid(Uuid::from_u128(2));
        let ev = MatchEvent::new(lo, hi, "fp", MatchConfidence::Exact).unwrap();

        assert_eq!(ev.counterpart_of(lo), Some(hi));
        assert_eq!(ev.counterpart_of(hi), Some(lo));
        assert_eq!(ev.counterpart_of(ItemId::new()), None);
    }

    #[test]
    fn referenced_entity_is_order_independent_for_matches() {
        let user_a = UserId::new();
        let user_b = UserId::new();
        let item = summary_for(user_a);
        let counterpart = summary_for(user_b);
        let now = Utc::now();

        let ev1 = EngineEvent::Match {
            recipient: user_a,
            event_id: MatchEventId::new(),
            fingerprint: "fp".to_string(),
            confidence: MatchConfidence::Exact,
            item: item.clone(),
            counterpart: counterpart.clone(),
            occurred_at: now,
        };
        let ev2 = EngineEvent::Match {
            recipient: user_a,
            event_id: MatchEventId::new(),
            fingerprint: "fp".to_string(),
            confidence: MatchConfidence::Exact,
            item: counterpart,
            counterpart: item,
            occurred_at: now,
        };

        assert_eq!(ev1.referenced_entity(), ev2.referenced_entity());
    }

    #[test]
    fn referenced_entities_differ_by_kind() {
        let user = UserId::new();
        let item = summary_for(user);
        let now = Utc::now();

        let status = EngineEvent::StatusChanged {
            recipient: user,
            item: item.clone(),
            from: ItemStatus::Registered,
            to: ItemStatus::Stolen,
            occurred_at: now,
        };
        let hit = EngineEvent::SubscriptionHit {
            recipient: user,
            subscription_id: SubscriptionId::new(),
            item,
            occurred_at: now,
        };

        assert_ne!(status.referenced_entity(), hit.referenced_entity());
    }
}
