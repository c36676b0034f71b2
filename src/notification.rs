//! Notification records.
//!
//! A notification is the durable, per-recipient record of an engine event.
//! The dedup key collapses logically-equivalent triggers: at most one unread
//! notification may exist per (recipient, key), and re-triggering the same
//! condition bumps recency instead of duplicating.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{EngineEvent, MatchConfidence};
use crate::ids::{ItemId, NotificationId, SubscriptionId, UserId};
use crate::item::ItemSummary;
use crate::status::ItemStatus;

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A cross-item identity match.
    Match,
    /// An item lifecycle transition.
    StatusChange,
    /// A saved search hit.
    SubscriptionHit,
}

impl NotificationKind {
    /// Stable wire tag, used in dedup-key derivation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::StatusChange => "status_change",
            Self::SubscriptionHit => "subscription_hit",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic identity collapsing equivalent notification triggers.
///
/// Derived with a keyed blake3 hash over kind, recipient, and referenced
/// entity, so the key is stable across process restarts and collision
/// resistant across recipients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

/// Domain-separation context for dedup-key derivation. Changing this would
/// invalidate every stored key, so it never changes.
const DEDUP_CONTEXT: &str = "proxim notification dedup v1";

impl DedupKey {
    /// Derives the key for (kind, recipient, referenced entity).
    #[must_use]
    pub fn derive(kind: NotificationKind, recipient: UserId, entity: &str) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(DEDUP_CONTEXT);
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(recipient.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(entity.as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Hex form of the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Flat, self-contained snapshot delivered with a notification.
///
/// Everything a renderer needs is denormalized in here; nothing requires a
/// further lookup, so the notification stays renderable after the
/// referenced item is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPayload {
    /// Notification kind, repeated for self-containment.
    pub kind: NotificationKind,

    /// The subject item.
    pub item_id: ItemId,
    /// Subject item label at snapshot time.
    pub item_label: String,
    /// Subject item category (string form).
    pub item_category: String,
    /// Subject item status at snapshot time.
    pub item_status: ItemStatus,
    /// Subject item latitude.
    pub lat: f64,
    /// Subject item longitude.
    pub lng: f64,

    /// Matched counterpart, for `match` notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_id: Option<ItemId>,
    /// Counterpart label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_label: Option<String>,
    /// Matched fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Match confidence tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<MatchConfidence>,

    /// Previous status, for `status_change` notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<ItemStatus>,
    /// New status, for `status_change` notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<ItemStatus>,

    /// Triggering subscription, for `subscription_hit` notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<SubscriptionId>,

    /// When the underlying occurrence happened.
    pub occurred_at: DateTime<Utc>,
}

impl RenderedPayload {
    fn base(kind: NotificationKind, item: &ItemSummary, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            item_id: item.id,
            item_label: item.label.clone(),
            item_category: item.category.to_string(),
            item_status: item.status,
            lat: item.lat,
            lng: item.lng,
            counterpart_id: None,
            counterpart_label: None,
            fingerprint: None,
            confidence: None,
            from_status: None,
            to_status: None,
            subscription_id: None,
            occurred_at,
        }
    }

    /// Renders an engine event into its flat payload.
    #[must_use]
    pub fn from_event(event: &EngineEvent) -> Self {
        match event {
            EngineEvent::Match {
                fingerprint,
                confidence,
                item,
                counterpart,
                occurred_at,
                ..
            } => {
                let mut payload = Self::base(NotificationKind::Match, item, *occurred_at);
                payload.counterpart_id = Some(counterpart.id);
                payload.counterpart_label = Some(counterpart.label.clone());
                payload.fingerprint = Some(fingerprint.clone());
                payload.confidence = Some(*confidence);
                payload
            }
            EngineEvent::StatusChanged {
                item,
                from,
                to,
                occurred_at,
                ..
            } => {
                let mut payload = Self::base(NotificationKind::StatusChange, item, *occurred_at);
                payload.from_status = Some(*from);
                payload.to_status = Some(*to);
                payload
            }
            EngineEvent::SubscriptionHit {
                subscription_id,
                item,
                occurred_at,
                ..
            } => {
                let mut payload =
                    Self::base(NotificationKind::SubscriptionHit, item, *occurred_at);
                payload.subscription_id = Some(*subscription_id);
                payload
            }
        }
    }
}

/// A durable notification record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Record id.
    pub id: NotificationId,

    /// Recipient user.
    pub recipient: UserId,

    /// Kind.
    pub kind: NotificationKind,

    /// Denormalized snapshot of the trigger.
    pub payload: RenderedPayload,

    /// Dedup key; unique among a recipient's unread notifications.
    pub dedup_key: DedupKey,

    /// Whether the recipient has read it.
    pub read: bool,

    /// When the record was first created.
    pub created_at: DateTime<Utc>,

    /// When the condition last re-triggered (recency bumps land here,
    /// `created_at` is preserved).
    pub last_triggered_at: DateTime<Utc>,

    /// When delivery was signalled to the external sink, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// The kind an event maps to.
    #[must_use]
    pub const fn kind_of(event: &EngineEvent) -> NotificationKind {
        match event {
            EngineEvent::Match { .. } => NotificationKind::Match,
            EngineEvent::StatusChanged { .. } => NotificationKind::StatusChange,
            EngineEvent::SubscriptionHit { .. } => NotificationKind::SubscriptionHit,
        }
    }

    /// The dedup key an event maps to.
    #[must_use]
    pub fn dedup_key_of(event: &EngineEvent) -> DedupKey {
        DedupKey::derive(
            Self::kind_of(event),
            event.recipient(),
            &event.referenced_entity(),
        )
    }

    /// Creates a fresh unread notification from an event.
    #[must_use]
    pub fn from_event(event: &EngineEvent) -> Self {
        let now = Utc::now();
        Self {
            id: NotificationId::new(),
            recipient: event.recipient(),
            kind: Self::kind_of(event),
            payload: RenderedPayload::from_event(event),
            dedup_key: Self::dedup_key_of(event),
            read: false,
            created_at: now,
            last_triggered_at: now,
            delivered_at: None,
        }
    }

    /// Applies a re-trigger of the same condition: refreshes the payload and
    /// bumps `last_triggered_at`, preserving identity and `created_at`.
    pub fn refresh(&mut self, event: &EngineEvent) {
        debug_assert_eq!(self.dedup_key, Self::dedup_key_of(event));
        self.payload = RenderedPayload::from_event(event);
        self.last_triggered_at = Utc::now();
    }
}
