//! Saved-search subscriptions.
//!
//! A subscription is a user-owned standing query: a geographic fence plus
//! optional structured filters and a free-text query. Subscriptions are
//! read-only after creation except for deletion; the engine never mutates
//! them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::geo::{self, GeoPoint};
use crate::ids::{SubscriptionId, UserId};
use crate::item::Category;

/// Maximum accepted length for the free-text query.
pub const MAX_QUERY_LEN: usize = 500;

/// A half-open date interval `[from, to)` used for created-date filtering.
///
/// Either bound may be absent; an absent bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Start of the range (inclusive). None means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,

    /// End of the range (exclusive). None means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Creates a date range, validating that `from` precedes `to` when both
    /// bounds are present.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidDateRange` if `from >= to`.
    pub fn new(
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Self, ValidationError> {
        if let (Some(f), Some(t)) = (from, to) {
            if f >= t {
                return Err(ValidationError::InvalidDateRange { from: f, to: t });
            }
        }
        Ok(Self { from, to })
    }

    /// Creates an open-ended range starting at the given time.
    #[must_use]
    pub const fn starting_at(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    /// Creates a range covering everything before the given time.
    #[must_use]
    pub const fn until(to: DateTime<Utc>) -> Self {
        Self {
            from: None,
            to: Some(to),
        }
    }

    /// Returns true if the instant falls within the range.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if let Some(from) = self.from {
            if at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if at >= to {
                return false;
            }
        }
        true
    }
}

/// A circular geographic fence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFence {
    /// Center of the fence.
    pub center: GeoPoint,
    /// Radius in meters.
    pub radius_m: f64,
}

impl GeoFence {
    /// Creates a fence with a validated radius.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidRadius` for non-positive or
    /// non-finite radii.
    pub fn new(center: GeoPoint, radius_m: f64) -> Result<Self, ValidationError> {
        geo::validate_radius(radius_m)?;
        Ok(Self { center, radius_m })
    }

    /// Returns true if the point lies within the fence.
    #[must_use]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.center.distance_m(point) <= self.radius_m
    }
}

/// Input for subscription creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    /// Free-text query; every whitespace-separated term must appear in a
    /// hit's searchable text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Category filter (exact match).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    /// Created-date filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateRange>,

    /// Geographic fence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<GeoFence>,
}

impl SubscriptionSpec {
    /// Validates the spec before any mutation.
    ///
    /// A subscription must constrain something: a blank query with no
    /// structured filters would hit every item in the system.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(q) = &self.query {
            if q.len() > MAX_QUERY_LEN {
                return Err(ValidationError::FieldTooLong {
                    field: "query".to_string(),
                    max_length: MAX_QUERY_LEN,
                });
            }
        }

        let has_query = self
            .query
            .as_deref()
            .map(|q| !q.trim().is_empty())
            .unwrap_or(false);
        if !has_query && self.category.is_none() && self.created.is_none() && self.area.is_none() {
            return Err(ValidationError::EmptySubscription);
        }
        Ok(())
    }
}

/// A stored saved search.
///
/// Lifecycle: created by user action, read-only after creation except for
/// deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSubscription {
    /// Globally unique identifier.
    pub id: SubscriptionId,

    /// Owning user; hits notify this user.
    pub owner: UserId,

    /// Free-text query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Category filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    /// Created-date filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateRange>,

    /// Geographic fence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<GeoFence>,

    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
}

impl SearchSubscription {
    /// Creates a subscription from a validated spec.
    #[must_use]
    pub fn new(owner: UserId, spec: SubscriptionSpec) -> Self {
        Self {
            id: SubscriptionId::new(),
            owner,
            query: spec.query,
            category: spec.category,
            created: spec.created,
            area: spec.area,
            created_at: Utc::now(),
        }
    }

    /// The query split into lowercase terms. Empty when no query is set.
    #[must_use]
    pub fn terms(&self) -> Vec<String> {
        self.query
            .as_deref()
            .map(|q| {
                q.split_whitespace()
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default()
    }
}
