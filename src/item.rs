//! Item types.
//!
//! An item is the unit of registration: a physical object with an owner, a
//! category, an optional identifying serial, and a location. Items anchor
//! everything else — match events reference pairs of items, subscriptions
//! are evaluated against them, and notifications snapshot them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::fingerprint;
use crate::geo::GeoPoint;
use crate::ids::{ItemId, UserId};
use crate::status::ItemStatus;

/// Maximum accepted length for the label field.
pub const MAX_LABEL_LEN: usize = 200;

/// Maximum accepted length for the description field.
pub const MAX_DESCRIPTION_LEN: usize = 4_000;

/// Maximum accepted length for the raw serial field.
pub const MAX_SERIAL_LEN: usize = 120;

/// Classification of registered items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Category {
    /// Bicycles, e-bikes, scooters.
    Bicycle,
    /// Phones and tablets.
    Phone,
    /// Laptops and desktop computers.
    Computer,
    /// Cars, motorcycles, trailers.
    Vehicle,
    /// Jewelry and watches.
    Jewelry,
    /// Passports, permits, certificates.
    Document,
    /// Anything else, free-form.
    Custom(String),
}

impl TryFrom<String> for Category {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value.is_empty() {
            return Err("category cannot be empty".to_string());
        }

        let bytes = value.as_bytes();
        if bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"custom:") {
            let rest = value[7..].trim();
            if rest.is_empty() {
                return Err("custom category cannot be empty".to_string());
            }
            return Ok(Self::Custom(rest.to_string()));
        }

        Ok(if value.eq_ignore_ascii_case("bicycle") {
            Self::Bicycle
        } else if value.eq_ignore_ascii_case("phone") {
            Self::Phone
        } else if value.eq_ignore_ascii_case("computer") {
            Self::Computer
        } else if value.eq_ignore_ascii_case("vehicle") {
            Self::Vehicle
        } else if value.eq_ignore_ascii_case("jewelry") {
            Self::Jewelry
        } else if value.eq_ignore_ascii_case("document") {
            Self::Document
        } else {
            return Err(format!(
                "unknown category: {value}. Use a built-in category (bicycle, phone, computer, vehicle, jewelry, document) or prefix custom categories with custom:<name>"
            ));
        })
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bicycle => write!(f, "bicycle"),
            Self::Phone => write!(f, "phone"),
            Self::Computer => write!(f, "computer"),
            Self::Vehicle => write!(f, "vehicle"),
            Self::Jewelry => write!(f, "jewelry"),
            Self::Document => write!(f, "document"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Input for item creation, before the engine assigns identity and status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDraft {
    /// Item category.
    pub category: Category,
    /// Raw identifying serial, if the owner supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Short display label ("Black Brompton C-Line").
    pub label: String,
    /// Longer free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Where the item normally lives (or was last seen).
    pub location: GeoPoint,
}

impl ItemDraft {
    /// Validates field presence and lengths.
    ///
    /// Coordinate validation already happened when the [`GeoPoint`] was
    /// constructed; this checks everything else before any mutation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.label.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "label".to_string(),
            });
        }
        if self.label.len() > MAX_LABEL_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "label".to_string(),
                max_length: MAX_LABEL_LEN,
            });
        }
        if let Some(desc) = &self.description {
            if desc.len() > MAX_DESCRIPTION_LEN {
                return Err(ValidationError::FieldTooLong {
                    field: "description".to_string(),
                    max_length: MAX_DESCRIPTION_LEN,
                });
            }
        }
        if let Some(serial) = &self.serial {
            if serial.len() > MAX_SERIAL_LEN {
                return Err(ValidationError::FieldTooLong {
                    field: "serial".to_string(),
                    max_length: MAX_SERIAL_LEN,
                });
            }
        }
        Ok(())
    }
}

/// A registered item.
///
/// Status is the only field mutable post-creation by non-owners
/// (moderators); everything else is owned by the creating user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Globally unique identifier.
    pub id: ItemId,

    /// Owning user (by reference; users live in the surrounding application).
    pub owner: UserId,

    /// Item category.
    pub category: Category,

    /// Raw serial as entered by the owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    /// Normalized identifying fingerprint. `None` when the serial is absent
    /// or normalizes to the empty string; such items never match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Short display label.
    pub label: String,

    /// Longer free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Registered location.
    pub location: GeoPoint,

    /// Lifecycle status.
    pub status: ItemStatus,

    /// When the item was registered.
    pub created_at: DateTime<Utc>,

    /// When the item was last mutated.
    pub updated_at: DateTime<Utc>,

    /// Version number (incremented on every accepted mutation).
    pub version: u64,

    /// When the matcher last ran for this item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_matched_at: Option<DateTime<Utc>>,

    /// Set when downstream matching failed after retries and the
    /// reconciliation sweep still owes this item a matcher run.
    #[serde(default)]
    pub match_pending: bool,
}

impl Item {
    /// Creates a new item from a validated draft.
    ///
    /// Initial status is always `registered`. The fingerprint is derived
    /// from the serial; a serial that normalizes to nothing leaves the item
    /// unmatchable.
    #[must_use]
    pub fn new(owner: UserId, draft: ItemDraft) -> Self {
        let now = Utc::now();
        let fingerprint = draft.serial.as_deref().and_then(|s| {
            let norm = fingerprint::normalize(s);
            if norm.is_empty() {
                None
            } else {
                Some(norm)
            }
        });

        Self {
            id: ItemId::new(),
            owner,
            category: draft.category,
            serial: draft.serial,
            fingerprint,
            label: draft.label,
            description: draft.description,
            location: draft.location,
            status: ItemStatus::Registered,
            created_at: now,
            updated_at: now,
            version: 1,
            last_matched_at: None,
            match_pending: false,
        }
    }

    /// Updates the `updated_at` timestamp and increments the version.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }

    /// The text block subscriptions run free-text containment against.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        let mut text = self.label.to_lowercase();
        if let Some(desc) = &self.description {
            text.push(' ');
            text.push_str(&desc.to_lowercase());
        }
        if let Some(serial) = &self.serial {
            text.push(' ');
            text.push_str(&serial.to_lowercase());
        }
        text.push(' ');
        text.push_str(&self.category.to_string());
        text
    }

    /// Denormalized projection for query results and notification payloads.
    #[must_use]
    pub fn summary(&self) -> ItemSummary {
        ItemSummary {
            id: self.id,
            owner: self.owner,
            category: self.category.clone(),
            status: self.status,
            label: self.label.clone(),
            lat: self.location.lat(),
            lng: self.location.lng(),
            created_at: self.created_at,
        }
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Item {}

/// Minimum displayable projection of an item.
///
/// Embedded in notifications so they remain renderable after the referenced
/// item is deleted, and returned by proximity queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    /// Item id.
    pub id: ItemId,
    /// Owning user.
    pub owner: UserId,
    /// Category.
    pub category: Category,
    /// Status at snapshot time.
    pub status: ItemStatus,
    /// Display label.
    pub label: String,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}
