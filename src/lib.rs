//! # Proxim - Proximity & Identity Matching Engine
//!
//! Proxim is the matching core of a lost/stolen property registry: it
//! answers "what registered items exist near this point", detects when two
//! independently registered items share an identifying serial, enforces the
//! item lifecycle state machine, evaluates saved searches, and routes the
//! resulting events to the right users exactly once.
//!
//! ## Core Concepts
//!
//! - **Item**: a registered object with an owner, a category, a location,
//!   and an optional identifying fingerprint
//! - **Fingerprint**: the normalized identifying string used for cross-item
//!   matching
//! - **SearchSubscription**: a user's saved search, evaluated against every
//!   new or changed item
//! - **Notification**: the durable, deduplicated record of an engine event
//!   for one recipient
//!
//! ## Usage
//!
//! ```rust,ignore
//! use proxim::{Actor, Engine, GeoPoint, ItemDraft, ItemStatus};
//! use proxim::item::Category;
//!
//! let engine = Engine::in_memory();
//!
//! let owner = proxim::UserId::new();
//! let bike = engine.create_item(owner, ItemDraft {
//!     category: Category::Bicycle,
//!     serial: Some("WTU123456789".to_string()),
//!     label: "Black Brompton C-Line".to_string(),
//!     description: None,
//!     location: GeoPoint::new(48.8566, 2.3522)?,
//! })?;
//!
//! // Reporting it stolen cross-references the registry and fans events
//! // out to matching subscriptions.
//! engine.update_item_status(bike.id, ItemStatus::Stolen, Actor::User(owner))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod geo;
pub mod ids;
pub mod item;
pub mod notification;
pub mod status;
pub mod subscription;

// Components
pub mod dispatch;
pub mod engine;
pub mod index;
pub mod lifecycle;
pub mod matcher;
pub mod registry;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use dispatch::{DeliverySink, DispatcherConfig, NotificationDispatcher};
pub use engine::{Actor, Engine, EngineConfig, EngineStats, NearbyItem, Page};
pub use error::{EngineError, EngineResult, ExecutionError, ValidationError};
pub use event::{EngineEvent, MatchConfidence, MatchEvent};
pub use geo::GeoPoint;
pub use ids::{ItemId, MatchEventId, NotificationId, SubscriptionId, UserId};
pub use index::{QueryFilters, SpatialIndex, SpatialIndexConfig};
pub use item::{Item, ItemDraft, ItemSummary};
pub use matcher::{IdentityMatcher, MatcherConfig};
pub use notification::{DedupKey, Notification, NotificationKind, RenderedPayload};
pub use registry::SubscriptionRegistry;
pub use status::ItemStatus;
pub use storage::{
    ItemStore, MatchEventStore, NotificationStore, StorageError, SubscriptionStore,
};
pub use subscription::{DateRange, GeoFence, SearchSubscription, SubscriptionSpec};
