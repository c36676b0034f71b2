//! Storage layer.
//!
//! Trait contracts plus the in-memory reference backends.

pub mod memory;
pub mod traits;

pub use memory::{
    InMemoryItemStore, InMemoryMatchEventStore, InMemoryNotificationStore, InMemoryStores,
    InMemorySubscriptionStore,
};
pub use traits::{
    ItemStore, MatchEventStore, NotificationStore, StorageError, SubscriptionStore, UpsertOutcome,
};
