//! Error types for the matching engine.
//!
//! All errors are strongly typed using thiserror. Every variant carries a
//! stable machine-readable code for the API boundary, so callers can match
//! on error kinds without parsing display strings.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ids::{ItemId, NotificationId, SubscriptionId};
use crate::status::ItemStatus;

/// Validation errors detected before any mutation takes place.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Coordinate ({lat}, {lng}) is out of range")]
    InvalidCoordinate {
        lat: f64,
        lng: f64,
    },

    #[error("Radius {meters}m is not a positive finite distance")]
    InvalidRadius {
        meters: f64,
    },

    #[error("Invalid date range: from ({from}) must be before to ({to})")]
    InvalidDateRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Subscription must carry at least one filter or a free-text query")]
    EmptySubscription,
}

/// Execution errors that occur while applying an operation.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Item not found: {id}")]
    ItemNotFound {
        id: ItemId,
    },

    #[error("Subscription not found: {id}")]
    SubscriptionNotFound {
        id: SubscriptionId,
    },

    #[error("Notification not found: {id}")]
    NotificationNotFound {
        id: NotificationId,
    },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("Forbidden: {reason}")]
    Forbidden {
        reason: String,
    },

    #[error("Concurrent transition collision on item {item_id}")]
    Conflict {
        item_id: ItemId,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },
}

/// Top-level error type for the engine.
///
/// This enum encompasses all errors surfaced across the engine boundary.
/// Internal state details never leak: every variant renders a bounded,
/// user-presentable message plus a stable [`code`](EngineError::code).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl EngineError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the stable machine-readable code for this error.
    ///
    /// Codes are part of the API contract and never change once shipped.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(v) => match v {
                ValidationError::InvalidCoordinate { .. } => "invalid_coordinate",
                ValidationError::InvalidRadius { .. } => "invalid_radius",
                ValidationError::InvalidDateRange { .. } => "invalid_date_range",
                ValidationError::MissingField { .. } => "missing_field",
                ValidationError::FieldTooLong { .. } => "field_too_long",
                ValidationError::EmptySubscription => "empty_subscription",
            },
            Self::Execution(e) => match e {
                ExecutionError::ItemNotFound { .. }
                | ExecutionError::SubscriptionNotFound { .. }
                | ExecutionError::NotificationNotFound { .. } => "not_found",
                ExecutionError::InvalidTransition { .. } => "invalid_transition",
                ExecutionError::Forbidden { .. } => "forbidden",
                ExecutionError::Conflict { .. } => "conflict",
                ExecutionError::Timeout { .. } => "timeout",
                ExecutionError::Storage { .. } => "storage",
            },
            Self::Internal { .. } => "internal",
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this error is retryable.
    ///
    /// Validation errors won't change on retry. Among execution errors only
    /// timeouts, storage hiccups, and transition conflicts (already retried
    /// once internally) are worth another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::Timeout { .. }
                    | ExecutionError::Storage { .. }
                    | ExecutionError::Conflict { .. }
            ),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
