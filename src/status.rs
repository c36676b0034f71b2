//! Item lifecycle status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered item.
///
/// Serialized as a lowercase string so the values are stable across the API
/// boundary regardless of variant renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ItemStatus {
    /// Registered by its owner, nothing reported.
    Registered,
    /// Reported lost by the owner.
    Lost,
    /// Reported stolen by the owner.
    Stolen,
    /// Found and held pending return or sale.
    Found,
    /// Returned to the owner. Terminal.
    Returned,
    /// Sold on. Terminal.
    Sold,
}

impl ItemStatus {
    /// Returns true if this status has no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Returned | Self::Sold)
    }

    /// Returns true if reporting this status should trigger cross-item
    /// matching (theft/loss reporting is when cross-referencing matters).
    #[must_use]
    pub const fn triggers_matching(&self) -> bool {
        matches!(self, Self::Stolen | Self::Lost)
    }
}

impl TryFrom<String> for ItemStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value.is_empty() {
            return Err("item status cannot be empty".to_string());
        }

        Ok(if value.eq_ignore_ascii_case("registered") {
            Self::Registered
        } else if value.eq_ignore_ascii_case("lost") {
            Self::Lost
        } else if value.eq_ignore_ascii_case("stolen") {
            Self::Stolen
        } else if value.eq_ignore_ascii_case("found") {
            Self::Found
        } else if value.eq_ignore_ascii_case("returned") {
            Self::Returned
        } else if value.eq_ignore_ascii_case("sold") {
            Self::Sold
        } else {
            return Err(format!(
                "unknown item status: {value}. Expected one of registered, lost, stolen, found, returned, sold"
            ));
        })
    }
}

impl From<ItemStatus> for String {
    fn from(value: ItemStatus) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "registered"),
            Self::Lost => write!(f, "lost"),
            Self::Stolen => write!(f, "stolen"),
            Self::Found => write!(f, "found"),
            Self::Returned => write!(f, "returned"),
            Self::Sold => write!(f, "sold"),
        }
    }
}
