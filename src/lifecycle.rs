//! Status lifecycle state machine.
//!
//! The transition table is the single source of truth for which status
//! changes are legal. Anything not in the table fails with
//! `InvalidTransition` and leaves state untouched.
//!
//! ```text
//! registered -> { lost, stolen }
//! lost       -> { found, registered }
//! stolen     -> { found }
//! found      -> { returned, sold, registered }
//! returned   -> {}   (terminal)
//! sold       -> {}   (terminal)
//! ```

use crate::error::ExecutionError;
use crate::status::ItemStatus;

/// The targets reachable from a status.
#[must_use]
pub const fn allowed_targets(from: ItemStatus) -> &'static [ItemStatus] {
    match from {
        ItemStatus::Registered => &[ItemStatus::Lost, ItemStatus::Stolen],
        ItemStatus::Lost => &[ItemStatus::Found, ItemStatus::Registered],
        ItemStatus::Stolen => &[ItemStatus::Found],
        ItemStatus::Found => &[ItemStatus::Returned, ItemStatus::Sold, ItemStatus::Registered],
        ItemStatus::Returned | ItemStatus::Sold => &[],
    }
}

/// Returns true if `from -> to` is in the transition table.
#[must_use]
pub fn can_transition(from: ItemStatus, to: ItemStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Validates a transition, returning the error the engine surfaces.
///
/// # Errors
///
/// `InvalidTransition` for any edge not in the table, including self
/// transitions and anything out of a terminal state.
pub fn validate_transition(from: ItemStatus, to: ItemStatus) -> Result<(), ExecutionError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(ExecutionError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ItemStatus; 6] = [
        ItemStatus::Registered,
        ItemStatus::Lost,
        ItemStatus::Stolen,
        ItemStatus::Found,
        ItemStatus::Returned,
        ItemStatus::Sold,
    ];

    #[test]
    fn legal_transitions() {
        assert!(can_transition(ItemStatus::Registered, ItemStatus::Lost));
        assert!(can_transition(ItemStatus::Registered, ItemStatus::Stolen));
        assert!(can_transition(ItemStatus::Lost, ItemStatus::Found));
        assert!(can_transition(ItemStatus::Lost, ItemStatus::Registered));
        assert!(can_transition(ItemStatus::Stolen, ItemStatus::Found));
        assert!(can_transition(ItemStatus::Found, ItemStatus::Returned));
        assert!(can_transition(ItemStatus::Found, ItemStatus::Sold));
        assert!(can_transition(ItemStatus::Found, ItemStatus::Registered));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for to in ALL {
            assert!(!can_transition(ItemStatus::Returned, to));
            assert!(!can_transition(ItemStatus::Sold, to));
        }
    }

    #[test]
    fn self_transitions_are_rejected() {
        for s in ALL {
            assert!(!can_transition(s, s));
        }
    }

    #[test]
    fn sold_to_lost_is_invalid() {
        let err = validate_transition(ItemStatus::Sold, ItemStatus::Lost).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::InvalidTransition {
                from: ItemStatus::Sold,
                to: ItemStatus::Lost,
            }
        ));
    }

    #[test]
    fn stolen_cannot_go_back_to_registered_directly() {
        assert!(!can_transition(ItemStatus::Stolen, ItemStatus::Registered));
    }
}
