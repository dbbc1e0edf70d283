//! Deal state machine.
//!
//! Pure transition function from (previous state, failure streak, target,
//! outcome) to the next state and an optional notification. A notification
//! fires only when the stored state actually changes in a way the owner
//! cares about, so repeated identical checks stay silent.

use pricewatch_core::types::{CheckOutcome, DealState, Money, NotificationKind};

/// What to persist and whom to tell after one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub state: DealState,
    pub consecutive_failures: u32,
    pub notification: Option<NotificationKind>,
}

/// Classify a price against a target. Equality counts as reached.
pub fn state_for_price(price: Money, target: Money) -> DealState {
    if price <= target {
        DealState::BelowTarget
    } else {
        DealState::AboveTarget
    }
}

pub fn decide(
    previous: DealState,
    consecutive_failures: u32,
    target: Money,
    outcome: &CheckOutcome,
) -> Decision {
    match outcome {
        CheckOutcome::Success { price, .. } => {
            let state = state_for_price(*price, target);
            let notification = match (previous, state) {
                (DealState::None | DealState::AboveTarget, DealState::BelowTarget) => {
                    Some(NotificationKind::DealReached { price: *price })
                }
                (DealState::BelowTarget, DealState::AboveTarget) => {
                    Some(NotificationKind::DealOver { price: *price })
                }
                _ => None,
            };
            Decision {
                state,
                consecutive_failures: 0,
                notification,
            }
        }
        // Only the first structural failure of a streak is surfaced.
        CheckOutcome::HardFailure { reason } => Decision {
            state: previous,
            consecutive_failures: consecutive_failures.saturating_add(1),
            notification: (consecutive_failures == 0).then(|| NotificationKind::FetchFailed {
                reason: reason.clone(),
            }),
        },
        CheckOutcome::SoftFailure { .. } => Decision {
            state: previous,
            consecutive_failures,
            notification: None,
        },
    }
}
