use crate::models::Strategy;

/// Activity thresholds for strategy selection
const PERSONALIZED_MIN_ACTIONS: i64 = 50;
const ADAPTIVE_MIN_ACTIONS: i64 = 10;

/// Maps a reader's total activity count to a recommendation strategy.
///
/// Pure and total: every count maps to exactly one strategy. Guests never
/// reach this function; they are routed straight to the cached popular
/// pipeline by the orchestrator.
pub fn select_strategy(total_actions: i64) -> Strategy {
    if total_actions >= PERSONALIZED_MIN_ACTIONS {
        Strategy::Personalized
    } else if total_actions >= ADAPTIVE_MIN_ACTIONS {
        Strategy::Adaptive
    } else {
        Strategy::Popular
    }
}
