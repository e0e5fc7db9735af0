//! Daily claim streak state machine
//!
//! State is `(last_claim_date, streak_days)` taken from the committed balance
//! row, so a retried claim is rejected without any request bookkeeping.

use chrono::NaiveDate;
use serde::Serialize;

/// Outcome of evaluating a claim against the stored streak state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum StreakTransition {
    /// Already claimed for this service day; nothing may be written
    AlreadyClaimed { streak_days: i32 },
    /// Claimed yesterday; streak grows by one
    Continued { streak_days: i32 },
    /// First claim ever or a gap of at least one day
    Started { streak_days: i32 },
}

impl StreakTransition {
    pub fn streak_days(&self) -> i32 {
        match *self {
            StreakTransition::AlreadyClaimed { streak_days }
            | StreakTransition::Continued { streak_days }
            | StreakTransition::Started { streak_days } => streak_days,
        }
    }

    pub fn is_claimable(&self) -> bool {
        !matches!(self, StreakTransition::AlreadyClaimed { .. })
    }
}

/// Evaluate a claim made on `today`.
///
/// A stored claim date later than `today` (service clock moved backwards) is
/// treated as already claimed.
pub fn evaluate(last_claim: Option<NaiveDate>, streak_days: i32, today: NaiveDate) -> StreakTransition {
    match last_claim {
        Some(last) if last >= today => StreakTransition::AlreadyClaimed { streak_days },
        Some(last) if today.pred_opt() == Some(last) => StreakTransition::Continued {
            streak_days: streak_days.max(0).saturating_add(1),
        },
        _ => StreakTransition::Started { streak_days: 1 },
    }
}
