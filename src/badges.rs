//! Badge unlock evaluation
//!
//! Conditions are small tagged predicates over the balance row and per-action
//! counts from the transaction log, stored as JSON so new badges are catalog
//! data rather than code.

use std::collections::{BTreeSet, HashMap};

use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use tracing::debug;
use ts_rs::TS;

use crate::db::models::{Balance, BadgeRow};
use crate::db::{badges as badge_store, entries};
use crate::error::LedgerError;

/// Balance field a threshold condition reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum StatField {
    Balance,
    TotalEarned,
    TotalSpent,
    StreakDays,
    Level,
    Xp,
}

impl StatField {
    fn read(&self, balance: &Balance) -> i64 {
        match self {
            StatField::Balance => balance.balance,
            StatField::TotalEarned => balance.total_earned,
            StatField::TotalSpent => balance.total_spent,
            StatField::StreakDays => i64::from(balance.streak_days),
            StatField::Level => i64::from(balance.level),
            StatField::Xp => balance.xp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum BadgeCondition {
    FieldAtLeast { field: StatField, threshold: i64 },
    /// Count of credited entries for an action type
    ActionCount { action_type: String, at_least: i64 },
    StreakLength { days: i32 },
}

impl BadgeCondition {
    pub fn holds(&self, stats: &UserStats<'_>) -> bool {
        match self {
            BadgeCondition::FieldAtLeast { field, threshold } => field.read(stats.balance) >= *threshold,
            BadgeCondition::ActionCount { action_type, at_least } => {
                stats.action_counts.get(action_type).copied().unwrap_or(0) >= *at_least
            }
            BadgeCondition::StreakLength { days } => stats.balance.streak_days >= *days,
        }
    }

    fn required_action(&self) -> Option<&str> {
        match self {
            BadgeCondition::ActionCount { action_type, .. } => Some(action_type.as_str()),
            _ => None,
        }
    }
}

/// Badge definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Badge {
    pub badge_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    pub condition: BadgeCondition,
}

impl TryFrom<BadgeRow> for Badge {
    type Error = LedgerError;

    fn try_from(row: BadgeRow) -> Result<Self, Self::Error> {
        let condition = serde_json::from_str(&row.condition_json).map_err(|e| {
            LedgerError::Config(format!("Badge {} has an invalid condition: {}", row.badge_type, e))
        })?;
        Ok(Self {
            badge_type: row.badge_type,
            name: row.name,
            description: row.description,
            icon: row.icon,
            condition,
        })
    }
}

/// Owned badge joined with its definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct UserBadgeView {
    pub badge_type: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub earned_at: String,
}

/// Inputs a condition is evaluated against
pub struct UserStats<'a> {
    pub balance: &'a Balance,
    pub action_counts: HashMap<String, i64>,
}

/// Badges from `candidates` whose condition holds for `stats`
pub fn satisfied<'b>(candidates: &'b [Badge], stats: &UserStats<'_>) -> Vec<&'b Badge> {
    candidates.iter().filter(|b| b.condition.holds(stats)).collect()
}

/// Evaluate every badge the user does not own yet and record new unlocks.
///
/// Runs inside the caller's transaction. Inserts ignore rows that already
/// exist, so a concurrent unlock of the same badge is harmless.
pub fn unlock_new_badges(
    conn: &mut SqliteConnection,
    balance: &Balance,
    now: &str,
) -> Result<Vec<Badge>, LedgerError> {
    let owned: BTreeSet<String> = badge_store::owned_badge_types(conn, &balance.user_id)?
        .into_iter()
        .collect();
    let candidates: Vec<Badge> = badge_store::list_badges(conn)?
        .into_iter()
        .filter(|b| !owned.contains(&b.badge_type))
        .collect();

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let mut action_counts = HashMap::new();
    let required: BTreeSet<&str> = candidates
        .iter()
        .filter_map(|b| b.condition.required_action())
        .collect();
    for action_type in required {
        let count = entries::count_credited_actions(conn, &balance.user_id, action_type)?;
        action_counts.insert(action_type.to_string(), count);
    }

    let stats = UserStats { balance, action_counts };
    let mut unlocked = Vec::new();
    for badge in satisfied(&candidates, &stats) {
        if badge_store::insert_user_badge(conn, &balance.user_id, &badge.badge_type, now)? {
            debug!(user_id = %balance.user_id, badge = %badge.badge_type, "Badge unlocked");
            unlocked.push(badge.clone());
        }
    }

    Ok(unlocked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(streak_days: i32, total_earned: i64) -> Balance {
        let mut b = Balance::empty("alice", "t0");
        b.streak_days = streak_days;
        b.total_earned = total_earned;
        b.balance = total_earned;
        b
    }

    fn badge(badge_type: &str, condition: BadgeCondition) -> Badge {
        Badge {
            badge_type: badge_type.into(),
            name: badge_type.into(),
            description: String::new(),
            icon: String::new(),
            condition,
        }
    }

    #[test]
    fn test_condition_json_shape() {
        let json = r#"{"kind":"action_count","action_type":"post_created","at_least":10}"#;
        let condition: BadgeCondition = serde_json::from_str(json).unwrap();
        assert_eq!(
            condition,
            BadgeCondition::ActionCount { action_type: "post_created".into(), at_least: 10 }
        );

        let field = serde_json::to_value(BadgeCondition::FieldAtLeast {
            field: StatField::TotalEarned,
            threshold: 1_000,
        })
        .unwrap();
        assert_eq!(field["kind"], "field_at_least");
        assert_eq!(field["field"], "total_earned");
    }

    #[test]
    fn test_satisfied_filters_by_stats() {
        let b = balance(30, 120);
        let mut action_counts = HashMap::new();
        action_counts.insert("post_created".to_string(), 9);
        let stats = UserStats { balance: &b, action_counts };

        let candidates = vec![
            badge("devoted", BadgeCondition::StreakLength { days: 30 }),
            badge("treasure", BadgeCondition::FieldAtLeast { field: StatField::TotalEarned, threshold: 1_000 }),
            badge("storyteller", BadgeCondition::ActionCount { action_type: "post_created".into(), at_least: 10 }),
            badge("first_steps", BadgeCondition::FieldAtLeast { field: StatField::TotalEarned, threshold: 50 }),
        ];

        let names: Vec<&str> = satisfied(&candidates, &stats).iter().map(|b| b.badge_type.as_str()).collect();
        assert_eq!(names, vec!["devoted", "first_steps"]);
    }

    #[test]
    fn test_invalid_condition_row_is_config_error() {
        let row = BadgeRow {
            badge_type: "broken".into(),
            name: "Broken".into(),
            description: String::new(),
            icon: String::new(),
            condition_json: "{\"kind\":\"moon_phase\"}".into(),
        };
        assert!(matches!(Badge::try_from(row), Err(LedgerError::Config(_))));
    }
}
