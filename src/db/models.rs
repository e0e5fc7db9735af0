//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! TypeScript types are auto-generated via ts-rs. Run:
//!   cargo test export_bindings

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::diesel_schema::*;

/// XP needed per level; level 1 starts at 0 XP
pub const XP_PER_LEVEL: i64 = 100;

/// Level reached with the given XP
pub fn level_for_xp(xp: i64) -> i32 {
    let level = 1 + xp.max(0) / XP_PER_LEVEL;
    i32::try_from(level).unwrap_or(i32::MAX)
}

// ============================================================================
// Ledger Entries
// ============================================================================

/// Ledger entry row - immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize, TS)]
#[diesel(table_name = ledger_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[ts(export)]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    pub action_type: String,
    pub rule_id: Option<String>,
    #[serde(skip)]
    pub dedupe_key: Option<String>,
    pub description: Option<String>,
    pub context_type: Option<String>,
    pub context_id: Option<String>,
    pub context_name: Option<String>,
    pub day: String,
    pub created_at: String,
}

/// New ledger entry for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ledger_entries)]
pub struct NewLedgerEntry<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub amount: i64,
    pub action_type: &'a str,
    pub rule_id: Option<&'a str>,
    pub dedupe_key: Option<&'a str>,
    pub description: Option<&'a str>,
    pub context_type: Option<&'a str>,
    pub context_id: Option<&'a str>,
    pub context_name: Option<&'a str>,
    pub day: &'a str,
    pub created_at: &'a str,
}

// ============================================================================
// Balances
// ============================================================================

/// Per-user aggregate row
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize, TS)]
#[diesel(table_name = balances)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[ts(export)]
pub struct Balance {
    pub user_id: String,
    pub balance: i64,
    pub total_earned: i64,
    pub total_spent: i64,
    pub streak_days: i32,
    pub last_claim_date: Option<String>,
    pub level: i32,
    pub xp: i64,
    #[serde(skip)]
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Balance {
    /// Zero balance for a user with no ledger movement yet (not persisted)
    pub fn empty(user_id: &str, now: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            balance: 0,
            total_earned: 0,
            total_spent: 0,
            streak_days: 0,
            last_claim_date: None,
            level: 1,
            xp: 0,
            version: 0,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }
}

/// New balance row for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = balances)]
pub struct NewBalance<'a> {
    pub user_id: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

// ============================================================================
// Reward Catalog
// ============================================================================

/// Reward rule row (category kept as its stored string)
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = reward_rules)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RewardRuleRow {
    pub id: String,
    pub action_type: String,
    pub category: String,
    pub amount: i64,
    pub daily_limit: Option<i64>,
    pub streak_bonus: i64,
    pub max_streak_bonus: Option<i64>,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub active: i32,
}

/// New reward rule for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = reward_rules)]
pub struct NewRewardRule<'a> {
    pub id: &'a str,
    pub action_type: &'a str,
    pub category: &'a str,
    pub amount: i64,
    pub daily_limit: Option<i64>,
    pub streak_bonus: i64,
    pub max_streak_bonus: Option<i64>,
    pub name: &'a str,
    pub description: &'a str,
    pub icon: &'a str,
    pub active: i32,
}

// ============================================================================
// Badges
// ============================================================================

/// Badge definition row (condition kept as JSON)
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = badges)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BadgeRow {
    pub badge_type: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub condition_json: String,
}

/// New badge definition for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = badges)]
pub struct NewBadge<'a> {
    pub badge_type: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub icon: &'a str,
    pub condition_json: &'a str,
}

/// Owned badge row
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize, Deserialize, TS)]
#[diesel(table_name = user_badges)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[ts(export)]
pub struct UserBadge {
    pub user_id: String,
    pub badge_type: String,
    pub earned_at: String,
}
