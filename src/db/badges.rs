//! Badge definitions and owned badges

use diesel::prelude::*;

use super::db_err;
use super::diesel_schema::{badges, user_badges};
use super::models::{BadgeRow, NewBadge, UserBadge};
use crate::badges::{Badge, UserBadgeView};
use crate::error::LedgerError;

// ============================================================================
// Definitions
// ============================================================================

pub fn list_badges(conn: &mut SqliteConnection) -> Result<Vec<Badge>, LedgerError> {
    let rows: Vec<BadgeRow> = badges::table
        .order(badges::badge_type.asc())
        .select(BadgeRow::as_select())
        .load(conn)
        .map_err(db_err("Badge query"))?;

    rows.into_iter().map(Badge::try_from).collect()
}

pub fn badge_count(conn: &mut SqliteConnection) -> Result<i64, LedgerError> {
    badges::table
        .count()
        .get_result(conn)
        .map_err(db_err("Count query"))
}

/// Insert or replace a badge definition (catalog seeding)
pub fn upsert_badge(conn: &mut SqliteConnection, badge: &Badge) -> Result<(), LedgerError> {
    let condition_json = serde_json::to_string(&badge.condition)?;

    diesel::replace_into(badges::table)
        .values(&NewBadge {
            badge_type: &badge.badge_type,
            name: &badge.name,
            description: &badge.description,
            icon: &badge.icon,
            condition_json: &condition_json,
        })
        .execute(conn)
        .map_err(db_err("Badge upsert"))?;

    Ok(())
}

// ============================================================================
// Ownership
// ============================================================================

pub fn owned_badge_types(conn: &mut SqliteConnection, user_id: &str) -> Result<Vec<String>, LedgerError> {
    user_badges::table
        .filter(user_badges::user_id.eq(user_id))
        .select(user_badges::badge_type)
        .load(conn)
        .map_err(db_err("Owned badge query"))
}

/// Owned badges with their definitions, oldest first
pub fn list_user_badges(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<UserBadgeView>, LedgerError> {
    let rows: Vec<(UserBadge, BadgeRow)> = user_badges::table
        .inner_join(badges::table)
        .filter(user_badges::user_id.eq(user_id))
        .order((user_badges::earned_at.asc(), user_badges::badge_type.asc()))
        .select((UserBadge::as_select(), BadgeRow::as_select()))
        .load(conn)
        .map_err(db_err("User badge query"))?;

    Ok(rows
        .into_iter()
        .map(|(owned, def)| UserBadgeView {
            badge_type: owned.badge_type,
            name: def.name,
            description: def.description,
            icon: def.icon,
            earned_at: owned.earned_at,
        })
        .collect())
}

/// Record an unlock; returns false if the user already owns the badge
pub fn insert_user_badge(
    conn: &mut SqliteConnection,
    user_id: &str,
    badge_type: &str,
    earned_at: &str,
) -> Result<bool, LedgerError> {
    let inserted = diesel::insert_or_ignore_into(user_badges::table)
        .values(&UserBadge {
            user_id: user_id.to_string(),
            badge_type: badge_type.to_string(),
            earned_at: earned_at.to_string(),
        })
        .execute(conn)
        .map_err(db_err("User badge insert"))?;

    Ok(inserted > 0)
}
