//! Transaction log - append-only ledger entries
//!
//! Entries are never updated or deleted. Idempotent awards rely on the
//! partial unique index over `(user_id, rule_id, dedupe_key)`.

use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::BigInt;
use serde::Serialize;

use super::db_err;
use super::diesel_schema::ledger_entries;
use super::models::{LedgerEntry, NewLedgerEntry};
use crate::error::LedgerError;

/// Aggregates recomputed from the log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerTotals {
    pub sum: i64,
    pub earned: i64,
    pub spent: i64,
    pub entries: i64,
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_entry(conn: &mut SqliteConnection, id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
    ledger_entries::table
        .filter(ledger_entries::id.eq(id))
        .select(LedgerEntry::as_select())
        .first(conn)
        .optional()
        .map_err(db_err("Query"))
}

/// Most recent entries for a user, newest first
pub fn history(
    conn: &mut SqliteConnection,
    user_id: &str,
    limit: i64,
) -> Result<Vec<LedgerEntry>, LedgerError> {
    ledger_entries::table
        .filter(ledger_entries::user_id.eq(user_id))
        .order((ledger_entries::created_at.desc(), ledger_entries::id.desc()))
        .limit(limit)
        .select(LedgerEntry::as_select())
        .load(conn)
        .map_err(db_err("History query"))
}

/// Whether the user already holds any entry for this rule
pub fn has_rule_entry(
    conn: &mut SqliteConnection,
    user_id: &str,
    rule_id: &str,
) -> Result<bool, LedgerError> {
    diesel::select(diesel::dsl::exists(
        ledger_entries::table
            .filter(ledger_entries::user_id.eq(user_id))
            .filter(ledger_entries::rule_id.eq(rule_id)),
    ))
    .get_result(conn)
    .map_err(db_err("Existence query"))
}

/// Whether the user already holds an entry for this rule in this context
pub fn has_context_entry(
    conn: &mut SqliteConnection,
    user_id: &str,
    rule_id: &str,
    context_id: &str,
) -> Result<bool, LedgerError> {
    diesel::select(diesel::dsl::exists(
        ledger_entries::table
            .filter(ledger_entries::user_id.eq(user_id))
            .filter(ledger_entries::rule_id.eq(rule_id))
            .filter(ledger_entries::context_id.eq(context_id)),
    ))
    .get_result(conn)
    .map_err(db_err("Existence query"))
}

/// Total already credited for an action on one service day
pub fn awarded_on_day(
    conn: &mut SqliteConnection,
    user_id: &str,
    action_type: &str,
    day: &str,
) -> Result<i64, LedgerError> {
    ledger_entries::table
        .filter(ledger_entries::user_id.eq(user_id))
        .filter(ledger_entries::action_type.eq(action_type))
        .filter(ledger_entries::day.eq(day))
        .filter(ledger_entries::amount.gt(0))
        .select(sql::<BigInt>("COALESCE(SUM(amount), 0)"))
        .get_result(conn)
        .map_err(db_err("Daily sum query"))
}

/// Number of credited entries for an action (used by badge conditions)
pub fn count_credited_actions(
    conn: &mut SqliteConnection,
    user_id: &str,
    action_type: &str,
) -> Result<i64, LedgerError> {
    ledger_entries::table
        .filter(ledger_entries::user_id.eq(user_id))
        .filter(ledger_entries::action_type.eq(action_type))
        .filter(ledger_entries::amount.gt(0))
        .count()
        .get_result(conn)
        .map_err(db_err("Count query"))
}

/// Recompute a user's aggregates from the log
pub fn totals_for_user(conn: &mut SqliteConnection, user_id: &str) -> Result<LedgerTotals, LedgerError> {
    let (sum, earned, spent, entries) = ledger_entries::table
        .filter(ledger_entries::user_id.eq(user_id))
        .select((
            sql::<BigInt>("COALESCE(SUM(amount), 0)"),
            sql::<BigInt>("COALESCE(SUM(CASE WHEN amount > 0 THEN amount ELSE 0 END), 0)"),
            sql::<BigInt>("COALESCE(SUM(CASE WHEN amount < 0 THEN -amount ELSE 0 END), 0)"),
            sql::<BigInt>("COUNT(*)"),
        ))
        .get_result::<(i64, i64, i64, i64)>(conn)
        .map_err(db_err("Totals query"))?;

    Ok(LedgerTotals { sum, earned, spent, entries })
}

pub fn entry_count(conn: &mut SqliteConnection) -> Result<i64, LedgerError> {
    ledger_entries::table
        .count()
        .get_result(conn)
        .map_err(db_err("Count query"))
}

// ============================================================================
// Write Operations
// ============================================================================

/// Append an entry.
///
/// Returns `None` when the de-duplication index already holds an entry for
/// the same `(user_id, rule_id, dedupe_key)`; nothing is written then.
pub fn append_entry(
    conn: &mut SqliteConnection,
    entry: &NewLedgerEntry<'_>,
) -> Result<Option<LedgerEntry>, LedgerError> {
    match diesel::insert_into(ledger_entries::table)
        .values(entry)
        .execute(conn)
    {
        Ok(_) => {}
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
            if entry.dedupe_key.is_some() =>
        {
            return Ok(None);
        }
        Err(e) => return Err(db_err("Insert")(e)),
    }

    get_entry(conn, entry.id)?
        .map(Some)
        .ok_or_else(|| LedgerError::Internal("Failed to retrieve appended entry".into()))
}
