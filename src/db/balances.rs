//! Balance aggregator - one row per user
//!
//! Rows are only changed through [`apply_change`], which performs an
//! optimistic `version` check so two writers can never both commit on top of
//! the same snapshot.

use diesel::prelude::*;

use super::db_err;
use super::diesel_schema::balances;
use super::models::{level_for_xp, Balance, NewBalance};
use crate::error::LedgerError;

/// Movement applied to a balance row together with its ledger entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceChange {
    pub amount: i64,
    /// New `(streak_days, last_claim_date)` when the movement is a daily claim
    pub streak: Option<(i32, String)>,
}

impl BalanceChange {
    pub fn amount(amount: i64) -> Self {
        Self { amount, streak: None }
    }

    pub fn daily_claim(amount: i64, streak_days: i32, day: String) -> Self {
        Self {
            amount,
            streak: Some((streak_days, day)),
        }
    }
}

pub fn get_balance(conn: &mut SqliteConnection, user_id: &str) -> Result<Option<Balance>, LedgerError> {
    balances::table
        .filter(balances::user_id.eq(user_id))
        .select(Balance::as_select())
        .first(conn)
        .optional()
        .map_err(db_err("Balance query"))
}

/// Fetch the user's row, creating a zero row on first movement
pub fn get_or_create(
    conn: &mut SqliteConnection,
    user_id: &str,
    now: &str,
) -> Result<Balance, LedgerError> {
    diesel::insert_or_ignore_into(balances::table)
        .values(&NewBalance {
            user_id,
            created_at: now,
            updated_at: now,
        })
        .execute(conn)
        .map_err(db_err("Balance insert"))?;

    get_balance(conn, user_id)?
        .ok_or_else(|| LedgerError::Internal(format!("Balance row missing for {}", user_id)))
}

/// Compute the row that results from applying `change` to `current`
pub fn project(current: &Balance, change: &BalanceChange) -> Result<Balance, LedgerError> {
    let balance = current
        .balance
        .checked_add(change.amount)
        .ok_or_else(|| LedgerError::Validation("Balance overflow".into()))?;

    if balance < 0 {
        return Err(LedgerError::InsufficientBalance {
            balance: current.balance,
            requested: -change.amount,
        });
    }

    let mut next = current.clone();
    next.balance = balance;
    if change.amount > 0 {
        next.total_earned += change.amount;
        next.xp += change.amount;
        next.level = level_for_xp(next.xp);
    } else {
        next.total_spent -= change.amount;
    }
    if let Some((streak_days, day)) = &change.streak {
        next.streak_days = *streak_days;
        next.last_claim_date = Some(day.clone());
    }
    next.version = current.version + 1;
    Ok(next)
}

/// Apply a movement with an optimistic version check
pub fn apply_change(
    conn: &mut SqliteConnection,
    current: &Balance,
    change: &BalanceChange,
    now: &str,
) -> Result<Balance, LedgerError> {
    let mut next = project(current, change)?;
    next.updated_at = now.to_string();

    let updated = diesel::update(
        balances::table
            .filter(balances::user_id.eq(&current.user_id))
            .filter(balances::version.eq(current.version)),
    )
    .set((
        balances::balance.eq(next.balance),
        balances::total_earned.eq(next.total_earned),
        balances::total_spent.eq(next.total_spent),
        balances::streak_days.eq(next.streak_days),
        balances::last_claim_date.eq(next.last_claim_date.as_deref()),
        balances::level.eq(next.level),
        balances::xp.eq(next.xp),
        balances::version.eq(next.version),
        balances::updated_at.eq(&next.updated_at),
    ))
    .execute(conn)
    .map_err(db_err("Balance update"))?;

    if updated == 0 {
        return Err(LedgerError::ConcurrencyConflict(current.user_id.clone()));
    }

    Ok(next)
}

/// Users ordered by balance desc, earliest account first on ties
pub fn top_by_balance(conn: &mut SqliteConnection, limit: i64) -> Result<Vec<Balance>, LedgerError> {
    balances::table
        .order((
            balances::balance.desc(),
            balances::created_at.asc(),
            balances::user_id.asc(),
        ))
        .limit(limit)
        .select(Balance::as_select())
        .load(conn)
        .map_err(db_err("Leaderboard query"))
}

pub fn user_count(conn: &mut SqliteConnection) -> Result<i64, LedgerError> {
    balances::table
        .count()
        .get_result(conn)
        .map_err(db_err("Count query"))
}
