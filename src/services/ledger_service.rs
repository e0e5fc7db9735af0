//! Ledger service - the only writer of entries and balances
//!
//! Every mutation for a user runs under that user's async lock and inside one
//! `IMMEDIATE` SQLite transaction opened by [`LedgerStore::write`]: read
//! state, plan, append the entry, update the balance row, evaluate badges.
//! The lock is held until the transaction has committed or rolled back.
//! Events are emitted after commit.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use ts_rs::TS;
use uuid::Uuid;

use crate::badges::{self, Badge, UserBadgeView};
use crate::clock::{format_day, parse_day, ServiceCalendar};
use crate::config::Config;
use crate::db::balances::{self, BalanceChange};
use crate::db::entries::{self, LedgerTotals};
use crate::db::models::{Balance, LedgerEntry, NewLedgerEntry};
use crate::db::{badges as badge_store, catalog, LedgerStore};
use crate::error::LedgerError;
use crate::leaderboard::{self, LeaderboardBuilder, LeaderboardEntry};
use crate::rules::{self, AwardContext, RewardRule, RuleCategory, DAILY_LOGIN, REDEEM};
use crate::streak;

use super::events::{EventBus, LedgerEvent};

pub const DEFAULT_HISTORY_LIMIT: i64 = 20;
pub const MAX_HISTORY_LIMIT: i64 = 200;
pub const MAX_LEADERBOARD_LIMIT: i64 = 500;
const MAX_USER_ID_LEN: usize = 128;

const CATALOG_DESCRIPTION: &str =
    "Gagne des jetons en participant à la vie du club et échange-les contre des récompenses.";

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(tag = "status", rename_all = "snake_case")]
#[ts(export)]
pub enum AwardOutcome {
    Awarded {
        entry: LedgerEntry,
        balance: Balance,
        new_badges: Vec<Badge>,
    },
    /// The rule already paid out for this user (or this context)
    AlreadyAwarded { rule_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(tag = "status", rename_all = "snake_case")]
#[ts(export)]
pub enum ClaimOutcome {
    Claimed {
        amount: i64,
        streak_days: i32,
        entry: LedgerEntry,
        balance: Balance,
        new_badges: Vec<Badge>,
    },
    AlreadyClaimedToday { streak_days: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct Redemption {
    pub entry: LedgerEntry,
    pub balance: Balance,
}

/// Catalog as shown to users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct RewardsConfig {
    pub currency_name: String,
    pub description: String,
    pub rewards: Vec<RewardRule>,
}

/// Stored balance row compared with totals recomputed from the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub user_id: String,
    pub stored: Balance,
    pub recomputed: LedgerTotals,
    pub consistent: bool,
}

/// Request body for awards
#[derive(Debug, Clone, Deserialize)]
pub struct AwardRequest {
    pub user_id: String,
    pub action_type: String,
    #[serde(flatten)]
    pub context: AwardContext,
}

// ============================================================================
// Per-user locks
// ============================================================================

/// Sharded table of per-user async locks
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Remove locks nobody holds or waits on; returns how many were dropped
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        // The map holds one reference; any other is a holder or waiter
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

// ============================================================================
// Service
// ============================================================================

pub struct LedgerService {
    store: LedgerStore,
    calendar: ServiceCalendar,
    locks: UserLocks,
    events: Arc<EventBus>,
    leaderboard: Arc<LeaderboardBuilder>,
    currency_name: String,
}

impl LedgerService {
    pub fn new(store: LedgerStore, calendar: ServiceCalendar, events: Arc<EventBus>, config: &Config) -> Self {
        let leaderboard = Arc::new(LeaderboardBuilder::new(
            store.clone(),
            config.leaderboard_max_staleness(),
            i64::from(config.leaderboard_cache_depth),
        ));
        Self {
            store,
            calendar,
            locks: UserLocks::new(),
            events,
            leaderboard,
            currency_name: config.currency_name.clone(),
        }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }

    pub fn leaderboard(&self) -> Arc<LeaderboardBuilder> {
        self.leaderboard.clone()
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Credit the reward configured for `action_type`
    pub async fn award(
        &self,
        user_id: &str,
        action_type: &str,
        context: AwardContext,
    ) -> Result<AwardOutcome, LedgerError> {
        validate_user_id(user_id)?;
        if action_type == DAILY_LOGIN {
            return Err(LedgerError::Validation(format!(
                "{} is credited through the daily claim",
                DAILY_LOGIN
            )));
        }
        if action_type == REDEEM {
            return Err(LedgerError::Validation(format!("{} is not an award", REDEEM)));
        }

        let _guard = self.locks.acquire(user_id).await;
        let user_id = user_id.to_string();
        let action_type = action_type.to_string();
        let now = self.calendar.timestamp();
        let day = format_day(self.calendar.today());
        let entry_id = Uuid::new_v4().to_string();

        let outcome = self
            .store
            .write(move |conn| {
                let rule = catalog::get_rule_by_action(conn, &action_type)?
                    .ok_or_else(|| LedgerError::UnknownAction(action_type.clone()))?;
                let dedupe_key = rules::dedupe_key(&rule, &context)?;

                let already = match (rule.category, dedupe_key.as_deref()) {
                    (RuleCategory::Unique, _) => entries::has_rule_entry(conn, &user_id, &rule.id)?,
                    (RuleCategory::Recurrent, Some(context_id)) => {
                        entries::has_context_entry(conn, &user_id, &rule.id, context_id)?
                    }
                    _ => false,
                };
                if already {
                    return Ok(AwardOutcome::AlreadyAwarded { rule_id: rule.id });
                }

                let amount = match rule.category {
                    RuleCategory::Daily => {
                        let today = entries::awarded_on_day(conn, &user_id, &action_type, &day)?;
                        rules::capped_amount(&rule, today)
                    }
                    _ => rule.amount,
                };

                let current = balances::get_or_create(conn, &user_id, &now)?;
                let appended = entries::append_entry(
                    conn,
                    &NewLedgerEntry {
                        id: &entry_id,
                        user_id: &user_id,
                        amount,
                        action_type: &action_type,
                        rule_id: Some(&rule.id),
                        dedupe_key: dedupe_key.as_deref(),
                        description: Some(&rule.name),
                        context_type: context.context_type.as_deref(),
                        context_id: context.context_id.as_deref(),
                        context_name: context.context_name.as_deref(),
                        day: &day,
                        created_at: &now,
                    },
                )?;
                let Some(entry) = appended else {
                    return Ok(AwardOutcome::AlreadyAwarded { rule_id: rule.id });
                };

                let balance = balances::apply_change(conn, &current, &BalanceChange::amount(amount), &now)?;
                let new_badges = badges::unlock_new_badges(conn, &balance, &now)?;

                Ok(AwardOutcome::Awarded { entry, balance, new_badges })
            })
            .await?;

        match &outcome {
            AwardOutcome::Awarded { entry, balance, new_badges } => {
                self.events.emit(LedgerEvent::Awarded {
                    entry_id: entry.id.clone(),
                    user_id: entry.user_id.clone(),
                    action_type: entry.action_type.clone(),
                    amount: entry.amount,
                    balance: balance.balance,
                });
                self.emit_badges(&entry.user_id, new_badges);
            }
            AwardOutcome::AlreadyAwarded { rule_id } => {
                debug!(rule_id = %rule_id, "Award skipped, already granted");
            }
        }

        Ok(outcome)
    }

    /// Claim today's login reward and advance the streak
    pub async fn claim_daily(&self, user_id: &str) -> Result<ClaimOutcome, LedgerError> {
        validate_user_id(user_id)?;

        let _guard = self.locks.acquire(user_id).await;
        let user_id = user_id.to_string();
        let now = self.calendar.timestamp();
        let today = self.calendar.today();
        let day = format_day(today);
        let entry_id = Uuid::new_v4().to_string();

        let outcome = self
            .store
            .write(move |conn| {
                let rule = catalog::get_rule_by_action(conn, DAILY_LOGIN)?
                    .ok_or_else(|| LedgerError::UnknownAction(DAILY_LOGIN.to_string()))?;

                let current = balances::get_or_create(conn, &user_id, &now)?;
                let last_claim = current.last_claim_date.as_deref().and_then(parse_day);
                let transition = streak::evaluate(last_claim, current.streak_days, today);
                if !transition.is_claimable() {
                    return Ok(ClaimOutcome::AlreadyClaimedToday {
                        streak_days: transition.streak_days(),
                    });
                }

                let streak_days = transition.streak_days();
                let amount = rules::daily_claim_amount(&rule, streak_days);
                let description = format!("{} (jour {})", rule.name, streak_days);

                // One claim per service day, also enforced by the dedupe index
                let appended = entries::append_entry(
                    conn,
                    &NewLedgerEntry {
                        id: &entry_id,
                        user_id: &user_id,
                        amount,
                        action_type: DAILY_LOGIN,
                        rule_id: Some(&rule.id),
                        dedupe_key: Some(&day),
                        description: Some(&description),
                        context_type: None,
                        context_id: None,
                        context_name: None,
                        day: &day,
                        created_at: &now,
                    },
                )?;
                let Some(entry) = appended else {
                    return Ok(ClaimOutcome::AlreadyClaimedToday {
                        streak_days: current.streak_days,
                    });
                };

                let balance = balances::apply_change(
                    conn,
                    &current,
                    &BalanceChange::daily_claim(amount, streak_days, day.clone()),
                    &now,
                )?;
                let new_badges = badges::unlock_new_badges(conn, &balance, &now)?;

                Ok(ClaimOutcome::Claimed {
                    amount,
                    streak_days,
                    entry,
                    balance,
                    new_badges,
                })
            })
            .await?;

        if let ClaimOutcome::Claimed { entry, balance, new_badges, streak_days, amount } = &outcome {
            self.events.emit(LedgerEvent::DailyClaimed {
                entry_id: entry.id.clone(),
                user_id: entry.user_id.clone(),
                amount: *amount,
                streak_days: *streak_days,
                balance: balance.balance,
            });
            self.emit_badges(&entry.user_id, new_badges);
        }

        Ok(outcome)
    }

    /// Spend tokens; never takes a balance below zero
    pub async fn redeem(&self, user_id: &str, amount: i64, reason: &str) -> Result<Redemption, LedgerError> {
        validate_user_id(user_id)?;
        if amount <= 0 {
            return Err(LedgerError::Validation("amount must be positive".into()));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::Validation("reason is required".into()));
        }

        let _guard = self.locks.acquire(user_id).await;
        let user_id = user_id.to_string();
        let reason = reason.to_string();
        let now = self.calendar.timestamp();
        let day = format_day(self.calendar.today());
        let entry_id = Uuid::new_v4().to_string();

        let redemption = self
            .store
            .write(move |conn| {
                let current = balances::get_balance(conn, &user_id)?
                    .unwrap_or_else(|| Balance::empty(&user_id, &now));
                let change = BalanceChange::amount(-amount);
                balances::project(&current, &change)?;

                let current = balances::get_or_create(conn, &user_id, &now)?;
                let entry = entries::append_entry(
                    conn,
                    &NewLedgerEntry {
                        id: &entry_id,
                        user_id: &user_id,
                        amount: -amount,
                        action_type: REDEEM,
                        rule_id: None,
                        dedupe_key: None,
                        description: Some(&reason),
                        context_type: None,
                        context_id: None,
                        context_name: None,
                        day: &day,
                        created_at: &now,
                    },
                )?
                .ok_or_else(|| LedgerError::Internal("Redemption entry was not written".into()))?;

                let balance = balances::apply_change(conn, &current, &change, &now)?;
                Ok(Redemption { entry, balance })
            })
            .await?;

        self.events.emit(LedgerEvent::Redeemed {
            entry_id: redemption.entry.id.clone(),
            user_id: redemption.entry.user_id.clone(),
            amount: redemption.entry.amount,
            balance: redemption.balance.balance,
        });

        Ok(redemption)
    }

    fn emit_badges(&self, user_id: &str, unlocked: &[Badge]) {
        for badge in unlocked {
            self.events.emit(LedgerEvent::BadgeUnlocked {
                user_id: user_id.to_string(),
                badge_type: badge.badge_type.clone(),
            });
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Committed balance; users without movements read as zero at level 1
    pub async fn get_balance(&self, user_id: &str) -> Result<Balance, LedgerError> {
        validate_user_id(user_id)?;
        let user_id = user_id.to_string();
        let now = self.calendar.timestamp();

        self.store
            .run(move |conn| {
                Ok(balances::get_balance(conn, &user_id)?.unwrap_or_else(|| Balance::empty(&user_id, &now)))
            })
            .await
    }

    /// Newest entries first
    pub async fn get_history(&self, user_id: &str, limit: Option<i64>) -> Result<Vec<LedgerEntry>, LedgerError> {
        validate_user_id(user_id)?;
        let user_id = user_id.to_string();
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);

        self.store.run(move |conn| entries::history(conn, &user_id, limit)).await
    }

    pub async fn get_leaderboard(&self, limit: Option<i64>) -> Result<Vec<LeaderboardEntry>, LedgerError> {
        let limit = limit
            .unwrap_or(leaderboard::DEFAULT_LIMIT)
            .clamp(1, MAX_LEADERBOARD_LIMIT);
        self.leaderboard.top(limit).await
    }

    pub async fn get_badges(&self) -> Result<Vec<Badge>, LedgerError> {
        self.store.run(badge_store::list_badges).await
    }

    pub async fn get_user_badges(&self, user_id: &str) -> Result<Vec<UserBadgeView>, LedgerError> {
        validate_user_id(user_id)?;
        let user_id = user_id.to_string();
        self.store
            .run(move |conn| badge_store::list_user_badges(conn, &user_id))
            .await
    }

    pub async fn get_catalog(&self) -> Result<RewardsConfig, LedgerError> {
        let rewards = self.store.run(catalog::list_rules).await?;
        Ok(RewardsConfig {
            currency_name: self.currency_name.clone(),
            description: CATALOG_DESCRIPTION.to_string(),
            rewards,
        })
    }

    /// Recompute a user's totals from the log and compare with the balance row
    pub async fn audit(&self, user_id: &str) -> Result<AuditReport, LedgerError> {
        validate_user_id(user_id)?;
        let user_id = user_id.to_string();
        let now = self.calendar.timestamp();

        let report = self
            .store
            .run(move |conn| {
                conn.transaction::<_, LedgerError, _>(|conn| {
                    let stored = balances::get_balance(conn, &user_id)?
                        .unwrap_or_else(|| Balance::empty(&user_id, &now));
                    let recomputed = entries::totals_for_user(conn, &user_id)?;
                    let consistent = stored.balance == recomputed.sum
                        && stored.total_earned == recomputed.earned
                        && stored.total_spent == recomputed.spent;
                    Ok(AuditReport { user_id, stored, recomputed, consistent })
                })
            })
            .await?;

        if !report.consistent {
            info!(
                user_id = %report.user_id,
                stored = report.stored.balance,
                recomputed = report.recomputed.sum,
                "Balance row disagrees with ledger"
            );
        }
        Ok(report)
    }
}

fn validate_user_id(user_id: &str) -> Result<(), LedgerError> {
    if user_id.trim().is_empty() {
        return Err(LedgerError::Validation("user_id is required".into()));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(LedgerError::Validation(format!(
            "user_id longer than {} bytes",
            MAX_USER_ID_LEN
        )));
    }
    Ok(())
}

/// Periodically drop per-user locks that are not in use
pub fn spawn_lock_pruner(service: Arc<LedgerService>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let pruned = service.locks().prune_idle();
            if pruned > 0 {
                debug!(pruned, remaining = service.locks().len(), "Pruned idle user locks");
            }
        }
    })
}
