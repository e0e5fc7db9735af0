//! Reward rule engine
//!
//! Rules are catalog data keyed by `action_type`. This module turns a rule and
//! the user's prior ledger state into an award plan; it never touches storage.
//!
//! | Category | Limit |
//! |----------|-------|
//! | `unique` | once per user, ever |
//! | `récurrent` | once per (user, context_id) |
//! | `quotidien` | cumulative amount per day capped at `daily_limit` |
//! | `progression`, `event`, `annuel` | none; eligibility decided upstream |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::db::models::RewardRuleRow;
use crate::error::LedgerError;

/// Action credited by the daily claim (never through `award`)
pub const DAILY_LOGIN: &str = "daily_login";

/// Action type recorded on redemptions
pub const REDEEM: &str = "redeem";

/// Dedupe key used for `unique` rules
const ONCE_KEY: &str = "once";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum RuleCategory {
    #[serde(rename = "unique")]
    Unique,
    #[serde(rename = "récurrent", alias = "recurrent")]
    Recurrent,
    #[serde(rename = "quotidien")]
    Daily,
    #[serde(rename = "progression")]
    Progression,
    #[serde(rename = "event", alias = "activité")]
    Event,
    #[serde(rename = "annuel")]
    Annual,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Unique => "unique",
            RuleCategory::Recurrent => "récurrent",
            RuleCategory::Daily => "quotidien",
            RuleCategory::Progression => "progression",
            RuleCategory::Event => "event",
            RuleCategory::Annual => "annuel",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleCategory {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unique" => Ok(RuleCategory::Unique),
            "récurrent" | "recurrent" => Ok(RuleCategory::Recurrent),
            "quotidien" => Ok(RuleCategory::Daily),
            "progression" => Ok(RuleCategory::Progression),
            "event" | "activité" => Ok(RuleCategory::Event),
            "annuel" => Ok(RuleCategory::Annual),
            other => Err(LedgerError::Validation(format!("Unknown rule category: {}", other))),
        }
    }
}

/// Reward rule as configured in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RewardRule {
    #[serde(default)]
    pub id: String,
    pub action_type: String,
    pub category: RuleCategory,
    pub amount: i64,
    #[serde(default)]
    pub daily_limit: Option<i64>,
    /// Extra tokens per consecutive claim day (daily_login only)
    #[serde(default)]
    pub streak_bonus: i64,
    #[serde(default)]
    pub max_streak_bonus: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl RewardRule {
    /// Check catalog invariants before a rule is stored
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.action_type.trim().is_empty() {
            return Err(LedgerError::Validation("action_type is required".into()));
        }
        if self.action_type == REDEEM {
            return Err(LedgerError::Validation(format!("'{}' is reserved", REDEEM)));
        }
        if self.amount < 0 {
            return Err(LedgerError::Validation(format!(
                "{}: amount must not be negative",
                self.action_type
            )));
        }
        if self.streak_bonus < 0 || self.max_streak_bonus.is_some_and(|m| m < 0) {
            return Err(LedgerError::Validation(format!(
                "{}: streak bonus must not be negative",
                self.action_type
            )));
        }
        match (self.category, self.daily_limit) {
            (_, Some(limit)) if limit < 0 => Err(LedgerError::Validation(format!(
                "{}: daily_limit must not be negative",
                self.action_type
            ))),
            (RuleCategory::Daily, _) | (_, None) => Ok(()),
            (category, Some(_)) => Err(LedgerError::Validation(format!(
                "{}: daily_limit only applies to quotidien rules, not {}",
                self.action_type, category
            ))),
        }
    }
}

impl TryFrom<RewardRuleRow> for RewardRule {
    type Error = LedgerError;

    fn try_from(row: RewardRuleRow) -> Result<Self, Self::Error> {
        Ok(Self {
            category: row.category.parse()?,
            id: row.id,
            action_type: row.action_type,
            amount: row.amount,
            daily_limit: row.daily_limit,
            streak_bonus: row.streak_bonus,
            max_streak_bonus: row.max_streak_bonus,
            name: row.name,
            description: row.description,
            icon: row.icon,
            active: row.active != 0,
        })
    }
}

/// Where an engagement happened (stage, club, post...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AwardContext {
    #[serde(default)]
    pub context_type: Option<String>,
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub context_name: Option<String>,
}

impl AwardContext {
    pub fn with_id(context_type: &str, context_id: &str) -> Self {
        Self {
            context_type: Some(context_type.to_string()),
            context_id: Some(context_id.to_string()),
            context_name: None,
        }
    }
}

/// De-duplication key written with the entry, if the category needs one
pub fn dedupe_key(rule: &RewardRule, context: &AwardContext) -> Result<Option<String>, LedgerError> {
    match rule.category {
        RuleCategory::Unique => Ok(Some(ONCE_KEY.to_string())),
        RuleCategory::Recurrent => match context.context_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(Some(id.to_string())),
            _ => Err(LedgerError::Validation(format!(
                "{} is awarded per context and requires context_id",
                rule.action_type
            ))),
        },
        _ => Ok(None),
    }
}

/// Amount to credit given what was already credited today for the action.
///
/// Daily rules are capped to the remaining headroom (possibly zero); every
/// other category credits the configured amount.
pub fn capped_amount(rule: &RewardRule, already_today: i64) -> i64 {
    match (rule.category, rule.daily_limit) {
        (RuleCategory::Daily, Some(limit)) => {
            let headroom = (limit - already_today).max(0);
            rule.amount.min(headroom)
        }
        _ => rule.amount,
    }
}

/// Daily claim amount: base plus a capped bonus per consecutive day
pub fn daily_claim_amount(rule: &RewardRule, streak_days: i32) -> i64 {
    let extra_days = i64::from(streak_days.max(1) - 1);
    let bonus = extra_days.saturating_mul(rule.streak_bonus);
    let bonus = match rule.max_streak_bonus {
        Some(max) => bonus.min(max),
        None => bonus,
    };
    rule.amount + bonus
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(category: RuleCategory, amount: i64, daily_limit: Option<i64>) -> RewardRule {
        RewardRule {
            id: "rule-test".into(),
            action_type: "test_action".into(),
            category,
            amount,
            daily_limit,
            streak_bonus: 0,
            max_streak_bonus: None,
            name: "Test".into(),
            description: String::new(),
            icon: String::new(),
            active: true,
        }
    }

    #[test]
    fn test_category_parsing_accepts_aliases() {
        assert_eq!("récurrent".parse::<RuleCategory>().unwrap(), RuleCategory::Recurrent);
        assert_eq!("recurrent".parse::<RuleCategory>().unwrap(), RuleCategory::Recurrent);
        assert_eq!("activité".parse::<RuleCategory>().unwrap(), RuleCategory::Event);
        assert!("weekly".parse::<RuleCategory>().is_err());

        let parsed: RuleCategory = serde_json::from_str("\"quotidien\"").unwrap();
        assert_eq!(parsed, RuleCategory::Daily);
        assert_eq!(serde_json::to_string(&RuleCategory::Recurrent).unwrap(), "\"récurrent\"");
    }

    #[test]
    fn test_event_category_writes_event_reads_activite() {
        assert_eq!(serde_json::to_string(&RuleCategory::Event).unwrap(), "\"event\"");
        let legacy: RuleCategory = serde_json::from_str("\"activité\"").unwrap();
        assert_eq!(legacy, RuleCategory::Event);
    }

    #[test]
    fn test_daily_cap_headroom() {
        let post = rule(RuleCategory::Daily, 5, Some(25));
        assert_eq!(capped_amount(&post, 0), 5);
        assert_eq!(capped_amount(&post, 22), 3);
        assert_eq!(capped_amount(&post, 25), 0);
        assert_eq!(capped_amount(&post, 40), 0);

        let uncapped = rule(RuleCategory::Daily, 5, None);
        assert_eq!(capped_amount(&uncapped, 1_000), 5);

        let grade = rule(RuleCategory::Progression, 100, None);
        assert_eq!(capped_amount(&grade, 500), 100);
    }

    #[test]
    fn test_dedupe_keys_by_category() {
        let ctx = AwardContext::with_id("stage", "stage-7");
        assert_eq!(dedupe_key(&rule(RuleCategory::Unique, 50, None), &ctx).unwrap().as_deref(), Some("once"));
        assert_eq!(dedupe_key(&rule(RuleCategory::Recurrent, 20, None), &ctx).unwrap().as_deref(), Some("stage-7"));
        assert_eq!(dedupe_key(&rule(RuleCategory::Event, 20, None), &ctx).unwrap(), None);

        let err = dedupe_key(&rule(RuleCategory::Recurrent, 20, None), &AwardContext::default()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_daily_claim_bonus() {
        let mut login = rule(RuleCategory::Daily, 10, None);
        login.streak_bonus = 5;
        login.max_streak_bonus = Some(50);

        assert_eq!(daily_claim_amount(&login, 1), 10);
        assert_eq!(daily_claim_amount(&login, 2), 15);
        assert_eq!(daily_claim_amount(&login, 5), 30);
        assert_eq!(daily_claim_amount(&login, 40), 60);
    }

    #[test]
    fn test_validate_rejects_limit_on_non_daily() {
        assert!(rule(RuleCategory::Daily, 5, Some(25)).validate().is_ok());
        assert!(rule(RuleCategory::Unique, 5, Some(25)).validate().is_err());
        assert!(rule(RuleCategory::Unique, -5, None).validate().is_err());

        let mut reserved = rule(RuleCategory::Event, 5, None);
        reserved.action_type = REDEEM.into();
        assert!(reserved.validate().is_err());
    }
}
