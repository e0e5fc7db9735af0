//! Reward catalog storage
//!
//! The catalog is owned by the admin side; the ledger only reads it, and
//! seeds it when the tables are empty (built-in defaults or a TOML file).

use std::path::Path;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::badges as badge_store;
use super::db_err;
use super::diesel_schema::reward_rules;
use super::models::{NewRewardRule, RewardRuleRow};
use crate::badges::{Badge, BadgeCondition, StatField};
use crate::error::LedgerError;
use crate::rules::{RewardRule, RuleCategory, DAILY_LOGIN};

// ============================================================================
// Rules
// ============================================================================

/// Active rule for an action type
pub fn get_rule_by_action(
    conn: &mut SqliteConnection,
    action_type: &str,
) -> Result<Option<RewardRule>, LedgerError> {
    let row: Option<RewardRuleRow> = reward_rules::table
        .filter(reward_rules::action_type.eq(action_type))
        .filter(reward_rules::active.eq(1))
        .select(RewardRuleRow::as_select())
        .first(conn)
        .optional()
        .map_err(db_err("Rule query"))?;

    row.map(RewardRule::try_from).transpose()
}

/// Active rules, ordered for display
pub fn list_rules(conn: &mut SqliteConnection) -> Result<Vec<RewardRule>, LedgerError> {
    let rows: Vec<RewardRuleRow> = reward_rules::table
        .filter(reward_rules::active.eq(1))
        .order((reward_rules::category.asc(), reward_rules::action_type.asc()))
        .select(RewardRuleRow::as_select())
        .load(conn)
        .map_err(db_err("Rule query"))?;

    rows.into_iter().map(RewardRule::try_from).collect()
}

pub fn rule_count(conn: &mut SqliteConnection) -> Result<i64, LedgerError> {
    reward_rules::table
        .count()
        .get_result(conn)
        .map_err(db_err("Count query"))
}

/// Insert or replace a rule keyed by action type
pub fn upsert_rule(conn: &mut SqliteConnection, rule: &RewardRule) -> Result<(), LedgerError> {
    rule.validate()?;

    let id = if rule.id.is_empty() {
        format!("rule-{}", rule.action_type)
    } else {
        rule.id.clone()
    };

    diesel::replace_into(reward_rules::table)
        .values(&NewRewardRule {
            id: &id,
            action_type: &rule.action_type,
            category: rule.category.as_str(),
            amount: rule.amount,
            daily_limit: rule.daily_limit,
            streak_bonus: rule.streak_bonus,
            max_streak_bonus: rule.max_streak_bonus,
            name: &rule.name,
            description: &rule.description,
            icon: &rule.icon,
            active: i32::from(rule.active),
        })
        .execute(conn)
        .map_err(db_err("Rule upsert"))?;

    Ok(())
}

// ============================================================================
// Seeding
// ============================================================================

/// Catalog file layout: `[[rules]]` and `[[badges]]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub rules: Vec<RewardRule>,
    #[serde(default)]
    pub badges: Vec<Badge>,
}

impl CatalogSeed {
    pub fn builtin() -> Self {
        Self {
            rules: default_rules(),
            badges: default_badges(),
        }
    }

    /// Load a catalog from a TOML file
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let contents = std::fs::read_to_string(path)?;
        let seed: CatalogSeed = toml::from_str(&contents)
            .map_err(|e| LedgerError::Config(format!("Invalid catalog {:?}: {}", path, e)))?;
        for rule in &seed.rules {
            rule.validate()?;
        }
        Ok(seed)
    }
}

/// Seed rules and badges into empty tables; returns (rules, badges) written
pub fn seed_if_empty(conn: &mut SqliteConnection, seed: &CatalogSeed) -> Result<(usize, usize), LedgerError> {
    conn.immediate_transaction::<_, LedgerError, _>(|conn| {
        let mut written = (0, 0);

        if rule_count(conn)? == 0 {
            for rule in &seed.rules {
                upsert_rule(conn, rule)?;
            }
            written.0 = seed.rules.len();
        }

        if badge_store::badge_count(conn)? == 0 {
            for badge in &seed.badges {
                badge_store::upsert_badge(conn, badge)?;
            }
            written.1 = seed.badges.len();
        }

        if written != (0, 0) {
            info!(rules = written.0, badges = written.1, "Seeded reward catalog");
        }
        Ok(written)
    })
}

fn rule(action_type: &str, category: RuleCategory, amount: i64, name: &str, description: &str, icon: &str) -> RewardRule {
    RewardRule {
        id: format!("rule-{}", action_type),
        action_type: action_type.to_string(),
        category,
        amount,
        daily_limit: None,
        streak_bonus: 0,
        max_streak_bonus: None,
        name: name.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        active: true,
    }
}

pub fn default_rules() -> Vec<RewardRule> {
    let mut login = rule(DAILY_LOGIN, RuleCategory::Daily, 10, "Connexion quotidienne", "Connecte-toi chaque jour", "📅");
    login.streak_bonus = 5;
    login.max_streak_bonus = Some(50);

    let mut post = rule("post_created", RuleCategory::Daily, 5, "Publication", "Partage une publication", "✍️");
    post.daily_limit = Some(25);
    let mut comment = rule("comment_added", RuleCategory::Daily, 2, "Commentaire", "Commente une publication", "💬");
    comment.daily_limit = Some(20);
    let mut reaction = rule("reaction_received", RuleCategory::Daily, 1, "Réaction reçue", "Reçois une réaction", "❤️");
    reaction.daily_limit = Some(10);

    vec![
        rule("signup_bonus", RuleCategory::Unique, 50, "Bienvenue", "Bonus d'inscription", "🎁"),
        rule("profile_completed", RuleCategory::Unique, 25, "Profil complet", "Complète ton profil", "👤"),
        login,
        post,
        comment,
        reaction,
        rule("event_participation", RuleCategory::Recurrent, 20, "Participation", "Participe à un stage ou un événement", "🎪"),
        rule("grade_passed", RuleCategory::Progression, 100, "Passage de grade", "Réussis un passage de grade", "🥋"),
        rule("annual_membership", RuleCategory::Annual, 100, "Adhésion annuelle", "Renouvelle ton adhésion", "🏅"),
    ]
}

fn badge(badge_type: &str, name: &str, description: &str, icon: &str, condition: BadgeCondition) -> Badge {
    Badge {
        badge_type: badge_type.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        condition,
    }
}

pub fn default_badges() -> Vec<Badge> {
    vec![
        badge(
            "first_steps",
            "Premiers pas",
            "Gagne tes 50 premiers jetons",
            "🌱",
            BadgeCondition::FieldAtLeast { field: StatField::TotalEarned, threshold: 50 },
        ),
        badge("regular", "Régulier", "7 jours de connexion d'affilée", "🔥", BadgeCondition::StreakLength { days: 7 }),
        badge("devoted", "Dévoué", "30 jours de connexion d'affilée", "⭐", BadgeCondition::StreakLength { days: 30 }),
        badge(
            "storyteller",
            "Conteur",
            "Publie 10 fois",
            "📖",
            BadgeCondition::ActionCount { action_type: "post_created".into(), at_least: 10 },
        ),
        badge(
            "event_goer",
            "Habitué des stages",
            "Participe à 5 événements",
            "🎟️",
            BadgeCondition::ActionCount { action_type: "event_participation".into(), at_least: 5 },
        ),
        badge(
            "treasure",
            "Trésor",
            "Gagne 1000 jetons au total",
            "💎",
            BadgeCondition::FieldAtLeast { field: StatField::TotalEarned, threshold: 1_000 },
        ),
    ]
}
