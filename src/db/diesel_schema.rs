// Kept in sync by hand with the DDL in schema.rs.

diesel::table! {
    balances (user_id) {
        user_id -> Text,
        balance -> BigInt,
        total_earned -> BigInt,
        total_spent -> BigInt,
        streak_days -> Integer,
        last_claim_date -> Nullable<Text>,
        level -> Integer,
        xp -> BigInt,
        version -> BigInt,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    badges (badge_type) {
        badge_type -> Text,
        name -> Text,
        description -> Text,
        icon -> Text,
        condition_json -> Text,
    }
}

diesel::table! {
    ledger_entries (id) {
        id -> Text,
        user_id -> Text,
        amount -> BigInt,
        action_type -> Text,
        rule_id -> Nullable<Text>,
        dedupe_key -> Nullable<Text>,
        description -> Nullable<Text>,
        context_type -> Nullable<Text>,
        context_id -> Nullable<Text>,
        context_name -> Nullable<Text>,
        day -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    reward_rules (id) {
        id -> Text,
        action_type -> Text,
        category -> Text,
        amount -> BigInt,
        daily_limit -> Nullable<BigInt>,
        streak_bonus -> BigInt,
        max_streak_bonus -> Nullable<BigInt>,
        name -> Text,
        description -> Text,
        icon -> Text,
        active -> Integer,
    }
}

diesel::table! {
    user_badges (user_id, badge_type) {
        user_id -> Text,
        badge_type -> Text,
        earned_at -> Text,
    }
}

diesel::joinable!(user_badges -> badges (badge_type));

diesel::allow_tables_to_appear_in_same_query!(
    balances,
    badges,
    ledger_entries,
    reward_rules,
    user_badges,
);
