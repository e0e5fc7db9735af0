//! Reward Ledger - gamified token ledger for club members
//!
//! Members earn tokens for engagement (signup, daily login, posts, events,
//! grade passes), keep a daily-claim streak, unlock badges and spend tokens
//! in the shop.
//!
//! ## Architecture
//!
//! | Component | Module |
//! |-----------|--------|
//! | Ledger service | `services::ledger_service` |
//! | Transaction log | `db::entries` |
//! | Balance aggregator | `db::balances` |
//! | Reward catalog | `db::catalog`, `rules` |
//! | Streak evaluator | `streak` |
//! | Badge evaluator | `badges`, `db::badges` |
//! | Leaderboard | `leaderboard` |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/reward-ledger/
//! ├── ledger.db      # SQLite (WAL)
//! └── config.toml    # Configuration
//! ```

pub mod badges;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod leaderboard;
pub mod rules;
pub mod services;
pub mod streak;

// Re-exports
pub use clock::{Clock, FixedClock, ServiceCalendar, SystemClock};
pub use config::Config;
pub use db::LedgerStore;
pub use error::LedgerError;
pub use http::HttpServer;
pub use rules::{AwardContext, RewardRule, RuleCategory};
pub use services::{AwardOutcome, ClaimOutcome, EventBus, LedgerEvent, LedgerService, Services};
