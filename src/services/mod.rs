//! Service layer for reward-ledger
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! LedgerService (locks, transactions, events)
//!     ↓
//! Rule engine / streak / badges (pure planning)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod events;
pub mod ledger_service;

pub use events::{spawn_leaderboard_invalidator, EventBus, EventListener, LedgerEvent};
pub use ledger_service::{
    AuditReport, AwardOutcome, AwardRequest, ClaimOutcome, LedgerService, Redemption, RewardsConfig,
};
pub use response::*;

use std::sync::Arc;

use crate::clock::ServiceCalendar;
use crate::config::Config;
use crate::db::LedgerStore;

/// Service container handed to the HTTP server
pub struct Services {
    pub ledger: Arc<LedgerService>,
    pub events: Arc<EventBus>,
}

impl Services {
    pub fn new(store: LedgerStore, calendar: ServiceCalendar, config: &Config) -> Self {
        let events = Arc::new(EventBus::new());
        let ledger = Arc::new(LedgerService::new(store, calendar, events.clone(), config));
        Self { ledger, events }
    }
}
