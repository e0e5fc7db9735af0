//! Event bus for ledger movements
//!
//! Events are emitted after a transaction commits, so listeners only ever
//! see movements that are durable. Listeners write the audit log and drop
//! the leaderboard snapshot when a balance moves.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::leaderboard::LeaderboardBuilder;

/// Ledger events emitted by the service
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    Awarded {
        entry_id: String,
        user_id: String,
        action_type: String,
        amount: i64,
        balance: i64,
    },
    DailyClaimed {
        entry_id: String,
        user_id: String,
        amount: i64,
        streak_days: i32,
        balance: i64,
    },
    Redeemed {
        entry_id: String,
        user_id: String,
        amount: i64,
        balance: i64,
    },
    BadgeUnlocked {
        user_id: String,
        badge_type: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &LedgerEvent);
}

/// Broadcast bus for ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LedgerEvent) {
        trace!(event = ?event, "Emitting ledger event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging listener for the audit trail
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::Awarded { entry_id, user_id, action_type, amount, balance } => {
                info!(entry = %entry_id, user_id = %user_id, action = %action_type, amount, balance, "Tokens awarded");
            }
            LedgerEvent::DailyClaimed { entry_id, user_id, amount, streak_days, balance } => {
                info!(entry = %entry_id, user_id = %user_id, amount, streak_days, balance, "Daily reward claimed");
            }
            LedgerEvent::Redeemed { entry_id, user_id, amount, balance } => {
                info!(entry = %entry_id, user_id = %user_id, amount, balance, "Tokens redeemed");
            }
            LedgerEvent::BadgeUnlocked { user_id, badge_type } => {
                info!(user_id = %user_id, badge = %badge_type, "Badge unlocked");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

/// Spawn a background task that drops the leaderboard snapshot whenever a
/// balance changes, so ranks catch up before the staleness bound
pub fn spawn_leaderboard_invalidator(
    event_bus: Arc<EventBus>,
    leaderboard: Arc<LeaderboardBuilder>,
) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(LedgerEvent::BadgeUnlocked { .. }) => {}
                Ok(_) => leaderboard.invalidate().await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Missed movements, so the snapshot cannot be trusted
                    debug!(skipped = n, "Leaderboard invalidator lagged");
                    leaderboard.invalidate().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::balances::{self, BalanceChange};
    use crate::db::LedgerStore;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(LedgerEvent::BadgeUnlocked {
            user_id: "alice".into(),
            badge_type: "regular".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            LedgerEvent::BadgeUnlocked { user_id, badge_type } => {
                assert_eq!(user_id, "alice");
                assert_eq!(badge_type, "regular");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(LedgerEvent::Redeemed {
            entry_id: "e1".into(),
            user_id: "alice".into(),
            amount: -10,
            balance: 0,
        });
    }

    #[tokio::test]
    async fn test_balance_events_refresh_leaderboard() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LedgerStore::open(&dir.path().join("ledger.db"), 2, Duration::from_secs(2)).unwrap();
        let credit = |user: &'static str, amount: i64, at: &'static str| {
            let store = store.clone();
            async move {
                store
                    .run(move |conn| {
                        let row = balances::get_or_create(conn, user, at)?;
                        balances::apply_change(conn, &row, &BalanceChange::amount(amount), at)
                    })
                    .await
                    .unwrap()
            }
        };
        credit("alice", 30, "t1").await;

        let board = Arc::new(LeaderboardBuilder::new(store.clone(), Duration::from_secs(3600), 100));
        let bus = Arc::new(EventBus::new());
        let _invalidator = spawn_leaderboard_invalidator(bus.clone(), board.clone());
        assert_eq!(board.top(10).await.unwrap()[0].user_id, "alice");

        let bob = credit("bob", 80, "t2").await;
        // Cached until told otherwise
        assert_eq!(board.top(10).await.unwrap()[0].user_id, "alice");

        bus.emit(LedgerEvent::Awarded {
            entry_id: "e1".into(),
            user_id: "bob".into(),
            action_type: "grade_passed".into(),
            amount: 80,
            balance: bob.balance,
        });

        let mut leader = String::new();
        for _ in 0..50 {
            leader = board.top(10).await.unwrap()[0].user_id.clone();
            if leader == "bob" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(leader, "bob");
    }
}
