//! Leaderboard builder
//!
//! Serves the top users by balance from a snapshot of the first
//! `depth` rows. A snapshot older than `max_staleness` is rebuilt before it
//! is served; a staleness of zero turns the cache off. Balance events drop
//! the snapshot early through `spawn_leaderboard_invalidator`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use ts_rs::TS;

use crate::db::models::Balance;
use crate::db::{balances, LedgerStore};
use crate::error::LedgerError;

pub const DEFAULT_LIMIT: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub balance: i64,
    /// 1-based position
    pub rank: i64,
}

struct Snapshot {
    built_at: Instant,
    entries: Vec<LeaderboardEntry>,
}

pub struct LeaderboardBuilder {
    store: LedgerStore,
    max_staleness: Duration,
    depth: i64,
    snapshot: RwLock<Option<Snapshot>>,
}

impl LeaderboardBuilder {
    pub fn new(store: LedgerStore, max_staleness: Duration, depth: i64) -> Self {
        Self {
            store,
            max_staleness,
            depth: depth.max(1),
            snapshot: RwLock::new(None),
        }
    }

    /// Top `limit` users, balance descending, earliest account first on ties
    pub async fn top(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, LedgerError> {
        let limit = limit.max(1);

        if self.max_staleness.is_zero() || limit > self.depth {
            return self.load(limit).await;
        }

        {
            let guard = self.snapshot.read().await;
            if let Some(snapshot) = guard.as_ref() {
                if snapshot.built_at.elapsed() <= self.max_staleness {
                    return Ok(truncated(&snapshot.entries, limit));
                }
            }
        }

        let mut guard = self.snapshot.write().await;
        // Another request may have rebuilt it while we waited
        if let Some(snapshot) = guard.as_ref() {
            if snapshot.built_at.elapsed() <= self.max_staleness {
                return Ok(truncated(&snapshot.entries, limit));
            }
        }

        let entries = self.load(self.depth).await?;
        debug!(rows = entries.len(), "Leaderboard snapshot rebuilt");
        let top = truncated(&entries, limit);
        *guard = Some(Snapshot {
            built_at: Instant::now(),
            entries,
        });
        Ok(top)
    }

    /// Drop the snapshot so the next read rebuilds it
    pub async fn invalidate(&self) {
        *self.snapshot.write().await = None;
    }

    async fn load(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, LedgerError> {
        let rows = self
            .store
            .run(move |conn| balances::top_by_balance(conn, limit))
            .await?;
        Ok(ranked(rows))
    }
}

fn truncated(entries: &[LeaderboardEntry], limit: i64) -> Vec<LeaderboardEntry> {
    let n = usize::try_from(limit).unwrap_or(usize::MAX);
    entries.iter().take(n).cloned().collect()
}

/// Assign positional ranks to rows already in leaderboard order
pub fn ranked(rows: Vec<Balance>) -> Vec<LeaderboardEntry> {
    rows.into_iter()
        .zip(1..)
        .map(|(row, rank)| LeaderboardEntry {
            user_id: row.user_id,
            balance: row.balance,
            rank,
        })
        .collect()
}
