//! SQLite persistence for the ledger
//!
//! ## Tables
//!
//! - `ledger_entries` - Append-only token movements (audit trail)
//! - `balances` - One aggregate row per user
//! - `user_badges` - Badges owned per user
//! - `reward_rules` - Admin-editable reward catalog
//! - `badges` - Badge definitions and unlock conditions
//!
//! Reads go through [`LedgerStore::run`], which executes on the blocking
//! pool under the configured storage timeout. Mutations go through
//! [`LedgerStore::write`], which checks the same budget inside an
//! `IMMEDIATE` transaction and rolls back when it is exceeded.

pub mod schema;
pub mod diesel_schema;
pub mod models;
pub mod entries;
pub mod balances;
pub mod catalog;
pub mod badges;

use std::path::Path;
use std::time::{Duration, Instant};

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info};

use crate::error::LedgerError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Map a diesel error with the failed step, keeping lock waits retryable
pub(crate) fn db_err(step: &'static str) -> impl FnOnce(diesel::result::Error) -> LedgerError {
    move |e| match LedgerError::from(e) {
        LedgerError::Database(msg) => LedgerError::Database(format!("{} failed: {}", step, msg)),
        other => other,
    }
}

/// Per-connection PRAGMAs applied on checkout-creation
#[derive(Debug, Clone, Copy)]
struct SqlitePragmas {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout={};",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite store with a bounded time per call
#[derive(Clone)]
pub struct LedgerStore {
    pool: DbPool,
    timeout: Duration,
}

impl LedgerStore {
    /// Open or create the ledger database
    pub fn open(db_path: &Path, pool_size: u32, timeout: Duration) -> Result<Self, LedgerError> {
        info!("Opening ledger database at {:?}", db_path);

        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(timeout)
            .connection_customizer(Box::new(SqlitePragmas { busy_timeout: timeout }))
            .build(manager)
            .map_err(|e| LedgerError::Pool(format!("Failed to build pool: {}", e)))?;

        let store = Self { pool, timeout };

        let mut conn = store.conn()?;
        schema::init_schema(&mut conn)?;

        Ok(store)
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConn, LedgerError> {
        self.pool.get().map_err(|e| {
            LedgerError::StorageTimeout(format!("Failed to get connection: {}", e))
        })
    }

    /// Run a read-only storage closure on the blocking pool, bounded by the
    /// store timeout.
    ///
    /// On expiry the caller gets `StorageTimeout` while the closure may still
    /// be running, so mutations must use [`LedgerStore::write`] instead.
    pub async fn run<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| {
                LedgerError::StorageTimeout(format!("Failed to get connection: {}", e))
            })?;
            f(&mut conn)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(LedgerError::Internal(format!(
                "Storage task failed: {}",
                join_err
            ))),
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "Storage call timed out");
                Err(LedgerError::StorageTimeout(format!(
                    "Storage call exceeded {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    /// Run a mutation in one `IMMEDIATE` transaction on the blocking pool.
    ///
    /// The store timeout is a deadline checked after the closure and before
    /// `COMMIT`. A call past its deadline rolls back and returns
    /// `StorageTimeout`, so a timeout never hides a committed write. The
    /// caller is only answered once the transaction has finished.
    pub async fn write<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let budget = self.timeout;
        let deadline = Instant::now() + budget;

        let task = tokio::task::spawn_blocking(move || {
            let wait = deadline.saturating_duration_since(Instant::now());
            let mut conn = pool.get_timeout(wait).map_err(|e| {
                LedgerError::StorageTimeout(format!("Failed to get connection: {}", e))
            })?;

            conn.immediate_transaction::<_, LedgerError, _>(|conn| {
                let out = f(conn)?;
                if Instant::now() > deadline {
                    debug!(timeout_ms = budget.as_millis() as u64, "Storage write past deadline, rolling back");
                    return Err(LedgerError::StorageTimeout(format!(
                        "Storage write exceeded {}ms and was rolled back",
                        budget.as_millis()
                    )));
                }
                Ok(out)
            })
        });

        task.await
            .map_err(|join_err| LedgerError::Internal(format!("Storage task failed: {}", join_err)))?
    }
}
