//! Error types for reward-ledger

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Insufficient balance: have {balance}, requested {requested}")]
    InsufficientBalance { balance: i64, requested: i64 },

    #[error("Storage timeout: {0}")]
    StorageTimeout(String),

    #[error("Concurrent update conflict for user {0}")]
    ConcurrencyConflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Whether the caller should retry the same request with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::StorageTimeout(_) | LedgerError::ConcurrencyConflict(_)
        )
    }
}

/// Raw diesel errors only reach us from inside transactions; anything that is
/// a lock wait expiring inside SQLite is reported as a timeout.
impl From<diesel::result::Error> for LedgerError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match e {
            Error::DatabaseError(DatabaseErrorKind::Unknown, ref info)
                if is_busy_message(info.message()) =>
            {
                LedgerError::StorageTimeout(info.message().to_string())
            }
            other => LedgerError::Database(other.to_string()),
        }
    }
}

fn is_busy_message(message: &str) -> bool {
    message.contains("database is locked") || message.contains("database is busy")
}
