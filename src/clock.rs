//! Service clock and calendar
//!
//! All day arithmetic (streaks, daily caps) goes through [`ServiceCalendar`],
//! which pins day boundaries to one fixed UTC offset. Client-supplied dates
//! are never consulted.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, SecondsFormat, Utc};

use crate::error::LedgerError;

/// Source of the current instant (allows fixed time in tests)
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Arc::new(Mutex::new(instant)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut guard) = self.instant.lock() {
            *guard = instant;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.instant.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// Clock plus the fixed offset that defines "today"
#[derive(Clone)]
pub struct ServiceCalendar {
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl ServiceCalendar {
    pub fn new(clock: Arc<dyn Clock>, offset_minutes: i32) -> Result<Self, LedgerError> {
        let offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                LedgerError::Config(format!("Invalid timezone offset: {} minutes", offset_minutes))
            })?;
        Ok(Self { clock, offset })
    }

    pub fn utc(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            offset: Utc.fix(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current service-local calendar day
    pub fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.offset).date_naive()
    }

    /// Timestamp for TEXT columns; fixed width so lexical order is time order
    pub fn timestamp(&self) -> String {
        format_timestamp(self.clock.now())
    }
}

pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Day key stored alongside ledger entries and balances
pub fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}
