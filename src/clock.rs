use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const MONTHS_PER_YEAR: u8 = 12;

/// In-game calendar position of a session.
///
/// Natural ordering equals chronological ordering.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GameDate {
    pub year: i32,
    pub month: u8,
}

impl GameDate {
    pub fn new(year: i32, month: u8) -> Self {
        debug_assert!(
            (1..=MONTHS_PER_YEAR).contains(&month),
            "month out of range: {month}"
        );
        Self { year, month }
    }

    /// Month count since year 0, month 1. Handy for date comparisons in events.
    pub fn as_months(self) -> i64 {
        self.year as i64 * MONTHS_PER_YEAR as i64 + (self.month as i64 - 1)
    }

    pub fn is_year_start(self) -> bool {
        self.month == 1
    }
}

impl fmt::Display for GameDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Y{}.M{}", self.year, self.month)
    }
}

/// Length of one turn. Always strictly positive.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnTerm(TimeDelta);

impl TurnTerm {
    /// Build a term from the session's `turnterm` column (minutes per turn).
    pub fn from_minutes(minutes: i32) -> Result<Self, EngineError> {
        if minutes <= 0 {
            return Err(EngineError::InvalidTurnTerm(minutes));
        }
        Ok(Self(TimeDelta::minutes(minutes as i64)))
    }

    pub fn as_delta(self) -> TimeDelta {
        self.0
    }

    pub fn as_seconds(self) -> i64 {
        self.0.num_seconds()
    }
}

/// Floor `t` to the start of the turn interval containing it, counting
/// intervals from the Unix epoch. Sub-second precision is dropped.
pub fn truncate_to_turn(t: DateTime<Utc>, term: TurnTerm) -> DateTime<Utc> {
    let secs = term.as_seconds();
    let floored = t.timestamp().div_euclid(secs) * secs;
    DateTime::from_timestamp(floored, 0).unwrap_or(t)
}

pub fn advance(t: DateTime<Utc>, term: TurnTerm) -> DateTime<Utc> {
    t + term.as_delta()
}

/// Next calendar month, wrapping December into January of the following year.
pub fn roll_month(date: GameDate) -> GameDate {
    if date.month >= MONTHS_PER_YEAR {
        GameDate::new(date.year + 1, 1)
    } else {
        GameDate::new(date.year, date.month + 1)
    }
}

/// Wall-clock source for the execution loop. Injected so tests can pin "now".
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualTime {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualTime {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
