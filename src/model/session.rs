use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{GameDate, TurnTerm};
use crate::error::EngineError;

pub type SessionId = i64;

/// Lifecycle of a session, stored as the `isunited` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Turns are being processed (`0`).
    Running,
    /// One nation holds every city; the world is frozen (`2`).
    Unified,
    /// The session has been closed by an operator (`3`).
    Closed,
}

impl SessionState {
    pub fn from_code(code: i16) -> Result<Self, EngineError> {
        match code {
            0 => Ok(SessionState::Running),
            2 => Ok(SessionState::Unified),
            3 => Ok(SessionState::Closed),
            other => Err(EngineError::Corrupt(format!("isunited code {other} is unknown"))),
        }
    }

    pub fn code(self) -> i16 {
        match self {
            SessionState::Running => 0,
            SessionState::Unified => 2,
            SessionState::Closed => 3,
        }
    }

    pub fn is_frozen(self) -> bool {
        !matches!(self, SessionState::Running)
    }
}

/// One game world. Only the execution loop advances `turntime` and `date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    /// Furthest instant this session has been processed up to.
    pub turntime: DateTime<Utc>,
    /// Minutes per turn.
    pub turnterm: i32,
    pub date: GameDate,
    pub state: SessionState,
    /// Liveness budget a player general is reset to after acting.
    pub killturn: i32,
    pub hidden_seed: u64,
}

impl Session {
    pub fn turn_term(&self) -> Result<TurnTerm, EngineError> {
        TurnTerm::from_minutes(self.turnterm)
    }

    /// Snapshot of the values commands, housekeeping and events read.
    pub fn env(&self) -> Result<GameEnv, EngineError> {
        Ok(GameEnv {
            session_id: self.id,
            date: self.date,
            turn_term: self.turn_term()?,
            killturn: self.killturn,
            hidden_seed: self.hidden_seed,
        })
    }
}

/// Environment passed by value into handlers, housekeeping and event scripts.
///
/// The session's `date` is the single source of truth; a month roll produces
/// a new `GameEnv` rather than mutating a shared one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameEnv {
    pub session_id: SessionId,
    pub date: GameDate,
    pub turn_term: TurnTerm,
    pub killturn: i32,
    pub hidden_seed: u64,
}

impl GameEnv {
    pub fn with_date(self, date: GameDate) -> Self {
        Self { date, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_round_trip() {
        for state in [
            SessionState::Running,
            SessionState::Unified,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_code(state.code()).unwrap(), state);
        }
    }

    #[test]
    fn unknown_codes_are_corrupt() {
        for code in [1, 4, -1] {
            let err = SessionState::from_code(code).unwrap_err();
            assert!(matches!(err, EngineError::Corrupt(_)), "code {code}");
        }
        assert!(!SessionState::from_code(0).unwrap().is_frozen());
        assert!(SessionState::from_code(2).unwrap().is_frozen());
        assert!(SessionState::from_code(3).unwrap().is_frozen());
    }
}
